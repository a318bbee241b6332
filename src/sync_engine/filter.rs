//! Ignore-rule matching for scan-time filtering.
//!
//! Rules come straight from the task configuration; each one carries
//! case-insensitive name prefixes and suffixes. Matching is first-hit-wins
//! in rule order, so rule sets should stay small.

use serde::{Deserialize, Serialize};

/// One ignore rule from a task's `ignore` list.
///
/// A rule with neither pattern list matches nothing.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct IgnoreRule {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub startswith: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub endswith: Vec<String>,
}

/// Checks whether a bare file or directory name matches any ignore pattern.
///
/// `name` is a single path component, never a full path. Called once per
/// directory entry during a scan; no side effects.
pub fn should_ignore(name: &str, rules: &[IgnoreRule]) -> bool {
    let lower = name.to_lowercase();
    for rule in rules {
        if rule
            .startswith
            .iter()
            .any(|p| lower.starts_with(&p.to_lowercase()))
        {
            return true;
        }
        if rule
            .endswith
            .iter()
            .any(|p| lower.ends_with(&p.to_lowercase()))
        {
            return true;
        }
    }
    false
}
