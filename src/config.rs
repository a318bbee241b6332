//! Task registry: the YAML-backed record of sync task definitions.
//!
//! Loading is forgiving (a missing or unparseable file starts the app with
//! zero tasks); saving is strict, because a silent failure on the shutdown
//! path would lose the updated watermarks.

use anyhow::{bail, Context, Result};
use chrono::{Local, NaiveDateTime, TimeZone};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tracing::{error, info, warn};

use crate::sync_engine::filter::IgnoreRule;

/// Timestamp format used for the `synced` watermark in the config file.
pub const SYNCED_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// One sync task as configured in the tasks file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskConfig {
    /// Unique trigger/display name for the task.
    pub label: String,
    /// Absolute path of the directory to scan.
    pub source: PathBuf,
    /// Absolute path of the cloud-synced directory to mirror into.
    pub target: PathBuf,
    /// Display title.
    pub name: String,
    /// Watermark of the last successful sync; `None` means never synced.
    #[serde(default, with = "synced_stamp")]
    pub synced: Option<NaiveDateTime>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ignore: Vec<IgnoreRule>,
}

impl TaskConfig {
    /// The watermark as a `SystemTime` (local clock), `None` when the task
    /// has never synced.
    pub fn watermark(&self) -> Option<SystemTime> {
        self.synced
            .and_then(|stamp| Local.from_local_datetime(&stamp).earliest())
            .map(SystemTime::from)
    }

    /// Advances the watermark, never letting it move backward.
    pub fn mark_synced(&mut self, at: NaiveDateTime) {
        if self.synced.map_or(true, |prev| at > prev) {
            self.synced = Some(at);
        }
    }

    /// Checks the structural invariants before a run starts: label present,
    /// source and target are distinct, existing directories.
    pub fn validate(&self) -> Result<()> {
        if self.label.trim().is_empty() {
            bail!("task has an empty label");
        }
        if !self.source.is_dir() {
            bail!("source is not a directory: {}", self.source.display());
        }
        if !self.target.is_dir() {
            bail!("target is not a directory: {}", self.target.display());
        }
        if self.source == self.target {
            bail!("source and target are the same directory: {}", self.source.display());
        }
        Ok(())
    }
}

/// `synced` is stored as `YYYY-MM-DD HH:MM:SS`; an empty or missing value
/// means the task has never synced.
mod synced_stamp {
    use super::{NaiveDateTime, SYNCED_FORMAT};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(value: &Option<NaiveDateTime>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match value {
            Some(stamp) => serializer.serialize_str(&stamp.format(SYNCED_FORMAT).to_string()),
            None => serializer.serialize_str(""),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<NaiveDateTime>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = Option::<String>::deserialize(deserializer)?;
        match raw.as_deref().map(str::trim) {
            None | Some("") => Ok(None),
            Some(text) => NaiveDateTime::parse_from_str(text, SYNCED_FORMAT)
                .map(Some)
                .map_err(serde::de::Error::custom),
        }
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct TasksFile {
    #[serde(default)]
    tasks: Vec<TaskConfig>,
}

/// Loads the task list. Missing file or parse error is not fatal: the
/// application starts with zero configured tasks.
pub fn load_tasks(path: &Path) -> Vec<TaskConfig> {
    let raw = match std::fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(err) => {
            warn!("tasks config file not readable: {}: {err}", path.display());
            return Vec::new();
        }
    };
    match serde_yaml::from_str::<TasksFile>(&raw) {
        Ok(file) => {
            if file.tasks.is_empty() {
                warn!("no tasks found in config file {}", path.display());
            } else {
                info!(
                    count = file.tasks.len(),
                    "loaded tasks from config file {}",
                    path.display()
                );
            }
            file.tasks
        }
        Err(err) => {
            error!("error reading tasks config file {}: {err}", path.display());
            Vec::new()
        }
    }
}

/// Persists the task list (with its updated watermarks) back to the config
/// file. Unlike [`load_tasks`] this is fatal on error: the file must
/// already exist and be writable.
pub fn save_tasks(path: &Path, tasks: &[TaskConfig]) -> Result<()> {
    if !path.exists() {
        bail!("tasks config file not found: {}", path.display());
    }
    let doc = TasksFile {
        tasks: tasks.to_vec(),
    };
    let raw = serde_yaml::to_string(&doc).context("serializing tasks config")?;
    std::fs::write(path, raw)
        .with_context(|| format!("writing tasks config file {}", path.display()))?;
    info!(count = tasks.len(), "saved tasks to config file {}", path.display());
    Ok(())
}
