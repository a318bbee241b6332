//! Tree scanner: walks a task's source directory and collects the files
//! changed since the task's last-synced watermark.

use std::fs::Metadata;
use std::path::Path;
use std::time::SystemTime;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use walkdir::WalkDir;

use crate::sync_engine::filter::{should_ignore, IgnoreRule};
use crate::sync_engine::types::{Candidate, ScanOutcome};

/// Walks `source` recursively and returns the files whose modification or
/// metadata-change time is strictly newer than `watermark` (`None` means
/// never synced: everything qualifies).
///
/// Symlinks are never followed; entries that are neither regular files nor
/// directories are skipped with a warning. An unreadable subdirectory is
/// logged and skipped, and the walk continues with its siblings. The
/// cancellation token is checked before each entry; a cancelled walk
/// reports [`ScanOutcome::Cancelled`] and keeps no partial list. `pulse` is
/// invoked once per visited entry to drive an indeterminate progress
/// indicator. Result order is directory-listing order.
pub fn scan(
    source: &Path,
    watermark: Option<SystemTime>,
    rules: &[IgnoreRule],
    label: &str,
    cancel: &CancellationToken,
    mut pulse: impl FnMut(),
) -> ScanOutcome {
    let mut candidates = Vec::new();

    let walker = WalkDir::new(source)
        .follow_links(false)
        .into_iter()
        .filter_entry(|e| {
            e.depth() == 0 || !should_ignore(&e.file_name().to_string_lossy(), rules)
        });

    for entry in walker {
        if cancel.is_cancelled() {
            info!(task = label, "scan cancelled by user");
            return ScanOutcome::Cancelled;
        }
        pulse();

        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                // Unreadable subtree: walkdir already skipped descending.
                error!(task = label, "error accessing {err}");
                continue;
            }
        };
        if entry.depth() == 0 {
            continue;
        }

        let file_type = entry.file_type();
        if file_type.is_dir() {
            continue;
        }
        if !file_type.is_file() {
            warn!(
                task = label,
                path = %entry.path().display(),
                "skipping entry: not a file or directory"
            );
            continue;
        }

        let meta = match entry.metadata() {
            Ok(meta) => meta,
            Err(err) => {
                error!(
                    task = label,
                    path = %entry.path().display(),
                    "error reading metadata: {err}"
                );
                continue;
            }
        };
        if watermark.map_or(true, |wm| changed_since(&meta, wm)) {
            let mtime = match meta.modified() {
                Ok(mtime) => mtime,
                Err(err) => {
                    error!(
                        task = label,
                        path = %entry.path().display(),
                        "error reading mtime: {err}"
                    );
                    continue;
                }
            };
            debug!(task = label, path = %entry.path().display(), "file to sync");
            candidates.push(Candidate {
                path: entry.into_path(),
                mtime,
            });
        }
    }

    info!(
        task = label,
        found = candidates.len(),
        source = %source.display(),
        "scan complete"
    );
    ScanOutcome::Complete(candidates)
}

/// A file counts as changed when its mtime, or on Unix its ctime, is
/// strictly newer than the watermark. The ctime check catches metadata-only
/// changes (chmod, rename back into place) that leave mtime untouched.
fn changed_since(meta: &Metadata, watermark: SystemTime) -> bool {
    if meta.modified().is_ok_and(|mtime| mtime > watermark) {
        return true;
    }
    #[cfg(unix)]
    {
        use std::os::unix::fs::MetadataExt;
        let watermark_epoch = watermark
            .duration_since(SystemTime::UNIX_EPOCH)
            .unwrap_or(std::time::Duration::ZERO);
        let watermark_ctime = (
            watermark_epoch.as_secs() as i64,
            watermark_epoch.subsec_nanos() as i64,
        );
        if (meta.ctime(), meta.ctime_nsec()) > watermark_ctime {
            return true;
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::time::Duration;
    use tempfile::TempDir;

    fn candidate_names(outcome: &ScanOutcome) -> Vec<String> {
        match outcome {
            ScanOutcome::Complete(candidates) => {
                let mut names: Vec<String> = candidates
                    .iter()
                    .map(|c| c.path.file_name().unwrap().to_string_lossy().into_owned())
                    .collect();
                names.sort();
                names
            }
            ScanOutcome::Cancelled => panic!("scan was cancelled"),
        }
    }

    #[test]
    fn scan_without_watermark_includes_everything() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("a.txt"), b"a").unwrap();
        fs::create_dir(dir.path().join("sub")).unwrap();
        fs::write(dir.path().join("sub/b.txt"), b"b").unwrap();

        let outcome = scan(dir.path(), None, &[], "t", &CancellationToken::new(), || {});
        assert_eq!(candidate_names(&outcome), vec!["a.txt", "b.txt"]);
    }

    #[test]
    fn scan_excludes_files_behind_the_watermark() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("old.txt"), b"old").unwrap();

        // Watermark well in the future: nothing written so far qualifies.
        let watermark = SystemTime::now() + Duration::from_secs(3600);
        let outcome = scan(
            dir.path(),
            Some(watermark),
            &[],
            "t",
            &CancellationToken::new(),
            || {},
        );
        assert_eq!(outcome, ScanOutcome::Complete(Vec::new()));
    }

    #[test]
    fn scan_includes_files_newer_than_the_watermark() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("fresh.txt"), b"fresh").unwrap();

        let watermark = SystemTime::now() - Duration::from_secs(3600);
        let outcome = scan(
            dir.path(),
            Some(watermark),
            &[],
            "t",
            &CancellationToken::new(),
            || {},
        );
        assert_eq!(candidate_names(&outcome), vec!["fresh.txt"]);
    }

    #[test]
    fn ignored_directories_are_not_descended_into() {
        let dir = TempDir::new().unwrap();
        fs::create_dir(dir.path().join("TEMP_cache")).unwrap();
        fs::write(dir.path().join("TEMP_cache/inner.txt"), b"x").unwrap();
        fs::write(dir.path().join("keep.txt"), b"y").unwrap();
        fs::write(dir.path().join("scratch.tmp"), b"z").unwrap();

        let rules = vec![
            IgnoreRule {
                startswith: vec!["temp_".to_string()],
                endswith: Vec::new(),
            },
            IgnoreRule {
                startswith: Vec::new(),
                endswith: vec![".tmp".to_string()],
            },
        ];
        let outcome = scan(dir.path(), None, &rules, "t", &CancellationToken::new(), || {});
        assert_eq!(candidate_names(&outcome), vec!["keep.txt"]);
    }

    #[cfg(unix)]
    #[test]
    fn unreadable_subdirectory_is_skipped_not_fatal() {
        use std::os::unix::fs::PermissionsExt;
        let dir = TempDir::new().unwrap();
        let blocked = dir.path().join("blocked");
        fs::create_dir(&blocked).unwrap();
        fs::write(blocked.join("hidden.txt"), b"x").unwrap();
        fs::write(dir.path().join("sibling.txt"), b"y").unwrap();

        fs::set_permissions(&blocked, fs::Permissions::from_mode(0o000)).unwrap();
        let outcome = scan(dir.path(), None, &[], "t", &CancellationToken::new(), || {});
        // Root can list 0o000 directories; the subtree assertion only
        // holds when the chmod actually blocks us.
        let chmod_blocks = fs::read_dir(&blocked).is_err();
        // Restore so TempDir can clean up.
        fs::set_permissions(&blocked, fs::Permissions::from_mode(0o755)).unwrap();

        let names = candidate_names(&outcome);
        assert!(names.contains(&"sibling.txt".to_string()));
        if chmod_blocks {
            assert_eq!(names, vec!["sibling.txt"]);
        }
    }

    #[cfg(unix)]
    #[test]
    fn ctime_comparison_keeps_sub_second_precision() {
        use std::os::unix::fs::MetadataExt;
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("a.txt");
        fs::write(&file, b"a").unwrap();
        // Push mtime behind any plausible watermark so only ctime decides.
        filetime::set_file_mtime(&file, filetime::FileTime::from_unix_time(0, 0)).unwrap();

        let meta = fs::metadata(&file).unwrap();
        let ctime = SystemTime::UNIX_EPOCH
            + Duration::new(meta.ctime() as u64, meta.ctime_nsec() as u32);

        // A watermark one nanosecond before the ctime, typically within
        // the ctime's own second, must not mask the change.
        assert!(changed_since(&meta, ctime - Duration::from_nanos(1)));
        // Strictly greater: a watermark equal to the ctime excludes it.
        assert!(!changed_since(&meta, ctime));
    }

    #[cfg(unix)]
    #[test]
    fn symlinks_are_skipped_not_followed() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("real.txt"), b"real").unwrap();
        std::os::unix::fs::symlink(dir.path().join("real.txt"), dir.path().join("link.txt"))
            .unwrap();

        let outcome = scan(dir.path(), None, &[], "t", &CancellationToken::new(), || {});
        assert_eq!(candidate_names(&outcome), vec!["real.txt"]);
    }

    #[test]
    fn cancelled_token_yields_cancelled_with_no_candidates() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("a.txt"), b"a").unwrap();

        let cancel = CancellationToken::new();
        cancel.cancel();
        let outcome = scan(dir.path(), None, &[], "t", &cancel, || {});
        assert_eq!(outcome, ScanOutcome::Cancelled);
    }

    #[test]
    fn cancellation_mid_scan_unwinds_before_finishing() {
        let dir = TempDir::new().unwrap();
        for i in 0..100 {
            fs::write(dir.path().join(format!("f{i:03}.txt")), b"x").unwrap();
        }

        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        let mut visited = 0usize;
        let outcome = scan(dir.path(), None, &[], "t", &cancel, move || {
            visited += 1;
            if visited == 10 {
                trigger.cancel();
            }
        });
        assert_eq!(outcome, ScanOutcome::Cancelled);
    }

    #[test]
    fn repeated_scans_with_unchanged_tree_agree() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("a.txt"), b"a").unwrap();
        fs::create_dir(dir.path().join("nested")).unwrap();
        fs::write(dir.path().join("nested/b.txt"), b"b").unwrap();

        let watermark = Some(SystemTime::now() - Duration::from_secs(60));
        let first = scan(dir.path(), watermark, &[], "t", &CancellationToken::new(), || {});
        let second = scan(dir.path(), watermark, &[], "t", &CancellationToken::new(), || {});
        assert_eq!(candidate_names(&first), candidate_names(&second));
        assert_eq!(candidate_names(&first), vec!["a.txt", "b.txt"]);
    }

    #[test]
    fn pulse_fires_once_per_visited_entry() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("a.txt"), b"a").unwrap();
        fs::write(dir.path().join("b.txt"), b"b").unwrap();

        let mut pulses = 0usize;
        scan(dir.path(), None, &[], "t", &CancellationToken::new(), || {
            pulses += 1;
        });
        // Root entry plus two files.
        assert_eq!(pulses, 3);
    }
}
