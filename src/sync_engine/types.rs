use serde::Serialize;
use std::path::PathBuf;
use std::time::SystemTime;

/// A file selected by a scan: absolute source path plus the modification
/// time observed at scan time. Valid for one scan -> sync cycle only; the
/// list is rebuilt from scratch on every scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub path: PathBuf,
    pub mtime: SystemTime,
}

/// Result of walking a source tree.
///
/// A cancelled scan never exposes a partial candidate list; callers treat
/// it like an empty scan but report it distinctly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanOutcome {
    Complete(Vec<Candidate>),
    Cancelled,
}

/// Counters accumulated by one copy/evict pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SyncCounts {
    pub copied: u64,
    pub evicted: u64,
}

/// Process-wide stage toggles.
///
/// The setters maintain the dependency chain evict => copy => scan, so the
/// flags can never describe an impossible run (evicting without copying,
/// copying without scanning).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StageFlags {
    scan: bool,
    copy: bool,
    evict: bool,
}

impl Default for StageFlags {
    fn default() -> Self {
        Self {
            scan: true,
            copy: true,
            evict: false,
        }
    }
}

impl StageFlags {
    pub fn scan(&self) -> bool {
        self.scan
    }

    pub fn copy(&self) -> bool {
        self.copy
    }

    pub fn evict(&self) -> bool {
        self.evict
    }

    pub fn set_scan(&mut self, on: bool) {
        self.scan = on;
        if !on {
            self.copy = false;
            self.evict = false;
        }
    }

    pub fn set_copy(&mut self, on: bool) {
        self.copy = on;
        if on {
            self.scan = true;
        } else {
            self.evict = false;
        }
    }

    pub fn set_evict(&mut self, on: bool) {
        self.evict = on;
        if on {
            self.copy = true;
            self.scan = true;
        }
    }
}

/// Final result of one task unit, reported through [`TaskEvent::Finished`]
/// and used by the orchestrator to decide whether the watermark moves.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum TaskOutcome {
    /// The scan stage is disabled; the unit did nothing.
    Skipped,
    /// Task configuration failed validation; the unit did nothing.
    Failed { reason: String },
    /// The stop signal fired during the scan.
    ScanCancelled,
    /// The scan finished but found nothing newer than the watermark.
    NoCandidates,
    /// Copy stage disabled; the scan result is the whole run.
    ScanOnly { found: usize },
    /// The stop signal fired during the copy/evict pass.
    SyncCancelled { found: usize, counts: SyncCounts },
    /// Every candidate was already up to date in the target.
    NothingCopied { found: usize },
    /// At least one file was copied; the watermark may advance.
    Completed { found: usize, counts: SyncCounts },
}

/// Progress and status messages sent from a running task unit to the
/// presentation layer. Delivery is ordered per task; there is no ordering
/// guarantee across tasks.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum TaskEvent {
    /// One tick per visited directory entry while scanning, and once per
    /// eviction retry; drives an indeterminate progress indicator.
    ScanPulse { label: String },
    /// 1-based position within the candidate list during copy/evict.
    CopyProgress {
        label: String,
        index: usize,
        total: usize,
    },
    /// Human-readable status line for the task row.
    Status { label: String, text: String },
    /// The unit finished; presentation re-enables the task's trigger.
    Finished { label: String, outcome: TaskOutcome },
}
