//! Copy/evict pipeline: mirrors scan candidates into the target tree and
//! optionally evicts the fresh copies from local storage.

use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::sync_engine::evictor::{EvictError, EvictorConfig};
use crate::sync_engine::types::{Candidate, SyncCounts};

/// Side-channel notifications emitted while a pass runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineProgress {
    /// 1-based position within the candidate list.
    Copy { index: usize },
    /// One tick per eviction retry; the retry pass has no definite length
    /// the presentation layer could position a bar against.
    RetryPulse,
}

#[derive(Debug, Clone, Default)]
pub struct PipelineOptions {
    /// Evict each freshly copied file via the external tool.
    pub evict: bool,
    /// Log every action without touching the filesystem or the evictor.
    pub simulate: bool,
    pub evictor: EvictorConfig,
}

/// One task's copy/evict pass over a candidate list.
pub struct SyncPipeline {
    source: PathBuf,
    target: PathBuf,
    label: String,
    options: PipelineOptions,
}

impl SyncPipeline {
    pub fn new(source: PathBuf, target: PathBuf, label: String, options: PipelineOptions) -> Self {
        Self {
            source,
            target,
            label,
            options,
        }
    }

    /// Processes `candidates` in order, reporting a 1-based index through
    /// `progress` before each file and a pulse before each eviction retry.
    ///
    /// A file is copied iff it is missing from the target or the candidate
    /// mtime is strictly newer than the target's; the copy preserves
    /// content, permissions, and mtime. Eviction failures are collected and
    /// retried once in a batched second pass. Cancellation stops the pass
    /// and returns the counts accumulated so far; per-file errors are
    /// logged and skipped.
    pub async fn run(
        &self,
        candidates: &[Candidate],
        cancel: &CancellationToken,
        mut progress: impl FnMut(PipelineProgress),
    ) -> SyncCounts {
        let mut counts = SyncCounts::default();
        let mut evict_retry: Vec<PathBuf> = Vec::new();

        for (index, candidate) in candidates.iter().enumerate() {
            if cancel.is_cancelled() {
                info!(
                    task = %self.label,
                    copied = counts.copied,
                    evicted = counts.evicted,
                    "sync cancelled by user"
                );
                return counts;
            }
            progress(PipelineProgress::Copy { index: index + 1 });

            let rel_path = match candidate.path.strip_prefix(&self.source) {
                Ok(rel) => rel,
                Err(_) => {
                    error!(
                        task = %self.label,
                        path = %candidate.path.display(),
                        "candidate is outside the source directory"
                    );
                    continue;
                }
            };
            let target_path = self.target.join(rel_path);

            match self.copy_one(candidate, &target_path).await {
                Ok(true) => {
                    counts.copied += 1;
                    if self.options.evict {
                        match self.evict_first_attempt(&target_path).await {
                            Ok(()) => counts.evicted += 1,
                            Err(err) => {
                                error!(
                                    task = %self.label,
                                    path = %target_path.display(),
                                    "evict error (1st attempt): {err}"
                                );
                                evict_retry.push(target_path);
                            }
                        }
                    }
                }
                Ok(false) => {} // already up to date in the target
                Err(err) => {
                    error!(
                        task = %self.label,
                        path = %candidate.path.display(),
                        "error processing file: {err}"
                    );
                }
            }
        }

        // Batched retry for evictions that failed the first time; second
        // failures are abandoned for this run.
        for target_path in evict_retry {
            if cancel.is_cancelled() {
                break;
            }
            progress(PipelineProgress::RetryPulse);
            match self.evict_retry_attempt(&target_path).await {
                Ok(()) => counts.evicted += 1,
                Err(err) => {
                    error!(
                        task = %self.label,
                        path = %target_path.display(),
                        "evict retry error (2nd attempt): {err}"
                    );
                }
            }
        }

        info!(
            task = %self.label,
            copied = counts.copied,
            evicted = counts.evicted,
            "sync completed"
        );
        counts
    }

    /// Copies one candidate into place if needed. Returns `Ok(true)` on a
    /// fresh copy, `Ok(false)` when the target is already current.
    async fn copy_one(&self, candidate: &Candidate, target_path: &Path) -> anyhow::Result<bool> {
        if let Some(parent) = target_path.parent() {
            if self.options.simulate {
                info!(task = %self.label, "SIMULATED MKDIR for {}", parent.display());
            } else {
                fs::create_dir_all(parent).await?;
            }
        }

        let needs_copy = match fs::metadata(target_path).await {
            Ok(meta) => candidate.mtime > meta.modified()?,
            Err(_) => true,
        };
        if !needs_copy {
            return Ok(false);
        }

        if self.options.simulate {
            info!(
                task = %self.label,
                "SIMULATED COPY for {} to {}",
                candidate.path.display(),
                target_path.display()
            );
            return Ok(true);
        }

        fs::copy(&candidate.path, target_path).await?;
        let source_meta = fs::metadata(&candidate.path).await?;
        fs::set_permissions(target_path, source_meta.permissions()).await?;
        filetime::set_file_mtime(
            target_path,
            filetime::FileTime::from_system_time(source_meta.modified()?),
        )?;
        info!(
            task = %self.label,
            "copied {} to {}",
            candidate.path.display(),
            target_path.display()
        );
        Ok(true)
    }

    /// First eviction attempt, bracketed by the settle delays that let the
    /// provider's uploader observe the new file before and after.
    async fn evict_first_attempt(&self, target_path: &Path) -> Result<(), EvictError> {
        if self.options.simulate {
            info!(task = %self.label, "SIMULATED EVICT for {}", target_path.display());
            return Ok(());
        }
        sleep(self.options.evictor.settle_before).await;
        self.options.evictor.evict(target_path).await?;
        sleep(self.options.evictor.settle_after).await;
        info!(task = %self.label, "evicted {}", target_path.display());
        Ok(())
    }

    /// Second and final attempt, with the shorter settle delay.
    async fn evict_retry_attempt(&self, target_path: &Path) -> Result<(), EvictError> {
        if self.options.simulate {
            info!(
                task = %self.label,
                "SIMULATED EVICT retry (2nd attempt) for {}",
                target_path.display()
            );
            return Ok(());
        }
        self.options.evictor.evict(target_path).await?;
        sleep(self.options.evictor.retry_settle).await;
        info!(
            task = %self.label,
            "evicted on retry (2nd attempt) {}",
            target_path.display()
        );
        Ok(())
    }
}
