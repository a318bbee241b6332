//! Task orchestrator: spawns one unit of execution per sync task, sequences
//! the enabled stages, and reports progress back over an event channel.
//!
//! Units are independent and never wait on each other; the only shared
//! state is the process-wide stop token (read by every unit) and the stage
//! flags (read once at unit start). Watermarks are applied here, after a
//! unit joins, so each task's config has exactly one writer at a time.

use anyhow::{Context, Result};
use chrono::Local;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::config::TaskConfig;
use crate::sync_engine::evictor::EvictorConfig;
use crate::sync_engine::pipeline::{PipelineOptions, PipelineProgress, SyncPipeline};
use crate::sync_engine::scanner;
use crate::sync_engine::types::{ScanOutcome, StageFlags, TaskEvent, TaskOutcome};

pub struct Orchestrator {
    tasks: Vec<TaskConfig>,
    flags: StageFlags,
    evictor: EvictorConfig,
    simulate: bool,
    events: mpsc::UnboundedSender<TaskEvent>,
    cancel: CancellationToken,
}

impl Orchestrator {
    /// Creates the orchestrator and the event stream the presentation layer
    /// consumes. Per-task event order is preserved; there is no ordering
    /// across tasks.
    pub fn new(
        tasks: Vec<TaskConfig>,
        flags: StageFlags,
        evictor: EvictorConfig,
        simulate: bool,
    ) -> (Self, mpsc::UnboundedReceiver<TaskEvent>) {
        let (events, receiver) = mpsc::unbounded_channel();
        (
            Self {
                tasks,
                flags,
                evictor,
                simulate,
                events,
                cancel: CancellationToken::new(),
            },
            receiver,
        )
    }

    pub fn tasks(&self) -> &[TaskConfig] {
        &self.tasks
    }

    /// Clone of the process-wide stop token, for wiring to Ctrl-C or a stop
    /// button. Invalidated by [`Orchestrator::reset_stop`].
    pub fn stop_handle(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Requests cooperative cancellation of every running unit. Units poll
    /// the token per directory entry and per candidate, so allow a short
    /// grace period before assuming they have all observed it.
    pub fn request_stop(&self) {
        self.cancel.cancel();
    }

    /// Replaces a fired stop token so further runs start uncancelled.
    pub fn reset_stop(&mut self) {
        if self.cancel.is_cancelled() {
            self.cancel = CancellationToken::new();
        }
    }

    /// Runs a single task to completion and applies its watermark update.
    pub async fn run_one(&mut self, label: &str) -> Result<TaskOutcome> {
        let mut results = self.run_labels(&[label.to_string()]).await?;
        Ok(results.pop().expect("one result per label").1)
    }

    /// Runs every configured task concurrently.
    pub async fn run_all(&mut self) -> Result<Vec<(String, TaskOutcome)>> {
        let labels: Vec<String> = self.tasks.iter().map(|t| t.label.clone()).collect();
        self.run_labels(&labels).await
    }

    /// Spawns one unit per requested label (all near-simultaneously), waits
    /// for them to finish, and applies watermark updates. A failing task
    /// never aborts its siblings; completion order between tasks is
    /// unspecified.
    pub async fn run_labels(&mut self, labels: &[String]) -> Result<Vec<(String, TaskOutcome)>> {
        let mut handles = Vec::with_capacity(labels.len());
        for label in labels {
            let task = self
                .tasks
                .iter()
                .find(|t| &t.label == label)
                .cloned()
                .with_context(|| format!("unknown task label: {label}"))?;
            let unit = run_unit(
                task,
                self.flags,
                self.evictor.clone(),
                self.simulate,
                self.cancel.clone(),
                self.events.clone(),
            );
            handles.push((label.clone(), tokio::spawn(unit)));
        }

        let mut results = Vec::with_capacity(handles.len());
        for (label, handle) in handles {
            let outcome = handle
                .await
                .with_context(|| format!("task unit panicked: {label}"))?;
            self.apply_outcome(&label, &outcome);
            results.push((label, outcome));
        }
        Ok(results)
    }

    /// Consumes the orchestrator, closing the event channel, and hands the
    /// task list (updated watermarks included) back for persisting.
    pub fn shutdown(self) -> Vec<TaskConfig> {
        self.tasks
    }

    /// The watermark moves only when at least one file was copied and the
    /// run was not cancelled, and it never moves backward.
    fn apply_outcome(&mut self, label: &str, outcome: &TaskOutcome) {
        if let TaskOutcome::Completed { counts, .. } = outcome {
            debug_assert!(counts.copied >= 1);
            if let Some(task) = self.tasks.iter_mut().find(|t| t.label == label) {
                let now = Local::now().naive_local();
                task.mark_synced(now);
                info!(
                    task = label,
                    synced = %now.format(crate::config::SYNCED_FORMAT),
                    "watermark advanced"
                );
            }
        }
    }
}

/// One task's unit of execution: Scan -> Copy/Evict per the enabled stages.
async fn run_unit(
    task: TaskConfig,
    flags: StageFlags,
    evictor: EvictorConfig,
    simulate: bool,
    cancel: CancellationToken,
    events: mpsc::UnboundedSender<TaskEvent>,
) -> TaskOutcome {
    let label = task.label.clone();
    let status = |text: String| {
        let _ = events.send(TaskEvent::Status {
            label: label.clone(),
            text,
        });
    };

    let outcome = if !flags.scan() {
        TaskOutcome::Skipped
    } else if let Err(err) = task.validate() {
        error!(task = %label, "invalid task configuration: {err:#}");
        status(format!("Configuration error: {err}"));
        TaskOutcome::Failed {
            reason: err.to_string(),
        }
    } else {
        status("Scanning...".to_string());
        let pulse_events = events.clone();
        let pulse_label = label.clone();
        let scanned = scanner::scan(
            &task.source,
            task.watermark(),
            &task.ignore,
            &label,
            &cancel,
            move || {
                let _ = pulse_events.send(TaskEvent::ScanPulse {
                    label: pulse_label.clone(),
                });
            },
        );

        match scanned {
            ScanOutcome::Cancelled => {
                status("Scan cancelled.".to_string());
                TaskOutcome::ScanCancelled
            }
            ScanOutcome::Complete(candidates) if candidates.is_empty() => {
                status("No files to sync.".to_string());
                TaskOutcome::NoCandidates
            }
            ScanOutcome::Complete(candidates) => {
                let found = candidates.len();
                if !flags.copy() {
                    status(format!("Scan completed ({found} files)."));
                    TaskOutcome::ScanOnly { found }
                } else {
                    if flags.evict() {
                        status(format!("Copying and evicting ({found} files)..."));
                    } else {
                        status(format!("Copying ({found} files)..."));
                    }

                    let pipeline = SyncPipeline::new(
                        task.source.clone(),
                        task.target.clone(),
                        label.clone(),
                        PipelineOptions {
                            evict: flags.evict(),
                            simulate,
                            evictor,
                        },
                    );
                    let progress_events = events.clone();
                    let progress_label = label.clone();
                    let counts = pipeline
                        .run(&candidates, &cancel, move |p| {
                            let event = match p {
                                PipelineProgress::Copy { index } => TaskEvent::CopyProgress {
                                    label: progress_label.clone(),
                                    index,
                                    total: found,
                                },
                                // The retry pass drives the same
                                // indeterminate indicator the scan uses.
                                PipelineProgress::RetryPulse => TaskEvent::ScanPulse {
                                    label: progress_label.clone(),
                                },
                            };
                            let _ = progress_events.send(event);
                        })
                        .await;

                    if cancel.is_cancelled() {
                        status("Sync cancelled.".to_string());
                        TaskOutcome::SyncCancelled { found, counts }
                    } else if counts.copied == 0 {
                        status(
                            "No files were copied; everything is already up to date in the cloud."
                                .to_string(),
                        );
                        TaskOutcome::NothingCopied { found }
                    } else {
                        status(format!(
                            "Scan and sync completed. Copied {}/{found}, evicted {}/{found}.",
                            counts.copied, counts.evicted
                        ));
                        TaskOutcome::Completed { found, counts }
                    }
                }
            }
        }
    };

    let _ = events.send(TaskEvent::Finished {
        label,
        outcome: outcome.clone(),
    });
    outcome
}
