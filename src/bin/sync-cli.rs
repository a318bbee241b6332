use clap::Parser;
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;
use tracing::info;

use cloudsweep_lib::{
    config, logging, EvictorConfig, Orchestrator, StageFlags, TaskEvent, TaskOutcome,
};

#[derive(Parser)]
#[command(name = "sync-cli")]
#[command(about = "Sync local directories into cloud folders and evict the copies", long_about = None)]
struct Cli {
    /// Tasks configuration file
    #[arg(short, long, default_value = "config.yaml")]
    config: PathBuf,

    /// Run only the named task(s); default runs every configured task
    #[arg(short, long)]
    task: Vec<String>,

    /// Scan only, skip the copy stage
    #[arg(long)]
    no_copy: bool,

    /// Evict copied files from local storage after the copy
    #[arg(short, long, conflicts_with = "no_copy")]
    evict: bool,

    /// Log every action without touching the filesystem or the evictor
    #[arg(long)]
    simulate: bool,

    /// Path to the external evictor executable
    #[arg(long, default_value = "./cloudfile")]
    evictor: PathBuf,

    /// Evictor invocation timeout, in seconds
    #[arg(long, default_value_t = 5)]
    evict_timeout_secs: u64,

    /// Settle delay around each eviction, in seconds
    #[arg(long, default_value_t = 3)]
    settle_secs: u64,

    /// Directory for the per-run log file
    #[arg(long, default_value = ".")]
    log_dir: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let log_path = logging::init(&cli.log_dir)?;
    info!("sync application started");

    let tasks = config::load_tasks(&cli.config);
    if tasks.is_empty() {
        println!("No sync tasks configured in {:?}", cli.config);
        return Ok(());
    }
    println!("Found {} sync tasks to run (log: {:?})", tasks.len(), log_path);

    let mut flags = StageFlags::default();
    flags.set_copy(!cli.no_copy);
    flags.set_evict(cli.evict);

    let evictor = EvictorConfig {
        command: cli.evictor,
        timeout: Duration::from_secs(cli.evict_timeout_secs),
        settle_before: Duration::from_secs(cli.settle_secs),
        settle_after: Duration::from_secs(cli.settle_secs),
        ..EvictorConfig::default()
    };

    let (mut orchestrator, mut events) =
        Orchestrator::new(tasks, flags, evictor, cli.simulate);

    // Ctrl-C fires the process-wide stop token; units unwind cooperatively.
    let stop = orchestrator.stop_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("Stop requested, letting running tasks unwind...");
            stop.cancel();
        }
    });

    // One progress row per task, driven by the orchestrator's event stream.
    let multi = MultiProgress::new();
    let style = ProgressStyle::default_bar()
        .template("{prefix:>12} {spinner:.green} [{bar:30.cyan/blue}] {pos}/{len} {msg}")?
        .progress_chars("#>-");
    let mut bars: HashMap<String, ProgressBar> = HashMap::new();
    for task in orchestrator.tasks() {
        let bar = multi.add(ProgressBar::new(0));
        bar.set_style(style.clone());
        bar.set_prefix(task.label.clone());
        bar.set_message("Ready");
        bars.insert(task.label.clone(), bar);
    }

    let render = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            match event {
                TaskEvent::ScanPulse { label } => {
                    if let Some(bar) = bars.get(&label) {
                        bar.tick();
                    }
                }
                TaskEvent::CopyProgress { label, index, total } => {
                    if let Some(bar) = bars.get(&label) {
                        bar.set_length(total as u64);
                        bar.set_position(index as u64);
                    }
                }
                TaskEvent::Status { label, text } => {
                    if let Some(bar) = bars.get(&label) {
                        bar.set_message(text);
                    }
                }
                TaskEvent::Finished { label, .. } => {
                    if let Some(bar) = bars.get(&label) {
                        bar.finish();
                    }
                }
            }
        }
    });

    let results = if cli.task.is_empty() {
        orchestrator.run_all().await?
    } else {
        orchestrator.run_labels(&cli.task).await?
    };

    let tasks = orchestrator.shutdown();
    render.await.ok();

    println!();
    println!("Results:");
    for (label, outcome) in &results {
        println!("   {label}: {}", outcome_line(outcome));
    }

    // The only fatal error after a run: losing watermarks is worse than a
    // noisy exit.
    config::save_tasks(&cli.config, &tasks)?;
    info!("sync application closed");
    Ok(())
}

fn outcome_line(outcome: &TaskOutcome) -> String {
    match outcome {
        TaskOutcome::Skipped => "skipped (scan stage disabled)".to_string(),
        TaskOutcome::Failed { reason } => format!("configuration error: {reason}"),
        TaskOutcome::ScanCancelled => "scan cancelled".to_string(),
        TaskOutcome::NoCandidates => "no files to sync".to_string(),
        TaskOutcome::ScanOnly { found } => format!("scan only: {found} files found"),
        TaskOutcome::SyncCancelled { found, counts } => format!(
            "cancelled: copied {}/{found}, evicted {}",
            counts.copied, counts.evicted
        ),
        TaskOutcome::NothingCopied { found } => {
            format!("{found} candidates, all already up to date in the cloud")
        }
        TaskOutcome::Completed { found, counts } => format!(
            "copied {}/{found}, evicted {}/{found}",
            counts.copied, counts.evicted
        ),
    }
}
