pub mod config;
pub mod logging;
pub mod orchestrator;
pub mod sync_engine;

pub use config::{load_tasks, save_tasks, TaskConfig};
pub use orchestrator::Orchestrator;
pub use sync_engine::{
    EvictorConfig, IgnoreRule, StageFlags, SyncCounts, TaskEvent, TaskOutcome,
};
