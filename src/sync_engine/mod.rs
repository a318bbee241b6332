pub mod evictor;
pub mod filter;
pub mod pipeline;
pub mod scanner;
pub mod types;

pub use evictor::{EvictError, EvictorConfig};
pub use filter::{should_ignore, IgnoreRule};
pub use pipeline::{PipelineOptions, PipelineProgress, SyncPipeline};
pub use scanner::scan;
pub use types::{Candidate, ScanOutcome, StageFlags, SyncCounts, TaskEvent, TaskOutcome};
