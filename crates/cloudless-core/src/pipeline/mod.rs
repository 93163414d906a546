pub mod config;
mod orchestrator;
mod types;

pub use orchestrator::{run_composite, run_composite_reported};
pub use types::{PipelineStage, ProgressReporter};
