pub mod controller;
pub mod state;

pub use controller::{CycleReport, PipelineParts, TelemetryPipeline};
pub use state::{PipelineStatus, StartupLatch, StartupRun};
