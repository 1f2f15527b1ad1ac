//! Run orchestration
//!
//! A run walks a fixed sequence of states:
//!
//! ```text
//! Configuring -> JobResolving -> JobPolling -> Downloading
//!             -> Finalizing -> CheckpointCommitting -> Done
//! ```
//!
//! Any error moves the run to `Failed`, which is absorbing.

pub mod coordinator;
pub mod records;
pub mod summary;

use std::fmt;

pub use coordinator::{ConfigPipelineFactory, FetchCoordinator, PipelineFactory, RunSettings};
pub use records::{ndjson_records, RecordLimits};
pub use summary::RunSummary;

/// Orchestrator state
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum RunState {
    /// Validating configuration and building the output pipeline
    #[default]
    Configuring,
    /// Starting or attaching to the export job
    JobResolving,
    /// Waiting for the job to complete
    JobPolling,
    /// Streaming result files through the pipeline
    Downloading,
    /// Committing every sink
    Finalizing,
    /// Persisting the new transaction time
    CheckpointCommitting,
    /// Finished successfully
    Done,
    /// Stopped with an error
    Failed(String),
}

impl RunState {
    /// Whether the run can make no further progress
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Failed(_))
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Configuring => write!(f, "configuring"),
            Self::JobResolving => write!(f, "job_resolving"),
            Self::JobPolling => write!(f, "job_polling"),
            Self::Downloading => write!(f, "downloading"),
            Self::Finalizing => write!(f, "finalizing"),
            Self::CheckpointCommitting => write!(f, "checkpoint_committing"),
            Self::Done => write!(f, "done"),
            Self::Failed(reason) => write!(f, "failed: {reason}"),
        }
    }
}
