use std::io;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error};

/// Errors raised by the engine while performing a single merge.
#[derive(Debug, Error)]
pub enum MergeError {
    /// The engine abandoned the merge itself (e.g. its segments became obsolete).
    #[error("Merge aborted: {0}")]
    Aborted(String),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Merge failed: {0}")]
    Failed(String),

    #[error("Merge panicked: {0}")]
    Panicked(String),
}

impl MergeError {
    pub fn is_abort(&self) -> bool {
        matches!(self, MergeError::Aborted(_))
    }
}

/// Errors surfaced by the scheduler to the embedding engine.
#[derive(Debug, Clone, Error)]
pub enum SchedulerError {
    #[error("Merge failed on {context}: {source}")]
    MergeFailed {
        context: String,
        #[source]
        source: Arc<MergeError>,
    },

    #[error("Failed to launch merge unit: {0}")]
    Launch(String),

    #[error("Merge scheduler is closed")]
    Closed,

    #[error("Invalid scheduler configuration: {0}")]
    InvalidConfig(String),
}

impl SchedulerError {
    pub fn merge_failed(context: impl Into<String>, source: MergeError) -> Self {
        SchedulerError::MergeFailed {
            context: context.into(),
            source: Arc::new(source),
        }
    }

    pub fn log_error(&self) {
        match self {
            SchedulerError::MergeFailed { context, source } => {
                error!(target: "snel_merge::failure", %context, "Merge failed: {}", source);
                debug!(target: "snel_merge::failure", "Merge failure details: {:?}", source);
            }
            SchedulerError::Launch(e) => {
                error!(target: "snel_merge::scheduler", "Failed to launch merge unit: {}", e);
            }
            SchedulerError::Closed => {
                error!(target: "snel_merge::scheduler", "Merge scheduler is closed");
            }
            SchedulerError::InvalidConfig(e) => {
                error!(target: "snel_merge::scheduler", "Invalid scheduler configuration: {}", e);
            }
        }
    }
}
