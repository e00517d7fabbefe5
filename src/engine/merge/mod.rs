//! Background merge scheduling.
//!
//! The indexing engine hands merges out through [`MergeSource`]; the
//! [`MergeScheduler`] runs each on a [`MergeUnit`] in a bounded thread pool and
//! throttles producers through the [`StallGate`] when merging falls behind.

pub mod auto_detect;
pub mod failure_policy;
pub mod registry;
pub mod scheduler;
pub mod source;
pub mod stall_gate;
pub mod types;
pub mod unit;

pub use failure_policy::{BackgroundErrorHook, FailureKind, FailurePolicy};
pub use registry::MergeRegistry;
pub use scheduler::MergeScheduler;
pub use source::MergeSource;
pub use stall_gate::StallGate;
pub use types::{MergeTrigger, UnitSnapshot, UnitState};
pub use unit::{CancellationToken, MergeUnit};
