use crate::engine::errors::MergeError;
use std::fmt::Debug;

/// The indexing engine as seen by the merge scheduler.
///
/// The scheduler never inspects a request; it only moves it between these
/// calls. Every request returned by `next_merge` is passed to exactly one of
/// `perform_merge` or `merge_finish`.
///
/// Implementations must tolerate concurrent calls from the scheduling thread
/// and from any number of merge units.
pub trait MergeSource: Send + Sync + 'static {
    type Request: Send + Sync + Debug + 'static;

    /// Hands out the next pending merge. Never returns the same live request twice.
    fn next_merge(&self) -> Option<Self::Request>;

    fn has_pending_merges(&self) -> bool;

    /// Executes and commits one merge. May run for a long time.
    ///
    /// Return `MergeError::Aborted` when the engine itself gave up on the merge;
    /// any other error is treated as a genuine failure.
    fn perform_merge(&self, request: &Self::Request) -> Result<(), MergeError>;

    /// Releases a request the scheduler will not run.
    fn merge_finish(&self, request: Self::Request);

    fn describe_state(&self) -> String;

    /// Storage description attached to escalated merge failures.
    fn storage_context(&self) -> String {
        self.describe_state()
    }

    fn describe_request(&self, request: &Self::Request) -> String {
        format!("{:?}", request)
    }
}
