use crate::engine::errors::{MergeError, SchedulerError};
use parking_lot::RwLock;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread;
use std::time::Duration;
use tracing::{debug, warn};

pub const DEFAULT_FAILURE_COOLDOWN: Duration = Duration::from_millis(250);

/// Receives escalated merge failures raised on background workers.
pub type BackgroundErrorHook = Arc<dyn Fn(&SchedulerError) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// The engine cancelled the merge; absorbed without escalation.
    ExpectedAbort,
    MergeFailure,
}

/// Decides what happens to a merge unit's terminal error.
pub struct FailurePolicy {
    cooldown: Duration,
    suppress: AtomicBool,
    hook: RwLock<Option<BackgroundErrorHook>>,
    handled: AtomicU64,
}

impl FailurePolicy {
    pub fn new(cooldown: Duration) -> Self {
        Self {
            cooldown,
            suppress: AtomicBool::new(false),
            hook: RwLock::new(None),
            handled: AtomicU64::new(0),
        }
    }

    pub fn classify(error: &MergeError) -> FailureKind {
        match error {
            MergeError::Aborted(_) => FailureKind::ExpectedAbort,
            MergeError::Io(_) | MergeError::Failed(_) | MergeError::Panicked(_) => {
                FailureKind::MergeFailure
            }
        }
    }

    /// Handles one faulted unit's error.
    ///
    /// Sleeps for the cooldown, then escalates. The failed merge is never
    /// retried here; the engine picks it up again on its next evaluation.
    pub fn handle(&self, error: MergeError, storage_context: &str) -> Result<(), SchedulerError> {
        self.handled.fetch_add(1, Ordering::SeqCst);

        if self.suppress.load(Ordering::SeqCst) {
            debug!(target: "snel_merge::failure", error = %error, "Merge failure suppressed");
            return Ok(());
        }

        warn!(
            target: "snel_merge::failure",
            error = %error,
            cooldown_ms = self.cooldown.as_millis() as u64,
            "Merge failed, cooling down before escalation"
        );
        if !self.cooldown.is_zero() {
            thread::sleep(self.cooldown);
        }

        let escalated = SchedulerError::merge_failed(storage_context, error);
        match self.hook.read().as_ref() {
            Some(hook) => hook(&escalated),
            None => escalated.log_error(),
        }
        Err(escalated)
    }

    /// Test-only switch: when set, failures are swallowed without cooldown.
    pub fn set_suppress_failures(&self, suppress: bool) {
        self.suppress.store(suppress, Ordering::SeqCst);
    }

    pub fn suppress_failures(&self) -> bool {
        self.suppress.load(Ordering::SeqCst)
    }

    pub fn set_background_error_hook(&self, hook: BackgroundErrorHook) {
        *self.hook.write() = Some(hook);
    }

    pub fn cooldown(&self) -> Duration {
        self.cooldown
    }

    /// Number of failures handed to this policy so far.
    pub fn handled_count(&self) -> u64 {
        self.handled.load(Ordering::SeqCst)
    }
}

impl Default for FailurePolicy {
    fn default() -> Self {
        Self::new(DEFAULT_FAILURE_COOLDOWN)
    }
}

impl fmt::Debug for FailurePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FailurePolicy")
            .field("cooldown", &self.cooldown)
            .field("suppress", &self.suppress_failures())
            .field("handled", &self.handled_count())
            .finish()
    }
}
