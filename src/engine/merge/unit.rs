use super::failure_policy::{FailureKind, FailurePolicy};
use super::source::MergeSource;
use super::types::{UnitSnapshot, UnitState};
use crate::engine::errors::{MergeError, SchedulerError};
use parking_lot::{Condvar, Mutex};
use rayon::ThreadPool;
use std::any::Any;
use std::cell::Cell;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

thread_local! {
    static IN_MERGE_UNIT: Cell<bool> = const { Cell::new(false) };
}

/// True when called from inside a merge unit's run loop.
pub fn on_merge_unit_thread() -> bool {
    IN_MERGE_UNIT.with(|flag| flag.get())
}

/// Cooperative cancellation flag shared between a unit and whoever cancels it.
///
/// Checked only between chained merges: raising it never interrupts an
/// in-flight `perform_merge`.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Notified once per unit, after it reached a terminal state.
pub(crate) trait UnitObserver: Send + Sync {
    fn unit_finished(&self, unit_id: u64, state: UnitState);
}

type UnitOutcome = Result<UnitState, SchedulerError>;

/// One background execution that performs a merge and then keeps chaining
/// further merges from the engine until none remain or it is cancelled.
pub struct MergeUnit<E: MergeSource> {
    id: u64,
    state: AtomicU8,
    current: Mutex<Option<Arc<E::Request>>>,
    cancel: CancellationToken,
    merges_performed: AtomicU64,
    result: Mutex<Option<UnitOutcome>>,
    done: Mutex<bool>,
    finished: Condvar,
    engine: Arc<E>,
    policy: Arc<FailurePolicy>,
    observer: Weak<dyn UnitObserver>,
    pool: Mutex<Option<Arc<ThreadPool>>>,
}

impl<E: MergeSource> MergeUnit<E> {
    pub(crate) fn new(
        id: u64,
        request: E::Request,
        engine: Arc<E>,
        policy: Arc<FailurePolicy>,
        observer: Weak<dyn UnitObserver>,
        pool: Arc<ThreadPool>,
    ) -> Self {
        Self {
            id,
            state: AtomicU8::new(UnitState::Created as u8),
            current: Mutex::new(Some(Arc::new(request))),
            cancel: CancellationToken::new(),
            merges_performed: AtomicU64::new(0),
            result: Mutex::new(None),
            done: Mutex::new(false),
            finished: Condvar::new(),
            engine,
            policy,
            observer,
            pool: Mutex::new(Some(pool)),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn state(&self) -> UnitState {
        UnitState::from_u8(self.state.load(Ordering::SeqCst))
    }

    pub fn is_terminal(&self) -> bool {
        self.state().is_terminal()
    }

    pub fn current_request(&self) -> Option<Arc<E::Request>> {
        self.current.lock().clone()
    }

    pub fn merges_performed(&self) -> u64 {
        self.merges_performed.load(Ordering::SeqCst)
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn snapshot(&self) -> UnitSnapshot<E::Request> {
        let current = self.current.lock();
        UnitSnapshot {
            id: self.id,
            state: self.state(),
            request: current.clone(),
        }
    }

    /// Hands the run loop to the background pool. Only the first call has any
    /// effect; later calls return `false`.
    pub fn start(self: &Arc<Self>) -> bool {
        if self
            .state
            .compare_exchange(
                UnitState::Created as u8,
                UnitState::Running as u8,
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .is_err()
        {
            return false;
        }

        let Some(pool) = self.pool.lock().take() else {
            return false;
        };

        let unit = Arc::clone(self);
        let worker_pool = Arc::clone(&pool);
        pool.spawn(move || {
            // Keeps a replaced pool alive until its last unit is done.
            let _pool = worker_pool;
            unit.run();
        });
        true
    }

    /// Asks the unit not to chain any further merge.
    pub fn request_cancel(&self) {
        if !self.cancel.is_cancelled() {
            debug!(target: "snel_merge::unit", unit_id = self.id, "Cancellation requested");
        }
        self.cancel.cancel();
    }

    /// Blocks until the unit is terminal and returns its terminal state, or
    /// the escalated failure if it faulted. Must not be called on a unit that
    /// was never started.
    pub fn wait(&self) -> UnitOutcome {
        let mut done = self.done.lock();
        while !*done {
            self.finished.wait(&mut done);
        }
        drop(done);
        self.terminal_outcome()
    }

    /// Like `wait`, returning `None` if the unit is still live after `timeout`.
    pub fn wait_for(&self, timeout: Duration) -> Option<UnitOutcome> {
        let deadline = Instant::now() + timeout;
        let mut done = self.done.lock();
        while !*done {
            if self.finished.wait_until(&mut done, deadline).timed_out() {
                break;
            }
        }
        let finished = *done;
        drop(done);
        finished.then(|| self.terminal_outcome())
    }

    /// Terminal result without blocking. Available as soon as the state is terminal.
    pub fn outcome(&self) -> Option<UnitOutcome> {
        self.result.lock().clone()
    }

    fn terminal_outcome(&self) -> UnitOutcome {
        self.result
            .lock()
            .clone()
            .unwrap_or_else(|| Ok(self.state()))
    }

    fn run(&self) {
        IN_MERGE_UNIT.with(|flag| flag.set(true));
        let started = Instant::now();
        debug!(target: "snel_merge::unit", unit_id = self.id, "Merge unit started");

        let outcome = self.run_chain();
        self.finish(outcome, started);

        IN_MERGE_UNIT.with(|flag| flag.set(false));
    }

    fn run_chain(&self) -> UnitOutcome {
        loop {
            let Some(request) = self.current_request() else {
                return Ok(UnitState::Completed);
            };

            debug!(
                target: "snel_merge::unit",
                unit_id = self.id,
                request = %self.engine.describe_request(&request),
                "Performing merge"
            );

            let result = panic::catch_unwind(AssertUnwindSafe(|| {
                self.engine.perform_merge(&request)
            }))
            .unwrap_or_else(|payload| Err(MergeError::Panicked(panic_message(&*payload))));
            self.merges_performed.fetch_add(1, Ordering::SeqCst);

            if let Err(err) = result {
                return match FailurePolicy::classify(&err) {
                    FailureKind::ExpectedAbort => {
                        debug!(
                            target: "snel_merge::unit",
                            unit_id = self.id,
                            reason = %err,
                            "Merge aborted by engine"
                        );
                        Ok(UnitState::Cancelled)
                    }
                    FailureKind::MergeFailure => self
                        .policy
                        .handle(err, &self.engine.storage_context())
                        .map(|()| UnitState::Faulted),
                };
            }

            if self.cancel.is_cancelled() {
                debug!(
                    target: "snel_merge::unit",
                    unit_id = self.id,
                    "Cancelled; not chaining further merges"
                );
                return Ok(UnitState::Completed);
            }

            match self.engine.next_merge() {
                Some(next) => *self.current.lock() = Some(Arc::new(next)),
                None => return Ok(UnitState::Completed),
            }
        }
    }

    fn finish(&self, outcome: UnitOutcome, started: Instant) {
        let state = match &outcome {
            Ok(state) => *state,
            Err(_) => UnitState::Faulted,
        };

        self.current.lock().take();
        *self.result.lock() = Some(outcome);
        self.state.store(state as u8, Ordering::SeqCst);

        match state {
            UnitState::Faulted => warn!(
                target: "snel_merge::unit",
                unit_id = self.id,
                merges = self.merges_performed(),
                elapsed_ms = started.elapsed().as_millis() as u64,
                "Merge unit faulted"
            ),
            _ => info!(
                target: "snel_merge::unit",
                unit_id = self.id,
                %state,
                merges = self.merges_performed(),
                elapsed_ms = started.elapsed().as_millis() as u64,
                "Merge unit finished"
            ),
        }

        if let Some(observer) = self.observer.upgrade() {
            observer.unit_finished(self.id, state);
        }

        // Waiters are released only after the observer saw the unit finish.
        let mut done = self.done.lock();
        *done = true;
        self.finished.notify_all();
    }
}

impl<E: MergeSource> std::fmt::Debug for MergeUnit<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MergeUnit")
            .field("id", &self.id)
            .field("state", &self.state())
            .field("merges_performed", &self.merges_performed())
            .field("cancelled", &self.cancel.is_cancelled())
            .finish()
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        msg.to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
