use super::auto_detect;
use super::failure_policy::{BackgroundErrorHook, FailurePolicy};
use super::registry::MergeRegistry;
use super::source::MergeSource;
use super::stall_gate::StallGate;
use super::types::{MergeTrigger, UnitSnapshot, UnitState};
use super::unit::{self, MergeUnit, UnitObserver};
use crate::engine::errors::SchedulerError;
use crate::shared::config::MergeSchedulerConfig;
use parking_lot::{Mutex, MutexGuard, RwLock};
use rayon::{ThreadPool, ThreadPoolBuilder};
use std::fmt;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Limits {
    max_merge_count: usize,
    max_thread_count: usize,
}

impl Limits {
    fn validate(max_merge_count: usize, max_thread_count: usize) -> Result<Self, SchedulerError> {
        if max_thread_count == 0 {
            return Err(SchedulerError::InvalidConfig(
                "max_thread_count must be at least 1".into(),
            ));
        }
        if max_thread_count > max_merge_count {
            return Err(SchedulerError::InvalidConfig(format!(
                "max_thread_count ({}) must not exceed max_merge_count ({})",
                max_thread_count, max_merge_count
            )));
        }
        Ok(Self {
            max_merge_count,
            max_thread_count,
        })
    }
}

struct SchedulerCore<E: MergeSource> {
    /// The scheduling lock. Held for every launch decision, including while stalled.
    registry: Mutex<MergeRegistry<E>>,
    stall_gate: StallGate,
    policy: Arc<FailurePolicy>,
    limits: RwLock<Limits>,
    pool: Mutex<Option<Arc<ThreadPool>>>,
    next_unit_id: AtomicU64,
    closed: AtomicBool,
}

impl<E: MergeSource> UnitObserver for SchedulerCore<E> {
    fn unit_finished(&self, unit_id: u64, state: UnitState) {
        // A producer stalled on the gate holds the lock; it prunes on wake-up.
        if let Some(mut registry) = self.registry.try_lock() {
            registry.prune();
        }
        self.stall_gate.set();
        debug!(target: "snel_merge::scheduler", unit_id, %state, "Released stall gate");
    }
}

impl<E: MergeSource> SchedulerCore<E> {
    fn limits(&self) -> Limits {
        *self.limits.read()
    }

    /// Blocks while the engine has pending merges and the registry is full.
    /// Returns `false` if the caller must not launch anything now.
    fn stall_while_backlogged(&self, registry: &mut MutexGuard<'_, MergeRegistry<E>>, engine: &E) -> bool {
        let mut stalled_since: Option<Instant> = None;
        loop {
            // Reset before counting so a completion racing the check still wakes us.
            self.stall_gate.reset();
            registry.prune();

            let running = registry.running_count();
            let max_merge_count = self.limits().max_merge_count;
            if running < max_merge_count || !engine.has_pending_merges() {
                if let Some(since) = stalled_since {
                    info!(
                        target: "snel_merge::scheduler",
                        stalled_ms = since.elapsed().as_millis() as u64,
                        running,
                        "Resuming after merge stall"
                    );
                }
                return true;
            }

            if unit::on_merge_unit_thread() {
                // Stalling a merge unit would only delay the completion we wait for.
                debug!(
                    target: "snel_merge::scheduler",
                    running,
                    max_merge_count,
                    "Backlogged on a merge unit thread; not launching"
                );
                return false;
            }

            if stalled_since.is_none() {
                info!(
                    target: "snel_merge::scheduler",
                    running,
                    max_merge_count,
                    "Too many merges; stalling"
                );
                stalled_since = Some(Instant::now());
            }
            self.stall_gate.wait();
        }
    }

    fn launch_pool(&self) -> Result<Arc<ThreadPool>, SchedulerError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(SchedulerError::Closed);
        }

        let mut pool = self.pool.lock();
        if let Some(existing) = pool.as_ref() {
            return Ok(Arc::clone(existing));
        }

        let threads = self.limits().max_thread_count;
        let built = ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|idx| format!("snel-merge-{idx}"))
            .build()
            .map_err(|e| SchedulerError::Launch(e.to_string()))?;
        info!(target: "snel_merge::scheduler", threads, "Built merge thread pool");

        let built = Arc::new(built);
        *pool = Some(Arc::clone(&built));
        Ok(built)
    }
}

/// Decides when merges run and how many at once.
///
/// Owned by the indexing engine. The engine calls
/// [`MergeScheduler::on_merges_may_be_needed`] whenever new merges might exist;
/// the scheduler pulls every pending merge, runs each on a background
/// [`MergeUnit`], and stalls the caller while `max_merge_count` units are
/// already running.
pub struct MergeScheduler<E: MergeSource> {
    core: Arc<SchedulerCore<E>>,
}

impl<E: MergeSource> MergeScheduler<E> {
    pub fn new(config: &MergeSchedulerConfig) -> Result<Self, SchedulerError> {
        let limits = if config.auto_detect {
            let detected = auto_detect::detect(config.index_dir.as_deref().map(Path::new));
            Limits::validate(detected.max_merge_count, detected.max_thread_count)?
        } else {
            Limits::validate(config.max_merge_count, config.max_thread_count)?
        };

        info!(
            target: "snel_merge::scheduler",
            max_merge_count = limits.max_merge_count,
            max_thread_count = limits.max_thread_count,
            failure_cooldown_ms = config.failure_cooldown_ms,
            "Merge scheduler created"
        );

        Ok(Self {
            core: Arc::new(SchedulerCore {
                registry: Mutex::new(MergeRegistry::new()),
                stall_gate: StallGate::new(),
                policy: Arc::new(FailurePolicy::new(Duration::from_millis(
                    config.failure_cooldown_ms,
                ))),
                limits: RwLock::new(limits),
                pool: Mutex::new(None),
                next_unit_id: AtomicU64::new(0),
                closed: AtomicBool::new(false),
            }),
        })
    }

    pub fn with_limits(max_merge_count: usize, max_thread_count: usize) -> Result<Self, SchedulerError> {
        Self::new(&MergeSchedulerConfig::with_limits(
            max_merge_count,
            max_thread_count,
        ))
    }

    /// Launches a merge unit for every merge the engine has pending.
    ///
    /// Never waits for the merges it launches, but blocks while the engine still
    /// has pending merges and `max_merge_count` units are running. When called
    /// from inside a merge unit it never blocks: it returns if the scheduling
    /// lock is taken or the registry is full.
    ///
    /// If a unit cannot be launched, its request is handed back through
    /// `merge_finish` and the error is returned.
    pub fn on_merges_may_be_needed(
        &self,
        engine: &Arc<E>,
        trigger: MergeTrigger,
        found_new_merges: bool,
    ) -> Result<(), SchedulerError> {
        let mut registry = if unit::on_merge_unit_thread() {
            // A producer may be stalled on the gate holding the lock; blocking
            // here would keep this unit from ever finishing.
            match self.core.registry.try_lock() {
                Some(registry) => registry,
                None => {
                    debug!(
                        target: "snel_merge::scheduler",
                        %trigger,
                        "Scheduling lock busy on a merge unit thread; leaving merges to the chain"
                    );
                    return Ok(());
                }
            }
        } else {
            self.core.registry.lock()
        };
        debug!(
            target: "snel_merge::scheduler",
            %trigger,
            found_new_merges,
            state = %engine.describe_state(),
            "Merges may be needed"
        );

        loop {
            if !self.core.stall_while_backlogged(&mut registry, engine) {
                return Ok(());
            }

            let Some(request) = engine.next_merge() else {
                debug!(target: "snel_merge::scheduler", %trigger, "No more merges pending");
                return Ok(());
            };

            let pool = match self.core.launch_pool() {
                Ok(pool) => pool,
                Err(err) => {
                    warn!(
                        target: "snel_merge::scheduler",
                        request = %engine.describe_request(&request),
                        error = %err,
                        "Could not launch merge unit; returning request to engine"
                    );
                    engine.merge_finish(request);
                    return Err(err);
                }
            };

            let unit_id = self.core.next_unit_id.fetch_add(1, Ordering::SeqCst) + 1;
            let observer = Arc::downgrade(&self.core);
            let observer: Weak<dyn UnitObserver> = observer;
            let unit = Arc::new(MergeUnit::new(
                unit_id,
                request,
                Arc::clone(engine),
                Arc::clone(&self.core.policy),
                observer,
                pool,
            ));

            registry.register(Arc::clone(&unit));
            unit.start();
            info!(
                target: "snel_merge::scheduler",
                unit_id,
                running = registry.running_count(),
                "Launched merge unit"
            );
        }
    }

    /// Waits until every live unit is terminal and returns the first failure
    /// observed since the last call. Other failures are logged.
    pub fn sync(&self) -> Result<(), SchedulerError> {
        let failures = loop {
            let units = {
                let mut registry = self.core.registry.lock();
                registry.prune();
                if registry.is_empty() {
                    break registry.take_failures();
                }
                registry.live_units()
            };

            for unit in units {
                debug!(target: "snel_merge::scheduler", unit_id = unit.id(), "Waiting for merge unit");
                let _ = unit.wait();
            }
        };

        let mut failures = failures.into_iter();
        match failures.next() {
            None => Ok(()),
            Some(first) => {
                for other in failures {
                    other.log_error();
                }
                Err(first)
            }
        }
    }

    /// Waits for all units, then releases the thread pool. Launches attempted
    /// afterwards fail with `SchedulerError::Closed`. Safe to call repeatedly.
    pub fn drain_and_close(&self) -> Result<(), SchedulerError> {
        let already_closed = self.core.closed.swap(true, Ordering::SeqCst);
        if !already_closed {
            info!(target: "snel_merge::scheduler", live = self.merge_unit_count(), "Draining merge scheduler");
        }

        let result = self.sync();
        self.core.pool.lock().take();

        if !already_closed {
            info!(target: "snel_merge::scheduler", failed = result.is_err(), "Merge scheduler closed");
        }
        result
    }

    pub fn is_closed(&self) -> bool {
        self.core.closed.load(Ordering::SeqCst)
    }

    /// Changes both concurrency bounds. A new thread count takes effect for
    /// units launched afterwards; running units keep their pool.
    pub fn set_max_merges_and_threads(
        &self,
        max_merge_count: usize,
        max_thread_count: usize,
    ) -> Result<(), SchedulerError> {
        let limits = Limits::validate(max_merge_count, max_thread_count)?;
        let previous = std::mem::replace(&mut *self.core.limits.write(), limits);

        if previous.max_thread_count != limits.max_thread_count {
            self.core.pool.lock().take();
        }
        info!(
            target: "snel_merge::scheduler",
            max_merge_count,
            max_thread_count,
            "Merge limits changed"
        );
        // Stalled producers re-check against the new bound.
        self.core.stall_gate.set();
        Ok(())
    }

    pub fn max_merge_count(&self) -> usize {
        self.core.limits().max_merge_count
    }

    pub fn max_thread_count(&self) -> usize {
        self.core.limits().max_thread_count
    }

    pub fn failure_policy(&self) -> &FailurePolicy {
        &self.core.policy
    }

    /// Test-only: swallow merge failures instead of escalating them.
    pub fn set_suppress_failures(&self, suppress: bool) {
        self.core.policy.set_suppress_failures(suppress);
    }

    pub fn set_background_error_hook(&self, hook: BackgroundErrorHook) {
        self.core.policy.set_background_error_hook(hook);
    }

    /// Live units, including finished ones not yet pruned.
    pub fn merge_unit_count(&self) -> usize {
        let mut registry = self.core.registry.lock();
        registry.prune();
        registry.len()
    }

    pub fn running_merge_count(&self) -> usize {
        self.core.registry.lock().running_count()
    }

    pub fn snapshot(&self) -> Vec<UnitSnapshot<E::Request>> {
        self.core.registry.lock().snapshot()
    }

    /// Stops every live unit from chaining further merges. In-flight merges
    /// run to completion.
    pub fn cancel_all(&self) {
        let registry = self.core.registry.lock();
        info!(target: "snel_merge::scheduler", live = registry.len(), "Cancelling all merge units");
        registry.cancel_all();
    }
}

impl<E: MergeSource> fmt::Display for MergeScheduler<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let limits = self.core.limits();
        write!(
            f,
            "MergeScheduler: max_merge_count={}, max_thread_count={}, failure_cooldown_ms={}",
            limits.max_merge_count,
            limits.max_thread_count,
            self.core.policy.cooldown().as_millis()
        )
    }
}

impl<E: MergeSource> Drop for MergeScheduler<E> {
    fn drop(&mut self) {
        if self.is_closed() {
            return;
        }
        if unit::on_merge_unit_thread() || rayon::current_thread_index().is_some() {
            // Live units may be queued behind this very worker; waiting would hang.
            self.core.closed.store(true, Ordering::SeqCst);
            self.core.pool.lock().take();
            warn!(
                target: "snel_merge::scheduler",
                live = self.core.registry.try_lock().map(|r| r.len()),
                "Merge scheduler dropped on a merge thread; closed without draining"
            );
            return;
        }
        if let Err(err) = self.drain_and_close() {
            err.log_error();
        }
    }
}
