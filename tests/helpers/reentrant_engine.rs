use crate::engine::errors::{MergeError, SchedulerError};
use crate::engine::merge::{MergeScheduler, MergeSource, MergeTrigger};
use crate::test_helpers::sim_engine::{SimRequest, SimulatedEngine};
use parking_lot::Mutex;
use std::sync::{Arc, Weak};

/// What the engine saw when a merge unit called back into the scheduler.
#[derive(Debug, Clone)]
pub struct Reentry {
    pub result: Result<(), SchedulerError>,
    pub handed_out_after: usize,
}

/// Engine that calls `on_merges_may_be_needed` from inside `perform_merge`,
/// the way an index re-evaluates its merge policy after committing a merge.
///
/// Wraps a [`SimulatedEngine`] for queueing and bookkeeping. It can also hold
/// the last strong handle to its scheduler and drop it from inside a merge.
pub struct ReentrantEngine {
    sim: Arc<SimulatedEngine>,
    this: Weak<ReentrantEngine>,
    scheduler: Mutex<Weak<MergeScheduler<ReentrantEngine>>>,
    owned_scheduler: Mutex<Option<Arc<MergeScheduler<ReentrantEngine>>>>,
    backlog: Mutex<Vec<SimRequest>>,
    reentries: Mutex<Vec<Reentry>>,
}

impl ReentrantEngine {
    pub fn new(sim: Arc<SimulatedEngine>) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            sim,
            this: this.clone(),
            scheduler: Mutex::new(Weak::new()),
            owned_scheduler: Mutex::new(None),
            backlog: Mutex::new(Vec::new()),
            reentries: Mutex::new(Vec::new()),
        })
    }

    pub fn sim(&self) -> &SimulatedEngine {
        &self.sim
    }

    /// Every merge calls back into `scheduler` once it is done.
    pub fn attach(&self, scheduler: &Arc<MergeScheduler<ReentrantEngine>>) {
        *self.scheduler.lock() = Arc::downgrade(scheduler);
    }

    /// Queued into the engine by the first merge, right before it calls back.
    pub fn with_backlog(&self, requests: Vec<SimRequest>) {
        *self.backlog.lock() = requests;
    }

    /// Hands the engine the last strong handle; the next merge drops it.
    pub fn own_scheduler(&self, scheduler: Arc<MergeScheduler<ReentrantEngine>>) {
        *self.owned_scheduler.lock() = Some(scheduler);
    }

    pub fn owns_scheduler(&self) -> bool {
        self.owned_scheduler.lock().is_some()
    }

    pub fn reentries(&self) -> Vec<Reentry> {
        self.reentries.lock().clone()
    }
}

impl MergeSource for ReentrantEngine {
    type Request = SimRequest;

    fn next_merge(&self) -> Option<SimRequest> {
        self.sim.next_merge()
    }

    fn has_pending_merges(&self) -> bool {
        self.sim.has_pending_merges()
    }

    fn perform_merge(&self, request: &SimRequest) -> Result<(), MergeError> {
        self.sim.perform_merge(request)?;

        drop(self.owned_scheduler.lock().take());

        for queued in std::mem::take(&mut *self.backlog.lock()) {
            self.sim.push(queued);
        }

        let scheduler = self.scheduler.lock().upgrade();
        if let (Some(scheduler), Some(this)) = (scheduler, self.this.upgrade()) {
            let result = scheduler.on_merges_may_be_needed(&this, MergeTrigger::MergeFinished, true);
            self.reentries.lock().push(Reentry {
                result,
                handed_out_after: self.sim.handed_out().len(),
            });
        }
        Ok(())
    }

    fn merge_finish(&self, request: SimRequest) {
        self.sim.merge_finish(request)
    }

    fn describe_state(&self) -> String {
        self.sim.describe_state()
    }

    fn storage_context(&self) -> String {
        self.sim.storage_context()
    }
}
