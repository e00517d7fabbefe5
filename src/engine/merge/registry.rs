use super::source::MergeSource;
use super::types::{UnitSnapshot, UnitState};
use super::unit::MergeUnit;
use crate::engine::errors::SchedulerError;
use std::sync::Arc;
use tracing::{debug, error};

/// Failures held between two drains before older ones are only logged.
pub const MAX_RETAINED_FAILURES: usize = 64;

/// Live merge units in launch order.
///
/// Only ever touched under the scheduler's scheduling lock. Failures of
/// pruned units are kept until someone drains them, so a unit that finished
/// unobserved still surfaces its error at the next `sync`.
pub struct MergeRegistry<E: MergeSource> {
    units: Vec<Arc<MergeUnit<E>>>,
    failures: Vec<SchedulerError>,
    failure_capacity: usize,
    dropped_failures: u64,
}

impl<E: MergeSource> MergeRegistry<E> {
    pub fn new() -> Self {
        Self::with_failure_capacity(MAX_RETAINED_FAILURES)
    }

    pub fn with_failure_capacity(failure_capacity: usize) -> Self {
        Self {
            units: Vec::new(),
            failures: Vec::new(),
            failure_capacity,
            dropped_failures: 0,
        }
    }

    pub fn register(&mut self, unit: Arc<MergeUnit<E>>) {
        debug!(target: "snel_merge::registry", unit_id = unit.id(), live = self.units.len() + 1, "Registered merge unit");
        self.units.push(unit);
    }

    /// Drops terminal units, keeping their failures. Returns how many were removed.
    pub fn prune(&mut self) -> usize {
        let before = self.units.len();
        let mut failed = Vec::new();
        self.units.retain(|unit| {
            if !unit.is_terminal() {
                return true;
            }
            if let Some(Err(err)) = unit.outcome() {
                failed.push(err);
            }
            false
        });
        for err in failed {
            self.retain_failure(err);
        }
        let removed = before - self.units.len();
        if removed > 0 {
            debug!(target: "snel_merge::registry", removed, live = self.units.len(), "Pruned finished merge units");
        }
        removed
    }

    /// Units that are running and still hold a request.
    pub fn running_count(&self) -> usize {
        self.units
            .iter()
            .filter(|unit| unit.state() == UnitState::Running && unit.current_request().is_some())
            .count()
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    pub fn live_units(&self) -> Vec<Arc<MergeUnit<E>>> {
        self.units.clone()
    }

    pub fn snapshot(&self) -> Vec<UnitSnapshot<E::Request>> {
        self.units.iter().map(|unit| unit.snapshot()).collect()
    }

    pub fn cancel_all(&self) {
        for unit in &self.units {
            unit.request_cancel();
        }
    }

    /// Failures collected since the last call, oldest first.
    ///
    /// At most `failure_capacity` are kept between drains; once full, further
    /// failures are logged and counted in `dropped_failures` instead.
    pub fn take_failures(&mut self) -> Vec<SchedulerError> {
        std::mem::take(&mut self.failures)
    }

    pub fn dropped_failures(&self) -> u64 {
        self.dropped_failures
    }

    fn retain_failure(&mut self, err: SchedulerError) {
        if self.failures.len() < self.failure_capacity {
            self.failures.push(err);
            return;
        }
        self.dropped_failures += 1;
        error!(
            target: "snel_merge::registry",
            retained = self.failures.len(),
            dropped = self.dropped_failures,
            "Too many unreported merge failures; logging instead of retaining"
        );
        err.log_error();
    }
}

impl<E: MergeSource> Default for MergeRegistry<E> {
    fn default() -> Self {
        Self::new()
    }
}
