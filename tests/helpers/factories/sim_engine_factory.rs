use super::merge_request_factory::MergeRequestFactory;
use crate::test_helpers::sim_engine::{MergeBehavior, SimulatedEngine};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// Factory to build a simulated engine preloaded with pending merges
pub struct SimEngineFactory {
    requests: usize,
    merge_duration: Duration,
    behaviors: HashMap<u64, MergeBehavior>,
    held: bool,
}

impl SimEngineFactory {
    pub fn new() -> Self {
        Self {
            requests: 0,
            merge_duration: Duration::ZERO,
            behaviors: HashMap::new(),
            held: false,
        }
    }

    /// Queues requests with ids `1..=count`
    pub fn with_requests(mut self, count: usize) -> Self {
        self.requests = count;
        self
    }

    pub fn with_merge_duration(mut self, duration: Duration) -> Self {
        self.merge_duration = duration;
        self
    }

    pub fn with_behavior(mut self, request_id: u64, behavior: MergeBehavior) -> Self {
        self.behaviors.insert(request_id, behavior);
        self
    }

    /// Every merge blocks inside `perform_merge` until `release` is called
    pub fn holding(mut self) -> Self {
        self.held = true;
        self
    }

    pub fn create(self) -> Arc<SimulatedEngine> {
        let requests = (1..=self.requests as u64)
            .map(|id| MergeRequestFactory::new().with_id(id).create())
            .collect();
        Arc::new(SimulatedEngine::new(
            requests,
            self.behaviors,
            self.merge_duration,
            self.held,
        ))
    }
}
