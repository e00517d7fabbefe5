pub use super::factories::{MergeRequestFactory, SimEngineFactory};

pub struct Factory;

impl Factory {
    pub fn merge_request() -> MergeRequestFactory {
        MergeRequestFactory::new()
    }

    pub fn sim_engine() -> SimEngineFactory {
        SimEngineFactory::new()
    }
}
