pub mod merge_request_factory;
pub mod sim_engine_factory;

pub use merge_request_factory::MergeRequestFactory;
pub use sim_engine_factory::SimEngineFactory;

#[cfg(test)]
mod sim_engine_factory_test;
