pub mod factories;
pub mod factory;
pub mod reentrant_engine;
pub mod sim_engine;
