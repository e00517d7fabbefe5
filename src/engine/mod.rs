pub mod errors;
pub mod merge;

pub use errors::*;
