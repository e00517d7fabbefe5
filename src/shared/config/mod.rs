pub mod model;

pub use model::{LoggingConfig, MergeSchedulerConfig, Settings, load_settings, load_settings_from};
