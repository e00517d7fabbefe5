use serde::Deserialize;
use std::env;
use std::path::Path;

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub merge: MergeSchedulerConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MergeSchedulerConfig {
    /// Registered merges allowed before producers stall
    #[serde(default = "default_max_merge_count")]
    pub max_merge_count: usize,
    /// Merges allowed to run at once (size of the merge thread pool)
    #[serde(default = "default_max_thread_count")]
    pub max_thread_count: usize,
    /// Pause after a failed merge before the failure is escalated
    #[serde(default = "default_failure_cooldown_ms")]
    pub failure_cooldown_ms: u64,
    /// Replace both counts with values derived from CPUs and the index disk
    #[serde(default)]
    pub auto_detect: bool,
    /// Used by auto detection to find the disk holding the index
    pub index_dir: Option<String>,
}

fn default_max_merge_count() -> usize {
    6
}

fn default_max_thread_count() -> usize {
    1
}

fn default_failure_cooldown_ms() -> u64 {
    250
}

impl Default for MergeSchedulerConfig {
    fn default() -> Self {
        Self {
            max_merge_count: default_max_merge_count(),
            max_thread_count: default_max_thread_count(),
            failure_cooldown_ms: default_failure_cooldown_ms(),
            auto_detect: false,
            index_dir: None,
        }
    }
}

impl MergeSchedulerConfig {
    pub fn with_limits(max_merge_count: usize, max_thread_count: usize) -> Self {
        Self {
            max_merge_count,
            max_thread_count,
            ..Self::default()
        }
    }

    pub fn with_failure_cooldown_ms(mut self, failure_cooldown_ms: u64) -> Self {
        self.failure_cooldown_ms = failure_cooldown_ms;
        self
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    pub log_dir: String,
    pub stdout_level: String,
    pub file_level: String,
}

pub fn load_settings() -> Result<Settings, config::ConfigError> {
    let config_path = env::var("SNEL_MERGE_CONFIG").unwrap_or_else(|_| "config".to_string());

    let settings: Settings = config::Config::builder()
        .add_source(config::File::with_name(&config_path))
        .build()?
        .try_deserialize()?;

    Ok(settings)
}

pub fn load_settings_from(path: &Path) -> Result<Settings, config::ConfigError> {
    let settings: Settings = config::Config::builder()
        .add_source(config::File::from(path))
        .build()?
        .try_deserialize()?;

    Ok(settings)
}
