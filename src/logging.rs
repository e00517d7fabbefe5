use tracing_subscriber::filter::{LevelFilter, Targets};
use tracing_subscriber::fmt;
use tracing_subscriber::prelude::*;

use crate::shared::config::LoggingConfig;
use tracing::info;

/// Root of every target this crate logs under (`snel_merge::scheduler`,
/// `snel_merge::unit`, `snel_merge::failure`, ...).
pub const CRATE_TARGET: &str = "snel_merge";

/// Crate targets at `level`; anything else (rayon, embedder crates) only from `warn`.
pub fn crate_filter(level: LevelFilter) -> Targets {
    Targets::new()
        .with_target(CRATE_TARGET, level)
        .with_default(level.min(LevelFilter::WARN))
}

pub fn init(cfg: &LoggingConfig) -> anyhow::Result<()> {
    let stdout_level = cfg.stdout_level.parse::<LevelFilter>()?;
    let file_level = cfg.file_level.parse::<LevelFilter>()?;

    let stdout_layer = fmt::layer()
        .with_ansi(true)
        .with_target(true)
        .with_filter(crate_filter(stdout_level));

    let file_appender = tracing_appender::rolling::daily(&cfg.log_dir, "snel_merge.log");
    let file_layer = fmt::layer()
        .with_ansi(false)
        .with_thread_names(true)
        .with_writer(file_appender)
        .with_filter(crate_filter(file_level));

    tracing_subscriber::registry()
        .with(stdout_layer)
        .with(file_layer)
        .try_init()?;

    info!(
        target: "snel_merge::logging",
        log_dir = %cfg.log_dir,
        %stdout_level,
        %file_level,
        "Logging initialized"
    );
    Ok(())
}

#[cfg(test)]
pub fn init_for_tests() {
    use std::sync::Once;
    use tracing_subscriber::EnvFilter;

    static INIT: Once = Once::new();

    INIT.call_once(|| {
        let filter = EnvFilter::from_default_env()
            .add_directive("snel_merge=debug".parse().unwrap())
            .add_directive("snel_merge::registry=info".parse().unwrap());

        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_thread_names(true)
            .with_test_writer()
            .try_init();
    });
}
