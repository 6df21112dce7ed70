//! Process-wide `tracing` subscriber setup.

use std::sync::Once;

use tracing_subscriber::EnvFilter;

use crate::config::EngineConfig;

/// Subscriber settings.
///
/// `env_filter` uses the `tracing-subscriber` directive syntax (e.g.
/// `"info"`, `"cadence_ecs=debug,cadence_engine=info"`). `RUST_LOG`, when
/// set, takes precedence.
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub env_filter: String,
    pub ansi: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            env_filter: "info".to_owned(),
            ansi: true,
        }
    }
}

impl From<&EngineConfig> for LoggingConfig {
    fn from(config: &EngineConfig) -> Self {
        Self {
            env_filter: config.log_filter.clone(),
            ..Default::default()
        }
    }
}

static INIT: Once = Once::new();

/// Install the global subscriber once.
///
/// Idempotent; later calls are ignored. If another subscriber was already
/// installed by the host, that one is kept.
pub fn init_logging(config: LoggingConfig) {
    INIT.call_once(|| {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(&config.env_filter));

        let installed = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_ansi(config.ansi)
            .with_target(true)
            .try_init()
            .is_ok();

        tracing::debug!(installed, "logging initialized");
    });
}
