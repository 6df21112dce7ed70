//! Engine configuration.
//!
//! [`EngineConfig`] is a plain serde struct; every field has a default so a
//! partial JSON document (or none at all) yields a usable configuration.
//!
//! ```
//! use cadence_engine::config::EngineConfig;
//!
//! let config = EngineConfig::from_json_str(r#"{ "tick_rate": 30 }"#).unwrap();
//! assert_eq!(config.tick_rate, 30);
//! assert_eq!(config.draw_rate, 0);
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::EngineError;

/// Timing and logging settings for an [`Engine`](crate::engine::Engine).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    /// Logic steps per second. Must be positive.
    pub tick_rate: u32,
    /// Frames per second to cap rendering at; 0 leaves it uncapped.
    pub draw_rate: u32,
    /// Largest backlog of logic steps run back to back after a stall. Must
    /// be positive.
    pub max_catch_up: u32,
    /// `tracing-subscriber` filter directive used when `RUST_LOG` is unset.
    pub log_filter: String,
}

impl Default for EngineConfig {
    /// 60 steps per second, uncapped drawing, up to 5 catch-up steps.
    fn default() -> Self {
        Self {
            tick_rate: 60,
            draw_rate: 0,
            max_catch_up: 5,
            log_filter: "info".to_owned(),
        }
    }
}

impl EngineConfig {
    /// Parse and validate a JSON document.
    pub fn from_json_str(source: &str) -> Result<Self, EngineError> {
        let config: Self = serde_json::from_str(source)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate the JSON file at `path`.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, EngineError> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path).map_err(|source| EngineError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_json_str(&source)?;
        tracing::debug!(path = %path.display(), ?config, "engine config loaded");
        Ok(config)
    }

    /// Reject settings the frame governor cannot work with.
    pub fn validate(&self) -> Result<(), EngineError> {
        if self.tick_rate == 0 {
            return Err(EngineError::InvalidConfig {
                field: "tick_rate",
                reason: "must be at least 1".to_owned(),
            });
        }
        if self.max_catch_up == 0 {
            return Err(EngineError::InvalidConfig {
                field: "max_catch_up",
                reason: "must be at least 1".to_owned(),
            });
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
