//! Cadence Engine -- state-stack scheduler and fixed-step frame loop.
//!
//! This crate builds on [`cadence_ecs`] to provide the application driver: a
//! stack of named states, each taken through `Init -> Loop -> Free`, and a
//! cooperative frame loop that runs the top state's logic steps at a fixed
//! rate, ticks the ECS scheduler after every step, and calls the platform
//! hooks in a fixed order.
//!
//! # Quick Start
//!
//! ```
//! use cadence_engine::prelude::*;
//!
//! let mut engine = Engine::new(World::with_capacity(1, 0), EngineConfig::default())
//!     .unwrap()
//!     .with_governor(LockstepClock::new(1));
//!
//! engine.state_new("menu", |engine, stage, _pass| {
//!     if stage == Stage::Loop {
//!         engine.state_replace("game");
//!     }
//! });
//! engine.state_new("game", |engine, stage, _pass| {
//!     if stage == Stage::Loop {
//!         engine.state_exit();
//!     }
//! });
//!
//! engine.state_push("menu");
//! engine.run();
//! assert_eq!(engine.states().depth(), 0);
//! ```

#![deny(unsafe_code)]

pub mod config;
pub mod engine;
pub mod fps;
pub mod hooks;
pub mod logging;
pub mod state;

use std::path::PathBuf;

// ---------------------------------------------------------------------------
// Re-exports
// ---------------------------------------------------------------------------

/// Re-export the ECS crate for convenience.
pub use cadence_ecs;

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Errors produced while configuring the engine or loading its resources.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// A configuration value is out of range.
    #[error("invalid config: '{field}' {reason}")]
    InvalidConfig {
        field: &'static str,
        reason: String,
    },

    /// A configuration document is not valid JSON for [`config::EngineConfig`].
    #[error("failed to parse config: {0}")]
    ConfigParse(#[from] serde_json::Error),

    /// A file could not be read.
    #[error("failed to read '{}': {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// An ECS operation failed.
    #[error(transparent)]
    Ecs(#[from] cadence_ecs::EcsError),
}

// ---------------------------------------------------------------------------
// Prelude
// ---------------------------------------------------------------------------

/// Convenience re-exports for common engine usage.
pub mod prelude {
    // Re-export everything from the ECS prelude.
    pub use cadence_ecs::prelude::*;

    // Engine-specific exports.
    pub use crate::config::EngineConfig;
    pub use crate::engine::Engine;
    pub use crate::fps::{FixedStepClock, FrameGovernor, LockstepClock};
    pub use crate::hooks::{FrameHooks, NoHooks};
    pub use crate::logging::{init_logging, LoggingConfig};
    pub use crate::state::{Pass, Stage, StateHandler, StateStack};
    pub use crate::EngineError;
}
