//! The [`Engine`]: owns the world, the state stack, the frame governor and the
//! platform hooks, and runs the cooperative frame loop.
//!
//! Each [`Engine::iteration`]:
//!
//! 1. Applies one round of state transitions.
//! 2. If the top state is in `Loop`, runs logic steps while the governor
//!    grants them: platform tick hooks, the handler with [`Pass::Step`], then
//!    one ECS tick. A transition requested during a step ends the iteration
//!    right after that step; remaining catch-up steps are deferred.
//! 3. Otherwise, or after the steps, calls the handler once with
//!    [`Pass::Frame`]; in `Loop` the draw hooks follow and the governor closes
//!    the frame.
//!
//! The loop ends when the stack is empty after a transition round.
//!
//! # Example
//!
//! ```
//! use cadence_engine::prelude::*;
//!
//! let world = World::with_capacity(1, 0);
//! let mut engine = Engine::new(world, EngineConfig::default())
//!     .unwrap()
//!     .with_governor(LockstepClock::new(1));
//!
//! engine.state_new("title", |engine, stage, pass| {
//!     if stage == Stage::Loop && pass == Pass::Frame && engine.frames() == 3 {
//!         engine.state_exit();
//!     }
//! });
//! engine.state_push("title");
//! engine.run();
//!
//! assert_eq!(engine.frames(), 4);
//! ```

use std::path::Path;

use cadence_ecs::template::TemplateId;
use cadence_ecs::world::World;

use crate::config::EngineConfig;
use crate::fps::{FixedStepClock, FrameGovernor};
use crate::hooks::{FrameHooks, NoHooks};
use crate::state::{Pass, Stage, StateStack};
use crate::EngineError;

/// World, states and frame pacing for one application.
pub struct Engine {
    world: World,
    states: StateStack,
    governor: Box<dyn FrameGovernor>,
    hooks: Box<dyn FrameHooks>,
    config: EngineConfig,
}

impl Engine {
    /// Create an engine around an initialised `world`, paced by a
    /// [`FixedStepClock`] built from `config`.
    pub fn new(world: World, config: EngineConfig) -> Result<Self, EngineError> {
        config.validate()?;
        Ok(Self {
            world,
            states: StateStack::new(),
            governor: Box::new(FixedStepClock::from_config(&config)),
            hooks: Box::new(NoHooks),
            config,
        })
    }

    /// Replace the frame governor.
    pub fn with_governor(mut self, governor: impl FrameGovernor + 'static) -> Self {
        self.governor = Box::new(governor);
        self
    }

    /// Replace the platform hooks.
    pub fn with_hooks(mut self, hooks: impl FrameHooks + 'static) -> Self {
        self.hooks = Box::new(hooks);
        self
    }

    // -- accessors ----------------------------------------------------------

    pub fn world(&self) -> &World {
        &self.world
    }

    pub fn world_mut(&mut self) -> &mut World {
        &mut self.world
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn states(&self) -> &StateStack {
        &self.states
    }

    /// Logic steps granted by the governor so far.
    pub fn ticks(&self) -> u64 {
        self.governor.ticks()
    }

    /// Frames completed so far.
    pub fn frames(&self) -> u64 {
        self.governor.frames()
    }

    /// Read a JSON template file and load it into the world under `name`.
    pub fn template_load_file(
        &mut self,
        name: &str,
        path: impl AsRef<Path>,
    ) -> Result<TemplateId, EngineError> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path).map_err(|source| EngineError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(self.world.template_load_str(name, &source)?)
    }

    // -- states -------------------------------------------------------------

    /// Register a state.
    ///
    /// # Panics
    ///
    /// Panics if `name` is already registered.
    pub fn state_new<H>(&mut self, name: &str, handler: H)
    where
        H: FnMut(&mut Engine, Stage, Pass) + 'static,
    {
        self.states.register(name, Box::new(handler));
    }

    /// See [`StateStack::push`].
    pub fn state_push(&mut self, name: &str) {
        self.states.push(name);
    }

    /// See [`StateStack::pop`].
    pub fn state_pop(&mut self) {
        self.states.pop();
    }

    /// See [`StateStack::pop_until`].
    pub fn state_pop_until(&mut self, name: &str) {
        self.states.pop_until(name);
    }

    /// See [`StateStack::replace`].
    pub fn state_replace(&mut self, name: &str) {
        self.states.replace(name);
    }

    /// See [`StateStack::exit`].
    pub fn state_exit(&mut self) {
        self.states.exit();
    }

    // -- loop ---------------------------------------------------------------

    fn dispatch(&mut self, name: &str, stage: Stage, pass: Pass) {
        let Some(mut handler) = self.states.take_handler(name) else {
            panic!("state '{name}': handler is already running");
        };
        handler(self, stage, pass);
        self.states.restore_handler(name, handler);
    }

    /// Run one scheduler iteration. Returns `false` once the stack is empty.
    pub fn iteration(&mut self) -> bool {
        self.states
            .handle_pending(&mut self.world, self.governor.as_mut());

        let Some(name) = self.states.current().map(str::to_owned) else {
            return false;
        };
        let stage = self.states.stage(&name).unwrap_or(Stage::Init);

        if stage != Stage::Loop {
            tracing::debug!(state = %name, %stage, "running stage");
            self.dispatch(&name, stage, Pass::Frame);
            return true;
        }

        while self.governor.tick() {
            self.hooks.timer_tick();
            self.hooks.input_tick();
            self.hooks.sound_tick();
            self.hooks.screen_tick();
            self.hooks.screenshot_tick();
            self.hooks.console_tick();

            self.dispatch(&name, Stage::Loop, Pass::Step);
            self.world.tick();

            if self.states.has_pending() {
                tracing::trace!(state = %name, "transition requested; ending iteration early");
                return true;
            }
        }

        self.dispatch(&name, Stage::Loop, Pass::Frame);
        self.hooks.ecs_draw(&mut self.world);
        self.hooks.sound_draw();
        self.hooks.console_draw();
        self.hooks.screen_draw();

        self.governor.frame();
        true
    }

    /// Iterate until the stack empties, then shut the world down.
    pub fn run(&mut self) {
        tracing::info!("running states");
        while self.iteration() {}
        tracing::info!(
            frames = self.governor.frames(),
            ticks = self.governor.ticks(),
            "finished running states"
        );
        self.world.shutdown();
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("world", &self.world)
            .field("states", &self.states)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
