//! Per-frame callbacks into the platform collaborators.
//!
//! The run loop calls the `*_tick` hooks once per logic step, before the
//! state handler, and the draw hooks once per frame after the render pass, in
//! declaration order. Every hook defaults to a no-op so a host only
//! implements what it actually drives.

use cadence_ecs::world::World;

/// Timer, input, audio, screen, screenshot and console collaborators.
pub trait FrameHooks {
    fn timer_tick(&mut self) {}
    fn input_tick(&mut self) {}
    fn sound_tick(&mut self) {}
    fn screen_tick(&mut self) {}
    fn screenshot_tick(&mut self) {}
    fn console_tick(&mut self) {}

    /// Render pass over the world, typically running draw systems.
    fn ecs_draw(&mut self, _world: &mut World) {}
    fn sound_draw(&mut self) {}
    fn console_draw(&mut self) {}
    /// Present the frame.
    fn screen_draw(&mut self) {}
}

/// Hooks that do nothing; the default for headless engines.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoHooks;

impl FrameHooks for NoHooks {}
