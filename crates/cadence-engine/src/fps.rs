//! Frame governors: decide when logic steps are due and pace frames.
//!
//! The run loop asks [`FrameGovernor::tick`] repeatedly; every `true` is one
//! logic step. After the render pass it calls [`FrameGovernor::frame`]. The
//! governor is reset whenever the running state changes, so a state never
//! inherits the previous state's backlog.

use std::thread;
use std::time::{Duration, Instant};

use crate::config::EngineConfig;

/// Paces logic steps and frames for the run loop.
pub trait FrameGovernor {
    /// Whether another logic step is due now. Each `true` counts as a step.
    fn tick(&mut self) -> bool;

    /// Close the current frame, waiting if drawing is capped.
    fn frame(&mut self);

    /// Drop any accumulated backlog and restart timing from now.
    fn reset(&mut self);

    /// Logic steps granted so far.
    fn ticks(&self) -> u64;

    /// Frames completed so far.
    fn frames(&self) -> u64;
}

// ---------------------------------------------------------------------------
// FixedStepClock
// ---------------------------------------------------------------------------

/// Wall-clock fixed-timestep governor.
///
/// Elapsed time accumulates between calls; each whole step's worth grants one
/// logic step. The backlog is capped at `max_catch_up` steps so a long stall
/// does not trigger a burst of catch-up work. With a draw cap, [`frame`]
/// sleeps off whatever is left of the frame's time slice.
///
/// [`frame`]: FrameGovernor::frame
#[derive(Debug, Clone)]
pub struct FixedStepClock {
    step: Duration,
    max_backlog: Duration,
    draw_interval: Option<Duration>,
    last: Instant,
    frame_start: Instant,
    accumulator: Duration,
    ticks: u64,
    frames: u64,
}

impl FixedStepClock {
    /// `tick_rate` steps per second, drawing capped at `draw_rate` frames per
    /// second (0 = uncapped).
    ///
    /// # Panics
    ///
    /// Panics if `tick_rate` or `max_catch_up` is zero.
    pub fn new(tick_rate: u32, draw_rate: u32, max_catch_up: u32) -> Self {
        assert!(tick_rate > 0, "FixedStepClock: tick_rate must be positive");
        assert!(max_catch_up > 0, "FixedStepClock: max_catch_up must be positive");

        let step = Duration::from_secs(1) / tick_rate;
        let now = Instant::now();
        Self {
            step,
            max_backlog: step * max_catch_up,
            draw_interval: (draw_rate > 0).then(|| Duration::from_secs(1) / draw_rate),
            last: now,
            frame_start: now,
            // A freshly reset clock grants one step right away.
            accumulator: step,
            ticks: 0,
            frames: 0,
        }
    }

    /// Build from a validated config.
    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(config.tick_rate, config.draw_rate, config.max_catch_up)
    }

    /// Duration of one logic step.
    pub fn step(&self) -> Duration {
        self.step
    }

    fn advance(&mut self, now: Instant) {
        self.accumulator += now.saturating_duration_since(self.last);
        self.last = now;
        if self.accumulator > self.max_backlog {
            tracing::trace!(
                dropped_ms = (self.accumulator - self.max_backlog).as_millis() as u64,
                "frame backlog capped"
            );
            self.accumulator = self.max_backlog;
        }
    }
}

impl FrameGovernor for FixedStepClock {
    fn tick(&mut self) -> bool {
        self.advance(Instant::now());
        if self.accumulator >= self.step {
            self.accumulator -= self.step;
            self.ticks += 1;
            true
        } else {
            false
        }
    }

    fn frame(&mut self) {
        self.frames += 1;
        if let Some(interval) = self.draw_interval {
            let spent = self.frame_start.elapsed();
            if spent < interval {
                thread::sleep(interval - spent);
            }
        }
        self.frame_start = Instant::now();
    }

    fn reset(&mut self) {
        let now = Instant::now();
        self.last = now;
        self.frame_start = now;
        self.accumulator = self.step;
    }

    fn ticks(&self) -> u64 {
        self.ticks
    }

    fn frames(&self) -> u64 {
        self.frames
    }
}

// ---------------------------------------------------------------------------
// LockstepClock
// ---------------------------------------------------------------------------

/// Deterministic governor granting exactly `steps_per_frame` logic steps per
/// frame, independent of wall-clock time. Used for headless runs and tests.
#[derive(Debug, Clone)]
pub struct LockstepClock {
    steps_per_frame: u32,
    remaining: u32,
    ticks: u64,
    frames: u64,
}

impl LockstepClock {
    pub fn new(steps_per_frame: u32) -> Self {
        Self {
            steps_per_frame,
            remaining: steps_per_frame,
            ticks: 0,
            frames: 0,
        }
    }
}

impl FrameGovernor for LockstepClock {
    fn tick(&mut self) -> bool {
        if self.remaining == 0 {
            return false;
        }
        self.remaining -= 1;
        self.ticks += 1;
        true
    }

    fn frame(&mut self) {
        self.frames += 1;
        self.remaining = self.steps_per_frame;
    }

    fn reset(&mut self) {
        self.remaining = self.steps_per_frame;
    }

    fn ticks(&self) -> u64 {
        self.ticks
    }

    fn frames(&self) -> u64 {
        self.frames
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
