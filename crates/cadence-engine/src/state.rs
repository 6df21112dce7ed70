//! The state stack: named application states driven through
//! `Init -> Loop -> Free`.
//!
//! Requests (`push`, `pop`, `pop_until`, `replace`, `exit`) only enqueue
//! pending actions. [`StateStack::handle_pending`] consumes at most one of
//! them per engine iteration, so every state gets one dispatch in each stage
//! it passes through, teardown included:
//!
//! 1. A top state that just ran its `Free` stage is popped; its entity
//!    collection is closed and the frame governor reset.
//! 2. With nothing pending, a top state still in `Init` moves to `Loop`.
//! 3. Otherwise one pending action is applied: a pop moves the top state to
//!    `Free`; a push opens a new collection and stacks the state in `Init`.
//!
//! [`exit`](StateStack::exit) discards pending requests, queues one pop per
//! stacked state and latches the stack into ignoring every later request.

use std::collections::{HashMap, VecDeque};
use std::fmt;

use cadence_ecs::world::World;

use crate::engine::Engine;
use crate::fps::FrameGovernor;

// ---------------------------------------------------------------------------
// Stage / Pass
// ---------------------------------------------------------------------------

/// Lifecycle stage of a stacked state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Init,
    Loop,
    Free,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Stage::Init => "Init",
            Stage::Loop => "Loop",
            Stage::Free => "Free",
        })
    }
}

/// Which invocation of the handler this is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Pass {
    /// A logic step in the `Loop` stage.
    Step,
    /// The once-per-frame invocation: render in `Loop`, the single call in
    /// `Init` and `Free`.
    Frame,
}

/// A state's callback.
pub type StateHandler = Box<dyn FnMut(&mut Engine, Stage, Pass)>;

// ---------------------------------------------------------------------------
// StateStack
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
enum Pending {
    Push(String),
    Pop,
}

struct StateEntry {
    /// `None` while the handler is being dispatched.
    handler: Option<StateHandler>,
    stage: Stage,
}

/// Registered states, the stack of live ones, and the pending request queue.
#[derive(Default)]
pub struct StateStack {
    states: HashMap<String, StateEntry>,
    /// Bottom first.
    stack: Vec<String>,
    pending: VecDeque<Pending>,
    exiting: bool,
}

impl StateStack {
    /// Create an empty stack with no registered states.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` under `name`.
    ///
    /// # Panics
    ///
    /// Panics if `name` is already registered.
    pub fn register(&mut self, name: &str, handler: StateHandler) {
        assert!(
            !self.states.contains_key(name),
            "state_new('{name}'): state already registered"
        );
        self.states.insert(
            name.to_owned(),
            StateEntry {
                handler: Some(handler),
                stage: Stage::Init,
            },
        );
        tracing::debug!(state = name, "state registered");
    }

    /// Whether a state is registered under `name`.
    pub fn is_registered(&self, name: &str) -> bool {
        self.states.contains_key(name)
    }

    // -- requests -----------------------------------------------------------

    fn ignored_while_exiting(&self, request: &str) -> bool {
        if self.exiting {
            tracing::debug!(request, "already exiting; request ignored");
        }
        self.exiting
    }

    fn enqueue_push(&mut self, name: &str) {
        assert!(
            self.states.contains_key(name),
            "push state: '{name}' does not exist"
        );
        self.pending.push_back(Pending::Push(name.to_owned()));
    }

    /// Request that `name` be stacked on top.
    ///
    /// # Panics
    ///
    /// Panics if `name` is not registered.
    pub fn push(&mut self, name: &str) {
        tracing::debug!(state = name, "push requested");
        if self.ignored_while_exiting("push") {
            return;
        }
        self.enqueue_push(name);
    }

    /// Request that the top state be torn down.
    pub fn pop(&mut self) {
        tracing::debug!("pop requested");
        if self.ignored_while_exiting("pop") {
            return;
        }
        self.pending.push_back(Pending::Pop);
    }

    /// Request enough pops to make `name` the top state.
    ///
    /// # Panics
    ///
    /// Panics if `name` is not on the stack.
    pub fn pop_until(&mut self, name: &str) {
        tracing::debug!(state = name, "pop_until requested");
        if self.ignored_while_exiting("pop_until") {
            return;
        }

        let Some(depth) = self.stack.iter().rev().position(|s| s == name) else {
            panic!("pop_until: state '{name}' not in stack");
        };
        for _ in 0..depth {
            self.pending.push_back(Pending::Pop);
        }
    }

    /// Request a pop followed by a push of `name`.
    ///
    /// # Panics
    ///
    /// Panics if `name` is not registered.
    pub fn replace(&mut self, name: &str) {
        tracing::debug!(state = name, "replace requested");
        if self.ignored_while_exiting("replace") {
            return;
        }
        self.pending.push_back(Pending::Pop);
        self.enqueue_push(name);
    }

    /// Tear down every stacked state, top first, and ignore all later
    /// requests. Idempotent.
    pub fn exit(&mut self) {
        if self.ignored_while_exiting("exit") {
            return;
        }
        tracing::info!(stacked = self.stack.len(), "telling all states to exit");

        self.exiting = true;
        self.pending.clear();

        // A top already in Free leaves on the next round without a pop.
        let live = self
            .stack
            .iter()
            .filter(|name| self.states.get(*name).map(|e| e.stage) != Some(Stage::Free))
            .count();
        for _ in 0..live {
            self.pending.push_back(Pending::Pop);
        }
    }

    // -- inspection ---------------------------------------------------------

    /// Whether [`exit`](Self::exit) was called.
    pub fn is_exiting(&self) -> bool {
        self.exiting
    }

    /// Whether any request is waiting to be applied.
    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    /// Number of requests waiting to be applied.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Name of the top state.
    pub fn current(&self) -> Option<&str> {
        self.stack.last().map(String::as_str)
    }

    /// Stacked state names, bottom first.
    pub fn stacked(&self) -> impl Iterator<Item = &str> {
        self.stack.iter().map(String::as_str)
    }

    /// Number of stacked states.
    pub fn depth(&self) -> usize {
        self.stack.len()
    }

    /// Stage of a stacked state; `None` if `name` is not on the stack.
    pub fn stage(&self, name: &str) -> Option<Stage> {
        if !self.stack.iter().any(|s| s == name) {
            return None;
        }
        self.states.get(name).map(|entry| entry.stage)
    }

    // -- transitions --------------------------------------------------------

    fn set_stage(&mut self, name: &str, stage: Stage) {
        if let Some(entry) = self.states.get_mut(name) {
            tracing::debug!(state = name, from = %entry.stage, to = %stage, "stage transition");
            entry.stage = stage;
        }
    }

    /// Apply the transition rules once. See the module docs.
    ///
    /// # Panics
    ///
    /// Panics when a pop finds the stack empty or a push targets a state that
    /// is already stacked.
    pub fn handle_pending(&mut self, world: &mut World, governor: &mut dyn FrameGovernor) {
        if let Some(top) = self.current().map(str::to_owned) {
            if self.states.get(&top).map(|e| e.stage) == Some(Stage::Free) {
                tracing::info!(state = %top, "destroying instance");
                self.stack.pop();
                world.collection_pop();
                governor.reset();
            }
        }

        let top = self.current().map(str::to_owned);

        let Some(action) = self.pending.pop_front() else {
            if let Some(top) = top {
                if self.states.get(&top).map(|e| e.stage) == Some(Stage::Init) {
                    self.set_stage(&top, Stage::Loop);
                    governor.reset();
                }
            }
            return;
        };

        match action {
            Pending::Pop => {
                let Some(top) = top else {
                    panic!("pop state: stack is empty");
                };
                tracing::info!(state = %top, "pop");
                self.set_stage(&top, Stage::Free);
            }
            Pending::Push(name) => {
                if self.stack.contains(&name) {
                    panic!("push state: '{name}' already in stack");
                }
                tracing::info!(state = %name, "new instance");
                if let Some(entry) = self.states.get_mut(&name) {
                    entry.stage = Stage::Init;
                }
                world.collection_push();
                self.stack.push(name);
            }
        }
    }

    pub(crate) fn take_handler(&mut self, name: &str) -> Option<StateHandler> {
        self.states.get_mut(name)?.handler.take()
    }

    pub(crate) fn restore_handler(&mut self, name: &str, handler: StateHandler) {
        if let Some(entry) = self.states.get_mut(name) {
            entry.handler = Some(handler);
        }
    }
}

impl fmt::Debug for StateStack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StateStack")
            .field("registered", &self.states.len())
            .field("stack", &self.stack)
            .field("pending", &self.pending)
            .field("exiting", &self.exiting)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
