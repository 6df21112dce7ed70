//! System kind registration and membership lists.
//!
//! A [`SystemKind`] pairs a handler with a required-components mask. Entities
//! whose component bits satisfy the mask are appended to the system's
//! membership list by the scheduler tick; [`World::system_run`] walks that
//! list and calls the handler once per entity.
//!
//! Membership lists keep insertion order. Removing an entity leaves a hole at
//! its slot so that a list being walked is never shifted underneath the walker;
//! holes are compacted away at the start of the next run.
//!
//! [`World::system_run`]: crate::world::World::system_run

use std::cmp::Ordering;
use std::fmt;

use crate::bitfield::Bitfield;
use crate::component::ComponentId;
use crate::entity::EntityId;
use crate::world::World;

// ---------------------------------------------------------------------------
// SystemId
// ---------------------------------------------------------------------------

/// Dense index of a registered system kind.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SystemId(pub u32);

impl SystemId {
    /// The index as a `usize`.
    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Debug for SystemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SystemId({})", self.0)
    }
}

impl fmt::Display for SystemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Callbacks
// ---------------------------------------------------------------------------

/// Invoked once per matching entity per run.
pub type SystemHandler = Box<dyn FnMut(&mut World, EntityId)>;

/// Orders a system's entity list before each run.
pub type SystemCompare = Box<dyn Fn(&World, EntityId, EntityId) -> Ordering>;

// ---------------------------------------------------------------------------
// SystemKind
// ---------------------------------------------------------------------------

/// Handler, ordering, requirements and live membership of one system.
pub struct SystemKind {
    /// `None` while the system is running.
    pub(crate) handler: Option<SystemHandler>,
    pub(crate) compare: Option<SystemCompare>,
    pub(crate) component_bits: Bitfield,
    pub(crate) only_active: bool,
    pub(crate) entities: Vec<Option<EntityId>>,
    holes: usize,
}

impl SystemKind {
    fn new(
        handler: SystemHandler,
        compare: Option<SystemCompare>,
        only_active: bool,
        num_components: usize,
    ) -> Self {
        Self {
            handler: Some(handler),
            compare,
            component_bits: Bitfield::new(num_components),
            only_active,
            entities: Vec::new(),
            holes: 0,
        }
    }

    /// Whether only active entities are dispatched.
    pub fn only_active(&self) -> bool {
        self.only_active
    }

    /// The required-components mask.
    pub fn requirements(&self) -> &Bitfield {
        &self.component_bits
    }

    /// Whether a run of this system is in progress.
    pub fn is_running(&self) -> bool {
        self.handler.is_none()
    }

    /// Number of member entities.
    pub fn len(&self) -> usize {
        self.entities.len() - self.holes
    }

    /// Whether the system has no members.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Member entities in list order.
    pub fn entities(&self) -> impl Iterator<Item = EntityId> + '_ {
        self.entities.iter().flatten().copied()
    }

    pub(crate) fn push(&mut self, entity: EntityId) -> usize {
        self.entities.push(Some(entity));
        self.entities.len() - 1
    }

    pub(crate) fn vacate(&mut self, slot: usize, entity: EntityId) {
        debug_assert_eq!(
            self.entities.get(slot).copied().flatten(),
            Some(entity),
            "membership slot {slot} does not hold {entity}"
        );
        if let Some(entry) = self.entities.get_mut(slot) {
            if entry.take().is_some() {
                self.holes += 1;
            }
        }
    }

    /// Drop holes, preserving order. Returns `true` if any slot moved.
    pub(crate) fn compact(&mut self) -> bool {
        if self.holes == 0 {
            return false;
        }
        self.entities.retain(Option::is_some);
        self.holes = 0;
        true
    }
}

impl fmt::Debug for SystemKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SystemKind")
            .field("requires", &self.component_bits)
            .field("only_active", &self.only_active)
            .field("sorted", &self.compare.is_some())
            .field("len", &self.len())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// SystemRegistry
// ---------------------------------------------------------------------------

/// Fixed-size table of system kinds, addressed by [`SystemId`].
#[derive(Debug, Default)]
pub struct SystemRegistry {
    systems: Option<Vec<Option<SystemKind>>>,
}

impl SystemRegistry {
    /// Create an uninitialised registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Preallocate a table of exactly `num_systems` kinds.
    pub fn init(&mut self, num_systems: usize) {
        self.systems = Some((0..num_systems).map(|_| None).collect());
    }

    /// Drop every system and return to the uninitialised state.
    pub fn uninit(&mut self) {
        self.systems = None;
    }

    /// Whether [`init`](Self::init) has been called.
    pub fn is_initialized(&self) -> bool {
        self.systems.is_some()
    }

    /// Size of the table (0 before initialisation).
    pub fn len(&self) -> usize {
        self.systems.as_ref().map_or(0, Vec::len)
    }

    /// Whether the table has no slots.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Declare system `id`, with a requirement mask sized for
    /// `num_components` kinds.
    ///
    /// # Panics
    ///
    /// Panics if the registry is uninitialised, `id` is out of range, or `id`
    /// is already declared.
    pub fn register(
        &mut self,
        id: SystemId,
        handler: SystemHandler,
        compare: Option<SystemCompare>,
        only_active: bool,
        num_components: usize,
    ) {
        let Some(systems) = self.systems.as_mut() else {
            panic!("system_new({id}): call init first");
        };
        let capacity = systems.len();
        let Some(slot) = systems.get_mut(id.index()) else {
            panic!("system_new({id}): index out of range (table holds {capacity})");
        };
        if slot.is_some() {
            panic!("system_new({id}): already declared");
        }

        tracing::debug!(system = %id, only_active, sorted = compare.is_some(), "system registered");
        *slot = Some(SystemKind::new(handler, compare, only_active, num_components));
    }

    /// Add `component` to the requirement mask of `id`.
    pub fn require(&mut self, id: SystemId, component: ComponentId) {
        self.get_mut(id, "system_add")
            .component_bits
            .set(component.index());
    }

    #[cfg(debug_assertions)]
    fn validate(&self, id: SystemId, caller: &str) {
        let Some(systems) = self.systems.as_ref() else {
            panic!("{caller}: call init first");
        };
        if id.index() >= systems.len() {
            panic!("{caller}: unknown system {id}");
        }
        if systems[id.index()].is_none() {
            panic!("{caller}: uninitialized system {id}");
        }
    }

    /// Fetch a declared system; debug builds validate and name `caller`.
    pub fn get(&self, id: SystemId, caller: &str) -> &SystemKind {
        #[cfg(debug_assertions)]
        self.validate(id, caller);

        match self.try_get(id) {
            Some(system) => system,
            None => panic!("{caller}: uninitialized system {id}"),
        }
    }

    /// Mutable counterpart of [`get`](Self::get).
    pub fn get_mut(&mut self, id: SystemId, caller: &str) -> &mut SystemKind {
        #[cfg(debug_assertions)]
        self.validate(id, caller);

        match self
            .systems
            .as_mut()
            .and_then(|s| s.get_mut(id.index()))
            .and_then(Option::as_mut)
        {
            Some(system) => system,
            None => panic!("{caller}: uninitialized system {id}"),
        }
    }

    /// Fetch a declared system, or `None`.
    pub fn try_get(&self, id: SystemId) -> Option<&SystemKind> {
        self.systems.as_ref()?.get(id.index())?.as_ref()
    }

    /// Declared systems in index order.
    pub fn iter(&self) -> impl Iterator<Item = (SystemId, &SystemKind)> {
        self.systems.iter().flatten().enumerate().filter_map(|(i, s)| {
            s.as_ref().map(|s| (SystemId(i as u32), s))
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
