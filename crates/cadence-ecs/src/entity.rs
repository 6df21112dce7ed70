//! Entity handles, handle recycling, and the per-entity record.
//!
//! Collaborators hold entities by [`EntityId`]. A handle stays valid from
//! `entity_new` until the flush that frees the entity; after that every
//! lookup through it misses, even once its slot is handed to a newer entity.
//!
//! The [`EntityRecord`] is the aggregate the scheduler moves between its
//! lifecycle lists: components, system membership, reference count and flags.

use std::any::Any;
use std::collections::VecDeque;
use std::fmt;
use std::rc::Rc;

use crate::bitfield::Bitfield;
use crate::collection::CollectionId;
use crate::component::ComponentInstance;
use crate::system::SystemId;
use crate::template::TemplateId;

// ---------------------------------------------------------------------------
// EntityId
// ---------------------------------------------------------------------------

/// Handle to an entity: a slot plus the reuse count of that slot when the
/// entity was created. Prints as `slot v reuse`, e.g. `3v1`.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntityId(u64);

impl EntityId {
    pub fn new(index: u32, generation: u32) -> Self {
        Self(u64::from(generation) << 32 | u64::from(index))
    }

    /// Slot in the world's entity arena.
    pub fn index(self) -> u32 {
        self.0 as u32
    }

    /// How many entities occupied the slot before this one.
    pub fn generation(self) -> u32 {
        (self.0 >> 32) as u32
    }
}

impl fmt::Debug for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EntityId({self})")
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}v{}", self.index(), self.generation())
    }
}

// ---------------------------------------------------------------------------
// EntityAllocator
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy)]
struct Slot {
    generation: u32,
    live: bool,
}

/// Hands out entity handles and takes them back when the flush frees an
/// entity. Freed slots are reused oldest first.
#[derive(Debug, Default)]
pub struct EntityAllocator {
    slots: Vec<Slot>,
    vacant: VecDeque<u32>,
    live: usize,
}

impl EntityAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn allocate(&mut self) -> EntityId {
        self.live += 1;
        if let Some(index) = self.vacant.pop_front() {
            let slot = &mut self.slots[index as usize];
            slot.live = true;
            return EntityId::new(index, slot.generation);
        }
        let index = self.slots.len() as u32;
        self.slots.push(Slot {
            generation: 0,
            live: true,
        });
        EntityId::new(index, 0)
    }

    /// Free the slot behind `id` so later handles to it miss. `false` for a
    /// handle that no longer names a live entity.
    pub fn deallocate(&mut self, id: EntityId) -> bool {
        if !self.is_alive(id) {
            return false;
        }
        let slot = &mut self.slots[id.index() as usize];
        slot.live = false;
        slot.generation = slot.generation.wrapping_add(1);
        self.vacant.push_back(id.index());
        self.live -= 1;
        true
    }

    pub fn is_alive(&self, id: EntityId) -> bool {
        self.slots
            .get(id.index() as usize)
            .is_some_and(|slot| slot.live && slot.generation == id.generation())
    }

    /// Entities handed out and not yet freed.
    pub fn alive_count(&self) -> usize {
        self.live
    }
}

// ---------------------------------------------------------------------------
// Lifecycle lists
// ---------------------------------------------------------------------------

/// The mutually exclusive scheduler lists. Every entity sits in exactly one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Lifecycle {
    /// Created this frame; not yet matched against systems.
    New,
    /// Matched (or unmuted) and waiting to be inserted into system lists.
    Restore,
    /// Steady state.
    Default,
    /// Waiting for the next flush to leave every system list.
    MutedQueue,
    /// Removal requested; waiting for the next flush.
    RemovedQueue,
    /// Removed but still referenced; destroyed once the count drops to zero.
    RemovedLimbo,
    /// Destroyed at the next flush.
    RemovedFree,
}

impl Lifecycle {
    /// All lists, in pipeline order.
    pub const ALL: [Lifecycle; 7] = [
        Lifecycle::New,
        Lifecycle::Restore,
        Lifecycle::Default,
        Lifecycle::MutedQueue,
        Lifecycle::RemovedQueue,
        Lifecycle::RemovedLimbo,
        Lifecycle::RemovedFree,
    ];

    /// Whether the scheduler drains this list (as opposed to holding entities
    /// in it indefinitely).
    pub(crate) fn is_queue(self) -> bool {
        !matches!(self, Lifecycle::Default | Lifecycle::RemovedLimbo)
    }

    pub(crate) fn slot(self) -> usize {
        self as usize
    }
}

/// Coarse destruction state of an entity, derived from its lifecycle list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityState {
    /// Not removed.
    Live,
    /// Removal requested, flush pending.
    PendingRemoval,
    /// Removed, kept alive by outstanding references.
    Limbo,
    /// Destroyed (or never existed).
    Freed,
}

// ---------------------------------------------------------------------------
// EntityRecord
// ---------------------------------------------------------------------------

/// Opaque per-entity user context. Shared, never owned by the entity.
pub type EntityContext = Rc<dyn Any>;

/// A position inside one system's membership list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct SystemNode {
    pub system: SystemId,
    pub slot: usize,
}

/// Everything the world stores for one live entity.
pub struct EntityRecord {
    pub(crate) id: EntityId,
    pub(crate) name: String,
    pub(crate) context: Option<EntityContext>,
    pub(crate) parent: Option<EntityId>,
    pub(crate) template: Option<TemplateId>,
    pub(crate) collection: Option<CollectionId>,
    /// Indexed by component kind.
    pub(crate) components: Vec<Option<ComponentInstance>>,
    pub(crate) component_bits: Bitfield,

    // Systems this entity matched on its first tick, split by dispatch policy.
    pub(crate) matching_active: Vec<SystemId>,
    pub(crate) matching_either: Vec<SystemId>,
    // Where it currently sits in those systems' lists.
    pub(crate) nodes_active: Vec<SystemNode>,
    pub(crate) nodes_either: Vec<SystemNode>,

    pub(crate) references: u32,
    pub(crate) mute_count: u32,
    pub(crate) last_active: Option<u64>,
    pub(crate) active_permanent: bool,
    pub(crate) evicted: bool,
    pub(crate) removed: bool,
    pub(crate) debug: bool,

    pub(crate) list: Lifecycle,
    /// Bumped on every list move; queue entries carrying an older stamp are
    /// stale and skipped when the queue is drained.
    pub(crate) list_stamp: u32,
}

impl EntityRecord {
    pub(crate) fn new(
        id: EntityId,
        name: String,
        context: Option<EntityContext>,
        num_components: usize,
    ) -> Self {
        Self {
            id,
            name,
            context,
            parent: None,
            template: None,
            collection: None,
            components: (0..num_components).map(|_| None).collect(),
            component_bits: Bitfield::new(num_components),
            matching_active: Vec::new(),
            matching_either: Vec::new(),
            nodes_active: Vec::new(),
            nodes_either: Vec::new(),
            references: 0,
            mute_count: 0,
            last_active: None,
            active_permanent: false,
            evicted: false,
            removed: false,
            debug: false,
            list: Lifecycle::New,
            list_stamp: 0,
        }
    }

    /// The handle this record belongs to.
    pub fn id(&self) -> EntityId {
        self.id
    }

    /// The entity's string identifier.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The lifecycle list the entity currently sits in.
    pub fn list(&self) -> Lifecycle {
        self.list
    }

    /// Outstanding references held by collaborators.
    pub fn references(&self) -> u32 {
        self.references
    }

    /// Kinds present on this entity.
    pub fn component_bits(&self) -> &Bitfield {
        &self.component_bits
    }

    /// Whether the entity is currently a member of `system`'s list.
    pub fn in_system(&self, system: SystemId) -> bool {
        self.nodes_active
            .iter()
            .chain(self.nodes_either.iter())
            .any(|n| n.system == system)
    }

    pub(crate) fn state(&self) -> EntityState {
        match self.list {
            Lifecycle::RemovedQueue => EntityState::PendingRemoval,
            Lifecycle::RemovedLimbo => EntityState::Limbo,
            Lifecycle::RemovedFree => EntityState::Freed,
            _ => EntityState::Live,
        }
    }
}

impl fmt::Debug for EntityRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntityRecord")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("list", &self.list)
            .field("components", &self.component_bits)
            .field("references", &self.references)
            .field("mute_count", &self.mute_count)
            .field("removed", &self.removed)
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
