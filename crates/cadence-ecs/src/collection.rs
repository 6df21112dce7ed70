//! Entity collections: save/restore contexts for groups of entities.
//!
//! Every entity is recorded in the collection that is current when it is
//! created. The state stack pushes a fresh collection when a state is pushed
//! and pops it when the state is destroyed, so the entities a state created
//! can be muted while it is covered and removed when it goes away. A
//! collection never owns its entities; it only remembers their ids.

use crate::entity::EntityId;

/// Index of a collection in the world's collection arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CollectionId(pub(crate) u32);

/// Ids of the entities created while this collection was current.
#[derive(Debug, Default)]
pub struct Collection {
    entities: Vec<EntityId>,
    /// Entities muted when this collection was covered by a newer one.
    pub(crate) muted: Vec<EntityId>,
}

impl Collection {
    /// Entities recorded in this collection that have not been destroyed,
    /// in creation order.
    pub fn entities(&self) -> &[EntityId] {
        &self.entities
    }
}

/// Arena of collections plus the stack of saved "current" collections.
#[derive(Debug, Default)]
pub(crate) struct CollectionStack {
    arena: Vec<Option<Collection>>,
    current: Option<CollectionId>,
    saved: Vec<Option<CollectionId>>,
}

impl CollectionStack {
    pub fn current(&self) -> Option<CollectionId> {
        self.current
    }

    pub fn set_current(&mut self, id: Option<CollectionId>) {
        self.current = id;
    }

    pub fn get(&self, id: CollectionId) -> Option<&Collection> {
        self.arena.get(id.0 as usize)?.as_ref()
    }

    pub fn get_mut(&mut self, id: CollectionId) -> Option<&mut Collection> {
        self.arena.get_mut(id.0 as usize)?.as_mut()
    }

    /// Record `entity` in the current collection, returning it.
    pub fn record(&mut self, entity: EntityId) -> Option<CollectionId> {
        let id = self.current?;
        let collection = self.arena.get_mut(id.0 as usize)?.as_mut()?;
        collection.entities.push(entity);
        Some(id)
    }

    /// Drop a destroyed `entity` from collection `id`.
    pub fn forget(&mut self, id: CollectionId, entity: EntityId) {
        let Some(collection) = self.get_mut(id) else {
            return;
        };
        if let Some(pos) = collection.entities.iter().position(|&e| e == entity) {
            collection.entities.remove(pos);
        }
        collection.muted.retain(|&e| e != entity);
    }

    /// Save the current collection and make a fresh one current, reusing a
    /// popped slot when one is free. Returns the saved (now covered)
    /// collection.
    pub fn push(&mut self) -> (Option<CollectionId>, CollectionId) {
        let fresh = match self.arena.iter().position(Option::is_none) {
            Some(slot) => {
                self.arena[slot] = Some(Collection::default());
                CollectionId(slot as u32)
            }
            None => {
                self.arena.push(Some(Collection::default()));
                CollectionId(self.arena.len() as u32 - 1)
            }
        };

        let covered = self.current;
        self.saved.push(covered);
        self.current = Some(fresh);

        (covered, fresh)
    }

    /// Discard the current collection and restore the saved one. Returns the
    /// discarded collection and the restored id.
    pub fn pop(&mut self) -> (Option<Collection>, Option<CollectionId>) {
        let discarded = self
            .current
            .and_then(|id| self.arena.get_mut(id.0 as usize))
            .and_then(Option::take);

        self.current = self.saved.pop().flatten();
        (discarded, self.current)
    }

    pub fn clear(&mut self) {
        self.arena.clear();
        self.saved.clear();
        self.current = None;
    }
}
