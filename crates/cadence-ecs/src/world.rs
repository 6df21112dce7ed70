//! The [`World`]: registries, entity arena, lifecycle lists and the scheduler.
//!
//! Every structural change is deferred. Entities created during a frame sit
//! in the `New` list until the next [`World::tick`] matches them against the
//! declared systems; removals and mutes are queued and applied by
//! [`World::flush`], which runs at the start of every tick and after every
//! [`World::system_run`]. A system being walked never observes its own list
//! shifting: removing an entity leaves a hole that is compacted at the start
//! of the next run.
//!
//! Activity is frame-scoped. [`World::entity_active_set`] stamps the entity
//! with the current tick counter, and the entity counts as active until the
//! end of the following tick. Systems declared `only_active` evict members
//! that are inactive when their turn comes; those members come back the next
//! time they are marked active.

use std::any::Any;
use std::mem;

use crate::collection::{Collection, CollectionId, CollectionStack};
use crate::component::{ComponentId, ComponentInstance, ComponentKind, ComponentRegistry};
use crate::entity::{
    EntityAllocator, EntityContext, EntityId, EntityRecord, EntityState, Lifecycle, SystemNode,
};
use crate::system::{SystemCompare, SystemHandler, SystemId, SystemKind, SystemRegistry};
use crate::template::{TemplateId, TemplateRegistry};
use crate::EcsError;

// ---------------------------------------------------------------------------
// Entity arena
// ---------------------------------------------------------------------------

/// Records indexed by [`EntityId::index`]. A slot only answers for the exact
/// id (generation included) it was filled with.
#[derive(Debug, Default)]
struct EntitySlots {
    slots: Vec<Option<EntityRecord>>,
}

impl EntitySlots {
    fn get(&self, entity: EntityId) -> Option<&EntityRecord> {
        self.slots
            .get(entity.index() as usize)?
            .as_ref()
            .filter(|rec| rec.id == entity)
    }

    fn get_mut(&mut self, entity: EntityId) -> Option<&mut EntityRecord> {
        self.slots
            .get_mut(entity.index() as usize)?
            .as_mut()
            .filter(|rec| rec.id == entity)
    }

    fn insert(&mut self, record: EntityRecord) {
        let idx = record.id.index() as usize;
        if idx >= self.slots.len() {
            self.slots.resize_with(idx + 1, || None);
        }
        self.slots[idx] = Some(record);
    }

    fn take(&mut self, entity: EntityId) -> Option<EntityRecord> {
        let slot = self.slots.get_mut(entity.index() as usize)?;
        if slot.as_ref().is_some_and(|rec| rec.id == entity) {
            slot.take()
        } else {
            None
        }
    }

    fn iter(&self) -> impl Iterator<Item = &EntityRecord> {
        self.slots.iter().flatten()
    }

    fn clear(&mut self) {
        self.slots.clear();
    }
}

fn typed<'a, T: 'static>(instance: &'a ComponentInstance, kind: &ComponentKind) -> &'a T {
    match instance.get::<T>() {
        Some(value) => value,
        None => panic!(
            "component '{}' stores {}, not {}",
            kind.name(),
            kind.type_name(),
            std::any::type_name::<T>()
        ),
    }
}

fn typed_mut<'a, T: 'static>(instance: &'a mut ComponentInstance, kind: &ComponentKind) -> &'a mut T {
    match instance.get_mut::<T>() {
        Some(value) => value,
        None => panic!(
            "component '{}' stores {}, not {}",
            kind.name(),
            kind.type_name(),
            std::any::type_name::<T>()
        ),
    }
}

// ---------------------------------------------------------------------------
// World
// ---------------------------------------------------------------------------

/// Owns every registry, entity and list of the ECS.
///
/// A world starts uninitialised; [`init`](Self::init) (or
/// [`with_capacity`](Self::with_capacity)) sizes the component and system
/// tables, after which kinds, systems and templates can be declared and
/// entities created.
#[derive(Debug, Default)]
pub struct World {
    components: ComponentRegistry,
    systems: SystemRegistry,
    templates: TemplateRegistry,
    allocator: EntityAllocator,
    entities: EntitySlots,
    /// Drain queues, indexed by [`Lifecycle::slot`]. Entries whose stamp no
    /// longer matches the record are stale.
    queues: [Vec<(EntityId, u32)>; 7],
    collections: CollectionStack,
    ticks: u64,
    shutting_down: bool,
}

impl World {
    /// Create an uninitialised world.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a world with tables for `num_components` kinds and
    /// `num_systems` systems.
    pub fn with_capacity(num_components: usize, num_systems: usize) -> Self {
        let mut world = Self::new();
        world.init(num_components, num_systems);
        world
    }

    /// Size the component and system tables.
    ///
    /// # Panics
    ///
    /// Panics if the world is already initialised or `num_components` is 0.
    pub fn init(&mut self, num_components: usize, num_systems: usize) {
        assert!(!self.is_initialized(), "World::init: already initialized");
        assert!(
            num_components > 0,
            "World::init: at least one component kind is required"
        );

        self.components.init(num_components);
        self.systems.init(num_systems);
        tracing::debug!(num_components, num_systems, "world initialized");
    }

    /// Whether [`init`](Self::init) has been called.
    pub fn is_initialized(&self) -> bool {
        self.components.is_initialized()
    }

    /// Destroy every entity (running component destructor hooks), then drop
    /// templates, systems and component kinds. The world can be initialised
    /// again afterwards.
    pub fn shutdown(&mut self) {
        if !self.is_initialized() {
            return;
        }
        self.shutting_down = true;
        self.collections.clear();

        let ids: Vec<EntityId> = self.entities.iter().map(|rec| rec.id).collect();
        let count = ids.len();
        for id in ids {
            self.destroy(id);
        }

        for queue in &mut self.queues {
            queue.clear();
        }
        self.entities.clear();
        self.templates.clear();
        self.systems.uninit();
        self.components.uninit();
        self.ticks = 0;
        self.shutting_down = false;

        tracing::debug!(destroyed = count, "world shut down");
    }

    // -- registration -------------------------------------------------------

    /// Bind component kind `kind` to index `id`.
    ///
    /// # Panics
    ///
    /// Panics if the world is uninitialised, `id` is out of range, or `id` or
    /// the kind's string identifier is already declared.
    pub fn component_new(&mut self, id: ComponentId, kind: ComponentKind) {
        self.components.register(id, kind);
    }

    /// The component registry.
    pub fn registry(&self) -> &ComponentRegistry {
        &self.components
    }

    /// Reverse lookup of a component kind by string identifier.
    pub fn component_string_to_index(&self, name: &str) -> Option<ComponentId> {
        self.components.string_to_index(name)
    }

    /// Declare system `id`. Entities are dispatched in insertion order.
    pub fn system_new<H>(&mut self, id: SystemId, handler: H, only_active: bool)
    where
        H: FnMut(&mut World, EntityId) + 'static,
    {
        self.system_declare(id, Box::new(handler), None, only_active);
    }

    /// Declare system `id` whose members are sorted with `compare` before
    /// every run.
    pub fn system_new_sorted<H, C>(&mut self, id: SystemId, handler: H, compare: C, only_active: bool)
    where
        H: FnMut(&mut World, EntityId) + 'static,
        C: Fn(&World, EntityId, EntityId) -> std::cmp::Ordering + 'static,
    {
        self.system_declare(id, Box::new(handler), Some(Box::new(compare)), only_active);
    }

    fn system_declare(
        &mut self,
        id: SystemId,
        handler: SystemHandler,
        compare: Option<SystemCompare>,
        only_active: bool,
    ) {
        let num_components = self.components.len();
        self.systems
            .register(id, handler, compare, only_active, num_components);
    }

    /// Require `component` for membership in `system`. Only affects entities
    /// matched after the call.
    pub fn system_add(&mut self, system: SystemId, component: ComponentId) {
        self.components.get(component, "system_add");
        self.systems.require(system, component);
    }

    /// The system registry.
    pub fn systems(&self) -> &SystemRegistry {
        &self.systems
    }

    /// Resolve and store a template under `name`.
    pub fn template_load(
        &mut self,
        name: &str,
        doc: &serde_json::Value,
    ) -> Result<TemplateId, EcsError> {
        self.templates.load(name, doc, &self.components)
    }

    /// Parse `source` as a JSON template document and store it under `name`.
    pub fn template_load_str(&mut self, name: &str, source: &str) -> Result<TemplateId, EcsError> {
        let doc: serde_json::Value =
            serde_json::from_str(source).map_err(|e| EcsError::TemplateParse {
                template: name.to_owned(),
                details: e.to_string(),
            })?;
        self.template_load(name, &doc)
    }

    /// The template registry.
    pub fn templates(&self) -> &TemplateRegistry {
        &self.templates
    }

    // -- lists --------------------------------------------------------------

    fn move_to(&mut self, entity: EntityId, list: Lifecycle) {
        let Some(rec) = self.entities.get_mut(entity) else {
            return;
        };

        let from = rec.list;
        rec.list = list;
        rec.list_stamp = rec.list_stamp.wrapping_add(1);

        if list.is_queue() {
            self.queues[list.slot()].push((entity, rec.list_stamp));
        }

        if rec.debug {
            tracing::debug!(entity = %entity, name = %rec.name, ?from, to = ?list, "entity moved");
        } else {
            tracing::trace!(entity = %entity, ?from, to = ?list, "entity moved");
        }
    }

    /// Drain queue `list`, keeping only entries that still describe the
    /// entity's current position.
    fn take_queue(&mut self, list: Lifecycle) -> Vec<EntityId> {
        let queue = mem::take(&mut self.queues[list.slot()]);
        queue
            .into_iter()
            .filter(|&(entity, stamp)| {
                self.entities
                    .get(entity)
                    .is_some_and(|rec| rec.list == list && rec.list_stamp == stamp)
            })
            .map(|(entity, _)| entity)
            .collect()
    }

    fn record_mut(&mut self, entity: EntityId) -> Result<&mut EntityRecord, EcsError> {
        self.entities
            .get_mut(entity)
            .ok_or(EcsError::StaleEntity { entity })
    }

    /// Take `entity` out of every system list it sits in.
    fn leave_systems(&mut self, entity: EntityId) {
        let Some(rec) = self.entities.get_mut(entity) else {
            return;
        };
        for node in rec.nodes_active.drain(..).chain(rec.nodes_either.drain(..)) {
            self.systems
                .get_mut(node.system, "flush")
                .vacate(node.slot, entity);
        }
    }

    /// Append `entity` to every only-active system it matches and is not
    /// already a member of.
    fn join_active_systems(&mut self, entity: EntityId) {
        let Some(rec) = self.entities.get_mut(entity) else {
            return;
        };
        for &system in &rec.matching_active {
            if rec.nodes_active.iter().any(|n| n.system == system) {
                continue;
            }
            let slot = self.systems.get_mut(system, "tick").push(entity);
            rec.nodes_active.push(SystemNode { system, slot });
        }
    }

    fn join_either_systems(&mut self, entity: EntityId) {
        let Some(rec) = self.entities.get_mut(entity) else {
            return;
        };
        for &system in &rec.matching_either {
            if rec.nodes_either.iter().any(|n| n.system == system) {
                continue;
            }
            let slot = self.systems.get_mut(system, "tick").push(entity);
            rec.nodes_either.push(SystemNode { system, slot });
        }
    }

    fn destroy(&mut self, entity: EntityId) {
        let Some(mut rec) = self.entities.take(entity) else {
            return;
        };

        for instance in rec.components.iter_mut().flatten() {
            if let Some(kind) = self.components.try_get(instance.kind()) {
                kind.release(instance.value.as_mut());
            }
        }
        self.allocator.deallocate(entity);
        if let Some(collection) = rec.collection {
            self.collections.forget(collection, entity);
        }

        if rec.debug {
            tracing::debug!(entity = %entity, name = %rec.name, "entity destroyed");
        }
    }

    // -- scheduler ----------------------------------------------------------

    /// Apply queued mutes and removals, and destroy entities whose removal
    /// is final.
    pub fn flush(&mut self) {
        for entity in self.take_queue(Lifecycle::MutedQueue) {
            self.leave_systems(entity);
            self.move_to(entity, Lifecycle::Default);
        }

        for entity in self.take_queue(Lifecycle::RemovedQueue) {
            self.leave_systems(entity);
            let referenced = self
                .entities
                .get(entity)
                .is_some_and(|rec| rec.references > 0);
            let list = if referenced {
                Lifecycle::RemovedLimbo
            } else {
                Lifecycle::RemovedFree
            };
            self.move_to(entity, list);
        }

        for entity in self.take_queue(Lifecycle::RemovedFree) {
            self.destroy(entity);
        }
    }

    /// Advance the scheduler one step: flush, match new entities against the
    /// declared systems, insert matched and unmuted entities into system
    /// lists, then bump the tick counter.
    pub fn tick(&mut self) {
        self.flush();

        for entity in self.take_queue(Lifecycle::New) {
            if let Some(rec) = self.entities.get_mut(entity) {
                for (id, system) in self.systems.iter() {
                    if !rec.component_bits.test_mask(system.requirements()) {
                        continue;
                    }
                    if system.only_active() {
                        rec.matching_active.push(id);
                    } else {
                        rec.matching_either.push(id);
                    }
                }
            }
            self.move_to(entity, Lifecycle::Restore);
        }

        for entity in self.take_queue(Lifecycle::Restore) {
            let active = self.entity_active_get(entity);
            let Some(rec) = self.entities.get_mut(entity) else {
                continue;
            };

            if rec.mute_count == 0 {
                if !rec.evicted || active {
                    rec.evicted = false;
                    self.join_active_systems(entity);
                }
                self.join_either_systems(entity);
            } else {
                // Muted again after an unmute that kept its memberships.
                self.leave_systems(entity);
            }
            self.move_to(entity, Lifecycle::Default);
        }

        self.ticks += 1;
    }

    /// Number of completed ticks.
    pub fn tick_count(&self) -> u64 {
        self.ticks
    }

    /// Call `system`'s handler once per member, then flush.
    ///
    /// Sorted systems are reordered first. Members of an only-active system
    /// that are inactive or muted are evicted instead of dispatched. Entities
    /// appended to the list while the run is in progress are visited too.
    ///
    /// # Panics
    ///
    /// Panics if `system` is not declared or is already running.
    pub fn system_run(&mut self, system: SystemId) {
        let kind = self.systems.get_mut(system, "system_run");
        let Some(mut handler) = kind.handler.take() else {
            panic!("system_run({system}): system is already running");
        };
        let only_active = kind.only_active;

        self.prepare_run(system);

        let mut slot = 0;
        loop {
            let Some(&entry) = self.systems.get(system, "system_run").entities.get(slot) else {
                break;
            };
            slot += 1;
            let Some(entity) = entry else {
                continue;
            };

            if only_active && (!self.entity_active_get(entity) || self.entity_mute_get(entity)) {
                self.evict(system, slot - 1, entity);
            } else {
                handler(self, entity);
            }
        }

        self.systems.get_mut(system, "system_run").handler = Some(handler);
        self.flush();
    }

    /// Compact and sort `system`'s list, then re-record every member's slot.
    fn prepare_run(&mut self, system: SystemId) {
        let kind = self.systems.get_mut(system, "system_run");
        let mut moved = kind.compact();

        if let Some(compare) = kind.compare.take() {
            let mut members: Vec<EntityId> = kind.entities().collect();
            let world: &World = self;
            members.sort_by(|&a, &b| compare(world, a, b));

            let kind = self.systems.get_mut(system, "system_run");
            kind.entities = members.into_iter().map(Some).collect();
            kind.compare = Some(compare);
            moved = true;
        }

        if !moved {
            return;
        }

        let kind = self.systems.get(system, "system_run");
        for (slot, entity) in kind.entities.iter().enumerate() {
            let Some(rec) = entity.and_then(|e| self.entities.get_mut(e)) else {
                continue;
            };
            let nodes = if kind.only_active {
                &mut rec.nodes_active
            } else {
                &mut rec.nodes_either
            };
            if let Some(node) = nodes.iter_mut().find(|n| n.system == system) {
                node.slot = slot;
            }
        }
    }

    fn evict(&mut self, system: SystemId, slot: usize, entity: EntityId) {
        self.systems
            .get_mut(system, "system_run")
            .vacate(slot, entity);

        if let Some(rec) = self.entities.get_mut(entity) {
            rec.nodes_active.retain(|n| n.system != system);
            rec.evicted = true;
            if rec.debug {
                tracing::debug!(entity = %entity, name = %rec.name, system = %system, "evicted inactive entity");
            }
        }
    }

    // -- entity creation ----------------------------------------------------

    /// Create an empty entity in the `New` list.
    ///
    /// # Panics
    ///
    /// Panics if the world is uninitialised.
    pub fn entity_new(&mut self, name: Option<&str>, context: Option<EntityContext>) -> EntityId {
        assert!(self.is_initialized(), "entity_new: call init first");

        let id = self.allocator.allocate();
        let mut rec = EntityRecord::new(
            id,
            name.unwrap_or_default().to_owned(),
            context,
            self.components.len(),
        );
        rec.collection = self.collections.record(id);
        self.queues[Lifecycle::New.slot()].push((id, rec.list_stamp));
        self.entities.insert(rec);

        tracing::trace!(entity = %id, name = name.unwrap_or_default(), "entity created");
        id
    }

    /// Create an entity named after `template`, with one instance of every
    /// kind the template lists. Kinds with shared data are constructed from
    /// the template's data and `init_context`.
    ///
    /// # Panics
    ///
    /// Panics if no template is loaded under `template`.
    pub fn entity_new_from_template(
        &mut self,
        template: &str,
        init_context: Option<&dyn Any>,
        context: Option<EntityContext>,
    ) -> EntityId {
        let Some(template_id) = self.templates.lookup(template) else {
            panic!("entity_new_from_template: unknown template '{template}'");
        };

        let id = self.entity_new(Some(template), context);
        let def = self.templates.get(template_id);
        let Some(rec) = self.entities.get_mut(id) else {
            return id;
        };
        rec.template = Some(template_id);

        for &component in def.components() {
            let kind = self.components.get(component, "entity_new_from_template");
            let value = kind.construct(def.data(component), init_context);
            rec.components[component.index()] = Some(ComponentInstance::new(id, component, value));
            rec.component_bits.set(component.index());
        }

        id
    }

    // -- entity inspection --------------------------------------------------

    /// The record of a live (not yet destroyed) entity.
    pub fn entity(&self, entity: EntityId) -> Option<&EntityRecord> {
        self.entities.get(entity)
    }

    /// Whether `entity` has not been destroyed yet.
    pub fn is_alive(&self, entity: EntityId) -> bool {
        self.entities.get(entity).is_some()
    }

    /// The entity's string identifier.
    pub fn entity_id(&self, entity: EntityId) -> Option<&str> {
        self.entities.get(entity).map(|rec| rec.name.as_str())
    }

    /// The context the entity was created with.
    pub fn entity_context(&self, entity: EntityId) -> Option<&EntityContext> {
        self.entities.get(entity)?.context.as_ref()
    }

    /// Log this entity's list moves at `debug` level instead of `trace`.
    pub fn entity_debug_set(&mut self, entity: EntityId, debug: bool) -> Result<(), EcsError> {
        self.record_mut(entity)?.debug = debug;
        Ok(())
    }

    /// Coarse destruction state; [`EntityState::Freed`] for stale ids.
    pub fn entity_state(&self, entity: EntityId) -> EntityState {
        self.entities
            .get(entity)
            .map_or(EntityState::Freed, EntityRecord::state)
    }

    /// The collection `entity` was created in.
    pub fn entity_collection(&self, entity: EntityId) -> Option<CollectionId> {
        self.entities.get(entity)?.collection
    }

    // -- parents ------------------------------------------------------------

    /// The entity's parent, if set and still alive.
    pub fn entity_parent(&self, entity: EntityId) -> Option<EntityId> {
        self.entities
            .get(entity)?
            .parent
            .filter(|&p| self.is_alive(p))
    }

    /// Set or clear the entity's parent. The parent is not owned.
    pub fn entity_parent_set(
        &mut self,
        entity: EntityId,
        parent: Option<EntityId>,
    ) -> Result<(), EcsError> {
        if let Some(p) = parent {
            if !self.is_alive(p) {
                return Err(EcsError::StaleEntity { entity: p });
            }
        }
        self.record_mut(entity)?.parent = parent;
        Ok(())
    }

    /// Whether `ancestor` appears anywhere on `entity`'s parent chain.
    pub fn entity_parent_has(&self, entity: EntityId, ancestor: EntityId) -> bool {
        let mut current = self.entity_parent(entity);
        let mut steps = 0;
        while let Some(p) = current {
            if p == ancestor {
                return true;
            }
            steps += 1;
            if steps > self.entities.slots.len() {
                tracing::warn!(entity = %entity, "parent chain has a cycle");
                return false;
            }
            current = self.entity_parent(p);
        }
        false
    }

    // -- references ---------------------------------------------------------

    /// Record one more outstanding reference to `entity`.
    pub fn entity_ref_inc(&mut self, entity: EntityId) -> Result<(), EcsError> {
        self.record_mut(entity)?.references += 1;
        Ok(())
    }

    /// Drop a reference. A removed entity whose count reaches zero is
    /// destroyed at the next flush.
    ///
    /// # Panics
    ///
    /// Panics if the count is already zero.
    pub fn entity_ref_dec(&mut self, entity: EntityId) -> Result<(), EcsError> {
        let shutting_down = self.shutting_down;
        let rec = self.record_mut(entity)?;
        if rec.references == 0 {
            panic!(
                "entity_ref_dec({}): reference count is already zero",
                rec.name
            );
        }
        rec.references -= 1;

        if rec.references == 0 && rec.list == Lifecycle::RemovedLimbo && !shutting_down {
            self.move_to(entity, Lifecycle::RemovedFree);
        }
        Ok(())
    }

    // -- removal ------------------------------------------------------------

    /// Whether removal was requested. Destroyed entities report `true`.
    pub fn entity_remove_get(&self, entity: EntityId) -> bool {
        self.entities.get(entity).map_or(true, |rec| rec.removed)
    }

    /// Request removal. Idempotent; takes effect at the next flush.
    pub fn entity_remove_set(&mut self, entity: EntityId) -> Result<(), EcsError> {
        let rec = self.record_mut(entity)?;
        if rec.removed {
            return Ok(());
        }
        rec.removed = true;
        self.move_to(entity, Lifecycle::RemovedQueue);
        Ok(())
    }

    // -- activity -----------------------------------------------------------

    /// Whether the entity is permanently active or was marked active during
    /// the current or previous tick.
    pub fn entity_active_get(&self, entity: EntityId) -> bool {
        self.entities.get(entity).is_some_and(|rec| {
            rec.active_permanent || rec.last_active.is_some_and(|t| t + 1 >= self.ticks)
        })
    }

    /// Mark the entity active for this frame. An entity evicted from its
    /// only-active systems rejoins them right away when it sits in `Default`
    /// unmuted; otherwise it stays evicted until the restore phase or a later
    /// call.
    pub fn entity_active_set(&mut self, entity: EntityId) -> Result<(), EcsError> {
        let ticks = self.ticks;
        let rec = self.record_mut(entity)?;
        rec.last_active = Some(ticks);

        if rec.evicted && rec.list == Lifecycle::Default && rec.mute_count == 0 && !rec.removed {
            rec.evicted = false;
            self.join_active_systems(entity);
        }
        Ok(())
    }

    /// Make the entity active for the rest of its life.
    pub fn entity_active_set_permanent(&mut self, entity: EntityId) -> Result<(), EcsError> {
        self.record_mut(entity)?.active_permanent = true;
        self.entity_active_set(entity)
    }

    // -- muting -------------------------------------------------------------

    /// Whether the entity is muted.
    pub fn entity_mute_get(&self, entity: EntityId) -> bool {
        self.entities
            .get(entity)
            .is_some_and(|rec| rec.mute_count > 0)
    }

    /// Increment the mute counter. The first mute takes the entity out of
    /// every system at the next flush.
    pub fn entity_mute_inc(&mut self, entity: EntityId) -> Result<(), EcsError> {
        let rec = self.record_mut(entity)?;
        rec.mute_count += 1;

        if rec.mute_count == 1 && !rec.removed && rec.list == Lifecycle::Default {
            self.move_to(entity, Lifecycle::MutedQueue);
        }
        Ok(())
    }

    /// Decrement the mute counter. The last unmute puts the entity back into
    /// its systems at the next tick.
    ///
    /// # Panics
    ///
    /// Panics if the entity is not muted.
    pub fn entity_mute_dec(&mut self, entity: EntityId) -> Result<(), EcsError> {
        let rec = self.record_mut(entity)?;
        if rec.mute_count == 0 {
            panic!("entity_mute_dec({}): entity is not muted", rec.name);
        }
        rec.mute_count -= 1;

        let list = rec.list;
        let evicted = rec.evicted;
        if rec.mute_count == 0 && !rec.removed {
            match list {
                // Never left its systems, except the ones it was evicted from.
                Lifecycle::MutedQueue if evicted => self.move_to(entity, Lifecycle::Restore),
                Lifecycle::MutedQueue => self.move_to(entity, Lifecycle::Default),
                Lifecycle::Default => self.move_to(entity, Lifecycle::Restore),
                _ => {}
            }
        }
        Ok(())
    }

    // -- components ---------------------------------------------------------

    /// Add a default-constructed instance of `component` and return it.
    ///
    /// # Panics
    ///
    /// Panics if the entity already left the `New` list, already has the
    /// component, or `T` is not the kind's type.
    pub fn entity_component_add<T: 'static>(
        &mut self,
        entity: EntityId,
        component: ComponentId,
    ) -> Result<&mut T, EcsError> {
        let kind = self.components.get(component, "entity_component_add");
        let rec = self
            .entities
            .get_mut(entity)
            .ok_or(EcsError::StaleEntity { entity })?;

        if rec.list != Lifecycle::New {
            panic!(
                "entity_component_add({}, {}): too late to add a component",
                rec.name,
                kind.name()
            );
        }
        if rec.component_bits.test(component.index()) {
            panic!(
                "entity_component_add({}, {}): component already added",
                rec.name,
                kind.name()
            );
        }

        let value = kind.construct(None, None);
        rec.component_bits.set(component.index());
        let instance = rec.components[component.index()]
            .insert(ComponentInstance::new(entity, component, value));
        Ok(typed_mut::<T>(instance, kind))
    }

    /// Whether the entity has `component`.
    pub fn entity_component_has(&self, entity: EntityId, component: ComponentId) -> bool {
        self.entities
            .get(entity)
            .is_some_and(|rec| rec.component_bits.test(component.index()))
    }

    /// The untyped instance, with its header.
    pub fn entity_component_instance(
        &self,
        entity: EntityId,
        component: ComponentId,
    ) -> Option<&ComponentInstance> {
        self.entities
            .get(entity)?
            .components
            .get(component.index())?
            .as_ref()
    }

    /// Typed read access, or `None` if the entity lacks the component.
    pub fn entity_component<T: 'static>(
        &self,
        entity: EntityId,
        component: ComponentId,
    ) -> Option<&T> {
        let kind = self.components.get(component, "entity_component");
        self.entity_component_instance(entity, component)
            .map(|instance| typed::<T>(instance, kind))
    }

    /// Typed write access, or `None` if the entity lacks the component.
    pub fn entity_component_mut<T: 'static>(
        &mut self,
        entity: EntityId,
        component: ComponentId,
    ) -> Option<&mut T> {
        let kind = self.components.get(component, "entity_component_mut");
        self.entities
            .get_mut(entity)?
            .components
            .get_mut(component.index())?
            .as_mut()
            .map(|instance| typed_mut::<T>(instance, kind))
    }

    /// Typed read access to a component the caller knows is present.
    ///
    /// # Panics
    ///
    /// Panics if the entity is stale or lacks the component.
    pub fn entity_component_req<T: 'static>(&self, entity: EntityId, component: ComponentId) -> &T {
        match self.entity_component::<T>(entity, component) {
            Some(value) => value,
            None => panic!(
                "entity_component_req({}, {}): missing required component",
                self.entity_id(entity).unwrap_or("<stale>"),
                self.components.get(component, "entity_component_req").name()
            ),
        }
    }

    /// Mutable counterpart of [`entity_component_req`](Self::entity_component_req).
    pub fn entity_component_req_mut<T: 'static>(
        &mut self,
        entity: EntityId,
        component: ComponentId,
    ) -> &mut T {
        if !self.entity_component_has(entity, component) {
            panic!(
                "entity_component_req({}, {}): missing required component",
                self.entity_id(entity).unwrap_or("<stale>"),
                self.components.get(component, "entity_component_req").name()
            );
        }
        match self.entity_component_mut::<T>(entity, component) {
            Some(value) => value,
            None => unreachable!("component presence checked above"),
        }
    }

    /// Shared template data for `component`, if the entity was built from a
    /// template that supplied a blob for it.
    pub fn component_data<D: 'static>(&self, entity: EntityId, component: ComponentId) -> Option<&D> {
        let template = self.entities.get(entity)?.template?;
        self.templates
            .get(template)
            .data(component)?
            .downcast_ref::<D>()
    }

    // -- collections --------------------------------------------------------

    /// The collection new entities are recorded in.
    pub fn collection_get(&self) -> Option<CollectionId> {
        self.collections.current()
    }

    /// Make `id` the collection new entities are recorded in.
    pub fn collection_set(&mut self, id: Option<CollectionId>) {
        self.collections.set_current(id);
    }

    /// Look up a collection.
    pub fn collection(&self, id: CollectionId) -> Option<&Collection> {
        self.collections.get(id)
    }

    /// Open a fresh collection. Live entities of the covered collection are
    /// muted until the matching [`collection_pop`](Self::collection_pop).
    pub fn collection_push(&mut self) -> CollectionId {
        let (covered, fresh) = self.collections.push();

        if let Some(covered) = covered {
            let members: Vec<EntityId> = self
                .collections
                .get(covered)
                .map(|c| c.entities().to_vec())
                .unwrap_or_default();

            let mut muted = Vec::new();
            for entity in members {
                if self.entity_mute_inc(entity).is_ok() {
                    muted.push(entity);
                }
            }
            tracing::debug!(collection = ?covered, muted = muted.len(), "collection covered");

            if let Some(c) = self.collections.get_mut(covered) {
                c.muted = muted;
            }
        }

        fresh
    }

    /// Close the current collection, requesting removal of every entity it
    /// recorded, and unmute the entities of the collection it covered.
    pub fn collection_pop(&mut self) {
        let (discarded, restored) = self.collections.pop();

        if let Some(discarded) = discarded {
            for &entity in discarded.entities() {
                // The slot may be reused by a later push.
                if let Some(rec) = self.entities.get_mut(entity) {
                    rec.collection = None;
                }
                let _ = self.entity_remove_set(entity);
            }
        }

        if let Some(restored) = restored {
            let muted = self
                .collections
                .get_mut(restored)
                .map(|c| mem::take(&mut c.muted))
                .unwrap_or_default();
            for entity in muted {
                if self.entity_mute_get(entity) {
                    let _ = self.entity_mute_dec(entity);
                }
            }
        }
    }

    // -- diagnostics --------------------------------------------------------

    /// Entities not yet destroyed.
    pub fn entity_count(&self) -> usize {
        self.allocator.alive_count()
    }

    /// Entities currently in `list`.
    pub fn list_len(&self, list: Lifecycle) -> usize {
        self.entities.iter().filter(|rec| rec.list == list).count()
    }

    /// Members of `system`.
    pub fn system_len(&self, system: SystemId) -> usize {
        self.systems.get(system, "system_len").len()
    }

    /// Members of `system`, in list order.
    pub fn system_entities(&self, system: SystemId) -> Vec<EntityId> {
        self.systems.get(system, "system_entities").entities().collect()
    }

    /// A declared system.
    pub fn system(&self, system: SystemId) -> &SystemKind {
        self.systems.get(system, "system")
    }
}

impl Drop for World {
    fn drop(&mut self) {
        self.shutdown();
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::{Cell, RefCell};
    use std::rc::Rc;

    #[derive(Debug, Default, Clone, PartialEq)]
    struct Tag(u32);

    const TAG: ComponentId = ComponentId(0);
    const OTHER: ComponentId = ComponentId(1);
    const EITHER: SystemId = SystemId(0);
    const ACTIVE: SystemId = SystemId(1);

    fn world() -> World {
        let mut world = World::with_capacity(2, 2);
        world.component_new(TAG, ComponentKind::new::<Tag>("tag"));
        world.component_new(OTHER, ComponentKind::new::<u8>("other"));
        world
    }

    fn spawn(world: &mut World, name: &str) -> EntityId {
        let e = world.entity_new(Some(name), None);
        world.entity_component_add::<Tag>(e, TAG).unwrap();
        e
    }

    #[test]
    fn new_entity_waits_for_tick() {
        let mut world = world();
        world.system_new(EITHER, |_, _| {}, false);
        world.system_add(EITHER, TAG);

        let e = spawn(&mut world, "a");
        assert_eq!(world.entity(e).unwrap().list(), Lifecycle::New);
        assert_eq!(world.system_len(EITHER), 0);

        world.tick();
        assert_eq!(world.entity(e).unwrap().list(), Lifecycle::Default);
        assert_eq!(world.system_entities(EITHER), vec![e]);
        assert_eq!(world.tick_count(), 1);
    }

    #[test]
    fn entity_without_required_component_is_not_matched() {
        let mut world = world();
        world.system_new(EITHER, |_, _| {}, false);
        world.system_add(EITHER, TAG);
        world.system_add(EITHER, OTHER);

        let e = spawn(&mut world, "a");
        world.tick();
        assert!(!world.entity(e).unwrap().in_system(EITHER));
    }

    #[test]
    fn removal_is_deferred_to_flush() {
        let mut world = world();
        world.system_new(EITHER, |_, _| {}, false);
        let e = spawn(&mut world, "a");
        world.tick();

        world.entity_remove_set(e).unwrap();
        world.entity_remove_set(e).unwrap();
        assert_eq!(world.entity_state(e), EntityState::PendingRemoval);
        assert_eq!(world.system_len(EITHER), 1);

        world.flush();
        assert!(!world.is_alive(e));
        assert_eq!(world.entity_state(e), EntityState::Freed);
        assert_eq!(world.system_len(EITHER), 0);
    }

    #[test]
    fn referenced_entity_waits_in_limbo() {
        let mut world = world();
        let e = spawn(&mut world, "a");
        world.tick();

        world.entity_ref_inc(e).unwrap();
        world.entity_remove_set(e).unwrap();
        world.tick();
        assert_eq!(world.entity_state(e), EntityState::Limbo);

        world.entity_ref_dec(e).unwrap();
        assert_eq!(world.entity(e).unwrap().list(), Lifecycle::RemovedFree);
        world.tick();
        assert!(!world.is_alive(e));
    }

    #[test]
    #[should_panic(expected = "already zero")]
    fn ref_dec_below_zero_panics() {
        let mut world = world();
        let e = spawn(&mut world, "a");
        let _ = world.entity_ref_dec(e);
    }

    #[test]
    #[should_panic(expected = "too late")]
    fn component_add_after_tick_panics() {
        let mut world = world();
        let e = spawn(&mut world, "a");
        world.tick();
        let _ = world.entity_component_add::<u8>(e, OTHER);
    }

    #[test]
    #[should_panic(expected = "already added")]
    fn duplicate_component_panics() {
        let mut world = world();
        let e = spawn(&mut world, "a");
        let _ = world.entity_component_add::<Tag>(e, TAG);
    }

    #[test]
    fn stale_handles_are_reported() {
        let mut world = world();
        let e = spawn(&mut world, "a");
        world.entity_remove_set(e).unwrap();
        world.flush();

        assert!(matches!(
            world.entity_mute_inc(e),
            Err(EcsError::StaleEntity { .. })
        ));
        assert!(world.entity_component::<Tag>(e, TAG).is_none());
        assert!(world.entity_remove_get(e));

        let recycled = world.entity_new(None, None);
        assert_eq!(recycled.index(), e.index());
        assert!(world.entity(e).is_none());
    }

    #[test]
    fn mute_and_unmute_keep_components() {
        let mut world = world();
        world.system_new(EITHER, |_, _| {}, false);
        let e = spawn(&mut world, "a");
        world.tick();
        *world.entity_component_mut::<Tag>(e, TAG).unwrap() = Tag(9);

        world.entity_mute_inc(e).unwrap();
        world.entity_mute_inc(e).unwrap();
        world.flush();
        assert_eq!(world.system_len(EITHER), 0);

        world.entity_mute_dec(e).unwrap();
        world.tick();
        assert_eq!(world.system_len(EITHER), 0);

        world.entity_mute_dec(e).unwrap();
        world.tick();
        assert_eq!(world.system_entities(EITHER), vec![e]);
        assert_eq!(world.entity_component::<Tag>(e, TAG), Some(&Tag(9)));
    }

    #[test]
    fn unmute_before_flush_does_not_duplicate_membership() {
        let mut world = world();
        world.system_new(EITHER, |_, _| {}, false);
        let e = spawn(&mut world, "a");
        world.tick();

        world.entity_mute_inc(e).unwrap();
        world.entity_mute_dec(e).unwrap();
        world.tick();
        world.tick();
        assert_eq!(world.system_len(EITHER), 1);
    }

    #[test]
    fn only_active_system_evicts_and_readmits() {
        let mut world = world();
        let seen = Rc::new(RefCell::new(Vec::new()));
        let log = Rc::clone(&seen);
        world.system_new(ACTIVE, move |_, e| log.borrow_mut().push(e), true);

        let e = spawn(&mut world, "a");
        world.entity_active_set(e).unwrap();
        world.tick();
        world.system_run(ACTIVE);
        assert_eq!(seen.borrow().len(), 1);

        // Stamp expires after the following tick.
        world.tick();
        world.tick();
        world.system_run(ACTIVE);
        assert_eq!(seen.borrow().len(), 1);
        assert_eq!(world.system_len(ACTIVE), 0);

        world.entity_active_set(e).unwrap();
        assert_eq!(world.system_len(ACTIVE), 1);
        world.system_run(ACTIVE);
        assert_eq!(seen.borrow().len(), 2);
    }

    #[test]
    fn activity_marked_while_muted_still_readmits_evicted_entity() {
        let mut world = world();
        world.system_new(ACTIVE, |_, _| {}, true);

        let e = spawn(&mut world, "a");
        for _ in 0..3 {
            world.tick();
        }
        world.system_run(ACTIVE);
        assert_eq!(world.system_len(ACTIVE), 0);

        // Mute is still queued when activity is marked.
        world.entity_mute_inc(e).unwrap();
        world.entity_active_set(e).unwrap();
        assert_eq!(world.system_len(ACTIVE), 0);
        world.entity_mute_dec(e).unwrap();

        world.tick();
        assert!(world.entity_active_get(e));
        assert!(!world.entity_mute_get(e));
        assert_eq!(world.system_entities(ACTIVE), vec![e]);

        world.entity_active_set(e).unwrap();
        world.tick();
        assert_eq!(world.system_len(ACTIVE), 1);
    }

    #[test]
    fn remute_before_restore_leaves_every_system() {
        let mut world = world();
        world.system_new(EITHER, |_, _| {}, false);
        world.system_new(ACTIVE, |_, _| {}, true);

        let e = spawn(&mut world, "a");
        for _ in 0..3 {
            world.tick();
        }
        world.system_run(ACTIVE);
        assert_eq!(world.system_len(ACTIVE), 0);

        world.entity_mute_inc(e).unwrap();
        world.entity_mute_dec(e).unwrap();
        world.entity_mute_inc(e).unwrap();
        assert_eq!(world.system_entities(EITHER), vec![e]);

        world.tick();
        assert!(world.entity_mute_get(e));
        assert_eq!(world.system_len(EITHER), 0);
        assert_eq!(world.system_len(ACTIVE), 0);

        world.entity_active_set(e).unwrap();
        world.entity_mute_dec(e).unwrap();
        world.tick();
        assert_eq!(world.system_entities(EITHER), vec![e]);
        assert_eq!(world.system_entities(ACTIVE), vec![e]);
    }

    #[test]
    fn evicted_entity_unmuted_while_idle_waits_for_activity() {
        let mut world = world();
        world.system_new(ACTIVE, |_, _| {}, true);

        let e = spawn(&mut world, "a");
        world.tick();
        world.tick();
        world.system_run(ACTIVE);

        world.entity_mute_inc(e).unwrap();
        world.entity_mute_dec(e).unwrap();
        world.tick();
        assert_eq!(world.system_len(ACTIVE), 0);

        world.entity_active_set(e).unwrap();
        assert_eq!(world.system_entities(ACTIVE), vec![e]);
    }

    #[test]
    fn mute_cycle_never_reconstructs_components() {
        let built = Rc::new(Cell::new(0));
        let freed = Rc::new(Cell::new(0));
        let mut world = World::with_capacity(1, 1);
        let counter = Rc::clone(&built);
        let released = Rc::clone(&freed);
        world.component_new(
            TAG,
            ComponentKind::with_init("tag", move || {
                counter.set(counter.get() + 1);
                Tag(7)
            })
            .on_free(move |_: &mut Tag| released.set(released.get() + 1)),
        );
        world.system_new(EITHER, |_, _| {}, false);

        let e = spawn(&mut world, "a");
        world.tick();
        for _ in 0..3 {
            world.entity_mute_inc(e).unwrap();
            world.tick();
            assert_eq!(world.system_len(EITHER), 0);
            world.entity_mute_dec(e).unwrap();
            world.tick();
            assert_eq!(world.system_entities(EITHER), vec![e]);
        }

        assert_eq!(built.get(), 1);
        assert_eq!(freed.get(), 0);
        assert_eq!(world.entity_component::<Tag>(e, TAG), Some(&Tag(7)));
    }

    #[test]
    fn permanent_activity_never_expires() {
        let mut world = world();
        world.system_new(ACTIVE, |_, _| {}, true);
        let e = spawn(&mut world, "a");
        world.entity_active_set_permanent(e).unwrap();
        for _ in 0..5 {
            world.tick();
        }
        assert!(world.entity_active_get(e));
        world.system_run(ACTIVE);
        assert_eq!(world.system_len(ACTIVE), 1);
    }

    #[test]
    fn sorted_system_runs_in_comparator_order() {
        let mut world = world();
        let order = Rc::new(RefCell::new(Vec::new()));
        let log = Rc::clone(&order);
        world.system_new_sorted(
            EITHER,
            move |w, e| log.borrow_mut().push(w.entity_component_req::<Tag>(e, TAG).0),
            |w, a, b| {
                let ta = w.entity_component_req::<Tag>(a, TAG).0;
                let tb = w.entity_component_req::<Tag>(b, TAG).0;
                tb.cmp(&ta)
            },
            false,
        );
        for n in [2, 7, 4] {
            let e = world.entity_new(None, None);
            world.entity_component_add::<Tag>(e, TAG).unwrap().0 = n;
        }
        world.tick();
        world.system_run(EITHER);
        assert_eq!(*order.borrow(), vec![7, 4, 2]);
    }

    #[test]
    fn handler_removal_of_later_member_skips_it() {
        let mut world = world();
        let visits = Rc::new(Cell::new(0));
        let count = Rc::clone(&visits);
        world.system_new(
            EITHER,
            move |w, e| {
                count.set(count.get() + 1);
                for other in w.system_entities(EITHER) {
                    if other != e {
                        w.entity_remove_set(other).unwrap();
                        w.flush();
                    }
                }
            },
            false,
        );
        spawn(&mut world, "a");
        spawn(&mut world, "b");
        world.tick();
        world.system_run(EITHER);
        assert_eq!(visits.get(), 1);
        assert_eq!(world.entity_count(), 1);
    }

    #[test]
    #[should_panic(expected = "already running")]
    fn nested_run_of_same_system_panics() {
        let mut world = world();
        world.system_new(EITHER, |w, _| w.system_run(EITHER), false);
        spawn(&mut world, "a");
        world.tick();
        world.system_run(EITHER);
    }

    #[test]
    fn parent_chain() {
        let mut world = world();
        let root = spawn(&mut world, "root");
        let mid = spawn(&mut world, "mid");
        let leaf = spawn(&mut world, "leaf");
        world.entity_parent_set(mid, Some(root)).unwrap();
        world.entity_parent_set(leaf, Some(mid)).unwrap();

        assert_eq!(world.entity_parent(leaf), Some(mid));
        assert!(world.entity_parent_has(leaf, root));
        assert!(!world.entity_parent_has(root, leaf));

        world.entity_parent_set(root, Some(leaf)).unwrap();
        let stranger = world.entity_new(None, None);
        assert!(!world.entity_parent_has(leaf, stranger));
    }

    #[test]
    fn shutdown_runs_destructors() {
        let freed = Rc::new(Cell::new(0));
        let counter = Rc::clone(&freed);
        let mut world = World::with_capacity(1, 0);
        world.component_new(
            TAG,
            ComponentKind::new::<Tag>("tag").on_free(move |_: &mut Tag| counter.set(counter.get() + 1)),
        );
        for _ in 0..3 {
            let e = world.entity_new(None, None);
            world.entity_component_add::<Tag>(e, TAG).unwrap();
        }
        world.tick();
        world.shutdown();
        assert_eq!(freed.get(), 3);
        assert!(!world.is_initialized());
    }

    #[test]
    fn collections_mute_covered_and_remove_popped() {
        let mut world = world();
        world.system_new(EITHER, |_, _| {}, false);

        world.collection_push();
        let menu = spawn(&mut world, "menu");
        world.tick();

        world.collection_push();
        let game = spawn(&mut world, "game");
        world.tick();
        assert!(world.entity_mute_get(menu));
        assert_eq!(world.system_entities(EITHER), vec![game]);

        world.collection_pop();
        world.tick();
        assert!(!world.is_alive(game));
        assert!(!world.entity_mute_get(menu));
        assert_eq!(world.system_entities(EITHER), vec![menu]);
    }

    #[test]
    fn destroyed_entities_leave_their_collection() {
        let mut world = world();
        let level = world.collection_push();

        for i in 0..1000 {
            let e = spawn(&mut world, "spark");
            if i == 999 {
                break;
            }
            world.entity_remove_set(e).unwrap();
            world.tick();
        }

        assert_eq!(world.entity_count(), 1);
        assert_eq!(world.collection(level).unwrap().entities().len(), 1);
    }

    #[test]
    fn limbo_entity_detaches_from_popped_collection() {
        let mut world = world();
        world.collection_push();
        let held = spawn(&mut world, "held");
        world.entity_ref_inc(held).unwrap();
        world.tick();

        world.collection_pop();
        let reused = world.collection_push();
        world.tick();
        assert!(world.is_alive(held));
        assert_eq!(world.entity_collection(held), None);

        world.entity_ref_dec(held).unwrap();
        world.tick();
        assert!(!world.is_alive(held));
        assert!(world.collection(reused).unwrap().entities().is_empty());
    }
}
