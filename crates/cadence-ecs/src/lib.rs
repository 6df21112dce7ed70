//! Cadence ECS -- deferred-update Entity Component System with frame-scoped
//! activity.
//!
//! Component kinds and systems are declared up front at caller-chosen dense
//! indices. Entities carry one optional instance per kind and are matched to
//! systems by a required-components bitmask. Every structural change
//! (creation, removal, muting) is deferred to the scheduler's tick and flush
//! points, so a system walking its entity list never observes it changing
//! underneath it.
//!
//! # Quick Start
//!
//! ```
//! use cadence_ecs::prelude::*;
//!
//! #[derive(Debug, Default, Clone, PartialEq)]
//! struct Position { x: i32, y: i32 }
//!
//! #[derive(Debug, Default, Clone, PartialEq)]
//! struct Velocity { dx: i32, dy: i32 }
//!
//! const POSITION: ComponentId = ComponentId(0);
//! const VELOCITY: ComponentId = ComponentId(1);
//! const MOVE: SystemId = SystemId(0);
//!
//! let mut world = World::with_capacity(2, 1);
//! world.component_new(POSITION, ComponentKind::new::<Position>("position"));
//! world.component_new(VELOCITY, ComponentKind::new::<Velocity>("velocity"));
//!
//! world.system_new(MOVE, |world, e| {
//!     let v = world.entity_component_req::<Velocity>(e, VELOCITY).clone();
//!     let p = world.entity_component_req_mut::<Position>(e, POSITION);
//!     p.x += v.dx;
//!     p.y += v.dy;
//! }, false);
//! world.system_add(MOVE, POSITION);
//! world.system_add(MOVE, VELOCITY);
//!
//! let e = world.entity_new(Some("ship"), None);
//! world.entity_component_add::<Position>(e, POSITION).unwrap();
//! *world.entity_component_add::<Velocity>(e, VELOCITY).unwrap() = Velocity { dx: 1, dy: 2 };
//!
//! world.tick();
//! world.system_run(MOVE);
//!
//! assert_eq!(world.entity_component::<Position>(e, POSITION), Some(&Position { x: 1, y: 2 }));
//! ```

#![deny(unsafe_code)]

pub mod bitfield;
pub mod collection;
pub mod component;
pub mod entity;
pub mod system;
pub mod template;
pub mod world;

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Errors produced by ECS operations.
///
/// Programmer errors (undeclared kinds, double registration, adding a
/// component too late) panic instead; these variants cover conditions a
/// caller can meet at runtime.
#[derive(Debug, thiserror::Error)]
pub enum EcsError {
    /// The entity does not exist (destroyed, stale generation, or never
    /// allocated).
    #[error("entity {entity:?} does not exist (destroyed or never allocated)")]
    StaleEntity {
        entity: entity::EntityId,
    },

    /// A template referenced a component kind that has not been declared.
    #[error("component type '{name}' not registered. Registered components: [{registered}]")]
    UnknownComponent {
        name: String,
        registered: String,
    },

    /// A template document could not be parsed.
    #[error("template '{template}' is malformed: {details}")]
    TemplateParse {
        template: String,
        details: String,
    },

    /// A component's data initialiser rejected a template blob.
    #[error("template '{template}': failed to initialise data for component '{component}': {details}")]
    ComponentDataInit {
        template: String,
        component: String,
        details: String,
    },

    /// A template with this name is already loaded.
    #[error("template '{name}' is already loaded")]
    DuplicateTemplate {
        name: String,
    },
}

// ---------------------------------------------------------------------------
// Prelude
// ---------------------------------------------------------------------------

/// Convenience re-exports for common usage.
pub mod prelude {
    pub use crate::bitfield::Bitfield;
    pub use crate::collection::{Collection, CollectionId};
    pub use crate::component::{ComponentId, ComponentInstance, ComponentKind, ComponentRegistry};
    pub use crate::entity::{EntityContext, EntityId, EntityRecord, EntityState, Lifecycle};
    pub use crate::system::{SystemCompare, SystemHandler, SystemId, SystemKind};
    pub use crate::template::{Template, TemplateId};
    pub use crate::world::World;
    pub use crate::EcsError;
}

// ---------------------------------------------------------------------------
// Integration Tests
// ---------------------------------------------------------------------------
