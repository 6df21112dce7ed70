//! Component kind registration and metadata.
//!
//! Every component kind is bound to a caller-chosen dense [`ComponentId`] and
//! a unique string identifier in a [`ComponentRegistry`] sized up front. The
//! string identifier is what data-driven templates refer to; the index is what
//! entities and systems use at runtime (one bit per kind in their bitfields).
//!
//! A [`ComponentKind`] carries the type-erased constructor, the optional
//! "construct with shared data and context" variant, the data-blob
//! initialiser used by templates, and an optional destructor hook.

use std::any::{type_name, Any, TypeId};
use std::collections::HashMap;
use std::fmt;

use serde::de::DeserializeOwned;

use crate::entity::EntityId;

// ---------------------------------------------------------------------------
// ComponentId
// ---------------------------------------------------------------------------

/// Dense index of a registered component kind.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ComponentId(pub u32);

impl ComponentId {
    /// The index as a `usize`, for table lookups and bit positions.
    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Debug for ComponentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ComponentId({})", self.0)
    }
}

impl fmt::Display for ComponentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// ComponentKind
// ---------------------------------------------------------------------------

type InitFn = Box<dyn Fn() -> Box<dyn Any>>;
type InitWithDataFn = Box<dyn Fn(Option<&dyn Any>, Option<&dyn Any>) -> Box<dyn Any>>;
type DataInitFn = Box<dyn Fn(&serde_json::Value) -> Result<Box<dyn Any>, String>>;
type FreeFn = Box<dyn Fn(&mut dyn Any)>;

/// Storage metadata and lifecycle callbacks for one component kind.
pub struct ComponentKind {
    name: String,
    size: usize,
    align: usize,
    type_id: TypeId,
    type_name: &'static str,
    init: Option<InitFn>,
    init_with_data: Option<InitWithDataFn>,
    data_init: Option<DataInitFn>,
    free: Option<FreeFn>,
}

impl ComponentKind {
    fn describe<T: 'static>(name: &str) -> Self {
        Self {
            name: name.to_owned(),
            size: std::mem::size_of::<T>(),
            align: std::mem::align_of::<T>(),
            type_id: TypeId::of::<T>(),
            type_name: type_name::<T>(),
            init: None,
            init_with_data: None,
            data_init: None,
            free: None,
        }
    }

    /// A kind constructed with `T::default()`.
    pub fn new<T: Default + 'static>(name: &str) -> Self {
        Self::with_init(name, T::default)
    }

    /// A kind constructed with a custom plain constructor.
    pub fn with_init<T: 'static>(name: &str, init: impl Fn() -> T + 'static) -> Self {
        let mut kind = Self::describe::<T>(name);
        kind.init = Some(Box::new(move || Box::new(init()) as Box<dyn Any>));
        kind
    }

    /// The extended form: instances are built from the template's shared data
    /// (`D`, produced once per template by `data_init` from its serialized
    /// blob) and the optional per-instance init context passed to the entity
    /// factory.
    pub fn with_data<T: 'static, D: 'static>(
        name: &str,
        init: impl Fn(Option<&D>, Option<&dyn Any>) -> T + 'static,
        data_init: impl Fn(&serde_json::Value) -> Result<D, String> + 'static,
    ) -> Self {
        let mut kind = Self::describe::<T>(name);
        kind.init_with_data = Some(Box::new(
            move |data: Option<&dyn Any>, context: Option<&dyn Any>| {
                Box::new(init(data.and_then(|d| d.downcast_ref::<D>()), context)) as Box<dyn Any>
            },
        ));
        kind.data_init = Some(Box::new(move |blob: &serde_json::Value| {
            data_init(blob).map(|d| Box::new(d) as Box<dyn Any>)
        }));
        kind
    }

    /// Like [`with_data`](Self::with_data), with the shared data deserialized
    /// straight from the template blob.
    pub fn with_serde_data<T: 'static, D: DeserializeOwned + 'static>(
        name: &str,
        init: impl Fn(Option<&D>, Option<&dyn Any>) -> T + 'static,
    ) -> Self {
        Self::with_data(name, init, |blob| {
            serde_json::from_value::<D>(blob.clone()).map_err(|e| e.to_string())
        })
    }

    /// Attach a destructor hook, invoked once right before an instance is
    /// dropped.
    ///
    /// # Panics
    ///
    /// Panics if `T` is not the kind's component type.
    pub fn on_free<T: 'static>(mut self, free: impl Fn(&mut T) + 'static) -> Self {
        assert!(
            self.type_id == TypeId::of::<T>(),
            "component '{}': destructor takes {} but the kind stores {}",
            self.name,
            type_name::<T>(),
            self.type_name
        );
        self.free = Some(Box::new(move |value: &mut dyn Any| {
            if let Some(v) = value.downcast_mut::<T>() {
                free(v);
            }
        }));
        self
    }

    /// The unique string identifier.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Payload size in bytes.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Payload alignment in bytes.
    pub fn align(&self) -> usize {
        self.align
    }

    /// Rust type stored by this kind.
    pub fn type_id(&self) -> TypeId {
        self.type_id
    }

    /// Rust type name stored by this kind, for diagnostics.
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    /// Whether templates may attach a data blob to this kind.
    pub fn has_data(&self) -> bool {
        self.data_init.is_some()
    }

    pub(crate) fn construct(
        &self,
        data: Option<&dyn Any>,
        context: Option<&dyn Any>,
    ) -> Box<dyn Any> {
        match (&self.init_with_data, &self.init) {
            (Some(init), _) => init(data, context),
            (None, Some(init)) => init(),
            (None, None) => unreachable!("component kinds are always built with a constructor"),
        }
    }

    pub(crate) fn init_data(&self, blob: &serde_json::Value) -> Option<Result<Box<dyn Any>, String>> {
        self.data_init.as_ref().map(|f| f(blob))
    }

    pub(crate) fn release(&self, value: &mut dyn Any) {
        if let Some(free) = &self.free {
            free(value);
        }
    }
}

impl fmt::Debug for ComponentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComponentKind")
            .field("name", &self.name)
            .field("type", &self.type_name)
            .field("size", &self.size)
            .field("with_data", &self.init_with_data.is_some())
            .field("free", &self.free.is_some())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// ComponentInstance
// ---------------------------------------------------------------------------

/// A live component value plus the header naming its owner and kind.
pub struct ComponentInstance {
    entity: EntityId,
    kind: ComponentId,
    pub(crate) value: Box<dyn Any>,
}

impl ComponentInstance {
    pub(crate) fn new(entity: EntityId, kind: ComponentId, value: Box<dyn Any>) -> Self {
        Self {
            entity,
            kind,
            value,
        }
    }

    /// The entity owning this instance.
    pub fn entity(&self) -> EntityId {
        self.entity
    }

    /// The kind of this instance.
    pub fn kind(&self) -> ComponentId {
        self.kind
    }

    /// Typed read access; `None` if `T` is not the stored type.
    pub fn get<T: 'static>(&self) -> Option<&T> {
        self.value.downcast_ref::<T>()
    }

    /// Typed write access; `None` if `T` is not the stored type.
    pub fn get_mut<T: 'static>(&mut self) -> Option<&mut T> {
        self.value.downcast_mut::<T>()
    }
}

impl fmt::Debug for ComponentInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComponentInstance")
            .field("entity", &self.entity)
            .field("kind", &self.kind)
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// ComponentRegistry
// ---------------------------------------------------------------------------

/// Fixed-size table of component kinds, addressed by [`ComponentId`].
///
/// The registry starts uninitialised; [`init`](Self::init) sizes the table
/// and every kind must then be registered at a unique index below that size.
#[derive(Debug, Default)]
pub struct ComponentRegistry {
    kinds: Option<Vec<Option<ComponentKind>>>,
    by_name: HashMap<String, ComponentId>,
}

impl ComponentRegistry {
    /// Create an uninitialised registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Preallocate a table of exactly `num_components` kinds.
    pub fn init(&mut self, num_components: usize) {
        self.kinds = Some((0..num_components).map(|_| None).collect());
        self.by_name.clear();
    }

    /// Drop every kind and return to the uninitialised state.
    pub fn uninit(&mut self) {
        self.kinds = None;
        self.by_name.clear();
    }

    /// Whether [`init`](Self::init) has been called.
    pub fn is_initialized(&self) -> bool {
        self.kinds.is_some()
    }

    /// Size of the table (0 before initialisation).
    pub fn len(&self) -> usize {
        self.kinds.as_ref().map_or(0, Vec::len)
    }

    /// Whether the table has no slots.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Bind `kind` to `id`.
    ///
    /// # Panics
    ///
    /// Panics if the registry is uninitialised, `id` is out of range, `id` is
    /// already bound, or the kind's string identifier is already taken.
    pub fn register(&mut self, id: ComponentId, kind: ComponentKind) {
        let Some(kinds) = self.kinds.as_mut() else {
            panic!("component_new({id}, {}): call init first", kind.name);
        };

        let capacity = kinds.len();
        let Some(slot) = kinds.get_mut(id.index()) else {
            panic!(
                "component_new({id}, {}): index out of range (table holds {capacity})",
                kind.name
            );
        };

        if slot.is_some() || self.by_name.contains_key(&kind.name) {
            panic!("component_new({id}, {}): already declared", kind.name);
        }

        tracing::debug!(component = %id, name = %kind.name, ty = kind.type_name, "component kind registered");

        self.by_name.insert(kind.name.clone(), id);
        *slot = Some(kind);
    }

    /// Fetch a registered kind.
    ///
    /// Debug builds validate the table and the index, naming `caller` in the
    /// panic message.
    pub fn get(&self, id: ComponentId, caller: &str) -> &ComponentKind {
        #[cfg(debug_assertions)]
        self.validate(id, caller);

        match self.try_get(id) {
            Some(kind) => kind,
            None => panic!("{caller}: uninitialized component {id}"),
        }
    }

    #[cfg(debug_assertions)]
    fn validate(&self, id: ComponentId, caller: &str) {
        let Some(kinds) = self.kinds.as_ref() else {
            panic!("{caller}: call init first");
        };
        if id.index() >= kinds.len() {
            panic!("{caller}: unknown component {id}");
        }
        if kinds[id.index()].is_none() {
            panic!("{caller}: uninitialized component {id}");
        }
    }

    /// Fetch a registered kind, or `None`.
    pub fn try_get(&self, id: ComponentId) -> Option<&ComponentKind> {
        self.kinds.as_ref()?.get(id.index())?.as_ref()
    }

    /// Reverse lookup from a string identifier.
    pub fn string_to_index(&self, name: &str) -> Option<ComponentId> {
        self.by_name.get(name).copied()
    }

    /// Iterate over all registered kinds in index order.
    pub fn iter(&self) -> impl Iterator<Item = (ComponentId, &ComponentKind)> {
        self.kinds.iter().flatten().enumerate().filter_map(|(i, k)| {
            k.as_ref().map(|k| (ComponentId(i as u32), k))
        })
    }

    /// Names of all registered kinds, sorted.
    pub fn registered_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.by_name.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::rc::Rc;

    #[derive(Debug, Default, Clone, PartialEq)]
    struct Pos {
        x: f32,
        y: f32,
    }

    #[derive(Debug, Clone, PartialEq, serde::Deserialize)]
    struct SpriteData {
        frames: u32,
    }

    #[derive(Debug, Clone, PartialEq)]
    struct Sprite {
        frames: u32,
        tint: u8,
    }

    const POS: ComponentId = ComponentId(0);
    const SPRITE: ComponentId = ComponentId(1);

    fn registry() -> ComponentRegistry {
        let mut reg = ComponentRegistry::new();
        reg.init(2);
        reg
    }

    #[test]
    fn register_and_lookup() {
        let mut reg = registry();
        reg.register(POS, ComponentKind::new::<Pos>("position"));
        assert_eq!(reg.string_to_index("position"), Some(POS));
        assert_eq!(reg.string_to_index("velocity"), None);
        let kind = reg.get(POS, "test");
        assert_eq!(kind.name(), "position");
        assert_eq!(kind.size(), std::mem::size_of::<Pos>());
        assert_eq!(kind.align(), std::mem::align_of::<Pos>());
        assert_eq!(kind.type_id(), TypeId::of::<Pos>());
    }

    #[test]
    #[should_panic(expected = "call init first")]
    fn register_before_init_panics() {
        let mut reg = ComponentRegistry::new();
        reg.register(POS, ComponentKind::new::<Pos>("position"));
    }

    #[test]
    #[should_panic(expected = "already declared")]
    fn double_index_panics() {
        let mut reg = registry();
        reg.register(POS, ComponentKind::new::<Pos>("position"));
        reg.register(POS, ComponentKind::new::<Pos>("other"));
    }

    #[test]
    #[should_panic(expected = "already declared")]
    fn duplicate_name_panics() {
        let mut reg = registry();
        reg.register(POS, ComponentKind::new::<Pos>("position"));
        reg.register(SPRITE, ComponentKind::new::<Pos>("position"));
    }

    #[test]
    #[should_panic(expected = "out of range")]
    fn index_out_of_range_panics() {
        let mut reg = registry();
        reg.register(ComponentId(2), ComponentKind::new::<Pos>("position"));
    }

    #[test]
    #[should_panic(expected = "uninitialized component 1")]
    fn get_undeclared_panics() {
        let reg = registry();
        reg.get(SPRITE, "lookup");
    }

    #[test]
    fn construct_plain_and_with_data() {
        let mut reg = registry();
        reg.register(POS, ComponentKind::with_init("position", || Pos { x: 1.0, y: 2.0 }));
        reg.register(
            SPRITE,
            ComponentKind::with_serde_data::<Sprite, SpriteData>("sprite", |data, ctx| Sprite {
                frames: data.map_or(0, |d| d.frames),
                tint: ctx.and_then(|c| c.downcast_ref::<u8>()).copied().unwrap_or(0),
            }),
        );

        let pos = reg.get(POS, "test").construct(None, None);
        assert_eq!(pos.downcast_ref::<Pos>(), Some(&Pos { x: 1.0, y: 2.0 }));

        let sprite_kind = reg.get(SPRITE, "test");
        assert!(sprite_kind.has_data());
        let data = sprite_kind
            .init_data(&serde_json::json!({ "frames": 4 }))
            .unwrap()
            .unwrap();
        let tint: u8 = 7;
        let sprite = sprite_kind.construct(Some(data.as_ref()), Some(&tint));
        assert_eq!(sprite.downcast_ref::<Sprite>(), Some(&Sprite { frames: 4, tint: 7 }));

        assert!(sprite_kind
            .init_data(&serde_json::json!({ "frames": "many" }))
            .unwrap()
            .is_err());
    }

    #[test]
    fn free_hook_runs_on_release() {
        let freed = Rc::new(Cell::new(0));
        let counter = Rc::clone(&freed);
        let kind = ComponentKind::new::<Pos>("position").on_free(move |p: &mut Pos| {
            p.x = -1.0;
            counter.set(counter.get() + 1);
        });

        let mut value = kind.construct(None, None);
        kind.release(value.as_mut());
        assert_eq!(freed.get(), 1);
        assert_eq!(value.downcast_ref::<Pos>().unwrap().x, -1.0);
    }

    #[test]
    #[should_panic(expected = "destructor takes")]
    fn free_hook_type_mismatch_panics() {
        let _ = ComponentKind::new::<Pos>("position").on_free(|_: &mut u32| {});
    }

    #[test]
    fn iter_and_names() {
        let mut reg = registry();
        reg.register(SPRITE, ComponentKind::new::<Pos>("zeta"));
        reg.register(POS, ComponentKind::new::<Pos>("alpha"));
        let ids: Vec<ComponentId> = reg.iter().map(|(id, _)| id).collect();
        assert_eq!(ids, vec![POS, SPRITE]);
        assert_eq!(reg.registered_names(), vec!["alpha", "zeta"]);
    }
}
