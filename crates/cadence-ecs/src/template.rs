//! Data-driven entity templates.
//!
//! A template names the component kinds an entity starts with and, per kind,
//! an optional serialized data blob. Blobs are turned into shared data once,
//! when the template is loaded, by the kind's data initialiser; every entity
//! built from the template then reads that same value through
//! [`World::component_data`](crate::world::World::component_data).
//!
//! Template documents are JSON:
//!
//! ```json
//! {
//!   "components": [
//!     { "id": "position" },
//!     { "id": "sprite", "data": { "frames": 4 } }
//!   ]
//! }
//! ```

use std::any::Any;
use std::collections::HashMap;
use std::fmt;

use serde::Deserialize;

use crate::bitfield::Bitfield;
use crate::component::{ComponentId, ComponentRegistry};
use crate::EcsError;

/// Index of a loaded template.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TemplateId(pub(crate) u32);

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct TemplateDef {
    components: Vec<TemplateComponentDef>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct TemplateComponentDef {
    id: String,
    #[serde(default)]
    data: Option<serde_json::Value>,
}

// ---------------------------------------------------------------------------
// Template
// ---------------------------------------------------------------------------

/// A resolved template: component kinds in declaration order plus the shared
/// data built from their blobs.
pub struct Template {
    name: String,
    components: Vec<ComponentId>,
    /// Indexed by component kind.
    data: Vec<Option<Box<dyn Any>>>,
    bits: Bitfield,
}

impl Template {
    /// The template's name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Component kinds in declaration order.
    pub fn components(&self) -> &[ComponentId] {
        &self.components
    }

    /// Kinds used by the template, as a bitfield.
    pub fn component_bits(&self) -> &Bitfield {
        &self.bits
    }

    /// Shared data built for `component`, if its blob was present.
    pub fn data(&self, component: ComponentId) -> Option<&dyn Any> {
        self.data.get(component.index())?.as_deref()
    }
}

impl fmt::Debug for Template {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Template")
            .field("name", &self.name)
            .field("components", &self.components)
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// TemplateRegistry
// ---------------------------------------------------------------------------

/// Loaded templates, addressed by name or [`TemplateId`].
#[derive(Debug, Default)]
pub struct TemplateRegistry {
    templates: Vec<Template>,
    by_name: HashMap<String, TemplateId>,
}

impl TemplateRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve and store the template document `doc` under `name`.
    pub fn load(
        &mut self,
        name: &str,
        doc: &serde_json::Value,
        registry: &ComponentRegistry,
    ) -> Result<TemplateId, EcsError> {
        if self.by_name.contains_key(name) {
            return Err(EcsError::DuplicateTemplate {
                name: name.to_owned(),
            });
        }

        let def = TemplateDef::deserialize(doc).map_err(|e| EcsError::TemplateParse {
            template: name.to_owned(),
            details: e.to_string(),
        })?;

        let num_components = registry.len();
        let mut components = Vec::with_capacity(def.components.len());
        let mut data: Vec<Option<Box<dyn Any>>> = (0..num_components).map(|_| None).collect();
        let mut bits = Bitfield::new(num_components.max(1));

        for entry in def.components {
            let Some(id) = registry.string_to_index(&entry.id) else {
                return Err(EcsError::UnknownComponent {
                    name: entry.id,
                    registered: registry.registered_names().join(", "),
                });
            };

            if bits.test(id.index()) {
                return Err(EcsError::TemplateParse {
                    template: name.to_owned(),
                    details: format!("component '{}' listed twice", entry.id),
                });
            }

            let kind = registry.get(id, "template_load");

            if let Some(blob) = entry.data.as_ref().filter(|b| !b.is_null()) {
                match kind.init_data(blob) {
                    Some(Ok(value)) => data[id.index()] = Some(value),
                    Some(Err(details)) => {
                        return Err(EcsError::ComponentDataInit {
                            template: name.to_owned(),
                            component: entry.id,
                            details,
                        })
                    }
                    None => tracing::warn!(
                        template = name,
                        component = %entry.id,
                        "component kind takes no data; blob ignored"
                    ),
                }
            }

            bits.set(id.index());
            components.push(id);
        }

        let id = TemplateId(self.templates.len() as u32);
        tracing::debug!(template = name, components = components.len(), "template loaded");

        self.templates.push(Template {
            name: name.to_owned(),
            components,
            data,
            bits,
        });
        self.by_name.insert(name.to_owned(), id);

        Ok(id)
    }

    /// Look up a template by name.
    pub fn lookup(&self, name: &str) -> Option<TemplateId> {
        self.by_name.get(name).copied()
    }

    /// Fetch a loaded template.
    pub fn get(&self, id: TemplateId) -> &Template {
        &self.templates[id.0 as usize]
    }

    /// Number of loaded templates.
    pub fn len(&self) -> usize {
        self.templates.len()
    }

    /// Whether no template is loaded.
    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }

    /// Drop every template.
    pub fn clear(&mut self) {
        self.templates.clear();
        self.by_name.clear();
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::component::ComponentKind;
    use serde_json::json;

    #[derive(Debug, Default)]
    struct Pos;

    #[derive(Debug, serde::Deserialize, PartialEq)]
    struct Frames {
        frames: u32,
    }

    struct Sprite;

    fn registry() -> ComponentRegistry {
        let mut reg = ComponentRegistry::new();
        reg.init(2);
        reg.register(ComponentId(0), ComponentKind::new::<Pos>("position"));
        reg.register(
            ComponentId(1),
            ComponentKind::with_serde_data::<Sprite, Frames>("sprite", |_, _| Sprite),
        );
        reg
    }

    #[test]
    fn load_resolves_components_and_data() {
        let reg = registry();
        let mut templates = TemplateRegistry::new();
        let id = templates
            .load(
                "hero",
                &json!({ "components": [
                    { "id": "sprite", "data": { "frames": 3 } },
                    { "id": "position" }
                ]}),
                &reg,
            )
            .unwrap();

        let t = templates.get(id);
        assert_eq!(t.name(), "hero");
        assert_eq!(t.components(), &[ComponentId(1), ComponentId(0)]);
        assert!(t.component_bits().test(0) && t.component_bits().test(1));
        let frames = t.data(ComponentId(1)).and_then(|d| d.downcast_ref::<Frames>());
        assert_eq!(frames, Some(&Frames { frames: 3 }));
        assert!(t.data(ComponentId(0)).is_none());
        assert_eq!(templates.lookup("hero"), Some(id));
    }

    #[test]
    fn unknown_component_is_reported() {
        let reg = registry();
        let mut templates = TemplateRegistry::new();
        let err = templates
            .load("bad", &json!({ "components": [{ "id": "velocity" }] }), &reg)
            .unwrap_err();
        assert!(matches!(err, EcsError::UnknownComponent { ref name, .. } if name == "velocity"));
    }

    #[test]
    fn bad_blob_is_reported() {
        let reg = registry();
        let mut templates = TemplateRegistry::new();
        let err = templates
            .load(
                "bad",
                &json!({ "components": [{ "id": "sprite", "data": { "frames": "x" } }] }),
                &reg,
            )
            .unwrap_err();
        assert!(matches!(err, EcsError::ComponentDataInit { .. }));
    }

    #[test]
    fn malformed_and_duplicate_templates_are_rejected() {
        let reg = registry();
        let mut templates = TemplateRegistry::new();
        assert!(matches!(
            templates.load("x", &json!({ "parts": [] }), &reg),
            Err(EcsError::TemplateParse { .. })
        ));
        assert!(matches!(
            templates.load(
                "x",
                &json!({ "components": [{ "id": "position" }, { "id": "position" }] }),
                &reg
            ),
            Err(EcsError::TemplateParse { .. })
        ));
        templates
            .load("x", &json!({ "components": [] }), &reg)
            .unwrap();
        assert!(matches!(
            templates.load("x", &json!({ "components": [] }), &reg),
            Err(EcsError::DuplicateTemplate { .. })
        ));
        assert_eq!(templates.len(), 1);
    }
}
