//! Entity resolution collaborator.
//!
//! The host identifies the caller (the actor) by an opaque entity id and
//! resolves it to a set of named attributes. Those attributes become the
//! context for the role's actor template:
//!
//! ```text
//! {"identity": {"entity": {"id", "name", "namespace_id", "metadata"}}}
//! ```
//!
//! A failed lookup aborts the exchange; the engine never falls back to an
//! empty actor context.

use std::collections::BTreeMap;

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::{Error, Result};

/// Attributes of a resolved caller entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entity {
    /// Opaque entity identifier.
    pub id: String,
    /// Display name.
    #[serde(default)]
    pub name: String,
    /// Namespace the entity belongs to.
    #[serde(default)]
    pub namespace_id: String,
    /// Free-form string metadata.
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

impl Entity {
    /// Create an entity with only an id.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: String::new(),
            namespace_id: String::new(),
            metadata: BTreeMap::new(),
        }
    }

    /// Set the display name.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Add one metadata entry.
    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Build the actor template context for this entity.
    #[must_use]
    pub fn template_context(&self) -> Value {
        json!({
            "identity": {
                "entity": {
                    "id": self.id,
                    "name": self.name,
                    "namespace_id": self.namespace_id,
                    "metadata": self.metadata,
                }
            }
        })
    }
}

/// Resolves an opaque caller identifier to its attributes.
#[async_trait]
pub trait EntityResolver: Send + Sync + 'static {
    /// Resolve `entity_id`. Unknown ids are an error, not an empty entity.
    async fn resolve(&self, entity_id: &str) -> Result<Entity>;
}

/// Resolver over a fixed, host-populated table.
#[derive(Debug, Default)]
pub struct StaticEntityResolver {
    entities: DashMap<String, Entity>,
}

impl StaticEntityResolver {
    /// Create an empty resolver.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) an entity.
    pub fn insert(&self, entity: Entity) {
        self.entities.insert(entity.id.clone(), entity);
    }
}

#[async_trait]
impl EntityResolver for StaticEntityResolver {
    async fn resolve(&self, entity_id: &str) -> Result<Entity> {
        self.entities
            .get(entity_id)
            .map(|e| e.value().clone())
            .ok_or_else(|| Error::EntityResolution(format!("unknown entity {entity_id:?}")))
    }
}
