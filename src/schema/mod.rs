//! Schema Metadata
//!
//! Read-only view of the remote service's object metadata. The engine only
//! ever consumes schema through the `SchemaProvider` trait; providers are
//! injected, and caching is an explicit wrapper with its own TTL.

pub mod cache;
pub mod rest;

pub use cache::CachedSchemaProvider;
pub use rest::RestSchemaProvider;

use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldMetadata {
    pub name: String,
    #[serde(alias = "type")]
    pub data_type: String,
}

/// A lookup / foreign-key field and the entity type it points at.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelationshipMetadata {
    pub field: String,
    pub target_type: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectMetadata {
    pub name: String,
    #[serde(default)]
    pub fields: Vec<FieldMetadata>,
    #[serde(default)]
    pub relationships: Vec<RelationshipMetadata>,
}

impl ObjectMetadata {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            fields: Vec::new(),
            relationships: Vec::new(),
        }
    }

    pub fn with_field(mut self, name: &str, data_type: &str) -> Self {
        self.fields.push(FieldMetadata {
            name: name.to_string(),
            data_type: data_type.to_string(),
        });
        self
    }

    pub fn with_relationship(mut self, field: &str, target_type: &str) -> Self {
        self.relationships.push(RelationshipMetadata {
            field: field.to_string(),
            target_type: target_type.to_string(),
        });
        self
    }

    pub fn is_named(&self, name: &str) -> bool {
        self.name.eq_ignore_ascii_case(name)
    }

    /// Foreign-key field on this entity type that references `target`.
    pub fn relationship_to(&self, target: &str) -> Option<&RelationshipMetadata> {
        self.relationships
            .iter()
            .find(|r| r.target_type.eq_ignore_ascii_case(target))
    }

    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|f| f.name.as_str())
    }
}

/// Metadata lookup. `None` asks for the catalogue of entity types; a hint asks
/// for that entity type's full description (empty when unknown).
#[async_trait]
pub trait SchemaProvider: Send + Sync {
    async fn schema(&self, entity_type: Option<&str>) -> Result<Vec<ObjectMetadata>>;
}

/// Schema held in memory, typically loaded from a JSON export.
#[derive(Debug, Clone, Default)]
pub struct StaticSchemaProvider {
    objects: Vec<ObjectMetadata>,
}

impl StaticSchemaProvider {
    pub fn new(objects: Vec<ObjectMetadata>) -> Self {
        Self { objects }
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let objects: Vec<ObjectMetadata> = serde_json::from_str(&content)?;
        Ok(Self::new(objects))
    }
}

#[async_trait]
impl SchemaProvider for StaticSchemaProvider {
    async fn schema(&self, entity_type: Option<&str>) -> Result<Vec<ObjectMetadata>> {
        Ok(match entity_type {
            None => self
                .objects
                .iter()
                .map(|o| ObjectMetadata::new(o.name.clone()))
                .collect(),
            Some(name) => self
                .objects
                .iter()
                .filter(|o| o.is_named(name))
                .cloned()
                .collect(),
        })
    }
}
