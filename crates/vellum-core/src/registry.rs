//! Late-bound entity type registration.
//!
//! Concrete entity types are unknown to the engine at compile time; callers
//! register an [`EntityType`] per concrete type before opening a repository.
//! The registry is append-only and moves into the repository with the rest
//! of the engine state, so a type can never disappear while buckets of it
//! are being tracked.

use std::collections::HashMap;
use std::fmt;

use crate::errors::{Result, VellumError};
use crate::model::{EntityCategory, Persistable, PropertyDef};

/// Factory producing an empty instance for the load path to fill.
pub type EntityFactory = Box<dyn Fn() -> Box<dyn Persistable> + Send + Sync>;

/// Description of one concrete entity type: its unique full name, category
/// tag, the schema version it was designed against, and its ordered
/// property definitions. Immutable after registration.
pub struct EntityType {
    full_name: String,
    category: EntityCategory,
    repository_version: u32,
    properties: Vec<PropertyDef>,
    factory: EntityFactory,
}

impl EntityType {
    pub fn new(
        full_name: impl Into<String>,
        category: EntityCategory,
        repository_version: u32,
        properties: Vec<PropertyDef>,
        factory: EntityFactory,
    ) -> Self {
        EntityType {
            full_name: full_name.into(),
            category,
            repository_version,
            properties,
            factory,
        }
    }

    pub fn full_name(&self) -> &str {
        &self.full_name
    }

    pub fn category(&self) -> EntityCategory {
        self.category
    }

    pub fn repository_version(&self) -> u32 {
        self.repository_version
    }

    pub fn properties(&self) -> &[PropertyDef] {
        &self.properties
    }

    pub fn property_at(&self, index: usize) -> Option<&PropertyDef> {
        self.properties.get(index)
    }

    /// Positional parameter/column slots this type occupies after the two
    /// reserved positions: one per field, one per composable collection.
    /// Child-row collections occupy none.
    pub fn parameter_slots(&self) -> usize {
        self.properties
            .iter()
            .filter(|property| match property {
                PropertyDef::Field(_) => true,
                PropertyDef::InnerObjects(def) => def.is_composable(),
            })
            .count()
    }

    pub fn create_instance(&self) -> Box<dyn Persistable> {
        (self.factory)()
    }
}

impl fmt::Debug for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntityType")
            .field("full_name", &self.full_name)
            .field("category", &self.category)
            .field("repository_version", &self.repository_version)
            .field("properties", &self.properties.len())
            .finish()
    }
}

/// Registration-ordered set of entity types known to a repository.
#[derive(Debug, Default)]
pub struct EntityTypeRegistry {
    types: Vec<EntityType>,
    by_name: HashMap<String, usize>,
}

impl EntityTypeRegistry {
    pub fn new() -> Self {
        EntityTypeRegistry::default()
    }

    /// # Errors
    ///
    /// Returns `SchemaConflict` when the full name is already registered.
    pub fn register(&mut self, entity_type: EntityType) -> Result<()> {
        if self.by_name.contains_key(entity_type.full_name()) {
            return Err(VellumError::schema_conflict(
                entity_type.full_name(),
                "entity type is already registered",
            ));
        }
        self.by_name
            .insert(entity_type.full_name().to_string(), self.types.len());
        self.types.push(entity_type);
        Ok(())
    }

    /// # Errors
    ///
    /// Returns `NotFound` when no type with that full name was registered.
    pub fn find_by_full_name(&self, full_name: &str) -> Result<&EntityType> {
        self.by_name
            .get(full_name)
            .map(|&index| &self.types[index])
            .ok_or_else(|| VellumError::not_found("entity type", full_name))
    }

    pub fn contains(&self, full_name: &str) -> bool {
        self.by_name.contains_key(full_name)
    }

    /// All registered types, in registration order.
    pub fn all(&self) -> impl Iterator<Item = &EntityType> {
        self.types.iter()
    }

    /// Registered types of one category, in registration order.
    pub fn in_category(&self, category: EntityCategory) -> impl Iterator<Item = &EntityType> {
        self.types
            .iter()
            .filter(move |entity_type| entity_type.category() == category)
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }
}
