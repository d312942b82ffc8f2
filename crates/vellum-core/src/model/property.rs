//! Property definitions: the ordered serialization schema of an entity type.
//!
//! The definition list registered for an entity type fixes the on-disk
//! column and parameter order for that type's `repository_version`. Within
//! a shipped version the list must never be reordered; version bumps append
//! or gate properties in the entity's `save_fields`/`load_fields`.

use serde::Serialize;

/// Scalar kinds the reader/writer contract can transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum PrimitiveKind {
    Bool,
    Byte,
    Int16,
    Int32,
    Int64,
    Float32,
    Float64,
    Char,
    Text,
    /// UTC timestamp, persisted at millisecond precision.
    Date,
    /// Opaque byte blob.
    Image,
    /// Reference to another entity's identifier; nullable.
    Id,
}

/// A single scalar slot in the serialization order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldDef {
    pub name: String,
    pub kind: PrimitiveKind,
    reference_target: Option<String>,
}

impl FieldDef {
    pub fn new(name: impl Into<String>, kind: PrimitiveKind) -> Self {
        FieldDef {
            name: name.into(),
            kind,
            reference_target: None,
        }
    }

    /// An identifier field declaring which entity type it points at. The
    /// target name travels inside the delimited-string wrapper; the
    /// parameter-bound backend ignores it.
    pub fn reference(name: impl Into<String>, target_type_name: impl Into<String>) -> Self {
        FieldDef {
            name: name.into(),
            kind: PrimitiveKind::Id,
            reference_target: Some(target_type_name.into()),
        }
    }

    pub fn reference_target(&self) -> Option<&str> {
        self.reference_target.as_deref()
    }
}

/// Property names whose inner-object collections collapse into a single
/// delimited-string column instead of child rows. Resolved once at
/// definition time; call sites never compare names.
pub const COMPOSABLE_PROPERTY_NAMES: [&str; 5] = [
    "connection_point_mappings",
    "value_ranges",
    "vertices",
    "connection_points",
    "columns",
];

/// An ordered collection of nested records owned by the outer entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InnerObjectsDef {
    name: String,
    entity_type_name: String,
    fields: Vec<FieldDef>,
    composable: bool,
}

impl InnerObjectsDef {
    pub fn new(
        name: impl Into<String>,
        entity_type_name: impl Into<String>,
        fields: Vec<FieldDef>,
    ) -> Self {
        let name = name.into();
        let composable = COMPOSABLE_PROPERTY_NAMES.contains(&name.as_str());
        InnerObjectsDef {
            name,
            entity_type_name: entity_type_name.into(),
            fields,
            composable,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn entity_type_name(&self) -> &str {
        &self.entity_type_name
    }

    pub fn fields(&self) -> &[FieldDef] {
        &self.fields
    }

    pub fn is_composable(&self) -> bool {
        self.composable
    }
}

/// One entry in an entity type's serialization order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum PropertyDef {
    Field(FieldDef),
    InnerObjects(InnerObjectsDef),
}

impl PropertyDef {
    pub fn name(&self) -> &str {
        match self {
            PropertyDef::Field(field) => &field.name,
            PropertyDef::InnerObjects(inner) => inner.name(),
        }
    }
}

/// Builder for serialization orders.
///
/// Derived entity types start from their base category's schema function and
/// chain their own definitions onto it, so base definitions always come
/// first:
///
/// ```
/// use vellum_core::model::{PrimitiveKind, PropertySchema};
///
/// fn shape_schema() -> PropertySchema {
///     PropertySchema::new()
///         .field("x", PrimitiveKind::Int32)
///         .field("y", PrimitiveKind::Int32)
/// }
///
/// let box_defs = shape_schema()
///     .field("corner_radius", PrimitiveKind::Int32)
///     .build();
/// assert_eq!(box_defs.len(), 3);
/// ```
#[derive(Debug, Clone, Default)]
pub struct PropertySchema {
    defs: Vec<PropertyDef>,
}

impl PropertySchema {
    pub fn new() -> Self {
        PropertySchema::default()
    }

    /// Starts from an already-built definition list, for derived types whose
    /// base schema is only available as built definitions.
    pub fn extending(base: Vec<PropertyDef>) -> Self {
        PropertySchema { defs: base }
    }

    pub fn field(mut self, name: impl Into<String>, kind: PrimitiveKind) -> Self {
        self.defs.push(PropertyDef::Field(FieldDef::new(name, kind)));
        self
    }

    /// Identifier field referencing another entity type.
    pub fn reference(
        mut self,
        name: impl Into<String>,
        target_type_name: impl Into<String>,
    ) -> Self {
        self.defs
            .push(PropertyDef::Field(FieldDef::reference(name, target_type_name)));
        self
    }

    pub fn inner_objects(mut self, def: InnerObjectsDef) -> Self {
        self.defs.push(PropertyDef::InnerObjects(def));
        self
    }

    pub fn build(self) -> Vec<PropertyDef> {
        self.defs
    }
}
