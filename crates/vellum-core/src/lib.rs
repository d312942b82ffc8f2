//! Vellum Core - store-agnostic half of the persistence engine
//!
//! This crate provides the vocabulary the store backends build on,
//! including:
//! - Entity categories, property definitions, and the type registry
//! - The `Persistable` trait and the reader/writer transfer contract
//! - The entity cache with lifecycle tracking (new/modified/deleted/
//!   owner-changed) and shape-connection bookkeeping
//! - The shared error taxonomy and the logging bootstrap
//!
//! Nothing here touches SQL; `vellum-store` supplies the backends and the
//! transaction orchestration.

pub mod cache;
pub mod errors;
pub mod logging;
pub mod model;
pub mod registry;
pub mod transfer;

// Re-export commonly used types
pub use cache::{EntityCache, EntityHandle, EntityState, ShapeConnection};
pub use errors::{Result, VellumError};
pub use model::{
    EntityCategory, FieldDef, InnerObjectsDef, MappingKind, OperationKind, Persistable,
    PrimitiveKind, PropertyDef, PropertySchema, StoreId, StyleKind,
};
pub use registry::{EntityFactory, EntityType, EntityTypeRegistry};
pub use transfer::{RepositoryReader, RepositoryWriter};
