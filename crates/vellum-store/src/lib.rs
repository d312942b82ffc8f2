//! Vellum Store - SQLite persistence for the entity engine
//!
//! Provides:
//! - Connection setup with the pragmas the engine relies on
//! - Schema and command-table generation from a type registry
//! - Positional reader/writer pair implementing the transfer contract
//! - The repository: tracked loads, in-use checks and the transactional
//!   flush
//!
//! Hosts register their entity types in a [`vellum_core::registry::EntityTypeRegistry`],
//! generate (or hand-write) a [`CommandTable`], and talk to the store
//! through [`Repository`].

pub mod command;
pub mod composite;
pub mod db;
pub mod errors;
pub mod reader;
pub mod repository;
pub mod schema;
pub mod writer;

// Re-export key types
pub use command::{CommandTable, StoreCommand, PROJECT_INFO_TYPE, SHAPE_CONNECTION_TYPE};
pub use errors::Result;
pub use reader::SqlReader;
pub use repository::{ProjectInfo, Repository};
pub use schema::{
    build_command_table, create_schema, verify_schema, DIAGRAM_MODEL_OBJECT_MIN_VERSION,
    REPOSITORY_VERSION,
};
pub use writer::SqlWriter;
