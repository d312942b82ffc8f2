//! The serialization trait implemented by persistable entities.

use std::any::Any;
use std::fmt::Debug;

use crate::errors::Result;
use crate::transfer::{RepositoryReader, RepositoryWriter};

/// Implemented by every concrete entity the engine can persist.
///
/// `save_fields` and `load_fields` must visit the properties registered for
/// the entity's type, in registration order, one reader/writer call per
/// scalar. The `version` argument is the open store's schema version;
/// entities gate version-dependent properties on it so one implementation
/// can serve several on-disk layouts.
pub trait Persistable: Any + Debug {
    /// Full name of the registered entity type this instance belongs to.
    fn type_name(&self) -> &str;

    fn save_fields(&self, writer: &mut dyn RepositoryWriter, version: u32) -> Result<()>;

    fn load_fields(&mut self, reader: &mut dyn RepositoryReader, version: u32) -> Result<()>;

    /// Downcast support for callers that know the concrete type.
    fn as_any(&self) -> &dyn Any;

    fn as_any_mut(&mut self) -> &mut dyn Any;
}
