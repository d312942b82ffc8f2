//! Store-assigned identifiers.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Identifier assigned by the backing store on an entity's first successful
/// insert.
///
/// An entity that has never been flushed has no identifier; the engine
/// models that as `Option<StoreId>`. A value, once assigned, is never reused
/// or reassigned for the lifetime of the bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StoreId(i64);

impl StoreId {
    pub fn new(raw: i64) -> Self {
        StoreId(raw)
    }

    pub fn raw(self) -> i64 {
        self.0
    }
}

impl fmt::Display for StoreId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
