//! Order-driven field transfer between entities and a store backend.
//!
//! A backend owns the property cursor: every scalar call transfers exactly
//! one field and advances the cursor by one. Entities never pass an index
//! or a name; they call the read/write families in the registered property
//! order. A call that does not match the definition at the cursor is a
//! `SchemaConflict`.
//!
//! Inner-object collections are bracketed by the `begin_*`/`end_*` calls.
//! On the write side each record is opened and closed explicitly; on the
//! read side `next_inner_object` advances through the stored records until
//! it returns `false`.

use chrono::{DateTime, Utc};

use crate::errors::Result;
use crate::model::StoreId;

pub trait RepositoryWriter {
    fn write_bool(&mut self, value: bool) -> Result<()>;
    fn write_byte(&mut self, value: u8) -> Result<()>;
    fn write_i16(&mut self, value: i16) -> Result<()>;
    fn write_i32(&mut self, value: i32) -> Result<()>;
    fn write_i64(&mut self, value: i64) -> Result<()>;
    fn write_f32(&mut self, value: f32) -> Result<()>;
    fn write_f64(&mut self, value: f64) -> Result<()>;
    fn write_char(&mut self, value: char) -> Result<()>;
    fn write_string(&mut self, value: &str) -> Result<()>;
    fn write_date(&mut self, value: DateTime<Utc>) -> Result<()>;
    fn write_image(&mut self, value: &[u8]) -> Result<()>;
    /// Identifier reference; `None` persists as NULL.
    fn write_id(&mut self, value: Option<StoreId>) -> Result<()>;

    fn begin_inner_objects(&mut self) -> Result<()>;
    fn begin_inner_object(&mut self) -> Result<()>;
    fn end_inner_object(&mut self) -> Result<()>;
    fn end_inner_objects(&mut self) -> Result<()>;
}

pub trait RepositoryReader {
    fn read_bool(&mut self) -> Result<bool>;
    fn read_byte(&mut self) -> Result<u8>;
    fn read_i16(&mut self) -> Result<i16>;
    fn read_i32(&mut self) -> Result<i32>;
    fn read_i64(&mut self) -> Result<i64>;
    fn read_f32(&mut self) -> Result<f32>;
    fn read_f64(&mut self) -> Result<f64>;
    fn read_char(&mut self) -> Result<char>;
    fn read_string(&mut self) -> Result<String>;
    fn read_date(&mut self) -> Result<DateTime<Utc>>;
    fn read_image(&mut self) -> Result<Vec<u8>>;
    fn read_id(&mut self) -> Result<Option<StoreId>>;

    fn begin_inner_objects(&mut self) -> Result<()>;
    /// Advances to the next stored record; `false` when the collection is
    /// exhausted.
    fn next_inner_object(&mut self) -> Result<bool>;
    fn end_inner_objects(&mut self) -> Result<()>;
}
