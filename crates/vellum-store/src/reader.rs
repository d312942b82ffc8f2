//! Parameter-bound read backend
//!
//! Feeds one materialized row back through an entity's `load_fields`,
//! enforcing the same property order the writer recorded. Column 0 is the
//! entity id, column 1 the owner reference; field slots start at column 2.
//! Child-row collections run the nested type's select lazily when the
//! entity brackets them.

#![allow(clippy::result_large_err)]

use chrono::{DateTime, Utc};
use rusqlite::types::Value;
use rusqlite::Connection;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;

use vellum_core::errors::VellumError;
use vellum_core::model::{FieldDef, OperationKind, PrimitiveKind, PropertyDef, StoreId};
use vellum_core::registry::EntityType;
use vellum_core::transfer::RepositoryReader;

use crate::command::CommandTable;
use crate::composite::{CompositionParser, RawField};
use crate::errors::Result;

/// Id and owner columns precede the field slots in every entity select.
pub const RESERVED_COLUMNS: usize = 2;

#[derive(Debug)]
enum ReadMode {
    Fields,
    Composite {
        fields: Vec<FieldDef>,
        parser: CompositionParser,
        field_cursor: usize,
        in_record: bool,
    },
    ChildRows {
        fields: Vec<FieldDef>,
        rows: Vec<Vec<Value>>,
        next_row: usize,
        active: bool,
        field_cursor: usize,
    },
}

/// Read-side property cursor over one entity row.
#[derive(Debug)]
pub struct SqlReader<'a> {
    entity_type: &'a EntityType,
    columns: Vec<Value>,
    cursor: usize,
    slot: usize,
    mode: ReadMode,
    conn: &'a Connection,
    commands: &'a CommandTable,
}

impl<'a> SqlReader<'a> {
    /// # Errors
    ///
    /// Returns `InvalidRepositoryFormat` when the row width disagrees with
    /// the registered property definitions.
    pub fn new(
        entity_type: &'a EntityType,
        columns: Vec<Value>,
        conn: &'a Connection,
        commands: &'a CommandTable,
    ) -> Result<Self> {
        let expected = RESERVED_COLUMNS + entity_type.parameter_slots();
        if columns.len() != expected {
            return Err(VellumError::invalid_format(format!(
                "row for '{}' has {} columns, schema expects {}",
                entity_type.full_name(),
                columns.len(),
                expected
            )));
        }
        Ok(SqlReader {
            entity_type,
            columns,
            cursor: 0,
            slot: 0,
            mode: ReadMode::Fields,
            conn,
            commands,
        })
    }

    /// Entity id from the reserved column.
    pub fn row_id(&self) -> Result<StoreId> {
        match &self.columns[0] {
            Value::Integer(raw) => Ok(StoreId::new(*raw)),
            other => Err(bad_column("integer id", other)),
        }
    }

    /// Owner reference from the reserved column, NULL for project-owned rows.
    pub fn row_owner_id(&self) -> Result<Option<StoreId>> {
        match &self.columns[1] {
            Value::Integer(raw) => Ok(Some(StoreId::new(*raw))),
            Value::Null => Ok(None),
            other => Err(bad_column("integer owner reference", other)),
        }
    }

    /// Close the cursor, failing unless every property was read.
    pub fn finish(self) -> Result<()> {
        if !matches!(self.mode, ReadMode::Fields) {
            return Err(VellumError::schema_conflict(
                self.entity_type.full_name(),
                "inner-objects collection left open",
            ));
        }
        let defined = self.entity_type.properties().len();
        if self.cursor != defined {
            return Err(VellumError::schema_conflict(
                self.entity_type.full_name(),
                format!("entity read {} of {} properties", self.cursor, defined),
            ));
        }
        Ok(())
    }

    fn in_composite(&self) -> bool {
        matches!(self.mode, ReadMode::Composite { .. })
    }

    fn take_param(&mut self, kind: PrimitiveKind) -> Result<Value> {
        let entity_type = self.entity_type;
        match &mut self.mode {
            ReadMode::Fields => match entity_type.property_at(self.cursor) {
                Some(PropertyDef::Field(field)) if field.kind == kind => {
                    let value = self.columns[RESERVED_COLUMNS + self.slot].clone();
                    self.slot += 1;
                    self.cursor += 1;
                    Ok(value)
                }
                Some(PropertyDef::Field(field)) => Err(VellumError::schema_conflict(
                    entity_type.full_name(),
                    format!(
                        "property '{}' expects {:?}, read of {:?} attempted",
                        field.name, field.kind, kind
                    ),
                )),
                Some(PropertyDef::InnerObjects(def)) => Err(VellumError::schema_conflict(
                    entity_type.full_name(),
                    format!(
                        "property '{}' is an inner-objects collection, not a scalar",
                        def.name()
                    ),
                )),
                None => Err(VellumError::schema_conflict(
                    entity_type.full_name(),
                    format!(
                        "read past the last property definition ({} defined)",
                        entity_type.properties().len()
                    ),
                )),
            },
            ReadMode::ChildRows {
                fields,
                rows,
                next_row,
                active,
                field_cursor,
            } => {
                if !*active {
                    return Err(VellumError::schema_conflict(
                        entity_type.full_name(),
                        "scalar read outside a nested record",
                    ));
                }
                let field = fields.get(*field_cursor).ok_or_else(|| {
                    VellumError::schema_conflict(
                        entity_type.full_name(),
                        "read past the nested record's field definitions",
                    )
                })?;
                if field.kind != kind {
                    return Err(VellumError::schema_conflict(
                        entity_type.full_name(),
                        format!(
                            "nested field '{}' expects {:?}, read of {:?} attempted",
                            field.name, field.kind, kind
                        ),
                    ));
                }
                // child rows lead with the owner reference
                let value = rows[*next_row - 1][1 + *field_cursor].clone();
                *field_cursor += 1;
                Ok(value)
            }
            ReadMode::Composite { .. } => Err(VellumError::schema_conflict(
                entity_type.full_name(),
                "parameter read while a delimited string is being decoded",
            )),
        }
    }

    fn take_composite(&mut self, kind: PrimitiveKind) -> Result<RawField> {
        let entity_type = self.entity_type;
        match &mut self.mode {
            ReadMode::Composite {
                fields,
                parser,
                field_cursor,
                in_record,
            } => {
                if !*in_record {
                    return Err(VellumError::schema_conflict(
                        entity_type.full_name(),
                        "scalar read outside a nested record",
                    ));
                }
                let field = fields.get(*field_cursor).ok_or_else(|| {
                    VellumError::schema_conflict(
                        entity_type.full_name(),
                        "read past the nested record's field definitions",
                    )
                })?;
                if field.kind != kind {
                    return Err(VellumError::schema_conflict(
                        entity_type.full_name(),
                        format!(
                            "nested field '{}' expects {:?}, read of {:?} attempted",
                            field.name, field.kind, kind
                        ),
                    ));
                }
                let last = *field_cursor + 1 == fields.len();
                let raw = parser.read_field(last)?;
                *field_cursor += 1;
                if last {
                    *in_record = false;
                }
                Ok(raw)
            }
            _ => Err(VellumError::schema_conflict(
                entity_type.full_name(),
                "no delimited string being decoded",
            )),
        }
    }
}

fn bad_column(what: &str, found: &Value) -> VellumError {
    VellumError::invalid_format(format!("expected {} column, found {:?}", what, found))
}

fn bad_field(what: &str, found: &str) -> VellumError {
    VellumError::invalid_format(format!("expected {} field, found '{}'", what, found))
}

impl RepositoryReader for SqlReader<'_> {
    fn read_bool(&mut self) -> Result<bool> {
        if self.in_composite() {
            let raw = self.take_composite(PrimitiveKind::Bool)?;
            match raw.value.as_str() {
                "1" => Ok(true),
                "0" => Ok(false),
                other => Err(bad_field("boolean", other)),
            }
        } else {
            match self.take_param(PrimitiveKind::Bool)? {
                Value::Integer(flag) => Ok(flag != 0),
                other => Err(bad_column("boolean", &other)),
            }
        }
    }

    fn read_byte(&mut self) -> Result<u8> {
        if self.in_composite() {
            let raw = self.take_composite(PrimitiveKind::Byte)?;
            raw.value.parse().map_err(|_| bad_field("byte", &raw.value))
        } else {
            match self.take_param(PrimitiveKind::Byte)? {
                Value::Integer(wide) => {
                    u8::try_from(wide).map_err(|_| bad_column("byte", &Value::Integer(wide)))
                }
                other => Err(bad_column("byte", &other)),
            }
        }
    }

    fn read_i16(&mut self) -> Result<i16> {
        if self.in_composite() {
            let raw = self.take_composite(PrimitiveKind::Int16)?;
            raw.value.parse().map_err(|_| bad_field("16-bit integer", &raw.value))
        } else {
            match self.take_param(PrimitiveKind::Int16)? {
                Value::Integer(wide) => i16::try_from(wide)
                    .map_err(|_| bad_column("16-bit integer", &Value::Integer(wide))),
                other => Err(bad_column("16-bit integer", &other)),
            }
        }
    }

    fn read_i32(&mut self) -> Result<i32> {
        if self.in_composite() {
            let raw = self.take_composite(PrimitiveKind::Int32)?;
            raw.value.parse().map_err(|_| bad_field("32-bit integer", &raw.value))
        } else {
            match self.take_param(PrimitiveKind::Int32)? {
                Value::Integer(wide) => i32::try_from(wide)
                    .map_err(|_| bad_column("32-bit integer", &Value::Integer(wide))),
                other => Err(bad_column("32-bit integer", &other)),
            }
        }
    }

    fn read_i64(&mut self) -> Result<i64> {
        if self.in_composite() {
            let raw = self.take_composite(PrimitiveKind::Int64)?;
            raw.value.parse().map_err(|_| bad_field("64-bit integer", &raw.value))
        } else {
            match self.take_param(PrimitiveKind::Int64)? {
                Value::Integer(value) => Ok(value),
                other => Err(bad_column("64-bit integer", &other)),
            }
        }
    }

    fn read_f32(&mut self) -> Result<f32> {
        if self.in_composite() {
            let raw = self.take_composite(PrimitiveKind::Float32)?;
            raw.value.parse().map_err(|_| bad_field("float", &raw.value))
        } else {
            match self.take_param(PrimitiveKind::Float32)? {
                Value::Real(value) => Ok(value as f32),
                // SQLite stores whole floats with integer affinity
                Value::Integer(value) => Ok(value as f32),
                other => Err(bad_column("float", &other)),
            }
        }
    }

    fn read_f64(&mut self) -> Result<f64> {
        if self.in_composite() {
            let raw = self.take_composite(PrimitiveKind::Float64)?;
            raw.value.parse().map_err(|_| bad_field("double", &raw.value))
        } else {
            match self.take_param(PrimitiveKind::Float64)? {
                Value::Real(value) => Ok(value),
                Value::Integer(value) => Ok(value as f64),
                other => Err(bad_column("double", &other)),
            }
        }
    }

    fn read_char(&mut self) -> Result<char> {
        let text = if self.in_composite() {
            self.take_composite(PrimitiveKind::Char)?.value
        } else {
            match self.take_param(PrimitiveKind::Char)? {
                Value::Text(text) => text,
                other => return Err(bad_column("single character", &other)),
            }
        };
        let mut chars = text.chars();
        match (chars.next(), chars.next()) {
            (Some(ch), None) => Ok(ch),
            _ => Err(bad_field("single character", &text)),
        }
    }

    fn read_string(&mut self) -> Result<String> {
        if self.in_composite() {
            Ok(self.take_composite(PrimitiveKind::Text)?.value)
        } else {
            match self.take_param(PrimitiveKind::Text)? {
                Value::Text(text) => Ok(text),
                other => Err(bad_column("text", &other)),
            }
        }
    }

    fn read_date(&mut self) -> Result<DateTime<Utc>> {
        if self.in_composite() {
            let raw = self.take_composite(PrimitiveKind::Date)?;
            DateTime::parse_from_rfc3339(&raw.value)
                .map(|parsed| parsed.with_timezone(&Utc))
                .map_err(|_| bad_field("RFC 3339 date", &raw.value))
        } else {
            match self.take_param(PrimitiveKind::Date)? {
                Value::Integer(millis) => DateTime::from_timestamp_millis(millis)
                    .ok_or_else(|| bad_column("timestamp", &Value::Integer(millis))),
                other => Err(bad_column("timestamp", &other)),
            }
        }
    }

    fn read_image(&mut self) -> Result<Vec<u8>> {
        if self.in_composite() {
            let raw = self.take_composite(PrimitiveKind::Image)?;
            BASE64
                .decode(raw.value.as_bytes())
                .map_err(|_| bad_field("base64 image", &raw.value))
        } else {
            match self.take_param(PrimitiveKind::Image)? {
                Value::Blob(bytes) => Ok(bytes),
                other => Err(bad_column("image blob", &other)),
            }
        }
    }

    fn read_id(&mut self) -> Result<Option<StoreId>> {
        if self.in_composite() {
            let raw = self.take_composite(PrimitiveKind::Id)?;
            if raw.type_name.is_none() {
                return Err(VellumError::invalid_format(
                    "identifier field is missing its type wrapper",
                ));
            }
            if raw.value.is_empty() {
                return Ok(None);
            }
            raw.value
                .parse()
                .map(|id| Some(StoreId::new(id)))
                .map_err(|_| bad_field("identifier", &raw.value))
        } else {
            match self.take_param(PrimitiveKind::Id)? {
                Value::Integer(raw) => Ok(Some(StoreId::new(raw))),
                Value::Null => Ok(None),
                other => Err(bad_column("identifier", &other)),
            }
        }
    }

    fn begin_inner_objects(&mut self) -> Result<()> {
        let entity_type = self.entity_type;
        if !matches!(self.mode, ReadMode::Fields) {
            return Err(VellumError::schema_conflict(
                entity_type.full_name(),
                "inner-objects collections do not nest",
            ));
        }
        match entity_type.property_at(self.cursor) {
            Some(PropertyDef::InnerObjects(def)) => {
                if def.is_composable() {
                    let text = match self.columns[RESERVED_COLUMNS + self.slot].clone() {
                        Value::Text(text) => text,
                        Value::Null => String::new(),
                        other => return Err(bad_column("delimited string", &other)),
                    };
                    self.slot += 1;
                    self.mode = ReadMode::Composite {
                        fields: def.fields().to_vec(),
                        parser: CompositionParser::new(&text),
                        field_cursor: 0,
                        in_record: false,
                    };
                } else {
                    let command = self
                        .commands
                        .get(def.entity_type_name(), OperationKind::SelectByOwnerId)?;
                    let op = format!("load {} child rows", def.entity_type_name());
                    let parent = self.columns[0].clone();
                    let rows = command.query_rows(self.conn, &op, &[parent])?;
                    let width = 1 + def.fields().len();
                    if rows.iter().any(|row| row.len() != width) {
                        return Err(VellumError::invalid_format(format!(
                            "child rows for '{}' disagree with its field definitions",
                            def.entity_type_name()
                        )));
                    }
                    self.mode = ReadMode::ChildRows {
                        fields: def.fields().to_vec(),
                        rows,
                        next_row: 0,
                        active: false,
                        field_cursor: 0,
                    };
                }
                Ok(())
            }
            Some(PropertyDef::Field(field)) => Err(VellumError::schema_conflict(
                entity_type.full_name(),
                format!("property '{}' is a scalar field, not a collection", field.name),
            )),
            None => Err(VellumError::schema_conflict(
                entity_type.full_name(),
                "begin_inner_objects past the last property definition",
            )),
        }
    }

    fn next_inner_object(&mut self) -> Result<bool> {
        let entity_type = self.entity_type;
        match &mut self.mode {
            ReadMode::Composite {
                fields,
                parser,
                field_cursor,
                in_record,
            } => {
                if *in_record {
                    return Err(VellumError::schema_conflict(
                        entity_type.full_name(),
                        format!(
                            "nested record read {} of {} fields",
                            field_cursor,
                            fields.len()
                        ),
                    ));
                }
                if parser.has_record() {
                    *field_cursor = 0;
                    *in_record = true;
                    Ok(true)
                } else {
                    Ok(false)
                }
            }
            ReadMode::ChildRows {
                fields,
                rows,
                next_row,
                active,
                field_cursor,
            } => {
                if *active && *field_cursor != fields.len() {
                    return Err(VellumError::schema_conflict(
                        entity_type.full_name(),
                        format!(
                            "nested record read {} of {} fields",
                            field_cursor,
                            fields.len()
                        ),
                    ));
                }
                if *next_row < rows.len() {
                    *next_row += 1;
                    *field_cursor = 0;
                    *active = true;
                    Ok(true)
                } else {
                    *active = false;
                    Ok(false)
                }
            }
            ReadMode::Fields => Err(VellumError::schema_conflict(
                entity_type.full_name(),
                "no inner-objects collection in progress",
            )),
        }
    }

    fn end_inner_objects(&mut self) -> Result<()> {
        let entity_type = self.entity_type;
        let mode = std::mem::replace(&mut self.mode, ReadMode::Fields);
        match mode {
            ReadMode::Composite {
                parser, in_record, ..
            } => {
                if in_record {
                    return Err(VellumError::schema_conflict(
                        entity_type.full_name(),
                        "collection closed with an open record",
                    ));
                }
                if parser.has_record() {
                    return Err(VellumError::schema_conflict(
                        entity_type.full_name(),
                        "collection closed before every record was read",
                    ));
                }
                self.cursor += 1;
                Ok(())
            }
            ReadMode::ChildRows {
                fields,
                rows,
                next_row,
                active,
                field_cursor,
            } => {
                if active && field_cursor != fields.len() {
                    return Err(VellumError::schema_conflict(
                        entity_type.full_name(),
                        format!("nested record read {} of {} fields", field_cursor, fields.len()),
                    ));
                }
                if next_row < rows.len() {
                    return Err(VellumError::schema_conflict(
                        entity_type.full_name(),
                        "collection closed before every record was read",
                    ));
                }
                self.cursor += 1;
                Ok(())
            }
            ReadMode::Fields => Err(VellumError::schema_conflict(
                entity_type.full_name(),
                "no inner-objects collection in progress",
            )),
        }
    }
}
