//! Parameter-bound write backend
//!
//! Walks an entity's registered property order while `save_fields` runs,
//! collecting one positional parameter per scalar slot. Composable
//! collections collapse into a single text parameter through the
//! delimited-string encoding; child-row collections are buffered and
//! executed after the outer statement, once the owner's id exists.

#![allow(clippy::result_large_err)]

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::Value;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;

use vellum_core::errors::VellumError;
use vellum_core::model::{FieldDef, PrimitiveKind, PropertyDef, StoreId};
use vellum_core::registry::EntityType;
use vellum_core::transfer::RepositoryWriter;

use crate::composite::{escape, CompositionWriter};
use crate::errors::Result;

/// Child rows buffered for execution after the outer statement.
#[derive(Debug)]
pub struct PendingChildRows {
    pub entity_type_name: String,
    pub rows: Vec<Vec<Value>>,
}

/// Everything one `save_fields` call produced.
#[derive(Debug)]
pub struct WrittenEntity {
    /// One value per parameter slot, in property order.
    pub params: Vec<Value>,
    pub children: Vec<PendingChildRows>,
}

enum Mode {
    Fields,
    Composite {
        fields: Vec<FieldDef>,
        writer: CompositionWriter,
        field_cursor: usize,
        in_record: bool,
    },
    ChildRows {
        entity_type_name: String,
        fields: Vec<FieldDef>,
        rows: Vec<Vec<Value>>,
        current: Option<Vec<Value>>,
        field_cursor: usize,
    },
}

/// Write-side property cursor over one entity row.
pub struct SqlWriter<'a> {
    entity_type: &'a EntityType,
    cursor: usize,
    params: Vec<Value>,
    children: Vec<PendingChildRows>,
    mode: Mode,
}

impl<'a> SqlWriter<'a> {
    pub fn new(entity_type: &'a EntityType) -> Self {
        SqlWriter {
            entity_type,
            cursor: 0,
            params: Vec::with_capacity(entity_type.parameter_slots()),
            children: Vec::new(),
            mode: Mode::Fields,
        }
    }

    /// Close the cursor, failing unless every property was written.
    pub fn finish(self) -> Result<WrittenEntity> {
        if !matches!(self.mode, Mode::Fields) {
            return Err(VellumError::schema_conflict(
                self.entity_type.full_name(),
                "inner-objects collection left open",
            ));
        }
        let defined = self.entity_type.properties().len();
        if self.cursor != defined {
            return Err(VellumError::schema_conflict(
                self.entity_type.full_name(),
                format!("entity wrote {} of {} properties", self.cursor, defined),
            ));
        }
        Ok(WrittenEntity {
            params: self.params,
            children: self.children,
        })
    }

    fn in_composite(&self) -> bool {
        matches!(self.mode, Mode::Composite { .. })
    }

    fn put_param(&mut self, kind: PrimitiveKind, value: Value) -> Result<()> {
        let entity_type = self.entity_type;
        match &mut self.mode {
            Mode::Fields => match entity_type.property_at(self.cursor) {
                Some(PropertyDef::Field(field)) if field.kind == kind => {
                    self.params.push(value);
                    self.cursor += 1;
                    Ok(())
                }
                Some(PropertyDef::Field(field)) => Err(VellumError::schema_conflict(
                    entity_type.full_name(),
                    format!(
                        "property '{}' expects {:?}, write of {:?} attempted",
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
                        "write past the last property definition ({} defined)",
                        entity_type.properties().len()
                    ),
                )),
            },
            Mode::ChildRows {
                fields,
                current,
                field_cursor,
                ..
            } => {
                let row = current.as_mut().ok_or_else(|| {
                    VellumError::schema_conflict(
                        entity_type.full_name(),
                        "scalar written outside begin_inner_object/end_inner_object",
                    )
                })?;
                let field = fields.get(*field_cursor).ok_or_else(|| {
                    VellumError::schema_conflict(
                        entity_type.full_name(),
                        "write past the nested record's field definitions",
                    )
                })?;
                if field.kind != kind {
                    return Err(VellumError::schema_conflict(
                        entity_type.full_name(),
                        format!(
                            "nested field '{}' expects {:?}, write of {:?} attempted",
                            field.name, field.kind, kind
                        ),
                    ));
                }
                row.push(value);
                *field_cursor += 1;
                Ok(())
            }
            Mode::Composite { .. } => Err(VellumError::schema_conflict(
                entity_type.full_name(),
                "parameter write while a delimited string is being composed",
            )),
        }
    }

    fn put_composite(&mut self, kind: PrimitiveKind, text: String) -> Result<()> {
        let entity_type = self.entity_type;
        match &mut self.mode {
            Mode::Composite {
                fields,
                writer,
                field_cursor,
                in_record,
            } => {
                if !*in_record {
                    return Err(VellumError::schema_conflict(
                        entity_type.full_name(),
                        "scalar written outside begin_inner_object/end_inner_object",
                    ));
                }
                let field = fields.get(*field_cursor).ok_or_else(|| {
                    VellumError::schema_conflict(
                        entity_type.full_name(),
                        "write past the nested record's field definitions",
                    )
                })?;
                if field.kind != kind {
                    return Err(VellumError::schema_conflict(
                        entity_type.full_name(),
                        format!(
                            "nested field '{}' expects {:?}, write of {:?} attempted",
                            field.name, field.kind, kind
                        ),
                    ));
                }
                writer.push_field(&text);
                *field_cursor += 1;
                Ok(())
            }
            _ => Err(VellumError::schema_conflict(
                entity_type.full_name(),
                "no delimited string in progress",
            )),
        }
    }

    fn put_composite_id(&mut self, value: Option<StoreId>) -> Result<()> {
        let entity_type = self.entity_type;
        match &mut self.mode {
            Mode::Composite {
                fields,
                writer,
                field_cursor,
                in_record,
            } => {
                if !*in_record {
                    return Err(VellumError::schema_conflict(
                        entity_type.full_name(),
                        "scalar written outside begin_inner_object/end_inner_object",
                    ));
                }
                let field = fields.get(*field_cursor).ok_or_else(|| {
                    VellumError::schema_conflict(
                        entity_type.full_name(),
                        "write past the nested record's field definitions",
                    )
                })?;
                if field.kind != PrimitiveKind::Id {
                    return Err(VellumError::schema_conflict(
                        entity_type.full_name(),
                        format!(
                            "nested field '{}' expects {:?}, write of Id attempted",
                            field.name, field.kind
                        ),
                    ));
                }
                writer.push_id(field.reference_target().unwrap_or(""), value);
                *field_cursor += 1;
                Ok(())
            }
            _ => Err(VellumError::schema_conflict(
                entity_type.full_name(),
                "no delimited string in progress",
            )),
        }
    }
}

impl RepositoryWriter for SqlWriter<'_> {
    fn write_bool(&mut self, value: bool) -> Result<()> {
        if self.in_composite() {
            self.put_composite(PrimitiveKind::Bool, if value { "1" } else { "0" }.to_string())
        } else {
            self.put_param(PrimitiveKind::Bool, Value::Integer(i64::from(value)))
        }
    }

    fn write_byte(&mut self, value: u8) -> Result<()> {
        if self.in_composite() {
            self.put_composite(PrimitiveKind::Byte, value.to_string())
        } else {
            self.put_param(PrimitiveKind::Byte, Value::Integer(i64::from(value)))
        }
    }

    fn write_i16(&mut self, value: i16) -> Result<()> {
        if self.in_composite() {
            self.put_composite(PrimitiveKind::Int16, value.to_string())
        } else {
            self.put_param(PrimitiveKind::Int16, Value::Integer(i64::from(value)))
        }
    }

    fn write_i32(&mut self, value: i32) -> Result<()> {
        if self.in_composite() {
            self.put_composite(PrimitiveKind::Int32, value.to_string())
        } else {
            self.put_param(PrimitiveKind::Int32, Value::Integer(i64::from(value)))
        }
    }

    fn write_i64(&mut self, value: i64) -> Result<()> {
        if self.in_composite() {
            self.put_composite(PrimitiveKind::Int64, value.to_string())
        } else {
            self.put_param(PrimitiveKind::Int64, Value::Integer(value))
        }
    }

    fn write_f32(&mut self, value: f32) -> Result<()> {
        if self.in_composite() {
            self.put_composite(PrimitiveKind::Float32, value.to_string())
        } else {
            self.put_param(PrimitiveKind::Float32, Value::Real(f64::from(value)))
        }
    }

    fn write_f64(&mut self, value: f64) -> Result<()> {
        if self.in_composite() {
            self.put_composite(PrimitiveKind::Float64, value.to_string())
        } else {
            self.put_param(PrimitiveKind::Float64, Value::Real(value))
        }
    }

    fn write_char(&mut self, value: char) -> Result<()> {
        if self.in_composite() {
            self.put_composite(PrimitiveKind::Char, escape(&value.to_string()))
        } else {
            self.put_param(PrimitiveKind::Char, Value::Text(value.to_string()))
        }
    }

    fn write_string(&mut self, value: &str) -> Result<()> {
        if self.in_composite() {
            self.put_composite(PrimitiveKind::Text, escape(value))
        } else {
            self.put_param(PrimitiveKind::Text, Value::Text(value.to_string()))
        }
    }

    fn write_date(&mut self, value: DateTime<Utc>) -> Result<()> {
        if self.in_composite() {
            let text = value.to_rfc3339_opts(SecondsFormat::Millis, true);
            self.put_composite(PrimitiveKind::Date, text)
        } else {
            self.put_param(PrimitiveKind::Date, Value::Integer(value.timestamp_millis()))
        }
    }

    fn write_image(&mut self, value: &[u8]) -> Result<()> {
        if self.in_composite() {
            self.put_composite(PrimitiveKind::Image, BASE64.encode(value))
        } else {
            self.put_param(PrimitiveKind::Image, Value::Blob(value.to_vec()))
        }
    }

    fn write_id(&mut self, value: Option<StoreId>) -> Result<()> {
        if self.in_composite() {
            self.put_composite_id(value)
        } else {
            let param = match value {
                Some(id) => Value::Integer(id.raw()),
                None => Value::Null,
            };
            self.put_param(PrimitiveKind::Id, param)
        }
    }

    fn begin_inner_objects(&mut self) -> Result<()> {
        let entity_type = self.entity_type;
        if !matches!(self.mode, Mode::Fields) {
            return Err(VellumError::schema_conflict(
                entity_type.full_name(),
                "inner-objects collections do not nest",
            ));
        }
        match entity_type.property_at(self.cursor) {
            Some(PropertyDef::InnerObjects(def)) => {
                if def.is_composable() {
                    self.mode = Mode::Composite {
                        fields: def.fields().to_vec(),
                        writer: CompositionWriter::new(),
                        field_cursor: 0,
                        in_record: false,
                    };
                } else {
                    self.mode = Mode::ChildRows {
                        entity_type_name: def.entity_type_name().to_string(),
                        fields: def.fields().to_vec(),
                        rows: Vec::new(),
                        current: None,
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

    fn begin_inner_object(&mut self) -> Result<()> {
        let entity_type = self.entity_type;
        match &mut self.mode {
            Mode::Composite {
                writer,
                field_cursor,
                in_record,
                ..
            } => {
                if *in_record {
                    return Err(VellumError::schema_conflict(
                        entity_type.full_name(),
                        "previous nested record was not closed",
                    ));
                }
                writer.begin_record();
                *field_cursor = 0;
                *in_record = true;
                Ok(())
            }
            Mode::ChildRows {
                fields,
                current,
                field_cursor,
                ..
            } => {
                if current.is_some() {
                    return Err(VellumError::schema_conflict(
                        entity_type.full_name(),
                        "previous nested record was not closed",
                    ));
                }
                *current = Some(Vec::with_capacity(fields.len()));
                *field_cursor = 0;
                Ok(())
            }
            Mode::Fields => Err(VellumError::schema_conflict(
                entity_type.full_name(),
                "no inner-objects collection in progress",
            )),
        }
    }

    fn end_inner_object(&mut self) -> Result<()> {
        let entity_type = self.entity_type;
        match &mut self.mode {
            Mode::Composite {
                fields,
                writer,
                field_cursor,
                in_record,
            } => {
                if !*in_record {
                    return Err(VellumError::schema_conflict(
                        entity_type.full_name(),
                        "end_inner_object without a record in progress",
                    ));
                }
                if *field_cursor != fields.len() {
                    return Err(VellumError::schema_conflict(
                        entity_type.full_name(),
                        format!(
                            "nested record wrote {} of {} fields",
                            field_cursor,
                            fields.len()
                        ),
                    ));
                }
                writer.end_record();
                *in_record = false;
                Ok(())
            }
            Mode::ChildRows {
                fields,
                rows,
                current,
                field_cursor,
                ..
            } => {
                let row = current.take().ok_or_else(|| {
                    VellumError::schema_conflict(
                        entity_type.full_name(),
                        "end_inner_object without a record in progress",
                    )
                })?;
                if *field_cursor != fields.len() {
                    return Err(VellumError::schema_conflict(
                        entity_type.full_name(),
                        format!(
                            "nested record wrote {} of {} fields",
                            field_cursor,
                            fields.len()
                        ),
                    ));
                }
                rows.push(row);
                Ok(())
            }
            Mode::Fields => Err(VellumError::schema_conflict(
                entity_type.full_name(),
                "no inner-objects collection in progress",
            )),
        }
    }

    fn end_inner_objects(&mut self) -> Result<()> {
        let entity_type = self.entity_type;
        let mode = std::mem::replace(&mut self.mode, Mode::Fields);
        match mode {
            Mode::Composite {
                writer, in_record, ..
            } => {
                if in_record {
                    return Err(VellumError::schema_conflict(
                        entity_type.full_name(),
                        "collection closed with an open record",
                    ));
                }
                self.params.push(Value::Text(writer.finish()));
                self.cursor += 1;
                Ok(())
            }
            Mode::ChildRows {
                entity_type_name,
                rows,
                current,
                ..
            } => {
                if current.is_some() {
                    return Err(VellumError::schema_conflict(
                        entity_type.full_name(),
                        "collection closed with an open record",
                    ));
                }
                self.children.push(PendingChildRows {
                    entity_type_name,
                    rows,
                });
                self.cursor += 1;
                Ok(())
            }
            Mode::Fields => Err(VellumError::schema_conflict(
                entity_type.full_name(),
                "no inner-objects collection in progress",
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vellum_core::model::{EntityCategory, InnerObjectsDef, Persistable, PropertySchema};

    #[derive(Debug)]
    struct Nothing;

    impl Persistable for Nothing {
        fn type_name(&self) -> &str {
            "test.nothing"
        }

        fn save_fields(
            &self,
            _writer: &mut dyn RepositoryWriter,
            _version: u32,
        ) -> Result<()> {
            Ok(())
        }

        fn load_fields(
            &mut self,
            _reader: &mut dyn vellum_core::transfer::RepositoryReader,
            _version: u32,
        ) -> Result<()> {
            Ok(())
        }

        fn as_any(&self) -> &dyn std::any::Any {
            self
        }

        fn as_any_mut(&mut self) -> &mut dyn std::any::Any {
            self
        }
    }

    fn polygon_type() -> EntityType {
        EntityType::new(
            "shapes.polygon",
            EntityCategory::Shape,
            5,
            PropertySchema::new()
                .field("name", PrimitiveKind::Text)
                .field("fill_style", PrimitiveKind::Id)
                .inner_objects(InnerObjectsDef::new(
                    "vertices",
                    "core.point",
                    vec![
                        FieldDef::new("x", PrimitiveKind::Int32),
                        FieldDef::new("y", PrimitiveKind::Int32),
                    ],
                ))
                .inner_objects(InnerObjectsDef::new(
                    "glue_points",
                    "core.glue_point",
                    vec![
                        FieldDef::new("index", PrimitiveKind::Int32),
                        FieldDef::new("offset", PrimitiveKind::Float32),
                    ],
                ))
                .build(),
            Box::new(|| Box::new(Nothing)),
        )
    }

    #[test]
    fn test_scalars_land_in_property_order() {
        let entity_type = polygon_type();
        let mut writer = SqlWriter::new(&entity_type);
        writer.write_string("poly").unwrap();
        writer.write_id(Some(StoreId::new(9))).unwrap();
        writer.begin_inner_objects().unwrap();
        writer.end_inner_objects().unwrap();
        writer.begin_inner_objects().unwrap();
        writer.end_inner_objects().unwrap();
        let written = writer.finish().unwrap();

        assert_eq!(written.params.len(), 3);
        assert_eq!(written.params[0], Value::Text("poly".to_string()));
        assert_eq!(written.params[1], Value::Integer(9));
        assert_eq!(written.params[2], Value::Text(String::new()));
        assert_eq!(written.children.len(), 1);
        assert!(written.children[0].rows.is_empty());
    }

    #[test]
    fn test_composable_collection_becomes_one_text_parameter() {
        let entity_type = polygon_type();
        let mut writer = SqlWriter::new(&entity_type);
        writer.write_string("poly").unwrap();
        writer.write_id(None).unwrap();
        writer.begin_inner_objects().unwrap();
        writer.begin_inner_object().unwrap();
        writer.write_i32(10).unwrap();
        writer.write_i32(-3).unwrap();
        writer.end_inner_object().unwrap();
        writer.begin_inner_object().unwrap();
        writer.write_i32(0).unwrap();
        writer.write_i32(44).unwrap();
        writer.end_inner_object().unwrap();
        writer.end_inner_objects().unwrap();
        writer.begin_inner_objects().unwrap();
        writer.end_inner_objects().unwrap();
        let written = writer.finish().unwrap();

        assert_eq!(written.params[1], Value::Null);
        assert_eq!(written.params[2], Value::Text("10,-3;0,44;".to_string()));
    }

    #[test]
    fn test_child_rows_are_buffered_not_inlined() {
        let entity_type = polygon_type();
        let mut writer = SqlWriter::new(&entity_type);
        writer.write_string("poly").unwrap();
        writer.write_id(None).unwrap();
        writer.begin_inner_objects().unwrap();
        writer.end_inner_objects().unwrap();
        writer.begin_inner_objects().unwrap();
        writer.begin_inner_object().unwrap();
        writer.write_i32(1).unwrap();
        writer.write_f32(0.5).unwrap();
        writer.end_inner_object().unwrap();
        writer.end_inner_objects().unwrap();
        let written = writer.finish().unwrap();

        assert_eq!(written.params.len(), 3);
        let pending = &written.children[0];
        assert_eq!(pending.entity_type_name, "core.glue_point");
        assert_eq!(pending.rows, vec![vec![Value::Integer(1), Value::Real(0.5)]]);
    }

    #[test]
    fn test_kind_mismatch_is_schema_conflict() {
        let entity_type = polygon_type();
        let mut writer = SqlWriter::new(&entity_type);
        let err = writer.write_i32(1).unwrap_err();
        assert!(matches!(err, VellumError::SchemaConflict { .. }));
    }

    #[test]
    fn test_incomplete_entity_fails_finish() {
        let entity_type = polygon_type();
        let mut writer = SqlWriter::new(&entity_type);
        writer.write_string("poly").unwrap();
        let err = writer.finish().unwrap_err();
        assert!(matches!(err, VellumError::SchemaConflict { .. }));
    }

    #[test]
    fn test_incomplete_nested_record_is_rejected() {
        let entity_type = polygon_type();
        let mut writer = SqlWriter::new(&entity_type);
        writer.write_string("poly").unwrap();
        writer.write_id(None).unwrap();
        writer.begin_inner_objects().unwrap();
        writer.begin_inner_object().unwrap();
        writer.write_i32(10).unwrap();
        let err = writer.end_inner_object().unwrap_err();
        assert!(matches!(err, VellumError::SchemaConflict { .. }));
    }

    #[test]
    fn test_bool_and_date_use_integer_affinity() {
        let entity_type = EntityType::new(
            "core.flag",
            EntityCategory::Project,
            5,
            PropertySchema::new()
                .field("enabled", PrimitiveKind::Bool)
                .field("touched_at", PrimitiveKind::Date)
                .build(),
            Box::new(|| Box::new(Nothing)),
        );
        let mut writer = SqlWriter::new(&entity_type);
        writer.write_bool(true).unwrap();
        let moment = DateTime::from_timestamp_millis(86_400_123).unwrap();
        writer.write_date(moment).unwrap();
        let written = writer.finish().unwrap();
        assert_eq!(written.params[0], Value::Integer(1));
        assert_eq!(written.params[1], Value::Integer(86_400_123));
    }
}
