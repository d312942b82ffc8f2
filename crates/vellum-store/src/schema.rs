//! Schema and command generation from the registered entity types
//!
//! One table per entity type, one table per child-row collection, plus the
//! engine's own tables: `project_info`, `shape_connection`, the
//! `id_allocator` every identifier is drawn from, and the `schema_manifest`
//! fingerprint row that guards against registering a different type set
//! against an existing store. In-use check statements are deliberately not
//! generated; hosts register those per shape library.

#![allow(clippy::result_large_err)]

use std::collections::HashMap;

use chrono::Utc;
use rusqlite::{Connection, OptionalExtension};
use sha2::{Digest, Sha256};

use vellum_core::errors::VellumError;
use vellum_core::model::{InnerObjectsDef, OperationKind, PrimitiveKind, PropertyDef};
use vellum_core::registry::{EntityType, EntityTypeRegistry};

use crate::command::{CommandTable, StoreCommand, PROJECT_INFO_TYPE, SHAPE_CONNECTION_TYPE};
use crate::errors::{from_rusqlite, Result};

/// Version written into fresh stores.
pub const REPOSITORY_VERSION: u32 = 5;

/// Diagram model objects exist only from this repository version on.
pub const DIAGRAM_MODEL_OBJECT_MIN_VERSION: u32 = 4;

/// Map a full type name onto a table name SQLite accepts unquoted.
pub fn table_name(full_name: &str) -> String {
    full_name
        .chars()
        .map(|ch| if ch.is_ascii_alphanumeric() { ch } else { '_' })
        .collect()
}

fn quote(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn column_type(kind: PrimitiveKind) -> &'static str {
    match kind {
        PrimitiveKind::Bool
        | PrimitiveKind::Byte
        | PrimitiveKind::Int16
        | PrimitiveKind::Int32
        | PrimitiveKind::Int64
        | PrimitiveKind::Date
        | PrimitiveKind::Id => "INTEGER",
        PrimitiveKind::Float32 | PrimitiveKind::Float64 => "REAL",
        PrimitiveKind::Char | PrimitiveKind::Text => "TEXT",
        PrimitiveKind::Image => "BLOB",
    }
}

/// Field and composable-collection column names of one type, in property
/// order. Child-row collections contribute no column.
fn slot_columns(entity_type: &EntityType) -> Vec<(String, &'static str)> {
    let mut columns = Vec::new();
    for property in entity_type.properties() {
        match property {
            PropertyDef::Field(field) => {
                columns.push((field.name.clone(), column_type(field.kind)));
            }
            PropertyDef::InnerObjects(def) if def.is_composable() => {
                columns.push((def.name().to_string(), "TEXT"));
            }
            PropertyDef::InnerObjects(_) => {}
        }
    }
    columns
}

/// Collect the child-row collections of every registered type, one entry
/// per nested type name.
///
/// # Errors
///
/// Returns `SchemaConflict` when two types declare the same nested type
/// name with different field lists.
fn collect_child_defs(registry: &EntityTypeRegistry) -> Result<Vec<&InnerObjectsDef>> {
    let mut seen: HashMap<&str, &InnerObjectsDef> = HashMap::new();
    let mut defs = Vec::new();
    for entity_type in registry.all() {
        for property in entity_type.properties() {
            let PropertyDef::InnerObjects(def) = property else {
                continue;
            };
            if def.is_composable() {
                continue;
            }
            if registry.contains(def.entity_type_name()) {
                return Err(VellumError::schema_conflict(
                    def.entity_type_name(),
                    "nested type name collides with a registered entity type",
                ));
            }
            match seen.get(def.entity_type_name()) {
                None => {
                    seen.insert(def.entity_type_name(), def);
                    defs.push(def);
                }
                Some(existing) if existing.fields() == def.fields() => {}
                Some(_) => {
                    return Err(VellumError::schema_conflict(
                        def.entity_type_name(),
                        "nested type is declared twice with different field lists",
                    ));
                }
            }
        }
    }
    Ok(defs)
}

/// Create every table and index the registered types need, then stamp the
/// manifest row. Idempotent over an existing identical schema.
pub fn create_schema(conn: &Connection, registry: &EntityTypeRegistry, version: u32) -> Result<()> {
    let mut ddl = String::new();

    for entity_type in registry.all() {
        let table = quote(&table_name(entity_type.full_name()));
        ddl.push_str(&format!("CREATE TABLE IF NOT EXISTS {} (\n", table));
        ddl.push_str("    \"id\" INTEGER PRIMARY KEY,\n");
        ddl.push_str("    \"owner_id\" INTEGER,\n");
        ddl.push_str("    \"parent_id\" INTEGER");
        for (name, sql_type) in slot_columns(entity_type) {
            ddl.push_str(&format!(",\n    {} {}", quote(&name), sql_type));
        }
        ddl.push_str("\n);\n");
        let base = table_name(entity_type.full_name());
        ddl.push_str(&format!(
            "CREATE INDEX IF NOT EXISTS {} ON {} (\"owner_id\");\n",
            quote(&format!("idx_{}_owner", base)),
            table
        ));
        ddl.push_str(&format!(
            "CREATE INDEX IF NOT EXISTS {} ON {} (\"parent_id\");\n",
            quote(&format!("idx_{}_parent", base)),
            table
        ));
    }

    for def in collect_child_defs(registry)? {
        let base = table_name(def.entity_type_name());
        let table = quote(&base);
        ddl.push_str(&format!("CREATE TABLE IF NOT EXISTS {} (\n", table));
        ddl.push_str("    \"owner_id\" INTEGER NOT NULL");
        for field in def.fields() {
            ddl.push_str(&format!(
                ",\n    {} {}",
                quote(&field.name),
                column_type(field.kind)
            ));
        }
        ddl.push_str("\n);\n");
        ddl.push_str(&format!(
            "CREATE INDEX IF NOT EXISTS {} ON {} (\"owner_id\");\n",
            quote(&format!("idx_{}_owner", base)),
            table
        ));
    }

    ddl.push_str(
        "CREATE TABLE IF NOT EXISTS \"project_info\" (\n\
         \x20   \"id\" INTEGER PRIMARY KEY,\n\
         \x20   \"name\" TEXT NOT NULL UNIQUE,\n\
         \x20   \"version\" INTEGER NOT NULL,\n\
         \x20   \"last_saved_at\" INTEGER\n\
         );\n",
    );
    ddl.push_str(
        "CREATE TABLE IF NOT EXISTS \"shape_connection\" (\n\
         \x20   \"diagram_id\" INTEGER NOT NULL,\n\
         \x20   \"connector_type\" TEXT NOT NULL,\n\
         \x20   \"connector_id\" INTEGER NOT NULL,\n\
         \x20   \"glue_point\" INTEGER NOT NULL,\n\
         \x20   \"target_type\" TEXT NOT NULL,\n\
         \x20   \"target_id\" INTEGER NOT NULL,\n\
         \x20   \"target_point\" INTEGER NOT NULL\n\
         );\n\
         CREATE INDEX IF NOT EXISTS \"idx_shape_connection_diagram\" \
         ON \"shape_connection\" (\"diagram_id\");\n",
    );
    // One allocator for every identifier in the store. Per-table rowids
    // would let a template and a diagram share a value, which makes
    // owner references ambiguous for categories with several possible
    // container kinds.
    ddl.push_str(
        "CREATE TABLE IF NOT EXISTS \"id_allocator\" (\n\
         \x20   \"id\" INTEGER PRIMARY KEY AUTOINCREMENT\n\
         );\n",
    );
    ddl.push_str(
        "CREATE TABLE IF NOT EXISTS \"schema_manifest\" (\n\
         \x20   \"id\" INTEGER PRIMARY KEY CHECK (\"id\" = 1),\n\
         \x20   \"version\" INTEGER NOT NULL,\n\
         \x20   \"fingerprint\" TEXT NOT NULL,\n\
         \x20   \"created_at\" INTEGER NOT NULL\n\
         );\n",
    );

    conn.execute_batch(&ddl)
        .map_err(|e| from_rusqlite("create schema", e))?;

    conn.execute(
        "INSERT OR REPLACE INTO \"schema_manifest\" (\"id\", \"version\", \"fingerprint\", \"created_at\")
         VALUES (1, ?1, ?2, ?3)",
        rusqlite::params![
            version,
            schema_fingerprint(registry, version),
            Utc::now().timestamp_millis(),
        ],
    )
    .map_err(|e| from_rusqlite("write schema manifest", e))?;

    Ok(())
}

/// Digest of the registered type set and store version.
///
/// Covers names, categories, versions and full property orders, so any
/// drift in serialization order changes the fingerprint. Types are hashed
/// in name order; registration order does not matter.
pub fn schema_fingerprint(registry: &EntityTypeRegistry, version: u32) -> String {
    let mut ordered: Vec<&EntityType> = registry.all().collect();
    ordered.sort_by(|a, b| a.full_name().cmp(b.full_name()));
    let types: Vec<serde_json::Value> = ordered
        .into_iter()
        .map(|entity_type| {
            serde_json::json!({
                "full_name": entity_type.full_name(),
                "category": entity_type.category(),
                "repository_version": entity_type.repository_version(),
                "properties": entity_type.properties(),
            })
        })
        .collect();
    let doc = serde_json::json!({ "version": version, "types": types });

    let mut hasher = Sha256::new();
    hasher.update(doc.to_string().as_bytes());
    hex::encode(hasher.finalize())
}

/// Compare the stored manifest against the registered types.
///
/// # Errors
///
/// - `NotFound` — the store has no manifest row
/// - `SchemaConflict` — the fingerprint disagrees with the registry
pub fn verify_schema(conn: &Connection, registry: &EntityTypeRegistry) -> Result<u32> {
    let row = conn
        .query_row(
            "SELECT \"version\", \"fingerprint\" FROM \"schema_manifest\" WHERE \"id\" = 1",
            [],
            |row| Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?)),
        )
        .optional()
        .map_err(|e| from_rusqlite("read schema manifest", e))?;

    let Some((version, stored)) = row else {
        return Err(VellumError::not_found("schema manifest", "1"));
    };
    let version = u32::try_from(version).map_err(|_| {
        VellumError::invalid_format(format!("manifest carries a negative version ({})", version))
    })?;
    let expected = schema_fingerprint(registry, version);
    if stored != expected {
        return Err(VellumError::schema_conflict(
            "schema_manifest",
            "registered entity types disagree with the stored schema fingerprint",
        ));
    }
    Ok(version)
}

fn placeholders(from: usize, count: usize) -> String {
    (0..count)
        .map(|index| format!("?{}", from + index))
        .collect::<Vec<_>>()
        .join(", ")
}

fn entity_commands(table: &mut CommandTable, entity_type: &EntityType) {
    let name = entity_type.full_name();
    let sql_table = quote(&table_name(name));
    let columns = slot_columns(entity_type);
    let slots = columns.len();
    let quoted: Vec<String> = columns.iter().map(|(column, _)| quote(column)).collect();

    let insert_list = if quoted.is_empty() {
        String::new()
    } else {
        format!(", {}", quoted.join(", "))
    };
    let insert_values = if slots == 0 {
        String::new()
    } else {
        format!(", {}", placeholders(3, slots))
    };
    table.set(
        name,
        OperationKind::Insert,
        StoreCommand::new(
            format!(
                "INSERT INTO {} (\"id\", \"owner_id\"{}) VALUES (?1, ?2{})",
                sql_table, insert_list, insert_values
            ),
            2 + slots,
        ),
    );
    table.set(
        name,
        OperationKind::InsertOwnedByParent,
        StoreCommand::new(
            format!(
                "INSERT INTO {} (\"id\", \"parent_id\"{}) VALUES (?1, ?2{})",
                sql_table, insert_list, insert_values
            ),
            2 + slots,
        ),
    );

    let update_sql = if slots == 0 {
        format!("UPDATE {} SET \"id\" = \"id\" WHERE \"id\" = ?1", sql_table)
    } else {
        let assignments: Vec<String> = quoted
            .iter()
            .enumerate()
            .map(|(index, column)| format!("{} = ?{}", column, index + 2))
            .collect();
        format!(
            "UPDATE {} SET {} WHERE \"id\" = ?1",
            sql_table,
            assignments.join(", ")
        )
    };
    table.set(name, OperationKind::Update, StoreCommand::new(update_sql, 1 + slots));

    table.set(
        name,
        OperationKind::UpdateOwner,
        StoreCommand::new(
            format!(
                "UPDATE {} SET \
                 \"owner_id\" = CASE WHEN ?3 = 0 THEN ?2 ELSE NULL END, \
                 \"parent_id\" = CASE WHEN ?3 = 0 THEN NULL ELSE ?2 END \
                 WHERE \"id\" = ?1",
                sql_table
            ),
            3,
        ),
    );
    table.set(
        name,
        OperationKind::Delete,
        StoreCommand::new(format!("DELETE FROM {} WHERE \"id\" = ?1", sql_table), 1),
    );

    let select_list = {
        let mut list = String::from("\"id\", COALESCE(\"owner_id\", \"parent_id\") AS \"owner_ref\"");
        for column in &quoted {
            list.push_str(", ");
            list.push_str(column);
        }
        list
    };
    table.set(
        name,
        OperationKind::SelectById,
        StoreCommand::new(
            format!("SELECT {} FROM {} WHERE \"id\" = ?1", select_list, sql_table),
            1,
        ),
    );
    table.set(
        name,
        OperationKind::SelectByOwnerId,
        StoreCommand::new(
            format!(
                "SELECT {} FROM {} WHERE \"owner_id\" = ?1 ORDER BY \"id\"",
                select_list, sql_table
            ),
            1,
        ),
    );
    table.set(
        name,
        OperationKind::SelectAllRoots,
        StoreCommand::new(
            format!(
                "SELECT {} FROM {} WHERE \"owner_id\" = ?1 AND \"parent_id\" IS NULL ORDER BY \"id\"",
                select_list, sql_table
            ),
            1,
        ),
    );
    table.set(
        name,
        OperationKind::SelectChildren,
        StoreCommand::new(
            format!(
                "SELECT {} FROM {} WHERE \"parent_id\" = ?1 ORDER BY \"id\"",
                select_list, sql_table
            ),
            1,
        ),
    );

    let has_name_field = entity_type.properties().iter().any(|property| {
        matches!(property, PropertyDef::Field(field)
            if field.name == "name" && field.kind == PrimitiveKind::Text)
    });
    if has_name_field {
        table.set(
            name,
            OperationKind::SelectByName,
            StoreCommand::new(
                format!(
                    "SELECT {} FROM {} WHERE \"name\" = ?1 ORDER BY \"id\"",
                    select_list, sql_table
                ),
                1,
            ),
        );
    }
}

fn child_commands(table: &mut CommandTable, def: &InnerObjectsDef) {
    let name = def.entity_type_name();
    let sql_table = quote(&table_name(name));
    let quoted: Vec<String> = def.fields().iter().map(|field| quote(&field.name)).collect();
    let width = quoted.len();

    let insert_list = if quoted.is_empty() {
        String::new()
    } else {
        format!(", {}", quoted.join(", "))
    };
    let insert_values = if width == 0 {
        String::new()
    } else {
        format!(", {}", placeholders(2, width))
    };
    table.set(
        name,
        OperationKind::Insert,
        StoreCommand::new(
            format!(
                "INSERT INTO {} (\"owner_id\"{}) VALUES (?1{})",
                sql_table, insert_list, insert_values
            ),
            1 + width,
        ),
    );
    table.set(
        name,
        OperationKind::Delete,
        StoreCommand::new(
            format!("DELETE FROM {} WHERE \"owner_id\" = ?1", sql_table),
            1,
        ),
    );

    let mut select_list = String::from("\"owner_id\"");
    for column in &quoted {
        select_list.push_str(", ");
        select_list.push_str(column);
    }
    table.set(
        name,
        OperationKind::SelectByOwnerId,
        StoreCommand::new(
            format!(
                "SELECT {} FROM {} WHERE \"owner_id\" = ?1 ORDER BY rowid",
                select_list, sql_table
            ),
            1,
        ),
    );
}

fn engine_commands(table: &mut CommandTable) {
    table.set(
        PROJECT_INFO_TYPE,
        OperationKind::Insert,
        StoreCommand::new(
            "INSERT INTO \"project_info\" (\"id\", \"name\", \"version\", \"last_saved_at\") \
             VALUES (?1, ?2, ?3, ?4)",
            4,
        ),
    );
    table.set(
        PROJECT_INFO_TYPE,
        OperationKind::Update,
        StoreCommand::new(
            "UPDATE \"project_info\" SET \"name\" = ?2, \"version\" = ?3, \"last_saved_at\" = ?4 \
             WHERE \"id\" = ?1",
            4,
        ),
    );
    table.set(
        PROJECT_INFO_TYPE,
        OperationKind::SelectByName,
        StoreCommand::new(
            "SELECT \"id\", \"name\", \"version\", \"last_saved_at\" FROM \"project_info\" \
             WHERE \"name\" = ?1",
            1,
        ),
    );
    table.set(
        PROJECT_INFO_TYPE,
        OperationKind::Delete,
        StoreCommand::new("DELETE FROM \"project_info\" WHERE \"id\" = ?1", 1),
    );

    table.set(
        SHAPE_CONNECTION_TYPE,
        OperationKind::Insert,
        StoreCommand::new(
            "INSERT INTO \"shape_connection\" (\"diagram_id\", \"connector_type\", \"connector_id\", \
             \"glue_point\", \"target_type\", \"target_id\", \"target_point\") \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            7,
        ),
    );
    table.set(
        SHAPE_CONNECTION_TYPE,
        OperationKind::Delete,
        StoreCommand::new(
            "DELETE FROM \"shape_connection\" WHERE \"connector_type\" = ?1 AND \"connector_id\" = ?2 \
             AND \"glue_point\" = ?3 AND \"target_type\" = ?4 AND \"target_id\" = ?5 \
             AND \"target_point\" = ?6",
            6,
        ),
    );
    table.set(
        SHAPE_CONNECTION_TYPE,
        OperationKind::SelectByOwnerId,
        StoreCommand::new(
            "SELECT \"connector_type\", \"connector_id\", \"glue_point\", \"target_type\", \
             \"target_id\", \"target_point\" FROM \"shape_connection\" \
             WHERE \"diagram_id\" = ?1 ORDER BY rowid",
            1,
        ),
    );
}

/// Generate the full command table for the registered types.
pub fn build_command_table(registry: &EntityTypeRegistry) -> Result<CommandTable> {
    let mut table = CommandTable::new();
    for entity_type in registry.all() {
        entity_commands(&mut table, entity_type);
    }
    for def in collect_child_defs(registry)? {
        child_commands(&mut table, def);
    }
    engine_commands(&mut table);
    Ok(table)
}
