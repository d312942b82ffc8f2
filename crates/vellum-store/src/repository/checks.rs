//! In-use checks against stored, unmaterialized diagram content
//!
//! The check statements themselves are shape-library specific, so the
//! engine never generates them; hosts register them in the command table
//! and a missing entry surfaces as `MissingCommand` on first use. The scan
//! covers only diagrams whose content is still on disk: once a diagram's
//! shapes are cached, the caller can inspect them in memory.

#![allow(clippy::result_large_err)]

use rusqlite::types::Value;
use rusqlite::Connection;

use vellum_core::cache::{EntityCache, EntityHandle, EntityState};
use vellum_core::model::{EntityCategory, OperationKind};

use crate::command::CommandTable;
use crate::errors::Result;

/// Diagrams whose shape content is still on disk: tracked, unchanged and
/// with no cached shapes.
fn unmaterialized_diagrams(cache: &EntityCache) -> Result<Vec<EntityHandle>> {
    let mut diagrams = Vec::new();
    for diagram in cache.loaded_in(EntityCategory::Diagram) {
        if cache.state(diagram)? == EntityState::Original
            && !cache.has_owned_in(EntityCategory::Shape, diagram)
        {
            diagrams.push(diagram);
        }
    }
    Ok(diagrams)
}

/// True when any stored diagram still references `candidate`. The check
/// command is resolved under the candidate's own type name.
pub(super) fn entity_in_use(
    conn: &Connection,
    commands: &CommandTable,
    cache: &EntityCache,
    candidate: EntityHandle,
    operation: OperationKind,
) -> Result<bool> {
    let type_name = cache.type_name(candidate)?.to_string();
    let command = commands.get(&type_name, operation)?;
    let Some(candidate_id) = cache.id(candidate)? else {
        // never persisted, so no stored row can reference it
        return Ok(false);
    };

    for diagram in unmaterialized_diagrams(cache)? {
        let Some(diagram_id) = cache.id(diagram)? else {
            continue;
        };
        let in_use = command.query_flag(
            conn,
            &format!("check {} in use", type_name),
            &[
                Value::Integer(diagram_id.raw()),
                Value::Integer(candidate_id.raw()),
            ],
        )?;
        if in_use {
            return Ok(true);
        }
    }
    Ok(false)
}

/// True when any stored diagram contains a shape of `type_name`.
pub(super) fn shape_type_in_use(
    conn: &Connection,
    commands: &CommandTable,
    cache: &EntityCache,
    type_name: &str,
) -> Result<bool> {
    let command = commands.get(type_name, OperationKind::CheckShapeTypeInUse)?;
    for diagram in unmaterialized_diagrams(cache)? {
        let Some(diagram_id) = cache.id(diagram)? else {
            continue;
        };
        let in_use = command.query_flag(
            conn,
            &format!("check {} shapes in use", type_name),
            &[Value::Integer(diagram_id.raw())],
        )?;
        if in_use {
            return Ok(true);
        }
    }
    Ok(false)
}
