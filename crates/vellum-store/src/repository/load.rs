//! Loads: materializing stored rows into tracked buckets
//!
//! Every select funnels through [`load_entities`], which walks a result row
//! with the positional reader, skips identifiers that are already cached
//! and hands the rest to the cache. Loads are safe to repeat; a second pass
//! returns the handles that already exist instead of clobbering tracked
//! changes.

#![allow(clippy::result_large_err)]

use rusqlite::types::Value;
use rusqlite::Connection;
use tracing::debug;

use vellum_core::cache::{EntityCache, EntityHandle, ShapeConnection};
use vellum_core::errors::VellumError;
use vellum_core::model::{EntityCategory, MappingKind, OperationKind, StoreId, StyleKind};
use vellum_core::registry::EntityTypeRegistry;

use crate::command::{CommandTable, SHAPE_CONNECTION_TYPE};
use crate::errors::Result;
use crate::reader::SqlReader;
use crate::schema::DIAGRAM_MODEL_OBJECT_MIN_VERSION;

use super::ProjectInfo;

/// Runs one select and tracks every materialized row.
///
/// Already-cached identifiers come back as their existing handles; `filter`
/// drops rows before they are ever materialized.
#[allow(clippy::too_many_arguments)]
pub(super) fn load_entities(
    conn: &Connection,
    registry: &EntityTypeRegistry,
    commands: &CommandTable,
    cache: &mut EntityCache,
    version: u32,
    type_name: &str,
    operation: OperationKind,
    params: &[Value],
    owner: Option<EntityHandle>,
    filter: &dyn Fn(StoreId) -> bool,
) -> Result<Vec<EntityHandle>> {
    let entity_type = registry.find_by_full_name(type_name)?;
    let command = commands.get(type_name, operation)?;
    let rows = command.query_rows(conn, &format!("load {}", type_name), params)?;

    let mut handles = Vec::new();
    for columns in rows {
        let mut reader = SqlReader::new(entity_type, columns, conn, commands)?;
        let id = reader.row_id()?;
        if !filter(id) {
            continue;
        }
        if let Some(existing) = cache.find_by_id(type_name, id) {
            handles.push(existing);
            continue;
        }
        let mut entity = entity_type.create_instance();
        entity.load_fields(&mut reader, version)?;
        reader.finish()?;
        let handle = cache.add_loaded(type_name, entity_type.category(), entity, owner, id)?;
        handles.push(handle);
    }
    Ok(handles)
}

fn require_id(cache: &EntityCache, handle: EntityHandle) -> Result<StoreId> {
    match cache.id(handle)? {
        Some(id) => Ok(id),
        None => Err(VellumError::not_found(
            "entity identifier",
            cache.type_name(handle)?.to_string(),
        )),
    }
}

/// Loads every registered type of one category with the same select.
fn load_in_category(
    conn: &Connection,
    registry: &EntityTypeRegistry,
    commands: &CommandTable,
    cache: &mut EntityCache,
    version: u32,
    category: EntityCategory,
    operation: OperationKind,
    params: &[Value],
    owner: Option<EntityHandle>,
) -> Result<Vec<EntityHandle>> {
    let mut handles = Vec::new();
    for entity_type in registry.in_category(category) {
        handles.extend(load_entities(
            conn,
            registry,
            commands,
            cache,
            version,
            entity_type.full_name(),
            operation,
            params,
            owner,
            &|_| true,
        )?);
    }
    Ok(handles)
}

/// The eager part of opening a project: settings, designs with their
/// styles, templates with their trees, and the model mappings. Diagrams,
/// shapes and model objects stay on disk until asked for.
pub(super) fn load_project_graph(
    conn: &Connection,
    registry: &EntityTypeRegistry,
    commands: &CommandTable,
    cache: &mut EntityCache,
    project: &ProjectInfo,
) -> Result<()> {
    let Some(project_id) = project.id else {
        return Err(VellumError::not_found("project row", project.name.clone()));
    };
    debug!(project = %project.name, "loading project graph");
    let root = [Value::Integer(project_id.raw())];

    load_in_category(
        conn,
        registry,
        commands,
        cache,
        project.version,
        EntityCategory::Project,
        OperationKind::SelectByOwnerId,
        &root,
        None,
    )?;

    let designs = load_in_category(
        conn,
        registry,
        commands,
        cache,
        project.version,
        EntityCategory::Design,
        OperationKind::SelectByOwnerId,
        &root,
        None,
    )?;
    for design in designs {
        let params = [Value::Integer(require_id(cache, design)?.raw())];
        for kind in StyleKind::ALL {
            load_in_category(
                conn,
                registry,
                commands,
                cache,
                project.version,
                EntityCategory::Style(kind),
                OperationKind::SelectByOwnerId,
                &params,
                Some(design),
            )?;
        }
    }

    let templates = load_in_category(
        conn,
        registry,
        commands,
        cache,
        project.version,
        EntityCategory::Template,
        OperationKind::SelectByOwnerId,
        &root,
        None,
    )?;
    for template in templates {
        load_template_graph(conn, registry, commands, cache, project.version, template)?;
    }

    load_in_category(
        conn,
        registry,
        commands,
        cache,
        project.version,
        EntityCategory::Model,
        OperationKind::SelectByOwnerId,
        &root,
        None,
    )?;
    Ok(())
}

/// A template owns one shape tree, one model object tree and its mappings.
fn load_template_graph(
    conn: &Connection,
    registry: &EntityTypeRegistry,
    commands: &CommandTable,
    cache: &mut EntityCache,
    version: u32,
    template: EntityHandle,
) -> Result<()> {
    let params = [Value::Integer(require_id(cache, template)?.raw())];

    let shapes = load_in_category(
        conn,
        registry,
        commands,
        cache,
        version,
        EntityCategory::Shape,
        OperationKind::SelectByOwnerId,
        &params,
        Some(template),
    )?;
    for shape in shapes {
        load_shape_children(conn, registry, commands, cache, version, shape)?;
    }

    let roots = load_in_category(
        conn,
        registry,
        commands,
        cache,
        version,
        EntityCategory::ModelObject,
        OperationKind::SelectByOwnerId,
        &params,
        Some(template),
    )?;
    for root in roots {
        load_model_object_children(conn, registry, commands, cache, version, root)?;
    }

    for kind in MappingKind::ALL {
        load_in_category(
            conn,
            registry,
            commands,
            cache,
            version,
            EntityCategory::ModelMapping(kind),
            OperationKind::SelectByOwnerId,
            &params,
            Some(template),
        )?;
    }
    Ok(())
}

fn load_shape_children(
    conn: &Connection,
    registry: &EntityTypeRegistry,
    commands: &CommandTable,
    cache: &mut EntityCache,
    version: u32,
    parent: EntityHandle,
) -> Result<()> {
    let params = [Value::Integer(require_id(cache, parent)?.raw())];
    let children = load_in_category(
        conn,
        registry,
        commands,
        cache,
        version,
        EntityCategory::Shape,
        OperationKind::SelectChildren,
        &params,
        Some(parent),
    )?;
    for child in children {
        load_shape_children(conn, registry, commands, cache, version, child)?;
    }
    Ok(())
}

fn load_model_object_children(
    conn: &Connection,
    registry: &EntityTypeRegistry,
    commands: &CommandTable,
    cache: &mut EntityCache,
    version: u32,
    parent: EntityHandle,
) -> Result<()> {
    let params = [Value::Integer(require_id(cache, parent)?.raw())];
    let children = load_in_category(
        conn,
        registry,
        commands,
        cache,
        version,
        EntityCategory::ModelObject,
        OperationKind::SelectChildren,
        &params,
        Some(parent),
    )?;
    for child in children {
        load_model_object_children(conn, registry, commands, cache, version, child)?;
    }
    Ok(())
}

pub(super) fn load_diagrams(
    conn: &Connection,
    registry: &EntityTypeRegistry,
    commands: &CommandTable,
    cache: &mut EntityCache,
    project: &ProjectInfo,
) -> Result<Vec<EntityHandle>> {
    let Some(project_id) = project.id else {
        return Err(VellumError::not_found("project row", project.name.clone()));
    };
    load_in_category(
        conn,
        registry,
        commands,
        cache,
        project.version,
        EntityCategory::Diagram,
        OperationKind::SelectByOwnerId,
        &[Value::Integer(project_id.raw())],
        None,
    )
}

/// Loads a diagram's shape tree, then the stored connections between the
/// now-tracked shapes.
pub(super) fn load_diagram_shapes(
    conn: &Connection,
    registry: &EntityTypeRegistry,
    commands: &CommandTable,
    cache: &mut EntityCache,
    version: u32,
    diagram: EntityHandle,
) -> Result<Vec<EntityHandle>> {
    let diagram_id = require_id(cache, diagram)?;
    debug!(diagram = diagram_id.raw(), "loading diagram shapes");

    let roots = load_in_category(
        conn,
        registry,
        commands,
        cache,
        version,
        EntityCategory::Shape,
        OperationKind::SelectByOwnerId,
        &[Value::Integer(diagram_id.raw())],
        Some(diagram),
    )?;
    for root in &roots {
        load_shape_children(conn, registry, commands, cache, version, *root)?;
    }

    load_connections(conn, commands, cache, diagram_id)?;
    Ok(roots)
}

/// Shape connections are plain endpoint tuples; both shapes must already be
/// tracked by the time the rows are read.
fn load_connections(
    conn: &Connection,
    commands: &CommandTable,
    cache: &mut EntityCache,
    diagram_id: StoreId,
) -> Result<()> {
    let command = commands.get(SHAPE_CONNECTION_TYPE, OperationKind::SelectByOwnerId)?;
    let rows = command.query_rows(
        conn,
        "load shape connections",
        &[Value::Integer(diagram_id.raw())],
    )?;
    for row in rows {
        if row.len() != 6 {
            return Err(VellumError::invalid_format(format!(
                "shape connection row has {} columns, expected 6",
                row.len()
            )));
        }
        let connector = endpoint_handle(cache, &row[0], &row[1])?;
        let target = endpoint_handle(cache, &row[3], &row[4])?;
        let connection = ShapeConnection {
            connector,
            glue_point: point_index(&row[2])?,
            target,
            target_point: point_index(&row[5])?,
        };
        cache.add_loaded_connection(connection)?;
    }
    Ok(())
}

fn endpoint_handle(
    cache: &EntityCache,
    type_column: &Value,
    id_column: &Value,
) -> Result<EntityHandle> {
    let Value::Text(type_name) = type_column else {
        return Err(VellumError::invalid_format(format!(
            "connection endpoint type is not text: {:?}",
            type_column
        )));
    };
    let Value::Integer(raw) = id_column else {
        return Err(VellumError::invalid_format(format!(
            "connection endpoint id is not an integer: {:?}",
            id_column
        )));
    };
    cache.find_by_id(type_name, StoreId::new(*raw)).ok_or_else(|| {
        VellumError::invalid_format(format!(
            "connection references unloaded shape '{}' {}",
            type_name, raw
        ))
    })
}

fn point_index(column: &Value) -> Result<i32> {
    let Value::Integer(raw) = column else {
        return Err(VellumError::invalid_format(format!(
            "connection point is not an integer: {:?}",
            column
        )));
    };
    i32::try_from(*raw)
        .map_err(|_| VellumError::invalid_format(format!("connection point {} out of range", raw)))
}

/// Loads the model's root model objects, pulling the model row itself first
/// when it has not been loaded yet.
pub(super) fn load_model_objects(
    conn: &Connection,
    registry: &EntityTypeRegistry,
    commands: &CommandTable,
    cache: &mut EntityCache,
    project: &ProjectInfo,
) -> Result<Vec<EntityHandle>> {
    if cache.loaded_in(EntityCategory::Model).is_empty() {
        let Some(project_id) = project.id else {
            return Err(VellumError::not_found("project row", project.name.clone()));
        };
        load_in_category(
            conn,
            registry,
            commands,
            cache,
            project.version,
            EntityCategory::Model,
            OperationKind::SelectByOwnerId,
            &[Value::Integer(project_id.raw())],
            None,
        )?;
    }
    let Some(model) = cache.loaded_in(EntityCategory::Model).first().copied() else {
        return Err(VellumError::not_found("model", project.name.clone()));
    };

    load_in_category(
        conn,
        registry,
        commands,
        cache,
        project.version,
        EntityCategory::ModelObject,
        OperationKind::SelectAllRoots,
        &[Value::Integer(require_id(cache, model)?.raw())],
        Some(model),
    )
}

pub(super) fn load_child_model_objects(
    conn: &Connection,
    registry: &EntityTypeRegistry,
    commands: &CommandTable,
    cache: &mut EntityCache,
    version: u32,
    parent: EntityHandle,
) -> Result<Vec<EntityHandle>> {
    let params = [Value::Integer(require_id(cache, parent)?.raw())];
    load_in_category(
        conn,
        registry,
        commands,
        cache,
        version,
        EntityCategory::ModelObject,
        OperationKind::SelectChildren,
        &params,
        Some(parent),
    )
}

/// Diagram-to-model-object links; stores older than the link table have
/// none, so this is a no-op below that version.
pub(super) fn load_diagram_model_objects(
    conn: &Connection,
    registry: &EntityTypeRegistry,
    commands: &CommandTable,
    cache: &mut EntityCache,
    version: u32,
    diagram: EntityHandle,
) -> Result<Vec<EntityHandle>> {
    if version < DIAGRAM_MODEL_OBJECT_MIN_VERSION {
        return Ok(Vec::new());
    }
    let params = [Value::Integer(require_id(cache, diagram)?.raw())];
    load_in_category(
        conn,
        registry,
        commands,
        cache,
        version,
        EntityCategory::DiagramModelObject,
        OperationKind::SelectByOwnerId,
        &params,
        Some(diagram),
    )
}
