//! The flush: replaying tracked changes in dependency order
//!
//! `save_changes` opens one transaction and replays the cache against it in
//! three phases: deletes (children before owners), inserts (owners before
//! children), updates. Identifiers handed out by the store are staged in
//! memory during the flush and applied to the cache only after the commit
//! lands, so a failed flush leaves both the store and the cache untouched.

#![allow(clippy::result_large_err)]

use std::collections::{HashMap, HashSet};

use chrono::Utc;
use rusqlite::types::Value;
use rusqlite::{Connection, Transaction};
use tracing::debug;

use vellum_core::cache::{EntityCache, EntityHandle, EntityState};
use vellum_core::errors::VellumError;
use vellum_core::model::{
    EntityCategory, InnerObjectsDef, MappingKind, OperationKind, PropertyDef, StoreId, StyleKind,
};
use vellum_core::registry::{EntityType, EntityTypeRegistry};

use crate::command::{CommandTable, StoreCommand, PROJECT_INFO_TYPE, SHAPE_CONNECTION_TYPE};
use crate::errors::{from_rusqlite, Result};
use crate::schema::DIAGRAM_MODEL_OBJECT_MIN_VERSION;
use crate::writer::{PendingChildRows, SqlWriter};

use super::ProjectInfo;

/// Identifiers assigned while the transaction is open. The cache sees none
/// of them until the commit lands.
struct FlushStage {
    assigned: HashMap<EntityHandle, StoreId>,
    order: Vec<(EntityHandle, StoreId)>,
    project_id: Option<StoreId>,
}

impl FlushStage {
    fn new(project_id: Option<StoreId>) -> Self {
        FlushStage {
            assigned: HashMap::new(),
            order: Vec::new(),
            project_id,
        }
    }

    /// The entity's identifier as of this point in the flush: staged if one
    /// was just assigned, otherwise whatever the cache holds.
    fn id_of(&self, cache: &EntityCache, handle: EntityHandle) -> Result<Option<StoreId>> {
        if let Some(id) = self.assigned.get(&handle) {
            return Ok(Some(*id));
        }
        cache.id(handle)
    }

    fn assign(&mut self, handle: EntityHandle, id: StoreId) {
        self.assigned.insert(handle, id);
        self.order.push((handle, id));
    }

    fn is_assigned(&self, handle: EntityHandle) -> bool {
        self.assigned.contains_key(&handle)
    }
}

/// Every category in flush order. Deletes walk it back to front (children
/// of a category always sit later in the list than their owners), inserts
/// and updates walk it front to back.
fn categories_in_flush_order() -> Vec<EntityCategory> {
    let mut order = vec![EntityCategory::Project, EntityCategory::Design];
    order.extend(StyleKind::ALL.map(EntityCategory::Style));
    order.push(EntityCategory::Template);
    order.extend(MappingKind::ALL.map(EntityCategory::ModelMapping));
    order.extend([
        EntityCategory::Model,
        EntityCategory::ModelObject,
        EntityCategory::DiagramModelObject,
        EntityCategory::Diagram,
        EntityCategory::Shape,
    ]);
    order
}

pub(super) fn save_changes(
    conn: &mut Connection,
    registry: &EntityTypeRegistry,
    commands: &CommandTable,
    cache: &mut EntityCache,
    project: &mut ProjectInfo,
) -> Result<()> {
    let tx = conn
        .transaction()
        .map_err(|e| from_rusqlite("begin flush transaction", e))?;
    debug!(project = %project.name, "flushing tracked changes");

    let mut stage = FlushStage::new(project.id);
    upsert_project_row(&tx, commands, project, &mut stage)?;
    run_delete_phase(&tx, registry, commands, cache)?;
    run_insert_phase(&tx, registry, commands, cache, project, &mut stage)?;
    insert_new_connections(&tx, commands, cache, &stage)?;
    reassign_moved_shapes(&tx, commands, cache, &stage)?;
    run_update_phase(&tx, registry, commands, cache, project, &stage)?;

    tx.commit()
        .map_err(|e| from_rusqlite("commit flush transaction", e))?;

    // Only now is it safe to mutate the tracked state.
    project.id = stage.project_id;
    cache.accept_changes(&stage.order)?;
    debug!(
        project = %project.name,
        inserted = stage.order.len(),
        "flush committed"
    );
    Ok(())
}

/// Draws the next identifier from the shared allocator. Drawn values roll
/// back with the transaction; the AUTOINCREMENT high-water mark does not,
/// so an identifier is never handed out twice.
fn draw_id(tx: &Transaction<'_>) -> Result<StoreId> {
    tx.execute("INSERT INTO \"id_allocator\" DEFAULT VALUES", [])
        .map_err(|e| from_rusqlite("draw entity identifier", e))?;
    let id = tx.last_insert_rowid();
    tx.execute("DELETE FROM \"id_allocator\" WHERE \"id\" = ?1", [id])
        .map_err(|e| from_rusqlite("draw entity identifier", e))?;
    Ok(StoreId::new(id))
}

/// Parameter counts are checked before binding, so a mismatched command
/// fails the flush instead of silently truncating.
fn check_parameters(
    entity_type: &str,
    operation: OperationKind,
    command: &StoreCommand,
    expected: usize,
) -> Result<()> {
    if command.parameters() != expected {
        return Err(VellumError::schema_conflict(
            entity_type,
            format!(
                "{} command declares {} parameters but the flush binds {}",
                operation,
                command.parameters(),
                expected
            ),
        ));
    }
    Ok(())
}

fn upsert_project_row(
    tx: &Transaction<'_>,
    commands: &CommandTable,
    project: &ProjectInfo,
    stage: &mut FlushStage,
) -> Result<()> {
    let now = Utc::now().timestamp_millis();
    match project.id {
        Some(id) => {
            let command = commands.get(PROJECT_INFO_TYPE, OperationKind::Update)?;
            check_parameters(PROJECT_INFO_TYPE, OperationKind::Update, command, 4)?;
            command.execute(
                tx,
                "update project row",
                &[
                    Value::Integer(id.raw()),
                    Value::Text(project.name.clone()),
                    Value::Integer(i64::from(project.version)),
                    Value::Integer(now),
                ],
            )?;
        }
        None => {
            let command = commands.get(PROJECT_INFO_TYPE, OperationKind::Insert)?;
            check_parameters(PROJECT_INFO_TYPE, OperationKind::Insert, command, 4)?;
            let id = draw_id(tx)?;
            command.execute(
                tx,
                "insert project row",
                &[
                    Value::Integer(id.raw()),
                    Value::Text(project.name.clone()),
                    Value::Integer(i64::from(project.version)),
                    Value::Integer(now),
                ],
            )?;
            stage.project_id = Some(id);
        }
    }
    Ok(())
}

// ---------------------------------------------------------------- deletes

fn run_delete_phase(
    tx: &Transaction<'_>,
    registry: &EntityTypeRegistry,
    commands: &CommandTable,
    cache: &EntityCache,
) -> Result<()> {
    delete_flat(
        tx,
        registry,
        commands,
        cache,
        EntityCategory::DiagramModelObject,
    )?;
    delete_nested(tx, registry, commands, cache, EntityCategory::ModelObject)?;
    delete_flat(tx, registry, commands, cache, EntityCategory::Model)?;
    delete_connection_rows(tx, commands, cache)?;
    delete_nested(tx, registry, commands, cache, EntityCategory::Shape)?;
    delete_flat(tx, registry, commands, cache, EntityCategory::Diagram)?;
    for kind in MappingKind::ALL {
        delete_flat(tx, registry, commands, cache, EntityCategory::ModelMapping(kind))?;
    }
    delete_flat(tx, registry, commands, cache, EntityCategory::Template)?;
    for kind in StyleKind::ALL {
        delete_flat(tx, registry, commands, cache, EntityCategory::Style(kind))?;
    }
    delete_flat(tx, registry, commands, cache, EntityCategory::Design)?;
    delete_flat(tx, registry, commands, cache, EntityCategory::Project)?;
    Ok(())
}

fn delete_flat(
    tx: &Transaction<'_>,
    registry: &EntityTypeRegistry,
    commands: &CommandTable,
    cache: &EntityCache,
    category: EntityCategory,
) -> Result<()> {
    for handle in cache.loaded_in_state(category, EntityState::Deleted) {
        delete_entity_row(tx, registry, commands, cache, handle)?;
    }
    Ok(())
}

/// Deletes a nesting category. An entity cannot go while another deleted
/// entity still names it as owner, so passes repeat until the set drains.
fn delete_nested(
    tx: &Transaction<'_>,
    registry: &EntityTypeRegistry,
    commands: &CommandTable,
    cache: &EntityCache,
    category: EntityCategory,
) -> Result<()> {
    let mut pending = cache.loaded_in_state(category, EntityState::Deleted);
    while !pending.is_empty() {
        let mut blocking = HashSet::new();
        for handle in &pending {
            if let Some(owner) = cache.owner(*handle)? {
                blocking.insert(owner);
            }
        }
        let (ready, rest): (Vec<_>, Vec<_>) =
            pending.into_iter().partition(|h| !blocking.contains(h));
        if ready.is_empty() {
            return Err(VellumError::schema_conflict(
                cache.type_name(rest[0])?.to_string(),
                "deleted entities form an ownership cycle",
            ));
        }
        for handle in ready {
            delete_entity_row(tx, registry, commands, cache, handle)?;
        }
        pending = rest;
    }
    Ok(())
}

fn delete_entity_row(
    tx: &Transaction<'_>,
    registry: &EntityTypeRegistry,
    commands: &CommandTable,
    cache: &EntityCache,
    handle: EntityHandle,
) -> Result<()> {
    let type_name = cache.type_name(handle)?.to_string();
    let entity_type = registry.find_by_full_name(&type_name)?;
    let Some(id) = cache.id(handle)? else {
        return Err(VellumError::not_found("entity identifier", type_name));
    };
    delete_child_rows(tx, commands, entity_type, id)?;
    let command = commands.get(&type_name, OperationKind::Delete)?;
    check_parameters(&type_name, OperationKind::Delete, command, 1)?;
    command.execute(
        tx,
        &format!("delete {}", type_name),
        &[Value::Integer(id.raw())],
    )?;
    Ok(())
}

fn delete_connection_rows(
    tx: &Transaction<'_>,
    commands: &CommandTable,
    cache: &EntityCache,
) -> Result<()> {
    let doomed = cache.deleted_connections();
    if doomed.is_empty() {
        return Ok(());
    }
    let command = commands.get(SHAPE_CONNECTION_TYPE, OperationKind::Delete)?;
    check_parameters(SHAPE_CONNECTION_TYPE, OperationKind::Delete, command, 6)?;
    for connection in doomed {
        let (connector_type, connector_id) = endpoint(cache, None, connection.connector)?;
        let (target_type, target_id) = endpoint(cache, None, connection.target)?;
        command.execute(
            tx,
            "delete shape connection",
            &[
                Value::Text(connector_type),
                Value::Integer(connector_id),
                Value::Integer(i64::from(connection.glue_point)),
                Value::Text(target_type),
                Value::Integer(target_id),
                Value::Integer(i64::from(connection.target_point)),
            ],
        )?;
    }
    Ok(())
}

// ---------------------------------------------------------------- inserts

fn run_insert_phase(
    tx: &Transaction<'_>,
    registry: &EntityTypeRegistry,
    commands: &CommandTable,
    cache: &EntityCache,
    project: &ProjectInfo,
    stage: &mut FlushStage,
) -> Result<()> {
    insert_new_in(tx, registry, commands, cache, project, stage, EntityCategory::Project)?;
    insert_new_in(tx, registry, commands, cache, project, stage, EntityCategory::Design)?;
    for kind in StyleKind::ALL {
        insert_new_in(tx, registry, commands, cache, project, stage, EntityCategory::Style(kind))?;
    }
    insert_new_in(tx, registry, commands, cache, project, stage, EntityCategory::Template)?;
    insert_model_objects_under(
        tx,
        registry,
        commands,
        cache,
        project,
        stage,
        EntityCategory::Template,
    )?;
    insert_shapes_owned_by(
        tx,
        registry,
        commands,
        cache,
        project,
        stage,
        EntityCategory::Template,
    )?;
    for kind in MappingKind::ALL {
        insert_new_in(
            tx,
            registry,
            commands,
            cache,
            project,
            stage,
            EntityCategory::ModelMapping(kind),
        )?;
    }
    insert_new_in(tx, registry, commands, cache, project, stage, EntityCategory::Model)?;
    insert_model_objects_under(
        tx,
        registry,
        commands,
        cache,
        project,
        stage,
        EntityCategory::Model,
    )?;
    insert_diagram_model_objects(tx, registry, commands, cache, project, stage)?;
    insert_new_in(tx, registry, commands, cache, project, stage, EntityCategory::Diagram)?;
    // links gated on a diagram that was itself new get a second chance now
    insert_diagram_model_objects(tx, registry, commands, cache, project, stage)?;
    insert_shapes_owned_by(
        tx,
        registry,
        commands,
        cache,
        project,
        stage,
        EntityCategory::Diagram,
    )?;
    insert_remaining_shapes(tx, registry, commands, cache, project, stage)?;
    check_everything_inserted(cache, stage, project.version)
}

fn insert_new_in(
    tx: &Transaction<'_>,
    registry: &EntityTypeRegistry,
    commands: &CommandTable,
    cache: &EntityCache,
    project: &ProjectInfo,
    stage: &mut FlushStage,
    category: EntityCategory,
) -> Result<()> {
    for handle in cache.new_in(category) {
        if stage.is_assigned(handle) {
            continue;
        }
        insert_entity_row(tx, registry, commands, cache, project, stage, handle)?;
    }
    Ok(())
}

/// Inserts the new model objects rooted under `owner_category` containers,
/// then any model objects nested below a parent that has an identifier by
/// now, repeating until a pass makes no progress.
fn insert_model_objects_under(
    tx: &Transaction<'_>,
    registry: &EntityTypeRegistry,
    commands: &CommandTable,
    cache: &EntityCache,
    project: &ProjectInfo,
    stage: &mut FlushStage,
    owner_category: EntityCategory,
) -> Result<()> {
    for handle in cache.new_in(EntityCategory::ModelObject) {
        if stage.is_assigned(handle) {
            continue;
        }
        let rooted_here = match cache.owner(handle)? {
            Some(owner) => cache.category(owner)? == owner_category,
            // an unowned model object falls back to the project root,
            // which the model pass is the right place for
            None => owner_category == EntityCategory::Model,
        };
        if rooted_here {
            insert_entity_row(tx, registry, commands, cache, project, stage, handle)?;
        }
    }
    loop {
        let mut progressed = false;
        for handle in cache.new_in(EntityCategory::ModelObject) {
            if stage.is_assigned(handle) {
                continue;
            }
            let Some(owner) = cache.owner(handle)? else {
                continue;
            };
            if cache.category(owner)? != EntityCategory::ModelObject {
                continue;
            }
            if stage.id_of(cache, owner)?.is_some() {
                insert_entity_row(tx, registry, commands, cache, project, stage, handle)?;
                progressed = true;
            }
        }
        if !progressed {
            return Ok(());
        }
    }
}

fn insert_shapes_owned_by(
    tx: &Transaction<'_>,
    registry: &EntityTypeRegistry,
    commands: &CommandTable,
    cache: &EntityCache,
    project: &ProjectInfo,
    stage: &mut FlushStage,
    owner_category: EntityCategory,
) -> Result<()> {
    for handle in cache.new_in(EntityCategory::Shape) {
        if stage.is_assigned(handle) {
            continue;
        }
        let Some(owner) = cache.owner(handle)? else {
            continue;
        };
        if cache.category(owner)? == owner_category {
            insert_entity_row(tx, registry, commands, cache, project, stage, handle)?;
        }
    }
    Ok(())
}

/// Child shapes may nest arbitrarily deep, so each pass inserts the shapes
/// whose owner has an identifier and repeats until nothing moves. A shape
/// left over afterwards has an owner that never resolved.
fn insert_remaining_shapes(
    tx: &Transaction<'_>,
    registry: &EntityTypeRegistry,
    commands: &CommandTable,
    cache: &EntityCache,
    project: &ProjectInfo,
    stage: &mut FlushStage,
) -> Result<()> {
    loop {
        let mut progressed = false;
        for handle in cache.new_in(EntityCategory::Shape) {
            if stage.is_assigned(handle) {
                continue;
            }
            let resolvable = match cache.owner(handle)? {
                Some(owner) => stage.id_of(cache, owner)?.is_some(),
                None => stage.project_id.is_some(),
            };
            if resolvable {
                insert_entity_row(tx, registry, commands, cache, project, stage, handle)?;
                progressed = true;
            }
        }
        if !progressed {
            return Ok(());
        }
    }
}

/// Diagram links only exist in stores new enough to have the table. Below
/// that version new links simply stay in the new set.
fn insert_diagram_model_objects(
    tx: &Transaction<'_>,
    registry: &EntityTypeRegistry,
    commands: &CommandTable,
    cache: &EntityCache,
    project: &ProjectInfo,
    stage: &mut FlushStage,
) -> Result<()> {
    if project.version < DIAGRAM_MODEL_OBJECT_MIN_VERSION {
        return Ok(());
    }
    for handle in cache.new_in(EntityCategory::DiagramModelObject) {
        if stage.is_assigned(handle) {
            continue;
        }
        let resolvable = match cache.owner(handle)? {
            Some(owner) => stage.id_of(cache, owner)?.is_some(),
            None => stage.project_id.is_some(),
        };
        if resolvable {
            insert_entity_row(tx, registry, commands, cache, project, stage, handle)?;
        }
    }
    Ok(())
}

fn check_everything_inserted(
    cache: &EntityCache,
    stage: &FlushStage,
    version: u32,
) -> Result<()> {
    for category in categories_in_flush_order() {
        if category == EntityCategory::DiagramModelObject
            && version < DIAGRAM_MODEL_OBJECT_MIN_VERSION
        {
            continue;
        }
        for handle in cache.new_in(category) {
            if !stage.is_assigned(handle) {
                return Err(VellumError::OwnerUnresolved {
                    entity_type: cache.type_name(handle)?.to_string(),
                });
            }
        }
    }
    Ok(())
}

fn insert_entity_row(
    tx: &Transaction<'_>,
    registry: &EntityTypeRegistry,
    commands: &CommandTable,
    cache: &EntityCache,
    project: &ProjectInfo,
    stage: &mut FlushStage,
    handle: EntityHandle,
) -> Result<()> {
    let type_name = cache.type_name(handle)?.to_string();
    let entity_type = registry.find_by_full_name(&type_name)?;
    let category = cache.category(handle)?;

    let (operation, owner_id) = match cache.owner(handle)? {
        Some(owner) => {
            let Some(owner_id) = stage.id_of(cache, owner)? else {
                return Err(VellumError::OwnerUnresolved {
                    entity_type: type_name,
                });
            };
            let operation = if cache.category(owner)? == category {
                OperationKind::InsertOwnedByParent
            } else {
                OperationKind::Insert
            };
            (operation, owner_id)
        }
        None => {
            let Some(project_id) = stage.project_id else {
                return Err(VellumError::OwnerUnresolved {
                    entity_type: type_name,
                });
            };
            (OperationKind::Insert, project_id)
        }
    };

    let command = commands.get(&type_name, operation)?;
    check_parameters(&type_name, operation, command, 2 + entity_type.parameter_slots())?;

    let mut writer = SqlWriter::new(entity_type);
    cache.entity(handle)?.save_fields(&mut writer, project.version)?;
    let written = writer.finish()?;

    let id = draw_id(tx)?;
    let mut params = Vec::with_capacity(2 + written.params.len());
    params.push(Value::Integer(id.raw()));
    params.push(Value::Integer(owner_id.raw()));
    params.extend(written.params);
    command.execute(tx, &format!("insert {}", type_name), &params)?;

    insert_child_rows(tx, commands, id, &written.children)?;
    stage.assign(handle, id);
    Ok(())
}

// ------------------------------------------------------------ connections

/// A connection endpoint as stored: the shape's type name and identifier.
fn endpoint(
    cache: &EntityCache,
    stage: Option<&FlushStage>,
    handle: EntityHandle,
) -> Result<(String, i64)> {
    let type_name = cache.type_name(handle)?.to_string();
    let id = match stage {
        Some(stage) => stage.id_of(cache, handle)?,
        None => cache.id(handle)?,
    };
    let Some(id) = id else {
        return Err(VellumError::OwnerUnresolved {
            entity_type: type_name,
        });
    };
    Ok((type_name, id.raw()))
}

/// Walks the owner chain up to the diagram the shape sits in.
fn owning_diagram(cache: &EntityCache, shape: EntityHandle) -> Result<EntityHandle> {
    let mut seen = HashSet::new();
    let mut current = shape;
    loop {
        if !seen.insert(current) {
            return Err(VellumError::schema_conflict(
                cache.type_name(shape)?.to_string(),
                "shape ownership forms a cycle",
            ));
        }
        match cache.owner(current)? {
            Some(owner) if cache.category(owner)? == EntityCategory::Diagram => return Ok(owner),
            Some(owner) => current = owner,
            None => {
                return Err(VellumError::not_found(
                    "owning diagram",
                    cache.type_name(shape)?.to_string(),
                ))
            }
        }
    }
}

fn insert_new_connections(
    tx: &Transaction<'_>,
    commands: &CommandTable,
    cache: &EntityCache,
    stage: &FlushStage,
) -> Result<()> {
    let fresh = cache.new_connections();
    if fresh.is_empty() {
        return Ok(());
    }
    let command = commands.get(SHAPE_CONNECTION_TYPE, OperationKind::Insert)?;
    check_parameters(SHAPE_CONNECTION_TYPE, OperationKind::Insert, command, 7)?;
    for connection in fresh {
        let diagram = owning_diagram(cache, connection.connector)?;
        let Some(diagram_id) = stage.id_of(cache, diagram)? else {
            return Err(VellumError::OwnerUnresolved {
                entity_type: cache.type_name(diagram)?.to_string(),
            });
        };
        let (connector_type, connector_id) = endpoint(cache, Some(stage), connection.connector)?;
        let (target_type, target_id) = endpoint(cache, Some(stage), connection.target)?;
        command.execute(
            tx,
            "insert shape connection",
            &[
                Value::Integer(diagram_id.raw()),
                Value::Text(connector_type),
                Value::Integer(connector_id),
                Value::Integer(i64::from(connection.glue_point)),
                Value::Text(target_type),
                Value::Integer(target_id),
                Value::Integer(i64::from(connection.target_point)),
            ],
        )?;
    }
    Ok(())
}

// ---------------------------------------------------------------- updates

fn reassign_moved_shapes(
    tx: &Transaction<'_>,
    commands: &CommandTable,
    cache: &EntityCache,
    stage: &FlushStage,
) -> Result<()> {
    for handle in cache.loaded_in_state(EntityCategory::Shape, EntityState::OwnerChanged) {
        update_owner_row(tx, commands, cache, stage, handle)?;
    }
    Ok(())
}

fn run_update_phase(
    tx: &Transaction<'_>,
    registry: &EntityTypeRegistry,
    commands: &CommandTable,
    cache: &EntityCache,
    project: &ProjectInfo,
    stage: &FlushStage,
) -> Result<()> {
    for category in categories_in_flush_order() {
        for handle in cache.loaded_in_state(category, EntityState::Modified) {
            update_entity_row(tx, registry, commands, cache, project, handle)?;
        }
        for handle in cache.loaded_in_state(category, EntityState::OwnerChanged) {
            // shapes had their owner rewritten right after the inserts
            if category != EntityCategory::Shape {
                update_owner_row(tx, commands, cache, stage, handle)?;
            }
            update_entity_row(tx, registry, commands, cache, project, handle)?;
        }
    }
    Ok(())
}

fn update_owner_row(
    tx: &Transaction<'_>,
    commands: &CommandTable,
    cache: &EntityCache,
    stage: &FlushStage,
    handle: EntityHandle,
) -> Result<()> {
    let type_name = cache.type_name(handle)?.to_string();
    let Some(id) = cache.id(handle)? else {
        return Err(VellumError::not_found("entity identifier", type_name));
    };
    let category = cache.category(handle)?;
    let (owner_id, owner_is_parent) = match cache.owner(handle)? {
        Some(owner) => {
            let Some(owner_id) = stage.id_of(cache, owner)? else {
                return Err(VellumError::OwnerUnresolved {
                    entity_type: type_name,
                });
            };
            (owner_id, cache.category(owner)? == category)
        }
        None => {
            let Some(project_id) = stage.project_id else {
                return Err(VellumError::OwnerUnresolved {
                    entity_type: type_name,
                });
            };
            (project_id, false)
        }
    };
    let command = commands.get(&type_name, OperationKind::UpdateOwner)?;
    check_parameters(&type_name, OperationKind::UpdateOwner, command, 3)?;
    command.execute(
        tx,
        &format!("update {} owner", type_name),
        &[
            Value::Integer(id.raw()),
            Value::Integer(owner_id.raw()),
            Value::Integer(i64::from(owner_is_parent)),
        ],
    )?;
    Ok(())
}

fn update_entity_row(
    tx: &Transaction<'_>,
    registry: &EntityTypeRegistry,
    commands: &CommandTable,
    cache: &EntityCache,
    project: &ProjectInfo,
    handle: EntityHandle,
) -> Result<()> {
    let type_name = cache.type_name(handle)?.to_string();
    let entity_type = registry.find_by_full_name(&type_name)?;
    let Some(id) = cache.id(handle)? else {
        return Err(VellumError::not_found("entity identifier", type_name));
    };

    let command = commands.get(&type_name, OperationKind::Update)?;
    check_parameters(
        &type_name,
        OperationKind::Update,
        command,
        1 + entity_type.parameter_slots(),
    )?;

    let mut writer = SqlWriter::new(entity_type);
    cache.entity(handle)?.save_fields(&mut writer, project.version)?;
    let written = writer.finish()?;

    let mut params = Vec::with_capacity(1 + written.params.len());
    params.push(Value::Integer(id.raw()));
    params.extend(written.params);
    command.execute(tx, &format!("update {}", type_name), &params)?;

    // child rows are rewritten wholesale
    delete_child_rows(tx, commands, entity_type, id)?;
    insert_child_rows(tx, commands, id, &written.children)?;
    Ok(())
}

// -------------------------------------------------------------- child rows

fn child_defs(entity_type: &EntityType) -> impl Iterator<Item = &InnerObjectsDef> {
    entity_type.properties().iter().filter_map(|def| match def {
        PropertyDef::InnerObjects(inner) if !inner.is_composable() => Some(inner),
        _ => None,
    })
}

fn delete_child_rows(
    tx: &Transaction<'_>,
    commands: &CommandTable,
    entity_type: &EntityType,
    id: StoreId,
) -> Result<()> {
    for def in child_defs(entity_type) {
        let command = commands.get(def.entity_type_name(), OperationKind::Delete)?;
        check_parameters(def.entity_type_name(), OperationKind::Delete, command, 1)?;
        command.execute(
            tx,
            &format!("delete {} rows", def.entity_type_name()),
            &[Value::Integer(id.raw())],
        )?;
    }
    Ok(())
}

fn insert_child_rows(
    tx: &Transaction<'_>,
    commands: &CommandTable,
    owner: StoreId,
    children: &[PendingChildRows],
) -> Result<()> {
    for pending in children {
        let command = commands.get(&pending.entity_type_name, OperationKind::Insert)?;
        for row in &pending.rows {
            check_parameters(
                &pending.entity_type_name,
                OperationKind::Insert,
                command,
                1 + row.len(),
            )?;
            let mut params = Vec::with_capacity(1 + row.len());
            params.push(Value::Integer(owner.raw()));
            params.extend(row.iter().cloned());
            command.execute(
                tx,
                &format!("insert {} row", pending.entity_type_name),
                &params,
            )?;
        }
    }
    Ok(())
}
