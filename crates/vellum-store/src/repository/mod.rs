//! The repository: cache, registry and command table over one connection
//!
//! All mutation goes through the entity cache; nothing touches the store
//! until `save_changes` replays the tracked changes inside a single
//! transaction. Loads are partial by design: opening a project pulls the
//! project graph (settings, designs, styles, templates, model), while
//! diagrams, shapes and model object trees load on demand.

#![allow(clippy::result_large_err)]

mod checks;
mod flush;
mod load;

use rusqlite::types::Value;
use rusqlite::Connection;

use vellum_core::cache::{EntityCache, EntityHandle, ShapeConnection};
use vellum_core::errors::VellumError;
use vellum_core::model::{EntityCategory, OperationKind, Persistable, StoreId};
use vellum_core::registry::EntityTypeRegistry;

use crate::command::{CommandTable, PROJECT_INFO_TYPE};
use crate::errors::Result;
use crate::schema;

/// Identity of the project root row.
#[derive(Debug, Clone)]
pub struct ProjectInfo {
    pub(crate) id: Option<StoreId>,
    pub(crate) name: String,
    pub(crate) version: u32,
}

impl ProjectInfo {
    /// `None` until the first successful flush creates the root row.
    pub fn id(&self) -> Option<StoreId> {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Repository version every serialization decision is gated on.
    pub fn version(&self) -> u32 {
        self.version
    }
}

#[derive(Debug)]
pub struct Repository {
    conn: Connection,
    registry: EntityTypeRegistry,
    commands: CommandTable,
    cache: EntityCache,
    project: ProjectInfo,
}

impl Repository {
    /// Stand up a repository over a fresh store. The root row is written
    /// by the first `save_changes`.
    ///
    /// # Errors
    ///
    /// Returns `SchemaConflict` when a registered type targets a newer
    /// repository version than the store is being created with.
    pub fn create(
        conn: Connection,
        registry: EntityTypeRegistry,
        commands: CommandTable,
        project_name: impl Into<String>,
        version: u32,
    ) -> Result<Self> {
        check_type_versions(&registry, version)?;
        Ok(Repository {
            conn,
            registry,
            commands,
            cache: EntityCache::new(),
            project: ProjectInfo {
                id: None,
                name: project_name.into(),
                version,
            },
        })
    }

    /// Open an existing project by name and load its project graph.
    ///
    /// # Errors
    ///
    /// - `NotFound` — no project row with that name
    /// - `SchemaConflict` — a registered type targets a newer version than
    ///   the stored project, or the registered types disagree with the
    ///   stored schema fingerprint
    pub fn open(
        conn: Connection,
        registry: EntityTypeRegistry,
        commands: CommandTable,
        project_name: &str,
    ) -> Result<Self> {
        let command = commands.get(PROJECT_INFO_TYPE, OperationKind::SelectByName)?;
        let rows = command.query_rows(
            &conn,
            "load project root",
            &[Value::Text(project_name.to_string())],
        )?;
        let Some(row) = rows.first() else {
            return Err(VellumError::not_found("project", project_name));
        };
        let id = match row.first() {
            Some(Value::Integer(raw)) => StoreId::new(*raw),
            other => {
                return Err(VellumError::invalid_format(format!(
                    "project row carries a non-integer id: {:?}",
                    other
                )))
            }
        };
        let version = match row.get(2) {
            Some(Value::Integer(wide)) => u32::try_from(*wide).map_err(|_| {
                VellumError::invalid_format(format!("project row carries version {}", wide))
            })?,
            other => {
                return Err(VellumError::invalid_format(format!(
                    "project row carries a non-integer version: {:?}",
                    other
                )))
            }
        };
        check_type_versions(&registry, version)?;
        // Hand-assembled stores carry no manifest; only drift is fatal.
        if let Err(err) = schema::verify_schema(&conn, &registry) {
            if !matches!(err, VellumError::NotFound { .. }) {
                return Err(err);
            }
        }

        let mut repository = Repository {
            conn,
            registry,
            commands,
            cache: EntityCache::new(),
            project: ProjectInfo {
                id: Some(id),
                name: project_name.to_string(),
                version,
            },
        };
        load::load_project_graph(
            &repository.conn,
            &repository.registry,
            &repository.commands,
            &mut repository.cache,
            &repository.project,
        )?;
        Ok(repository)
    }

    pub fn project(&self) -> &ProjectInfo {
        &self.project
    }

    pub fn registry(&self) -> &EntityTypeRegistry {
        &self.registry
    }

    pub fn commands(&self) -> &CommandTable {
        &self.commands
    }

    pub fn cache(&self) -> &EntityCache {
        &self.cache
    }

    /// Escape hatch for host-specific queries.
    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Track a freshly created entity. It gets an identifier at the next
    /// successful flush.
    ///
    /// # Errors
    ///
    /// - `NotFound` — the type name is not registered, or the owner handle
    ///   is not tracked
    /// - `SchemaConflict` — the instance reports a different type name
    pub fn insert_entity(
        &mut self,
        type_name: &str,
        entity: Box<dyn Persistable>,
        owner: Option<EntityHandle>,
    ) -> Result<EntityHandle> {
        let entity_type = self.registry.find_by_full_name(type_name)?;
        if entity.type_name() != type_name {
            return Err(VellumError::schema_conflict(
                type_name,
                format!("instance reports type '{}'", entity.type_name()),
            ));
        }
        self.cache.add_new(type_name, entity_type.category(), entity, owner)
    }

    pub fn entity(&self, handle: EntityHandle) -> Result<&dyn Persistable> {
        self.cache.entity(handle)
    }

    /// Mutable access to a tracked entity; loaded buckets become Modified.
    pub fn entity_mut(&mut self, handle: EntityHandle) -> Result<&mut dyn Persistable> {
        self.cache.entity_mut(handle)
    }

    pub fn mark_modified(&mut self, handle: EntityHandle) -> Result<()> {
        self.cache.mark_modified(handle)
    }

    pub fn change_owner(&mut self, handle: EntityHandle, owner: Option<EntityHandle>) -> Result<()> {
        self.cache.change_owner(handle, owner)
    }

    pub fn delete_entity(&mut self, handle: EntityHandle) -> Result<()> {
        self.cache.mark_deleted(handle)
    }

    /// Record a glue-point connection between two tracked shapes.
    pub fn add_shape_connection(&mut self, connection: ShapeConnection) -> Result<()> {
        for endpoint in [connection.connector, connection.target] {
            if self.cache.category(endpoint)? != EntityCategory::Shape {
                return Err(VellumError::schema_conflict(
                    self.cache.type_name(endpoint)?,
                    "only shapes take part in connections",
                ));
            }
        }
        self.cache.add_connection(connection)
    }

    pub fn remove_shape_connection(&mut self, connection: ShapeConnection) -> Result<()> {
        self.cache.remove_connection(connection)
    }

    /// Replay every tracked change inside one transaction, then accept the
    /// tracked state. On any error the transaction rolls back and the cache
    /// is left untouched.
    pub fn save_changes(&mut self) -> Result<()> {
        flush::save_changes(
            &mut self.conn,
            &self.registry,
            &self.commands,
            &mut self.cache,
            &mut self.project,
        )
    }

    /// Run one select and track every materialized row. Rows whose
    /// identifier is already cached are skipped, which keeps loads from
    /// clobbering tracked changes; `filter` can narrow further.
    pub fn load_entities(
        &mut self,
        type_name: &str,
        operation: OperationKind,
        params: &[Value],
        owner: Option<EntityHandle>,
        filter: impl Fn(StoreId) -> bool,
    ) -> Result<Vec<EntityHandle>> {
        load::load_entities(
            &self.conn,
            &self.registry,
            &self.commands,
            &mut self.cache,
            self.project.version,
            type_name,
            operation,
            params,
            owner,
            &filter,
        )
    }

    /// Load the project's diagrams (without their shapes).
    pub fn load_diagrams(&mut self) -> Result<Vec<EntityHandle>> {
        load::load_diagrams(
            &self.conn,
            &self.registry,
            &self.commands,
            &mut self.cache,
            &self.project,
        )
    }

    /// Load a diagram's shape tree and its stored connections.
    pub fn load_diagram_shapes(&mut self, diagram: EntityHandle) -> Result<Vec<EntityHandle>> {
        load::load_diagram_shapes(
            &self.conn,
            &self.registry,
            &self.commands,
            &mut self.cache,
            self.project.version,
            diagram,
        )
    }

    /// Load the model's root model objects, loading the model row first if
    /// needed.
    pub fn load_model_objects(&mut self) -> Result<Vec<EntityHandle>> {
        load::load_model_objects(
            &self.conn,
            &self.registry,
            &self.commands,
            &mut self.cache,
            &self.project,
        )
    }

    /// Load the child model objects nested under `parent`.
    pub fn load_child_model_objects(&mut self, parent: EntityHandle) -> Result<Vec<EntityHandle>> {
        load::load_child_model_objects(
            &self.conn,
            &self.registry,
            &self.commands,
            &mut self.cache,
            self.project.version,
            parent,
        )
    }

    /// Load a diagram's model object links. Stores older than the feature
    /// have none, so this is a no-op below that version.
    pub fn load_diagram_model_objects(&mut self, diagram: EntityHandle) -> Result<Vec<EntityHandle>> {
        load::load_diagram_model_objects(
            &self.conn,
            &self.registry,
            &self.commands,
            &mut self.cache,
            self.project.version,
            diagram,
        )
    }

    /// True when a stored, unmaterialized diagram still references the
    /// style. Materialized diagrams are the caller's to check in memory.
    pub fn is_style_in_use(&self, style: EntityHandle) -> Result<bool> {
        checks::entity_in_use(
            &self.conn,
            &self.commands,
            &self.cache,
            style,
            OperationKind::CheckStyleInUse,
        )
    }

    pub fn is_template_in_use(&self, template: EntityHandle) -> Result<bool> {
        checks::entity_in_use(
            &self.conn,
            &self.commands,
            &self.cache,
            template,
            OperationKind::CheckTemplateInUse,
        )
    }

    pub fn is_model_object_in_use(&self, model_object: EntityHandle) -> Result<bool> {
        checks::entity_in_use(
            &self.conn,
            &self.commands,
            &self.cache,
            model_object,
            OperationKind::CheckModelObjectInUse,
        )
    }

    /// True when any stored, unmaterialized diagram contains a shape of the
    /// given type.
    pub fn is_shape_type_in_use(&self, type_name: &str) -> Result<bool> {
        checks::shape_type_in_use(&self.conn, &self.commands, &self.cache, type_name)
    }
}

fn check_type_versions(registry: &EntityTypeRegistry, version: u32) -> Result<()> {
    for entity_type in registry.all() {
        if entity_type.repository_version() > version {
            return Err(VellumError::schema_conflict(
                entity_type.full_name(),
                format!(
                    "entity type targets repository version {} but the store is version {}",
                    entity_type.repository_version(),
                    version
                ),
            ));
        }
    }
    Ok(())
}
