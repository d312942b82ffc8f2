//! Entity lifecycle tracking between flushes.
//!
//! Every entity the engine knows about sits in an arena bucket addressed by
//! an [`EntityHandle`]. Buckets are partitioned per category into a `loaded`
//! set (entities with a store identifier) and a `new` set (never flushed);
//! a bucket leaves the new set only when a flush assigns its identifier.
//! Handles are never reused; a purged bucket's handle answers `NotFound`.

use std::collections::HashMap;
use std::fmt;

use tracing::debug;

use crate::errors::{Result, VellumError};
use crate::model::{EntityCategory, Persistable, StoreId};

/// Stable address of a tracked entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EntityHandle(usize);

/// Lifecycle of a loaded bucket. Entities in the new set keep `Original`
/// until their first flush; their membership in the new set is what marks
/// them pending.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityState {
    Original,
    Modified,
    OwnerChanged,
    Deleted,
}

/// A glue-point attachment between two tracked shapes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShapeConnection {
    pub connector: EntityHandle,
    pub glue_point: i32,
    pub target: EntityHandle,
    pub target_point: i32,
}

struct Bucket {
    type_name: String,
    category: EntityCategory,
    entity: Box<dyn Persistable>,
    owner: Option<EntityHandle>,
    id: Option<StoreId>,
    state: EntityState,
    is_new: bool,
}

/// The change tracker a repository flushes from.
///
/// Per-category handle lists keep insertion order, which puts owners before
/// the entities they own: loads append parents before their children, and
/// flush acceptance appends in insert order.
#[derive(Default)]
pub struct EntityCache {
    slots: Vec<Option<Bucket>>,
    loaded: HashMap<EntityCategory, Vec<EntityHandle>>,
    fresh: HashMap<EntityCategory, Vec<EntityHandle>>,
    by_id: HashMap<(String, StoreId), EntityHandle>,
    new_connections: Vec<ShapeConnection>,
    deleted_connections: Vec<ShapeConnection>,
    loaded_connections: Vec<ShapeConnection>,
}

fn untracked(handle: EntityHandle) -> VellumError {
    VellumError::not_found("entity bucket", handle.0.to_string())
}

fn deleted_error(bucket: &Bucket) -> VellumError {
    let key = match bucket.id {
        Some(id) => format!("{} {}", bucket.type_name, id),
        None => bucket.type_name.clone(),
    };
    VellumError::EntityDeleted { key }
}

impl EntityCache {
    pub fn new() -> Self {
        EntityCache::default()
    }

    fn bucket(&self, handle: EntityHandle) -> Result<&Bucket> {
        self.slots
            .get(handle.0)
            .and_then(Option::as_ref)
            .ok_or_else(|| untracked(handle))
    }

    fn bucket_mut(&mut self, handle: EntityHandle) -> Result<&mut Bucket> {
        self.slots
            .get_mut(handle.0)
            .and_then(Option::as_mut)
            .ok_or_else(|| untracked(handle))
    }

    /// Starts tracking a freshly created entity. It joins the new set of its
    /// category and has no identifier until the next successful flush.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` when `owner` is not a tracked handle.
    pub fn add_new(
        &mut self,
        type_name: impl Into<String>,
        category: EntityCategory,
        entity: Box<dyn Persistable>,
        owner: Option<EntityHandle>,
    ) -> Result<EntityHandle> {
        if let Some(owner) = owner {
            self.bucket(owner)?;
        }
        let handle = EntityHandle(self.slots.len());
        self.slots.push(Some(Bucket {
            type_name: type_name.into(),
            category,
            entity,
            owner,
            id: None,
            state: EntityState::Original,
            is_new: true,
        }));
        self.fresh.entry(category).or_default().push(handle);
        Ok(handle)
    }

    /// Starts tracking an entity materialized from the store. Re-adding an
    /// identifier that is already cached returns the existing handle
    /// unchanged, which is what makes loads idempotent.
    pub fn add_loaded(
        &mut self,
        type_name: impl Into<String>,
        category: EntityCategory,
        entity: Box<dyn Persistable>,
        owner: Option<EntityHandle>,
        id: StoreId,
    ) -> Result<EntityHandle> {
        let type_name = type_name.into();
        if let Some(existing) = self.find_by_id(&type_name, id) {
            return Ok(existing);
        }
        if let Some(owner) = owner {
            self.bucket(owner)?;
        }
        let handle = EntityHandle(self.slots.len());
        self.slots.push(Some(Bucket {
            type_name: type_name.clone(),
            category,
            entity,
            owner,
            id: Some(id),
            state: EntityState::Original,
            is_new: false,
        }));
        self.loaded.entry(category).or_default().push(handle);
        self.by_id.insert((type_name, id), handle);
        Ok(handle)
    }

    /// Flags a loaded bucket for re-writing. New entities are already
    /// pending, so this is a no-op for them.
    ///
    /// # Errors
    ///
    /// `NotFound` for untracked handles, `EntityDeleted` for buckets
    /// already flagged for deletion.
    pub fn mark_modified(&mut self, handle: EntityHandle) -> Result<()> {
        let bucket = self.bucket_mut(handle)?;
        match bucket.state {
            EntityState::Deleted => Err(deleted_error(bucket)),
            EntityState::Original if !bucket.is_new => {
                bucket.state = EntityState::Modified;
                Ok(())
            }
            _ => Ok(()),
        }
    }

    /// Moves the bucket under a different owner (or to the top level).
    pub fn change_owner(&mut self, handle: EntityHandle, owner: Option<EntityHandle>) -> Result<()> {
        if let Some(owner) = owner {
            self.bucket(owner)?;
        }
        let bucket = self.bucket_mut(handle)?;
        if bucket.state == EntityState::Deleted {
            return Err(deleted_error(bucket));
        }
        bucket.owner = owner;
        if !bucket.is_new {
            bucket.state = EntityState::OwnerChanged;
        }
        Ok(())
    }

    /// Flags a loaded bucket for deletion. A new entity never reached the
    /// store, so it is untracked entirely instead; its handle dangles from
    /// then on.
    pub fn mark_deleted(&mut self, handle: EntityHandle) -> Result<()> {
        let (is_new, category) = {
            let bucket = self.bucket(handle)?;
            (bucket.is_new, bucket.category)
        };
        if is_new {
            self.slots[handle.0] = None;
            if let Some(list) = self.fresh.get_mut(&category) {
                list.retain(|h| *h != handle);
            }
            return Ok(());
        }
        self.bucket_mut(handle)?.state = EntityState::Deleted;
        Ok(())
    }

    pub fn entity(&self, handle: EntityHandle) -> Result<&dyn Persistable> {
        Ok(self.bucket(handle)?.entity.as_ref())
    }

    /// Mutable access; implies `mark_modified` for loaded buckets.
    pub fn entity_mut(&mut self, handle: EntityHandle) -> Result<&mut dyn Persistable> {
        let bucket = self.bucket_mut(handle)?;
        match bucket.state {
            EntityState::Deleted => Err(deleted_error(bucket)),
            EntityState::Original if !bucket.is_new => {
                bucket.state = EntityState::Modified;
                Ok(bucket.entity.as_mut())
            }
            _ => Ok(bucket.entity.as_mut()),
        }
    }

    pub fn state(&self, handle: EntityHandle) -> Result<EntityState> {
        Ok(self.bucket(handle)?.state)
    }

    pub fn id(&self, handle: EntityHandle) -> Result<Option<StoreId>> {
        Ok(self.bucket(handle)?.id)
    }

    pub fn owner(&self, handle: EntityHandle) -> Result<Option<EntityHandle>> {
        Ok(self.bucket(handle)?.owner)
    }

    pub fn type_name(&self, handle: EntityHandle) -> Result<&str> {
        Ok(&self.bucket(handle)?.type_name)
    }

    pub fn category(&self, handle: EntityHandle) -> Result<EntityCategory> {
        Ok(self.bucket(handle)?.category)
    }

    pub fn is_new(&self, handle: EntityHandle) -> Result<bool> {
        Ok(self.bucket(handle)?.is_new)
    }

    pub fn find_by_id(&self, type_name: &str, id: StoreId) -> Option<EntityHandle> {
        self.by_id.get(&(type_name.to_string(), id)).copied()
    }

    /// The standard identifier filter loads pass to skip cached rows.
    pub fn contains_id(&self, type_name: &str, id: StoreId) -> bool {
        self.find_by_id(type_name, id).is_some()
    }

    /// Loaded handles of a category, insertion-ordered (owners first).
    pub fn loaded_in(&self, category: EntityCategory) -> Vec<EntityHandle> {
        self.loaded.get(&category).cloned().unwrap_or_default()
    }

    /// Loaded handles of a category currently in `state`.
    pub fn loaded_in_state(&self, category: EntityCategory, state: EntityState) -> Vec<EntityHandle> {
        self.loaded
            .get(&category)
            .map(|handles| {
                handles
                    .iter()
                    .copied()
                    .filter(|h| {
                        self.slots[h.0]
                            .as_ref()
                            .is_some_and(|bucket| bucket.state == state)
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    /// New (never flushed) handles of a category, creation-ordered.
    pub fn new_in(&self, category: EntityCategory) -> Vec<EntityHandle> {
        self.fresh.get(&category).cloned().unwrap_or_default()
    }

    /// True when any live bucket of `category` is owned by `owner`.
    pub fn has_owned_in(&self, category: EntityCategory, owner: EntityHandle) -> bool {
        let owned = |handles: Option<&Vec<EntityHandle>>| {
            handles.is_some_and(|handles| {
                handles.iter().any(|h| {
                    self.slots[h.0].as_ref().is_some_and(|bucket| {
                        bucket.owner == Some(owner) && bucket.state != EntityState::Deleted
                    })
                })
            })
        };
        owned(self.loaded.get(&category)) || owned(self.fresh.get(&category))
    }

    /// Records a connection between two tracked shapes. Re-adding a
    /// connection that was flagged for deletion cancels the deletion.
    pub fn add_connection(&mut self, connection: ShapeConnection) -> Result<()> {
        self.bucket(connection.connector)?;
        self.bucket(connection.target)?;
        if let Some(index) = self
            .deleted_connections
            .iter()
            .position(|c| *c == connection)
        {
            self.deleted_connections.remove(index);
            self.loaded_connections.push(connection);
            return Ok(());
        }
        if !self.new_connections.contains(&connection)
            && !self.loaded_connections.contains(&connection)
        {
            self.new_connections.push(connection);
        }
        Ok(())
    }

    /// Removes a connection. A never-flushed connection is simply dropped;
    /// a loaded one is flagged for deletion at the next flush.
    pub fn remove_connection(&mut self, connection: ShapeConnection) -> Result<()> {
        if let Some(index) = self.new_connections.iter().position(|c| *c == connection) {
            self.new_connections.remove(index);
            return Ok(());
        }
        if let Some(index) = self
            .loaded_connections
            .iter()
            .position(|c| *c == connection)
        {
            self.loaded_connections.remove(index);
            self.deleted_connections.push(connection);
            return Ok(());
        }
        Err(VellumError::not_found(
            "shape connection",
            format!(
                "connector {:?} point {}",
                connection.connector, connection.glue_point
            ),
        ))
    }

    /// Records a connection materialized from the store.
    pub fn add_loaded_connection(&mut self, connection: ShapeConnection) -> Result<()> {
        self.bucket(connection.connector)?;
        self.bucket(connection.target)?;
        if !self.loaded_connections.contains(&connection) {
            self.loaded_connections.push(connection);
        }
        Ok(())
    }

    pub fn new_connections(&self) -> &[ShapeConnection] {
        &self.new_connections
    }

    pub fn deleted_connections(&self) -> &[ShapeConnection] {
        &self.deleted_connections
    }

    pub fn loaded_connections(&self) -> &[ShapeConnection] {
        &self.loaded_connections
    }

    /// Settles the cache after a committed flush: assigns the staged
    /// identifiers (each bucket receives one at most once), moves assigned
    /// buckets into the loaded set, purges deleted buckets, and resets the
    /// survivors to `Original`. Must only be called after the store
    /// transaction committed; a rolled-back flush never reaches this.
    pub fn accept_changes(&mut self, assigned: &[(EntityHandle, StoreId)]) -> Result<()> {
        for &(handle, id) in assigned {
            let (type_name, category) = {
                let bucket = self.bucket_mut(handle)?;
                bucket.id = Some(id);
                bucket.is_new = false;
                bucket.state = EntityState::Original;
                (bucket.type_name.clone(), bucket.category)
            };
            if let Some(list) = self.fresh.get_mut(&category) {
                list.retain(|h| *h != handle);
            }
            self.loaded.entry(category).or_default().push(handle);
            self.by_id.insert((type_name, id), handle);
        }

        let mut purged: Vec<(EntityHandle, String, Option<StoreId>)> = Vec::new();
        for handles in self.loaded.values() {
            for &handle in handles {
                if let Some(bucket) = self.slots[handle.0].as_ref() {
                    if bucket.state == EntityState::Deleted {
                        purged.push((handle, bucket.type_name.clone(), bucket.id));
                    }
                }
            }
        }
        let purged_count = purged.len();
        for (handle, type_name, id) in purged {
            self.slots[handle.0] = None;
            if let Some(id) = id {
                self.by_id.remove(&(type_name, id));
            }
        }
        let slots = &self.slots;
        for handles in self.loaded.values_mut() {
            handles.retain(|h| slots[h.0].is_some());
        }

        for bucket in self.slots.iter_mut().flatten() {
            if !bucket.is_new {
                bucket.state = EntityState::Original;
            }
        }

        let mut flushed = std::mem::take(&mut self.new_connections);
        self.loaded_connections.append(&mut flushed);
        self.deleted_connections.clear();
        debug!(assigned = assigned.len(), purged = purged_count, "cache settled");
        Ok(())
    }
}

impl fmt::Debug for EntityCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let live = self.slots.iter().filter(|s| s.is_some()).count();
        f.debug_struct("EntityCache")
            .field("buckets", &live)
            .field("new_connections", &self.new_connections.len())
            .field("loaded_connections", &self.loaded_connections.len())
            .finish()
    }
}
