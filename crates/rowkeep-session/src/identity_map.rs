//! Identity Map pattern for tracking unique object instances per primary key.
//!
//! The Identity Map ensures that each stored row corresponds to exactly one
//! live object within a unit of work. This provides:
//!
//! - **Uniqueness**: the same (type, primary key) always resolves to the same
//!   [`EntityRef`]
//! - **Consistency**: changes made through any clone of that reference are
//!   what the unit of work persists
//!
//! # Design
//!
//! Records are keyed by [`EntityHandle`]. A secondary index maps
//! [`ObjectKey`] (type + primary key hash) to the owning handle; entities
//! whose key is still unset live only in the primary table. Handles deleted
//! by a committed transaction are kept as tombstones so they can never be
//! managed again. A tombstone holds a weak reference and is pruned once the
//! application drops every clone of the deleted entity, so the set only
//! grows with deleted entities that are still reachable.
//!
//! # Example
//!
//! ```ignore
//! let mut map = IdentityMap::new();
//!
//! let first = EntityRef::new(user);
//! assert_eq!(map.manage(&first), ManageOutcome::Registered);
//!
//! // A second instance of the same row is not tracked
//! let second = EntityRef::new(same_user);
//! assert_eq!(map.manage(&second), ManageOutcome::Existing(first.handle()));
//!
//! let found = map.lookup::<User>(&pk_values).unwrap();
//! assert!(found.ptr_eq(&first));
//! ```

use crate::{EntityHandle, EntityRef, EntityState, ObjectKey, Trackable};
use rowkeep_core::{Entity, Value};
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::Weak;

/// Bookkeeping for one tracked handle.
struct ManagedRecord {
    /// Type-erased reference to the live entity.
    object: Box<dyn Trackable>,
    /// Identity-map key, once the primary key is known and indexed.
    key: Option<ObjectKey>,
    /// Primary key values behind `key`.
    pk_values: Vec<Value>,
    /// Current lifecycle state.
    state: EntityState,
    /// Whether the entity went through `manage` (and so has a snapshot).
    managed: bool,
}

impl ManagedRecord {
    fn new(object: Box<dyn Trackable>) -> Self {
        Self {
            object,
            key: None,
            pk_values: Vec::new(),
            state: EntityState::Unmanaged,
            managed: false,
        }
    }
}

/// Result of asking the identity map to manage an entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManageOutcome {
    /// The entity is now managed under its own handle; take a snapshot.
    Registered,
    /// Another (or the same) handle already owns this identity.
    Existing(EntityHandle),
    /// The handle was deleted and cannot be managed again.
    Rejected,
}

/// Identity map from (entity type, primary key) to the tracked handle.
#[derive(Default)]
pub struct IdentityMap {
    records: HashMap<EntityHandle, ManagedRecord>,
    by_key: HashMap<ObjectKey, EntityHandle>,
    /// Tombstones of committed deletes, pruned when the entity is dropped.
    deleted: HashMap<EntityHandle, Weak<dyn Any + Send + Sync>>,
}

impl IdentityMap {
    /// Create a new empty identity map.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Manage an entity.
    ///
    /// If an entity of the same type and primary key is already tracked, the
    /// map is left unchanged and the owner's handle is returned. Entities
    /// whose key is unset are tracked by handle only.
    pub fn manage(&mut self, object: &dyn Trackable) -> ManageOutcome {
        let handle = object.handle();
        if self.deleted.contains_key(&handle) {
            return ManageOutcome::Rejected;
        }

        let pk = object.assigned_key();
        if let Some(record) = self.records.get(&handle) {
            if record.managed && (record.key.is_some() || pk.is_none()) {
                return ManageOutcome::Existing(handle);
            }
        }

        let type_id = object.entity_type();
        if let Some(pk) = &pk {
            if let Some(owner) = self.owner_of(type_id, pk) {
                if owner != handle {
                    return ManageOutcome::Existing(owner);
                }
            }
        }

        self.records
            .entry(handle)
            .or_insert_with(|| ManagedRecord::new(object.boxed_clone()));
        self.bind(handle, type_id, pk);
        ManageOutcome::Registered
    }

    /// Re-manage a tracked entity under the key it holds now.
    ///
    /// Used after a committed insert: the entity becomes `Managed` under its
    /// assigned key. If another handle already owns that key, the inserted
    /// handle is dropped from the map and the owner is returned.
    pub fn promote(&mut self, handle: EntityHandle) -> ManageOutcome {
        let Some(record) = self.records.get(&handle) else {
            return ManageOutcome::Rejected;
        };
        let type_id = record.object.entity_type();
        let pk = record.object.assigned_key();

        if let Some(pk) = &pk {
            if let Some(owner) = self.owner_of(type_id, pk) {
                if owner != handle {
                    tracing::warn!(
                        handle = %handle,
                        owner = %owner,
                        "Inserted entity collides with a tracked identity, detaching it"
                    );
                    self.detach(handle);
                    return ManageOutcome::Existing(owner);
                }
            }
        }

        self.bind(handle, type_id, pk);
        self.set_state(handle, EntityState::Managed);
        ManageOutcome::Registered
    }

    /// Start tracking a handle without managing it.
    ///
    /// Lets a fresh entity be scheduled; it is not indexed by key and
    /// reports `Unmanaged` until a state is set.
    pub fn ensure_tracked(&mut self, object: &dyn Trackable) {
        self.records
            .entry(object.handle())
            .or_insert_with(|| ManagedRecord::new(object.boxed_clone()));
    }

    /// Look up the managed entity with the given primary key.
    pub fn lookup<E: Entity>(&self, pk_values: &[Value]) -> Option<EntityRef<E>> {
        let handle = self.lookup_handle::<E>(pk_values)?;
        self.records
            .get(&handle)?
            .object
            .as_any()
            .downcast_ref::<EntityRef<E>>()
            .cloned()
    }

    /// Handle owning the given primary key.
    pub fn lookup_handle<E: Entity>(&self, pk_values: &[Value]) -> Option<EntityHandle> {
        self.owner_of(TypeId::of::<E>(), pk_values)
    }

    /// Check if an entity with the given primary key is tracked.
    pub fn contains<E: Entity>(&self, pk_values: &[Value]) -> bool {
        self.lookup_handle::<E>(pk_values).is_some()
    }

    /// Type-erased entity behind a handle.
    pub fn object(&self, handle: EntityHandle) -> Option<&dyn Trackable> {
        self.records.get(&handle).map(|record| record.object.as_ref())
    }

    /// Lifecycle state of a handle.
    pub fn state(&self, handle: EntityHandle) -> EntityState {
        if self.deleted.contains_key(&handle) {
            return EntityState::Deleted;
        }
        self.records
            .get(&handle)
            .map_or(EntityState::Unmanaged, |record| record.state)
    }

    /// Whether the handle is in state exactly `Managed`.
    pub fn is_managed(&self, handle: EntityHandle) -> bool {
        self.state(handle) == EntityState::Managed
    }

    /// Whether the handle went through `manage` and still is tracked.
    pub fn was_managed(&self, handle: EntityHandle) -> bool {
        self.records.get(&handle).is_some_and(|record| record.managed)
    }

    /// Set the state of a tracked handle. Untracked handles are ignored.
    pub fn set_state(&mut self, handle: EntityHandle, state: EntityState) {
        if let Some(record) = self.records.get_mut(&handle) {
            record.state = state;
        }
    }

    /// Undo a pending state after a failed commit.
    ///
    /// Managed entities return to `Managed`; entities that were only
    /// scheduled stop being tracked.
    pub fn revert_pending(&mut self, handle: EntityHandle) {
        let Some(record) = self.records.get_mut(&handle) else {
            return;
        };
        if record.managed {
            record.state = EntityState::Managed;
        } else {
            self.detach(handle);
        }
    }

    /// Mark a handle deleted. Its identity is released and it can no longer
    /// be managed.
    ///
    /// Tombstones of entities the application no longer references are
    /// dropped on the way.
    pub fn mark_deleted(&mut self, handle: EntityHandle) {
        let Some(record) = self.records.get(&handle) else {
            return;
        };
        let liveness = record.object.downgrade();
        self.detach(handle);
        self.deleted.retain(|_, entity| entity.strong_count() > 0);
        self.deleted.insert(handle, liveness);
    }

    /// Number of tombstones currently kept.
    pub fn tombstone_count(&self) -> usize {
        self.deleted.len()
    }

    /// Stop tracking a handle. Returns whether it was tracked.
    pub fn detach(&mut self, handle: EntityHandle) -> bool {
        let Some(record) = self.records.remove(&handle) else {
            return false;
        };
        if let Some(key) = record.key {
            if self.by_key.get(&key) == Some(&handle) {
                self.by_key.remove(&key);
            }
        }
        true
    }

    /// Handles in state exactly `Managed`, ordered by handle.
    pub fn managed_handles(&self) -> Vec<EntityHandle> {
        let mut handles: Vec<EntityHandle> = self
            .records
            .iter()
            .filter(|(_, record)| record.state == EntityState::Managed)
            .map(|(handle, _)| *handle)
            .collect();
        handles.sort_unstable();
        handles
    }

    /// Number of tracked handles (tombstones excluded).
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Check if nothing is tracked.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Number of handles in state exactly `Managed`.
    pub fn managed_count(&self) -> usize {
        self.records
            .values()
            .filter(|record| record.state == EntityState::Managed)
            .count()
    }

    /// Clear all tracked entities and tombstones.
    pub fn clear(&mut self) {
        self.records.clear();
        self.by_key.clear();
        self.deleted.clear();
    }

    fn owner_of(&self, type_id: TypeId, pk_values: &[Value]) -> Option<EntityHandle> {
        let handle = *self.by_key.get(&ObjectKey::new(type_id, pk_values))?;
        let record = self.records.get(&handle)?;
        (record.pk_values == pk_values).then_some(handle)
    }

    /// Index a tracked handle under its key and mark it managed.
    fn bind(&mut self, handle: EntityHandle, type_id: TypeId, pk: Option<Vec<Value>>) {
        let key = pk.as_deref().map(|pk| ObjectKey::new(type_id, pk));
        let Some(record) = self.records.get_mut(&handle) else {
            return;
        };

        if let Some(old) = record.key.take() {
            if Some(old) != key && self.by_key.get(&old) == Some(&handle) {
                self.by_key.remove(&old);
            }
        }
        if let Some(key) = key {
            self.by_key.insert(key, handle);
        }

        record.key = key;
        record.pk_values = pk.unwrap_or_default();
        record.managed = true;
        if !record.state.is_pending() {
            record.state = EntityState::Managed;
        }
    }
}

impl std::fmt::Debug for IdentityMap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdentityMap")
            .field("tracked", &self.records.len())
            .field("indexed", &self.by_key.len())
            .field("deleted", &self.deleted.len())
            .finish()
    }
}
