//! Change tracking and dirty detection for the unit of work.
//!
//! This module provides snapshot-based change tracking. A snapshot holds the
//! declared field values of an entity at the moment it became managed; a dirty
//! check compares the live values against it field by field.

use crate::EntityHandle;
use rowkeep_core::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

/// Field values of an entity at a point in time.
///
/// Snapshots are immutable once captured; re-capturing replaces the whole
/// snapshot.
#[derive(Debug)]
pub struct Snapshot {
    /// Declared field values, in declaration order.
    values: Vec<(&'static str, Value)>,
    /// Timestamp when snapshot was taken.
    taken_at: Instant,
}

impl Snapshot {
    /// Create a new snapshot from field values.
    pub fn new(values: Vec<(&'static str, Value)>) -> Self {
        Self {
            values,
            taken_at: Instant::now(),
        }
    }

    /// Captured value of one field.
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.values
            .iter()
            .find(|(name, _)| *name == field)
            .map(|(_, value)| value)
    }

    /// All captured values.
    pub fn values(&self) -> &[(&'static str, Value)] {
        &self.values
    }

    /// Number of captured fields.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether no field was captured.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Get the timestamp when the snapshot was taken.
    pub fn taken_at(&self) -> Instant {
        self.taken_at
    }

    /// Names of fields whose current value differs from the captured one.
    ///
    /// A field present on only one side counts as changed.
    fn diff(&self, current: &[(&'static str, Value)]) -> Vec<&'static str> {
        let mut changed: Vec<&'static str> = current
            .iter()
            .filter(|(name, value)| self.get(name) != Some(value))
            .map(|(name, _)| *name)
            .collect();

        for (name, _) in &self.values {
            if !current.iter().any(|(n, _)| n == name) {
                changed.push(*name);
            }
        }
        changed
    }
}

/// Outcome of comparing an entity against its snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DirtyCheck {
    /// Every declared field equals its snapshot value.
    Clean,
    /// These fields differ from the snapshot.
    Dirty(Vec<&'static str>),
    /// No snapshot exists for the entity.
    NoSnapshot,
}

impl DirtyCheck {
    /// Whether the check found changed fields.
    pub fn is_dirty(&self) -> bool {
        matches!(self, DirtyCheck::Dirty(_))
    }
}

/// Tracks changes to entities in the unit of work.
///
/// Uses snapshot comparison to detect when entities have been modified.
#[derive(Debug, Default)]
pub struct ChangeTracker {
    /// Snapshots by entity handle.
    snapshots: HashMap<EntityHandle, Arc<Snapshot>>,
}

impl ChangeTracker {
    /// Create a new empty change tracker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Capture the field values of an entity, replacing any earlier snapshot.
    #[tracing::instrument(level = "trace", skip(self, values))]
    pub fn capture(
        &mut self,
        handle: EntityHandle,
        entity: &'static str,
        values: Vec<(&'static str, Value)>,
    ) {
        tracing::trace!(fields = values.len(), "Taking entity snapshot");
        self.snapshots.insert(handle, Arc::new(Snapshot::new(values)));
    }

    /// Compare current values against the snapshot.
    #[tracing::instrument(level = "trace", skip(self, current))]
    pub fn check(&self, handle: EntityHandle, current: &[(&'static str, Value)]) -> DirtyCheck {
        let Some(snapshot) = self.snapshots.get(&handle) else {
            tracing::trace!("No snapshot");
            return DirtyCheck::NoSnapshot;
        };

        let changed = snapshot.diff(current);
        tracing::trace!(dirty = !changed.is_empty(), "Dirty check result");
        if changed.is_empty() {
            DirtyCheck::Clean
        } else {
            DirtyCheck::Dirty(changed)
        }
    }

    /// Check if an entity has changed since its snapshot.
    ///
    /// Returns `true` if:
    /// - The entity has no snapshot (treated as dirty)
    /// - Any declared field differs from the snapshot
    pub fn is_dirty(&self, handle: EntityHandle, current: &[(&'static str, Value)]) -> bool {
        !matches!(self.check(handle, current), DirtyCheck::Clean)
    }

    /// Get changed fields between snapshot and current state.
    ///
    /// Without a snapshot every current field is reported as changed.
    pub fn changed_fields(
        &self,
        handle: EntityHandle,
        current: &[(&'static str, Value)],
    ) -> Vec<&'static str> {
        match self.check(handle, current) {
            DirtyCheck::Clean => Vec::new(),
            DirtyCheck::Dirty(fields) => fields,
            DirtyCheck::NoSnapshot => current.iter().map(|(name, _)| *name).collect(),
        }
    }

    /// Check if a snapshot exists for the given handle.
    pub fn has_snapshot(&self, handle: EntityHandle) -> bool {
        self.snapshots.contains_key(&handle)
    }

    /// Get the snapshot for a handle.
    pub fn get_snapshot(&self, handle: EntityHandle) -> Option<Arc<Snapshot>> {
        self.snapshots.get(&handle).cloned()
    }

    /// Clear snapshot for a specific entity.
    pub fn clear(&mut self, handle: EntityHandle) {
        self.snapshots.remove(&handle);
    }

    /// Clear all snapshots.
    pub fn clear_all(&mut self) {
        self.snapshots.clear();
    }

    /// Number of tracked snapshots.
    pub fn len(&self) -> usize {
        self.snapshots.len()
    }

    /// Check if there are no snapshots.
    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty()
    }
}
