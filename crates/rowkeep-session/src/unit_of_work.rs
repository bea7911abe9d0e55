//! Unit of Work orchestrator.
//!
//! The Unit of Work composes the identity map, the change tracker, the
//! operation schedule and the mapper registry, and synchronizes tracked
//! entities to a [`TransactionalStore`] in one transaction.
//!
//! # Overview
//!
//! The Unit of Work:
//! - Manages entities (one live instance per stored row)
//! - Tracks new entities to INSERT, modified ones to UPDATE and removed
//!   ones to DELETE
//! - Detects modified managed entities at commit time by snapshot comparison
//! - Applies inserts, then updates, then deletes, each in scheduling order
//! - Commits the store transaction, or rolls it back on the first failure
//!
//! # Example
//!
//! ```ignore
//! let mut uow = UnitOfWork::new(store.clone());
//! uow.register_data_mapper::<Hero, _>(TableMapper::<Hero>::new(store));
//!
//! let hero = uow.manage(&loaded_hero);
//! hero.write().name = "Spider-Man".to_string();
//!
//! let fresh = EntityRef::new(Hero::new("Iron Man"));
//! uow.schedule_for_insert(&fresh)?;
//!
//! let report = uow.commit()?;
//! assert_eq!((report.inserted, report.updated), (1, 1));
//! ```

use crate::change_tracker::{ChangeTracker, DirtyCheck};
use crate::diagnostics::{DiagnosticSink, TracingSink};
use crate::identity_map::{IdentityMap, ManageOutcome};
use crate::registry::DataMapperRegistry;
use crate::schedule::{OperationSchedule, PendingCounts};
use crate::{EntityHandle, EntityRef, EntityState, SchedulePolicy, Trackable, UnitOfWorkConfig};
use rowkeep_core::{DataMapper, Entity, Error, PersistOp, TransactionalStore, Value};
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Error type for Unit of Work scheduling.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UowError {
    /// A different operation is already pending and the policy is `Reject`.
    AlreadyScheduled {
        /// The entity handle.
        handle: EntityHandle,
        /// Entity type name.
        entity: &'static str,
        /// The pending operation.
        scheduled: PersistOp,
        /// The operation that was refused.
        requested: PersistOp,
    },
    /// The entity was deleted by an earlier commit.
    EntityDeleted {
        /// The entity handle.
        handle: EntityHandle,
        /// Entity type name.
        entity: &'static str,
    },
}

impl std::fmt::Display for UowError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UowError::AlreadyScheduled {
                handle,
                entity,
                scheduled,
                requested,
            } => write!(
                f,
                "Cannot schedule {} of '{}' {}: {} already pending",
                requested, entity, handle, scheduled
            ),
            UowError::EntityDeleted { handle, entity } => {
                write!(f, "Entity '{}' {} was deleted", entity, handle)
            }
        }
    }
}

impl std::error::Error for UowError {}

impl From<UowError> for Error {
    fn from(e: UowError) -> Self {
        Error::Custom(e.to_string())
    }
}

/// Outcome of a successful commit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CommitReport {
    /// Entities inserted.
    pub inserted: usize,
    /// Entities updated (explicit and auto-detected).
    pub updated: usize,
    /// Entities deleted.
    pub deleted: usize,
    /// Wall time of the commit.
    pub elapsed: Duration,
}

impl CommitReport {
    /// Total number of mapper calls.
    #[must_use]
    pub fn total(&self) -> usize {
        self.inserted + self.updated + self.deleted
    }

    /// Whether the commit had nothing to do.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.total() == 0
    }
}

/// Snapshot of unit-of-work bookkeeping for debugging.
#[derive(Debug, Clone, Serialize)]
pub struct UnitOfWorkDebugInfo {
    /// Total tracked entities.
    pub tracked: usize,
    /// Entities in state exactly `Managed`.
    pub managed: usize,
    /// Captured snapshots.
    pub snapshots: usize,
    /// Scheduled operations by type.
    pub pending: PendingCounts,
    /// Registered data mappers.
    pub mappers: usize,
}

/// Handles of one commit attempt, split by phase.
struct CommitPlan {
    inserts: Vec<EntityHandle>,
    updates: Vec<EntityHandle>,
    deletes: Vec<EntityHandle>,
}

impl CommitPlan {
    fn phases(&self) -> [(PersistOp, &[EntityHandle]); 3] {
        [
            (PersistOp::Insert, self.inserts.as_slice()),
            (PersistOp::Update, self.updates.as_slice()),
            (PersistOp::Delete, self.deletes.as_slice()),
        ]
    }
}

/// Coordinates identity, change tracking and transactional persistence of
/// application entities.
///
/// All methods take `&mut self` or `&self`; one unit of work is driven by
/// one thread at a time.
pub struct UnitOfWork<S: TransactionalStore> {
    store: S,
    config: UnitOfWorkConfig,
    identity_map: IdentityMap,
    change_tracker: ChangeTracker,
    schedule: OperationSchedule,
    mappers: DataMapperRegistry,
    sink: Box<dyn DiagnosticSink>,
}

impl<S: TransactionalStore> UnitOfWork<S> {
    /// Create a unit of work with default configuration.
    pub fn new(store: S) -> Self {
        Self::with_config(store, UnitOfWorkConfig::default())
    }

    /// Create a unit of work with custom configuration.
    pub fn with_config(store: S, config: UnitOfWorkConfig) -> Self {
        Self {
            store,
            config,
            identity_map: IdentityMap::new(),
            change_tracker: ChangeTracker::new(),
            schedule: OperationSchedule::new(),
            mappers: DataMapperRegistry::new(),
            sink: Box::new(TracingSink),
        }
    }

    /// Replace the diagnostic sink (builder pattern).
    #[must_use]
    pub fn with_sink(mut self, sink: impl DiagnosticSink + 'static) -> Self {
        self.sink = Box::new(sink);
        self
    }

    /// The underlying store.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Current configuration.
    pub fn config(&self) -> &UnitOfWorkConfig {
        &self.config
    }

    // ========================================================================
    // Identity
    // ========================================================================

    /// Manage an entity and return the authoritative reference for its row.
    ///
    /// If another instance of the same type and key is already managed it
    /// stays authoritative and is returned; `entity` is left untracked.
    #[tracing::instrument(level = "debug", skip(self, entity), fields(entity = E::ENTITY_NAME, handle = %entity.handle()))]
    pub fn manage<E: Entity>(&mut self, entity: &EntityRef<E>) -> EntityRef<E> {
        match self.manage_object(entity) {
            ManageOutcome::Existing(owner) if owner != entity.handle() => self
                .identity_map
                .object(owner)
                .and_then(|object| object.as_any().downcast_ref::<EntityRef<E>>())
                .cloned()
                .unwrap_or_else(|| entity.clone()),
            _ => entity.clone(),
        }
    }

    /// Manage several entities, in order. Returns how many became managed.
    pub fn manage_all(&mut self, entities: &[&dyn Trackable]) -> usize {
        entities
            .iter()
            .filter(|entity| self.manage_object(**entity) == ManageOutcome::Registered)
            .count()
    }

    fn manage_object(&mut self, entity: &dyn Trackable) -> ManageOutcome {
        let outcome = self.identity_map.manage(entity);
        match outcome {
            ManageOutcome::Registered => {
                self.change_tracker.capture(
                    entity.handle(),
                    entity.entity_name(),
                    entity.field_values(),
                );
                tracing::debug!(entity = entity.entity_name(), handle = %entity.handle(), "Entity managed");
            }
            ManageOutcome::Existing(owner) => {
                tracing::trace!(handle = %entity.handle(), owner = %owner, "Identity already managed");
            }
            ManageOutcome::Rejected => {
                tracing::warn!(
                    entity = entity.entity_name(),
                    handle = %entity.handle(),
                    "Ignoring manage of a deleted entity"
                );
            }
        }
        outcome
    }

    /// Whether the entity is in state exactly `Managed`.
    pub fn is_managed(&self, entity: &dyn Trackable) -> bool {
        self.identity_map.is_managed(entity.handle())
    }

    /// Lifecycle state of an entity.
    pub fn state(&self, entity: &dyn Trackable) -> EntityState {
        self.identity_map.state(entity.handle())
    }

    /// The managed entity of type `E` with the given primary key.
    pub fn get_managed_entity<E: Entity>(&self, pk_values: &[Value]) -> Option<EntityRef<E>> {
        self.identity_map.lookup::<E>(pk_values)
    }

    /// Whether an entity of type `E` with the given key is tracked.
    pub fn contains<E: Entity>(&self, pk_values: &[Value]) -> bool {
        self.identity_map.contains::<E>(pk_values)
    }

    /// Total tracked entity count.
    pub fn tracked_count(&self) -> usize {
        self.identity_map.len()
    }

    /// Stop tracking an entity: identity, snapshot and pending operation.
    ///
    /// Idempotent. A deleted entity stays deleted.
    #[tracing::instrument(level = "debug", skip(self, entity), fields(entity = entity.entity_name(), handle = %entity.handle()))]
    pub fn detach(&mut self, entity: &dyn Trackable) {
        let handle = entity.handle();
        let was_tracked = self.identity_map.detach(handle);
        let dropped = self.schedule.remove(handle);
        self.change_tracker.clear(handle);
        tracing::debug!(was_tracked, dropped = ?dropped, "Entity detached");
    }

    // ========================================================================
    // Scheduling
    // ========================================================================

    /// Schedule an entity for INSERT.
    pub fn schedule_for_insert(&mut self, entity: &dyn Trackable) -> Result<(), UowError> {
        self.schedule_op(entity, PersistOp::Insert)
    }

    /// Schedule an entity for UPDATE.
    pub fn schedule_for_update(&mut self, entity: &dyn Trackable) -> Result<(), UowError> {
        self.schedule_op(entity, PersistOp::Update)
    }

    /// Schedule an entity for DELETE.
    pub fn schedule_for_delete(&mut self, entity: &dyn Trackable) -> Result<(), UowError> {
        self.schedule_op(entity, PersistOp::Delete)
    }

    fn schedule_op(&mut self, entity: &dyn Trackable, op: PersistOp) -> Result<(), UowError> {
        let handle = entity.handle();
        if self.identity_map.state(handle) == EntityState::Deleted {
            return Err(UowError::EntityDeleted {
                handle,
                entity: entity.entity_name(),
            });
        }

        if self.config.schedule_policy == SchedulePolicy::Reject {
            if let Some(scheduled) = self.schedule.get(handle) {
                if scheduled != op {
                    return Err(UowError::AlreadyScheduled {
                        handle,
                        entity: entity.entity_name(),
                        scheduled,
                        requested: op,
                    });
                }
            }
        }

        self.identity_map.ensure_tracked(entity);
        let replaced = self.schedule.schedule(handle, op);
        self.identity_map.set_state(handle, EntityState::pending_for(op));
        tracing::trace!(
            entity = entity.entity_name(),
            handle = %handle,
            op = %op,
            replaced = ?replaced,
            "Scheduled"
        );
        Ok(())
    }

    /// Scheduled operations by type. Dirty entities not yet detected are
    /// not counted.
    pub fn pending_counts(&self) -> PendingCounts {
        self.schedule.counts()
    }

    /// Whether a commit would do anything.
    ///
    /// Dirty managed entities only count while `auto_detect_changes` is on.
    pub fn has_changes(&self) -> bool {
        if !self.schedule.is_empty() {
            return true;
        }
        self.config.auto_detect_changes && !self.dirty_handles().is_empty()
    }

    /// Names of declared fields that differ from the entity's snapshot.
    pub fn modified_fields(&self, entity: &dyn Trackable) -> Vec<&'static str> {
        self.change_tracker
            .changed_fields(entity.handle(), &entity.field_values())
    }

    /// Drop every pending operation and snapshot. The identity map is kept.
    #[tracing::instrument(level = "debug", skip(self))]
    pub fn dispose(&mut self) {
        for handle in self.schedule.all_handles() {
            self.identity_map.revert_pending(handle);
        }
        let dropped = self.schedule.len();
        self.schedule.clear();
        self.change_tracker.clear_all();
        tracing::debug!(dropped, "Unit of work disposed");
    }

    // ========================================================================
    // Mappers
    // ========================================================================

    /// Register the data mapper for `E`, replacing any earlier one.
    pub fn register_data_mapper<E, M>(&mut self, mapper: M) -> bool
    where
        E: Entity,
        M: DataMapper<E> + 'static,
    {
        tracing::debug!(entity = E::ENTITY_NAME, "Registering data mapper");
        self.mappers.register::<E, M>(mapper)
    }

    /// The data mapper registered for `E`.
    ///
    /// # Errors
    ///
    /// A configuration error if no mapper is registered.
    pub fn get_data_mapper<E: Entity>(&self) -> rowkeep_core::Result<Arc<dyn DataMapper<E>>> {
        self.mappers.resolve::<E>()
    }

    // ========================================================================
    // Commit
    // ========================================================================

    /// Persist every pending change in one store transaction.
    ///
    /// Managed entities that changed since their snapshot are scheduled for
    /// update first (unless `auto_detect_changes` is off). The schedule is
    /// empty afterwards whatever the outcome.
    ///
    /// # Errors
    ///
    /// The first store or mapper failure, after the transaction was rolled
    /// back and the diagnostic sink notified. Mapper failures are wrapped in
    /// `Error::Persistence`; a missing mapper is returned as the
    /// configuration error itself.
    ///
    /// After a failure, entities that were pending update or delete are
    /// `Managed` again with their old snapshot. Entities that were pending
    /// insert are no longer tracked, since the mapper may already have
    /// written a key the rolled back store never kept; schedule them again
    /// to retry.
    #[tracing::instrument(level = "info", skip(self))]
    pub fn commit(&mut self) -> rowkeep_core::Result<CommitReport> {
        let start = Instant::now();

        if self.config.auto_detect_changes {
            self.detect_changes();
        }

        if self.schedule.is_empty() {
            tracing::debug!("Nothing to commit");
            return Ok(CommitReport::default());
        }

        let plan = CommitPlan {
            inserts: self.schedule.handles(PersistOp::Insert),
            updates: self.schedule.handles(PersistOp::Update),
            deletes: self.schedule.handles(PersistOp::Delete),
        };
        self.schedule.clear();

        tracing::debug!(
            inserts = plan.inserts.len(),
            updates = plan.updates.len(),
            deletes = plan.deletes.len(),
            "Commit plan"
        );

        match self.execute(&plan) {
            Ok(()) => {
                self.finish(&plan);
                let report = CommitReport {
                    inserted: plan.inserts.len(),
                    updated: plan.updates.len(),
                    deleted: plan.deletes.len(),
                    elapsed: start.elapsed(),
                };
                tracing::info!(
                    inserted = report.inserted,
                    updated = report.updated,
                    deleted = report.deleted,
                    elapsed_ms = report.elapsed.as_secs_f64() * 1000.0,
                    "Commit complete"
                );
                Ok(report)
            }
            Err(e) => {
                self.revert(&plan);
                tracing::warn!(
                    error = %e,
                    elapsed_ms = start.elapsed().as_secs_f64() * 1000.0,
                    "Commit rolled back"
                );
                self.sink
                    .record(&format!("unit of work commit rolled back: {e}"));
                Err(e)
            }
        }
    }

    /// Schedule every dirty managed entity for update.
    fn detect_changes(&mut self) {
        let dirty = self.dirty_handles();
        for &handle in &dirty {
            self.schedule.schedule(handle, PersistOp::Update);
            self.identity_map.set_state(handle, EntityState::UpdatePending);
        }
        tracing::debug!(count = dirty.len(), "Auto-detected dirty entities");
    }

    /// Managed, unscheduled entities whose fields differ from their snapshot.
    ///
    /// Entities without a snapshot (e.g. after `dispose`) are skipped.
    fn dirty_handles(&self) -> Vec<EntityHandle> {
        self.identity_map
            .managed_handles()
            .into_iter()
            .filter(|handle| !self.schedule.is_scheduled(*handle))
            .filter(|handle| {
                let Some(object) = self.identity_map.object(*handle) else {
                    return false;
                };
                match self.change_tracker.check(*handle, &object.field_values()) {
                    DirtyCheck::Dirty(fields) => {
                        tracing::trace!(
                            entity = object.entity_name(),
                            handle = %handle,
                            fields = ?fields,
                            "Entity is dirty"
                        );
                        true
                    }
                    DirtyCheck::Clean | DirtyCheck::NoSnapshot => false,
                }
            })
            .collect()
    }

    /// Run the plan inside one store transaction.
    fn execute(&self, plan: &CommitPlan) -> rowkeep_core::Result<()> {
        self.store.begin_transaction()?;

        if let Err(e) = self.apply(plan) {
            self.rollback_quietly();
            return Err(e);
        }

        if let Err(e) = self.store.commit() {
            self.rollback_quietly();
            return Err(e);
        }
        Ok(())
    }

    fn apply(&self, plan: &CommitPlan) -> rowkeep_core::Result<()> {
        for (op, handles) in plan.phases() {
            for &handle in handles {
                let Some(object) = self.identity_map.object(handle) else {
                    continue;
                };
                tracing::trace!(entity = object.entity_name(), handle = %handle, op = %op, "Applying");
                self.mappers.apply(op, object).map_err(|e| {
                    if e.is_config() {
                        e
                    } else {
                        Error::persistence(op, object.entity_name(), e)
                    }
                })?;
            }
        }
        Ok(())
    }

    fn rollback_quietly(&self) {
        if let Err(e) = self.store.rollback() {
            tracing::debug!(error = %e, "Rollback after failed commit also failed");
        }
    }

    /// Apply identity-map effects of a committed plan.
    fn finish(&mut self, plan: &CommitPlan) {
        for &handle in &plan.inserts {
            match self.identity_map.promote(handle) {
                ManageOutcome::Registered => self.recapture(handle),
                ManageOutcome::Existing(_) | ManageOutcome::Rejected => {
                    self.change_tracker.clear(handle);
                }
            }
        }

        for &handle in &plan.updates {
            if self.identity_map.was_managed(handle) {
                self.identity_map.set_state(handle, EntityState::Managed);
                if self.config.refresh_snapshot_after_update {
                    self.recapture(handle);
                }
            } else {
                self.identity_map.detach(handle);
            }
        }

        for &handle in &plan.deletes {
            self.identity_map.mark_deleted(handle);
            self.change_tracker.clear(handle);
        }
    }

    /// Undo the identity-map effects of scheduling a rolled back plan.
    fn revert(&mut self, plan: &CommitPlan) {
        for &handle in &plan.inserts {
            self.identity_map.detach(handle);
            self.change_tracker.clear(handle);
        }
        for &handle in plan.updates.iter().chain(&plan.deletes) {
            self.identity_map.revert_pending(handle);
        }
        tracing::debug!(
            released = plan.inserts.len(),
            reverted = plan.updates.len() + plan.deletes.len(),
            "Reverted pending entities"
        );
    }

    fn recapture(&mut self, handle: EntityHandle) {
        let Some(object) = self.identity_map.object(handle) else {
            return;
        };
        let name = object.entity_name();
        let values = object.field_values();
        self.change_tracker.capture(handle, name, values);
    }

    // ========================================================================
    // Debug
    // ========================================================================

    /// Dump unit-of-work state for debugging.
    pub fn debug_state(&self) -> UnitOfWorkDebugInfo {
        UnitOfWorkDebugInfo {
            tracked: self.identity_map.len(),
            managed: self.identity_map.managed_count(),
            snapshots: self.change_tracker.len(),
            pending: self.schedule.counts(),
            mappers: self.mappers.len(),
        }
    }
}

impl<S: TransactionalStore> std::fmt::Debug for UnitOfWork<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UnitOfWork")
            .field("config", &self.config)
            .field("identity_map", &self.identity_map)
            .field("snapshots", &self.change_tracker.len())
            .field("pending", &self.schedule.counts())
            .field("mappers", &self.mappers)
            .finish_non_exhaustive()
    }
}
