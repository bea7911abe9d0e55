//! Unit of Work for rowkeep.
//!
//! `rowkeep-session` is the **unit-of-work layer**. It coordinates object
//! identity, change tracking, and transactional persistence of live domain
//! objects through per-type data mappers.
//!
//! # Role In The Architecture
//!
//! - **Identity map**: ensures a single in-memory instance per primary key.
//! - **Change tracking**: snapshots declared fields and detects mutation
//!   without the entity reporting it.
//! - **Operation schedule**: pending insert, update and delete per entity.
//! - **Transactional safety**: applies the schedule inside one store
//!   transaction and rolls back on any failure.
//!
//! # Design Philosophy
//!
//! - **Explicit handles**: every [`EntityRef`] carries an [`EntityHandle`];
//!   bookkeeping is keyed by handle, never by memory address.
//! - **Declared fields**: dirty checks compare `Entity::field_values`, so
//!   undeclared state (caches, derived data) never takes part.
//! - **Observable failure**: `commit` returns a typed result after rolling back.
//!
//! # Example
//!
//! ```ignore
//! let mut uow = UnitOfWork::new(store.clone());
//! uow.register_data_mapper::<User, _>(TableMapper::<User>::new(store));
//!
//! let user = EntityRef::new(User { id: None, name: "a".into() });
//! uow.schedule_for_insert(&user)?;
//! let report = uow.commit()?;
//!
//! assert_eq!(report.inserted, 1);
//! assert!(uow.is_managed(&user));
//! ```

pub mod change_tracker;
pub mod diagnostics;
pub mod identity_map;
pub mod registry;
pub mod schedule;
pub mod unit_of_work;

pub use change_tracker::{ChangeTracker, DirtyCheck, Snapshot};
pub use diagnostics::{DiagnosticSink, MemorySink, TracingSink};
pub use identity_map::{IdentityMap, ManageOutcome};
pub use registry::DataMapperRegistry;
pub use schedule::{OperationSchedule, PendingCounts};
pub use unit_of_work::{CommitReport, UnitOfWork, UnitOfWorkDebugInfo, UowError};

use rowkeep_core::{Entity, PersistOp, Value, assigned_key};
use std::any::{Any, TypeId};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard, Weak};

// ============================================================================
// Unit of Work Configuration
// ============================================================================

/// How a schedule call treats an entity that already has a pending operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SchedulePolicy {
    /// The latest schedule call replaces the pending operation.
    #[default]
    LastWriteWins,
    /// Scheduling a different operation fails with `UowError::AlreadyScheduled`.
    Reject,
}

/// Configuration for Unit of Work behavior.
#[derive(Debug, Clone)]
pub struct UnitOfWorkConfig {
    /// Conflict handling for overlapping schedule calls.
    pub schedule_policy: SchedulePolicy,
    /// Whether commit schedules dirty managed entities for update.
    pub auto_detect_changes: bool,
    /// Whether a successful update re-captures the entity's snapshot.
    pub refresh_snapshot_after_update: bool,
}

impl Default for UnitOfWorkConfig {
    fn default() -> Self {
        Self {
            schedule_policy: SchedulePolicy::LastWriteWins,
            auto_detect_changes: true,
            refresh_snapshot_after_update: false,
        }
    }
}

impl UnitOfWorkConfig {
    /// Create the default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the schedule conflict policy (builder pattern).
    #[must_use]
    pub fn schedule_policy(mut self, policy: SchedulePolicy) -> Self {
        self.schedule_policy = policy;
        self
    }

    /// Enable or disable automatic dirty detection on commit (builder pattern).
    #[must_use]
    pub fn auto_detect_changes(mut self, value: bool) -> Self {
        self.auto_detect_changes = value;
        self
    }

    /// Enable or disable snapshot refresh after update (builder pattern).
    #[must_use]
    pub fn refresh_snapshot_after_update(mut self, value: bool) -> Self {
        self.refresh_snapshot_after_update = value;
        self
    }
}

// ============================================================================
// Entity Handles and References
// ============================================================================

static NEXT_HANDLE: AtomicU64 = AtomicU64::new(1);

/// Process-unique tracking handle of an [`EntityRef`].
///
/// Issued once when the reference is created and shared by all its clones.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntityHandle(u64);

impl EntityHandle {
    fn next() -> Self {
        Self(NEXT_HANDLE.fetch_add(1, Ordering::Relaxed))
    }

    /// Raw handle number.
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for EntityHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A guard for reading an entity.
pub type EntityReadGuard<'a, E> = RwLockReadGuard<'a, E>;

/// A guard for writing to an entity.
pub type EntityWriteGuard<'a, E> = RwLockWriteGuard<'a, E>;

/// Shared reference to an application-owned entity.
///
/// Clones point at the same entity and carry the same handle, so a mutation
/// made through one clone is what the unit of work sees at commit.
pub struct EntityRef<E> {
    handle: EntityHandle,
    inner: Arc<RwLock<E>>,
}

impl<E: Entity> EntityRef<E> {
    /// Wrap an entity and issue it a fresh handle.
    pub fn new(entity: E) -> Self {
        Self {
            handle: EntityHandle::next(),
            inner: Arc::new(RwLock::new(entity)),
        }
    }

    /// The tracking handle.
    #[must_use]
    pub fn handle(&self) -> EntityHandle {
        self.handle
    }

    /// Lock the entity for reading.
    pub fn read(&self) -> EntityReadGuard<'_, E> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// Lock the entity for writing.
    pub fn write(&self) -> EntityWriteGuard<'_, E> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Whether both references point at the same entity.
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl<E> Clone for EntityRef<E> {
    fn clone(&self) -> Self {
        Self {
            handle: self.handle,
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<E: fmt::Debug> fmt::Debug for EntityRef<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut s = f.debug_struct("EntityRef");
        s.field("handle", &self.handle);
        match self.inner.try_read() {
            Ok(guard) => s.field("entity", &*guard),
            Err(_) => s.field("entity", &"<locked>"),
        };
        s.finish()
    }
}

/// Type-erased view of an [`EntityRef`], used to track heterogeneous
/// entity types in one unit of work.
pub trait Trackable: Send + Sync {
    /// The tracking handle.
    fn handle(&self) -> EntityHandle;
    /// `TypeId` of the entity type.
    fn entity_type(&self) -> TypeId;
    /// `Entity::ENTITY_NAME` of the entity type.
    fn entity_name(&self) -> &'static str;
    /// Primary key, or `None` while it is unset.
    fn assigned_key(&self) -> Option<Vec<Value>>;
    /// Current values of the declared fields.
    fn field_values(&self) -> Vec<(&'static str, Value)>;
    /// Downcast support.
    fn as_any(&self) -> &dyn Any;
    /// Clone into a new box (the clone shares the entity).
    fn boxed_clone(&self) -> Box<dyn Trackable>;
    /// Weak reference to the entity, alive while any clone is.
    fn downgrade(&self) -> Weak<dyn Any + Send + Sync>;
}

impl<E: Entity> Trackable for EntityRef<E> {
    fn handle(&self) -> EntityHandle {
        self.handle
    }

    fn entity_type(&self) -> TypeId {
        TypeId::of::<E>()
    }

    fn entity_name(&self) -> &'static str {
        E::ENTITY_NAME
    }

    fn assigned_key(&self) -> Option<Vec<Value>> {
        assigned_key(&*self.read())
    }

    fn field_values(&self) -> Vec<(&'static str, Value)> {
        self.read().field_values()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn boxed_clone(&self) -> Box<dyn Trackable> {
        Box::new(self.clone())
    }

    fn downgrade(&self) -> Weak<dyn Any + Send + Sync> {
        let weak: Weak<RwLock<E>> = Arc::downgrade(&self.inner);
        weak
    }
}

// ============================================================================
// Object Key and State
// ============================================================================

/// Identity-map key: entity type plus a hash of the primary key value(s).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObjectKey {
    /// Type identifier for the entity type.
    type_id: TypeId,
    /// Hash of the primary key value(s).
    pk_hash: u64,
}

impl ObjectKey {
    /// Create an object key from a type id and primary key.
    pub fn new(type_id: TypeId, pk: &[Value]) -> Self {
        Self {
            type_id,
            pk_hash: hash_values(pk),
        }
    }

    /// Create an object key from entity type and primary key.
    pub fn from_pk<E: Entity>(pk: &[Value]) -> Self {
        Self::new(TypeId::of::<E>(), pk)
    }

    /// Get the primary key hash.
    pub fn pk_hash(&self) -> u64 {
        self.pk_hash
    }

    /// Get the type identifier.
    pub fn type_id(&self) -> TypeId {
        self.type_id
    }
}

/// Hash a slice of values for use as a primary key hash.
fn hash_values(values: &[Value]) -> u64 {
    use std::collections::hash_map::DefaultHasher;
    let mut hasher = DefaultHasher::new();
    values.len().hash(&mut hasher);
    for v in values {
        hash_value(v, &mut hasher);
    }
    hasher.finish()
}

/// Hash a single value into the hasher.
fn hash_value(v: &Value, hasher: &mut impl Hasher) {
    match v {
        Value::Null => 0u8.hash(hasher),
        Value::Bool(b) => {
            1u8.hash(hasher);
            b.hash(hasher);
        }
        Value::TinyInt(i) => {
            2u8.hash(hasher);
            i.hash(hasher);
        }
        Value::SmallInt(i) => {
            3u8.hash(hasher);
            i.hash(hasher);
        }
        Value::Int(i) => {
            4u8.hash(hasher);
            i.hash(hasher);
        }
        Value::BigInt(i) => {
            5u8.hash(hasher);
            i.hash(hasher);
        }
        Value::Float(f) => {
            6u8.hash(hasher);
            f.to_bits().hash(hasher);
        }
        Value::Double(f) => {
            7u8.hash(hasher);
            f.to_bits().hash(hasher);
        }
        Value::Decimal(s) => {
            8u8.hash(hasher);
            s.hash(hasher);
        }
        Value::Text(s) => {
            9u8.hash(hasher);
            s.hash(hasher);
        }
        Value::Bytes(b) => {
            10u8.hash(hasher);
            b.hash(hasher);
        }
        Value::Timestamp(ts) => {
            11u8.hash(hasher);
            ts.hash(hasher);
        }
        Value::Uuid(u) => {
            12u8.hash(hasher);
            u.hash(hasher);
        }
        Value::Json(j) => {
            13u8.hash(hasher);
            j.to_string().hash(hasher);
        }
        Value::Array(arr) => {
            14u8.hash(hasher);
            arr.len().hash(hasher);
            for item in arr {
                hash_value(item, hasher);
            }
        }
    }
}

/// Lifecycle state of a tracked entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub enum EntityState {
    /// Not tracked (initial, and again after detach).
    Unmanaged,
    /// Tracked under its identity with a snapshot, nothing pending.
    Managed,
    /// Scheduled for insert.
    InsertPending,
    /// Scheduled for update.
    UpdatePending,
    /// Scheduled for delete.
    DeletePending,
    /// Deleted by a committed transaction. Terminal.
    Deleted,
}

impl EntityState {
    /// Whether an operation is scheduled for the entity.
    #[must_use]
    pub const fn is_pending(self) -> bool {
        matches!(
            self,
            EntityState::InsertPending | EntityState::UpdatePending | EntityState::DeletePending
        )
    }

    /// The pending state matching a scheduled operation.
    #[must_use]
    pub const fn pending_for(op: PersistOp) -> Self {
        match op {
            PersistOp::Insert => EntityState::InsertPending,
            PersistOp::Update => EntityState::UpdatePending,
            PersistOp::Delete => EntityState::DeletePending,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rowkeep_core::FieldInfo;

    struct Note {
        id: Option<i64>,
        body: String,
    }

    impl Entity for Note {
        const ENTITY_NAME: &'static str = "notes";
        const PRIMARY_KEY: &'static [&'static str] = &["id"];

        fn fields() -> &'static [FieldInfo] {
            static FIELDS: &[FieldInfo] = &[
                FieldInfo::new("id").primary_key(true),
                FieldInfo::new("body"),
            ];
            FIELDS
        }

        fn field_values(&self) -> Vec<(&'static str, Value)> {
            vec![("id", self.id.into()), ("body", self.body.as_str().into())]
        }

        fn primary_key_value(&self) -> Vec<Value> {
            vec![self.id.into()]
        }

        fn is_new(&self) -> bool {
            self.id.is_none()
        }
    }

    #[test]
    fn handles_are_unique_and_shared_by_clones() {
        let a = EntityRef::new(Note {
            id: None,
            body: "a".into(),
        });
        let b = EntityRef::new(Note {
            id: None,
            body: "b".into(),
        });
        let a2 = a.clone();

        assert_ne!(a.handle(), b.handle());
        assert_eq!(a.handle(), a2.handle());
        assert!(a.ptr_eq(&a2));
        assert!(!a.ptr_eq(&b));
    }

    #[test]
    fn writes_are_visible_through_clones() {
        let a = EntityRef::new(Note {
            id: Some(1),
            body: "draft".into(),
        });
        let a2 = a.clone();
        a.write().body = "final".into();

        assert_eq!(a2.read().body, "final");
        assert_eq!(
            Trackable::field_values(&a2)[1],
            ("body", Value::Text("final".into()))
        );
    }

    #[test]
    fn trackable_reports_key_only_when_assigned() {
        let fresh = EntityRef::new(Note {
            id: None,
            body: String::new(),
        });
        assert_eq!(Trackable::assigned_key(&fresh), None);

        fresh.write().id = Some(9);
        assert_eq!(
            Trackable::assigned_key(&fresh),
            Some(vec![Value::BigInt(9)])
        );
        assert_eq!(fresh.entity_name(), "notes");
    }

    #[test]
    fn object_key_separates_types_and_values() {
        let pk1 = vec![Value::BigInt(1), Value::Text("a".to_string())];
        let pk2 = vec![Value::BigInt(1), Value::Text("a".to_string())];
        let pk3 = vec![Value::BigInt(1), Value::Text("b".to_string())];

        assert_eq!(ObjectKey::from_pk::<Note>(&pk1), ObjectKey::from_pk::<Note>(&pk2));
        assert_ne!(ObjectKey::from_pk::<Note>(&pk1), ObjectKey::from_pk::<Note>(&pk3));
        assert_ne!(
            ObjectKey::from_pk::<Note>(&pk1),
            ObjectKey::new(TypeId::of::<String>(), &pk1)
        );
    }

    #[test]
    fn config_builder() {
        let config = UnitOfWorkConfig::new()
            .schedule_policy(SchedulePolicy::Reject)
            .auto_detect_changes(false)
            .refresh_snapshot_after_update(true);

        assert_eq!(config.schedule_policy, SchedulePolicy::Reject);
        assert!(!config.auto_detect_changes);
        assert!(config.refresh_snapshot_after_update);

        let default = UnitOfWorkConfig::default();
        assert_eq!(default.schedule_policy, SchedulePolicy::LastWriteWins);
        assert!(default.auto_detect_changes);
    }

    #[test]
    fn pending_states() {
        assert!(EntityState::pending_for(PersistOp::Delete).is_pending());
        assert!(!EntityState::Managed.is_pending());
        assert!(!EntityState::Deleted.is_pending());
    }
}
