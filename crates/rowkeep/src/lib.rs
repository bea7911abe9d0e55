//! rowkeep - unit-of-work persistence for Rust domain models.
//!
//! rowkeep tracks live domain objects and writes their changes to a
//! transactional store in one atomic step:
//!
//! - An identity map keeps one in-memory instance per stored row
//! - Snapshots of declared fields detect mutation without any hooks
//! - Inserts, updates and deletes go through per-type data mappers inside a
//!   single store transaction, rolled back as a whole on failure
//!
//! # Quick Start
//!
//! ```ignore
//! use rowkeep::prelude::*;
//!
//! struct User {
//!     id: Option<i64>,
//!     name: String,
//! }
//!
//! // impl Entity for User { ... }
//! // impl AutoIncrement for User { ... }
//!
//! let store = MemoryStore::new();
//! let mut uow = UnitOfWork::new(store.clone());
//! uow.register_data_mapper::<User, _>(TableMapper::<User>::new(store));
//!
//! let user = EntityRef::new(User { id: None, name: "a".into() });
//! uow.schedule_for_insert(&user)?;
//! let report = uow.commit()?;
//!
//! assert_eq!(report.inserted, 1);
//! assert!(uow.is_managed(&user));
//!
//! // Mutations are picked up on the next commit
//! user.write().name = "b".into();
//! assert_eq!(uow.commit()?.updated, 1);
//! ```

pub use rowkeep_core::{
    AutoIncrement, ConfigError, ConfigErrorKind, DataMapper, Entity, Error, FieldInfo, PersistOp,
    PersistenceError, QueryError, QueryErrorKind, Result, TransactionError, TransactionErrorKind,
    TransactionalStore, Value, assigned_key, find_field,
};

pub use rowkeep_session::{
    ChangeTracker, CommitReport, DataMapperRegistry, DiagnosticSink, DirtyCheck, EntityHandle,
    EntityReadGuard, EntityRef, EntityState, EntityWriteGuard, IdentityMap, ManageOutcome,
    MemorySink, ObjectKey, OperationSchedule, PendingCounts, SchedulePolicy, Snapshot,
    Trackable, TracingSink, UnitOfWork, UnitOfWorkConfig, UnitOfWorkDebugInfo, UowError,
};

pub use rowkeep_memory::{MemoryStore, Row, TableMapper};

/// Commonly used types.
pub mod prelude {
    // Core
    pub use crate::{
        AutoIncrement, DataMapper, Entity, Error, FieldInfo, Result, TransactionalStore, Value,
    };

    // Session
    pub use crate::{
        CommitReport, DiagnosticSink, EntityRef, EntityState, MemorySink, SchedulePolicy, Trackable,
        UnitOfWork, UnitOfWorkConfig, UowError,
    };

    // Memory backend
    pub use crate::{MemoryStore, TableMapper};
}
