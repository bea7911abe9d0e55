//! Transactional store and data mapper contracts.
//!
//! These are the two external collaborators consumed by the unit of work:
//!
//! - [`TransactionalStore`] - begin, commit and roll back one transaction
//! - [`DataMapper`] - physical insert, update and delete for one entity type
//!
//! Mappers are expected to write through the same store the unit of work
//! controls, so that their statements land inside its transaction.

use crate::Result;
use crate::entity::Entity;
use std::sync::Arc;

/// A store that can group writes into one atomic transaction.
///
/// All methods may block on I/O. Any error is treated by the caller as fatal
/// to the current commit attempt.
pub trait TransactionalStore: Send + Sync {
    /// Open a transaction.
    fn begin_transaction(&self) -> Result<()>;

    /// Make every write since `begin_transaction` durable.
    fn commit(&self) -> Result<()>;

    /// Discard every write since `begin_transaction`.
    fn rollback(&self) -> Result<()>;
}

impl<S: TransactionalStore + ?Sized> TransactionalStore for Arc<S> {
    fn begin_transaction(&self) -> Result<()> {
        (**self).begin_transaction()
    }

    fn commit(&self) -> Result<()> {
        (**self).commit()
    }

    fn rollback(&self) -> Result<()> {
        (**self).rollback()
    }
}

/// Persists one entity type.
///
/// The unit of work calls each method at most once per scheduled entity per
/// commit. Implementations are not assumed to be idempotent.
pub trait DataMapper<E: Entity>: Send + Sync {
    /// Insert a new row and populate the entity's primary key.
    fn add(&self, entity: &mut E) -> Result<()>;

    /// Write the current field values against the existing key.
    fn update(&self, entity: &E) -> Result<()>;

    /// Remove the row for the entity's key.
    fn delete(&self, entity: &E) -> Result<()>;
}

impl<E: Entity, M: DataMapper<E> + ?Sized> DataMapper<E> for Arc<M> {
    fn add(&self, entity: &mut E) -> Result<()> {
        (**self).add(entity)
    }

    fn update(&self, entity: &E) -> Result<()> {
        (**self).update(entity)
    }

    fn delete(&self, entity: &E) -> Result<()> {
        (**self).delete(entity)
    }
}
