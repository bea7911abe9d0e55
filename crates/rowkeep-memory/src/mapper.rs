//! Table-backed data mapper.

use crate::store::MemoryStore;
use rowkeep_core::{AutoIncrement, ConfigError, ConfigErrorKind, DataMapper, Error, Result};
use std::marker::PhantomData;

/// Persists `E` into the [`MemoryStore`] table named `E::ENTITY_NAME`.
///
/// The entity must have a single integer primary key. `add` lets the store
/// assign the id when the key is unset and writes it back with
/// [`AutoIncrement::set_id`].
pub struct TableMapper<E> {
    store: MemoryStore,
    _entity: PhantomData<fn() -> E>,
}

impl<E: AutoIncrement> TableMapper<E> {
    /// Create a mapper writing through `store`.
    ///
    /// Fields declared unique become unique columns of the table.
    pub fn new(store: MemoryStore) -> Self {
        for field in E::fields().iter().filter(|f| f.unique) {
            store.define_unique(E::ENTITY_NAME, field.name);
        }
        Self {
            store,
            _entity: PhantomData,
        }
    }

    /// The store this mapper writes to.
    pub fn store(&self) -> &MemoryStore {
        &self.store
    }

    fn key_column() -> Result<&'static str> {
        match E::PRIMARY_KEY {
            [column] => Ok(*column),
            other => Err(Error::Config(ConfigError {
                kind: ConfigErrorKind::Invalid,
                message: format!(
                    "'{}' needs exactly one primary key column, has {}",
                    E::ENTITY_NAME,
                    other.len()
                ),
            })),
        }
    }

    fn row_id(entity: &E) -> Result<i64> {
        let key = entity.primary_key_value();
        match key.first().and_then(|value| value.as_i64()) {
            Some(id) if key.len() == 1 => Ok(id),
            _ => Err(Error::Config(ConfigError {
                kind: ConfigErrorKind::Invalid,
                message: format!("'{}' has no integer primary key value", E::ENTITY_NAME),
            })),
        }
    }
}

impl<E: AutoIncrement> DataMapper<E> for TableMapper<E> {
    fn add(&self, entity: &mut E) -> Result<()> {
        let key_column = Self::key_column()?;
        let id = self
            .store
            .insert_row(E::ENTITY_NAME, key_column, entity.field_values())?;
        entity.set_id(id);
        Ok(())
    }

    fn update(&self, entity: &E) -> Result<()> {
        Self::key_column()?;
        let id = Self::row_id(entity)?;
        self.store
            .update_row(E::ENTITY_NAME, id, entity.field_values())
    }

    fn delete(&self, entity: &E) -> Result<()> {
        Self::key_column()?;
        let id = Self::row_id(entity)?;
        self.store.delete_row(E::ENTITY_NAME, id)
    }
}

impl<E> Clone for TableMapper<E> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            _entity: PhantomData,
        }
    }
}

impl<E> std::fmt::Debug for TableMapper<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TableMapper")
            .field("entity", &std::any::type_name::<E>())
            .finish_non_exhaustive()
    }
}
