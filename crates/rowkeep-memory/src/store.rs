//! In-memory transactional table store.
//!
//! Tables are created on first write. Each row is keyed by an `i64` id;
//! inserting a row whose key column is NULL assigns the next id, like an
//! auto-increment rowid.
//!
//! A transaction copies every table on begin. Rollback restores the copy and
//! commit discards it. Only one transaction may be open at a time.

use rowkeep_core::{
    Error, QueryErrorKind, Result, TransactionErrorKind, TransactionalStore, Value,
};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// One stored row: column name and value pairs.
pub type Row = Vec<(&'static str, Value)>;

#[derive(Debug, Clone, Default)]
struct Table {
    rows: BTreeMap<i64, Row>,
    next_id: i64,
}

impl Table {
    fn allocate_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }
}

/// Inner state of the store, protected by a mutex for thread safety.
#[derive(Debug, Default)]
struct StoreInner {
    tables: HashMap<String, Table>,
    /// Unique columns per table. Not part of transactional state.
    unique: HashMap<String, Vec<&'static str>>,
    /// Copy of `tables` taken at begin; `Some` while a transaction is open.
    backup: Option<HashMap<String, Table>>,
}

impl StoreInner {
    fn check_unique(&self, table: &str, id: i64, row: &Row) -> Result<()> {
        let (Some(columns), Some(existing)) = (self.unique.get(table), self.tables.get(table))
        else {
            return Ok(());
        };

        for column in columns {
            let Some(value) = column_value(row, column).filter(|v| !v.is_null()) else {
                continue;
            };
            let clash = existing
                .rows
                .iter()
                .any(|(other, r)| *other != id && column_value(r, column) == Some(value));
            if clash {
                return Err(Error::query(
                    QueryErrorKind::Constraint,
                    format!("UNIQUE constraint failed: {}.{}", table, column),
                ));
            }
        }
        Ok(())
    }
}

fn column_value<'a>(row: &'a Row, column: &str) -> Option<&'a Value> {
    row.iter()
        .find(|(name, _)| *name == column)
        .map(|(_, value)| value)
}

/// A cloneable handle to an in-memory set of tables.
///
/// Clones share the same tables and transaction state.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<StoreInner>>,
}

impl MemoryStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, StoreInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Declare a column whose non-NULL values must be unique in the table.
    pub fn define_unique(&self, table: &str, column: &'static str) {
        let mut inner = self.lock();
        let columns = inner.unique.entry(table.to_string()).or_default();
        if !columns.contains(&column) {
            columns.push(column);
        }
    }

    /// Insert a row.
    ///
    /// If `key_column` is missing from the row or NULL, the next id is
    /// assigned and written into it. Returns the row id.
    ///
    /// # Errors
    ///
    /// A constraint error if the id is taken or a unique column clashes.
    pub fn insert_row(&self, table: &str, key_column: &'static str, mut row: Row) -> Result<i64> {
        let mut inner = self.lock();

        let given = match column_value(&row, key_column) {
            None | Some(Value::Null) => None,
            Some(value) => Some(value.as_i64().ok_or_else(|| {
                Error::query(
                    QueryErrorKind::Database,
                    format!("{}.{} must be an integer, got {}", table, key_column, value),
                )
            })?),
        };

        let id = {
            let t = inner.tables.entry(table.to_string()).or_default();
            match given {
                Some(id) if t.rows.contains_key(&id) => {
                    return Err(Error::query(
                        QueryErrorKind::Constraint,
                        format!("UNIQUE constraint failed: {}.{}", table, key_column),
                    ));
                }
                Some(id) => {
                    t.next_id = t.next_id.max(id);
                    id
                }
                None => t.allocate_id(),
            }
        };

        match row.iter_mut().find(|(name, _)| *name == key_column) {
            Some((_, value)) => *value = Value::BigInt(id),
            None => row.push((key_column, Value::BigInt(id))),
        }

        inner.check_unique(table, id, &row)?;
        if let Some(t) = inner.tables.get_mut(table) {
            t.rows.insert(id, row);
        }
        tracing::trace!(table, id, "Inserted row");
        Ok(id)
    }

    /// Replace the row with the given id.
    ///
    /// # Errors
    ///
    /// `NotFound` if no such row exists, or a unique-column constraint error.
    pub fn update_row(&self, table: &str, id: i64, row: Row) -> Result<()> {
        let mut inner = self.lock();
        let exists = inner
            .tables
            .get(table)
            .is_some_and(|t| t.rows.contains_key(&id));
        if !exists {
            return Err(not_found(table, id));
        }

        inner.check_unique(table, id, &row)?;
        if let Some(t) = inner.tables.get_mut(table) {
            t.rows.insert(id, row);
        }
        tracing::trace!(table, id, "Updated row");
        Ok(())
    }

    /// Delete the row with the given id.
    ///
    /// # Errors
    ///
    /// `NotFound` if no such row exists.
    pub fn delete_row(&self, table: &str, id: i64) -> Result<()> {
        let mut inner = self.lock();
        let removed = inner
            .tables
            .get_mut(table)
            .and_then(|t| t.rows.remove(&id));
        if removed.is_none() {
            return Err(not_found(table, id));
        }
        tracing::trace!(table, id, "Deleted row");
        Ok(())
    }

    /// The row with the given id.
    pub fn get_row(&self, table: &str, id: i64) -> Option<Row> {
        self.lock().tables.get(table)?.rows.get(&id).cloned()
    }

    /// All rows of a table, ordered by id.
    pub fn rows(&self, table: &str) -> Vec<(i64, Row)> {
        self.lock().tables.get(table).map_or_else(Vec::new, |t| {
            t.rows.iter().map(|(id, row)| (*id, row.clone())).collect()
        })
    }

    /// Number of rows in a table.
    pub fn row_count(&self, table: &str) -> usize {
        self.lock().tables.get(table).map_or(0, |t| t.rows.len())
    }

    /// Names of all tables, sorted.
    pub fn table_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.lock().tables.keys().cloned().collect();
        names.sort();
        names
    }

    /// Whether a transaction is open.
    pub fn in_transaction(&self) -> bool {
        self.lock().backup.is_some()
    }
}

fn not_found(table: &str, id: i64) -> Error {
    Error::query(
        QueryErrorKind::NotFound,
        format!("no row with id {} in '{}'", id, table),
    )
}

impl TransactionalStore for MemoryStore {
    fn begin_transaction(&self) -> Result<()> {
        let mut inner = self.lock();
        if inner.backup.is_some() {
            return Err(Error::transaction(
                TransactionErrorKind::NestedNotSupported,
                "Already in a transaction",
            ));
        }
        inner.backup = Some(inner.tables.clone());
        tracing::debug!("BEGIN");
        Ok(())
    }

    fn commit(&self) -> Result<()> {
        let mut inner = self.lock();
        if inner.backup.take().is_none() {
            return Err(Error::transaction(
                TransactionErrorKind::NotActive,
                "Not in a transaction",
            ));
        }
        tracing::debug!("COMMIT");
        Ok(())
    }

    fn rollback(&self) -> Result<()> {
        let mut inner = self.lock();
        let Some(backup) = inner.backup.take() else {
            return Err(Error::transaction(
                TransactionErrorKind::NotActive,
                "Not in a transaction",
            ));
        };
        inner.tables = backup;
        tracing::debug!("ROLLBACK");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(name: &str, email: &str) -> Row {
        vec![
            ("id", Value::Null),
            ("name", Value::Text(name.to_string())),
            ("email", Value::Text(email.to_string())),
        ]
    }

    #[test]
    fn test_insert_assigns_ids() {
        let store = MemoryStore::new();
        let a = store.insert_row("users", "id", user("a", "a@x")).unwrap();
        let b = store.insert_row("users", "id", user("b", "b@x")).unwrap();

        assert_eq!((a, b), (1, 2));
        let row = store.get_row("users", 2).unwrap();
        assert_eq!(row[0], ("id", Value::BigInt(2)));
        assert_eq!(store.row_count("users"), 2);
        assert_eq!(store.table_names(), vec!["users".to_string()]);
    }

    #[test]
    fn test_explicit_id() {
        let store = MemoryStore::new();
        let mut row = user("a", "a@x");
        row[0].1 = Value::BigInt(10);

        assert_eq!(store.insert_row("users", "id", row.clone()).unwrap(), 10);
        let err = store.insert_row("users", "id", row).unwrap_err();
        assert!(err.is_constraint_violation());

        // Next generated id continues after the explicit one.
        assert_eq!(store.insert_row("users", "id", user("b", "b@x")).unwrap(), 11);
    }

    #[test]
    fn test_unique_column() {
        let store = MemoryStore::new();
        store.define_unique("users", "email");
        store.insert_row("users", "id", user("a", "same@x")).unwrap();

        let err = store
            .insert_row("users", "id", user("b", "same@x"))
            .unwrap_err();
        assert!(err.is_constraint_violation());
        assert!(err.to_string().contains("users.email"));
        assert_eq!(store.row_count("users"), 1);
    }

    #[test]
    fn test_update_keeps_own_unique_value() {
        let store = MemoryStore::new();
        store.define_unique("users", "email");
        let id = store.insert_row("users", "id", user("a", "a@x")).unwrap();
        let other = store.insert_row("users", "id", user("b", "b@x")).unwrap();

        let mut row = store.get_row("users", id).unwrap();
        row[1].1 = Value::Text("renamed".into());
        store.update_row("users", id, row).unwrap();

        let mut clash = store.get_row("users", other).unwrap();
        clash[2].1 = Value::Text("a@x".into());
        assert!(store.update_row("users", other, clash).is_err());
    }

    #[test]
    fn test_missing_rows_are_not_found() {
        let store = MemoryStore::new();
        let err = store.update_row("users", 1, user("a", "a@x")).unwrap_err();
        assert!(matches!(err, Error::Query(ref q) if q.kind == QueryErrorKind::NotFound));

        let err = store.delete_row("users", 1).unwrap_err();
        assert!(matches!(err, Error::Query(ref q) if q.kind == QueryErrorKind::NotFound));
    }

    #[test]
    fn test_rollback_restores_tables() {
        let store = MemoryStore::new();
        let kept = store.insert_row("users", "id", user("a", "a@x")).unwrap();

        store.begin_transaction().unwrap();
        assert!(store.in_transaction());
        store.insert_row("users", "id", user("b", "b@x")).unwrap();
        store.delete_row("users", kept).unwrap();
        store.rollback().unwrap();

        assert!(!store.in_transaction());
        assert_eq!(store.row_count("users"), 1);
        assert!(store.get_row("users", kept).is_some());
    }

    #[test]
    fn test_commit_keeps_writes() {
        let store = MemoryStore::new();
        store.begin_transaction().unwrap();
        store.insert_row("users", "id", user("a", "a@x")).unwrap();
        store.commit().unwrap();

        assert_eq!(store.row_count("users"), 1);
    }

    #[test]
    fn test_transaction_state_errors() {
        let store = MemoryStore::new();
        assert!(matches!(
            store.commit(),
            Err(Error::Transaction(ref t)) if t.kind == TransactionErrorKind::NotActive
        ));
        assert!(store.rollback().is_err());

        store.begin_transaction().unwrap();
        assert!(matches!(
            store.begin_transaction(),
            Err(Error::Transaction(ref t)) if t.kind == TransactionErrorKind::NestedNotSupported
        ));
    }

    #[test]
    fn test_clones_share_state() {
        let store = MemoryStore::new();
        let other = store.clone();
        store.insert_row("users", "id", user("a", "a@x")).unwrap();

        assert_eq!(other.row_count("users"), 1);
        assert_eq!(other.rows("users")[0].0, 1);
    }
}
