//! Core types and traits for rowkeep.
//!
//! This crate provides the foundational abstractions shared by the session
//! layer and storage backends:
//!
//! - `Entity` trait describing a persisted domain type
//! - `FieldInfo` declared field metadata
//! - `Value` dynamic column values
//! - `TransactionalStore` and `DataMapper` collaborator contracts
//! - `Error` and `Result`

pub mod entity;
pub mod error;
pub mod field;
pub mod store;
pub mod value;

pub use entity::{AutoIncrement, Entity, assigned_key};
pub use error::{
    ConfigError, ConfigErrorKind, Error, PersistOp, PersistenceError, QueryError,
    QueryErrorKind, Result, TransactionError, TransactionErrorKind,
};
pub use field::{FieldInfo, find_field};
pub use store::{DataMapper, TransactionalStore};
pub use value::Value;
