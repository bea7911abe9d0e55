//! In-memory backend for rowkeep.
//!
//! `rowkeep-memory` provides a [`MemoryStore`] of named tables with
//! single-level transactions, and a [`TableMapper`] that persists an entity
//! type into the table named after it.
//!
//! It is the reference backend used by tests and demos: every write made
//! through a mapper lands inside the transaction the unit of work opened on
//! the same store.
//!
//! # Example
//!
//! ```ignore
//! let store = MemoryStore::new();
//! store.define_unique("users", "email");
//!
//! let mut uow = UnitOfWork::new(store.clone());
//! uow.register_data_mapper::<User, _>(TableMapper::<User>::new(store.clone()));
//! ```

pub mod mapper;
pub mod store;

pub use mapper::TableMapper;
pub use store::{MemoryStore, Row};
