//! Error types for rowkeep operations.

use std::fmt;

/// The primary error type for all rowkeep operations.
#[derive(Debug)]
pub enum Error {
    /// Statement-level failures reported by the store
    Query(QueryError),
    /// Transaction begin/commit/rollback failures
    Transaction(TransactionError),
    /// Configuration errors (e.g. no data mapper for a type)
    Config(ConfigError),
    /// A data mapper call failed while applying a commit
    Persistence(PersistenceError),
    /// Custom error with message
    Custom(String),
}

#[derive(Debug)]
pub struct QueryError {
    pub kind: QueryErrorKind,
    pub message: String,
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryErrorKind {
    /// Constraint violation (unique, foreign key, etc.)
    Constraint,
    /// Target row or table not found
    NotFound,
    /// Other store error
    Database,
}

#[derive(Debug)]
pub struct TransactionError {
    pub kind: TransactionErrorKind,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionErrorKind {
    /// Begin failed
    Begin,
    /// Commit failed
    Commit,
    /// Rollback failed
    Rollback,
    /// Commit/rollback without an open transaction
    NotActive,
    /// Nested transaction not supported
    NestedNotSupported,
}

#[derive(Debug)]
pub struct ConfigError {
    pub kind: ConfigErrorKind,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigErrorKind {
    /// No data mapper registered for an entity type
    UnregisteredMapper,
    /// Other configuration problem
    Invalid,
}

/// A mapper call that failed during commit, with the entity it was applied to.
#[derive(Debug)]
pub struct PersistenceError {
    pub operation: PersistOp,
    pub entity: &'static str,
    pub source: Box<Error>,
}

/// The mapper operation being applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PersistOp {
    Insert,
    Update,
    Delete,
}

impl PersistOp {
    /// Lowercase name for logs and messages.
    pub const fn as_str(&self) -> &'static str {
        match self {
            PersistOp::Insert => "insert",
            PersistOp::Update => "update",
            PersistOp::Delete => "delete",
        }
    }
}

impl fmt::Display for PersistOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Error {
    /// Shorthand for a missing data mapper.
    pub fn unregistered_mapper(entity: &str) -> Self {
        Error::Config(ConfigError {
            kind: ConfigErrorKind::UnregisteredMapper,
            message: format!("no data mapper registered for entity type '{entity}'"),
        })
    }

    /// Shorthand for a transaction error.
    pub fn transaction(kind: TransactionErrorKind, message: impl Into<String>) -> Self {
        Error::Transaction(TransactionError {
            kind,
            message: message.into(),
        })
    }

    /// Shorthand for a query error without source.
    pub fn query(kind: QueryErrorKind, message: impl Into<String>) -> Self {
        Error::Query(QueryError {
            kind,
            message: message.into(),
            source: None,
        })
    }

    /// Wrap a mapper failure with the operation and entity it belongs to.
    pub fn persistence(operation: PersistOp, entity: &'static str, source: Error) -> Self {
        Error::Persistence(PersistenceError {
            operation,
            entity,
            source: Box::new(source),
        })
    }

    /// Is this a configuration error?
    pub fn is_config(&self) -> bool {
        match self {
            Error::Config(_) => true,
            Error::Persistence(p) => p.source.is_config(),
            _ => false,
        }
    }

    /// Is this (or does it wrap) a constraint violation?
    pub fn is_constraint_violation(&self) -> bool {
        match self {
            Error::Query(q) => q.kind == QueryErrorKind::Constraint,
            Error::Persistence(p) => p.source.is_constraint_violation(),
            _ => false,
        }
    }

    /// The innermost error, unwrapping persistence context.
    pub fn root(&self) -> &Error {
        match self {
            Error::Persistence(p) => p.source.root(),
            other => other,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Query(e) => write!(f, "Query error: {}", e.message),
            Error::Transaction(e) => write!(f, "Transaction error: {}", e.message),
            Error::Config(e) => write!(f, "Configuration error: {}", e.message),
            Error::Persistence(e) => write!(f, "Persistence error: {}", e),
            Error::Custom(msg) => write!(f, "{}", msg),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Query(e) => e
                .source
                .as_deref()
                .map(|err| err as &(dyn std::error::Error + 'static)),
            Error::Persistence(e) => Some(&*e.source as &(dyn std::error::Error + 'static)),
            _ => None,
        }
    }
}

impl fmt::Display for QueryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl fmt::Display for TransactionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl fmt::Display for PersistenceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} of '{}' failed: {}",
            self.operation, self.entity, self.source
        )
    }
}

impl From<QueryError> for Error {
    fn from(err: QueryError) -> Self {
        Error::Query(err)
    }
}

impl From<TransactionError> for Error {
    fn from(err: TransactionError) -> Self {
        Error::Transaction(err)
    }
}

impl From<ConfigError> for Error {
    fn from(err: ConfigError) -> Self {
        Error::Config(err)
    }
}

/// Result type alias for rowkeep operations.
pub type Result<T> = std::result::Result<T, Error>;
