//! Error types for the resource store.

use thiserror::Error;

use crate::resource::Kind;

/// Result type alias for state store operations.
pub type StateResult<T> = Result<T, StateError>;

/// Errors that can occur during state store operations.
#[derive(Debug, Error)]
pub enum StateError {
    #[error("failed to open database: {0}")]
    Open(String),

    #[error("transaction error: {0}")]
    Transaction(String),

    #[error("table error: {0}")]
    Table(String),

    #[error("read error: {0}")]
    Read(String),

    #[error("write error: {0}")]
    Write(String),

    #[error("serialization error: {0}")]
    Serialize(String),

    #[error("deserialization error: {0}")]
    Deserialize(String),

    #[error("{kind} {key} not found")]
    NotFound { kind: Kind, key: String },

    #[error("{kind} {key} already exists")]
    AlreadyExists { kind: Kind, key: String },

    #[error("{kind} {key} was modified: expected version {expected}, found {found}")]
    Conflict {
        kind: Kind,
        key: String,
        expected: u64,
        found: u64,
    },

    #[error("kind {0} is not registered with this store")]
    UnregisteredKind(Kind),

    #[error("invalid object key {0:?}: expected namespace/name")]
    InvalidKey(String),
}

impl StateError {
    /// The object was absent.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// A create lost to an existing object with the same key.
    pub fn is_already_exists(&self) -> bool {
        matches!(self, Self::AlreadyExists { .. })
    }

    /// An update carried a stale `resource_version`.
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }

    /// Errors that no amount of retrying will fix: the store was opened
    /// without the kind, or could not be opened at all.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::UnregisteredKind(_) | Self::Open(_))
    }
}
