//! Error types for the facetdb engine.

use facetdb_codec::Guid;
use thiserror::Error;

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in engine operations.
#[derive(Debug, Error)]
pub enum Error {
    /// The database handle has been closed.
    #[error("database is closed")]
    Closed,

    /// The backend is unreachable or misconfigured. Fatal to the call.
    #[error("backend not connected: {message}")]
    NotConnected {
        /// Description of the connection failure.
        message: String,
    },

    /// A backend statement failed after table creation was retried. The
    /// offending statement text is attached for diagnosis.
    #[error("query failed: {message} (statement: {statement})")]
    QueryFailed {
        /// Description of the backend failure.
        message: String,
        /// The statement that failed.
        statement: String,
    },

    /// Caller-supplied options or selectors are invalid.
    #[error("invalid parameters: {message}")]
    InvalidParameters {
        /// What was wrong with the arguments.
        message: String,
    },

    /// The named entity class has not been registered.
    #[error("entity class not registered: {class}")]
    ClassNotFound {
        /// The unregistered class name.
        class: String,
    },

    /// Stored entity data failed to decode.
    #[error("entity {guid} is corrupted: {message}")]
    Corrupted {
        /// Guid of the corrupted entity.
        guid: Guid,
        /// Description of the corruption.
        message: String,
    },

    /// A concurrent writer saved the entity after this handle loaded it.
    /// Recoverable: reload the entity and retry.
    #[error("write conflict on entity {guid}")]
    WriteConflict {
        /// Guid of the contested entity.
        guid: Guid,
    },

    /// A stored reference points at an entity that no longer exists.
    /// Recoverable: the pointer was valid when written.
    #[error("reference target {guid} no longer exists")]
    ReferenceBroken {
        /// Guid of the vanished target.
        guid: Guid,
    },

    /// Value serialization failed.
    #[error("codec error: {0}")]
    Codec(#[from] facetdb_codec::CodecError),
}

impl Error {
    /// Creates a not connected error.
    pub fn not_connected(message: impl Into<String>) -> Self {
        Self::NotConnected {
            message: message.into(),
        }
    }

    /// Creates a query failed error carrying the statement text.
    pub fn query_failed(message: impl Into<String>, statement: impl Into<String>) -> Self {
        Self::QueryFailed {
            message: message.into(),
            statement: statement.into(),
        }
    }

    /// Creates an invalid parameters error.
    pub fn invalid_parameters(message: impl Into<String>) -> Self {
        Self::InvalidParameters {
            message: message.into(),
        }
    }

    /// Creates a class not found error.
    pub fn class_not_found(class: impl Into<String>) -> Self {
        Self::ClassNotFound {
            class: class.into(),
        }
    }

    /// Creates a corrupted entity error.
    pub fn corrupted(guid: Guid, message: impl Into<String>) -> Self {
        Self::Corrupted {
            guid,
            message: message.into(),
        }
    }
}
