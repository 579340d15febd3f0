//! Error types for the object layer.

use thiserror::Error;

/// Result type for object layer operations.
pub type OdbResult<T> = Result<T, OdbError>;

/// Errors that can occur in the object layer.
///
/// Errors surface as returns and never corrupt the transaction: after any
/// failure the caller may still drop the transaction (abort) or attempt
/// another operation. Only [`crate::ObjectTransaction::commit`] guarantees
/// engine cleanup on failure.
#[derive(Debug, Error)]
pub enum OdbError {
    /// The read path met a table id with no registered table.
    #[error("unknown table id {table_id}")]
    UnknownTypeId {
        /// The table id found in the stored bytes.
        table_id: u32,
    },

    /// The type was never registered as a table.
    #[error("type {type_name} is not registered")]
    UnknownType {
        /// Name of the offending type.
        type_name: String,
    },

    /// A value that cannot be stored under its own object id was passed
    /// to a store operation (e.g. an indirection handle).
    #[error("type {type_name} cannot be stored directly")]
    InvalidStorage {
        /// Name of the offending type.
        type_name: String,
    },

    /// The stored singleton decoded to an object of a different table
    /// than the requested type.
    #[error("singleton {oid} does not match table {table_name}")]
    SingletonTypeMismatch {
        /// Object id of the singleton.
        oid: u64,
        /// Name of the requested table.
        table_name: String,
    },

    /// An object reached the commit path without transaction metadata.
    #[error("object has no metadata in this transaction")]
    MissingMetadata,

    /// Relation auto-registration is disabled by the owner.
    #[error("auto-registration forbidden for relation type {type_name}")]
    AutoRegistrationForbidden {
        /// Name of the relation type.
        type_name: String,
    },

    /// No relation constructor was declared for the type.
    #[error("type {type_name} does not have a valid relation shape")]
    RelationShapeInvalid {
        /// Name of the relation type.
        type_name: String,
    },

    /// Stored data is inconsistent with the registered schema.
    #[error("corrupted: {message}")]
    Corrupted {
        /// Description of the inconsistency.
        message: String,
    },

    /// The commit drain loop did not converge.
    #[error("commit drain did not converge; saver callbacks keep enqueueing objects")]
    CommitDrainOverflow,

    /// Operation not permitted in the transaction's current state.
    #[error("invalid operation: {message}")]
    InvalidOperation {
        /// Description of why the operation is invalid.
        message: String,
    },

    /// Key-value engine error.
    #[error("kv error: {0}")]
    Kv(#[from] odb_kv::KvError),

    /// Payload codec error.
    #[error("codec error: {0}")]
    Codec(#[from] odb_codec::CodecError),
}

impl OdbError {
    /// Creates an unknown-type error.
    pub fn unknown_type(type_name: impl Into<String>) -> Self {
        Self::UnknownType {
            type_name: type_name.into(),
        }
    }

    /// Creates a corrupted-data error.
    pub fn corrupted(message: impl Into<String>) -> Self {
        Self::Corrupted {
            message: message.into(),
        }
    }

    /// Creates an invalid-operation error.
    pub fn invalid_operation(message: impl Into<String>) -> Self {
        Self::InvalidOperation {
            message: message.into(),
        }
    }
}
