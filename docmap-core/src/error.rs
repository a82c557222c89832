//! Error types and result types for mapper and store operations.
//!
//! Use [`DocmapResult<T>`] as the return type for fallible operations. Errors raised on
//! behalf of a schema (`DoesNotExist`, `MultipleObjectsExist`, `Query`) carry the schema
//! name so call sites can tell one model's failure from another's.

use bson::error::Error as BsonError;
use serde_json::Error as SerdeJsonError;
use thiserror::Error;

/// Represents all possible errors that can occur when mapping or storing documents.
#[derive(Error, Debug)]
pub enum DocmapError {
    /// Serialization/deserialization error when converting between document formats (BSON, JSON).
    #[error("Serialization error: {0}")]
    Serialization(String),
    /// A value could not be coerced into the canonical type of a field.
    #[error("Cannot serialize {value} as {kind} for field '{field}'")]
    InvalidValue {
        field: String,
        kind: &'static str,
        value: String,
    },
    /// An attribute or update key does not correspond to a registered field.
    #[error("Field '{field}' is not registered on model {model}")]
    UnknownField { model: String, field: String },
    /// A schema declaration is inconsistent.
    #[error("Invalid schema: {0}")]
    InvalidSchema(String),
    /// A projection mixes inclusion and exclusion.
    #[error("Invalid projection: {0}")]
    InvalidProjection(String),
    /// An update document is not a valid operator expression.
    #[error("Invalid update: {0}")]
    InvalidUpdate(String),
    /// `get` matched no document.
    #[error("{model} matching {filter} does not exist")]
    DoesNotExist { model: String, filter: String },
    /// `get` matched more than one document.
    #[error("Multiple {model} objects match {filter}")]
    MultipleObjectsExist { model: String, filter: String },
    /// The store rejected a filter, operator or hint issued on behalf of a model.
    #[error("Query error on {model}: {message}")]
    Query { model: String, message: String },
    /// The store rejected a filter, operator or hint. Backends raise this; the model layer
    /// re-scopes it into [`DocmapError::Query`].
    #[error("Invalid query: {0}")]
    InvalidQuery(String),
    /// A unique index would be violated.
    #[error("Duplicate key for index {index} in collection {collection}")]
    DuplicateKey { collection: String, index: String },
    /// Error during store initialization or connection setup.
    #[error("Initialization error: {0}")]
    Initialization(String),
    /// The requested collection does not exist in the store.
    #[error("Collection not found: {0}")]
    CollectionNotFound(String),
    /// The document has an invalid structure or lacks required state.
    #[error("Invalid document: {0}")]
    InvalidDocument(String),
    /// An error occurred in the underlying storage backend.
    #[error("Backend error: {0}")]
    Backend(String),
    /// An unknown error occurred.
    #[error("Unknown error: {0}")]
    Unknown(String),
}

impl DocmapError {
    /// Returns the schema name for model-scoped errors.
    pub fn model(&self) -> Option<&str> {
        match self {
            DocmapError::UnknownField { model, .. }
            | DocmapError::DoesNotExist { model, .. }
            | DocmapError::MultipleObjectsExist { model, .. }
            | DocmapError::Query { model, .. } => Some(model),
            _ => None,
        }
    }

    pub fn is_does_not_exist(&self, model: &str) -> bool {
        matches!(self, DocmapError::DoesNotExist { model: m, .. } if m == model)
    }

    pub fn is_multiple_objects_exist(&self, model: &str) -> bool {
        matches!(self, DocmapError::MultipleObjectsExist { model: m, .. } if m == model)
    }

    pub fn is_query_error(&self, model: &str) -> bool {
        matches!(self, DocmapError::Query { model: m, .. } if m == model)
    }

    /// Scopes a backend query rejection to the given model. Other errors pass through unchanged.
    pub(crate) fn scoped(self, model: &str) -> Self {
        match self {
            DocmapError::InvalidQuery(message) => DocmapError::Query {
                model: model.to_string(),
                message,
            },
            other => other,
        }
    }
}

/// A specialized `Result` type for mapper and store operations.
pub type DocmapResult<T> = Result<T, DocmapError>;

impl From<BsonError> for DocmapError {
    fn from(err: BsonError) -> Self {
        DocmapError::Serialization(err.to_string())
    }
}

impl From<SerdeJsonError> for DocmapError {
    fn from(err: SerdeJsonError) -> Self {
        DocmapError::Serialization(err.to_string())
    }
}
