//! Error types and result types for object-document mapping operations.
//!
//! Every fallible operation in this crate returns [`OdmResult<T>`]. Schema and criteria
//! problems are reported before any store call is made; errors coming from the
//! underlying store are wrapped in [`OdmError::Backend`] and otherwise left untouched.

use bson::{Document, error::Error as BsonError};
use serde_json::Error as SerdeJsonError;
use thiserror::Error;

/// Represents all possible errors raised by the mapping layer.
#[derive(Error, Debug)]
pub enum OdmError {
    /// Serialization/deserialization error when converting between BSON, JSON and Rust types.
    #[error("Serialization error: {0}")]
    Serialization(String),
    /// Error during connection setup.
    #[error("Initialization error: {0}")]
    Initialization(String),
    /// No entity matched the criteria of an `*_or_fail` lookup or a read-back.
    #[error("Entity {entity} not found (criteria: {criteria}, options: {options})")]
    NotFound {
        /// Name of the entity that was searched.
        entity: String,
        /// Criteria used for the lookup.
        criteria: Document,
        /// Search options used for the lookup.
        options: Document,
    },
    /// The connection configured for an entity was never registered.
    #[error("Cannot find connection '{connection}' for entity {entity}")]
    ConnectionNotFound {
        /// Name of the entity whose connection was resolved.
        entity: String,
        /// The configured connection name.
        connection: String,
    },
    /// The entity schema is inconsistent (duplicate aliases, invalid relations).
    #[error("Invalid schema: {0}")]
    InvalidSchema(String),
    /// The criteria could not be translated into a filter.
    #[error("Invalid criteria: {0}")]
    InvalidCriteria(String),
    /// An error occurred in the underlying document store.
    #[error("Backend error: {0}")]
    Backend(String),
}

/// A specialized `Result` type for mapping operations.
pub type OdmResult<T> = Result<T, OdmError>;

impl OdmError {
    /// Builds a [`OdmError::NotFound`] for the given entity, criteria and options.
    pub fn not_found(entity: impl Into<String>, criteria: Document, options: Document) -> Self {
        OdmError::NotFound {
            entity: entity.into(),
            criteria,
            options,
        }
    }
}

impl From<BsonError> for OdmError {
    fn from(err: BsonError) -> Self {
        OdmError::Serialization(err.to_string())
    }
}

impl From<SerdeJsonError> for OdmError {
    fn from(err: SerdeJsonError) -> Self {
        OdmError::Serialization(err.to_string())
    }
}
