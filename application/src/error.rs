use domain::DomainError;
use thiserror::Error;

/// Failures reported by a store client. These are never translated by the
/// repositories; they reach the caller unchanged inside `RepositoryError::Store`.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Store connection has not been opened")]
    NotConnected,
    #[error("Store connection has been closed")]
    Closed,
    #[error("Duplicate key in collection '{collection}': {id}")]
    DuplicateKey { collection: String, id: String },
    #[error("Invalid store configuration: {0}")]
    Config(#[from] ConfigError),
}

#[derive(Error, Debug)]
pub enum RepositoryError {
    #[error("Create failed in collection '{collection}' for id '{id}': transaction did not commit")]
    CreateFailed { collection: String, id: String },
    #[error("Update failed in collection '{collection}' for id '{id}': transaction did not commit")]
    UpdateFailed { collection: String, id: String },
    #[error("Delete failed in collection '{collection}' for id '{id}': transaction did not commit")]
    DeleteFailed { collection: String, id: String },
    #[error("Invalid identifier '{id}': {reason}")]
    InvalidIdentifier { id: String, reason: String },
    #[error("Entity in collection '{0}' does not serialize to an object")]
    NotAnObject(String),
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("Serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[derive(Error, Debug, PartialEq)]
pub enum ConfigError {
    #[error("Missing required setting '{0}'")]
    Missing(&'static str),
    #[error("Invalid value for '{field}': {reason}")]
    Invalid { field: &'static str, reason: String },
}
