// Store ports, the shared repository contract, configuration and errors.
pub mod config;
pub mod connection;
pub mod document;
pub mod error;
pub mod kv;
pub mod repository;

pub use bson::oid::ObjectId;
pub use config::{AuthMechanism, DocumentStoreConfig, RepositoryConfig};
pub use connection::ConnectionProvider;
pub use document::{DocumentStore, Fields, Filter, Patch, StoredDocument, UpdateOutcome};
pub use error::{ConfigError, RepositoryError, StoreError};
pub use kv::{
    AtomicOperation, Check, CommitResult, KvEntry, KvStore, ListSelector, Mutation, Versionstamp,
};
pub use repository::Repository;
