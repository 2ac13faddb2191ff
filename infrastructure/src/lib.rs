// Module declarations
pub mod connection;
pub mod persistence;
pub mod store;

// Re-export all implementations
pub use connection::{DocumentConnection, KvConnection, StaticConnection};
pub use persistence::{DocumentRepository, KvRepository, parse_id};
pub use store::{InMemoryDocumentStore, InMemoryKvStore};
