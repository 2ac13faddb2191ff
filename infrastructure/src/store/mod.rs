pub mod in_memory_document;
pub mod in_memory_kv;

// Re-export both store clients
pub use in_memory_document::InMemoryDocumentStore;
pub use in_memory_kv::InMemoryKvStore;
