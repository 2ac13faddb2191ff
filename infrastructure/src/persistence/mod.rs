pub mod document_repository;
pub mod kv_repository;

// Re-export both repository types
pub use document_repository::{DocumentRepository, parse_id};
pub use kv_repository::KvRepository;
