use crate::store::{InMemoryDocumentStore, InMemoryKvStore};
use application::{ConnectionProvider, DocumentStoreConfig, StoreError};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::sync::Arc;
use tracing::{debug, info, instrument};

#[derive(Debug)]
enum Slot<T> {
    Unopened,
    Open(Arc<T>),
    Closed,
}

impl<T> Slot<T> {
    fn handle(&self) -> Result<Arc<T>, StoreError> {
        match self {
            Slot::Unopened => Err(StoreError::NotConnected),
            Slot::Open(handle) => Ok(Arc::clone(handle)),
            Slot::Closed => Err(StoreError::Closed),
        }
    }
}

// --- Key-Value Connection ---

/// Owns the process-wide key-value store handle.
#[derive(Debug)]
pub struct KvConnection {
    slot: RwLock<Slot<InMemoryKvStore>>,
}

impl Default for KvConnection {
    fn default() -> Self {
        Self::new()
    }
}

impl KvConnection {
    pub fn new() -> Self {
        Self {
            slot: RwLock::new(Slot::Unopened),
        }
    }
}

#[async_trait]
impl ConnectionProvider for KvConnection {
    type Handle = InMemoryKvStore;

    #[instrument(skip(self))]
    async fn on_bootstrap(&self) -> Result<(), StoreError> {
        let mut slot = self.slot.write();
        if matches!(*slot, Slot::Open(_)) {
            debug!("Key-value store already open");
            return Ok(());
        }
        *slot = Slot::Open(Arc::new(InMemoryKvStore::new()));
        info!("Key-value store opened");
        Ok(())
    }

    /// Later `client()` calls fail with `Closed`; handles already handed out
    /// stay usable until their holders drop them.
    #[instrument(skip(self))]
    async fn on_close(&self) -> Result<(), StoreError> {
        let mut slot = self.slot.write();
        if let Slot::Open(store) = std::mem::replace(&mut *slot, Slot::Closed) {
            info!(
                outstanding = Arc::strong_count(&store) - 1,
                "Key-value store closed"
            );
        }
        Ok(())
    }

    fn client(&self) -> Result<Arc<InMemoryKvStore>, StoreError> {
        self.slot.read().handle()
    }
}

// --- Document Connection ---

/// Owns the process-wide document store handle, opened from explicit settings.
#[derive(Debug)]
pub struct DocumentConnection {
    config: DocumentStoreConfig,
    slot: RwLock<Slot<InMemoryDocumentStore>>,
}

impl DocumentConnection {
    pub fn new(config: DocumentStoreConfig) -> Self {
        Self {
            config,
            slot: RwLock::new(Slot::Unopened),
        }
    }
}

#[async_trait]
impl ConnectionProvider for DocumentConnection {
    type Handle = InMemoryDocumentStore;

    #[instrument(skip(self), fields(db = %self.config.database))]
    async fn on_bootstrap(&self) -> Result<(), StoreError> {
        self.config.validate()?;
        let mut slot = self.slot.write();
        if matches!(*slot, Slot::Open(_)) {
            debug!("Document store already open");
            return Ok(());
        }
        info!(uri = %self.config.redacted_connection_string(), "Opening document store connection");
        *slot = Slot::Open(Arc::new(InMemoryDocumentStore::new(
            self.config.database.clone(),
        )));
        Ok(())
    }

    #[instrument(skip(self), fields(db = %self.config.database))]
    async fn on_close(&self) -> Result<(), StoreError> {
        let mut slot = self.slot.write();
        if let Slot::Open(store) = std::mem::replace(&mut *slot, Slot::Closed) {
            info!(
                outstanding = Arc::strong_count(&store) - 1,
                "Document store closed"
            );
        }
        Ok(())
    }

    fn client(&self) -> Result<Arc<InMemoryDocumentStore>, StoreError> {
        self.slot.read().handle()
    }
}

// --- Externally Managed Connection ---

/// Wraps a handle whose lifecycle is owned elsewhere; the hooks are no-ops.
pub struct StaticConnection<H: ?Sized> {
    handle: Arc<H>,
}

impl<H: ?Sized> StaticConnection<H> {
    pub fn new(handle: Arc<H>) -> Self {
        Self { handle }
    }
}

#[async_trait]
impl<H> ConnectionProvider for StaticConnection<H>
where
    H: ?Sized + Send + Sync + 'static,
{
    type Handle = H;

    async fn on_bootstrap(&self) -> Result<(), StoreError> {
        Ok(())
    }

    async fn on_close(&self) -> Result<(), StoreError> {
        Ok(())
    }

    fn client(&self) -> Result<Arc<H>, StoreError> {
        Ok(Arc::clone(&self.handle))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use application::{AtomicOperation, AuthMechanism, DocumentStore, Filter, KvStore};
    use domain::KeyPath;
    use serde_json::json;

    #[tokio::test]
    async fn kv_connection_lifecycle() {
        let connection = KvConnection::new();
        assert!(matches!(connection.client(), Err(StoreError::NotConnected)));

        connection.on_bootstrap().await.unwrap();
        let store = connection.client().unwrap();
        store
            .commit(AtomicOperation::new().set(KeyPath::primary("users", "u1"), json!({})))
            .await
            .unwrap();

        // Bootstrapping twice keeps the same store.
        connection.on_bootstrap().await.unwrap();
        assert_eq!(connection.client().unwrap().len().await, 1);

        connection.on_close().await.unwrap();
        assert!(matches!(connection.client(), Err(StoreError::Closed)));

        // A handle taken before the close keeps working for its holder.
        let entry = store.get(&KeyPath::primary("users", "u1")).await.unwrap();
        assert!(entry.is_some());
        store
            .commit(AtomicOperation::new().delete(KeyPath::primary("users", "u1")))
            .await
            .unwrap();
        assert_eq!(store.len().await, 0);

        // Closing again is a no-op.
        connection.on_close().await.unwrap();
    }

    #[tokio::test]
    async fn document_connection_validates_config() {
        let connection = DocumentConnection::new(DocumentStoreConfig::new("", "app"));
        assert!(matches!(
            connection.on_bootstrap().await,
            Err(StoreError::Config(_))
        ));
        assert!(matches!(connection.client(), Err(StoreError::NotConnected)));
    }

    #[tokio::test]
    async fn document_connection_opens_named_database() {
        let config = DocumentStoreConfig::new("localhost:27017", "app")
            .with_credentials("svc", "secret")
            .with_auth_mechanism(AuthMechanism::ScramSha256);
        let connection = DocumentConnection::new(config);
        connection.on_bootstrap().await.unwrap();
        let store = connection.client().unwrap();
        assert_eq!(store.database(), "app");

        connection.on_close().await.unwrap();
        assert!(matches!(connection.client(), Err(StoreError::Closed)));
        assert!(store.find("profiles", &Filter::new()).await.unwrap().is_empty());
    }
}
