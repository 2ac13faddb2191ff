use crate::StoreError;
use async_trait::async_trait;
use std::sync::Arc;

/// Process-scoped owner of a store connection.
///
/// `on_bootstrap` runs once before the repositories accept traffic and
/// `on_close` once after the last operation. Repositories only ever call `client`.
#[async_trait]
pub trait ConnectionProvider: Send + Sync {
    type Handle: ?Sized + Send + Sync;

    async fn on_bootstrap(&self) -> Result<(), StoreError>;

    async fn on_close(&self) -> Result<(), StoreError>;

    /// The live connection. Fails with `NotConnected` before bootstrap
    /// and with `Closed` after close.
    fn client(&self) -> Result<Arc<Self::Handle>, StoreError>;
}
