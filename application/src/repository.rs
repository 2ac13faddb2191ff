use crate::RepositoryError;
use async_trait::async_trait;

/// CRUD contract shared by the key-value and document repositories.
///
/// Lookups report a missing entity as `Ok(None)`, never as an error.
#[async_trait]
pub trait Repository<E>: Send + Sync
where
    E: Send + 'static,
{
    /// Input accepted by `update_one`.
    type Update: Send + 'static;
    /// What `update_one` reports back.
    type UpdateOutcome: Send + 'static;
    /// What `delete_one` reports back.
    type DeleteOutcome: Send + 'static;

    async fn get_all(&self) -> Result<Vec<E>, RepositoryError>;

    async fn get_by_id(&self, id: &str) -> Result<Option<E>, RepositoryError>;

    async fn create(&self, entity: E) -> Result<E, RepositoryError>;

    async fn update_one(
        &self,
        id: &str,
        update: Self::Update,
    ) -> Result<Self::UpdateOutcome, RepositoryError>;

    async fn delete_one(&self, id: &str) -> Result<Self::DeleteOutcome, RepositoryError>;

    /// Returns the number of entities removed.
    async fn delete_all(&self) -> Result<u64, RepositoryError>;
}
