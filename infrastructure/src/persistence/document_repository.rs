use application::{
    ConnectionProvider, DocumentStore, Fields, Filter, ObjectId, Patch, Repository,
    RepositoryError, StoredDocument, UpdateOutcome,
};
use async_trait::async_trait;
use domain::DocumentEntity;
use serde_json::Value;
use std::marker::PhantomData;
use std::sync::Arc;
use tracing::{debug, info, instrument};

/// Document-collection repository exposing store-generated `ObjectId`s as hex strings.
pub struct DocumentRepository<E, P> {
    provider: Arc<P>,
    collection: String,
    _entity: PhantomData<fn() -> E>,
}

/// Parses the string form handed out by the repository back into an `ObjectId`.
pub fn parse_id(id: &str) -> Result<ObjectId, RepositoryError> {
    ObjectId::parse_str(id).map_err(|e| RepositoryError::InvalidIdentifier {
        id: id.to_string(),
        reason: e.to_string(),
    })
}

impl<E, P> DocumentRepository<E, P>
where
    E: DocumentEntity,
    P: ConnectionProvider + 'static,
    P::Handle: DocumentStore,
{
    pub fn new(provider: Arc<P>, collection: impl Into<String>) -> Self {
        Self {
            provider,
            collection: collection.into(),
            _entity: PhantomData,
        }
    }

    fn to_entity(&self, document: StoredDocument) -> Result<E, RepositoryError> {
        let mut fields = document.fields;
        fields.insert(E::ID_FIELD.to_string(), Value::String(document.id.to_hex()));
        Ok(serde_json::from_value(Value::Object(fields))?)
    }

    fn to_fields(&self, entity: &E) -> Result<Fields, RepositoryError> {
        match serde_json::to_value(entity)? {
            Value::Object(mut fields) => {
                fields.remove(E::ID_FIELD);
                Ok(fields)
            }
            _ => Err(RepositoryError::NotAnObject(self.collection.clone())),
        }
    }

    /// Every document matching `filter`, materialized.
    #[instrument(skip(self, filter), fields(collection = %self.collection))]
    pub async fn find_all(&self, filter: &Filter) -> Result<Vec<E>, RepositoryError> {
        let store = self.provider.client()?;
        let documents = store.find(&self.collection, filter).await?;
        debug!(count = documents.len(), "Fetched documents");
        documents
            .into_iter()
            .map(|document| self.to_entity(document))
            .collect()
    }

    /// First document matching `filter`.
    #[instrument(skip(self, filter), fields(collection = %self.collection))]
    pub async fn get_one(&self, filter: &Filter) -> Result<Option<E>, RepositoryError> {
        let store = self.provider.client()?;
        store
            .find_one(&self.collection, filter)
            .await?
            .map(|document| self.to_entity(document))
            .transpose()
    }
}

#[async_trait]
impl<E, P> Repository<E> for DocumentRepository<E, P>
where
    E: DocumentEntity,
    P: ConnectionProvider + 'static,
    P::Handle: DocumentStore,
{
    type Update = Patch;
    type UpdateOutcome = UpdateOutcome;
    type DeleteOutcome = u64;

    #[instrument(skip(self), fields(collection = %self.collection))]
    async fn get_all(&self) -> Result<Vec<E>, RepositoryError> {
        self.find_all(&Filter::new()).await
    }

    #[instrument(skip(self), fields(collection = %self.collection))]
    async fn get_by_id(&self, id: &str) -> Result<Option<E>, RepositoryError> {
        let filter = Filter::by_id(parse_id(id)?);
        self.get_one(&filter).await
    }

    #[instrument(skip(self, entity), fields(collection = %self.collection))]
    async fn create(&self, mut entity: E) -> Result<E, RepositoryError> {
        let id = ObjectId::new();
        entity.set_id(id.to_hex());
        let fields = self.to_fields(&entity)?;

        let store = self.provider.client()?;
        store
            .insert_one(&self.collection, StoredDocument { id, fields })
            .await?;
        info!(id = %id, "Document created");
        Ok(entity)
    }

    #[instrument(skip(self, patch), fields(collection = %self.collection))]
    async fn update_one(&self, id: &str, patch: Patch) -> Result<UpdateOutcome, RepositoryError> {
        let filter = Filter::by_id(parse_id(id)?);
        let mut fields = patch.into_fields();
        // The identifier is immutable.
        fields.remove(E::ID_FIELD);

        let store = self.provider.client()?;
        let outcome = store.update_one(&self.collection, &filter, fields).await?;
        if outcome.matched_count == 0 {
            debug!(id, "Update matched no document");
        } else {
            info!(id, modified = outcome.modified_count, "Document updated");
        }
        Ok(outcome)
    }

    #[instrument(skip(self), fields(collection = %self.collection))]
    async fn delete_one(&self, id: &str) -> Result<u64, RepositoryError> {
        let filter = Filter::by_id(parse_id(id)?);
        let store = self.provider.client()?;
        let deleted = store.delete_one(&self.collection, &filter).await?;
        debug!(id, deleted, "Delete finished");
        Ok(deleted)
    }

    #[instrument(skip(self), fields(collection = %self.collection))]
    async fn delete_all(&self) -> Result<u64, RepositoryError> {
        let store = self.provider.client()?;
        let deleted = store.delete_many(&self.collection, &Filter::new()).await?;
        info!(deleted, "Collection cleared");
        Ok(deleted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::DocumentConnection;
    use application::{DocumentStoreConfig, StoreError};
    use serde::{Deserialize, Serialize};

    #[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
    struct Profile {
        #[serde(default)]
        id: String,
        name: String,
        city: String,
        age: u32,
    }

    impl DocumentEntity for Profile {
        fn id(&self) -> &str {
            &self.id
        }

        fn set_id(&mut self, id: String) {
            self.id = id;
        }
    }

    fn profile(name: &str, city: &str, age: u32) -> Profile {
        Profile {
            id: String::new(),
            name: name.to_string(),
            city: city.to_string(),
            age,
        }
    }

    async fn profiles() -> DocumentRepository<Profile, DocumentConnection> {
        let connection = Arc::new(DocumentConnection::new(DocumentStoreConfig::new(
            "localhost:27017",
            "app",
        )));
        connection.on_bootstrap().await.unwrap();
        DocumentRepository::new(connection, "profiles")
    }

    #[tokio::test]
    async fn identifier_round_trip() {
        let repo = profiles().await;
        let input = profile("Ada", "London", 36);

        let created = repo.create(input.clone()).await.unwrap();
        assert_eq!(created.id.len(), 24);
        let native = parse_id(&created.id).unwrap();
        assert_eq!(native.to_hex(), created.id);

        let fetched = repo.get_by_id(&created.id).await.unwrap().unwrap();
        assert_eq!(fetched, Profile { id: created.id.clone(), ..input });
    }

    #[tokio::test]
    async fn create_always_generates_a_fresh_id() {
        let repo = profiles().await;
        let first = repo.create(profile("Ada", "London", 36)).await.unwrap();
        // An id supplied by the caller is replaced.
        let second = repo.create(first.clone()).await.unwrap();
        assert_ne!(first.id, second.id);
        assert_eq!(repo.get_all().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn malformed_ids_are_rejected() {
        let repo = profiles().await;
        for bad in ["", "u1", "zzzzzzzzzzzzzzzzzzzzzzzz"] {
            assert!(matches!(
                repo.get_by_id(bad).await,
                Err(RepositoryError::InvalidIdentifier { .. })
            ));
        }
        assert!(matches!(
            repo.update_one("nope", Patch::new().set("age", 1)).await,
            Err(RepositoryError::InvalidIdentifier { .. })
        ));
        assert!(matches!(
            repo.delete_one("nope").await,
            Err(RepositoryError::InvalidIdentifier { .. })
        ));
    }

    #[tokio::test]
    async fn get_by_id_of_unknown_document_is_absent() {
        let repo = profiles().await;
        let unknown = ObjectId::new().to_hex();
        assert_eq!(repo.get_by_id(&unknown).await.unwrap(), None);
    }

    #[tokio::test]
    async fn partial_update_touches_only_patched_fields() {
        let repo = profiles().await;
        let created = repo.create(profile("Ada", "London", 36)).await.unwrap();

        let outcome = repo
            .update_one(&created.id, Patch::new().set("city", "Paris"))
            .await
            .unwrap();
        assert_eq!(
            outcome,
            UpdateOutcome {
                matched_count: 1,
                modified_count: 1
            }
        );

        let fetched = repo.get_by_id(&created.id).await.unwrap().unwrap();
        assert_eq!(fetched.city, "Paris");
        assert_eq!(fetched.name, "Ada");
        assert_eq!(fetched.age, 36);
    }

    #[tokio::test]
    async fn update_ignores_id_in_patch_and_reports_misses() {
        let repo = profiles().await;
        let created = repo.create(profile("Ada", "London", 36)).await.unwrap();

        let other = ObjectId::new().to_hex();
        let outcome = repo
            .update_one(&created.id, Patch::new().set("id", other.clone()).set("age", 37))
            .await
            .unwrap();
        assert_eq!(outcome.matched_count, 1);
        let fetched = repo.get_by_id(&created.id).await.unwrap().unwrap();
        assert_eq!(fetched.id, created.id);
        assert_eq!(fetched.age, 37);

        let missed = repo
            .update_one(&other, Patch::new().set("age", 1))
            .await
            .unwrap();
        assert_eq!(missed.matched_count, 0);
        assert_eq!(missed.modified_count, 0);
    }

    #[tokio::test]
    async fn filters_and_get_one() {
        let repo = profiles().await;
        repo.create(profile("Ada", "London", 36)).await.unwrap();
        repo.create(profile("Grace", "New York", 45)).await.unwrap();
        repo.create(profile("Alan", "London", 41)).await.unwrap();

        let londoners = repo
            .find_all(&Filter::new().eq("city", "London"))
            .await
            .unwrap();
        assert_eq!(londoners.len(), 2);
        assert!(londoners.iter().all(|p| p.id.len() == 24));

        let grace = repo
            .get_one(&Filter::new().eq("name", "Grace"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(grace.age, 45);
        assert_eq!(
            repo.get_one(&Filter::new().eq("name", "Linus")).await.unwrap(),
            None
        );
    }

    #[tokio::test]
    async fn delete_counts_and_idempotent_delete_all() {
        let repo = profiles().await;
        let ada = repo.create(profile("Ada", "London", 36)).await.unwrap();
        repo.create(profile("Grace", "New York", 45)).await.unwrap();
        repo.create(profile("Alan", "London", 41)).await.unwrap();

        assert_eq!(repo.delete_one(&ada.id).await.unwrap(), 1);
        assert_eq!(repo.delete_one(&ada.id).await.unwrap(), 0);
        assert_eq!(repo.get_by_id(&ada.id).await.unwrap(), None);

        assert_eq!(repo.delete_all().await.unwrap(), 2);
        assert_eq!(repo.delete_all().await.unwrap(), 0);
        assert!(repo.get_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn store_errors_propagate_unchanged() {
        let connection = Arc::new(DocumentConnection::new(DocumentStoreConfig::new(
            "localhost", "app",
        )));
        let repo: DocumentRepository<Profile, _> =
            DocumentRepository::new(Arc::clone(&connection), "profiles");
        assert!(matches!(
            repo.get_all().await,
            Err(RepositoryError::Store(StoreError::NotConnected))
        ));

        connection.on_bootstrap().await.unwrap();
        connection.on_close().await.unwrap();
        assert!(matches!(
            repo.create(profile("Ada", "London", 36)).await,
            Err(RepositoryError::Store(StoreError::Closed))
        ));
    }
}
