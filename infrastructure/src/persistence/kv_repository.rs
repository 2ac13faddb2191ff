//! Key-value repository with atomic secondary-index maintenance.
//!
//! Every write builds one `AtomicOperation` covering the primary key and all of
//! the entity's secondary keys:
//!
//! ```text
//! create(e)          check [c, id] absent, check new secondary keys absent
//!                    set [c, id] = e, set every secondary key = e
//! update_one(id, e)  check [c, id] at the versionstamp read
//!                    check newly introduced secondary keys absent
//!                    set [c, id] = merged, set every current secondary key = merged
//!                    delete secondary keys only the previous value had
//! delete_one(id)     check [c, id] at the versionstamp read
//!                    delete [c, id] and every secondary key of the stored value
//! ```
//!
//! A failed check means nothing was written; it surfaces as `CreateFailed`,
//! `UpdateFailed` or `DeleteFailed`. Retrying is left to the caller.

use application::{
    AtomicOperation, ConfigError, ConnectionProvider, KvEntry, KvStore, ListSelector, Repository,
    RepositoryConfig, RepositoryError,
};
use async_trait::async_trait;
use domain::{DomainError, IndexedEntity, KeyPart, KeyPath, SecondaryKeys};
use futures::stream::{self, BoxStream, StreamExt, TryStreamExt};
use serde_json::Value;
use std::collections::BTreeSet;
use std::marker::PhantomData;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

pub struct KvRepository<E, P> {
    provider: Arc<P>,
    collection: String,
    config: RepositoryConfig,
    _entity: PhantomData<fn() -> E>,
}

impl<E, P> KvRepository<E, P>
where
    E: IndexedEntity,
    P: ConnectionProvider + 'static,
    P::Handle: KvStore,
{
    pub fn new(provider: Arc<P>, collection: impl Into<String>) -> Self {
        Self {
            provider,
            collection: collection.into(),
            config: RepositoryConfig::default(),
            _entity: PhantomData,
        }
    }

    pub fn with_config(mut self, config: RepositoryConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        self.config = config;
        Ok(self)
    }

    fn primary_key(&self, id: &str) -> KeyPath {
        KeyPath::primary(&self.collection, id)
    }

    fn prefix(&self) -> KeyPath {
        KeyPath::new(vec![KeyPart::from(self.collection.as_str())])
    }

    /// Secondary keys of `entity`, rejecting paths that would shadow a primary key.
    fn secondary_keys(&self, entity: &E) -> Result<SecondaryKeys, RepositoryError> {
        let keys = entity.secondary_keys(&self.collection);
        let prefix = self.prefix();
        for (name, path) in &keys {
            if path.is_empty() {
                return Err(DomainError::InvalidKey(format!(
                    "Secondary key '{}' is empty",
                    name
                ))
                .into());
            }
            if path.len() == 2 && path.starts_with(&prefix) {
                return Err(DomainError::InvalidKey(format!(
                    "Secondary key '{}' {} collides with the primary key space of '{}'",
                    name, path, self.collection
                ))
                .into());
            }
        }
        Ok(keys)
    }

    /// Lazily streams every entity in the collection, in key order.
    ///
    /// The store is paged through `list_page_size` keys at a time; secondary
    /// entries sharing the collection prefix are skipped.
    pub fn entries(&self) -> BoxStream<'static, Result<E, RepositoryError>> {
        let cursor = PageCursor {
            provider: Arc::clone(&self.provider),
            collection: self.collection.clone(),
            prefix: self.prefix(),
            start_after: None,
            page_size: self.config.list_page_size,
            exhausted: false,
        };
        stream::try_unfold(cursor, next_page::<E, P>)
            .map_ok(stream::iter)
            .try_flatten()
            .boxed()
    }

    /// Reads the entity stored at an arbitrary key, typically a secondary key.
    #[instrument(skip(self), fields(collection = %self.collection, key = %key))]
    pub async fn find_by_key(&self, key: &KeyPath) -> Result<Option<E>, RepositoryError> {
        let store = self.provider.client()?;
        match store.get(key).await? {
            Some(entry) => Ok(Some(serde_json::from_value(entry.value)?)),
            None => Ok(None),
        }
    }

    /// Looks up `[collection, field, value]`.
    pub async fn find_by_index(
        &self,
        field: &str,
        value: impl Into<KeyPart>,
    ) -> Result<Option<E>, RepositoryError> {
        let key = KeyPath::secondary(&self.collection, field, value);
        self.find_by_key(&key).await
    }
}

struct PageCursor<P> {
    provider: Arc<P>,
    collection: String,
    prefix: KeyPath,
    start_after: Option<KeyPath>,
    page_size: usize,
    exhausted: bool,
}

type Page<E> = Vec<Result<E, RepositoryError>>;

async fn next_page<E, P>(
    mut cursor: PageCursor<P>,
) -> Result<Option<(Page<E>, PageCursor<P>)>, RepositoryError>
where
    E: IndexedEntity,
    P: ConnectionProvider + 'static,
    P::Handle: KvStore,
{
    if cursor.exhausted {
        return Ok(None);
    }
    let store = cursor.provider.client()?;
    let selector = ListSelector::prefix(cursor.prefix.clone())
        .start_after(cursor.start_after.take())
        .limit(cursor.page_size);
    let entries = store.list(selector).await?;
    debug!(collection = %cursor.collection, count = entries.len(), "Fetched page");

    cursor.exhausted = entries.len() < cursor.page_size;
    cursor.start_after = entries.last().map(|entry| entry.key.clone());
    let page = entries
        .into_iter()
        .filter_map(|entry| decode_primary::<E>(&cursor.collection, entry).transpose())
        .collect();
    Ok(Some((page, cursor)))
}

/// Decodes `entry` if it is stored under its entity's primary key.
fn decode_primary<E: IndexedEntity>(
    collection: &str,
    entry: KvEntry,
) -> Result<Option<E>, RepositoryError> {
    if entry.key.len() != 2 {
        return Ok(None);
    }
    let entity: E = serde_json::from_value(entry.value)?;
    if entry.key == KeyPath::primary(collection, entity.id()) {
        Ok(Some(entity))
    } else {
        Ok(None)
    }
}

/// Overlays the top-level fields of `update` onto `existing`.
fn merge(collection: &str, existing: Value, update: Value) -> Result<Value, RepositoryError> {
    match (existing, update) {
        (Value::Object(mut base), Value::Object(overlay)) => {
            base.extend(overlay);
            Ok(Value::Object(base))
        }
        _ => Err(RepositoryError::NotAnObject(collection.to_string())),
    }
}

#[async_trait]
impl<E, P> Repository<E> for KvRepository<E, P>
where
    E: IndexedEntity,
    P: ConnectionProvider + 'static,
    P::Handle: KvStore,
{
    type Update = E;
    type UpdateOutcome = E;
    type DeleteOutcome = ();

    #[instrument(skip(self), fields(collection = %self.collection))]
    async fn get_all(&self) -> Result<Vec<E>, RepositoryError> {
        let entities: Vec<E> = self.entries().try_collect().await?;
        debug!(count = entities.len(), "Collected all entities");
        Ok(entities)
    }

    #[instrument(skip(self), fields(collection = %self.collection))]
    async fn get_by_id(&self, id: &str) -> Result<Option<E>, RepositoryError> {
        if id.is_empty() {
            return Ok(None);
        }
        let store = self.provider.client()?;
        match store.get(&self.primary_key(id)).await? {
            Some(entry) => Ok(Some(serde_json::from_value(entry.value)?)),
            None => Ok(None),
        }
    }

    #[instrument(skip(self, entity), fields(collection = %self.collection, id = %entity.id()))]
    async fn create(&self, entity: E) -> Result<E, RepositoryError> {
        if entity.id().is_empty() {
            return Err(DomainError::InvalidKey("Entity id cannot be empty".to_string()).into());
        }
        let value = serde_json::to_value(&entity)?;
        let primary = self.primary_key(entity.id());
        let secondary = self.secondary_keys(&entity)?;

        let mut operation = AtomicOperation::new()
            .check(primary.clone(), None)
            .set(primary, value.clone());
        for key in secondary.into_values() {
            operation = operation.check(key.clone(), None).set(key, value.clone());
        }

        let store = self.provider.client()?;
        if !store.commit(operation).await?.is_committed() {
            warn!("Create did not commit: id or a secondary key is already taken");
            return Err(RepositoryError::CreateFailed {
                collection: self.collection.clone(),
                id: entity.id().to_string(),
            });
        }
        info!("Entity created");
        Ok(entity)
    }

    #[instrument(skip(self, entity), fields(collection = %self.collection))]
    async fn update_one(&self, id: &str, entity: E) -> Result<E, RepositoryError> {
        if id.is_empty() {
            return Err(DomainError::InvalidKey("Entity id cannot be empty".to_string()).into());
        }
        let store = self.provider.client()?;
        let primary = self.primary_key(id);
        let update = serde_json::to_value(&entity)?;

        let (merged_value, previous_keys, versionstamp) = match store.get(&primary).await? {
            Some(existing) => {
                let previous: E = serde_json::from_value(existing.value.clone())?;
                let merged = merge(&self.collection, existing.value, update)?;
                (merged, self.secondary_keys(&previous)?, Some(existing.versionstamp))
            }
            None => {
                debug!("No stored entity; update inserts");
                (update, SecondaryKeys::new(), None)
            }
        };

        let merged: E = serde_json::from_value(merged_value.clone())?;
        if merged.id() != id {
            return Err(DomainError::IdMismatch {
                expected: id.to_string(),
                found: merged.id().to_string(),
            }
            .into());
        }
        let current_keys = self.secondary_keys(&merged)?;

        let previous: BTreeSet<&KeyPath> = previous_keys.values().collect();
        let current: BTreeSet<&KeyPath> = current_keys.values().collect();

        let mut operation = AtomicOperation::new()
            .check(primary.clone(), versionstamp)
            .set(primary, merged_value.clone());
        for key in &current {
            if !previous.contains(key) {
                operation = operation.check((*key).clone(), None);
            }
            operation = operation.set((*key).clone(), merged_value.clone());
        }
        let stale: Vec<&KeyPath> = previous.difference(&current).copied().collect();
        for key in &stale {
            operation = operation.delete((*key).clone());
        }

        if !store.commit(operation).await?.is_committed() {
            warn!(id, "Update did not commit: entity changed concurrently or a secondary key is taken");
            return Err(RepositoryError::UpdateFailed {
                collection: self.collection.clone(),
                id: id.to_string(),
            });
        }
        info!(id, stale_keys = stale.len(), "Entity updated");
        Ok(merged)
    }

    #[instrument(skip(self), fields(collection = %self.collection))]
    async fn delete_one(&self, id: &str) -> Result<(), RepositoryError> {
        if id.is_empty() {
            return Ok(());
        }
        let store = self.provider.client()?;
        let primary = self.primary_key(id);
        let Some(entry) = store.get(&primary).await? else {
            debug!(id, "Nothing to delete");
            return Ok(());
        };

        let stored: E = serde_json::from_value(entry.value)?;
        let mut operation = AtomicOperation::new()
            .check(primary.clone(), Some(entry.versionstamp))
            .delete(primary);
        for key in self.secondary_keys(&stored)?.into_values() {
            operation = operation.delete(key);
        }

        if !store.commit(operation).await?.is_committed() {
            warn!(id, "Delete did not commit: entity changed concurrently");
            return Err(RepositoryError::DeleteFailed {
                collection: self.collection.clone(),
                id: id.to_string(),
            });
        }
        info!(id, "Entity deleted");
        Ok(())
    }

    /// Deletes page by page; each page is one transaction covering its
    /// entities' primary and secondary keys. Pages committed before a
    /// failing page stay deleted.
    #[instrument(skip(self), fields(collection = %self.collection))]
    async fn delete_all(&self) -> Result<u64, RepositoryError> {
        let store = self.provider.client()?;
        let page_size = self.config.delete_page_size;
        let mut cursor: Option<KeyPath> = None;
        let mut removed = 0u64;

        loop {
            let selector = ListSelector::prefix(self.prefix())
                .start_after(cursor.take())
                .limit(page_size);
            let entries = store.list(selector).await?;
            let exhausted = entries.len() < page_size;
            cursor = entries.last().map(|entry| entry.key.clone());

            let mut operation = AtomicOperation::new();
            let mut page_ids = Vec::new();
            for entry in entries {
                let key = entry.key.clone();
                let versionstamp = entry.versionstamp;
                let Some(entity) = decode_primary::<E>(&self.collection, entry)? else {
                    continue;
                };
                operation = operation.check(key.clone(), Some(versionstamp)).delete(key);
                for secondary in self.secondary_keys(&entity)?.into_values() {
                    operation = operation.delete(secondary);
                }
                page_ids.push(entity.id().to_string());
            }

            if !operation.is_empty() {
                if !store.commit(operation).await?.is_committed() {
                    warn!(removed, "Delete page did not commit: entities changed concurrently");
                    return Err(RepositoryError::DeleteFailed {
                        collection: self.collection.clone(),
                        id: page_ids.join(","),
                    });
                }
                removed += page_ids.len() as u64;
                debug!(page = page_ids.len(), removed, "Deleted page");
            }

            if exhausted {
                break;
            }
        }

        info!(removed, "Collection cleared");
        Ok(removed)
    }
}
