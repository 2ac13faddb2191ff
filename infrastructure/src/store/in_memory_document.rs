use application::{
    DocumentStore, Fields, Filter, ObjectId, StoreError, StoredDocument, UpdateOutcome,
};
use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::BTreeMap;
use tracing::{debug, instrument};

/// Document store keeping each collection as an id-ordered map.
///
/// Every operation runs under the collection's shard lock, which makes single
/// document writes atomic. Results come back in identifier order.
#[derive(Debug, Default)]
pub struct InMemoryDocumentStore {
    database: String,
    // Collection Name -> (ObjectId -> Fields)
    collections: DashMap<String, BTreeMap<ObjectId, Fields>>,
}

impl InMemoryDocumentStore {
    pub fn new(database: impl Into<String>) -> Self {
        Self {
            database: database.into(),
            collections: DashMap::new(),
        }
    }

    pub fn database(&self) -> &str {
        &self.database
    }
}

fn first_match(documents: &BTreeMap<ObjectId, Fields>, filter: &Filter) -> Option<ObjectId> {
    if let Some(id) = filter.id() {
        return documents
            .get(id)
            .filter(|fields| filter.matches(id, fields))
            .map(|_| *id);
    }
    documents
        .iter()
        .find(|(id, fields)| filter.matches(id, fields))
        .map(|(id, _)| *id)
}

#[async_trait]
impl DocumentStore for InMemoryDocumentStore {
    #[instrument(skip(self, filter), fields(db = %self.database))]
    async fn find(
        &self,
        collection: &str,
        filter: &Filter,
    ) -> Result<Vec<StoredDocument>, StoreError> {
        let Some(documents) = self.collections.get(collection) else {
            return Ok(Vec::new()); // Collection doesn't exist
        };
        let found: Vec<StoredDocument> = documents
            .iter()
            .filter(|(id, fields)| filter.matches(id, fields))
            .map(|(id, fields)| StoredDocument {
                id: *id,
                fields: fields.clone(),
            })
            .collect();
        debug!(count = found.len(), "Found documents");
        Ok(found)
    }

    #[instrument(skip(self, filter), fields(db = %self.database))]
    async fn find_one(
        &self,
        collection: &str,
        filter: &Filter,
    ) -> Result<Option<StoredDocument>, StoreError> {
        let Some(documents) = self.collections.get(collection) else {
            return Ok(None);
        };
        Ok(first_match(&documents, filter).and_then(|id| {
            documents.get(&id).map(|fields| StoredDocument {
                id,
                fields: fields.clone(),
            })
        }))
    }

    #[instrument(skip(self, document), fields(db = %self.database, id = %document.id))]
    async fn insert_one(
        &self,
        collection: &str,
        document: StoredDocument,
    ) -> Result<(), StoreError> {
        let mut documents = self.collections.entry(collection.to_string()).or_default();
        if documents.contains_key(&document.id) {
            return Err(StoreError::DuplicateKey {
                collection: collection.to_string(),
                id: document.id.to_hex(),
            });
        }
        documents.insert(document.id, document.fields);
        Ok(())
    }

    #[instrument(skip(self, filter, fields), fields(db = %self.database))]
    async fn update_one(
        &self,
        collection: &str,
        filter: &Filter,
        fields: Fields,
    ) -> Result<UpdateOutcome, StoreError> {
        let Some(mut documents) = self.collections.get_mut(collection) else {
            return Ok(UpdateOutcome::default());
        };
        let Some(id) = first_match(&documents, filter) else {
            return Ok(UpdateOutcome::default());
        };
        let Some(current) = documents.get_mut(&id) else {
            return Ok(UpdateOutcome::default());
        };

        let mut modified = false;
        for (name, value) in fields {
            if current.get(&name) != Some(&value) {
                current.insert(name, value);
                modified = true;
            }
        }
        Ok(UpdateOutcome {
            matched_count: 1,
            modified_count: u64::from(modified),
        })
    }

    #[instrument(skip(self, filter), fields(db = %self.database))]
    async fn delete_one(&self, collection: &str, filter: &Filter) -> Result<u64, StoreError> {
        let Some(mut documents) = self.collections.get_mut(collection) else {
            return Ok(0);
        };
        match first_match(&documents, filter) {
            Some(id) => Ok(u64::from(documents.remove(&id).is_some())),
            None => Ok(0),
        }
    }

    #[instrument(skip(self, filter), fields(db = %self.database, unfiltered = filter.is_empty()))]
    async fn delete_many(&self, collection: &str, filter: &Filter) -> Result<u64, StoreError> {
        let Some(mut documents) = self.collections.get_mut(collection) else {
            return Ok(0);
        };
        let before = documents.len();
        documents.retain(|id, fields| !filter.matches(id, fields));
        let removed = (before - documents.len()) as u64;
        debug!(removed, "Deleted documents");
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{Value, json};

    fn fields(value: Value) -> Fields {
        value.as_object().cloned().unwrap()
    }

    async fn insert(store: &InMemoryDocumentStore, value: Value) -> ObjectId {
        let id = ObjectId::new();
        store
            .insert_one("profiles", StoredDocument { id, fields: fields(value) })
            .await
            .unwrap();
        id
    }

    #[tokio::test]
    async fn insert_rejects_duplicate_ids() {
        let store = InMemoryDocumentStore::new("app");
        let id = insert(&store, json!({ "name": "Ada" })).await;
        let duplicate = store
            .insert_one(
                "profiles",
                StoredDocument {
                    id,
                    fields: fields(json!({ "name": "Copy" })),
                },
            )
            .await;
        assert!(matches!(duplicate, Err(StoreError::DuplicateKey { .. })));
    }

    #[tokio::test]
    async fn find_filters_and_keeps_collections_apart() {
        let store = InMemoryDocumentStore::new("app");
        insert(&store, json!({ "name": "Ada", "team": "core" })).await;
        insert(&store, json!({ "name": "Grace", "team": "core" })).await;
        insert(&store, json!({ "name": "Linus", "team": "kernel" })).await;

        let core = store
            .find("profiles", &Filter::new().eq("team", "core"))
            .await
            .unwrap();
        assert_eq!(core.len(), 2);
        assert!(store.find("other", &Filter::new()).await.unwrap().is_empty());

        let linus = store
            .find_one("profiles", &Filter::new().eq("name", "Linus"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(linus.fields.get("team"), Some(&json!("kernel")));
    }

    #[tokio::test]
    async fn update_reports_matched_and_modified() {
        let store = InMemoryDocumentStore::new("app");
        let id = insert(&store, json!({ "name": "Ada", "age": 36 })).await;

        let changed = store
            .update_one("profiles", &Filter::by_id(id), fields(json!({ "age": 37 })))
            .await
            .unwrap();
        assert_eq!(
            changed,
            UpdateOutcome {
                matched_count: 1,
                modified_count: 1
            }
        );

        let same = store
            .update_one("profiles", &Filter::by_id(id), fields(json!({ "age": 37 })))
            .await
            .unwrap();
        assert_eq!(same.matched_count, 1);
        assert_eq!(same.modified_count, 0);

        let missing = store
            .update_one("profiles", &Filter::by_id(ObjectId::new()), Fields::new())
            .await
            .unwrap();
        assert_eq!(missing, UpdateOutcome::default());

        let doc = store
            .find_one("profiles", &Filter::by_id(id))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(doc.fields, fields(json!({ "name": "Ada", "age": 37 })));
    }

    #[tokio::test]
    async fn delete_counts() {
        let store = InMemoryDocumentStore::new("app");
        let id = insert(&store, json!({ "name": "Ada" })).await;
        insert(&store, json!({ "name": "Grace" })).await;
        insert(&store, json!({ "name": "Linus" })).await;

        assert_eq!(store.delete_one("profiles", &Filter::by_id(id)).await.unwrap(), 1);
        assert_eq!(store.delete_one("profiles", &Filter::by_id(id)).await.unwrap(), 0);
        assert_eq!(store.delete_many("profiles", &Filter::new()).await.unwrap(), 2);
        assert_eq!(store.delete_many("profiles", &Filter::new()).await.unwrap(), 0);
        assert_eq!(store.delete_many("missing", &Filter::new()).await.unwrap(), 0);
    }
}
