use crate::{RepositoryError, StoreError};
use async_trait::async_trait;
use bson::oid::ObjectId;
use serde::Serialize;
use serde_json::{Map, Value};

/// Document body: field name -> JSON value, without the native identifier.
pub type Fields = Map<String, Value>;

#[derive(Debug, Clone, PartialEq)]
pub struct StoredDocument {
    pub id: ObjectId,
    pub fields: Fields,
}

/// Equality filter over the native identifier and document fields.
///
/// Field names may use dots to reach into nested objects (`"address.city"`).
/// An empty filter matches every document.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filter {
    id: Option<ObjectId>,
    fields: Fields,
}

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn by_id(id: ObjectId) -> Self {
        Self {
            id: Some(id),
            fields: Fields::new(),
        }
    }

    pub fn eq(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(field.into(), value.into());
        self
    }

    pub fn id(&self) -> Option<&ObjectId> {
        self.id.as_ref()
    }

    pub fn is_empty(&self) -> bool {
        self.id.is_none() && self.fields.is_empty()
    }

    pub fn matches(&self, id: &ObjectId, fields: &Fields) -> bool {
        if let Some(wanted) = &self.id {
            if wanted != id {
                return false;
            }
        }
        self.fields
            .iter()
            .all(|(path, expected)| lookup(fields, path) == Some(expected))
    }
}

fn lookup<'a>(fields: &'a Fields, path: &str) -> Option<&'a Value> {
    let mut segments = path.split('.');
    let mut current = fields.get(segments.next()?)?;
    for segment in segments {
        current = current.as_object()?.get(segment)?;
    }
    Some(current)
}

/// Top-level fields to overwrite in a partial update. Fields not present are left untouched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Patch(Fields);

impl Patch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(field.into(), value.into());
        self
    }

    /// Builds a patch from any value serializing to an object. Fields that serde
    /// skips (e.g. `skip_serializing_if = "Option::is_none"`) stay out of the patch.
    pub fn from_serializable<T: Serialize>(value: &T) -> Result<Self, RepositoryError> {
        match serde_json::to_value(value)? {
            Value::Object(fields) => Ok(Self(fields)),
            _ => Err(RepositoryError::NotAnObject("patch".to_string())),
        }
    }

    pub fn fields(&self) -> &Fields {
        &self.0
    }

    pub fn into_fields(self) -> Fields {
        self.0
    }
}

/// Raw outcome of a single-document update, as reported by the store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct UpdateOutcome {
    pub matched_count: u64,
    pub modified_count: u64,
}

/// Client interface of a filter-queryable document store.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn find(
        &self,
        collection: &str,
        filter: &Filter,
    ) -> Result<Vec<StoredDocument>, StoreError>;

    async fn find_one(
        &self,
        collection: &str,
        filter: &Filter,
    ) -> Result<Option<StoredDocument>, StoreError>;

    /// Fails with `StoreError::DuplicateKey` if the identifier is taken.
    async fn insert_one(&self, collection: &str, document: StoredDocument)
    -> Result<(), StoreError>;

    /// Sets `fields` on the first matching document.
    async fn update_one(
        &self,
        collection: &str,
        filter: &Filter,
        fields: Fields,
    ) -> Result<UpdateOutcome, StoreError>;

    async fn delete_one(&self, collection: &str, filter: &Filter) -> Result<u64, StoreError>;

    async fn delete_many(&self, collection: &str, filter: &Filter) -> Result<u64, StoreError>;
}
