use crate::StoreError;
use async_trait::async_trait;
use domain::KeyPath;
use serde_json::Value;

/// Monotonic stamp assigned by the store to every key a commit writes.
pub type Versionstamp = u64;

#[derive(Debug, Clone, PartialEq)]
pub struct KvEntry {
    pub key: KeyPath,
    pub value: Value,
    pub versionstamp: Versionstamp,
}

/// Commit precondition: the key must currently carry `versionstamp`,
/// or be absent when `versionstamp` is `None`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Check {
    pub key: KeyPath,
    pub versionstamp: Option<Versionstamp>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Mutation {
    Set { key: KeyPath, value: Value },
    Delete { key: KeyPath },
}

impl Mutation {
    pub fn key(&self) -> &KeyPath {
        match self {
            Mutation::Set { key, .. } | Mutation::Delete { key } => key,
        }
    }
}

/// A batch of checks and mutations applied all-or-nothing by `KvStore::commit`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AtomicOperation {
    checks: Vec<Check>,
    mutations: Vec<Mutation>,
}

impl AtomicOperation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn check(mut self, key: KeyPath, versionstamp: Option<Versionstamp>) -> Self {
        self.checks.push(Check { key, versionstamp });
        self
    }

    pub fn set(mut self, key: KeyPath, value: Value) -> Self {
        self.mutations.push(Mutation::Set { key, value });
        self
    }

    pub fn delete(mut self, key: KeyPath) -> Self {
        self.mutations.push(Mutation::Delete { key });
        self
    }

    pub fn checks(&self) -> &[Check] {
        &self.checks
    }

    pub fn mutations(&self) -> &[Mutation] {
        &self.mutations
    }

    pub fn is_empty(&self) -> bool {
        self.checks.is_empty() && self.mutations.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitResult {
    Committed { versionstamp: Versionstamp },
    /// At least one check failed; nothing was written.
    Conflict,
}

impl CommitResult {
    pub fn is_committed(&self) -> bool {
        matches!(self, CommitResult::Committed { .. })
    }
}

/// Selects a contiguous range of keys sharing `prefix`, in key order.
#[derive(Debug, Clone, PartialEq)]
pub struct ListSelector {
    pub prefix: KeyPath,
    /// Exclusive lower bound, used as a pagination cursor.
    pub start_after: Option<KeyPath>,
    pub limit: Option<usize>,
}

impl ListSelector {
    pub fn prefix(prefix: KeyPath) -> Self {
        Self {
            prefix,
            start_after: None,
            limit: None,
        }
    }

    pub fn start_after(mut self, cursor: Option<KeyPath>) -> Self {
        self.start_after = cursor;
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// Client interface of an ordered, transactional key-value store.
#[async_trait]
pub trait KvStore: Send + Sync {
    async fn get(&self, key: &KeyPath) -> Result<Option<KvEntry>, StoreError>;

    async fn list(&self, selector: ListSelector) -> Result<Vec<KvEntry>, StoreError>;

    /// Verifies every check and applies every mutation, or does nothing.
    async fn commit(&self, operation: AtomicOperation) -> Result<CommitResult, StoreError>;
}
