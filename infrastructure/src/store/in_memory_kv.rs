use application::{
    AtomicOperation, CommitResult, KvEntry, KvStore, ListSelector, Mutation, StoreError,
    Versionstamp,
};
use async_trait::async_trait;
use domain::KeyPath;
use serde_json::Value;
use std::collections::BTreeMap;
use std::ops::Bound;
use tokio::sync::RwLock;
use tracing::{debug, instrument, trace};

#[derive(Debug, Default)]
struct KvState {
    entries: BTreeMap<KeyPath, (Value, Versionstamp)>,
    last_versionstamp: Versionstamp,
}

/// Ordered key-value store with check-and-commit transactions.
///
/// Commits hold the write lock for their whole check/apply phase, so a commit
/// either observes and replaces a consistent snapshot or reports a conflict.
#[derive(Debug, Default)]
pub struct InMemoryKvStore {
    state: RwLock<KvState>,
}

impl InMemoryKvStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of keys currently stored, across all collections.
    pub async fn len(&self) -> usize {
        self.state.read().await.entries.len()
    }
}

#[async_trait]
impl KvStore for InMemoryKvStore {
    #[instrument(skip(self), fields(key = %key))]
    async fn get(&self, key: &KeyPath) -> Result<Option<KvEntry>, StoreError> {
        let state = self.state.read().await;
        Ok(state.entries.get(key).map(|(value, versionstamp)| KvEntry {
            key: key.clone(),
            value: value.clone(),
            versionstamp: *versionstamp,
        }))
    }

    #[instrument(skip(self, selector), fields(prefix = %selector.prefix, limit = ?selector.limit))]
    async fn list(&self, selector: ListSelector) -> Result<Vec<KvEntry>, StoreError> {
        let ListSelector {
            prefix,
            start_after,
            limit,
        } = selector;

        // Keys sharing a prefix are contiguous, and the prefix itself sorts first.
        let lower = match start_after {
            Some(cursor) if cursor > prefix => Bound::Excluded(cursor),
            _ => Bound::Included(prefix.clone()),
        };

        let state = self.state.read().await;
        let entries: Vec<KvEntry> = state
            .entries
            .range((lower, Bound::Unbounded))
            .take_while(|(key, _)| key.starts_with(&prefix))
            .filter(|(key, _)| key.len() > prefix.len())
            .take(limit.unwrap_or(usize::MAX))
            .map(|(key, (value, versionstamp))| KvEntry {
                key: key.clone(),
                value: value.clone(),
                versionstamp: *versionstamp,
            })
            .collect();
        trace!(count = entries.len(), "Listed entries");
        Ok(entries)
    }

    #[instrument(skip(self, operation), fields(checks = operation.checks().len(), mutations = operation.mutations().len()))]
    async fn commit(&self, operation: AtomicOperation) -> Result<CommitResult, StoreError> {
        let mut state = self.state.write().await;

        for check in operation.checks() {
            let current = state.entries.get(&check.key).map(|(_, stamp)| *stamp);
            if current != check.versionstamp {
                debug!(
                    key = %check.key,
                    expected = ?check.versionstamp,
                    current = ?current,
                    "Commit check failed, nothing written"
                );
                return Ok(CommitResult::Conflict);
            }
        }

        state.last_versionstamp += 1;
        let versionstamp = state.last_versionstamp;
        for mutation in operation.mutations() {
            trace!(key = %mutation.key(), "Applying mutation");
            match mutation {
                Mutation::Set { key, value } => {
                    state.entries.insert(key.clone(), (value.clone(), versionstamp));
                }
                Mutation::Delete { key } => {
                    state.entries.remove(key);
                }
            }
        }
        debug!(versionstamp, "Commit applied");
        Ok(CommitResult::Committed { versionstamp })
    }
}
