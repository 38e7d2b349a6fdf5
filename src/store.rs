//! Durable storage boundary for mock definitions.
//!
//! The registry talks to storage only through [`MockStore`]. One row is kept
//! per version and rows are never rewritten in place.

use crate::error::Result;
use crate::model::{MockDefinition, MockId, NewMock, OwnerId};
use async_trait::async_trait;
use std::collections::BTreeMap;
use tokio::sync::RwLock;

/// Storage operations the registry needs.
#[async_trait]
pub trait MockStore: Send + Sync {
    /// Insert `mock` as a new row.
    ///
    /// The store assigns a fresh id and `version = max(existing versions for
    /// (owner, path, method)) + 1`. Computing the version and inserting the
    /// row must be atomic with respect to other appends for the same key.
    async fn append(&self, mock: NewMock) -> Result<MockDefinition>;

    async fn get(&self, id: MockId) -> Result<Option<MockDefinition>>;

    /// Remove a row. Returns whether it existed.
    async fn remove(&self, id: MockId) -> Result<bool>;

    async fn find_by_owner(&self, owner: OwnerId) -> Result<Vec<MockDefinition>>;

    /// Every version stored for (owner, path, method).
    async fn find_by_key(
        &self,
        owner: OwnerId,
        path: &str,
        method: &str,
    ) -> Result<Vec<MockDefinition>>;

    /// Highest-version row for (owner, path, method).
    async fn latest_by_key(
        &self,
        owner: OwnerId,
        path: &str,
        method: &str,
    ) -> Result<Option<MockDefinition>> {
        let rows = self.find_by_key(owner, path, method).await?;
        Ok(rows.into_iter().max_by_key(|m| (m.version, m.id)))
    }
}

#[derive(Debug, Default)]
struct StoreInner {
    last_id: u64,
    rows: BTreeMap<MockId, MockDefinition>,
}

impl StoreInner {
    fn key_rows<'a>(
        &'a self,
        owner: OwnerId,
        path: &'a str,
        method: &'a str,
    ) -> impl Iterator<Item = &'a MockDefinition> + 'a {
        self.rows
            .values()
            .filter(move |m| m.owner == owner && m.path == path && m.method == method)
    }
}

/// Process-local store, used by the binary and in tests.
#[derive(Debug, Default)]
pub struct InMemoryMockStore {
    inner: RwLock<StoreInner>,
}

impl InMemoryMockStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored rows across all owners and versions.
    pub async fn len(&self) -> usize {
        self.inner.read().await.rows.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl MockStore for InMemoryMockStore {
    async fn append(&self, mock: NewMock) -> Result<MockDefinition> {
        // Single write guard spans version computation and insert.
        let mut inner = self.inner.write().await;
        let version = inner
            .key_rows(mock.owner, &mock.path, &mock.method)
            .map(|m| m.version)
            .max()
            .map_or(1, |v| v + 1);

        inner.last_id += 1;
        let id = MockId(inner.last_id);
        let stored = mock.into_definition(id, version);
        inner.rows.insert(id, stored.clone());
        Ok(stored)
    }

    async fn get(&self, id: MockId) -> Result<Option<MockDefinition>> {
        Ok(self.inner.read().await.rows.get(&id).cloned())
    }

    async fn remove(&self, id: MockId) -> Result<bool> {
        Ok(self.inner.write().await.rows.remove(&id).is_some())
    }

    async fn find_by_owner(&self, owner: OwnerId) -> Result<Vec<MockDefinition>> {
        let inner = self.inner.read().await;
        Ok(inner
            .rows
            .values()
            .filter(|m| m.owner == owner)
            .cloned()
            .collect())
    }

    async fn find_by_key(
        &self,
        owner: OwnerId,
        path: &str,
        method: &str,
    ) -> Result<Vec<MockDefinition>> {
        let inner = self.inner.read().await;
        Ok(inner.key_rows(owner, path, method).cloned().collect())
    }
}
