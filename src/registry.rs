//! Mock registry.
//!
//! Owns the versioned collection of mock definitions per owner. Updates
//! append a new version instead of rewriting the old one, so every version
//! ever created stays retrievable until explicitly deleted.

use crate::error::{MockError, Result};
use crate::model::{normalize_method, normalize_path, MockDefinition, MockDraft, MockId, OwnerId};
use crate::page::{matches_search, paginate, MockFilter, Page, PageRequest};
use crate::store::MockStore;
use std::cmp::Reverse;
use std::sync::Arc;
use tracing::info;

/// Versioned mock registry over a [`MockStore`].
#[derive(Clone)]
pub struct MockRegistry {
    store: Arc<dyn MockStore>,
}

impl MockRegistry {
    pub fn new(store: Arc<dyn MockStore>) -> Self {
        Self { store }
    }

    /// Create a mock at the next free version for its (path, method) key.
    pub async fn create(&self, owner: OwnerId, draft: MockDraft) -> Result<MockDefinition> {
        let new_mock = draft.into_new_mock(owner)?;
        let stored = self.store.append(new_mock).await?;
        log_change("created", &stored);
        Ok(stored)
    }

    /// Store `patch` overlaid on mock `id` as a brand-new version.
    ///
    /// The version number is computed for the resulting (path, method) key,
    /// which differs from the base's key when the patch moves the mock.
    pub async fn update_as_new_version(
        &self,
        owner: OwnerId,
        id: MockId,
        patch: MockDraft,
    ) -> Result<MockDefinition> {
        let base = self.get(owner, id).await?;
        let new_mock = patch.overlay(&base)?;
        let stored = self.store.append(new_mock).await?;
        log_change("updated", &stored);
        Ok(stored)
    }

    /// Delete mock `id` if it belongs to `owner`.
    ///
    /// Ids owned by someone else are silently ignored so deletes cannot be
    /// used to probe for other owners' mocks.
    pub async fn delete(&self, owner: OwnerId, id: MockId) -> Result<()> {
        match self.store.get(id).await? {
            Some(existing) if existing.owner == owner => {
                self.store.remove(id).await?;
                log_change("deleted", &existing);
            }
            _ => {}
        }
        Ok(())
    }

    /// Fetch mock `id` scoped to `owner`.
    pub async fn get(&self, owner: OwnerId, id: MockId) -> Result<MockDefinition> {
        self.store
            .get(id)
            .await?
            .filter(|m| m.owner == owner)
            .ok_or_else(|| MockError::not_found(format!("mock {}", id)))
    }

    /// Every stored version belonging to `owner`, ordered by id.
    pub async fn list_by_owner(&self, owner: OwnerId) -> Result<Vec<MockDefinition>> {
        let mut mocks = self.store.find_by_owner(owner).await?;
        mocks.sort_by_key(|m| m.id);
        Ok(mocks)
    }

    pub async fn list_with_filters(
        &self,
        owner: OwnerId,
        filter: &MockFilter,
        request: PageRequest,
    ) -> Result<Page<MockDefinition>> {
        let mocks = self.store.find_by_owner(owner).await?;
        paginate(mocks.into_iter().filter(|m| filter.matches(m)).collect(), request)
    }

    /// Page of mocks whose path, method or response body contains `term`.
    pub async fn search(
        &self,
        owner: OwnerId,
        term: &str,
        request: PageRequest,
    ) -> Result<Page<MockDefinition>> {
        let mocks = self.store.find_by_owner(owner).await?;
        paginate(
            mocks.into_iter().filter(|m| matches_search(m, term)).collect(),
            request,
        )
    }

    /// All versions for (owner, path, method) as matching candidates.
    ///
    /// Ordered by descending priority, then descending version, then
    /// descending id.
    pub async fn list_candidates(
        &self,
        owner: OwnerId,
        path: &str,
        method: &str,
    ) -> Result<Vec<MockDefinition>> {
        let mut candidates = self
            .store
            .find_by_key(owner, &normalize_path(path), &normalize_method(method))
            .await?;
        candidates.sort_by_key(|m| Reverse((m.priority, m.version, m.id)));
        Ok(candidates)
    }

    /// Highest-version mock for (owner, path, method).
    pub async fn latest_version(
        &self,
        owner: OwnerId,
        path: &str,
        method: &str,
    ) -> Result<Option<MockDefinition>> {
        self.store
            .latest_by_key(owner, &normalize_path(path), &normalize_method(method))
            .await
    }
}

fn log_change(action: &str, mock: &MockDefinition) {
    info!(
        action,
        owner = %mock.owner,
        id = %mock.id,
        path = %mock.path,
        method = %mock.method,
        version = mock.version,
        "Mock definition changed"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryMockStore;

    const ALICE: OwnerId = OwnerId(1);
    const BOB: OwnerId = OwnerId(2);

    fn registry() -> MockRegistry {
        MockRegistry::new(Arc::new(InMemoryMockStore::new()))
    }

    #[tokio::test]
    async fn test_create_normalizes_and_versions() {
        let reg = registry();

        let first = reg
            .create(ALICE, MockDraft::new("mock//users", "get", "{}"))
            .await
            .unwrap();
        assert_eq!(first.path, "/users");
        assert_eq!(first.method, "GET");
        assert_eq!(first.version, 1);

        let second = reg
            .create(ALICE, MockDraft::new("/users", "GET", "[]"))
            .await
            .unwrap();
        assert_eq!(second.version, 2);
    }

    #[tokio::test]
    async fn test_create_rejects_invalid_draft() {
        let reg = registry();
        let err = reg
            .create(ALICE, MockDraft::new("/x", "GET", "{}").with_status(700))
            .await
            .unwrap_err();
        assert!(matches!(err, MockError::Validation(_)));
        assert!(reg.list_by_owner(ALICE).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_update_chain_keeps_history() {
        let reg = registry();
        let created = reg
            .create(ALICE, MockDraft::new("/x", "GET", r#"{"v":0}"#).with_status(201))
            .await
            .unwrap();

        let mut ids = vec![created.id];
        let mut last = created;
        for n in 1..=4 {
            let patch = MockDraft {
                response_body: Some(format!(r#"{{"v":{}}}"#, n)),
                ..MockDraft::default()
            };
            last = reg.update_as_new_version(ALICE, last.id, patch).await.unwrap();
            ids.push(last.id);
        }

        let latest = reg.latest_version(ALICE, "/x", "GET").await.unwrap().unwrap();
        assert_eq!(latest.version, 5);
        assert_eq!(latest.status_code, 201);
        assert_eq!(latest.response_body, r#"{"v":4}"#);

        for (i, id) in ids.iter().enumerate() {
            let row = reg.get(ALICE, *id).await.unwrap();
            assert_eq!(row.version, i as u32 + 1);
        }
    }

    #[tokio::test]
    async fn test_update_moving_key_restarts_version() {
        let reg = registry();
        let base = reg.create(ALICE, MockDraft::new("/x", "GET", "{}")).await.unwrap();
        reg.create(ALICE, MockDraft::new("/x", "GET", "{}")).await.unwrap();

        let moved = reg
            .update_as_new_version(
                ALICE,
                base.id,
                MockDraft {
                    method: Some("post".to_string()),
                    ..MockDraft::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(moved.method, "POST");
        assert_eq!(moved.version, 1);
    }

    #[tokio::test]
    async fn test_update_foreign_mock_is_not_found() {
        let reg = registry();
        let bobs = reg.create(BOB, MockDraft::new("/x", "GET", "{}")).await.unwrap();

        let err = reg
            .update_as_new_version(ALICE, bobs.id, MockDraft::default())
            .await
            .unwrap_err();
        assert!(matches!(err, MockError::NotFound(_)));

        let err = reg
            .update_as_new_version(ALICE, MockId(999), MockDraft::default())
            .await
            .unwrap_err();
        assert!(matches!(err, MockError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_delete_is_owner_scoped() {
        let reg = registry();
        let bobs = reg.create(BOB, MockDraft::new("/x", "GET", "{}")).await.unwrap();

        reg.delete(ALICE, bobs.id).await.unwrap();
        assert_eq!(reg.get(BOB, bobs.id).await.unwrap().id, bobs.id);

        reg.delete(BOB, bobs.id).await.unwrap();
        assert!(reg.get(BOB, bobs.id).await.is_err());

        // deleting an unknown id is not an error
        reg.delete(BOB, MockId(12345)).await.unwrap();
    }

    #[tokio::test]
    async fn test_list_candidates_ordering() {
        let reg = registry();
        reg.create(ALICE, MockDraft::new("/x", "GET", "a").with_priority(5)).await.unwrap();
        reg.create(ALICE, MockDraft::new("/x", "GET", "b").with_priority(10)).await.unwrap();
        reg.create(ALICE, MockDraft::new("/x", "GET", "c").with_priority(5)).await.unwrap();
        reg.create(ALICE, MockDraft::new("/x", "POST", "d")).await.unwrap();
        reg.create(BOB, MockDraft::new("/x", "GET", "e")).await.unwrap();

        let candidates = reg.list_candidates(ALICE, "/mock/x", "get").await.unwrap();
        let bodies: Vec<_> = candidates.iter().map(|m| m.response_body.as_str()).collect();
        assert_eq!(bodies, vec!["b", "c", "a"]);
    }

    #[tokio::test]
    async fn test_list_filter_and_search() {
        let reg = registry();
        reg.create(ALICE, MockDraft::new("/users", "GET", r#"{"name":"ann"}"#)).await.unwrap();
        reg.create(ALICE, MockDraft::new("/users", "POST", "{}").with_active(false))
            .await
            .unwrap();
        reg.create(ALICE, MockDraft::new("/orders", "GET", "{}")).await.unwrap();
        reg.create(BOB, MockDraft::new("/users", "GET", "{}")).await.unwrap();

        assert_eq!(reg.list_by_owner(ALICE).await.unwrap().len(), 3);

        let filter = MockFilter {
            path: Some("users".to_string()),
            active: Some(true),
            ..MockFilter::default()
        };
        let page = reg
            .list_with_filters(ALICE, &filter, PageRequest::new(0, 10))
            .await
            .unwrap();
        assert_eq!(page.total_elements, 1);
        assert_eq!(page.content[0].method, "GET");

        let page = reg.search(ALICE, "ann", PageRequest::new(0, 10)).await.unwrap();
        assert_eq!(page.total_elements, 1);
        assert_eq!(page.content[0].path, "/users");
    }
}
