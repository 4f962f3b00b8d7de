//! Source-ID cache
//!
//! Maps an internal document id to the provider-side source id returned by a
//! successful registration, so a document is uploaded at most once per
//! process. Entries live until removed explicitly; there is no TTL, so a
//! handle the provider has since expired makes the next query fail.
//!
//! Each document id owns a `OnceCell`, which makes lookup-or-register a
//! single-flight operation: concurrent first queries for the same document
//! wait on one registration instead of uploading twice. A failed registration
//! leaves the cell empty.

use crate::errors::ProviderError;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::{OnceCell, RwLock};
use tracing::debug;
use trialdoc_common::{metrics, models::ProviderSourceHandle};

const CACHE_NAME: &str = "source_id";

/// In-process document → source id mapping
#[derive(Default)]
pub struct SourceIdCache {
    entries: RwLock<HashMap<String, Arc<OnceCell<String>>>>,
}

impl SourceIdCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cached source id for a document, if registered
    pub async fn get(&self, document_id: &str) -> Option<String> {
        let entries = self.entries.read().await;
        entries.get(document_id).and_then(|cell| cell.get().cloned())
    }

    /// Record a handle obtained outside `get_or_register`, replacing any previous one
    pub async fn insert(&self, handle: ProviderSourceHandle) {
        let mut entries = self.entries.write().await;
        entries.insert(
            handle.document_id,
            Arc::new(OnceCell::new_with(Some(handle.source_id))),
        );
    }

    /// Return the cached source id or run `register` exactly once to obtain it
    pub async fn get_or_register<F, Fut>(
        &self,
        document_id: &str,
        register: F,
    ) -> Result<String, ProviderError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<String, ProviderError>>,
    {
        let cell = self.cell(document_id).await;

        if let Some(source_id) = cell.get() {
            metrics::record_cache(true, CACHE_NAME);
            debug!(document_id, source_id = %source_id, "Source cache hit");
            return Ok(source_id.clone());
        }

        metrics::record_cache(false, CACHE_NAME);
        debug!(document_id, "Source cache miss, registering document");

        cell.get_or_try_init(register).await.cloned()
    }

    /// Invalidate one document's handle; returns whether a handle existed
    pub async fn remove(&self, document_id: &str) -> bool {
        let mut entries = self.entries.write().await;
        entries
            .remove(document_id)
            .is_some_and(|cell| cell.initialized())
    }

    /// Drop every handle; returns how many registered handles were dropped
    pub async fn clear(&self) -> usize {
        let mut entries = self.entries.write().await;
        let registered = entries.values().filter(|cell| cell.initialized()).count();
        entries.clear();
        registered
    }

    /// Snapshot of all registered handles, ordered by document id
    pub async fn handles(&self) -> Vec<ProviderSourceHandle> {
        let entries = self.entries.read().await;
        let mut handles: Vec<ProviderSourceHandle> = entries
            .iter()
            .filter_map(|(document_id, cell)| {
                cell.get().map(|source_id| ProviderSourceHandle {
                    document_id: document_id.clone(),
                    source_id: source_id.clone(),
                })
            })
            .collect();
        handles.sort_by(|a, b| a.document_id.cmp(&b.document_id));
        handles
    }

    /// Number of registered handles
    pub async fn len(&self) -> usize {
        let entries = self.entries.read().await;
        entries.values().filter(|cell| cell.initialized()).count()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    async fn cell(&self, document_id: &str) -> Arc<OnceCell<String>> {
        if let Some(cell) = self.entries.read().await.get(document_id) {
            return cell.clone();
        }

        let mut entries = self.entries.write().await;
        entries
            .entry(document_id.to_string())
            .or_insert_with(|| Arc::new(OnceCell::new()))
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use trialdoc_common::ProviderKind;

    #[tokio::test]
    async fn test_registers_once_per_document() {
        let cache = SourceIdCache::new();
        let uploads = AtomicUsize::new(0);

        for _ in 0..3 {
            let source_id = cache
                .get_or_register("doc1", || async {
                    uploads.fetch_add(1, Ordering::SeqCst);
                    Ok("src_1".to_string())
                })
                .await
                .unwrap();
            assert_eq!(source_id, "src_1");
        }

        assert_eq!(uploads.load(Ordering::SeqCst), 1);
        assert_eq!(cache.get("doc1").await.as_deref(), Some("src_1"));
    }

    #[tokio::test]
    async fn test_concurrent_first_queries_share_one_upload() {
        let cache = Arc::new(SourceIdCache::new());
        let uploads = Arc::new(AtomicUsize::new(0));

        let tasks = (0..8).map(|_| {
            let cache = cache.clone();
            let uploads = uploads.clone();
            async move {
                cache
                    .get_or_register("doc-race", || async move {
                        uploads.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(20)).await;
                        Ok("src_race".to_string())
                    })
                    .await
            }
        });

        let results = futures::future::join_all(tasks).await;
        assert!(results.iter().all(|r| r.as_deref() == Ok("src_race")));
        assert_eq!(uploads.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failed_registration_is_not_cached() {
        let cache = SourceIdCache::new();

        let result = cache
            .get_or_register("doc2", || async {
                Err(ProviderError::Network {
                    provider: ProviderKind::Fallback,
                    message: "connection refused".to_string(),
                })
            })
            .await;
        tokio_test::assert_err!(result);
        assert!(cache.get("doc2").await.is_none());
        assert!(cache.is_empty().await);

        let source_id = cache
            .get_or_register("doc2", || async { Ok("src_2".to_string()) })
            .await
            .unwrap();
        assert_eq!(source_id, "src_2");
    }

    #[tokio::test]
    async fn test_manual_invalidation() {
        let cache = SourceIdCache::new();
        cache
            .insert(ProviderSourceHandle {
                document_id: "b".to_string(),
                source_id: "src_b".to_string(),
            })
            .await;
        cache
            .insert(ProviderSourceHandle {
                document_id: "a".to_string(),
                source_id: "src_a".to_string(),
            })
            .await;

        let handles = cache.handles().await;
        assert_eq!(handles.len(), 2);
        assert_eq!(handles[0].document_id, "a");

        assert!(cache.remove("a").await);
        assert!(!cache.remove("a").await);
        assert_eq!(cache.clear().await, 1);
        assert!(cache.is_empty().await);
    }
}
