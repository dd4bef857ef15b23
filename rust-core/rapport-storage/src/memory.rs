// SPDX-License-Identifier: PMPL-1.0-or-later
//
// In-memory storage backend.
//
// A `BTreeMap` behind a tokio `RwLock`. Ordered keys make prefix scans a
// range walk. A batch is applied under one write-lock acquisition, which
// is what makes it atomic with respect to readers.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::trace;

use crate::backend::{StorageBackend, WriteOp};
use crate::error::StorageError;

/// An in-memory storage backend backed by a sorted `BTreeMap`.
///
/// All data lives in process memory and is lost on drop. Clones share the
/// same underlying map.
#[derive(Debug, Clone, Default)]
pub struct InMemoryBackend {
    data: Arc<RwLock<BTreeMap<Vec<u8>, Vec<u8>>>>,
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the number of keys currently stored.
    pub async fn len(&self) -> usize {
        self.data.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.data.read().await.is_empty()
    }
}

#[async_trait]
impl StorageBackend for InMemoryBackend {
    async fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StorageError> {
        let map = self.data.read().await;
        Ok(map.get(key).cloned())
    }

    async fn scan_prefix(
        &self,
        prefix: &[u8],
        limit: usize,
    ) -> Result<Vec<(Vec<u8>, Vec<u8>)>, StorageError> {
        let map = self.data.read().await;
        let results = map
            .range(prefix.to_vec()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .take(limit)
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        Ok(results)
    }

    async fn apply_batch(&self, ops: &[WriteOp]) -> Result<(), StorageError> {
        let mut map = self.data.write().await;
        for op in ops {
            match op {
                WriteOp::Put { key, value } => {
                    map.insert(key.clone(), value.clone());
                }
                WriteOp::Delete { key } => {
                    map.remove(key);
                }
            }
        }
        trace!(ops = ops.len(), "Batch applied");
        Ok(())
    }

    fn name(&self) -> &str {
        "in-memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn put(key: &[u8], value: &[u8]) -> WriteOp {
        WriteOp::Put {
            key: key.to_vec(),
            value: value.to_vec(),
        }
    }

    #[tokio::test]
    async fn test_basic_put_get() {
        let backend = InMemoryBackend::new();
        assert!(backend.is_empty().await);
        assert_eq!(backend.get(b"key1").await.unwrap(), None);

        backend.put(b"key1", b"value1").await.unwrap();
        assert_eq!(backend.get(b"key1").await.unwrap(), Some(b"value1".to_vec()));
        assert!(backend.exists(b"key1").await.unwrap());

        backend.put(b"key1", b"updated").await.unwrap();
        assert_eq!(backend.get(b"key1").await.unwrap(), Some(b"updated".to_vec()));
        assert_eq!(backend.len().await, 1);
    }

    #[tokio::test]
    async fn test_batch_mixes_puts_and_deletes() {
        let backend = InMemoryBackend::new();
        backend.put(b"gone", b"x").await.unwrap();

        backend
            .apply_batch(&[
                put(b"a", b"1"),
                put(b"b", b"2"),
                WriteOp::Delete {
                    key: b"gone".to_vec(),
                },
            ])
            .await
            .unwrap();

        assert_eq!(backend.len().await, 2);
        assert!(!backend.exists(b"gone").await.unwrap());
        assert_eq!(backend.get(b"b").await.unwrap(), Some(b"2".to_vec()));
    }

    #[tokio::test]
    async fn test_scan_prefix() {
        let backend = InMemoryBackend::new();
        backend.put(b"contacts:c1", b"{}").await.unwrap();
        backend.put(b"contacts:c2", b"{}").await.unwrap();
        backend.put(b"organizations:o1", b"{}").await.unwrap();

        let results = backend.scan_prefix(b"contacts:", 10).await.unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].0, b"contacts:c1".to_vec());

        let limited = backend.scan_prefix(b"contacts:", 1).await.unwrap();
        assert_eq!(limited.len(), 1);

        assert!(backend.scan_prefix(b"missing:", 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_clone_shares_state() {
        let backend = InMemoryBackend::new();
        let clone = backend.clone();
        backend.put(b"shared", b"data").await.unwrap();
        assert_eq!(clone.get(b"shared").await.unwrap(), Some(b"data".to_vec()));
    }

    #[tokio::test]
    async fn test_shared_handle_delegates() {
        let backend: crate::backend::SharedBackend = Arc::new(InMemoryBackend::new());
        backend.put(b"k", b"v").await.unwrap();
        assert_eq!(backend.name(), "in-memory");
        assert_eq!(backend.get(b"k").await.unwrap(), Some(b"v".to_vec()));
    }
}
