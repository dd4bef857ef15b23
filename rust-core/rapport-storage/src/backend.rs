// SPDX-License-Identifier: PMPL-1.0-or-later
//
// Core storage backend trait.
//
// Backends expose a byte-oriented key-value interface with prefix scans
// and atomic write batches. Every statement issued by the repository
// lands as exactly one batch, so a backend either applies all of a
// statement's row writes or none of them.

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::StorageError;

/// One write inside an atomic batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteOp {
    /// Store `value` under `key`, overwriting any previous value.
    Put { key: Vec<u8>, value: Vec<u8> },
    /// Remove `key` if present.
    Delete { key: Vec<u8> },
}

impl WriteOp {
    pub fn key(&self) -> &[u8] {
        match self {
            WriteOp::Put { key, .. } | WriteOp::Delete { key } => key,
        }
    }
}

/// A pluggable key-value storage backend.
///
/// Keys and values are opaque byte slices. Typed access is provided by
/// [`crate::typed::TypedStore`].
///
/// Implementations must be safe to share across threads and tokio tasks.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Retrieve the value associated with `key`.
    ///
    /// Returns `Ok(None)` if the key does not exist, rather than an error.
    async fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StorageError>;

    /// Scan all keys that start with `prefix`, returning up to `limit`
    /// (key, value) pairs in lexicographic order.
    async fn scan_prefix(
        &self,
        prefix: &[u8],
        limit: usize,
    ) -> Result<Vec<(Vec<u8>, Vec<u8>)>, StorageError>;

    /// Apply every operation in `ops` atomically.
    ///
    /// Either all operations become visible or none do. Readers never
    /// observe a partially applied batch.
    async fn apply_batch(&self, ops: &[WriteOp]) -> Result<(), StorageError>;

    /// A human-readable name for this backend, used in logging.
    fn name(&self) -> &str;

    /// Store a single key-value pair.
    async fn put(&self, key: &[u8], value: &[u8]) -> Result<(), StorageError> {
        self.apply_batch(&[WriteOp::Put {
            key: key.to_vec(),
            value: value.to_vec(),
        }])
        .await
    }

    /// Check whether `key` exists without returning its value.
    async fn exists(&self, key: &[u8]) -> Result<bool, StorageError> {
        Ok(self.get(key).await?.is_some())
    }
}

#[async_trait]
impl<T: StorageBackend + ?Sized> StorageBackend for Arc<T> {
    async fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StorageError> {
        (**self).get(key).await
    }

    async fn scan_prefix(
        &self,
        prefix: &[u8],
        limit: usize,
    ) -> Result<Vec<(Vec<u8>, Vec<u8>)>, StorageError> {
        (**self).scan_prefix(prefix, limit).await
    }

    async fn apply_batch(&self, ops: &[WriteOp]) -> Result<(), StorageError> {
        (**self).apply_batch(ops).await
    }

    fn name(&self) -> &str {
        (**self).name()
    }
}

/// Backend handle shared between the repository and the audit log.
pub type SharedBackend = Arc<dyn StorageBackend>;
