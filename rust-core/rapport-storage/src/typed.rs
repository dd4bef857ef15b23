// SPDX-License-Identifier: PMPL-1.0-or-later
//
// Typed table store.
//
// Serde-based access on top of any `StorageBackend`. Values are stored as
// JSON and keys are prefixed with the table namespace, so every logical
// table shares one physical backend. Writes can either be applied
// directly or collected as `WriteOp`s and committed together with writes
// to other tables in one atomic batch.

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::backend::{SharedBackend, StorageBackend, WriteOp};
use crate::error::StorageError;

/// A typed wrapper around a [`StorageBackend`] that handles serialization
/// and namespace prefixing.
///
/// Keys are stored as `"{namespace}:{key}"`.
#[derive(Clone)]
pub struct TypedStore<B: StorageBackend = SharedBackend> {
    backend: B,
    namespace: String,
}

impl<B: StorageBackend> TypedStore<B> {
    /// Create a new typed store wrapping `backend` with the given namespace.
    pub fn new(backend: B, namespace: &str) -> Self {
        Self {
            backend,
            namespace: namespace.to_string(),
        }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    fn prefixed_key(&self, key: &str) -> Vec<u8> {
        format!("{}:{}", self.namespace, key).into_bytes()
    }

    fn prefix_bytes(&self) -> Vec<u8> {
        format!("{}:", self.namespace).into_bytes()
    }

    /// Retrieve and deserialize a value by its logical key.
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, StorageError> {
        match self.backend.get(&self.prefixed_key(key)).await? {
            Some(bytes) => {
                let value: T = serde_json::from_slice(&bytes).map_err(|err| {
                    StorageError::SerializationError(format!(
                        "failed to deserialize value for key '{}': {}",
                        key, err
                    ))
                })?;
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    /// Build a put operation for later inclusion in a batch.
    pub fn put_op<T: Serialize>(&self, key: &str, value: &T) -> Result<WriteOp, StorageError> {
        let bytes = serde_json::to_vec(value).map_err(|err| {
            StorageError::SerializationError(format!(
                "failed to serialize value for key '{}': {}",
                key, err
            ))
        })?;
        Ok(WriteOp::Put {
            key: self.prefixed_key(key),
            value: bytes,
        })
    }

    /// Build a delete operation for later inclusion in a batch.
    pub fn delete_op(&self, key: &str) -> WriteOp {
        WriteOp::Delete {
            key: self.prefixed_key(key),
        }
    }

    /// Serialize and store a value under the given logical key.
    pub async fn put<T: Serialize>(&self, key: &str, value: &T) -> Result<(), StorageError> {
        let op = self.put_op(key, value)?;
        self.backend.apply_batch(&[op]).await
    }

    /// Delete a value by its logical key. Returns whether it existed.
    pub async fn delete(&self, key: &str) -> Result<bool, StorageError> {
        let full_key = self.prefixed_key(key);
        let existed = self.backend.exists(&full_key).await?;
        if existed {
            self.backend
                .apply_batch(&[WriteOp::Delete { key: full_key }])
                .await?;
        }
        Ok(existed)
    }

    /// Commit a set of operations (possibly spanning namespaces) atomically.
    pub async fn apply(&self, ops: &[WriteOp]) -> Result<(), StorageError> {
        self.backend.apply_batch(ops).await
    }

    /// Scan entries whose logical keys start with `key_prefix`, returning
    /// up to `limit` deserialized (logical key, value) pairs.
    pub async fn scan_prefix<T: DeserializeOwned>(
        &self,
        key_prefix: &str,
        limit: usize,
    ) -> Result<Vec<(String, T)>, StorageError> {
        let full_prefix = format!("{}:{}", self.namespace, key_prefix).into_bytes();
        let ns_prefix_len = self.prefix_bytes().len();

        let raw_results = self.backend.scan_prefix(&full_prefix, limit).await?;

        let mut results = Vec::with_capacity(raw_results.len());
        for (raw_key, raw_value) in raw_results {
            let logical_key = String::from_utf8_lossy(&raw_key[ns_prefix_len..]).to_string();
            let value: T = serde_json::from_slice(&raw_value).map_err(|err| {
                StorageError::CorruptedData(format!(
                    "failed to deserialize scanned value for key '{}': {}",
                    logical_key, err
                ))
            })?;
            results.push((logical_key, value));
        }

        Ok(results)
    }

    /// Every value in the namespace, in key order.
    pub async fn scan_all<T: DeserializeOwned>(&self) -> Result<Vec<T>, StorageError> {
        Ok(self
            .scan_prefix("", usize::MAX)
            .await?
            .into_iter()
            .map(|(_, value)| value)
            .collect())
    }
}
