// SPDX-License-Identifier: PMPL-1.0-or-later
//
// Storage error types.
//
// One enum covering what a backend or the typed table layer can fail
// with: missing keys, serialization failures, corrupt values and an
// unavailable backend.

use thiserror::Error;

/// Errors that can occur when interacting with a storage backend.
#[derive(Debug, Error)]
pub enum StorageError {
    /// The requested key was not found.
    #[error("key not found: {0}")]
    NotFound(String),

    /// Failed to serialize or deserialize a value.
    #[error("serialization error: {0}")]
    SerializationError(String),

    /// The stored data is corrupted or in an unexpected format.
    #[error("corrupted data: {0}")]
    CorruptedData(String),

    /// The storage backend is not available or refused the write.
    #[error("backend unavailable: {0}")]
    BackendUnavailable(String),
}
