// SPDX-License-Identifier: PMPL-1.0-or-later
//! Audit error types.

use rapport_storage::StorageError;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum AuditError {
    /// Update or delete against the audit log. Never permitted.
    #[error("cannot modify/delete audit records")]
    TamperBlocked,

    #[error("audit record not found: {0}")]
    NotFound(Uuid),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("audit storage error: {0}")]
    Storage(#[from] StorageError),
}
