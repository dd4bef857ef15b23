// SPDX-License-Identifier: PMPL-1.0-or-later
//! Directory error types.

use thiserror::Error;

use crate::ids::{PrincipalId, TenantId};

/// Errors raised by directory operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DirectoryError {
    #[error("tenant not found: {0}")]
    TenantNotFound(TenantId),

    #[error("principal not found: {0}")]
    PrincipalNotFound(PrincipalId),

    #[error("administrator roster entry not found: {0}")]
    AdminNotFound(PrincipalId),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("tenant {0} is deleted")]
    TenantDeleted(TenantId),

    /// A non-administrator tried to move a principal to another tenant.
    #[error("Unauthorized: cross-tenant transfer")]
    CrossTenantTransfer,

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),
}
