// SPDX-License-Identifier: PMPL-1.0-or-later
//! Repository error types.

use rapport_anomaly::AnomalyError;
use rapport_audit::AuditError;
use rapport_authz::{AuthzError, DecisionReason, GuardError, RolloutError};
use rapport_storage::StorageError;
use rapport_tenancy::DirectoryError;
use thiserror::Error;

use crate::migrations::MigrationError;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("unknown table: {0}")]
    UnknownTable(String),

    /// Table exists but is not reachable through generic row access.
    #[error("table {0} is reserved")]
    ReservedTable(String),

    #[error("row {id} already exists in {table}")]
    Conflict { table: String, id: String },

    #[error("invalid row: {0}")]
    InvalidRow(String),

    /// Operation needs privileges the actor does not have.
    #[error("forbidden: {0}")]
    Forbidden(DecisionReason),

    #[error(transparent)]
    Authz(#[from] AuthzError),

    #[error(transparent)]
    Guard(#[from] GuardError),

    #[error(transparent)]
    Directory(#[from] DirectoryError),

    #[error(transparent)]
    Rollout(#[from] RolloutError),

    #[error(transparent)]
    Migration(#[from] MigrationError),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("audit error: {0}")]
    Audit(#[from] AuditError),

    #[error(transparent)]
    Anomaly(#[from] AnomalyError),
}
