// SPDX-License-Identifier: PMPL-1.0-or-later
//! Authorization, guard and rollout errors.

use thiserror::Error;

use crate::decision::DecisionReason;
use crate::predicate::PolicyGeneration;

/// Statement-level failures raised by mutation guards.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum GuardError {
    /// A non-administrator tried to change a row's tenant reference.
    #[error("Unauthorized: cross-tenant transfer")]
    CrossTenantTransfer,

    /// Any update or delete against the audit log.
    #[error("cannot modify/delete audit records")]
    AuditTamper,
}

/// Errors surfaced by authorization checks.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthzError {
    /// Denied by the application-layer mirror.
    #[error("Unauthorized: you don't have permission to {operation} for this client")]
    Unauthorized {
        operation: String,
        reason: DecisionReason,
    },

    /// An inserted row failed the tenant check.
    #[error("new row violates row-level security policy for table \"{table}\" ({reason})")]
    RowSecurityViolation {
        table: String,
        reason: DecisionReason,
    },

    #[error(transparent)]
    Guard(#[from] GuardError),
}

/// Errors raised by policy rollout transitions.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RolloutError {
    #[error("policy generation {0} is already active")]
    AlreadyActive(PolicyGeneration),

    #[error("no {0} policies are installed")]
    PoliciesNotInstalled(PolicyGeneration),

    #[error("unknown policy generation: '{0}'")]
    UnknownGeneration(String),
}
