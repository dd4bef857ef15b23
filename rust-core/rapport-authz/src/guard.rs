// SPDX-License-Identifier: PMPL-1.0-or-later
//! Statement-level mutation guards.
//!
//! Guards run before a row write is applied and fail the whole statement;
//! unlike row filtering they raise an error instead of hiding rows.

use std::collections::HashSet;

use rapport_tenancy::TenantId;
use tracing::warn;

use crate::error::GuardError;
use crate::row_filter::RowOperation;

/// Facts about one pending row write.
#[derive(Debug, Clone, Copy)]
pub struct GuardContext<'a> {
    pub table: &'a str,
    pub operation: RowOperation,
    pub actor_is_admin: bool,
    /// Tenant reference before the write
    pub old_tenant: Option<&'a TenantId>,
    /// Tenant reference after the write
    pub new_tenant: Option<&'a TenantId>,
}

pub trait MutationGuard: Send + Sync {
    fn name(&self) -> &'static str;

    fn applies_to(&self, table: &str, operation: RowOperation) -> bool;

    fn check(&self, ctx: &GuardContext<'_>) -> Result<(), GuardError>;
}

/// Blocks non-administrators from changing a row's tenant reference.
#[derive(Debug, Clone, Default)]
pub struct TenantTransferGuard {
    tables: HashSet<String>,
}

impl TenantTransferGuard {
    pub fn new<I, S>(tables: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            tables: tables.into_iter().map(Into::into).collect(),
        }
    }
}

impl MutationGuard for TenantTransferGuard {
    fn name(&self) -> &'static str {
        "tenant_transfer"
    }

    fn applies_to(&self, table: &str, operation: RowOperation) -> bool {
        operation == RowOperation::Update && self.tables.contains(table)
    }

    fn check(&self, ctx: &GuardContext<'_>) -> Result<(), GuardError> {
        if !ctx.actor_is_admin && ctx.old_tenant != ctx.new_tenant {
            warn!(
                table = ctx.table,
                from = ?ctx.old_tenant.map(TenantId::as_str),
                to = ?ctx.new_tenant.map(TenantId::as_str),
                "Blocked cross-tenant transfer"
            );
            return Err(GuardError::CrossTenantTransfer);
        }
        Ok(())
    }
}

/// Rejects every update and delete on the audit table, administrators
/// included.
#[derive(Debug, Clone)]
pub struct AuditImmutabilityGuard {
    table: String,
}

impl AuditImmutabilityGuard {
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
        }
    }
}

impl MutationGuard for AuditImmutabilityGuard {
    fn name(&self) -> &'static str {
        "audit_immutability"
    }

    fn applies_to(&self, table: &str, operation: RowOperation) -> bool {
        table == self.table && matches!(operation, RowOperation::Update | RowOperation::Delete)
    }

    fn check(&self, ctx: &GuardContext<'_>) -> Result<(), GuardError> {
        warn!(table = ctx.table, operation = %ctx.operation, "Blocked audit tamper attempt");
        Err(GuardError::AuditTamper)
    }
}

/// Ordered set of guards run against every pending write.
#[derive(Default)]
pub struct GuardChain {
    guards: Vec<Box<dyn MutationGuard>>,
}

impl GuardChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, guard: impl MutationGuard + 'static) -> Self {
        self.guards.push(Box::new(guard));
        self
    }

    pub fn len(&self) -> usize {
        self.guards.len()
    }

    pub fn is_empty(&self) -> bool {
        self.guards.is_empty()
    }

    /// Run every applicable guard; the first failure wins.
    pub fn check(&self, ctx: &GuardContext<'_>) -> Result<(), GuardError> {
        self.guards
            .iter()
            .filter(|g| g.applies_to(ctx.table, ctx.operation))
            .try_for_each(|g| g.check(ctx))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chain() -> GuardChain {
        GuardChain::new()
            .with(TenantTransferGuard::new(["contacts", "organizations"]))
            .with(AuditImmutabilityGuard::new("audit_log"))
    }

    fn ctx<'a>(
        table: &'a str,
        operation: RowOperation,
        admin: bool,
        old: Option<&'a TenantId>,
        new: Option<&'a TenantId>,
    ) -> GuardContext<'a> {
        GuardContext {
            table,
            operation,
            actor_is_admin: admin,
            old_tenant: old,
            new_tenant: new,
        }
    }

    #[test]
    fn test_transfer_blocked_for_non_admin() {
        let (t1, t2) = (TenantId::new("T1"), TenantId::new("T2"));
        let chain = chain();
        assert_eq!(
            chain.check(&ctx("contacts", RowOperation::Update, false, Some(&t1), Some(&t2))),
            Err(GuardError::CrossTenantTransfer)
        );
        assert!(chain
            .check(&ctx("contacts", RowOperation::Update, false, Some(&t1), Some(&t1)))
            .is_ok());
        assert!(chain
            .check(&ctx("contacts", RowOperation::Update, true, Some(&t1), Some(&t2)))
            .is_ok());
    }

    #[test]
    fn test_audit_guard_has_no_admin_bypass() {
        let chain = chain();
        for op in [RowOperation::Update, RowOperation::Delete] {
            assert_eq!(
                chain.check(&ctx("audit_log", op, true, None, None)),
                Err(GuardError::AuditTamper)
            );
        }
        assert!(chain
            .check(&ctx("audit_log", RowOperation::Insert, false, None, None))
            .is_ok());
    }

    #[test]
    fn test_unguarded_table_passes() {
        let (t1, t2) = (TenantId::new("T1"), TenantId::new("T2"));
        assert!(chain()
            .check(&ctx("scratch", RowOperation::Update, false, Some(&t1), Some(&t2)))
            .is_ok());
    }
}
