// SPDX-License-Identifier: PMPL-1.0-or-later
//! Per-row enforcement decisions.
//!
//! The repository resolves the tenant of each row (directly or through a
//! parent row) and asks a [`RowFilter`] whether the actor may see or
//! change it. Hidden rows are simply skipped: reads return fewer rows and
//! updates or deletes affect fewer rows, without an error.

use std::fmt;

use rapport_tenancy::{DirectoryView, PrincipalId, TenantId};
use serde::{Deserialize, Serialize};

use crate::decision::{AccessDecision, AccessRequest, DecisionReason};
use crate::predicate::AuthorizationPredicate;

/// Statement kinds a policy can be attached to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RowOperation {
    Select,
    Insert,
    Update,
    Delete,
}

impl RowOperation {
    pub const ALL: [RowOperation; 4] = [
        RowOperation::Select,
        RowOperation::Insert,
        RowOperation::Update,
        RowOperation::Delete,
    ];
}

impl fmt::Display for RowOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RowOperation::Select => write!(f, "select"),
            RowOperation::Insert => write!(f, "insert"),
            RowOperation::Update => write!(f, "update"),
            RowOperation::Delete => write!(f, "delete"),
        }
    }
}

/// Outcome of checking a row about to be inserted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InsertDecision {
    /// The row may be written with this tenant. `auto_populated` is set
    /// when the tenant was filled in from the actor's assignment.
    Allowed {
        tenant: TenantId,
        auto_populated: bool,
    },
    Denied(DecisionReason),
}

/// Row-level checks for one actor under one predicate.
pub struct RowFilter<'a> {
    predicate: &'a dyn AuthorizationPredicate,
    view: &'a dyn DirectoryView,
    actor: &'a PrincipalId,
}

impl<'a> RowFilter<'a> {
    pub fn new(
        predicate: &'a dyn AuthorizationPredicate,
        view: &'a dyn DirectoryView,
        actor: &'a PrincipalId,
    ) -> Self {
        Self {
            predicate,
            view,
            actor,
        }
    }

    fn decide(&self, tenant: Option<&TenantId>) -> AccessDecision {
        self.predicate
            .evaluate(self.view, self.actor, &AccessRequest::for_row(tenant.cloned()))
    }

    /// Read visibility of a row owned by `tenant`. Rows whose tenant cannot
    /// be resolved are visible to administrators only.
    pub fn can_read(&self, tenant: Option<&TenantId>) -> bool {
        self.decide(tenant).allowed
    }

    /// Validate the tenant of a new row, filling it from the actor's own
    /// assignment when omitted.
    pub fn prepare_insert(&self, requested: Option<&TenantId>) -> InsertDecision {
        let (tenant, auto_populated) = match requested {
            Some(t) => (t.clone(), false),
            None => match self.view.membership(self.actor) {
                Some(m) => (m.tenant_id, true),
                None => return InsertDecision::Denied(DecisionReason::NoTarget),
            },
        };

        let decision = self.decide(Some(&tenant));
        if decision.allowed {
            InsertDecision::Allowed {
                tenant,
                auto_populated,
            }
        } else {
            InsertDecision::Denied(decision.reason)
        }
    }

    /// Target selection uses read visibility of the current row, and the
    /// row after the update must still pass the tenant check. Returns the
    /// first denying decision, or the decision on the new tenant.
    pub fn check_update(
        &self,
        before: Option<&TenantId>,
        after: Option<&TenantId>,
    ) -> AccessDecision {
        let current = self.decide(before);
        if !current.allowed {
            return current;
        }
        self.decide(after)
    }

    pub fn can_update(&self, before: Option<&TenantId>, after: Option<&TenantId>) -> bool {
        self.check_update(before, after).allowed
    }

    pub fn can_delete(&self, tenant: Option<&TenantId>) -> bool {
        self.decide(tenant).allowed
    }

    /// Whether an existing row is a target of `operation`.
    pub fn can_target(&self, operation: RowOperation, tenant: Option<&TenantId>) -> bool {
        match operation {
            RowOperation::Delete => self.can_delete(tenant),
            _ => self.can_read(tenant),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::predicate::TenantPredicate;
    use rapport_tenancy::{ActorContext, Directory};

    async fn directory() -> Directory {
        let directory = Directory::new();
        directory.bootstrap_admin(PrincipalId::new("root")).await.unwrap();
        let admin = ActorContext::new("root");
        for t in ["T1", "T2"] {
            directory
                .create_tenant(&admin, TenantId::new(t), t)
                .await
                .unwrap();
        }
        directory
            .register_principal(&admin, PrincipalId::new("u1"), "u1@t1.test", TenantId::new("T1"))
            .await
            .unwrap();
        directory
    }

    #[tokio::test]
    async fn test_insert_auto_populates_tenant() {
        let directory = directory().await;
        let state = directory.read().await;
        let actor = PrincipalId::new("u1");
        let filter = RowFilter::new(&TenantPredicate, &*state, &actor);

        assert_eq!(
            filter.prepare_insert(None),
            InsertDecision::Allowed {
                tenant: TenantId::new("T1"),
                auto_populated: true
            }
        );
        assert_eq!(
            filter.prepare_insert(Some(&TenantId::new("T2"))),
            InsertDecision::Denied(DecisionReason::TenantMismatch)
        );
    }

    #[tokio::test]
    async fn test_admin_without_principal_must_name_tenant() {
        let directory = directory().await;
        let state = directory.read().await;
        let actor = PrincipalId::new("root");
        let filter = RowFilter::new(&TenantPredicate, &*state, &actor);

        assert_eq!(
            filter.prepare_insert(None),
            InsertDecision::Denied(DecisionReason::NoTarget)
        );
        assert!(matches!(
            filter.prepare_insert(Some(&TenantId::new("T2"))),
            InsertDecision::Allowed { auto_populated: false, .. }
        ));
    }

    #[tokio::test]
    async fn test_update_with_check() {
        let directory = directory().await;
        let state = directory.read().await;
        let actor = PrincipalId::new("u1");
        let filter = RowFilter::new(&TenantPredicate, &*state, &actor);
        let t1 = TenantId::new("T1");
        let t2 = TenantId::new("T2");

        assert!(filter.can_update(Some(&t1), Some(&t1)));
        assert!(!filter.can_update(Some(&t1), Some(&t2)));
        assert!(!filter.can_update(Some(&t2), Some(&t2)));
        assert!(!filter.can_read(None));
        assert!(filter.can_delete(Some(&t1)));
        assert_eq!(
            filter.check_update(Some(&t1), Some(&t2)).reason,
            DecisionReason::TenantMismatch
        );
        assert!(filter.can_target(RowOperation::Update, Some(&t1)));
        assert!(!filter.can_target(RowOperation::Delete, Some(&t2)));
    }
}
