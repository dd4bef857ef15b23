// SPDX-License-Identifier: PMPL-1.0-or-later
//! Property-based tests for tenant predicates and row filtering

use std::collections::{HashMap, HashSet};

use proptest::prelude::*;
use rapport_authz::{
    AccessRequest, AuthorizationPredicate, DecisionReason, InsertDecision,
    LegacyTenantPredicate, RowFilter, TenantPredicate,
};
use rapport_tenancy::{DirectoryView, Membership, PrincipalId, TenantId};

#[derive(Debug, Clone, Default)]
struct StaticView {
    admins: HashSet<PrincipalId>,
    members: HashMap<PrincipalId, Membership>,
}

impl DirectoryView for StaticView {
    fn is_active_admin(&self, identity: &PrincipalId) -> bool {
        self.admins.contains(identity)
    }

    fn membership(&self, principal: &PrincipalId) -> Option<Membership> {
        self.members.get(principal).cloned()
    }
}

/// Small id alphabet so generated actors and tenants collide often.
fn arb_tenant() -> impl Strategy<Value = TenantId> {
    "t[0-3]".prop_map(|s| TenantId::new(s.as_str()))
}

fn arb_principal() -> impl Strategy<Value = PrincipalId> {
    "p[0-3]".prop_map(|s| PrincipalId::new(s.as_str()))
}

fn arb_view() -> impl Strategy<Value = StaticView> {
    (
        prop::collection::hash_set(arb_principal(), 0..2),
        prop::collection::hash_map(arb_principal(), (arb_tenant(), any::<bool>()), 0..4),
    )
        .prop_map(|(admins, members)| StaticView {
            admins,
            members: members
                .into_iter()
                .map(|(p, (tenant_id, active))| (p, Membership { tenant_id, active }))
                .collect(),
        })
}

fn predicates() -> [Box<dyn AuthorizationPredicate>; 2] {
    [Box::new(LegacyTenantPredicate), Box::new(TenantPredicate)]
}

proptest! {
    #[test]
    fn test_evaluation_is_deterministic(
        view in arb_view(),
        actor in arb_principal(),
        tenant in prop::option::of(arb_tenant()),
    ) {
        let request = AccessRequest::for_row(tenant);
        for predicate in predicates() {
            let first = predicate.evaluate(&view, &actor, &request);
            let second = predicate.evaluate(&view, &actor, &request);
            prop_assert_eq!(first, second);
        }
    }

    #[test]
    fn test_active_admin_sees_every_row(
        view in arb_view(),
        actor in arb_principal(),
        tenant in prop::option::of(arb_tenant()),
    ) {
        let mut view = view;
        view.admins.insert(actor.clone());
        for predicate in predicates() {
            let decision = predicate.evaluate(&view, &actor, &AccessRequest::for_row(tenant.clone()));
            prop_assert!(decision.allowed);
            prop_assert_eq!(decision.reason, DecisionReason::AdminBypass);
        }
    }

    #[test]
    fn test_non_admin_reads_only_own_tenant(
        view in arb_view(),
        actor in arb_principal(),
        tenant in prop::option::of(arb_tenant()),
    ) {
        prop_assume!(!view.admins.contains(&actor));
        let decision =
            TenantPredicate.evaluate(&view, &actor, &AccessRequest::for_row(tenant.clone()));
        let own = view.tenant_of(&actor);
        prop_assert_eq!(decision.allowed, tenant.is_some() && tenant == own);
    }

    #[test]
    fn test_with_check_keeps_rows_inside_tenant(
        view in arb_view(),
        actor in arb_principal(),
        before in prop::option::of(arb_tenant()),
        after in prop::option::of(arb_tenant()),
    ) {
        prop_assume!(!view.admins.contains(&actor));
        let filter = RowFilter::new(&TenantPredicate, &view, &actor);
        if filter.can_update(before.as_ref(), after.as_ref()) {
            let own = view.tenant_of(&actor);
            prop_assert!(own.is_some());
            prop_assert_eq!(&before, &own);
            prop_assert_eq!(&after, &own);
        }
    }

    #[test]
    fn test_insert_never_lands_in_foreign_tenant(
        view in arb_view(),
        actor in arb_principal(),
        requested in prop::option::of(arb_tenant()),
    ) {
        prop_assume!(!view.admins.contains(&actor));
        let filter = RowFilter::new(&TenantPredicate, &view, &actor);
        if let InsertDecision::Allowed { tenant, auto_populated } =
            filter.prepare_insert(requested.as_ref())
        {
            prop_assert_eq!(Some(tenant), view.tenant_of(&actor));
            prop_assert_eq!(auto_populated, requested.is_none());
        }
    }
}
