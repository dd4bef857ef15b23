// SPDX-License-Identifier: PMPL-1.0-or-later
//! Authorization predicates.
//!
//! A predicate decides whether an actor may reach a target, using only
//! lookups from a [`DirectoryView`]. Predicates are pure: the same
//! directory contents and request always yield the same decision.
//!
//! Two generations exist side by side so that policy rollout can swap
//! them at runtime:
//!
//! - [`LegacyTenantPredicate`] (v1): tenant match by assignment only.
//! - [`TenantPredicate`] (v2): adds the self-ownership rule and requires
//!   the actor's principal record to be active.

use std::fmt;
use std::str::FromStr;

use rapport_tenancy::{DirectoryView, PrincipalId};
use serde::{Deserialize, Serialize};

use crate::decision::{AccessDecision, AccessRequest, DecisionReason};
use crate::error::RolloutError;

/// Rule-set generation of a predicate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PolicyGeneration {
    V1,
    V2,
}

impl fmt::Display for PolicyGeneration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PolicyGeneration::V1 => write!(f, "v1"),
            PolicyGeneration::V2 => write!(f, "v2"),
        }
    }
}

impl FromStr for PolicyGeneration {
    type Err = RolloutError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "v1" | "1" => Ok(PolicyGeneration::V1),
            "v2" | "2" => Ok(PolicyGeneration::V2),
            other => Err(RolloutError::UnknownGeneration(other.to_string())),
        }
    }
}

/// Decides access for one actor and one request.
pub trait AuthorizationPredicate: Send + Sync + fmt::Debug {
    fn generation(&self) -> PolicyGeneration;

    fn evaluate(
        &self,
        view: &dyn DirectoryView,
        actor: &PrincipalId,
        request: &AccessRequest,
    ) -> AccessDecision;
}

/// Current rule set.
///
/// Evaluated in order:
/// 1. administrator-only request from a non-administrator: deny
/// 2. active administrator: allow
/// 3. target principal given: allow iff it is the actor
/// 4. target tenant given: allow iff it is the tenant of the actor's
///    active principal record
/// 5. deny
#[derive(Debug, Clone, Copy, Default)]
pub struct TenantPredicate;

impl AuthorizationPredicate for TenantPredicate {
    fn generation(&self) -> PolicyGeneration {
        PolicyGeneration::V2
    }

    fn evaluate(
        &self,
        view: &dyn DirectoryView,
        actor: &PrincipalId,
        request: &AccessRequest,
    ) -> AccessDecision {
        let is_admin = view.is_active_admin(actor);
        if request.require_admin && !is_admin {
            return AccessDecision::deny(DecisionReason::AdminRequired);
        }
        if is_admin {
            return AccessDecision::allow(DecisionReason::AdminBypass);
        }

        if let Some(principal) = &request.target_principal {
            return if principal == actor {
                AccessDecision::allow(DecisionReason::SelfOwnership)
            } else {
                AccessDecision::deny(DecisionReason::NotOwner)
            };
        }

        match &request.target_tenant {
            Some(target) => match view.membership(actor) {
                None => AccessDecision::deny(DecisionReason::UnknownPrincipal),
                Some(m) if !m.active => AccessDecision::deny(DecisionReason::InactivePrincipal),
                Some(m) if &m.tenant_id == target => {
                    AccessDecision::allow(DecisionReason::TenantMatch)
                }
                Some(_) => AccessDecision::deny(DecisionReason::TenantMismatch),
            },
            None => AccessDecision::deny(DecisionReason::NoTarget),
        }
    }
}

/// First-generation rule set.
///
/// Matches tenants by assignment without looking at the principal's
/// active flag, and has no self-ownership rule.
#[derive(Debug, Clone, Copy, Default)]
pub struct LegacyTenantPredicate;

impl AuthorizationPredicate for LegacyTenantPredicate {
    fn generation(&self) -> PolicyGeneration {
        PolicyGeneration::V1
    }

    fn evaluate(
        &self,
        view: &dyn DirectoryView,
        actor: &PrincipalId,
        request: &AccessRequest,
    ) -> AccessDecision {
        let is_admin = view.is_active_admin(actor);
        if request.require_admin && !is_admin {
            return AccessDecision::deny(DecisionReason::AdminRequired);
        }
        if is_admin {
            return AccessDecision::allow(DecisionReason::AdminBypass);
        }

        match &request.target_tenant {
            Some(target) => match view.membership(actor) {
                None => AccessDecision::deny(DecisionReason::UnknownPrincipal),
                Some(m) if &m.tenant_id == target => {
                    AccessDecision::allow(DecisionReason::TenantMatch)
                }
                Some(_) => AccessDecision::deny(DecisionReason::TenantMismatch),
            },
            None => AccessDecision::deny(DecisionReason::NoTarget),
        }
    }
}

/// A predicate that is installed but not in effect. Denies everything.
#[derive(Debug, Clone, Copy)]
pub struct DisabledPredicate {
    pub generation: PolicyGeneration,
}

impl AuthorizationPredicate for DisabledPredicate {
    fn generation(&self) -> PolicyGeneration {
        self.generation
    }

    fn evaluate(
        &self,
        _view: &dyn DirectoryView,
        _actor: &PrincipalId,
        _request: &AccessRequest,
    ) -> AccessDecision {
        AccessDecision::deny(DecisionReason::PolicyDisabled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rapport_tenancy::{Membership, TenantId};
    use std::collections::{HashMap, HashSet};

    #[derive(Default)]
    struct FakeView {
        admins: HashSet<PrincipalId>,
        members: HashMap<PrincipalId, Membership>,
    }

    impl FakeView {
        fn member(mut self, p: &str, t: &str, active: bool) -> Self {
            self.members.insert(
                PrincipalId::new(p),
                Membership {
                    tenant_id: TenantId::new(t),
                    active,
                },
            );
            self
        }

        fn admin(mut self, p: &str) -> Self {
            self.admins.insert(PrincipalId::new(p));
            self
        }
    }

    impl DirectoryView for FakeView {
        fn is_active_admin(&self, identity: &PrincipalId) -> bool {
            self.admins.contains(identity)
        }

        fn membership(&self, principal: &PrincipalId) -> Option<Membership> {
            self.members.get(principal).cloned()
        }
    }

    fn view() -> FakeView {
        FakeView::default()
            .member("u1", "T1", true)
            .member("u2", "T2", true)
            .member("gone", "T1", false)
            .admin("root")
    }

    #[test]
    fn test_tenant_match_and_mismatch() {
        let v = view();
        let p = TenantPredicate;
        let actor = PrincipalId::new("u1");

        let same = p.evaluate(&v, &actor, &AccessRequest::tenant(TenantId::new("T1")));
        assert_eq!(same, AccessDecision::allow(DecisionReason::TenantMatch));

        let other = p.evaluate(&v, &actor, &AccessRequest::tenant(TenantId::new("T2")));
        assert_eq!(other, AccessDecision::deny(DecisionReason::TenantMismatch));
    }

    #[test]
    fn test_admin_bypass_without_principal_record() {
        let v = view();
        let decision = TenantPredicate.evaluate(
            &v,
            &PrincipalId::new("root"),
            &AccessRequest::tenant(TenantId::new("T2")),
        );
        assert_eq!(decision, AccessDecision::allow(DecisionReason::AdminBypass));
    }

    #[test]
    fn test_require_admin_checked_first() {
        let v = view();
        let decision = TenantPredicate.evaluate(
            &v,
            &PrincipalId::new("u1"),
            &AccessRequest {
                target_tenant: Some(TenantId::new("T1")),
                target_principal: None,
                require_admin: true,
            },
        );
        assert_eq!(decision.reason, DecisionReason::AdminRequired);
        assert!(!decision.allowed);
    }

    #[test]
    fn test_self_ownership() {
        let v = view();
        let actor = PrincipalId::new("u1");
        assert!(TenantPredicate
            .evaluate(&v, &actor, &AccessRequest::principal(PrincipalId::new("u1")))
            .allowed);
        let other =
            TenantPredicate.evaluate(&v, &actor, &AccessRequest::principal(PrincipalId::new("u2")));
        assert_eq!(other.reason, DecisionReason::NotOwner);
    }

    #[test]
    fn test_inactive_and_unknown() {
        let v = view();
        let req = AccessRequest::tenant(TenantId::new("T1"));
        assert_eq!(
            TenantPredicate.evaluate(&v, &PrincipalId::new("gone"), &req).reason,
            DecisionReason::InactivePrincipal
        );
        assert_eq!(
            TenantPredicate.evaluate(&v, &PrincipalId::new("nobody"), &req).reason,
            DecisionReason::UnknownPrincipal
        );
        assert_eq!(
            TenantPredicate
                .evaluate(&v, &PrincipalId::new("u1"), &AccessRequest::default())
                .reason,
            DecisionReason::NoTarget
        );
    }

    #[test]
    fn test_legacy_ignores_active_flag_and_ownership() {
        let v = view();
        let req = AccessRequest::tenant(TenantId::new("T1"));
        assert!(LegacyTenantPredicate
            .evaluate(&v, &PrincipalId::new("gone"), &req)
            .allowed);

        let own = LegacyTenantPredicate.evaluate(
            &v,
            &PrincipalId::new("u1"),
            &AccessRequest::principal(PrincipalId::new("u1")),
        );
        assert_eq!(own, AccessDecision::deny(DecisionReason::NoTarget));
    }

    #[test]
    fn test_disabled_denies_admins_too() {
        let v = view();
        let p = DisabledPredicate {
            generation: PolicyGeneration::V2,
        };
        let d = p.evaluate(&v, &PrincipalId::new("root"), &AccessRequest::tenant(TenantId::new("T1")));
        assert_eq!(d, AccessDecision::deny(DecisionReason::PolicyDisabled));
    }

    #[test]
    fn test_generation_parse() {
        assert_eq!("v2".parse::<PolicyGeneration>().unwrap(), PolicyGeneration::V2);
        assert_eq!(" V1 ".parse::<PolicyGeneration>().unwrap(), PolicyGeneration::V1);
        assert!("v3".parse::<PolicyGeneration>().is_err());
    }
}
