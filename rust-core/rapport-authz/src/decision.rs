// SPDX-License-Identifier: PMPL-1.0-or-later
//! Access requests and decisions.

use rapport_tenancy::{PrincipalId, TenantId};
use serde::{Deserialize, Serialize};
use std::fmt;

/// What an actor is trying to reach.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessRequest {
    /// Tenant owning the target row
    pub target_tenant: Option<TenantId>,
    /// Principal owning the target row (profile rows)
    pub target_principal: Option<PrincipalId>,
    /// Operation restricted to administrators
    pub require_admin: bool,
}

impl AccessRequest {
    pub fn tenant(tenant: TenantId) -> Self {
        Self {
            target_tenant: Some(tenant),
            ..Self::default()
        }
    }

    pub fn principal(principal: PrincipalId) -> Self {
        Self {
            target_principal: Some(principal),
            ..Self::default()
        }
    }

    pub fn admin_only() -> Self {
        Self {
            require_admin: true,
            ..Self::default()
        }
    }

    /// Request for a row whose tenant may be unresolvable.
    pub fn for_row(tenant: Option<TenantId>) -> Self {
        Self {
            target_tenant: tenant,
            ..Self::default()
        }
    }
}

/// Machine-readable reason attached to every decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionReason {
    /// Administrator-only request from a non-administrator
    AdminRequired,
    /// Active administrator, no tenant boundary
    AdminBypass,
    /// Actor is the target principal
    SelfOwnership,
    /// Target principal is someone else
    NotOwner,
    /// Target tenant equals the actor's tenant
    TenantMatch,
    TenantMismatch,
    /// Actor's principal record is deactivated
    InactivePrincipal,
    /// Actor has no principal record and is not an administrator
    UnknownPrincipal,
    /// Nothing to match against
    NoTarget,
    /// Policy installed but not active
    PolicyDisabled,
}

impl fmt::Display for DecisionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DecisionReason::AdminRequired => "admin_required",
            DecisionReason::AdminBypass => "admin_bypass",
            DecisionReason::SelfOwnership => "self_ownership",
            DecisionReason::NotOwner => "not_owner",
            DecisionReason::TenantMatch => "tenant_match",
            DecisionReason::TenantMismatch => "tenant_mismatch",
            DecisionReason::InactivePrincipal => "inactive_principal",
            DecisionReason::UnknownPrincipal => "unknown_principal",
            DecisionReason::NoTarget => "no_target",
            DecisionReason::PolicyDisabled => "policy_disabled",
        };
        f.write_str(s)
    }
}

/// Outcome of evaluating a predicate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessDecision {
    pub allowed: bool,
    pub reason: DecisionReason,
}

impl AccessDecision {
    pub fn allow(reason: DecisionReason) -> Self {
        Self {
            allowed: true,
            reason,
        }
    }

    pub fn deny(reason: DecisionReason) -> Self {
        Self {
            allowed: false,
            reason,
        }
    }

    pub fn is_allowed(&self) -> bool {
        self.allowed
    }
}
