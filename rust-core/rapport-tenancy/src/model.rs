// SPDX-License-Identifier: PMPL-1.0-or-later
//! Directory records: tenants, principals and the administrator roster.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{PrincipalId, TenantId};

/// A tenant record.
///
/// Tenants are never physically removed; `deleted` is a soft-delete flag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tenant {
    pub id: TenantId,
    /// Display name
    pub name: String,
    /// Soft-delete flag
    pub deleted: bool,
    pub created_at: DateTime<Utc>,
}

impl Tenant {
    pub fn new(id: TenantId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            deleted: false,
            created_at: Utc::now(),
        }
    }
}

/// A non-administrator user belonging to exactly one tenant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Principal {
    pub id: PrincipalId,
    pub email: String,
    /// Assigned tenant. Changed only by an administrator.
    pub tenant_id: TenantId,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Principal {
    pub fn new(id: PrincipalId, email: impl Into<String>, tenant_id: TenantId) -> Self {
        let now = Utc::now();
        Self {
            id,
            email: email.into(),
            tenant_id,
            active: true,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Elevated, tenant-unbounded privileges for one identity.
///
/// The roster is append-only: entries are deactivated, never removed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdminRosterEntry {
    pub identity: PrincipalId,
    /// Identity that granted the entry (`None` for the bootstrap grant)
    pub granted_by: Option<PrincipalId>,
    pub active: bool,
    pub granted_at: DateTime<Utc>,
    pub deactivated_at: Option<DateTime<Utc>>,
}

impl AdminRosterEntry {
    pub fn new(identity: PrincipalId, granted_by: Option<PrincipalId>) -> Self {
        Self {
            identity,
            granted_by,
            active: true,
            granted_at: Utc::now(),
            deactivated_at: None,
        }
    }
}

/// Tenant assignment of a principal as seen by the authorization layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Membership {
    pub tenant_id: TenantId,
    pub active: bool,
}

/// Partial principal update, applied as one change.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PrincipalPatch {
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub tenant_id: Option<TenantId>,
    #[serde(default)]
    pub active: Option<bool>,
}

impl PrincipalPatch {
    pub fn is_empty(&self) -> bool {
        self.email.is_none() && self.tenant_id.is_none() && self.active.is_none()
    }
}
