// SPDX-License-Identifier: PMPL-1.0-or-later
//! Rapport Tenancy
//!
//! Tenant/User Directory for the multi-tenant relationship store: tenant
//! records, principal-to-tenant assignment and the append-only
//! administrator roster, plus the explicit [`ActorContext`] that is passed
//! through every authorization and audit call.

pub mod change;
pub mod context;
pub mod directory;
pub mod error;
pub mod ids;
pub mod model;

pub use change::{DirectoryChange, DirectoryObserver, MutationKind};
pub use context::{ActorContext, SYSTEM_ACTOR};
pub use directory::{
    Directory, DirectoryState, DirectoryView, ADMIN_ROSTER_TABLE, TENANTS_TABLE, USERS_TABLE,
};
pub use error::DirectoryError;
pub use ids::{PrincipalId, TenantId};
pub use model::{AdminRosterEntry, Membership, Principal, PrincipalPatch, Tenant};
