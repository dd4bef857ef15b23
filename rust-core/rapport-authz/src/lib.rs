// SPDX-License-Identifier: PMPL-1.0-or-later
//! Rapport Authz
//!
//! Authorization for the multi-tenant relationship store:
//!
//! - [`predicate`]: the pure tenant-isolation rules, in two generations.
//! - [`row_filter`]: per-row visibility and insert validation.
//! - [`guard`]: statement-level mutation guards.
//! - [`rollout`]: switchover between rule generations, with a policy catalog.
//! - [`mirror`]: the application-tier copy of the checks, with denial logging.

pub mod decision;
pub mod error;
pub mod guard;
pub mod mirror;
pub mod predicate;
pub mod rollout;
pub mod row_filter;

pub use decision::{AccessDecision, AccessRequest, DecisionReason};
pub use error::{AuthzError, GuardError, RolloutError};
pub use guard::{AuditImmutabilityGuard, GuardChain, GuardContext, MutationGuard, TenantTransferGuard};
pub use mirror::{AccessMirror, SecurityEvent, SecurityEventKind, SecurityEventSink, SessionState};
pub use predicate::{
    AuthorizationPredicate, DisabledPredicate, LegacyTenantPredicate, PolicyGeneration,
    TenantPredicate,
};
pub use rollout::{tenant_policies, PolicyCatalog, PolicyEntry, PolicyRollout, RolloutState, RolloutTransition};
pub use row_filter::{InsertDecision, RowFilter, RowOperation};
