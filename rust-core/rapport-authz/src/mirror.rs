// SPDX-License-Identifier: PMPL-1.0-or-later
//! Application-layer mirror of the authorization predicates.
//!
//! The application tier evaluates the same predicate the data-access layer
//! enforces, but against cached [`SessionState`] instead of the live
//! directory. A denial is reported to a [`SecurityEventSink`] and surfaces
//! as [`AuthzError::Unauthorized`] so callers get an explicit error
//! instead of an empty result.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use prometheus::{IntCounter, Registry};
use rapport_tenancy::{ActorContext, DirectoryView, Membership, PrincipalId, TenantId};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::decision::{AccessDecision, AccessRequest, DecisionReason};
use crate::error::AuthzError;
use crate::predicate::AuthorizationPredicate;

// ---------------------------------------------------------------------------
// Session state
// ---------------------------------------------------------------------------

/// Per-session snapshot of the actor's directory facts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionState {
    pub actor_id: PrincipalId,
    /// Cached tenant assignment
    pub tenant_id: Option<TenantId>,
    /// Cached principal active flag
    pub active: bool,
    /// Cached administrator flag
    pub is_admin: bool,
}

impl SessionState {
    /// Capture the actor's current facts from a directory view.
    pub fn capture(view: &dyn DirectoryView, actor: &PrincipalId) -> Self {
        let membership = view.membership(actor);
        Self {
            actor_id: actor.clone(),
            active: membership.as_ref().map(|m| m.active).unwrap_or(false),
            tenant_id: membership.map(|m| m.tenant_id),
            is_admin: view.is_active_admin(actor),
        }
    }
}

impl DirectoryView for SessionState {
    fn is_active_admin(&self, identity: &PrincipalId) -> bool {
        identity == &self.actor_id && self.is_admin
    }

    fn membership(&self, principal: &PrincipalId) -> Option<Membership> {
        if principal != &self.actor_id {
            return None;
        }
        self.tenant_id.clone().map(|tenant_id| Membership {
            tenant_id,
            active: self.active,
        })
    }
}

// ---------------------------------------------------------------------------
// Security events
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SecurityEventKind {
    AccessDenied,
}

/// A denied access attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SecurityEvent {
    pub kind: SecurityEventKind,
    pub actor_id: PrincipalId,
    pub target_tenant: Option<TenantId>,
    /// Operation label, e.g. `update contacts`
    pub operation: String,
    pub reason: DecisionReason,
    pub purpose: Option<String>,
    pub metadata: serde_json::Value,
    pub occurred_at: DateTime<Utc>,
}

/// Receives security events. Must not fail the caller.
#[async_trait]
pub trait SecurityEventSink: Send + Sync {
    async fn record_security_event(&self, event: SecurityEvent);
}

// ---------------------------------------------------------------------------
// Mirror
// ---------------------------------------------------------------------------

#[derive(Clone, Default)]
pub struct AccessMirror {
    sink: Option<Arc<dyn SecurityEventSink>>,
    denials: Option<IntCounter>,
}

impl AccessMirror {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_sink(mut self, sink: Arc<dyn SecurityEventSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Count denials in `registry`.
    pub fn with_prometheus(mut self, registry: &Registry) -> Result<Self, prometheus::Error> {
        let counter = IntCounter::new(
            "rapport_mirror_denials_total",
            "Requests denied by the application-layer authorization mirror",
        )?;
        registry.register(Box::new(counter.clone()))?;
        self.denials = Some(counter);
        Ok(self)
    }

    /// Evaluate `request` for the session's actor.
    ///
    /// `operation` is the human-readable label used in the error message
    /// and the security event.
    pub async fn check(
        &self,
        predicate: &dyn AuthorizationPredicate,
        session: &SessionState,
        ctx: &ActorContext,
        request: &AccessRequest,
        operation: &str,
    ) -> Result<AccessDecision, AuthzError> {
        let decision = predicate.evaluate(session, &session.actor_id, request);
        if decision.allowed {
            debug!(actor = %session.actor_id, operation, reason = %decision.reason, "Mirror allowed");
            return Ok(decision);
        }

        warn!(
            actor = %session.actor_id,
            operation,
            reason = %decision.reason,
            target_tenant = ?request.target_tenant.as_ref().map(TenantId::as_str),
            "Mirror denied access"
        );

        if let Some(counter) = &self.denials {
            counter.inc();
        }

        if let Some(sink) = &self.sink {
            sink.record_security_event(SecurityEvent {
                kind: SecurityEventKind::AccessDenied,
                actor_id: session.actor_id.clone(),
                target_tenant: request.target_tenant.clone(),
                operation: operation.to_string(),
                reason: decision.reason,
                purpose: ctx.purpose.clone(),
                metadata: serde_json::json!({
                    "reason": decision.reason,
                    "require_admin": request.require_admin,
                    "request_id": ctx.request_id,
                }),
                occurred_at: Utc::now(),
            })
            .await;
        }

        Err(AuthzError::Unauthorized {
            operation: operation.to_string(),
            reason: decision.reason,
        })
    }
}
