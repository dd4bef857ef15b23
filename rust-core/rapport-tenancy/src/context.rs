// SPDX-License-Identifier: PMPL-1.0-or-later
//! Explicit request/actor context passed through every call.

use serde::{Deserialize, Serialize};

use crate::ids::PrincipalId;

/// Identity of the service account used by migrations and ops tooling.
pub const SYSTEM_ACTOR: &str = "system";

/// Who is acting, and why.
///
/// Every predicate, repository call and audit write takes this context as
/// an argument instead of reading ambient session state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActorContext {
    /// The acting identity
    pub actor_id: PrincipalId,
    /// Free-text justification copied into every audit record written
    /// on behalf of this context
    pub purpose: Option<String>,
    /// Correlation id of the originating request, if any
    pub request_id: Option<String>,
}

impl ActorContext {
    pub fn new(actor_id: impl Into<PrincipalId>) -> Self {
        Self {
            actor_id: actor_id.into(),
            purpose: None,
            request_id: None,
        }
    }

    /// Context for migrations and operational tooling.
    pub fn system() -> Self {
        Self::new(SYSTEM_ACTOR)
    }

    /// Attach an operation purpose to subsequent audit writes.
    pub fn with_purpose(mut self, purpose: impl Into<String>) -> Self {
        self.purpose = Some(purpose.into());
        self
    }

    /// Replace the operation purpose in place.
    pub fn set_purpose(&mut self, purpose: Option<String>) {
        self.purpose = purpose;
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }
}
