// SPDX-License-Identifier: PMPL-1.0-or-later
//! API-key authentication.
//!
//! Every protected request carries an `X-API-Key` header. The key resolves
//! to a principal identity; the middleware then builds the explicit
//! [`ActorContext`] and captures the actor's [`SessionState`] from the
//! directory, and attaches both to the request as [`Authenticated`].
//!
//! An optional `X-Operation-Purpose` header is copied into the context and
//! ends up in every audit record the request writes.

use std::collections::HashMap;

use axum::{
    extract::{Request, State},
    http::{header, HeaderValue},
    middleware::Next,
    response::{IntoResponse, Response},
};
use rapport_authz::SessionState;
use rapport_tenancy::{ActorContext, PrincipalId};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::ApiKeyBinding;
use crate::{ApiError, AppState};

pub const API_KEY_HEADER: &str = "x-api-key";
pub const PURPOSE_HEADER: &str = "x-operation-purpose";

/// Registered API key. Only the hash is kept.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiKeyEntry {
    pub key_hash: String,
    /// Identity the key authenticates as
    pub identity: PrincipalId,
    pub label: String,
}

/// Key hash to entry. Built once at startup.
#[derive(Debug, Clone, Default)]
pub struct ApiKeyRegistry {
    keys: HashMap<String, ApiKeyEntry>,
}

impl ApiKeyRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_bindings(bindings: &[ApiKeyBinding]) -> Self {
        let mut registry = Self::new();
        for binding in bindings {
            registry.register(&binding.key, PrincipalId::new(binding.identity.as_str()));
        }
        registry
    }

    /// Register a key. A repeated key is rebound to the new identity.
    pub fn register(&mut self, plaintext_key: &str, identity: PrincipalId) {
        let key_hash = hash_key(plaintext_key);
        let entry = ApiKeyEntry {
            key_hash: key_hash.clone(),
            label: key_hash[..8].to_string(),
            identity,
        };
        self.keys.insert(key_hash, entry);
    }

    pub fn validate(&self, plaintext_key: &str) -> Option<&ApiKeyEntry> {
        self.keys.get(&hash_key(plaintext_key))
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

/// Who made the request. Inserted into request extensions by
/// [`auth_middleware`].
#[derive(Debug, Clone)]
pub struct Authenticated {
    pub ctx: ActorContext,
    pub session: SessionState,
}

/// SHA-256 of the key, hex encoded.
pub fn hash_key(key: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(key.as_bytes());
    hex::encode(hasher.finalize())
}

fn unauthenticated(message: &str) -> Response {
    let mut response = ApiError::Unauthenticated(message.to_string()).into_response();
    response
        .headers_mut()
        .insert(header::WWW_AUTHENTICATE, HeaderValue::from_static("ApiKey"));
    response
}

/// Resolve the API key and attach [`Authenticated`] to the request.
pub async fn auth_middleware(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Response {
    let Some(api_key) = request
        .headers()
        .get(API_KEY_HEADER)
        .and_then(|v| v.to_str().ok())
    else {
        return unauthenticated("Authentication required. Provide X-API-Key header");
    };

    let Some(entry) = state.keys.validate(api_key) else {
        warn!(path = %request.uri().path(), "Invalid API key");
        return unauthenticated("Invalid API key");
    };

    let purpose = request
        .headers()
        .get(PURPOSE_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(str::to_string);

    let mut ctx =
        ActorContext::new(entry.identity.clone()).with_request_id(Uuid::new_v4().to_string());
    ctx.set_purpose(purpose);

    let session = {
        let directory = state.repository.directory().read().await;
        SessionState::capture(&*directory, &ctx.actor_id)
    };
    debug!(
        actor = %ctx.actor_id,
        admin = session.is_admin,
        tenant = ?session.tenant_id.as_ref().map(|t| t.as_str()),
        "Request authenticated"
    );

    request.extensions_mut().insert(Authenticated { ctx, session });
    next.run(request).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_key_deterministic() {
        let h1 = hash_key("test-key-123");
        let h2 = hash_key("test-key-123");
        assert_eq!(h1, h2);
        assert_eq!(h1.len(), 64);
        assert_ne!(h1, hash_key("test-key-124"));
    }

    #[test]
    fn test_registry_validates_by_hash() {
        let registry = ApiKeyRegistry::from_bindings(&[
            ApiKeyBinding {
                key: "alice-key".to_string(),
                identity: "alice".to_string(),
            },
            ApiKeyBinding {
                key: "root-key".to_string(),
                identity: "root".to_string(),
            },
        ]);
        assert_eq!(registry.len(), 2);

        let entry = registry.validate("alice-key").unwrap();
        assert_eq!(entry.identity, PrincipalId::new("alice"));
        assert_eq!(entry.key_hash, hash_key("alice-key"));
        assert!(registry.validate("ALICE-KEY").is_none());
        assert!(registry.validate("").is_none());
    }

    #[test]
    fn test_register_rebinds_existing_key() {
        let mut registry = ApiKeyRegistry::new();
        registry.register("shared", PrincipalId::new("alice"));
        registry.register("shared", PrincipalId::new("bob"));
        assert_eq!(registry.len(), 1);
        assert_eq!(
            registry.validate("shared").unwrap().identity,
            PrincipalId::new("bob")
        );
    }
}
