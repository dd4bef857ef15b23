// SPDX-License-Identifier: PMPL-1.0-or-later
//! Tenant and principal directory.
//!
//! Holds tenant records, principal-to-tenant assignments and the
//! administrator roster. The directory is the authoritative source the
//! authorization layer evaluates against, through the [`DirectoryView`]
//! lookup trait.
//!
//! Mutations that are restricted to administrators check the roster
//! directly. Every applied change is reported to an optional
//! [`DirectoryObserver`] so it can be audited.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tokio::sync::{RwLock, RwLockReadGuard};
use tracing::{info, instrument, warn};

use crate::change::{DirectoryChange, DirectoryObserver, MutationKind};
use crate::context::ActorContext;
use crate::error::DirectoryError;
use crate::ids::{PrincipalId, TenantId};
use crate::model::{AdminRosterEntry, Membership, Principal, PrincipalPatch, Tenant};

/// Logical table name of tenant records
pub const TENANTS_TABLE: &str = "tenants";
/// Logical table name of principal records
pub const USERS_TABLE: &str = "users";
/// Logical table name of the administrator roster
pub const ADMIN_ROSTER_TABLE: &str = "admin_roster";

/// Read-only lookups needed to evaluate an authorization decision.
pub trait DirectoryView {
    /// Whether `identity` holds an active administrator roster entry.
    fn is_active_admin(&self, identity: &PrincipalId) -> bool;

    /// Tenant assignment and active flag of the principal record, if any.
    fn membership(&self, principal: &PrincipalId) -> Option<Membership>;

    /// Tenant of an active principal.
    fn tenant_of(&self, principal: &PrincipalId) -> Option<TenantId> {
        self.membership(principal)
            .filter(|m| m.active)
            .map(|m| m.tenant_id)
    }
}

/// In-memory directory contents.
#[derive(Debug, Clone, Default)]
pub struct DirectoryState {
    tenants: HashMap<TenantId, Tenant>,
    principals: HashMap<PrincipalId, Principal>,
    admins: HashMap<PrincipalId, AdminRosterEntry>,
}

impl DirectoryState {
    pub fn tenant(&self, id: &TenantId) -> Option<&Tenant> {
        self.tenants.get(id)
    }

    pub fn principal(&self, id: &PrincipalId) -> Option<&Principal> {
        self.principals.get(id)
    }

    pub fn admin_entry(&self, identity: &PrincipalId) -> Option<&AdminRosterEntry> {
        self.admins.get(identity)
    }

    /// All tenants, including soft-deleted ones.
    pub fn tenants(&self) -> impl Iterator<Item = &Tenant> {
        self.tenants.values()
    }

    pub fn principals(&self) -> impl Iterator<Item = &Principal> {
        self.principals.values()
    }

    pub fn admin_roster(&self) -> impl Iterator<Item = &AdminRosterEntry> {
        self.admins.values()
    }

    pub fn active_admin_count(&self) -> usize {
        self.admins.values().filter(|e| e.active).count()
    }

    fn require_admin(&self, ctx: &ActorContext) -> Result<(), DirectoryError> {
        if self.is_active_admin(&ctx.actor_id) {
            Ok(())
        } else {
            Err(DirectoryError::Unauthorized(
                "administrator privileges required".to_string(),
            ))
        }
    }

    fn live_tenant(&self, id: &TenantId) -> Result<&Tenant, DirectoryError> {
        let tenant = self
            .tenants
            .get(id)
            .ok_or_else(|| DirectoryError::TenantNotFound(id.clone()))?;
        if tenant.deleted {
            return Err(DirectoryError::TenantDeleted(id.clone()));
        }
        Ok(tenant)
    }
}

impl DirectoryView for DirectoryState {
    fn is_active_admin(&self, identity: &PrincipalId) -> bool {
        self.admins
            .get(identity)
            .map(|entry| entry.active)
            .unwrap_or(false)
    }

    fn membership(&self, principal: &PrincipalId) -> Option<Membership> {
        self.principals.get(principal).map(|p| Membership {
            tenant_id: p.tenant_id.clone(),
            active: p.active,
        })
    }
}

fn snapshot<T: Serialize>(value: &T) -> Option<serde_json::Value> {
    serde_json::to_value(value).ok()
}

fn validate_email(email: &str) -> Result<(), DirectoryError> {
    let trimmed = email.trim();
    if trimmed.is_empty() || !trimmed.contains('@') {
        return Err(DirectoryError::InvalidInput(format!(
            "invalid email address: '{}'",
            email
        )));
    }
    Ok(())
}

/// Shared, cloneable handle to the directory.
#[derive(Clone, Default)]
pub struct Directory {
    state: Arc<RwLock<DirectoryState>>,
    observer: Option<Arc<dyn DirectoryObserver>>,
}

impl Directory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Report every applied change to `observer`.
    pub fn with_observer(mut self, observer: Arc<dyn DirectoryObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Acquire a read guard for evaluating decisions against the directory.
    pub async fn read(&self) -> RwLockReadGuard<'_, DirectoryState> {
        self.state.read().await
    }

    /// Clone the current contents.
    pub async fn snapshot(&self) -> DirectoryState {
        self.state.read().await.clone()
    }

    async fn notify(&self, ctx: &ActorContext, change: DirectoryChange) {
        if let Some(observer) = &self.observer {
            observer.directory_changed(ctx, &change).await;
        }
    }

    /// Grant the first administrator roster entry.
    ///
    /// Only succeeds while the roster has no active entry.
    #[instrument(skip(self))]
    pub async fn bootstrap_admin(
        &self,
        identity: PrincipalId,
    ) -> Result<AdminRosterEntry, DirectoryError> {
        let entry = {
            let mut state = self.state.write().await;
            if state.active_admin_count() > 0 {
                return Err(DirectoryError::Unauthorized(
                    "administrator roster already bootstrapped".to_string(),
                ));
            }
            let entry = AdminRosterEntry::new(identity.clone(), None);
            state.admins.insert(identity.clone(), entry.clone());
            entry
        };

        info!(identity = %identity, "Administrator roster bootstrapped");
        self.notify(
            &ActorContext::system(),
            DirectoryChange {
                table: ADMIN_ROSTER_TABLE.to_string(),
                record_id: identity.to_string(),
                kind: MutationKind::Insert,
                old: None,
                new: snapshot(&entry),
            },
        )
        .await;
        Ok(entry)
    }

    #[instrument(skip(self, ctx), fields(actor = %ctx.actor_id))]
    pub async fn create_tenant(
        &self,
        ctx: &ActorContext,
        id: TenantId,
        name: &str,
    ) -> Result<Tenant, DirectoryError> {
        if name.trim().is_empty() {
            return Err(DirectoryError::InvalidInput(
                "tenant name must not be empty".to_string(),
            ));
        }

        let tenant = {
            let mut state = self.state.write().await;
            state.require_admin(ctx)?;
            if state.tenants.contains_key(&id) {
                return Err(DirectoryError::AlreadyExists(format!("tenant {}", id)));
            }
            let tenant = Tenant::new(id.clone(), name.trim());
            state.tenants.insert(id.clone(), tenant.clone());
            tenant
        };

        info!(tenant = %id, "Tenant created");
        self.notify(
            ctx,
            DirectoryChange {
                table: TENANTS_TABLE.to_string(),
                record_id: id.to_string(),
                kind: MutationKind::Insert,
                old: None,
                new: snapshot(&tenant),
            },
        )
        .await;
        Ok(tenant)
    }

    /// Mark a tenant deleted. The record itself is kept.
    #[instrument(skip(self, ctx), fields(actor = %ctx.actor_id))]
    pub async fn soft_delete_tenant(
        &self,
        ctx: &ActorContext,
        id: &TenantId,
    ) -> Result<Tenant, DirectoryError> {
        let (old, new) = {
            let mut state = self.state.write().await;
            state.require_admin(ctx)?;
            let tenant = state
                .tenants
                .get_mut(id)
                .ok_or_else(|| DirectoryError::TenantNotFound(id.clone()))?;
            let old = tenant.clone();
            tenant.deleted = true;
            (old, tenant.clone())
        };

        info!(tenant = %id, "Tenant soft-deleted");
        self.notify(
            ctx,
            DirectoryChange {
                table: TENANTS_TABLE.to_string(),
                record_id: id.to_string(),
                kind: MutationKind::Update,
                old: snapshot(&old),
                new: snapshot(&new),
            },
        )
        .await;
        Ok(new)
    }

    #[instrument(skip(self, ctx, email), fields(actor = %ctx.actor_id))]
    pub async fn register_principal(
        &self,
        ctx: &ActorContext,
        id: PrincipalId,
        email: &str,
        tenant_id: TenantId,
    ) -> Result<Principal, DirectoryError> {
        validate_email(email)?;

        let principal = {
            let mut state = self.state.write().await;
            state.require_admin(ctx)?;
            state.live_tenant(&tenant_id)?;
            if state.principals.contains_key(&id) {
                return Err(DirectoryError::AlreadyExists(format!("principal {}", id)));
            }
            let principal = Principal::new(id.clone(), email.trim(), tenant_id.clone());
            state.principals.insert(id.clone(), principal.clone());
            principal
        };

        info!(principal = %id, tenant = %tenant_id, "Principal registered");
        self.notify(
            ctx,
            DirectoryChange {
                table: USERS_TABLE.to_string(),
                record_id: id.to_string(),
                kind: MutationKind::Insert,
                old: None,
                new: snapshot(&principal),
            },
        )
        .await;
        Ok(principal)
    }

    /// Update profile fields. Allowed for the principal itself or an
    /// administrator.
    #[instrument(skip(self, ctx, email), fields(actor = %ctx.actor_id))]
    pub async fn update_email(
        &self,
        ctx: &ActorContext,
        id: &PrincipalId,
        email: &str,
    ) -> Result<Principal, DirectoryError> {
        validate_email(email)?;

        let (old, new) = {
            let mut state = self.state.write().await;
            if &ctx.actor_id != id && !state.is_active_admin(&ctx.actor_id) {
                return Err(DirectoryError::Unauthorized(
                    "profile can only be edited by its owner".to_string(),
                ));
            }
            let principal = state
                .principals
                .get_mut(id)
                .ok_or_else(|| DirectoryError::PrincipalNotFound(id.clone()))?;
            let old = principal.clone();
            if principal.email == email.trim() {
                return Ok(old);
            }
            principal.email = email.trim().to_string();
            principal.updated_at = Utc::now();
            (old, principal.clone())
        };

        self.notify(
            ctx,
            DirectoryChange {
                table: USERS_TABLE.to_string(),
                record_id: id.to_string(),
                kind: MutationKind::Update,
                old: snapshot(&old),
                new: snapshot(&new),
            },
        )
        .await;
        Ok(new)
    }

    /// Move a principal to another tenant. Administrator only; naming the
    /// current tenant is a no-op for anyone.
    #[instrument(skip(self, ctx), fields(actor = %ctx.actor_id))]
    pub async fn reassign_tenant(
        &self,
        ctx: &ActorContext,
        id: &PrincipalId,
        tenant_id: TenantId,
    ) -> Result<Principal, DirectoryError> {
        let (old, new) = {
            let mut state = self.state.write().await;
            let current = state
                .principals
                .get(id)
                .ok_or_else(|| DirectoryError::PrincipalNotFound(id.clone()))?;
            if current.tenant_id == tenant_id {
                return Ok(current.clone());
            }
            if !state.is_active_admin(&ctx.actor_id) {
                warn!(
                    actor = %ctx.actor_id,
                    principal = %id,
                    target_tenant = %tenant_id,
                    "Blocked tenant reassignment by non-administrator"
                );
                return Err(DirectoryError::CrossTenantTransfer);
            }
            state.live_tenant(&tenant_id)?;
            let principal = state
                .principals
                .get_mut(id)
                .ok_or_else(|| DirectoryError::PrincipalNotFound(id.clone()))?;
            let old = principal.clone();
            principal.tenant_id = tenant_id.clone();
            principal.updated_at = Utc::now();
            (old, principal.clone())
        };

        info!(principal = %id, from = %old.tenant_id, to = %tenant_id, "Principal reassigned");
        self.notify(
            ctx,
            DirectoryChange {
                table: USERS_TABLE.to_string(),
                record_id: id.to_string(),
                kind: MutationKind::Update,
                old: snapshot(&old),
                new: snapshot(&new),
            },
        )
        .await;
        Ok(new)
    }

    #[instrument(skip(self, ctx), fields(actor = %ctx.actor_id))]
    pub async fn set_principal_active(
        &self,
        ctx: &ActorContext,
        id: &PrincipalId,
        active: bool,
    ) -> Result<Principal, DirectoryError> {
        let (old, new) = {
            let mut state = self.state.write().await;
            state.require_admin(ctx)?;
            let principal = state
                .principals
                .get_mut(id)
                .ok_or_else(|| DirectoryError::PrincipalNotFound(id.clone()))?;
            let old = principal.clone();
            principal.active = active;
            principal.updated_at = Utc::now();
            (old, principal.clone())
        };

        self.notify(
            ctx,
            DirectoryChange {
                table: USERS_TABLE.to_string(),
                record_id: id.to_string(),
                kind: MutationKind::Update,
                old: snapshot(&old),
                new: snapshot(&new),
            },
        )
        .await;
        Ok(new)
    }

    /// Apply several principal fields under one write lock.
    ///
    /// Every field is checked before anything is written, so a rejected
    /// field leaves the record untouched. Emits a single change.
    #[instrument(skip(self, ctx, patch), fields(actor = %ctx.actor_id))]
    pub async fn update_principal(
        &self,
        ctx: &ActorContext,
        id: &PrincipalId,
        patch: &PrincipalPatch,
    ) -> Result<Principal, DirectoryError> {
        if let Some(email) = &patch.email {
            validate_email(email)?;
        }

        let (old, new) = {
            let mut state = self.state.write().await;
            let is_admin = state.is_active_admin(&ctx.actor_id);
            let current = state
                .principals
                .get(id)
                .ok_or_else(|| DirectoryError::PrincipalNotFound(id.clone()))?
                .clone();

            let email = patch
                .email
                .as_deref()
                .map(str::trim)
                .filter(|email| *email != current.email);
            let tenant_id = patch
                .tenant_id
                .as_ref()
                .filter(|tenant| **tenant != current.tenant_id);
            let active = patch.active.filter(|active| *active != current.active);

            if email.is_some() && &ctx.actor_id != id && !is_admin {
                return Err(DirectoryError::Unauthorized(
                    "profile can only be edited by its owner".to_string(),
                ));
            }
            if let Some(tenant) = tenant_id {
                if !is_admin {
                    warn!(
                        actor = %ctx.actor_id,
                        principal = %id,
                        target_tenant = %tenant,
                        "Blocked tenant reassignment by non-administrator"
                    );
                    return Err(DirectoryError::CrossTenantTransfer);
                }
                state.live_tenant(tenant)?;
            }
            if active.is_some() {
                state.require_admin(ctx)?;
            }
            if email.is_none() && tenant_id.is_none() && active.is_none() {
                return Ok(current);
            }

            let mut updated = current.clone();
            if let Some(email) = email {
                updated.email = email.to_string();
            }
            if let Some(tenant) = tenant_id {
                updated.tenant_id = tenant.clone();
            }
            if let Some(active) = active {
                updated.active = active;
            }
            updated.updated_at = Utc::now();
            state.principals.insert(id.clone(), updated.clone());
            (current, updated)
        };

        self.notify(
            ctx,
            DirectoryChange {
                table: USERS_TABLE.to_string(),
                record_id: id.to_string(),
                kind: MutationKind::Update,
                old: snapshot(&old),
                new: snapshot(&new),
            },
        )
        .await;
        Ok(new)
    }

    /// Grant (or re-activate) an administrator roster entry.
    #[instrument(skip(self, ctx), fields(actor = %ctx.actor_id))]
    pub async fn grant_admin(
        &self,
        ctx: &ActorContext,
        identity: PrincipalId,
    ) -> Result<AdminRosterEntry, DirectoryError> {
        let (old, new, kind) = {
            let mut state = self.state.write().await;
            state.require_admin(ctx)?;
            match state.admins.get_mut(&identity) {
                Some(entry) if entry.active => {
                    return Err(DirectoryError::AlreadyExists(format!(
                        "active administrator {}",
                        identity
                    )));
                }
                Some(entry) => {
                    let old = entry.clone();
                    entry.active = true;
                    entry.granted_by = Some(ctx.actor_id.clone());
                    entry.granted_at = Utc::now();
                    entry.deactivated_at = None;
                    (Some(old), entry.clone(), MutationKind::Update)
                }
                None => {
                    let entry =
                        AdminRosterEntry::new(identity.clone(), Some(ctx.actor_id.clone()));
                    state.admins.insert(identity.clone(), entry.clone());
                    (None, entry, MutationKind::Insert)
                }
            }
        };

        info!(identity = %identity, "Administrator granted");
        self.notify(
            ctx,
            DirectoryChange {
                table: ADMIN_ROSTER_TABLE.to_string(),
                record_id: identity.to_string(),
                kind,
                old: old.as_ref().and_then(snapshot),
                new: snapshot(&new),
            },
        )
        .await;
        Ok(new)
    }

    /// Deactivate an administrator roster entry. Entries are never removed.
    #[instrument(skip(self, ctx), fields(actor = %ctx.actor_id))]
    pub async fn deactivate_admin(
        &self,
        ctx: &ActorContext,
        identity: &PrincipalId,
    ) -> Result<AdminRosterEntry, DirectoryError> {
        let (old, new) = {
            let mut state = self.state.write().await;
            state.require_admin(ctx)?;
            let entry = state
                .admins
                .get_mut(identity)
                .ok_or_else(|| DirectoryError::AdminNotFound(identity.clone()))?;
            let old = entry.clone();
            entry.active = false;
            entry.deactivated_at = Some(Utc::now());
            (old, entry.clone())
        };

        warn!(identity = %identity, "Administrator deactivated");
        self.notify(
            ctx,
            DirectoryChange {
                table: ADMIN_ROSTER_TABLE.to_string(),
                record_id: identity.to_string(),
                kind: MutationKind::Update,
                old: snapshot(&old),
                new: snapshot(&new),
            },
        )
        .await;
        Ok(new)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingObserver {
        changes: Mutex<Vec<DirectoryChange>>,
    }

    #[async_trait::async_trait]
    impl DirectoryObserver for RecordingObserver {
        async fn directory_changed(&self, _ctx: &ActorContext, change: &DirectoryChange) {
            self.changes.lock().unwrap().push(change.clone());
        }
    }

    async fn seeded() -> (Directory, ActorContext) {
        let directory = Directory::new();
        directory
            .bootstrap_admin(PrincipalId::new("root"))
            .await
            .unwrap();
        let admin = ActorContext::new("root");
        directory
            .create_tenant(&admin, TenantId::new("T1"), "Acme")
            .await
            .unwrap();
        directory
            .create_tenant(&admin, TenantId::new("T2"), "Globex")
            .await
            .unwrap();
        directory
            .register_principal(&admin, PrincipalId::new("U1"), "u1@acme.test", TenantId::new("T1"))
            .await
            .unwrap();
        (directory, admin)
    }

    #[tokio::test]
    async fn test_bootstrap_only_once() {
        let directory = Directory::new();
        directory.bootstrap_admin(PrincipalId::new("a")).await.unwrap();
        let second = directory.bootstrap_admin(PrincipalId::new("b")).await;
        assert!(matches!(second, Err(DirectoryError::Unauthorized(_))));
    }

    #[tokio::test]
    async fn test_non_admin_cannot_create_tenant() {
        let (directory, _) = seeded().await;
        let user = ActorContext::new("U1");
        let result = directory
            .create_tenant(&user, TenantId::new("T3"), "Initech")
            .await;
        assert!(matches!(result, Err(DirectoryError::Unauthorized(_))));
    }

    #[tokio::test]
    async fn test_membership_view() {
        let (directory, _) = seeded().await;
        let state = directory.read().await;
        assert_eq!(
            state.tenant_of(&PrincipalId::new("U1")),
            Some(TenantId::new("T1"))
        );
        assert!(state.is_active_admin(&PrincipalId::new("root")));
        assert!(!state.is_active_admin(&PrincipalId::new("U1")));
        assert!(state.membership(&PrincipalId::new("root")).is_none());
    }

    #[tokio::test]
    async fn test_reassign_requires_admin() {
        let (directory, admin) = seeded().await;
        let user = ActorContext::new("U1");

        let blocked = directory
            .reassign_tenant(&user, &PrincipalId::new("U1"), TenantId::new("T2"))
            .await;
        assert_eq!(blocked, Err(DirectoryError::CrossTenantTransfer));
        assert_eq!(
            directory.read().await.tenant_of(&PrincipalId::new("U1")),
            Some(TenantId::new("T1"))
        );

        let moved = directory
            .reassign_tenant(&admin, &PrincipalId::new("U1"), TenantId::new("T2"))
            .await
            .unwrap();
        assert_eq!(moved.tenant_id, TenantId::new("T2"));
    }

    #[tokio::test]
    async fn test_reassign_to_current_tenant_is_noop() {
        let (directory, _) = seeded().await;
        let user = ActorContext::new("U1");
        let unchanged = directory
            .reassign_tenant(&user, &PrincipalId::new("U1"), TenantId::new("T1"))
            .await
            .unwrap();
        assert_eq!(unchanged.tenant_id, TenantId::new("T1"));
    }

    #[tokio::test]
    async fn test_update_principal_with_own_tenant_applies_email() {
        let (directory, _) = seeded().await;
        let user = ActorContext::new("U1");
        let patch = PrincipalPatch {
            email: Some("changed@acme.test".to_string()),
            tenant_id: Some(TenantId::new("T1")),
            active: None,
        };
        let updated = directory
            .update_principal(&user, &PrincipalId::new("U1"), &patch)
            .await
            .unwrap();
        assert_eq!(updated.email, "changed@acme.test");
        assert_eq!(updated.tenant_id, TenantId::new("T1"));
    }

    #[tokio::test]
    async fn test_rejected_patch_leaves_principal_untouched() {
        let observer = Arc::new(RecordingObserver::default());
        let (directory, _) = seeded().await;
        let directory = directory.with_observer(observer.clone());
        let user = ActorContext::new("U1");
        let patch = PrincipalPatch {
            email: Some("changed@acme.test".to_string()),
            tenant_id: Some(TenantId::new("T2")),
            active: None,
        };

        let result = directory
            .update_principal(&user, &PrincipalId::new("U1"), &patch)
            .await;
        assert_eq!(result, Err(DirectoryError::CrossTenantTransfer));

        let state = directory.read().await;
        let stored = state.principal(&PrincipalId::new("U1")).unwrap();
        assert_eq!(stored.email, "u1@acme.test");
        assert_eq!(stored.tenant_id, TenantId::new("T1"));
        assert!(observer.changes.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_admin_patch_emits_single_change() {
        let observer = Arc::new(RecordingObserver::default());
        let (directory, admin) = seeded().await;
        let directory = directory.with_observer(observer.clone());
        let patch = PrincipalPatch {
            email: Some("moved@globex.test".to_string()),
            tenant_id: Some(TenantId::new("T2")),
            active: Some(false),
        };

        let updated = directory
            .update_principal(&admin, &PrincipalId::new("U1"), &patch)
            .await
            .unwrap();
        assert_eq!(updated.tenant_id, TenantId::new("T2"));
        assert!(!updated.active);

        let changes = observer.changes.lock().unwrap();
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].table, USERS_TABLE);
        assert_eq!(changes[0].old.as_ref().unwrap()["tenant_id"], "T1");
        assert_eq!(changes[0].new.as_ref().unwrap()["email"], "moved@globex.test");
    }

    #[tokio::test]
    async fn test_inactive_principal_has_no_tenant() {
        let (directory, admin) = seeded().await;
        directory
            .set_principal_active(&admin, &PrincipalId::new("U1"), false)
            .await
            .unwrap();
        let state = directory.read().await;
        assert!(state.tenant_of(&PrincipalId::new("U1")).is_none());
        assert!(!state.membership(&PrincipalId::new("U1")).unwrap().active);
    }

    #[tokio::test]
    async fn test_self_can_update_email_but_not_others() {
        let (directory, admin) = seeded().await;
        directory
            .register_principal(&admin, PrincipalId::new("U2"), "u2@acme.test", TenantId::new("T1"))
            .await
            .unwrap();

        let u1 = ActorContext::new("U1");
        let updated = directory
            .update_email(&u1, &PrincipalId::new("U1"), "new@acme.test")
            .await
            .unwrap();
        assert_eq!(updated.email, "new@acme.test");

        let denied = directory
            .update_email(&u1, &PrincipalId::new("U2"), "hijack@acme.test")
            .await;
        assert!(matches!(denied, Err(DirectoryError::Unauthorized(_))));
    }

    #[tokio::test]
    async fn test_soft_delete_keeps_record_and_blocks_registration() {
        let (directory, admin) = seeded().await;
        directory
            .soft_delete_tenant(&admin, &TenantId::new("T2"))
            .await
            .unwrap();
        assert!(directory.read().await.tenant(&TenantId::new("T2")).unwrap().deleted);

        let result = directory
            .register_principal(&admin, PrincipalId::new("U9"), "u9@globex.test", TenantId::new("T2"))
            .await;
        assert_eq!(result, Err(DirectoryError::TenantDeleted(TenantId::new("T2"))));
    }

    #[tokio::test]
    async fn test_admin_roster_is_append_only() {
        let (directory, admin) = seeded().await;
        directory
            .grant_admin(&admin, PrincipalId::new("ops"))
            .await
            .unwrap();
        directory
            .deactivate_admin(&admin, &PrincipalId::new("ops"))
            .await
            .unwrap();

        let state = directory.read().await;
        let entry = state.admin_entry(&PrincipalId::new("ops")).unwrap();
        assert!(!entry.active);
        assert!(entry.deactivated_at.is_some());
        assert_eq!(state.admin_roster().count(), 2);
        assert!(!state.is_active_admin(&PrincipalId::new("ops")));
    }

    #[tokio::test]
    async fn test_observer_sees_changes() {
        let observer = Arc::new(RecordingObserver::default());
        let directory = Directory::new().with_observer(observer.clone());
        directory.bootstrap_admin(PrincipalId::new("root")).await.unwrap();
        let admin = ActorContext::new("root");
        directory
            .create_tenant(&admin, TenantId::new("T1"), "Acme")
            .await
            .unwrap();

        let changes = observer.changes.lock().unwrap();
        assert_eq!(changes.len(), 2);
        assert_eq!(changes[0].table, ADMIN_ROSTER_TABLE);
        assert_eq!(changes[1].table, TENANTS_TABLE);
        assert_eq!(changes[1].kind, MutationKind::Insert);
        assert!(changes[1].old.is_none());
    }
}
