// SPDX-License-Identifier: PMPL-1.0-or-later
//! Isolation and audit smoke checks.
//!
//! Each check runs against the same freshly migrated repository with two
//! tenants (`acme`, `globex`), one principal each and a bootstrap
//! administrator without a principal record.

use std::sync::Arc;

use anyhow::{bail, ensure, Context, Result};
use rapport_audit::AUDIT_TABLE;
use rapport_authz::{AuthzError, GuardError, PolicyGeneration};
use rapport_repository::{Repository, RepositoryConfig, RepositoryError, Row, RowQuery};
use rapport_storage::InMemoryBackend;
use rapport_tenancy::{ActorContext, PrincipalId, TenantId};
use serde_json::{json, Value};
use tracing::debug;

/// Installed policies per generation: four tables, four operations.
const POLICIES_PER_GENERATION: usize = 16;

pub struct Outcome {
    pub name: &'static str,
    pub result: Result<String>,
}

struct Environment {
    repo: Repository,
    generation: PolicyGeneration,
    root: ActorContext,
    alice: ActorContext,
    bob: ActorContext,
}

fn row(value: Value) -> Row {
    match value {
        Value::Object(map) => map,
        _ => Row::new(),
    }
}

fn row_id(row: &Row) -> Result<String> {
    row.get("id")
        .and_then(Value::as_str)
        .map(str::to_string)
        .context("row has no id")
}

impl Environment {
    async fn setup(generation: PolicyGeneration) -> Result<Self> {
        let config = RepositoryConfig {
            policy_generation: generation,
            ..RepositoryConfig::default()
        };
        let repo = Repository::open_migrated(config, Arc::new(InMemoryBackend::new())).await?;

        let root = ActorContext::new("smoke-admin").with_purpose("smoke test");
        let directory = repo.directory();
        directory
            .bootstrap_admin(root.actor_id.clone())
            .await?;
        for (tenant, principal) in [("acme", "alice"), ("globex", "bob")] {
            directory
                .create_tenant(&root, TenantId::new(tenant), tenant)
                .await?;
            directory
                .register_principal(
                    &root,
                    PrincipalId::new(principal),
                    &format!("{}@{}.test", principal, tenant),
                    TenantId::new(tenant),
                )
                .await?;
        }

        Ok(Self {
            repo,
            generation,
            root,
            alice: ActorContext::new("alice"),
            bob: ActorContext::new("bob"),
        })
    }

    async fn policy_counts(&self) -> Result<String> {
        let counts = self.repo.policy_counts().await;
        ensure!(
            counts.v1_installed == POLICIES_PER_GENERATION
                && counts.v2_installed == POLICIES_PER_GENERATION,
            "expected {} policies per generation, found v1={} v2={}",
            POLICIES_PER_GENERATION,
            counts.v1_installed,
            counts.v2_installed
        );
        let (live, retired) = match self.generation {
            PolicyGeneration::V1 => (counts.v1_enabled, counts.v2_enabled),
            PolicyGeneration::V2 => (counts.v2_enabled, counts.v1_enabled),
        };
        ensure!(
            live == POLICIES_PER_GENERATION && retired == 0,
            "{} should be the only enabled generation (live={}, other={})",
            self.generation,
            live,
            retired
        );
        Ok(format!("{} live, {} enabled", self.generation, live))
    }

    async fn tenant_isolation(&self) -> Result<String> {
        let created = self
            .repo
            .insert(&self.alice, "contacts", row(json!({"name": "Carol"})))
            .await?;
        let id = row_id(&created)?;
        ensure!(
            created.get("tenant_id") == Some(&json!("acme")),
            "tenant reference was not filled from the actor"
        );

        let foreign = self
            .repo
            .select(&self.bob, "contacts", &RowQuery::all())
            .await?;
        ensure!(
            foreign.iter().all(|r| r.get("id") != Some(&json!(id))),
            "globex principal can list an acme row"
        );
        ensure!(
            self.repo.get(&self.bob, "contacts", &id).await?.is_none(),
            "globex principal can read an acme row by id"
        );
        ensure!(
            !self.repo.delete(&self.bob, "contacts", &id).await?,
            "globex principal deleted an acme row"
        );
        ensure!(
            self.repo.get(&self.alice, "contacts", &id).await?.is_some(),
            "owner lost access to its own row"
        );
        Ok(format!("contact {} visible to acme only", id))
    }

    async fn cross_tenant_insert(&self) -> Result<String> {
        let result = self
            .repo
            .insert(
                &self.bob,
                "contacts",
                row(json!({"name": "Mallory", "tenant_id": "acme"})),
            )
            .await;
        match result {
            Err(RepositoryError::Authz(AuthzError::RowSecurityViolation { reason, .. })) => {
                Ok(format!("rejected ({})", reason))
            }
            Err(other) => bail!("unexpected error: {}", other),
            Ok(_) => bail!("insert into a foreign tenant succeeded"),
        }
    }

    async fn tenant_transfer(&self) -> Result<String> {
        let created = self
            .repo
            .insert(&self.alice, "organizations", row(json!({"name": "Acme Corp"})))
            .await?;
        let id = row_id(&created)?;

        let result = self
            .repo
            .update(
                &self.alice,
                "organizations",
                &id,
                &row(json!({"tenant_id": "globex"})),
            )
            .await;
        if !matches!(
            result,
            Err(RepositoryError::Guard(GuardError::CrossTenantTransfer))
        ) {
            bail!("expected a cross-tenant transfer error, got {:?}", result.map(|_| ()));
        }

        let stored = self
            .repo
            .get(&self.root, "organizations", &id)
            .await?
            .context("row disappeared")?;
        ensure!(
            stored.get("tenant_id") == Some(&json!("acme")),
            "row tenant changed despite the guard"
        );
        Ok("transfer blocked, row unchanged".to_string())
    }

    async fn audit_immutability(&self) -> Result<String> {
        let patch = row(json!({"actor_id": "nobody"}));
        for (label, result) in [
            (
                "update",
                self.repo
                    .update_where(&self.root, AUDIT_TABLE, &RowQuery::all(), &patch)
                    .await
                    .map(|_| ()),
            ),
            (
                "delete",
                self.repo
                    .delete_where(&self.root, AUDIT_TABLE, &RowQuery::all())
                    .await
                    .map(|_| ()),
            ),
        ] {
            match result {
                Err(RepositoryError::Guard(GuardError::AuditTamper)) => {
                    debug!(operation = label, "Audit tamper blocked");
                }
                Err(other) => bail!("{} returned unexpected error: {}", label, other),
                Ok(()) => bail!("administrator could {} audit records", label),
            }
        }
        Ok("update and delete blocked for administrators".to_string())
    }

    async fn audit_trail(&self) -> Result<String> {
        let created = self
            .repo
            .insert(&self.bob, "contacts", row(json!({"name": "Dave"})))
            .await?;
        let id = row_id(&created)?;
        self.repo
            .update(&self.bob, "contacts", &id, &row(json!({"name": "David"})))
            .await?
            .context("owner could not update its row")?;

        let trail = self.repo.audit_trail(&self.root, "contacts", &id).await?;
        ensure!(
            trail.len() == 2,
            "expected insert and update records, found {}",
            trail.len()
        );
        let report = self.repo.verify_audit(&self.root).await?;
        ensure!(
            report.is_intact(),
            "{} audit records fail checksum verification",
            report.mismatched.len()
        );
        Ok(format!("{} records checked, all intact", report.checked))
    }

    async fn audit_is_admin_only(&self) -> Result<String> {
        match self.repo.verify_audit(&self.alice).await {
            Err(RepositoryError::Forbidden(reason)) => Ok(format!("denied ({})", reason)),
            Err(other) => bail!("unexpected error: {}", other),
            Ok(_) => bail!("non-administrator read the audit log"),
        }
    }
}

/// Run every check. Only environment setup failures abort the run.
pub async fn run(generation: PolicyGeneration) -> Result<Vec<Outcome>> {
    let env = Environment::setup(generation)
        .await
        .context("failed to set up the smoke environment")?;

    Ok(vec![
        Outcome {
            name: "policy counts",
            result: env.policy_counts().await,
        },
        Outcome {
            name: "tenant isolation",
            result: env.tenant_isolation().await,
        },
        Outcome {
            name: "cross-tenant insert",
            result: env.cross_tenant_insert().await,
        },
        Outcome {
            name: "tenant transfer",
            result: env.tenant_transfer().await,
        },
        Outcome {
            name: "audit immutability",
            result: env.audit_immutability().await,
        },
        Outcome {
            name: "audit trail",
            result: env.audit_trail().await,
        },
        Outcome {
            name: "audit admin-only",
            result: env.audit_is_admin_only().await,
        },
    ])
}
