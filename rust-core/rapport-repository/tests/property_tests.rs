// SPDX-License-Identifier: PMPL-1.0-or-later
//! Property-based tests for tenant isolation through the repository

use std::sync::Arc;

use proptest::prelude::*;
use rapport_authz::AccessRequest;
use rapport_repository::{Repository, RepositoryConfig, Row, RowQuery};
use rapport_storage::InMemoryBackend;
use rapport_tenancy::{ActorContext, PrincipalId, TenantId};
use serde_json::json;

const TENANTS: [&str; 3] = ["acme", "globex", "initech"];

/// Each principal `u{i}` belongs to tenant `TENANTS[i]`.
async fn environment() -> Repository {
    let repo = Repository::open_migrated(
        RepositoryConfig::default(),
        Arc::new(InMemoryBackend::new()),
    )
    .await
    .unwrap();
    let root = ActorContext::new("root");
    let directory = repo.directory();
    directory
        .bootstrap_admin(PrincipalId::new("root"))
        .await
        .unwrap();
    for (i, tenant) in TENANTS.iter().enumerate() {
        directory
            .create_tenant(&root, TenantId::new(*tenant), tenant)
            .await
            .unwrap();
        directory
            .register_principal(
                &root,
                PrincipalId::new(format!("u{}", i)),
                &format!("u{}@{}.test", i, tenant),
                TenantId::new(*tenant),
            )
            .await
            .unwrap();
    }
    repo
}

fn contact(name: &str) -> Row {
    let mut row = Row::new();
    row.insert("name".to_string(), json!(name));
    row
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn test_actors_only_reach_their_own_tenant(
        owners in prop::collection::vec(0usize..3, 1..12),
        names in prop::collection::vec("[A-Za-z]{1,10}", 12)
    ) {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        runtime.block_on(async {
            let repo = environment().await;
            let mut ids = Vec::new();
            for (i, owner) in owners.iter().enumerate() {
                let ctx = ActorContext::new(format!("u{}", owner));
                let row = repo.insert(&ctx, "contacts", contact(&names[i])).await.unwrap();
                ids.push((*owner, row["id"].as_str().unwrap().to_string()));
            }

            for actor in 0..TENANTS.len() {
                let ctx = ActorContext::new(format!("u{}", actor));
                let visible = repo.select(&ctx, "contacts", &RowQuery::all()).await.unwrap();
                let expected = owners.iter().filter(|o| **o == actor).count();
                prop_assert_eq!(visible.len(), expected);
                for row in &visible {
                    prop_assert_eq!(row["tenant_id"].as_str(), Some(TENANTS[actor]));
                }

                let patch = {
                    let mut p = Row::new();
                    p.insert("name".to_string(), json!("overwritten"));
                    p
                };
                for (owner, id) in ids.iter().filter(|(o, _)| *o != actor) {
                    prop_assert!(repo.update(&ctx, "contacts", id, &patch).await.unwrap().is_none());
                    prop_assert!(!repo.delete(&ctx, "contacts", id).await.unwrap());
                    let owner_ctx = ActorContext::new(format!("u{}", owner));
                    let still = repo.get(&owner_ctx, "contacts", id).await.unwrap();
                    prop_assert!(still.is_some());
                    let still = still.unwrap();
                    prop_assert_ne!(still["name"].as_str(), Some("overwritten"));
                }
            }

            Ok(())
        })?;
    }

    #[test]
    fn test_predicate_is_idempotent(
        actor in 0usize..4,
        target in 0usize..3,
        admin_only in any::<bool>()
    ) {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        runtime.block_on(async {
            let repo = environment().await;
            let predicate = repo.active_predicate().await;
            // u3 has no principal record.
            let actor = PrincipalId::new(format!("u{}", actor));
            let request = if admin_only {
                AccessRequest::admin_only()
            } else {
                AccessRequest::tenant(TenantId::new(TENANTS[target]))
            };

            let view = repo.directory().snapshot().await;
            let first = predicate.evaluate(&view, &actor, &request);
            let second = predicate.evaluate(&view, &actor, &request);
            prop_assert_eq!(first, second);
            if admin_only {
                prop_assert!(!first.allowed);
            }

            Ok(())
        })?;
    }
}
