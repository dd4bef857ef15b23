// SPDX-License-Identifier: PMPL-1.0-or-later
//! Performance benchmarks for tenant enforcement and audit sealing

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use serde_json::json;
use std::sync::Arc;
use tokio::runtime::Runtime;

use rapport_audit::{changed_fields, AuditDraft, AuditOperation, DataClassification};
use rapport_authz::{
    AccessRequest, AuthorizationPredicate, LegacyTenantPredicate, TenantPredicate,
};
use rapport_repository::{Repository, RepositoryConfig, Row, RowQuery};
use rapport_storage::InMemoryBackend;
use rapport_tenancy::{ActorContext, Directory, PrincipalId, TenantId};

const TENANTS: usize = 20;

async fn directory_with_tenants() -> Directory {
    let directory = Directory::new();
    let root = ActorContext::new("root");
    directory
        .bootstrap_admin(PrincipalId::new("root"))
        .await
        .unwrap();
    for i in 0..TENANTS {
        let tenant = TenantId::new(format!("t{}", i));
        directory
            .create_tenant(&root, tenant.clone(), &format!("Tenant {}", i))
            .await
            .unwrap();
        directory
            .register_principal(
                &root,
                PrincipalId::new(format!("u{}", i)),
                &format!("u{}@t{}.test", i, i),
                tenant,
            )
            .await
            .unwrap();
    }
    directory
}

// ============================================================================
// Predicate Benchmarks
// ============================================================================

fn bench_predicate_evaluate(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let directory = rt.block_on(directory_with_tenants());
    let view = rt.block_on(directory.snapshot());

    let actor = PrincipalId::new("u3");
    let own = AccessRequest::tenant(TenantId::new("t3"));
    let foreign = AccessRequest::tenant(TenantId::new("t7"));

    let mut group = c.benchmark_group("predicate");
    let predicates: [(&str, &dyn AuthorizationPredicate); 2] =
        [("v1", &LegacyTenantPredicate), ("v2", &TenantPredicate)];
    for (name, predicate) in predicates {
        group.bench_with_input(BenchmarkId::new("own_tenant", name), &own, |b, request| {
            b.iter(|| black_box(predicate.evaluate(&view, &actor, request)))
        });
        group.bench_with_input(
            BenchmarkId::new("foreign_tenant", name),
            &foreign,
            |b, request| b.iter(|| black_box(predicate.evaluate(&view, &actor, request))),
        );
    }
    group.finish();
}

// ============================================================================
// Audit Benchmarks
// ============================================================================

fn bench_audit_seal(c: &mut Criterion) {
    let ctx = ActorContext::new("u1").with_purpose("benchmark");
    let old = json!({"id": "c1", "name": "Carol", "email": "carol@t1.test", "tenant_id": "t1"});
    let new = json!({"id": "c1", "name": "Caroline", "email": "carol@t1.test", "tenant_id": "t1"});

    let mut group = c.benchmark_group("audit");
    group.bench_function("diff_and_seal_update", |b| {
        b.iter(|| {
            let draft = AuditDraft::new(
                &ctx,
                "contacts",
                AuditOperation::Update,
                DataClassification::Pii,
            )
            .record_id("c1")
            .tenant(Some(TenantId::new("t1")))
            .changed(changed_fields(Some(&old), Some(&new)))
            .states(Some(old.clone()), Some(new.clone()));
            black_box(draft.seal(1))
        })
    });
    group.finish();
}

// ============================================================================
// Repository Benchmarks
// ============================================================================

fn bench_repository_select(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let mut group = c.benchmark_group("repository");

    for rows_per_tenant in [10usize, 100] {
        let repo = rt.block_on(async {
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
            for t in 0..4 {
                let tenant = TenantId::new(format!("t{}", t));
                directory
                    .create_tenant(&root, tenant.clone(), &format!("Tenant {}", t))
                    .await
                    .unwrap();
                directory
                    .register_principal(
                        &root,
                        PrincipalId::new(format!("u{}", t)),
                        &format!("u{}@t{}.test", t, t),
                        tenant,
                    )
                    .await
                    .unwrap();
                let ctx = ActorContext::new(format!("u{}", t));
                for i in 0..rows_per_tenant {
                    let mut row = Row::new();
                    row.insert("name".to_string(), json!(format!("Org {}", i)));
                    repo.insert(&ctx, "organizations", row).await.unwrap();
                }
            }
            repo
        });

        let ctx = ActorContext::new("u0");
        group.throughput(Throughput::Elements((rows_per_tenant * 4) as u64));
        group.bench_with_input(
            BenchmarkId::new("select_filtered", rows_per_tenant),
            &rows_per_tenant,
            |b, _| {
                b.to_async(&rt).iter(|| async {
                    black_box(
                        repo.select(&ctx, "organizations", &RowQuery::all())
                            .await
                            .unwrap(),
                    )
                })
            },
        );
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_predicate_evaluate,
    bench_audit_seal,
    bench_repository_select,
);
criterion_main!(benches);
