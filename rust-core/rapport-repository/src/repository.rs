// SPDX-License-Identifier: PMPL-1.0-or-later
//! Tenant-enforcing repository.
//!
//! Every query and mutation on a tenant-scoped table goes through
//! [`Repository`], which resolves each row's tenant, filters rows through
//! the active authorization predicate, runs the mutation guards and
//! writes the audit trail. Mutations are serialized by one async write
//! section: the row batch is applied first and the audit record follows
//! inside the same section.

use std::sync::Arc;
use std::time::Instant;

use chrono::{TimeDelta, Utc};
use prometheus::Registry;
use rapport_anomaly::AnomalyDetector;
use rapport_audit::views::{
    admin_activity, bulk_access, cross_tenant_attempts, failed_access, recent_sensitive_access,
    summarize, verify_all,
};
use rapport_audit::{
    AuditLog, AuditQuery, AuditRecord, AuditRecorder, AuditSummary, AuditView, BulkAccessRow,
    ClassificationMap, FailedAccessRow, IntegrityReport, RowChange, StoredAuditLog, AUDIT_TABLE,
};
use rapport_authz::{
    AccessRequest, AuthorizationPredicate, AuthzError, DecisionReason, GuardChain, GuardContext,
    GuardError, InsertDecision, PolicyGeneration, PolicyRollout, RolloutState,
    RolloutTransition, RowFilter, RowOperation, SecurityEvent, SecurityEventKind,
    AuditImmutabilityGuard, TenantTransferGuard,
};
use rapport_storage::{SharedBackend, TypedStore};
use rapport_tenancy::{ActorContext, Directory, DirectoryView, MutationKind, TenantId};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::config::RepositoryConfig;
use crate::error::RepositoryError;
use crate::migrations::{MigrationId, MigrationRunner, MigrationTarget, TENANT_POLICIES_V2_SHADOW};
use crate::perf::{PerformanceRow, PerformanceTracker};
use crate::row::{row_id, Row, RowQuery, CREATED_AT_COLUMN, ID_COLUMN, UPDATED_AT_COLUMN};
use crate::schema::{Schema, TableSpec, TenantResolution};

/// Rows produced by one audit view.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum AuditViewRows {
    Records(Vec<AuditRecord>),
    BulkAccess(Vec<BulkAccessRow>),
    FailedAccess(Vec<FailedAccessRow>),
}

impl AuditViewRows {
    pub fn len(&self) -> usize {
        match self {
            AuditViewRows::Records(rows) => rows.len(),
            AuditViewRows::BulkAccess(rows) => rows.len(),
            AuditViewRows::FailedAccess(rows) => rows.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Installed and enabled policy counts per generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyCounts {
    pub v1_installed: usize,
    pub v1_enabled: usize,
    pub v2_installed: usize,
    pub v2_enabled: usize,
}

/// Schema, rollout state and migration progress. Changed only by
/// migrations and policy transitions.
struct Catalog {
    schema: Schema,
    rollout: PolicyRollout,
    runner: MigrationRunner,
    guards: GuardChain,
}

impl Catalog {
    /// Spec of a table reachable through generic row access.
    fn table(&self, name: &str) -> Result<&TableSpec, RepositoryError> {
        if name == AUDIT_TABLE {
            return Err(RepositoryError::ReservedTable(name.to_string()));
        }
        self.schema
            .get(name)
            .ok_or_else(|| RepositoryError::UnknownTable(name.to_string()))
    }
}

fn guard_chain(schema: &Schema) -> GuardChain {
    GuardChain::new()
        .with(TenantTransferGuard::new(schema.scoped_table_names()))
        .with(AuditImmutabilityGuard::new(AUDIT_TABLE))
}

/// A row with its resolved tenant.
type Resolved = (Row, Option<TenantId>);

/// A planned row update.
struct PlannedUpdate {
    id: String,
    before: Row,
    before_tenant: Option<TenantId>,
    after: Row,
    after_tenant: Option<TenantId>,
}

pub struct Repository {
    config: RepositoryConfig,
    backend: SharedBackend,
    catalog: RwLock<Catalog>,
    directory: Directory,
    recorder: Arc<AuditRecorder>,
    audit_log: Arc<dyn AuditLog>,
    detector: Arc<AnomalyDetector>,
    perf: PerformanceTracker,
    /// Serializes every mutation and its audit write
    write_lock: Mutex<()>,
}

impl Repository {
    /// Open a repository whose audit log lives in `backend`. No
    /// migrations are applied.
    pub async fn open(
        config: RepositoryConfig,
        backend: SharedBackend,
    ) -> Result<Self, RepositoryError> {
        let log = Arc::new(StoredAuditLog::open(backend.clone()).await?);
        Self::open_with(config, backend, log, None)
    }

    /// Open with an explicit audit log, optionally registering anomaly
    /// counters in `registry`.
    pub fn open_with(
        config: RepositoryConfig,
        backend: SharedBackend,
        audit_log: Arc<dyn AuditLog>,
        registry: Option<&Registry>,
    ) -> Result<Self, RepositoryError> {
        let mut detector = AnomalyDetector::new(audit_log.clone(), config.anomaly.clone());
        if let Some(registry) = registry {
            detector = detector.with_prometheus(registry)?;
        }
        let detector = Arc::new(detector);

        let recorder = Arc::new(
            AuditRecorder::with_config(
                audit_log.clone(),
                ClassificationMap::default(),
                config.audit.clone(),
            )
            .with_listener(detector.clone()),
        );
        let directory = Directory::new().with_observer(recorder.clone());

        let schema = Schema::default();
        let catalog = Catalog {
            guards: guard_chain(&schema),
            schema,
            rollout: PolicyRollout::new(PolicyGeneration::V1),
            runner: MigrationRunner::builtin()?,
        };

        Ok(Self {
            config,
            backend,
            catalog: RwLock::new(catalog),
            directory,
            recorder,
            audit_log,
            detector,
            perf: PerformanceTracker::new(),
            write_lock: Mutex::new(()),
        })
    }

    /// Open and migrate up to the configured policy generation.
    pub async fn open_migrated(
        config: RepositoryConfig,
        backend: SharedBackend,
    ) -> Result<Self, RepositoryError> {
        let repo = Self::open(config, backend).await?;
        repo.migrate_to_configured().await?;
        Ok(repo)
    }

    pub fn config(&self) -> &RepositoryConfig {
        &self.config
    }

    pub fn directory(&self) -> &Directory {
        &self.directory
    }

    pub fn recorder(&self) -> Arc<AuditRecorder> {
        self.recorder.clone()
    }

    pub fn audit_log(&self) -> &Arc<dyn AuditLog> {
        &self.audit_log
    }

    pub fn detector(&self) -> &Arc<AnomalyDetector> {
        &self.detector
    }

    /// The authoritative predicate.
    pub async fn active_predicate(&self) -> Arc<dyn AuthorizationPredicate> {
        self.catalog.read().await.rollout.active()
    }

    pub async fn rollout_state(&self) -> RolloutState {
        self.catalog.read().await.rollout.state()
    }

    pub async fn policy_counts(&self) -> PolicyCounts {
        let catalog = self.catalog.read().await;
        let policies = catalog.rollout.catalog();
        PolicyCounts {
            v1_installed: policies.count(PolicyGeneration::V1),
            v1_enabled: policies.enabled_count(PolicyGeneration::V1),
            v2_installed: policies.count(PolicyGeneration::V2),
            v2_enabled: policies.enabled_count(PolicyGeneration::V2),
        }
    }

    pub async fn tables(&self) -> Vec<TableSpec> {
        self.catalog.read().await.schema.tables().cloned().collect()
    }

    pub async fn applied_migrations(&self) -> Vec<MigrationId> {
        self.catalog.read().await.runner.applied().to_vec()
    }

    pub async fn pending_migrations(&self) -> Vec<MigrationId> {
        self.catalog
            .read()
            .await
            .runner
            .pending()
            .map(|m| m.id.clone())
            .collect()
    }

    fn rows(&self, table: &str) -> TypedStore {
        TypedStore::new(self.backend.clone(), &format!("rows/{}", table))
    }

    // -----------------------------------------------------------------------
    // Migrations and policy rollout
    // -----------------------------------------------------------------------

    /// Apply pending migrations, up to and including `until` when given.
    /// Policy transitions performed by migrations are audited as the
    /// system actor.
    #[instrument(skip(self))]
    pub async fn migrate(
        &self,
        until: Option<&MigrationId>,
    ) -> Result<Vec<MigrationId>, RepositoryError> {
        let _write = self.write_lock.lock().await;
        let (applied, transitions) = {
            let mut catalog = self.catalog.write().await;
            let Catalog {
                schema,
                rollout,
                runner,
                guards,
            } = &mut *catalog;
            let mut target = MigrationTarget {
                schema,
                rollout,
                transitions: Vec::new(),
            };
            let applied = runner.apply(&mut target, until)?;
            let transitions = target.transitions;
            *guards = guard_chain(schema);
            (applied, transitions)
        };

        let system = ActorContext::system().with_purpose("schema migration");
        for transition in &transitions {
            self.recorder
                .record_policy_transition(&system, transition)
                .await;
        }
        info!(applied = applied.len(), "Migrations complete");
        Ok(applied)
    }

    /// Migrate as far as `policy_generation` allows: with `v1` the
    /// switchover migration stays pending.
    pub async fn migrate_to_configured(&self) -> Result<Vec<MigrationId>, RepositoryError> {
        let until = match self.config.policy_generation {
            PolicyGeneration::V1 => Some(TENANT_POLICIES_V2_SHADOW.parse::<MigrationId>()?),
            PolicyGeneration::V2 => None,
        };
        self.migrate(until.as_ref()).await
    }

    /// Roll back the most recently applied migration.
    #[instrument(skip(self))]
    pub async fn rollback_migration(&self) -> Result<Option<MigrationId>, RepositoryError> {
        let _write = self.write_lock.lock().await;
        let (rolled, transitions) = {
            let mut catalog = self.catalog.write().await;
            let Catalog {
                schema,
                rollout,
                runner,
                guards,
            } = &mut *catalog;
            let mut target = MigrationTarget {
                schema,
                rollout,
                transitions: Vec::new(),
            };
            let rolled = runner.rollback_last(&mut target)?;
            let transitions = target.transitions;
            *guards = guard_chain(schema);
            (rolled, transitions)
        };

        let system = ActorContext::system().with_purpose("migration rollback");
        for transition in &transitions {
            self.recorder
                .record_policy_transition(&system, transition)
                .await;
        }
        Ok(rolled)
    }

    /// Make the v2 rule set authoritative. Administrators only.
    #[instrument(skip(self, ctx), fields(actor = %ctx.actor_id))]
    pub async fn switch_policy(
        &self,
        ctx: &ActorContext,
    ) -> Result<RolloutTransition, RepositoryError> {
        self.require_admin(ctx, "switch policy generation").await?;
        let _write = self.write_lock.lock().await;
        let transition = self.catalog.write().await.rollout.switchover()?;
        self.recorder.record_policy_transition(ctx, &transition).await;
        Ok(transition)
    }

    /// Restore the v1 rule set. Administrators only.
    #[instrument(skip(self, ctx), fields(actor = %ctx.actor_id))]
    pub async fn rollback_policy(
        &self,
        ctx: &ActorContext,
    ) -> Result<RolloutTransition, RepositoryError> {
        self.require_admin(ctx, "roll back policy generation").await?;
        let _write = self.write_lock.lock().await;
        let transition = self.catalog.write().await.rollout.rollback()?;
        self.recorder.record_policy_transition(ctx, &transition).await;
        Ok(transition)
    }

    // -----------------------------------------------------------------------
    // Enforcement helpers
    // -----------------------------------------------------------------------

    async fn require_admin(&self, ctx: &ActorContext, operation: &str) -> Result<(), RepositoryError> {
        let predicate = self.active_predicate().await;
        let decision = {
            let view = self.directory.read().await;
            predicate.evaluate(&*view, &ctx.actor_id, &AccessRequest::admin_only())
        };
        if decision.allowed {
            return Ok(());
        }
        self.report_denial(ctx, operation.to_string(), None, decision.reason, json!({}))
            .await;
        Err(RepositoryError::Forbidden(decision.reason))
    }

    async fn report_denial(
        &self,
        ctx: &ActorContext,
        operation: String,
        target_tenant: Option<TenantId>,
        reason: DecisionReason,
        metadata: Value,
    ) {
        let event = SecurityEvent {
            kind: SecurityEventKind::AccessDenied,
            actor_id: ctx.actor_id.clone(),
            target_tenant,
            operation,
            reason,
            purpose: ctx.purpose.clone(),
            metadata,
            occurred_at: Utc::now(),
        };
        self.recorder.record_denial(ctx, &event).await;
    }

    async fn is_admin(&self, ctx: &ActorContext) -> bool {
        self.directory.read().await.is_active_admin(&ctx.actor_id)
    }

    /// Resolve the owning tenant of `row`, following parent references.
    async fn resolve_tenant(
        &self,
        schema: &Schema,
        spec: &TableSpec,
        row: &Row,
    ) -> Result<Option<TenantId>, RepositoryError> {
        let max_hops = schema.tables().count();
        let mut spec = spec;
        let mut current = row.clone();

        for _ in 0..=max_hops {
            match &spec.resolution {
                TenantResolution::Unscoped => return Ok(None),
                TenantResolution::Direct { column } => {
                    return Ok(current
                        .get(column)
                        .and_then(Value::as_str)
                        .map(TenantId::new));
                }
                TenantResolution::ViaParent {
                    parent_table,
                    foreign_key,
                } => {
                    let Some(parent_id) = current.get(foreign_key).and_then(Value::as_str) else {
                        return Ok(None);
                    };
                    let Some(parent_spec) = schema.get(parent_table) else {
                        return Ok(None);
                    };
                    let Some(parent) = self.rows(parent_table).get::<Row>(parent_id).await?
                    else {
                        return Ok(None);
                    };
                    spec = parent_spec;
                    current = parent;
                }
            }
        }

        warn!(table = %spec.name, "Tenant resolution exceeded parent chain depth");
        Ok(None)
    }

    /// Validate a tenant reference supplied by a write. A direct column
    /// must be a string; a parent foreign key must name an existing row.
    async fn check_tenant_reference(
        &self,
        schema: &Schema,
        spec: &TableSpec,
        row: &Row,
    ) -> Result<(), RepositoryError> {
        match &spec.resolution {
            TenantResolution::Unscoped => Ok(()),
            TenantResolution::Direct { column } => match row.get(column) {
                Some(Value::String(tenant)) if !tenant.trim().is_empty() => Ok(()),
                _ => Err(RepositoryError::InvalidRow(format!(
                    "'{}' must be a non-empty string",
                    column
                ))),
            },
            TenantResolution::ViaParent {
                parent_table,
                foreign_key,
            } => {
                let Some(parent_id) = row.get(foreign_key).and_then(Value::as_str) else {
                    return Err(RepositoryError::InvalidRow(format!(
                        "'{}' must be a string",
                        foreign_key
                    )));
                };
                if schema.get(parent_table).is_none()
                    || self.rows(parent_table).get::<Row>(parent_id).await?.is_none()
                {
                    return Err(RepositoryError::InvalidRow(format!(
                        "'{}' references a missing {} row",
                        foreign_key, parent_table
                    )));
                }
                Ok(())
            }
        }
    }

    async fn resolve_all(
        &self,
        schema: &Schema,
        spec: &TableSpec,
        rows: Vec<Row>,
    ) -> Result<Vec<Resolved>, RepositoryError> {
        let mut resolved = Vec::with_capacity(rows.len());
        for row in rows {
            let tenant = self.resolve_tenant(schema, spec, &row).await?;
            resolved.push((row, tenant));
        }
        Ok(resolved)
    }

    /// Rows of `table` matching `query` that the actor may see. The query
    /// limit is applied after filtering.
    async fn visible_rows(
        &self,
        ctx: &ActorContext,
        catalog: &Catalog,
        spec: &TableSpec,
        query: &RowQuery,
        operation: RowOperation,
    ) -> Result<Vec<Resolved>, RepositoryError> {
        let predicate = catalog.rollout.active();
        let candidates: Vec<Row> = self
            .rows(&spec.name)
            .scan_all::<Row>()
            .await?
            .into_iter()
            .filter(|row| query.matches(row))
            .collect();
        let resolved = self.resolve_all(&catalog.schema, spec, candidates).await?;

        let view = self.directory.read().await;
        let filter = RowFilter::new(predicate.as_ref(), &*view, &ctx.actor_id);
        let visible = resolved
            .into_iter()
            .filter(|(_, tenant)| {
                !spec.is_tenant_scoped() || filter.can_target(operation, tenant.as_ref())
            })
            .take(query.limit.unwrap_or(usize::MAX))
            .collect();
        Ok(visible)
    }

    /// Reject a mutation on the audit table through the guard chain.
    async fn check_audit_table(
        &self,
        ctx: &ActorContext,
        catalog: &Catalog,
        table: &str,
        operation: RowOperation,
    ) -> Result<(), RepositoryError> {
        if table != AUDIT_TABLE {
            return Ok(());
        }
        catalog.guards.check(&GuardContext {
            table,
            operation,
            actor_is_admin: self.is_admin(ctx).await,
            old_tenant: None,
            new_tenant: None,
        })?;
        Err(RepositoryError::ReservedTable(table.to_string()))
    }

    async fn reject_insert(
        &self,
        ctx: &ActorContext,
        table: &str,
        tenant: Option<TenantId>,
        reason: DecisionReason,
    ) -> RepositoryError {
        self.report_denial(
            ctx,
            format!("insert {}", table),
            tenant,
            reason,
            json!({ "table": table }),
        )
        .await;
        AuthzError::RowSecurityViolation {
            table: table.to_string(),
            reason,
        }
        .into()
    }

    // -----------------------------------------------------------------------
    // Row access
    // -----------------------------------------------------------------------

    /// Insert a row. A missing id is generated; a missing tenant reference
    /// is filled from the actor's own assignment.
    #[instrument(skip(self, ctx, row), fields(actor = %ctx.actor_id))]
    pub async fn insert(
        &self,
        ctx: &ActorContext,
        table: &str,
        mut row: Row,
    ) -> Result<Row, RepositoryError> {
        let started = Instant::now();
        let _write = self.write_lock.lock().await;
        let catalog = self.catalog.read().await;
        let spec = catalog.table(table)?;

        for field in &spec.required {
            if row.get(field).map_or(true, Value::is_null) {
                return Err(RepositoryError::InvalidRow(format!(
                    "missing required field '{}'",
                    field
                )));
            }
        }
        let id = match row.get(ID_COLUMN) {
            None | Some(Value::Null) => {
                let id = Uuid::new_v4().to_string();
                row.insert(ID_COLUMN.to_string(), Value::String(id.clone()));
                id
            }
            Some(Value::String(id)) if !id.trim().is_empty() => id.clone(),
            Some(_) => {
                return Err(RepositoryError::InvalidRow(
                    "id must be a non-empty string".to_string(),
                ))
            }
        };

        let predicate = catalog.rollout.active();
        let tenant = match &spec.resolution {
            TenantResolution::Direct { column } => {
                let requested = match row.get(column) {
                    None | Some(Value::Null) => None,
                    Some(Value::String(t)) => Some(TenantId::new(t.as_str())),
                    Some(_) => {
                        return Err(RepositoryError::InvalidRow(format!(
                            "'{}' must be a string",
                            column
                        )))
                    }
                };
                let decision = {
                    let view = self.directory.read().await;
                    RowFilter::new(predicate.as_ref(), &*view, &ctx.actor_id)
                        .prepare_insert(requested.as_ref())
                };
                match decision {
                    InsertDecision::Allowed {
                        tenant,
                        auto_populated,
                    } => {
                        if auto_populated {
                            row.insert(column.clone(), Value::String(tenant.to_string()));
                        }
                        Some(tenant)
                    }
                    InsertDecision::Denied(reason) => {
                        return Err(self.reject_insert(ctx, table, requested, reason).await)
                    }
                }
            }
            TenantResolution::ViaParent { foreign_key, .. } => {
                if row.get(foreign_key).and_then(Value::as_str).is_none() {
                    return Err(RepositoryError::InvalidRow(format!(
                        "missing parent reference '{}'",
                        foreign_key
                    )));
                }
                let tenant = self.resolve_tenant(&catalog.schema, spec, &row).await?;
                let decision = {
                    let view = self.directory.read().await;
                    predicate.evaluate(
                        &*view,
                        &ctx.actor_id,
                        &AccessRequest::for_row(tenant.clone()),
                    )
                };
                if !decision.allowed {
                    return Err(self.reject_insert(ctx, table, tenant, decision.reason).await);
                }
                tenant
            }
            TenantResolution::Unscoped => None,
        };

        let store = self.rows(table);
        if store.get::<Row>(&id).await?.is_some() {
            return Err(RepositoryError::Conflict {
                table: table.to_string(),
                id,
            });
        }

        let now = Value::String(Utc::now().to_rfc3339());
        row.insert(CREATED_AT_COLUMN.to_string(), now.clone());
        row.insert(UPDATED_AT_COLUMN.to_string(), now);
        store.apply(&[store.put_op(&id, &row)?]).await?;
        debug!(table, record_id = %id, "Row inserted");

        self.recorder
            .record_mutation(
                ctx,
                &RowChange {
                    table: table.to_string(),
                    record_id: id,
                    kind: MutationKind::Insert,
                    old: None,
                    new: Some(Value::Object(row.clone())),
                    tenant,
                },
            )
            .await;

        self.perf
            .record(table, RowOperation::Insert, started.elapsed())
            .await;
        Ok(row)
    }

    /// Rows matching `query` that the actor may see. Reads of audited
    /// classifications are recorded per tenant.
    #[instrument(skip(self, ctx, query), fields(actor = %ctx.actor_id))]
    pub async fn select(
        &self,
        ctx: &ActorContext,
        table: &str,
        query: &RowQuery,
    ) -> Result<Vec<Row>, RepositoryError> {
        let started = Instant::now();
        let visible = {
            let catalog = self.catalog.read().await;
            let spec = catalog.table(table)?;
            self.visible_rows(ctx, &catalog, spec, query, RowOperation::Select)
                .await?
        };

        let tenants: Vec<Option<TenantId>> = visible.iter().map(|(_, t)| t.clone()).collect();
        self.recorder.record_read(ctx, table, &tenants).await;

        self.perf
            .record(table, RowOperation::Select, started.elapsed())
            .await;
        Ok(visible.into_iter().map(|(row, _)| row).collect())
    }

    /// One row by id, or `None` when it does not exist or is hidden.
    pub async fn get(
        &self,
        ctx: &ActorContext,
        table: &str,
        id: &str,
    ) -> Result<Option<Row>, RepositoryError> {
        Ok(self
            .select(ctx, table, &RowQuery::by_id(id))
            .await?
            .into_iter()
            .next())
    }

    /// Apply `patch` to every visible row matching `query`.
    ///
    /// All guards are checked before anything is written; the rows are
    /// then written as one batch. Hidden rows are skipped silently.
    #[instrument(skip(self, ctx, query, patch), fields(actor = %ctx.actor_id))]
    pub async fn update_where(
        &self,
        ctx: &ActorContext,
        table: &str,
        query: &RowQuery,
        patch: &Row,
    ) -> Result<Vec<Row>, RepositoryError> {
        let started = Instant::now();
        let _write = self.write_lock.lock().await;
        let catalog = self.catalog.read().await;
        self.check_audit_table(ctx, &catalog, table, RowOperation::Update)
            .await?;
        let spec = catalog.table(table)?;
        let actor_is_admin = self.is_admin(ctx).await;
        let visible = self
            .visible_rows(ctx, &catalog, spec, query, RowOperation::Update)
            .await?;

        let reference = spec.resolution.reference_column();
        let retargets = reference.is_some_and(|column| patch.contains_key(column));
        if retargets {
            self.check_tenant_reference(&catalog.schema, spec, patch)
                .await?;
        }
        let now = Value::String(Utc::now().to_rfc3339());

        let mut planned = Vec::with_capacity(visible.len());
        for (before, before_tenant) in visible {
            let id = row_id(&before)?.to_string();
            if let Some(requested) = patch.get(ID_COLUMN) {
                if requested.as_str() != Some(id.as_str()) {
                    return Err(RepositoryError::InvalidRow(
                        "id cannot be changed".to_string(),
                    ));
                }
            }

            let mut after = before.clone();
            for (field, value) in patch {
                if field != CREATED_AT_COLUMN && field != UPDATED_AT_COLUMN {
                    after.insert(field.clone(), value.clone());
                }
            }
            after.insert(UPDATED_AT_COLUMN.to_string(), now.clone());

            let after_tenant = if retargets {
                self.resolve_tenant(&catalog.schema, spec, &after).await?
            } else {
                before_tenant.clone()
            };
            planned.push(PlannedUpdate {
                id,
                before,
                before_tenant,
                after,
                after_tenant,
            });
        }

        for plan in &planned {
            let checked = catalog.guards.check(&GuardContext {
                table,
                operation: RowOperation::Update,
                actor_is_admin,
                old_tenant: plan.before_tenant.as_ref(),
                new_tenant: plan.after_tenant.as_ref(),
            });
            if let Err(err) = checked {
                let guard = match err {
                    GuardError::CrossTenantTransfer => "tenant_transfer",
                    GuardError::AuditTamper => "audit_immutability",
                };
                self.report_denial(
                    ctx,
                    format!("update {}", table),
                    plan.after_tenant.clone(),
                    DecisionReason::TenantMismatch,
                    json!({
                        "guard": guard,
                        "record_id": plan.id,
                        "from_tenant": plan.before_tenant,
                    }),
                )
                .await;
                return Err(err.into());
            }
        }

        if spec.is_tenant_scoped() {
            let predicate = catalog.rollout.active();
            let rejected = {
                let view = self.directory.read().await;
                let filter = RowFilter::new(predicate.as_ref(), &*view, &ctx.actor_id);
                planned.iter().find_map(|plan| {
                    let decision = filter.check_update(
                        plan.before_tenant.as_ref(),
                        plan.after_tenant.as_ref(),
                    );
                    (!decision.allowed).then(|| (plan.after_tenant.clone(), decision.reason))
                })
            };
            if let Some((tenant, reason)) = rejected {
                self.report_denial(
                    ctx,
                    format!("update {}", table),
                    tenant,
                    reason,
                    json!({ "table": table }),
                )
                .await;
                return Err(AuthzError::RowSecurityViolation {
                    table: table.to_string(),
                    reason,
                }
                .into());
            }
        }

        let store = self.rows(table);
        let ops = planned
            .iter()
            .map(|plan| store.put_op(&plan.id, &plan.after))
            .collect::<Result<Vec<_>, _>>()?;
        if !ops.is_empty() {
            store.apply(&ops).await?;
        }
        debug!(table, rows = planned.len(), "Rows updated");

        let mut updated = Vec::with_capacity(planned.len());
        for plan in planned {
            self.recorder
                .record_mutation(
                    ctx,
                    &RowChange {
                        table: table.to_string(),
                        record_id: plan.id,
                        kind: MutationKind::Update,
                        old: Some(Value::Object(plan.before)),
                        new: Some(Value::Object(plan.after.clone())),
                        tenant: plan.after_tenant,
                    },
                )
                .await;
            updated.push(plan.after);
        }

        self.perf
            .record(table, RowOperation::Update, started.elapsed())
            .await;
        Ok(updated)
    }

    /// Update one row. `None` when the row does not exist or is hidden.
    pub async fn update(
        &self,
        ctx: &ActorContext,
        table: &str,
        id: &str,
        patch: &Row,
    ) -> Result<Option<Row>, RepositoryError> {
        Ok(self
            .update_where(ctx, table, &RowQuery::by_id(id), patch)
            .await?
            .into_iter()
            .next())
    }

    /// Delete every visible row matching `query` in one batch.
    #[instrument(skip(self, ctx, query), fields(actor = %ctx.actor_id))]
    pub async fn delete_where(
        &self,
        ctx: &ActorContext,
        table: &str,
        query: &RowQuery,
    ) -> Result<Vec<Row>, RepositoryError> {
        let started = Instant::now();
        let _write = self.write_lock.lock().await;
        let catalog = self.catalog.read().await;
        self.check_audit_table(ctx, &catalog, table, RowOperation::Delete)
            .await?;
        let spec = catalog.table(table)?;
        let visible = self
            .visible_rows(ctx, &catalog, spec, query, RowOperation::Delete)
            .await?;

        let store = self.rows(table);
        let mut ops = Vec::with_capacity(visible.len());
        for (row, _) in &visible {
            ops.push(store.delete_op(row_id(row)?));
        }
        if !ops.is_empty() {
            store.apply(&ops).await?;
        }
        debug!(table, rows = visible.len(), "Rows deleted");

        let mut deleted = Vec::with_capacity(visible.len());
        for (row, tenant) in visible {
            let id = row_id(&row)?.to_string();
            self.recorder
                .record_mutation(
                    ctx,
                    &RowChange {
                        table: table.to_string(),
                        record_id: id,
                        kind: MutationKind::Delete,
                        old: Some(Value::Object(row.clone())),
                        new: None,
                        tenant,
                    },
                )
                .await;
            deleted.push(row);
        }

        self.perf
            .record(table, RowOperation::Delete, started.elapsed())
            .await;
        Ok(deleted)
    }

    /// Delete one row. `false` when it does not exist or is hidden.
    pub async fn delete(
        &self,
        ctx: &ActorContext,
        table: &str,
        id: &str,
    ) -> Result<bool, RepositoryError> {
        Ok(!self
            .delete_where(ctx, table, &RowQuery::by_id(id))
            .await?
            .is_empty())
    }

    // -----------------------------------------------------------------------
    // Audit surfaces (administrators only)
    // -----------------------------------------------------------------------

    async fn recent_records(&self, hours: i64) -> Result<Vec<AuditRecord>, RepositoryError> {
        let mut query = AuditQuery::all();
        if let Some(since) = TimeDelta::try_hours(hours.max(0))
            .and_then(|window| Utc::now().checked_sub_signed(window))
        {
            query = query.since(since);
        }
        Ok(self.audit_log.query(&query).await?)
    }

    /// Every audit record of one row, oldest first.
    pub async fn audit_trail(
        &self,
        ctx: &ActorContext,
        table: &str,
        record_id: &str,
    ) -> Result<Vec<AuditRecord>, RepositoryError> {
        self.require_admin(ctx, "read the audit trail").await?;
        Ok(self
            .audit_log
            .query(&AuditQuery::all().table(table).record(record_id))
            .await?)
    }

    pub async fn audit_summary(
        &self,
        ctx: &ActorContext,
        hours: i64,
    ) -> Result<AuditSummary, RepositoryError> {
        self.require_admin(ctx, "read the audit summary").await?;
        let records = self.recent_records(hours).await?;
        Ok(summarize(&records, hours))
    }

    /// Evaluate one reporting view over the trailing `hours`.
    pub async fn audit_view(
        &self,
        ctx: &ActorContext,
        view: AuditView,
        hours: i64,
    ) -> Result<AuditViewRows, RepositoryError> {
        self.require_admin(ctx, "read audit views").await?;
        let records = self.recent_records(hours).await?;
        let rows = match view {
            AuditView::RecentSensitiveAccess => {
                AuditViewRows::Records(recent_sensitive_access(&records))
            }
            AuditView::CrossTenantAttempts => AuditViewRows::Records(cross_tenant_attempts(&records)),
            AuditView::AdminActivity => {
                let directory = self.directory.read().await;
                AuditViewRows::Records(admin_activity(&records, |actor| {
                    directory.admin_entry(actor).is_some()
                }))
            }
            AuditView::BulkAccess => AuditViewRows::BulkAccess(bulk_access(
                &records,
                self.config.bulk_access_threshold,
            )),
            AuditView::FailedAccess => AuditViewRows::FailedAccess(failed_access(&records)),
        };
        Ok(rows)
    }

    pub async fn performance_metrics(
        &self,
        ctx: &ActorContext,
    ) -> Result<Vec<PerformanceRow>, RepositoryError> {
        self.require_admin(ctx, "read performance metrics").await?;
        Ok(self.perf.snapshot().await)
    }

    /// Recompute every audit checksum.
    pub async fn verify_audit(&self, ctx: &ActorContext) -> Result<IntegrityReport, RepositoryError> {
        self.require_admin(ctx, "verify the audit log").await?;
        let records = self.audit_log.query(&AuditQuery::all()).await?;
        let report = verify_all(&records);
        if !report.is_intact() {
            warn!(mismatched = report.mismatched.len(), "Audit checksum mismatch");
        }
        Ok(report)
    }
}
