// SPDX-License-Identifier: PMPL-1.0-or-later
//! Audit recorder.
//!
//! Turns row mutations, classified reads, security events and policy
//! transitions into audit records. Recording never fails the caller: a
//! failed append is logged at `warn` and dropped.
//!
//! Listeners (the anomaly detector) are notified after each successful
//! append.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use rapport_authz::{RolloutTransition, SecurityEvent, SecurityEventSink};
use rapport_tenancy::{
    ActorContext, DirectoryChange, DirectoryObserver, MutationKind, TenantId, ADMIN_ROSTER_TABLE,
    TENANTS_TABLE, USERS_TABLE,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::classification::{ClassificationMap, DataClassification};
use crate::diff::changed_fields;
use crate::log::AuditLog;
use crate::record::{AuditDraft, AuditOperation, AuditRecord};

/// Logical table of security events
pub const SECURITY_EVENTS_TABLE: &str = "security_events";
/// Logical table of policy transitions
pub const POLICY_TABLE: &str = "policy_rollout";

/// Notified of every appended record.
#[async_trait]
pub trait AuditListener: Send + Sync {
    async fn record_appended(&self, record: &AuditRecord);
}

/// One applied row mutation.
#[derive(Debug, Clone, PartialEq)]
pub struct RowChange {
    pub table: String,
    pub record_id: String,
    pub kind: MutationKind,
    pub old: Option<Value>,
    pub new: Option<Value>,
    /// Resolved tenant of the row, if any
    pub tenant: Option<TenantId>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RecorderConfig {
    /// Classifications whose reads are audited
    pub audit_read_classifications: Vec<DataClassification>,
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            audit_read_classifications: vec![
                DataClassification::Pii,
                DataClassification::Sensitive,
                DataClassification::Confidential,
            ],
        }
    }
}

pub struct AuditRecorder {
    log: Arc<dyn AuditLog>,
    classification: ClassificationMap,
    audited_reads: HashSet<DataClassification>,
    listeners: Vec<Arc<dyn AuditListener>>,
}

impl AuditRecorder {
    pub fn new(log: Arc<dyn AuditLog>) -> Self {
        Self::with_config(log, ClassificationMap::default(), RecorderConfig::default())
    }

    pub fn with_config(
        log: Arc<dyn AuditLog>,
        classification: ClassificationMap,
        config: RecorderConfig,
    ) -> Self {
        Self {
            log,
            classification,
            audited_reads: config.audit_read_classifications.into_iter().collect(),
            listeners: Vec::new(),
        }
    }

    pub fn with_listener(mut self, listener: Arc<dyn AuditListener>) -> Self {
        self.listeners.push(listener);
        self
    }

    pub fn log(&self) -> &Arc<dyn AuditLog> {
        &self.log
    }

    pub fn classify(&self, table: &str) -> DataClassification {
        self.classification.classify(table)
    }

    async fn append(&self, draft: AuditDraft) -> Option<AuditRecord> {
        let table = draft.table_name.clone();
        let operation = draft.operation;
        match self.log.append(draft).await {
            Ok(record) => {
                for listener in &self.listeners {
                    listener.record_appended(&record).await;
                }
                Some(record)
            }
            Err(err) => {
                warn!(table = %table, operation = %operation, error = %err, "Audit write failed");
                None
            }
        }
    }

    /// Record an applied mutation. No-op updates produce no record.
    pub async fn record_mutation(
        &self,
        ctx: &ActorContext,
        change: &RowChange,
    ) -> Option<AuditRecord> {
        let changed = changed_fields(change.old.as_ref(), change.new.as_ref());
        if change.kind == MutationKind::Update && changed.is_empty() {
            debug!(table = %change.table, record_id = %change.record_id, "No-op update not audited");
            return None;
        }

        let draft = AuditDraft::new(
            ctx,
            change.table.clone(),
            AuditOperation::from(change.kind),
            self.classify(&change.table),
        )
        .record_id(change.record_id.clone())
        .tenant(change.tenant.clone())
        .states(change.old.clone(), change.new.clone())
        .changed(changed);

        self.append(draft).await
    }

    /// Record a read of `table` returning rows from the given tenants.
    ///
    /// Only tables whose classification is audited produce records: one per
    /// distinct tenant, carrying the row count.
    pub async fn record_read(
        &self,
        ctx: &ActorContext,
        table: &str,
        tenants: &[Option<TenantId>],
    ) -> Vec<AuditRecord> {
        let classification = self.classify(table);
        if tenants.is_empty() || !self.audited_reads.contains(&classification) {
            return Vec::new();
        }

        let mut counts: BTreeMap<Option<TenantId>, u64> = BTreeMap::new();
        for tenant in tenants {
            *counts.entry(tenant.clone()).or_default() += 1;
        }

        let mut written = Vec::with_capacity(counts.len());
        for (tenant, row_count) in counts {
            let draft = AuditDraft::new(ctx, table, AuditOperation::Read, classification)
                .tenant(tenant)
                .metadata(json!({ "row_count": row_count }));
            if let Some(record) = self.append(draft).await {
                written.push(record);
            }
        }
        written
    }

    /// Record a policy switchover or rollback.
    pub async fn record_policy_transition(
        &self,
        ctx: &ActorContext,
        transition: &RolloutTransition,
    ) -> Option<AuditRecord> {
        let operation = if transition.to > transition.from {
            AuditOperation::PolicySwitchover
        } else {
            AuditOperation::PolicyRollback
        };
        let draft = AuditDraft::new(ctx, POLICY_TABLE, operation, self.classify(POLICY_TABLE))
            .metadata(json!({ "from": transition.from, "to": transition.to }));
        self.append(draft).await
    }

    /// Record a denied access attempt.
    pub async fn record_denial(&self, ctx: &ActorContext, event: &SecurityEvent) -> Option<AuditRecord> {
        let mut metadata = json!({
            "operation": event.operation,
            "reason": event.reason,
        });
        if let (Value::Object(target), Value::Object(extra)) = (&mut metadata, &event.metadata) {
            for (k, v) in extra {
                target.entry(k.clone()).or_insert_with(|| v.clone());
            }
        }

        let mut draft = AuditDraft::new(
            ctx,
            SECURITY_EVENTS_TABLE,
            AuditOperation::AccessDenied,
            self.classify(SECURITY_EVENTS_TABLE),
        )
        .tenant(event.target_tenant.clone())
        .event_type("access_denied")
        .metadata(metadata);
        draft.actor_id = event.actor_id.clone();
        if event.purpose.is_some() {
            draft.purpose = event.purpose.clone();
        }
        self.append(draft).await
    }
}

fn directory_row_tenant(change: &DirectoryChange) -> Option<TenantId> {
    let row = change.new.as_ref().or(change.old.as_ref())?;
    match change.table.as_str() {
        TENANTS_TABLE => row.get("id"),
        USERS_TABLE => row.get("tenant_id"),
        ADMIN_ROSTER_TABLE => None,
        _ => row.get("tenant_id"),
    }
    .and_then(Value::as_str)
    .map(TenantId::new)
}

#[async_trait]
impl DirectoryObserver for AuditRecorder {
    async fn directory_changed(&self, ctx: &ActorContext, change: &DirectoryChange) {
        let row = RowChange {
            table: change.table.clone(),
            record_id: change.record_id.clone(),
            kind: change.kind,
            old: change.old.clone(),
            new: change.new.clone(),
            tenant: directory_row_tenant(change),
        };
        self.record_mutation(ctx, &row).await;
    }
}

#[async_trait]
impl SecurityEventSink for AuditRecorder {
    async fn record_security_event(&self, event: SecurityEvent) {
        let mut ctx = ActorContext::new(event.actor_id.clone());
        ctx.set_purpose(event.purpose.clone());
        self.record_denial(&ctx, &event).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AuditError;
    use crate::log::{AuditQuery, StoredAuditLog};
    use rapport_authz::{DecisionReason, PolicyGeneration, SecurityEventKind};
    use rapport_storage::InMemoryBackend;
    use rapport_tenancy::{Directory, PrincipalId};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use uuid::Uuid;

    async fn recorder() -> (AuditRecorder, Arc<StoredAuditLog>) {
        let log = Arc::new(
            StoredAuditLog::open(Arc::new(InMemoryBackend::new()))
                .await
                .unwrap(),
        );
        (AuditRecorder::new(log.clone()), log)
    }

    fn update(old: Value, new: Value) -> RowChange {
        RowChange {
            table: "contacts".to_string(),
            record_id: "c1".to_string(),
            kind: MutationKind::Update,
            old: Some(old),
            new: Some(new),
            tenant: Some(TenantId::new("T1")),
        }
    }

    #[tokio::test]
    async fn test_noop_update_writes_nothing() {
        let (recorder, log) = recorder().await;
        let ctx = ActorContext::new("u1");
        let row = json!({"id": "c1", "name": "Ada", "updated_at": "t0"});
        let touched = json!({"id": "c1", "name": "Ada", "updated_at": "t1"});
        assert!(recorder.record_mutation(&ctx, &update(row, touched)).await.is_none());
        assert!(log.is_empty().await.unwrap());
    }

    #[tokio::test]
    async fn test_update_record_fields() {
        let (recorder, _) = recorder().await;
        let ctx = ActorContext::new("u1").with_purpose("data cleanup");
        let record = recorder
            .record_mutation(
                &ctx,
                &update(json!({"id": "c1", "name": "Ada"}), json!({"id": "c1", "name": "Grace"})),
            )
            .await
            .unwrap();
        assert_eq!(record.operation, AuditOperation::Update);
        assert_eq!(record.changed_fields, vec!["name"]);
        assert_eq!(record.classification, DataClassification::Pii);
        assert_eq!(record.tenant_id, Some(TenantId::new("T1")));
        assert_eq!(record.purpose.as_deref(), Some("data cleanup"));
        assert!(record.verify());
    }

    #[tokio::test]
    async fn test_read_records_one_per_tenant() {
        let (recorder, _) = recorder().await;
        let ctx = ActorContext::new("root");
        let t1 = Some(TenantId::new("T1"));
        let t2 = Some(TenantId::new("T2"));
        let records = recorder
            .record_read(&ctx, "contacts", &[t1.clone(), t1, t2])
            .await;
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].row_count(), Some(2));
        assert_eq!(records[1].row_count(), Some(1));

        assert!(recorder.record_read(&ctx, "scratch", &[None]).await.is_empty());
    }

    #[tokio::test]
    async fn test_security_event_record() {
        let (recorder, log) = recorder().await;
        recorder
            .record_security_event(SecurityEvent {
                kind: SecurityEventKind::AccessDenied,
                actor_id: PrincipalId::new("u1"),
                target_tenant: Some(TenantId::new("T2")),
                operation: "view contacts".to_string(),
                reason: DecisionReason::TenantMismatch,
                purpose: None,
                metadata: json!({"request_id": "req-1"}),
                occurred_at: chrono::Utc::now(),
            })
            .await;

        let records = log
            .query(&AuditQuery::all().operations([AuditOperation::AccessDenied]))
            .await
            .unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].metadata["reason"], "tenant_mismatch");
        assert_eq!(records[0].metadata["request_id"], "req-1");
        assert_eq!(records[0].classification, DataClassification::Sensitive);
    }

    #[tokio::test]
    async fn test_policy_transition_operations() {
        let (recorder, _) = recorder().await;
        let ctx = ActorContext::system();
        let up = RolloutTransition {
            from: PolicyGeneration::V1,
            to: PolicyGeneration::V2,
        };
        let down = RolloutTransition {
            from: PolicyGeneration::V2,
            to: PolicyGeneration::V1,
        };
        assert_eq!(
            recorder.record_policy_transition(&ctx, &up).await.unwrap().operation,
            AuditOperation::PolicySwitchover
        );
        assert_eq!(
            recorder.record_policy_transition(&ctx, &down).await.unwrap().operation,
            AuditOperation::PolicyRollback
        );
    }

    #[tokio::test]
    async fn test_directory_changes_are_audited() {
        let (recorder, log) = recorder().await;
        let directory = Directory::new().with_observer(Arc::new(recorder));
        directory.bootstrap_admin(PrincipalId::new("root")).await.unwrap();
        let admin = ActorContext::new("root");
        directory
            .create_tenant(&admin, TenantId::new("T1"), "Acme")
            .await
            .unwrap();
        directory
            .register_principal(&admin, PrincipalId::new("u1"), "u1@acme.test", TenantId::new("T1"))
            .await
            .unwrap();

        let users = log.query(&AuditQuery::all().table(USERS_TABLE)).await.unwrap();
        assert_eq!(users.len(), 1);
        assert_eq!(users[0].tenant_id, Some(TenantId::new("T1")));
        assert_eq!(users[0].classification, DataClassification::Pii);

        let roster = log.query(&AuditQuery::all().table(ADMIN_ROSTER_TABLE)).await.unwrap();
        assert_eq!(roster[0].classification, DataClassification::Sensitive);
        assert!(roster[0].tenant_id.is_none());
    }

    struct FailingLog;

    #[async_trait]
    impl AuditLog for FailingLog {
        async fn append(&self, _draft: AuditDraft) -> Result<AuditRecord, AuditError> {
            Err(AuditError::InvalidInput("storage offline".to_string()))
        }
        async fn get(&self, _id: Uuid) -> Result<Option<AuditRecord>, AuditError> {
            Ok(None)
        }
        async fn query(&self, _q: &AuditQuery) -> Result<Vec<AuditRecord>, AuditError> {
            Ok(Vec::new())
        }
    }

    #[derive(Default)]
    struct CountingListener(AtomicUsize);

    #[async_trait]
    impl AuditListener for CountingListener {
        async fn record_appended(&self, _record: &AuditRecord) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn test_failed_append_is_swallowed() {
        let listener = Arc::new(CountingListener::default());
        let recorder = AuditRecorder::new(Arc::new(FailingLog)).with_listener(listener.clone());
        let result = recorder
            .record_mutation(
                &ActorContext::new("u1"),
                &update(json!({"name": "a"}), json!({"name": "b"})),
            )
            .await;
        assert!(result.is_none());
        assert_eq!(listener.0.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_listener_sees_appends() {
        let (recorder, _) = recorder().await;
        let listener = Arc::new(CountingListener::default());
        let recorder = recorder.with_listener(listener.clone());
        recorder
            .record_mutation(
                &ActorContext::new("u1"),
                &update(json!({"name": "a"}), json!({"name": "b"})),
            )
            .await;
        assert_eq!(listener.0.load(Ordering::SeqCst), 1);
    }
}
