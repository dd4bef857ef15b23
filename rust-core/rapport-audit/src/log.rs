// SPDX-License-Identifier: PMPL-1.0-or-later
//! Insert-only audit log.
//!
//! [`AuditLog`] is the storage interface the recorder writes through.
//! [`StoredAuditLog`] keeps records in a [`TypedStore`] keyed by
//! zero-padded sequence number, so a namespace scan returns records in
//! append order.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rapport_storage::{SharedBackend, TypedStore};
use rapport_tenancy::{PrincipalId, TenantId};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use crate::error::AuditError;
use crate::record::{AuditDraft, AuditOperation, AuditRecord};

/// Logical table name of the audit log
pub const AUDIT_TABLE: &str = "audit_log";

/// Filter over audit records. Unset fields match everything.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuditQuery {
    pub actor_id: Option<PrincipalId>,
    pub tenant_id: Option<TenantId>,
    pub table_name: Option<String>,
    pub record_id: Option<String>,
    pub operations: Option<Vec<AuditOperation>>,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
    /// Keep only the newest `limit` matches
    pub limit: Option<usize>,
}

impl AuditQuery {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn actor(mut self, actor: PrincipalId) -> Self {
        self.actor_id = Some(actor);
        self
    }

    pub fn tenant(mut self, tenant: TenantId) -> Self {
        self.tenant_id = Some(tenant);
        self
    }

    pub fn table(mut self, table: impl Into<String>) -> Self {
        self.table_name = Some(table.into());
        self
    }

    pub fn record(mut self, record_id: impl Into<String>) -> Self {
        self.record_id = Some(record_id.into());
        self
    }

    pub fn operations(mut self, ops: impl IntoIterator<Item = AuditOperation>) -> Self {
        self.operations = Some(ops.into_iter().collect());
        self
    }

    pub fn since(mut self, since: DateTime<Utc>) -> Self {
        self.since = Some(since);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn matches(&self, record: &AuditRecord) -> bool {
        self.actor_id.as_ref().map_or(true, |a| &record.actor_id == a)
            && self
                .tenant_id
                .as_ref()
                .map_or(true, |t| record.tenant_id.as_ref() == Some(t))
            && self
                .table_name
                .as_ref()
                .map_or(true, |t| &record.table_name == t)
            && self
                .record_id
                .as_ref()
                .map_or(true, |r| record.record_id.as_ref() == Some(r))
            && self
                .operations
                .as_ref()
                .map_or(true, |ops| ops.contains(&record.operation))
            && self.since.map_or(true, |s| record.created_at >= s)
            && self.until.map_or(true, |u| record.created_at <= u)
    }
}

/// Append-only audit storage.
///
/// Records can only be appended; there is no update or delete.
#[async_trait]
pub trait AuditLog: Send + Sync {
    /// Seal and store a draft, returning the stored record.
    async fn append(&self, draft: AuditDraft) -> Result<AuditRecord, AuditError>;

    async fn get(&self, id: Uuid) -> Result<Option<AuditRecord>, AuditError>;

    /// Matching records, oldest first.
    async fn query(&self, query: &AuditQuery) -> Result<Vec<AuditRecord>, AuditError>;
}

/// Audit log persisted in the shared storage backend.
pub struct StoredAuditLog {
    store: TypedStore<SharedBackend>,
    next_sequence: Mutex<u64>,
}

fn sequence_key(sequence: u64) -> String {
    format!("{:020}", sequence)
}

impl StoredAuditLog {
    /// Open the log, resuming the sequence after the last stored record.
    pub async fn open(backend: SharedBackend) -> Result<Self, AuditError> {
        let store = TypedStore::new(backend, AUDIT_TABLE);
        let last = store
            .scan_all::<AuditRecord>()
            .await?
            .last()
            .map(|r| r.sequence)
            .unwrap_or(0);
        debug!(last_sequence = last, "Audit log opened");
        Ok(Self {
            store,
            next_sequence: Mutex::new(last + 1),
        })
    }

    /// Audit records cannot be modified.
    pub async fn update(&self, id: Uuid, _record: AuditRecord) -> Result<(), AuditError> {
        warn!(audit_id = %id, "Rejected audit record update");
        Err(AuditError::TamperBlocked)
    }

    /// Audit records cannot be deleted.
    pub async fn delete(&self, id: Uuid) -> Result<(), AuditError> {
        warn!(audit_id = %id, "Rejected audit record delete");
        Err(AuditError::TamperBlocked)
    }

    pub async fn len(&self) -> Result<usize, AuditError> {
        Ok(self.store.scan_all::<AuditRecord>().await?.len())
    }

    pub async fn is_empty(&self) -> Result<bool, AuditError> {
        Ok(self.len().await? == 0)
    }
}

#[async_trait]
impl AuditLog for StoredAuditLog {
    #[instrument(skip(self, draft), fields(table = %draft.table_name, operation = %draft.operation))]
    async fn append(&self, draft: AuditDraft) -> Result<AuditRecord, AuditError> {
        let mut next = self.next_sequence.lock().await;
        let record = draft.seal(*next);
        self.store.put(&sequence_key(record.sequence), &record).await?;
        *next += 1;
        debug!(audit_id = %record.id, sequence = record.sequence, "Audit record appended");
        Ok(record)
    }

    async fn get(&self, id: Uuid) -> Result<Option<AuditRecord>, AuditError> {
        Ok(self
            .store
            .scan_all::<AuditRecord>()
            .await?
            .into_iter()
            .find(|r| r.id == id))
    }

    async fn query(&self, query: &AuditQuery) -> Result<Vec<AuditRecord>, AuditError> {
        let mut matched: Vec<AuditRecord> = self
            .store
            .scan_all::<AuditRecord>()
            .await?
            .into_iter()
            .filter(|r| query.matches(r))
            .collect();
        if let Some(limit) = query.limit {
            let skip = matched.len().saturating_sub(limit);
            matched.drain(..skip);
        }
        Ok(matched)
    }
}
