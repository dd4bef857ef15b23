// SPDX-License-Identifier: PMPL-1.0-or-later
//! Audit records.
//!
//! A record is written once and never changed. Its `checksum` is the
//! SHA-256 of a canonical JSON rendering of who did what to which row, so
//! any later edit of those fields is detectable with [`AuditRecord::verify`].

use std::fmt;

use chrono::{DateTime, Utc};
use rapport_tenancy::{ActorContext, MutationKind, PrincipalId, TenantId};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::classification::DataClassification;

/// What an audit record describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditOperation {
    Insert,
    Update,
    Delete,
    /// Read of classified rows
    Read,
    /// Denied access attempt
    AccessDenied,
    /// Anomaly alert
    Alert,
    PolicySwitchover,
    PolicyRollback,
}

impl AuditOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditOperation::Insert => "INSERT",
            AuditOperation::Update => "UPDATE",
            AuditOperation::Delete => "DELETE",
            AuditOperation::Read => "READ",
            AuditOperation::AccessDenied => "ACCESS_DENIED",
            AuditOperation::Alert => "ALERT",
            AuditOperation::PolicySwitchover => "POLICY_SWITCHOVER",
            AuditOperation::PolicyRollback => "POLICY_ROLLBACK",
        }
    }

    pub fn is_mutation(&self) -> bool {
        matches!(
            self,
            AuditOperation::Insert | AuditOperation::Update | AuditOperation::Delete
        )
    }
}

impl fmt::Display for AuditOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<MutationKind> for AuditOperation {
    fn from(kind: MutationKind) -> Self {
        match kind {
            MutationKind::Insert => AuditOperation::Insert,
            MutationKind::Update => AuditOperation::Update,
            MutationKind::Delete => AuditOperation::Delete,
        }
    }
}

/// A stored, immutable audit record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub id: Uuid,
    /// Position in the log, starting at 1
    pub sequence: u64,
    pub actor_id: PrincipalId,
    pub tenant_id: Option<TenantId>,
    pub table_name: String,
    pub operation: AuditOperation,
    pub record_id: Option<String>,
    pub old_state: Option<Value>,
    pub new_state: Option<Value>,
    pub changed_fields: Vec<String>,
    pub classification: DataClassification,
    /// Alert kind for alerts, free label otherwise
    pub event_type: Option<String>,
    pub purpose: Option<String>,
    pub metadata: Value,
    /// SHA-256 hex digest over actor, table, operation, row id and payload
    pub checksum: String,
    pub created_at: DateTime<Utc>,
}

/// The state or metadata covered by the checksum.
fn payload_of<'a>(
    operation: AuditOperation,
    old_state: &'a Option<Value>,
    new_state: &'a Option<Value>,
    metadata: &'a Value,
) -> &'a Value {
    const NULL: &Value = &Value::Null;
    match operation {
        AuditOperation::Insert | AuditOperation::Update => new_state.as_ref().unwrap_or(NULL),
        AuditOperation::Delete => old_state.as_ref().unwrap_or(NULL),
        _ => metadata,
    }
}

impl AuditRecord {
    /// SHA-256 hex digest of the canonical JSON of the checksummed fields.
    pub fn compute_checksum(
        actor_id: &PrincipalId,
        table_name: &str,
        operation: AuditOperation,
        record_id: Option<&str>,
        payload: &Value,
    ) -> String {
        let canonical = serde_json::json!({
            "actor_id": actor_id,
            "table_name": table_name,
            "operation": operation,
            "record_id": record_id,
            "payload": payload,
        });
        let digest = Sha256::digest(canonical.to_string().as_bytes());
        format!("{:x}", digest)
    }

    pub fn payload(&self) -> &Value {
        payload_of(self.operation, &self.old_state, &self.new_state, &self.metadata)
    }

    /// Recompute the checksum and compare it with the stored one.
    pub fn verify(&self) -> bool {
        let expected = Self::compute_checksum(
            &self.actor_id,
            &self.table_name,
            self.operation,
            self.record_id.as_deref(),
            self.payload(),
        );
        self.checksum == expected
    }

    /// Row count carried by read records, if any.
    pub fn row_count(&self) -> Option<u64> {
        self.metadata.get("row_count").and_then(Value::as_u64)
    }
}

/// An audit record before the log assigns its id, sequence and checksum.
#[derive(Debug, Clone, PartialEq)]
pub struct AuditDraft {
    pub actor_id: PrincipalId,
    pub tenant_id: Option<TenantId>,
    pub table_name: String,
    pub operation: AuditOperation,
    pub record_id: Option<String>,
    pub old_state: Option<Value>,
    pub new_state: Option<Value>,
    pub changed_fields: Vec<String>,
    pub classification: DataClassification,
    pub event_type: Option<String>,
    pub purpose: Option<String>,
    pub metadata: Value,
}

impl AuditDraft {
    pub fn new(
        ctx: &ActorContext,
        table_name: impl Into<String>,
        operation: AuditOperation,
        classification: DataClassification,
    ) -> Self {
        Self {
            actor_id: ctx.actor_id.clone(),
            tenant_id: None,
            table_name: table_name.into(),
            operation,
            record_id: None,
            old_state: None,
            new_state: None,
            changed_fields: Vec::new(),
            classification,
            event_type: None,
            purpose: ctx.purpose.clone(),
            metadata: Value::Object(Default::default()),
        }
    }

    pub fn record_id(mut self, id: impl Into<String>) -> Self {
        self.record_id = Some(id.into());
        self
    }

    pub fn tenant(mut self, tenant: Option<TenantId>) -> Self {
        self.tenant_id = tenant;
        self
    }

    pub fn states(mut self, old: Option<Value>, new: Option<Value>) -> Self {
        self.old_state = old;
        self.new_state = new;
        self
    }

    pub fn changed(mut self, fields: Vec<String>) -> Self {
        self.changed_fields = fields;
        self
    }

    pub fn event_type(mut self, event_type: impl Into<String>) -> Self {
        self.event_type = Some(event_type.into());
        self
    }

    pub fn metadata(mut self, metadata: Value) -> Self {
        self.metadata = metadata;
        self
    }

    /// Seal the draft as record number `sequence`.
    pub fn seal(self, sequence: u64) -> AuditRecord {
        let checksum = AuditRecord::compute_checksum(
            &self.actor_id,
            &self.table_name,
            self.operation,
            self.record_id.as_deref(),
            payload_of(self.operation, &self.old_state, &self.new_state, &self.metadata),
        );
        AuditRecord {
            id: Uuid::new_v4(),
            sequence,
            actor_id: self.actor_id,
            tenant_id: self.tenant_id,
            table_name: self.table_name,
            operation: self.operation,
            record_id: self.record_id,
            old_state: self.old_state,
            new_state: self.new_state,
            changed_fields: self.changed_fields,
            classification: self.classification,
            event_type: self.event_type,
            purpose: self.purpose,
            metadata: self.metadata,
            checksum,
            created_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn insert_record() -> AuditRecord {
        AuditDraft::new(
            &ActorContext::new("u1").with_purpose("onboarding"),
            "contacts",
            AuditOperation::Insert,
            DataClassification::Pii,
        )
        .record_id("c1")
        .tenant(Some(TenantId::new("T1")))
        .states(None, Some(json!({"id": "c1", "name": "Ada"})))
        .seal(1)
    }

    #[test]
    fn test_sealed_record_verifies() {
        let record = insert_record();
        assert!(record.verify());
        assert_eq!(record.checksum.len(), 64);
        assert_eq!(record.purpose.as_deref(), Some("onboarding"));
    }

    #[test]
    fn test_tampered_payload_fails_verification() {
        let mut record = insert_record();
        record.new_state = Some(json!({"id": "c1", "name": "Mallory"}));
        assert!(!record.verify());
    }

    #[test]
    fn test_tampered_actor_fails_verification() {
        let mut record = insert_record();
        record.actor_id = PrincipalId::new("someone-else");
        assert!(!record.verify());
    }

    #[test]
    fn test_delete_checksums_old_state() {
        let old = json!({"id": "c1", "name": "Ada"});
        let record = AuditDraft::new(
            &ActorContext::new("u1"),
            "contacts",
            AuditOperation::Delete,
            DataClassification::Pii,
        )
        .record_id("c1")
        .states(Some(old.clone()), None)
        .seal(2);
        assert_eq!(record.payload(), &old);
        assert_eq!(
            record.checksum,
            AuditRecord::compute_checksum(
                &PrincipalId::new("u1"),
                "contacts",
                AuditOperation::Delete,
                Some("c1"),
                &old
            )
        );
    }

    #[test]
    fn test_read_row_count() {
        let record = AuditDraft::new(
            &ActorContext::new("u1"),
            "contacts",
            AuditOperation::Read,
            DataClassification::Pii,
        )
        .metadata(json!({"row_count": 7}))
        .seal(3);
        assert_eq!(record.row_count(), Some(7));
        assert!(record.verify());
    }
}
