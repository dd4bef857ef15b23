// SPDX-License-Identifier: PMPL-1.0-or-later
//! Read-only reporting views over audit records.
//!
//! Views are pure functions over a slice of records already fetched with
//! an [`AuditQuery`](crate::log::AuditQuery), so they can be evaluated
//! without holding any lock.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, DurationRound, TimeDelta, Utc};
use rapport_tenancy::{PrincipalId, TenantId};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::classification::DataClassification;
use crate::error::AuditError;
use crate::record::{AuditOperation, AuditRecord};

/// Named audit views.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditView {
    RecentSensitiveAccess,
    CrossTenantAttempts,
    AdminActivity,
    BulkAccess,
    FailedAccess,
}

impl AuditView {
    pub const ALL: [AuditView; 5] = [
        AuditView::RecentSensitiveAccess,
        AuditView::CrossTenantAttempts,
        AuditView::AdminActivity,
        AuditView::BulkAccess,
        AuditView::FailedAccess,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AuditView::RecentSensitiveAccess => "recent_sensitive_access",
            AuditView::CrossTenantAttempts => "cross_tenant_attempts",
            AuditView::AdminActivity => "admin_activity",
            AuditView::BulkAccess => "bulk_access",
            AuditView::FailedAccess => "failed_access",
        }
    }
}

impl fmt::Display for AuditView {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AuditView {
    type Err = AuditError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().replace('-', "_");
        AuditView::ALL
            .into_iter()
            .find(|v| v.as_str() == normalized)
            .ok_or_else(|| AuditError::InvalidInput(format!("unknown audit view: '{}'", s)))
    }
}

/// Reads and changes of PII or SENSITIVE data.
pub fn recent_sensitive_access(records: &[AuditRecord]) -> Vec<AuditRecord> {
    records
        .iter()
        .filter(|r| {
            matches!(
                r.classification,
                DataClassification::Pii | DataClassification::Sensitive
            ) && r.operation != AuditOperation::AccessDenied
        })
        .cloned()
        .collect()
}

/// Denied attempts to reach another tenant's data.
pub fn cross_tenant_attempts(records: &[AuditRecord]) -> Vec<AuditRecord> {
    records
        .iter()
        .filter(|r| {
            r.operation == AuditOperation::AccessDenied
                && r.metadata.get("reason").and_then(|v| v.as_str()) == Some("tenant_mismatch")
        })
        .cloned()
        .collect()
}

/// Everything done by administrators.
pub fn admin_activity<F>(records: &[AuditRecord], is_admin: F) -> Vec<AuditRecord>
where
    F: Fn(&PrincipalId) -> bool,
{
    records
        .iter()
        .filter(|r| r.operation != AuditOperation::Alert && is_admin(&r.actor_id))
        .cloned()
        .collect()
}

/// Rows read by one actor from one table within one hour.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BulkAccessRow {
    pub actor_id: PrincipalId,
    pub table_name: String,
    pub hour: DateTime<Utc>,
    pub read_events: usize,
    pub rows_read: u64,
}

/// Hourly read volumes per actor and table above `threshold` rows.
pub fn bulk_access(records: &[AuditRecord], threshold: u64) -> Vec<BulkAccessRow> {
    let mut buckets: BTreeMap<(PrincipalId, String, DateTime<Utc>), (usize, u64)> = BTreeMap::new();
    for record in records.iter().filter(|r| r.operation == AuditOperation::Read) {
        let hour = record
            .created_at
            .duration_trunc(TimeDelta::hours(1))
            .unwrap_or(record.created_at);
        let entry = buckets
            .entry((record.actor_id.clone(), record.table_name.clone(), hour))
            .or_default();
        entry.0 += 1;
        entry.1 += record.row_count().unwrap_or(0);
    }

    buckets
        .into_iter()
        .filter(|(_, (_, rows))| *rows > threshold)
        .map(|((actor_id, table_name, hour), (read_events, rows_read))| BulkAccessRow {
            actor_id,
            table_name,
            hour,
            read_events,
            rows_read,
        })
        .collect()
}

/// Denied attempts grouped by actor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedAccessRow {
    pub actor_id: PrincipalId,
    pub attempts: usize,
    pub operations: BTreeSet<String>,
    pub target_tenants: BTreeSet<TenantId>,
    pub last_attempt: DateTime<Utc>,
}

pub fn failed_access(records: &[AuditRecord]) -> Vec<FailedAccessRow> {
    let mut by_actor: BTreeMap<PrincipalId, FailedAccessRow> = BTreeMap::new();
    for record in records
        .iter()
        .filter(|r| r.operation == AuditOperation::AccessDenied)
    {
        let row = by_actor
            .entry(record.actor_id.clone())
            .or_insert_with(|| FailedAccessRow {
                actor_id: record.actor_id.clone(),
                attempts: 0,
                operations: BTreeSet::new(),
                target_tenants: BTreeSet::new(),
                last_attempt: record.created_at,
            });
        row.attempts += 1;
        if let Some(op) = record.metadata.get("operation").and_then(|v| v.as_str()) {
            row.operations.insert(op.to_string());
        }
        if let Some(t) = &record.tenant_id {
            row.target_tenants.insert(t.clone());
        }
        row.last_attempt = row.last_attempt.max(record.created_at);
    }

    let mut rows: Vec<FailedAccessRow> = by_actor.into_values().collect();
    rows.sort_by(|a, b| b.attempts.cmp(&a.attempts));
    rows
}

/// Counts over a trailing window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditSummary {
    pub window_hours: i64,
    pub total_records: usize,
    pub by_operation: BTreeMap<AuditOperation, usize>,
    pub by_table: BTreeMap<String, usize>,
    pub by_classification: BTreeMap<DataClassification, usize>,
    pub distinct_actors: usize,
    pub distinct_tenants: usize,
    pub alerts: usize,
    pub access_denied: usize,
}

pub fn summarize(records: &[AuditRecord], window_hours: i64) -> AuditSummary {
    let mut by_operation = BTreeMap::new();
    let mut by_table = BTreeMap::new();
    let mut by_classification = BTreeMap::new();
    let mut actors = BTreeSet::new();
    let mut tenants = BTreeSet::new();

    for record in records {
        *by_operation.entry(record.operation).or_insert(0) += 1;
        *by_table.entry(record.table_name.clone()).or_insert(0) += 1;
        *by_classification.entry(record.classification).or_insert(0) += 1;
        actors.insert(&record.actor_id);
        if let Some(t) = &record.tenant_id {
            tenants.insert(t);
        }
    }

    AuditSummary {
        window_hours,
        total_records: records.len(),
        alerts: by_operation.get(&AuditOperation::Alert).copied().unwrap_or(0),
        access_denied: by_operation
            .get(&AuditOperation::AccessDenied)
            .copied()
            .unwrap_or(0),
        by_operation,
        by_table,
        by_classification,
        distinct_actors: actors.len(),
        distinct_tenants: tenants.len(),
    }
}

/// Result of recomputing every checksum.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntegrityReport {
    pub checked: usize,
    pub mismatched: Vec<Uuid>,
}

impl IntegrityReport {
    pub fn is_intact(&self) -> bool {
        self.mismatched.is_empty()
    }
}

pub fn verify_all(records: &[AuditRecord]) -> IntegrityReport {
    IntegrityReport {
        checked: records.len(),
        mismatched: records.iter().filter(|r| !r.verify()).map(|r| r.id).collect(),
    }
}
