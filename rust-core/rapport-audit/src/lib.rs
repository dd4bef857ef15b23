// SPDX-License-Identifier: PMPL-1.0-or-later
//! Rapport Audit
//!
//! Tamper-evident audit trail for the relationship store.
//!
//! # Architecture
//!
//! - **AuditRecord**: one immutable record with a SHA-256 checksum over
//!   actor, table, operation, row id and payload.
//! - **AuditLog** trait: append-only storage; [`StoredAuditLog`] keeps
//!   records in the shared storage backend.
//! - **AuditRecorder**: change detection, classification and tenant
//!   attribution for mutations, classified reads, security events and
//!   policy transitions.
//! - **views**: reporting queries (sensitive access, cross-tenant
//!   attempts, bulk reads, failed access, summaries, integrity checks).

pub mod classification;
pub mod diff;
pub mod error;
pub mod log;
pub mod record;
pub mod recorder;
pub mod views;

pub use classification::{ClassificationMap, DataClassification};
pub use diff::{changed_fields, field_diffs, FieldDiff, BOOKKEEPING_FIELDS};
pub use error::AuditError;
pub use log::{AuditLog, AuditQuery, StoredAuditLog, AUDIT_TABLE};
pub use record::{AuditDraft, AuditOperation, AuditRecord};
pub use recorder::{
    AuditListener, AuditRecorder, RecorderConfig, RowChange, POLICY_TABLE, SECURITY_EVENTS_TABLE,
};
pub use views::{
    AuditSummary, AuditView, BulkAccessRow, FailedAccessRow, IntegrityReport,
};
