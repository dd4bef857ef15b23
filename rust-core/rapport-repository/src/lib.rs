// SPDX-License-Identifier: PMPL-1.0-or-later
//! Rapport Repository
//!
//! Data-access layer of the relationship store. Wraps every query and
//! mutation with tenant enforcement, mutation guards and audit writes,
//! and owns the table schema, the policy rollout state and the ordered
//! migrations that build both.
//!
//! ```text
//! caller ──► Repository ──► RowFilter / GuardChain ──► storage batch
//!                 │                                        │
//!                 └──────────► AuditRecorder ◄─────────────┘
//!                                   │
//!                                   ▼
//!                            AnomalyDetector
//! ```

pub mod config;
pub mod error;
pub mod migrations;
pub mod perf;
pub mod repository;
pub mod row;
pub mod schema;

pub use config::RepositoryConfig;
pub use error::RepositoryError;
pub use migrations::{
    builtin_migrations, Migration, MigrationError, MigrationId, MigrationRunner, MigrationTarget,
};
pub use perf::{OperationStats, PerformanceRow, PerformanceTracker};
pub use repository::{AuditViewRows, PolicyCounts, Repository};
pub use row::{Row, RowQuery};
pub use schema::{core_tables, Schema, TableSpec, TenantResolution, TENANT_COLUMN};
