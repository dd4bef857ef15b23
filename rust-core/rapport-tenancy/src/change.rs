// SPDX-License-Identifier: PMPL-1.0-or-later
//! Mutation kinds and change notifications emitted by the directory.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::context::ActorContext;

/// Kind of a row mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MutationKind {
    Insert,
    Update,
    Delete,
}

impl fmt::Display for MutationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MutationKind::Insert => write!(f, "insert"),
            MutationKind::Update => write!(f, "update"),
            MutationKind::Delete => write!(f, "delete"),
        }
    }
}

/// A before/after snapshot of one directory row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DirectoryChange {
    /// Logical table: `tenants`, `users` or `admin_roster`
    pub table: String,
    pub record_id: String,
    pub kind: MutationKind,
    pub old: Option<serde_json::Value>,
    pub new: Option<serde_json::Value>,
}

/// Receives every directory change after it has been applied.
///
/// Implementations must not fail the directory operation; the audit
/// recorder is the main implementor.
#[async_trait]
pub trait DirectoryObserver: Send + Sync {
    async fn directory_changed(&self, ctx: &ActorContext, change: &DirectoryChange);
}
