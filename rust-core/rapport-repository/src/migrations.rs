// SPDX-License-Identifier: PMPL-1.0-or-later
//! Ordered schema and policy migrations.
//!
//! Migration ids have the form `YYYYMMDD_HHMMSS_description` and are
//! applied in id order. Every migration carries a separately written
//! rollback step; rollbacks only run when explicitly requested.

use std::fmt;
use std::str::FromStr;

use chrono::NaiveDateTime;
use rapport_authz::{tenant_policies, PolicyGeneration, PolicyRollout, RolloutError, RolloutTransition};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use crate::schema::{core_tables, Schema};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MigrationError {
    #[error("invalid migration id '{id}': {reason}")]
    InvalidId { id: String, reason: String },

    #[error("migrations out of order: {0} follows a later id")]
    OutOfOrder(String),

    #[error("duplicate migration id: {0}")]
    Duplicate(String),

    #[error("unknown migration: {0}")]
    Unknown(String),

    #[error("policy rollout failed: {0}")]
    Rollout(#[from] RolloutError),

    #[error("migration {id} failed: {source}")]
    StepFailed {
        id: String,
        #[source]
        source: Box<MigrationError>,
    },
}

/// A parsed `YYYYMMDD_HHMMSS_description` id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct MigrationId {
    timestamp: NaiveDateTime,
    description: String,
}

impl MigrationId {
    pub fn timestamp(&self) -> NaiveDateTime {
        self.timestamp
    }

    pub fn description(&self) -> &str {
        &self.description
    }
}

impl FromStr for MigrationId {
    type Err = MigrationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = |reason: &str| MigrationError::InvalidId {
            id: s.to_string(),
            reason: reason.to_string(),
        };

        let mut parts = s.splitn(3, '_');
        let date = parts.next().unwrap_or_default();
        let time = parts.next().ok_or_else(|| invalid("missing time component"))?;
        let description = parts
            .next()
            .ok_or_else(|| invalid("missing description"))?;

        if date.len() != 8 || time.len() != 6 {
            return Err(invalid("expected YYYYMMDD_HHMMSS prefix"));
        }
        if description.is_empty()
            || !description
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
        {
            return Err(invalid("description must be lowercase snake_case"));
        }
        let timestamp = NaiveDateTime::parse_from_str(&format!("{}{}", date, time), "%Y%m%d%H%M%S")
            .map_err(|e| invalid(&e.to_string()))?;

        Ok(Self {
            timestamp,
            description: description.to_string(),
        })
    }
}

impl TryFrom<String> for MigrationId {
    type Error = MigrationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<MigrationId> for String {
    fn from(id: MigrationId) -> Self {
        id.to_string()
    }
}

impl fmt::Display for MigrationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}_{}",
            self.timestamp.format("%Y%m%d_%H%M%S"),
            self.description
        )
    }
}

/// What a migration step may change.
pub struct MigrationTarget<'a> {
    pub schema: &'a mut Schema,
    pub rollout: &'a mut PolicyRollout,
    /// Policy transitions performed by the step, for auditing
    pub transitions: Vec<RolloutTransition>,
}

pub type MigrationStep = fn(&mut MigrationTarget<'_>) -> Result<(), MigrationError>;

#[derive(Clone)]
pub struct Migration {
    pub id: MigrationId,
    pub up: MigrationStep,
    pub down: MigrationStep,
}

impl fmt::Debug for Migration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Migration").field("id", &self.id.to_string()).finish()
    }
}

fn scoped_tables(target: &MigrationTarget<'_>) -> Vec<String> {
    target.schema.scoped_table_names()
}

fn install_policies(target: &mut MigrationTarget<'_>, generation: PolicyGeneration, enabled: bool) {
    let tables = scoped_tables(target);
    let names: Vec<&str> = tables.iter().map(String::as_str).collect();
    target
        .rollout
        .catalog_mut()
        .install(tenant_policies(generation, &names, enabled));
}

fn core_tables_up(target: &mut MigrationTarget<'_>) -> Result<(), MigrationError> {
    for spec in core_tables() {
        target.schema.register(spec);
    }
    Ok(())
}

fn core_tables_down(target: &mut MigrationTarget<'_>) -> Result<(), MigrationError> {
    for spec in core_tables() {
        target.schema.drop_table(&spec.name);
    }
    Ok(())
}

fn v1_policies_up(target: &mut MigrationTarget<'_>) -> Result<(), MigrationError> {
    let live = target.rollout.active_generation() == PolicyGeneration::V1;
    install_policies(target, PolicyGeneration::V1, live);
    Ok(())
}

fn v1_policies_down(target: &mut MigrationTarget<'_>) -> Result<(), MigrationError> {
    target.rollout.catalog_mut().uninstall(PolicyGeneration::V1);
    Ok(())
}

fn v2_shadow_up(target: &mut MigrationTarget<'_>) -> Result<(), MigrationError> {
    let live = target.rollout.active_generation() == PolicyGeneration::V2;
    install_policies(target, PolicyGeneration::V2, live);
    Ok(())
}

fn v2_shadow_down(target: &mut MigrationTarget<'_>) -> Result<(), MigrationError> {
    target.rollout.catalog_mut().uninstall(PolicyGeneration::V2);
    Ok(())
}

fn switchover_up(target: &mut MigrationTarget<'_>) -> Result<(), MigrationError> {
    match target.rollout.switchover() {
        Ok(t) => {
            target.transitions.push(t);
            Ok(())
        }
        Err(RolloutError::AlreadyActive(_)) => Ok(()),
        Err(e) => Err(e.into()),
    }
}

fn switchover_down(target: &mut MigrationTarget<'_>) -> Result<(), MigrationError> {
    let t = target.rollout.rollback()?;
    target.transitions.push(t);
    Ok(())
}

fn id(s: &str) -> Result<MigrationId, MigrationError> {
    s.parse()
}

/// The migration ids of the built-in set, in order.
pub const CORE_TABLES: &str = "20240115_090000_core_tables";
pub const TENANT_POLICIES_V1: &str = "20240115_091500_tenant_policies_v1";
pub const TENANT_POLICIES_V2_SHADOW: &str = "20240302_140000_tenant_policies_v2_shadow";
pub const POLICY_V2_SWITCHOVER: &str = "20240318_100000_policy_v2_switchover";

pub fn builtin_migrations() -> Result<Vec<Migration>, MigrationError> {
    Ok(vec![
        Migration {
            id: id(CORE_TABLES)?,
            up: core_tables_up,
            down: core_tables_down,
        },
        Migration {
            id: id(TENANT_POLICIES_V1)?,
            up: v1_policies_up,
            down: v1_policies_down,
        },
        Migration {
            id: id(TENANT_POLICIES_V2_SHADOW)?,
            up: v2_shadow_up,
            down: v2_shadow_down,
        },
        Migration {
            id: id(POLICY_V2_SWITCHOVER)?,
            up: switchover_up,
            down: switchover_down,
        },
    ])
}

/// Applies migrations in order and tracks which have run.
#[derive(Debug, Clone)]
pub struct MigrationRunner {
    migrations: Vec<Migration>,
    applied: Vec<MigrationId>,
}

impl MigrationRunner {
    /// Ids must be strictly increasing.
    pub fn new(migrations: Vec<Migration>) -> Result<Self, MigrationError> {
        for pair in migrations.windows(2) {
            if pair[0].id == pair[1].id {
                return Err(MigrationError::Duplicate(pair[1].id.to_string()));
            }
            if pair[0].id > pair[1].id {
                return Err(MigrationError::OutOfOrder(pair[1].id.to_string()));
            }
        }
        Ok(Self {
            migrations,
            applied: Vec::new(),
        })
    }

    pub fn builtin() -> Result<Self, MigrationError> {
        Self::new(builtin_migrations()?)
    }

    pub fn migrations(&self) -> &[Migration] {
        &self.migrations
    }

    pub fn applied(&self) -> &[MigrationId] {
        &self.applied
    }

    pub fn pending(&self) -> impl Iterator<Item = &Migration> {
        self.migrations
            .iter()
            .filter(move |m| !self.applied.contains(&m.id))
    }

    /// Apply pending migrations in order, stopping after `until` when
    /// given. Returns the ids applied by this call.
    pub fn apply(
        &mut self,
        target: &mut MigrationTarget<'_>,
        until: Option<&MigrationId>,
    ) -> Result<Vec<MigrationId>, MigrationError> {
        if let Some(limit) = until {
            if !self.migrations.iter().any(|m| &m.id == limit) {
                return Err(MigrationError::Unknown(limit.to_string()));
            }
        }

        let mut newly = Vec::new();
        for migration in &self.migrations {
            if until.is_some_and(|limit| &migration.id > limit) {
                break;
            }
            if self.applied.contains(&migration.id) {
                continue;
            }
            (migration.up)(target).map_err(|source| MigrationError::StepFailed {
                id: migration.id.to_string(),
                source: Box::new(source),
            })?;
            info!(migration = %migration.id, "Migration applied");
            self.applied.push(migration.id.clone());
            newly.push(migration.id.clone());
        }
        Ok(newly)
    }

    /// Run the rollback step of the most recently applied migration.
    pub fn rollback_last(
        &mut self,
        target: &mut MigrationTarget<'_>,
    ) -> Result<Option<MigrationId>, MigrationError> {
        let Some(last) = self.applied.last().cloned() else {
            return Ok(None);
        };
        let migration = self
            .migrations
            .iter()
            .find(|m| m.id == last)
            .ok_or_else(|| MigrationError::Unknown(last.to_string()))?;
        (migration.down)(target).map_err(|source| MigrationError::StepFailed {
            id: last.to_string(),
            source: Box::new(source),
        })?;
        self.applied.pop();
        info!(migration = %last, "Migration rolled back");
        Ok(Some(last))
    }
}
