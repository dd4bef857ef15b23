// SPDX-License-Identifier: PMPL-1.0-or-later
//! Policy rollout.
//!
//! Both predicate generations stay installed. Exactly one is active; the
//! other is held as a shadow that denies everything, so only one rule set
//! is ever authoritative. Switchover and rollback flip which one is live.
//!
//! The [`PolicyCatalog`] is the declarative list of named per-table,
//! per-operation policies that migrations install; it is what operational
//! checks count.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::RolloutError;
use crate::predicate::{
    AuthorizationPredicate, DisabledPredicate, LegacyTenantPredicate, PolicyGeneration,
    TenantPredicate,
};
use crate::row_filter::RowOperation;

/// Which generation is live.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RolloutState {
    /// v1 live, v2 installed as a shadow
    V1Active,
    /// v2 live, v1 retired but restorable
    V2Active,
}

impl RolloutState {
    pub fn active_generation(self) -> PolicyGeneration {
        match self {
            RolloutState::V1Active => PolicyGeneration::V1,
            RolloutState::V2Active => PolicyGeneration::V2,
        }
    }

    fn for_generation(generation: PolicyGeneration) -> Self {
        match generation {
            PolicyGeneration::V1 => RolloutState::V1Active,
            PolicyGeneration::V2 => RolloutState::V2Active,
        }
    }
}

/// One named policy attached to a table and operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyEntry {
    pub name: String,
    pub table: String,
    pub operation: RowOperation,
    pub generation: PolicyGeneration,
    pub enabled: bool,
}

/// Build the standard tenant policy set for `tables`: one policy per
/// table and operation.
pub fn tenant_policies(
    generation: PolicyGeneration,
    tables: &[&str],
    enabled: bool,
) -> Vec<PolicyEntry> {
    tables
        .iter()
        .flat_map(|table| {
            RowOperation::ALL.iter().map(move |op| PolicyEntry {
                name: format!("{}_{}_tenant_{}", table, op, generation),
                table: (*table).to_string(),
                operation: *op,
                generation,
                enabled,
            })
        })
        .collect()
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PolicyCatalog {
    entries: Vec<PolicyEntry>,
}

impl PolicyCatalog {
    /// Add policies, replacing any existing entry with the same name.
    pub fn install(&mut self, policies: impl IntoIterator<Item = PolicyEntry>) {
        for policy in policies {
            match self.entries.iter_mut().find(|e| e.name == policy.name) {
                Some(existing) => *existing = policy,
                None => self.entries.push(policy),
            }
        }
    }

    /// Remove every policy of one generation. Used by migration rollback.
    pub fn uninstall(&mut self, generation: PolicyGeneration) -> usize {
        let before = self.entries.len();
        self.entries.retain(|e| e.generation != generation);
        before - self.entries.len()
    }

    pub fn set_enabled(&mut self, generation: PolicyGeneration, enabled: bool) {
        for entry in self.entries.iter_mut().filter(|e| e.generation == generation) {
            entry.enabled = enabled;
        }
    }

    pub fn count(&self, generation: PolicyGeneration) -> usize {
        self.entries
            .iter()
            .filter(|e| e.generation == generation)
            .count()
    }

    pub fn enabled_count(&self, generation: PolicyGeneration) -> usize {
        self.entries
            .iter()
            .filter(|e| e.generation == generation && e.enabled)
            .count()
    }

    pub fn for_table<'a>(&'a self, table: &'a str) -> impl Iterator<Item = &'a PolicyEntry> {
        self.entries.iter().filter(move |e| e.table == table)
    }

    pub fn entries(&self) -> &[PolicyEntry] {
        &self.entries
    }
}

/// Record of a completed transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RolloutTransition {
    pub from: PolicyGeneration,
    pub to: PolicyGeneration,
}

/// Holds both predicate generations and the catalog.
#[derive(Debug, Clone)]
pub struct PolicyRollout {
    state: RolloutState,
    legacy: Arc<dyn AuthorizationPredicate>,
    current: Arc<dyn AuthorizationPredicate>,
    catalog: PolicyCatalog,
}

impl PolicyRollout {
    /// Start with `initial` live.
    pub fn new(initial: PolicyGeneration) -> Self {
        Self {
            state: RolloutState::for_generation(initial),
            legacy: Arc::new(LegacyTenantPredicate),
            current: Arc::new(TenantPredicate),
            catalog: PolicyCatalog::default(),
        }
    }

    pub fn state(&self) -> RolloutState {
        self.state
    }

    pub fn active_generation(&self) -> PolicyGeneration {
        self.state.active_generation()
    }

    /// The authoritative predicate.
    pub fn active(&self) -> Arc<dyn AuthorizationPredicate> {
        match self.state {
            RolloutState::V1Active => self.legacy.clone(),
            RolloutState::V2Active => self.current.clone(),
        }
    }

    /// Predicate in effect for `generation`: the real one if it is live,
    /// a deny-all placeholder otherwise.
    pub fn predicate_for(&self, generation: PolicyGeneration) -> Arc<dyn AuthorizationPredicate> {
        if generation == self.active_generation() {
            self.active()
        } else {
            Arc::new(DisabledPredicate { generation })
        }
    }

    pub fn catalog(&self) -> &PolicyCatalog {
        &self.catalog
    }

    pub fn catalog_mut(&mut self) -> &mut PolicyCatalog {
        &mut self.catalog
    }

    /// Make v2 authoritative. Requires the v2 policy set to be installed.
    pub fn switchover(&mut self) -> Result<RolloutTransition, RolloutError> {
        if self.state == RolloutState::V2Active {
            return Err(RolloutError::AlreadyActive(PolicyGeneration::V2));
        }
        if self.catalog.count(PolicyGeneration::V2) == 0 {
            return Err(RolloutError::PoliciesNotInstalled(PolicyGeneration::V2));
        }
        self.catalog.set_enabled(PolicyGeneration::V2, true);
        self.catalog.set_enabled(PolicyGeneration::V1, false);
        self.state = RolloutState::V2Active;
        info!("Policy switchover: v1 -> v2");
        Ok(RolloutTransition {
            from: PolicyGeneration::V1,
            to: PolicyGeneration::V2,
        })
    }

    /// Restore v1 as authoritative.
    pub fn rollback(&mut self) -> Result<RolloutTransition, RolloutError> {
        if self.state == RolloutState::V1Active {
            return Err(RolloutError::AlreadyActive(PolicyGeneration::V1));
        }
        if self.catalog.count(PolicyGeneration::V1) == 0 {
            return Err(RolloutError::PoliciesNotInstalled(PolicyGeneration::V1));
        }
        self.catalog.set_enabled(PolicyGeneration::V1, true);
        self.catalog.set_enabled(PolicyGeneration::V2, false);
        self.state = RolloutState::V1Active;
        info!("Policy rollback: v2 -> v1");
        Ok(RolloutTransition {
            from: PolicyGeneration::V2,
            to: PolicyGeneration::V1,
        })
    }
}

impl Default for PolicyRollout {
    fn default() -> Self {
        Self::new(PolicyGeneration::V2)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn staged() -> PolicyRollout {
        let mut rollout = PolicyRollout::new(PolicyGeneration::V1);
        let tables = ["contacts", "organizations"];
        rollout
            .catalog_mut()
            .install(tenant_policies(PolicyGeneration::V1, &tables, true));
        rollout
            .catalog_mut()
            .install(tenant_policies(PolicyGeneration::V2, &tables, false));
        rollout
    }

    #[test]
    fn test_policy_names_and_counts() {
        let rollout = staged();
        assert_eq!(rollout.catalog().count(PolicyGeneration::V1), 8);
        assert_eq!(rollout.catalog().enabled_count(PolicyGeneration::V2), 0);
        assert!(rollout
            .catalog()
            .for_table("contacts")
            .any(|p| p.name == "contacts_update_tenant_v2"));
    }

    #[test]
    fn test_switchover_and_rollback() {
        let mut rollout = staged();
        assert_eq!(rollout.active().generation(), PolicyGeneration::V1);

        let t = rollout.switchover().unwrap();
        assert_eq!((t.from, t.to), (PolicyGeneration::V1, PolicyGeneration::V2));
        assert_eq!(rollout.state(), RolloutState::V2Active);
        assert_eq!(rollout.active().generation(), PolicyGeneration::V2);
        assert_eq!(rollout.catalog().enabled_count(PolicyGeneration::V2), 8);
        assert_eq!(rollout.catalog().enabled_count(PolicyGeneration::V1), 0);
        assert_eq!(
            rollout.switchover(),
            Err(RolloutError::AlreadyActive(PolicyGeneration::V2))
        );

        rollout.rollback().unwrap();
        assert_eq!(rollout.state(), RolloutState::V1Active);
        assert_eq!(rollout.catalog().enabled_count(PolicyGeneration::V1), 8);
    }

    #[test]
    fn test_switchover_requires_installed_policies() {
        let mut rollout = PolicyRollout::new(PolicyGeneration::V1);
        assert_eq!(
            rollout.switchover(),
            Err(RolloutError::PoliciesNotInstalled(PolicyGeneration::V2))
        );
    }

    #[test]
    fn test_shadow_generation_is_deny_all() {
        let rollout = staged();
        let shadow = rollout.predicate_for(PolicyGeneration::V2);
        let view = rapport_tenancy::DirectoryState::default();
        let decision = shadow.evaluate(
            &view,
            &rapport_tenancy::PrincipalId::new("anyone"),
            &crate::decision::AccessRequest::default(),
        );
        assert_eq!(decision.reason, crate::decision::DecisionReason::PolicyDisabled);
    }

    #[test]
    fn test_uninstall() {
        let mut rollout = staged();
        assert_eq!(rollout.catalog_mut().uninstall(PolicyGeneration::V2), 8);
        assert_eq!(rollout.catalog().count(PolicyGeneration::V2), 0);
    }
}
