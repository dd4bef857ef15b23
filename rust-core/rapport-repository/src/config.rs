// SPDX-License-Identifier: PMPL-1.0-or-later
//! Repository configuration.

use rapport_anomaly::AnomalyThresholds;
use rapport_audit::RecorderConfig;
use rapport_authz::PolicyGeneration;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RepositoryConfig {
    /// Generation made authoritative by migrations. With `v1` the
    /// switchover migration is left pending.
    pub policy_generation: PolicyGeneration,
    pub audit: RecorderConfig,
    pub anomaly: AnomalyThresholds,
    /// Hourly rows-read count above which reads show up as bulk access
    pub bulk_access_threshold: u64,
}

impl Default for RepositoryConfig {
    fn default() -> Self {
        Self {
            policy_generation: PolicyGeneration::V2,
            audit: RecorderConfig::default(),
            anomaly: AnomalyThresholds::default(),
            bulk_access_threshold: 100,
        }
    }
}
