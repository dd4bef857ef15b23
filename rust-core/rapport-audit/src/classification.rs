// SPDX-License-Identifier: PMPL-1.0-or-later
//! Data classification of audited tables.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::AuditError;

/// Sensitivity label stamped on every audit record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DataClassification {
    /// Personal data
    Pii,
    Sensitive,
    Confidential,
    Public,
    /// Anomaly alerts
    Alert,
}

impl DataClassification {
    pub fn as_str(&self) -> &'static str {
        match self {
            DataClassification::Pii => "PII",
            DataClassification::Sensitive => "SENSITIVE",
            DataClassification::Confidential => "CONFIDENTIAL",
            DataClassification::Public => "PUBLIC",
            DataClassification::Alert => "ALERT",
        }
    }
}

impl fmt::Display for DataClassification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DataClassification {
    type Err = AuditError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "PII" => Ok(DataClassification::Pii),
            "SENSITIVE" => Ok(DataClassification::Sensitive),
            "CONFIDENTIAL" => Ok(DataClassification::Confidential),
            "PUBLIC" => Ok(DataClassification::Public),
            "ALERT" => Ok(DataClassification::Alert),
            other => Err(AuditError::InvalidInput(format!(
                "unknown classification: '{}'",
                other
            ))),
        }
    }
}

/// Static table-name to classification map. Unlisted tables are public.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassificationMap {
    tables: HashMap<String, DataClassification>,
}

impl ClassificationMap {
    pub fn empty() -> Self {
        Self {
            tables: HashMap::new(),
        }
    }

    pub fn with(mut self, table: impl Into<String>, class: DataClassification) -> Self {
        self.tables.insert(table.into(), class);
        self
    }

    pub fn classify(&self, table: &str) -> DataClassification {
        self.tables
            .get(table)
            .copied()
            .unwrap_or(DataClassification::Public)
    }
}

impl Default for ClassificationMap {
    fn default() -> Self {
        use DataClassification::*;
        Self::empty()
            .with("users", Pii)
            .with("contacts", Pii)
            .with("relationship_notes", Sensitive)
            .with("admin_roster", Sensitive)
            .with("security_events", Sensitive)
            .with("tenants", Confidential)
            .with("organizations", Confidential)
            .with("relationships", Confidential)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_map() {
        let map = ClassificationMap::default();
        assert_eq!(map.classify("contacts"), DataClassification::Pii);
        assert_eq!(map.classify("relationship_notes"), DataClassification::Sensitive);
        assert_eq!(map.classify("organizations"), DataClassification::Confidential);
        assert_eq!(map.classify("anything_else"), DataClassification::Public);
    }

    #[test]
    fn test_wire_format() {
        assert_eq!(
            serde_json::to_string(&DataClassification::Pii).unwrap(),
            "\"PII\""
        );
        assert_eq!(
            "confidential".parse::<DataClassification>().unwrap(),
            DataClassification::Confidential
        );
    }
}
