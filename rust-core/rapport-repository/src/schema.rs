// SPDX-License-Identifier: PMPL-1.0-or-later
//! Table definitions and tenant resolution strategies.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Column holding the tenant reference on directly scoped tables
pub const TENANT_COLUMN: &str = "tenant_id";

/// How the owning tenant of a row is found.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "strategy", rename_all = "snake_case")]
pub enum TenantResolution {
    /// Tenant id stored in `column`
    Direct { column: String },
    /// Tenant of the row in `parent_table` whose id is in `foreign_key`
    ViaParent {
        parent_table: String,
        foreign_key: String,
    },
    /// Not tenant-scoped
    Unscoped,
}

impl TenantResolution {
    pub fn direct() -> Self {
        TenantResolution::Direct {
            column: TENANT_COLUMN.to_string(),
        }
    }

    pub fn via_parent(parent_table: &str, foreign_key: &str) -> Self {
        TenantResolution::ViaParent {
            parent_table: parent_table.to_string(),
            foreign_key: foreign_key.to_string(),
        }
    }

    /// Column whose value decides the tenant, if any.
    pub fn reference_column(&self) -> Option<&str> {
        match self {
            TenantResolution::Direct { column } => Some(column),
            TenantResolution::ViaParent { foreign_key, .. } => Some(foreign_key),
            TenantResolution::Unscoped => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableSpec {
    pub name: String,
    pub resolution: TenantResolution,
    /// Fields a new row must carry (besides id and the tenant reference)
    pub required: Vec<String>,
}

impl TableSpec {
    pub fn new(name: &str, resolution: TenantResolution) -> Self {
        Self {
            name: name.to_string(),
            resolution,
            required: Vec::new(),
        }
    }

    pub fn require(mut self, fields: &[&str]) -> Self {
        self.required = fields.iter().map(|f| f.to_string()).collect();
        self
    }

    pub fn is_tenant_scoped(&self) -> bool {
        self.resolution != TenantResolution::Unscoped
    }
}

/// Registered tables.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Schema {
    tables: BTreeMap<String, TableSpec>,
}

impl Schema {
    pub fn register(&mut self, spec: TableSpec) {
        self.tables.insert(spec.name.clone(), spec);
    }

    pub fn drop_table(&mut self, name: &str) -> Option<TableSpec> {
        self.tables.remove(name)
    }

    pub fn get(&self, name: &str) -> Option<&TableSpec> {
        self.tables.get(name)
    }

    pub fn tables(&self) -> impl Iterator<Item = &TableSpec> {
        self.tables.values()
    }

    pub fn scoped_table_names(&self) -> Vec<String> {
        self.tables
            .values()
            .filter(|t| t.is_tenant_scoped())
            .map(|t| t.name.clone())
            .collect()
    }
}

/// The relationship-management tables.
pub fn core_tables() -> Vec<TableSpec> {
    vec![
        TableSpec::new("organizations", TenantResolution::direct()).require(&["name"]),
        TableSpec::new("contacts", TenantResolution::direct()).require(&["name"]),
        TableSpec::new("relationships", TenantResolution::direct()).require(&["kind"]),
        TableSpec::new(
            "relationship_notes",
            TenantResolution::via_parent("relationships", "relationship_id"),
        )
        .require(&["body"]),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_core_tables() {
        let mut schema = Schema::default();
        for t in core_tables() {
            schema.register(t);
        }
        assert_eq!(schema.scoped_table_names().len(), 4);
        assert_eq!(
            schema
                .get("relationship_notes")
                .and_then(|t| t.resolution.reference_column()),
            Some("relationship_id")
        );
    }

    #[test]
    fn test_resolution_serialization() {
        let json = serde_json::to_value(TenantResolution::direct()).unwrap();
        assert_eq!(json["strategy"], "direct");
        assert_eq!(json["column"], "tenant_id");
    }
}
