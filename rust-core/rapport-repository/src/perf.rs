// SPDX-License-Identifier: PMPL-1.0-or-later
//! Per-table, per-operation latency accounting.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use rapport_authz::RowOperation;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OperationStats {
    pub count: u64,
    pub total_ms: f64,
    pub max_ms: f64,
}

impl OperationStats {
    pub fn avg_ms(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.total_ms / self.count as f64
        }
    }
}

/// One row of the performance view.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceRow {
    pub table_name: String,
    pub operation: RowOperation,
    pub count: u64,
    pub total_ms: f64,
    pub avg_ms: f64,
    pub max_ms: f64,
}

#[derive(Debug, Clone, Default)]
pub struct PerformanceTracker {
    stats: Arc<RwLock<BTreeMap<(String, RowOperation), OperationStats>>>,
}

impl PerformanceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn record(&self, table: &str, operation: RowOperation, elapsed: Duration) {
        let ms = elapsed.as_secs_f64() * 1000.0;
        let mut stats = self.stats.write().await;
        let entry = stats.entry((table.to_string(), operation)).or_default();
        entry.count += 1;
        entry.total_ms += ms;
        entry.max_ms = entry.max_ms.max(ms);
    }

    pub async fn snapshot(&self) -> Vec<PerformanceRow> {
        self.stats
            .read()
            .await
            .iter()
            .map(|((table, op), s)| PerformanceRow {
                table_name: table.clone(),
                operation: *op,
                count: s.count,
                total_ms: s.total_ms,
                avg_ms: s.avg_ms(),
                max_ms: s.max_ms,
            })
            .collect()
    }

    pub async fn reset(&self) {
        self.stats.write().await.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_record_and_snapshot() {
        let tracker = PerformanceTracker::new();
        tracker
            .record("contacts", RowOperation::Select, Duration::from_millis(4))
            .await;
        tracker
            .record("contacts", RowOperation::Select, Duration::from_millis(2))
            .await;
        tracker
            .record("contacts", RowOperation::Insert, Duration::from_millis(1))
            .await;

        let rows = tracker.snapshot().await;
        assert_eq!(rows.len(), 2);
        let select = rows
            .iter()
            .find(|r| r.operation == RowOperation::Select)
            .unwrap();
        assert_eq!(select.count, 2);
        assert!((select.max_ms - 4.0).abs() < 0.5);
        assert!((select.avg_ms - 3.0).abs() < 0.5);

        tracker.reset().await;
        assert!(tracker.snapshot().await.is_empty());
    }
}
