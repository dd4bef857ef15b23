// SPDX-License-Identifier: PMPL-1.0-or-later
//! Rapport Anomaly Detection
//!
//! Inspects every appended audit record and flags suspicious access
//! patterns for the record's actor. Windows are computed on demand from
//! the audit log; nothing runs in the background.
//!
//! A raised alert is written back to the audit log as an `ALERT` record and
//! broadcast to subscribers. Detection never blocks or fails the operation
//! that produced the record.

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use prometheus::{IntCounter, Registry};
use rapport_audit::{
    AuditDraft, AuditError, AuditListener, AuditLog, AuditOperation, AuditQuery, AuditRecord,
    DataClassification,
};
use rapport_tenancy::{ActorContext, PrincipalId, TenantId};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::{broadcast, Mutex};
use tracing::{debug, warn};
use uuid::Uuid;

/// Logical table of anomaly alerts
pub const ALERTS_TABLE: &str = "anomaly_alerts";

/// Anomaly detection errors
#[derive(Error, Debug)]
pub enum AnomalyError {
    #[error("audit log error: {0}")]
    Audit(#[from] AuditError),

    #[error("metrics registration failed: {0}")]
    Metrics(String),

    #[error("invalid {kind} window: {secs} seconds")]
    InvalidWindow { kind: AnomalyKind, secs: i64 },
}

/// Kinds of anomaly the detector recognises
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum AnomalyKind {
    /// One actor touching many tenants in a short window
    RapidCrossClientAccess,
    /// Burst of reads and updates
    HighFrequencyAccess,
    /// Many denied attempts
    RepeatedAccessDenied,
}

impl AnomalyKind {
    pub const ALL: [AnomalyKind; 3] = [
        AnomalyKind::RapidCrossClientAccess,
        AnomalyKind::HighFrequencyAccess,
        AnomalyKind::RepeatedAccessDenied,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AnomalyKind::RapidCrossClientAccess => "rapid_cross_client_access",
            AnomalyKind::HighFrequencyAccess => "high_frequency_access",
            AnomalyKind::RepeatedAccessDenied => "repeated_access_denied",
        }
    }
}

impl fmt::Display for AnomalyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Detection thresholds. An alert fires when the observed count strictly
/// exceeds the limit within the trailing window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnomalyThresholds {
    pub cross_client_tenants: usize,
    pub cross_client_window_secs: i64,
    pub high_frequency_events: usize,
    pub high_frequency_window_secs: i64,
    pub access_denied_events: usize,
    pub access_denied_window_secs: i64,
}

impl Default for AnomalyThresholds {
    fn default() -> Self {
        Self {
            cross_client_tenants: 3,
            cross_client_window_secs: 5 * 60,
            high_frequency_events: 100,
            high_frequency_window_secs: 60,
            access_denied_events: 5,
            access_denied_window_secs: 10 * 60,
        }
    }
}

impl AnomalyThresholds {
    pub fn limit(&self, kind: AnomalyKind) -> usize {
        match kind {
            AnomalyKind::RapidCrossClientAccess => self.cross_client_tenants,
            AnomalyKind::HighFrequencyAccess => self.high_frequency_events,
            AnomalyKind::RepeatedAccessDenied => self.access_denied_events,
        }
    }

    /// Trailing window of `kind`. Negative or out-of-range settings are
    /// rejected.
    pub fn window(&self, kind: AnomalyKind) -> Result<TimeDelta, AnomalyError> {
        let secs = match kind {
            AnomalyKind::RapidCrossClientAccess => self.cross_client_window_secs,
            AnomalyKind::HighFrequencyAccess => self.high_frequency_window_secs,
            AnomalyKind::RepeatedAccessDenied => self.access_denied_window_secs,
        };
        TimeDelta::try_seconds(secs)
            .filter(|window| *window >= TimeDelta::zero())
            .ok_or(AnomalyError::InvalidWindow { kind, secs })
    }
}

/// A raised anomaly
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnomalyAlert {
    pub kind: AnomalyKind,
    pub actor_id: PrincipalId,
    /// Count observed in the window
    pub observed: usize,
    pub threshold: usize,
    pub window_secs: i64,
    /// Tenants involved, for cross-client alerts
    pub tenants: Vec<TenantId>,
    pub detected_at: DateTime<Utc>,
    /// Id of the ALERT audit record, when it was written
    pub audit_record_id: Option<Uuid>,
}

/// Anomaly detector - watches the audit stream
pub struct AnomalyDetector {
    log: Arc<dyn AuditLog>,
    thresholds: AnomalyThresholds,
    notifier: broadcast::Sender<AnomalyAlert>,
    last_alert: Mutex<HashMap<(PrincipalId, AnomalyKind), DateTime<Utc>>>,
    alert_counter: Option<HashMap<AnomalyKind, IntCounter>>,
}

impl AnomalyDetector {
    pub fn new(log: Arc<dyn AuditLog>, thresholds: AnomalyThresholds) -> Self {
        let (notifier, _) = broadcast::channel(64);
        Self {
            log,
            thresholds,
            notifier,
            last_alert: Mutex::new(HashMap::new()),
            alert_counter: None,
        }
    }

    pub fn with_defaults(log: Arc<dyn AuditLog>) -> Self {
        Self::new(log, AnomalyThresholds::default())
    }

    /// Register one Prometheus counter per anomaly kind
    pub fn with_prometheus(mut self, registry: &Registry) -> Result<Self, AnomalyError> {
        let mut counters = HashMap::new();
        for kind in AnomalyKind::ALL {
            let counter = IntCounter::new(
                format!("rapport_anomaly_{}_total", kind),
                format!("Number of {} alerts raised", kind),
            )
            .map_err(|e| AnomalyError::Metrics(e.to_string()))?;
            registry
                .register(Box::new(counter.clone()))
                .map_err(|e| AnomalyError::Metrics(e.to_string()))?;
            counters.insert(kind, counter);
        }
        self.alert_counter = Some(counters);
        Ok(self)
    }

    /// Real-time alert notifications
    pub fn subscribe(&self) -> broadcast::Receiver<AnomalyAlert> {
        self.notifier.subscribe()
    }

    pub fn thresholds(&self) -> &AnomalyThresholds {
        &self.thresholds
    }

    /// Which checks a newly appended record can trigger.
    fn triggered_kinds(record: &AuditRecord) -> Vec<AnomalyKind> {
        let mut kinds = Vec::new();
        match record.operation {
            AuditOperation::Alert => return kinds,
            AuditOperation::AccessDenied => kinds.push(AnomalyKind::RepeatedAccessDenied),
            AuditOperation::Read | AuditOperation::Update => {
                kinds.push(AnomalyKind::HighFrequencyAccess)
            }
            _ => {}
        }
        if record.tenant_id.is_some() && record.operation != AuditOperation::AccessDenied {
            kinds.push(AnomalyKind::RapidCrossClientAccess);
        }
        kinds
    }

    /// Evaluate one kind against the actor's records since `since`.
    fn evaluate(
        &self,
        kind: AnomalyKind,
        window: TimeDelta,
        actor: &PrincipalId,
        records: &[AuditRecord],
        since: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Option<AnomalyAlert> {
        let limit = self.thresholds.limit(kind);
        let in_window = records.iter().filter(|r| r.created_at >= since);

        let (observed, tenants) = match kind {
            AnomalyKind::RapidCrossClientAccess => {
                let tenants: BTreeSet<TenantId> = in_window
                    .filter(|r| {
                        !matches!(
                            r.operation,
                            AuditOperation::Alert | AuditOperation::AccessDenied
                        )
                    })
                    .filter_map(|r| r.tenant_id.clone())
                    .collect();
                (tenants.len(), tenants.into_iter().collect())
            }
            AnomalyKind::HighFrequencyAccess => (
                in_window
                    .filter(|r| {
                        matches!(r.operation, AuditOperation::Read | AuditOperation::Update)
                    })
                    .count(),
                Vec::new(),
            ),
            AnomalyKind::RepeatedAccessDenied => (
                in_window
                    .filter(|r| r.operation == AuditOperation::AccessDenied)
                    .count(),
                Vec::new(),
            ),
        };

        if observed <= limit {
            return None;
        }

        Some(AnomalyAlert {
            kind,
            actor_id: actor.clone(),
            observed,
            threshold: limit,
            window_secs: window.num_seconds(),
            tenants,
            detected_at: now,
            audit_record_id: None,
        })
    }

    /// True if no alert of this kind was raised for the actor within the
    /// kind's window, marking it raised now. Expired entries are dropped.
    async fn claim(
        &self,
        kind: AnomalyKind,
        actor: &PrincipalId,
        now: DateTime<Utc>,
    ) -> Result<bool, AnomalyError> {
        let mut windows = HashMap::new();
        for kind in AnomalyKind::ALL {
            windows.insert(kind, self.thresholds.window(kind)?);
        }

        let mut last = self.last_alert.lock().await;
        last.retain(|(_, k), at| windows.get(k).is_some_and(|w| now - *at < *w));
        let key = (actor.clone(), kind);
        if last.contains_key(&key) {
            return Ok(false);
        }
        last.insert(key, now);
        Ok(true)
    }

    /// Number of (actor, kind) pairs currently suppressed.
    pub async fn suppressed_count(&self) -> usize {
        self.last_alert.lock().await.len()
    }

    /// Inspect a newly appended record and raise any alerts it triggers.
    pub async fn inspect(&self, record: &AuditRecord) -> Result<Vec<AnomalyAlert>, AnomalyError> {
        let now = Utc::now();
        let mut raised = Vec::new();

        let mut checks = Vec::new();
        for kind in Self::triggered_kinds(record) {
            let window = self.thresholds.window(kind)?;
            let since = now
                .checked_sub_signed(window)
                .ok_or(AnomalyError::InvalidWindow {
                    kind,
                    secs: window.num_seconds(),
                })?;
            checks.push((kind, window, since));
        }
        let Some(earliest) = checks.iter().map(|(_, _, since)| *since).min() else {
            return Ok(raised);
        };
        let records = self
            .log
            .query(&AuditQuery::all().actor(record.actor_id.clone()).since(earliest))
            .await?;

        for (kind, window, since) in checks {
            let Some(mut alert) =
                self.evaluate(kind, window, &record.actor_id, &records, since, now)
            else {
                continue;
            };
            if !self.claim(kind, &record.actor_id, now).await? {
                debug!(actor = %record.actor_id, kind = %kind, "Alert suppressed within window");
                continue;
            }

            warn!(
                actor = %alert.actor_id,
                kind = %kind,
                observed = alert.observed,
                threshold = alert.threshold,
                "Anomaly detected"
            );

            let draft = AuditDraft::new(
                &ActorContext::new(alert.actor_id.clone()),
                ALERTS_TABLE,
                AuditOperation::Alert,
                DataClassification::Alert,
            )
            .event_type(kind.as_str())
            .metadata(serde_json::json!({
                "observed": alert.observed,
                "threshold": alert.threshold,
                "window_secs": alert.window_secs,
                "tenants": alert.tenants,
                "trigger_record": record.id,
            }));
            match self.log.append(draft).await {
                Ok(stored) => alert.audit_record_id = Some(stored.id),
                Err(err) => warn!(kind = %kind, error = %err, "Failed to store alert record"),
            }

            if let Some(ref counters) = self.alert_counter {
                if let Some(counter) = counters.get(&kind) {
                    counter.inc();
                }
            }

            // No subscribers is not an error.
            let _ = self.notifier.send(alert.clone());
            raised.push(alert);
        }

        Ok(raised)
    }
}

#[async_trait]
impl AuditListener for AnomalyDetector {
    async fn record_appended(&self, record: &AuditRecord) {
        if let Err(err) = self.inspect(record).await {
            warn!(audit_id = %record.id, error = %err, "Anomaly inspection failed");
        }
    }
}
