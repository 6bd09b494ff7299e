//! Externally visible per-endpoint status
//!
//! The table is keyed by endpoint and sharded, so loops writing different
//! endpoints never contend on one lock. Each publish replaces the whole entry,
//! so readers never see a half-updated snapshot.

use std::collections::BTreeMap;

use anyhow::bail;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;

/// Latest snapshot for one endpoint
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MonitoringStatus {
    pub server: String,
    pub latency: Option<f64>,
    pub predicted: Option<f64>,
    pub is_spike: bool,
    pub spike_severity: f64,
    pub last_update: Option<DateTime<Utc>>,
    pub suggested_server: Option<String>,
    pub improvement: Option<f64>,
}

impl MonitoringStatus {
    /// Entry for an endpoint with no measurement yet
    pub fn neutral(server: &str) -> Self {
        Self {
            server: server.to_string(),
            latency: None,
            predicted: None,
            is_spike: false,
            spike_severity: 0.0,
            last_update: None,
            suggested_server: None,
            improvement: None,
        }
    }

    fn from_update(update: &StatusUpdate) -> Self {
        Self {
            server: update.endpoint.clone(),
            latency: Some(round2(update.observed_ms)),
            predicted: Some(round2(update.predicted_ms)),
            is_spike: update.is_spike,
            spike_severity: round2(update.severity),
            last_update: Some(update.timestamp),
            suggested_server: update.suggested_server.clone(),
            improvement: update.improvement_ms.map(round2),
        }
    }
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

/// Result of one monitor loop iteration
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusUpdate {
    pub endpoint: String,
    pub timestamp: DateTime<Utc>,
    pub observed_ms: f64,
    pub predicted_ms: f64,
    pub is_spike: bool,
    pub severity: f64,
    pub suggested_server: Option<String>,
    pub improvement_ms: Option<f64>,
}

/// Receives one update per successful iteration; must return promptly
pub trait StatusSink: Send + Sync {
    fn publish(&self, update: &StatusUpdate) -> anyhow::Result<()>;
}

#[derive(Debug, Default)]
pub struct StatusTable {
    entries: DashMap<String, MonitoringStatus>,
}

impl StatusTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a neutral entry if none exists; true when inserted
    pub fn ensure(&self, endpoint: &str) -> bool {
        let mut inserted = false;
        self.entries.entry(endpoint.to_string()).or_insert_with(|| {
            inserted = true;
            MonitoringStatus::neutral(endpoint)
        });
        inserted
    }

    pub fn remove(&self, endpoint: &str) -> Option<MonitoringStatus> {
        self.entries.remove(endpoint).map(|(_, status)| status)
    }

    /// Reset every entry to neutral, keeping membership
    pub fn neutralize_all(&self) {
        for mut entry in self.entries.iter_mut() {
            let neutral = MonitoringStatus::neutral(entry.key());
            *entry.value_mut() = neutral;
        }
    }

    pub fn clear(&self) {
        self.entries.clear();
    }

    pub fn get(&self, endpoint: &str) -> Option<MonitoringStatus> {
        self.entries.get(endpoint).map(|e| e.value().clone())
    }

    pub fn contains(&self, endpoint: &str) -> bool {
        self.entries.contains_key(endpoint)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Owned copy of the table, ordered by endpoint
    pub fn snapshot(&self) -> BTreeMap<String, MonitoringStatus> {
        self.entries
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect()
    }
}

impl StatusSink for StatusTable {
    /// Only existing entries are written; a removed endpoint stays removed.
    fn publish(&self, update: &StatusUpdate) -> anyhow::Result<()> {
        match self.entries.get_mut(&update.endpoint) {
            Some(mut entry) => {
                *entry = MonitoringStatus::from_update(update);
                Ok(())
            }
            None => bail!("no status entry for {}", update.endpoint),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn update(endpoint: &str) -> StatusUpdate {
        StatusUpdate {
            endpoint: endpoint.into(),
            timestamp: Utc::now(),
            observed_ms: 123.456,
            predicted_ms: 40.004,
            is_spike: true,
            severity: 2.0861,
            suggested_server: Some("10.0.0.2".into()),
            improvement_ms: Some(80.123),
        }
    }

    #[test]
    fn test_publish_replaces_entry() {
        let table = StatusTable::new();
        assert!(table.ensure("example.com"));
        assert!(!table.ensure("example.com"));
        assert_eq!(
            table.get("example.com"),
            Some(MonitoringStatus::neutral("example.com"))
        );

        table.publish(&update("example.com")).unwrap();
        let status = table.get("example.com").unwrap();
        assert_eq!(status.latency, Some(123.46));
        assert_eq!(status.predicted, Some(40.0));
        assert_eq!(status.spike_severity, 2.09);
        assert_eq!(status.improvement, Some(80.12));
        assert_eq!(status.suggested_server.as_deref(), Some("10.0.0.2"));
        assert!(status.last_update.is_some());
    }

    #[test]
    fn test_publish_never_resurrects() {
        let table = StatusTable::new();
        assert!(table.publish(&update("gone.example")).is_err());
        assert!(table.is_empty());
    }

    #[test]
    fn test_neutralize_keeps_membership() {
        let table = StatusTable::new();
        table.ensure("b.example");
        table.ensure("a.example");
        table.publish(&update("a.example")).unwrap();

        table.neutralize_all();
        let snapshot = table.snapshot();
        let keys: Vec<&String> = snapshot.keys().collect();
        assert_eq!(keys, vec!["a.example", "b.example"]);
        assert_eq!(snapshot["a.example"], MonitoringStatus::neutral("a.example"));
    }

    #[test]
    fn test_neutral_status_json_shape() {
        let json = serde_json::to_value(MonitoringStatus::neutral("example.com")).unwrap();
        assert_eq!(json["server"], "example.com");
        assert!(json["latency"].is_null());
        assert_eq!(json["is_spike"], false);
        assert!(json["suggested_server"].is_null());
    }
}
