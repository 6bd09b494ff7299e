//! Shared fakes for supervisor integration tests

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use latency_watch::monitor::{
    ModelKind, MonitorConfig, ProbeError, Resolver, Sample, SampleSource, Supervisor,
};

/// Sample source with a fixed latency per address; unknown addresses fail
#[derive(Default)]
pub struct FixedSource {
    latencies: Mutex<HashMap<String, f64>>,
    calls: Mutex<HashMap<String, usize>>,
}

impl FixedSource {
    pub fn new(entries: &[(&str, f64)]) -> Self {
        let source = Self::default();
        for (address, ms) in entries {
            source.set(address, *ms);
        }
        source
    }

    pub fn set(&self, address: &str, ms: f64) {
        self.latencies.lock().insert(address.to_string(), ms);
    }

    pub fn calls(&self, address: &str) -> usize {
        self.calls.lock().get(address).copied().unwrap_or(0)
    }
}

#[async_trait]
impl SampleSource for FixedSource {
    async fn probe(&self, address: &str) -> Result<Sample, ProbeError> {
        *self.calls.lock().entry(address.to_string()).or_insert(0) += 1;
        match self.latencies.lock().get(address) {
            Some(ms) => Ok(Sample::now(*ms)),
            None => Err(ProbeError::Unreachable(address.to_string())),
        }
    }
}

/// Resolver that never finds records
pub struct NoRecords;

#[async_trait]
impl Resolver for NoRecords {
    async fn resolve(&self, _domain: &str) -> Vec<String> {
        Vec::new()
    }
}

/// Fast-polling config without a journal
pub fn test_config() -> MonitorConfig {
    let mut config = MonitorConfig::default();
    config.journal.enabled = false;
    config.predictor.model = ModelKind::Ridge;
    config.polling.poll_interval = Duration::from_millis(10);
    config.polling.retry_backoff = Duration::from_millis(10);
    config.polling.stop_timeout = Duration::from_secs(2);
    config
}

pub fn supervisor_with(source: Arc<FixedSource>) -> Supervisor {
    Supervisor::new(test_config(), source, Arc::new(NoRecords))
}
