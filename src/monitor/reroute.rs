//! Alternate server selection on a latency spike

use std::sync::Arc;

use futures_util::future::join_all;
use serde::Serialize;
use tracing::debug;

use super::probe::SampleSource;

/// Better-performing candidate found during selection
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RerouteSuggestion {
    pub address: String,
    /// Latency measured for `address` while selecting
    pub latency_ms: f64,
}

impl RerouteSuggestion {
    /// Gain over the observed latency of the active endpoint
    pub fn improvement_over(&self, observed_ms: f64) -> f64 {
        observed_ms - self.latency_ms
    }
}

#[derive(Clone)]
pub struct RerouteSelector {
    source: Arc<dyn SampleSource>,
}

impl RerouteSelector {
    pub fn new(source: Arc<dyn SampleSource>) -> Self {
        Self { source }
    }

    /// Probe every candidate concurrently and pick the fastest responder.
    ///
    /// The first minimum in input order wins. Returns `None` when the list is
    /// empty, when nothing answers, or when the winner is `active`.
    pub async fn select(&self, candidates: &[String], active: &str) -> Option<RerouteSuggestion> {
        if candidates.is_empty() {
            return None;
        }

        let results = join_all(candidates.iter().map(|c| self.source.probe(c))).await;

        let mut best: Option<(usize, f64)> = None;
        for (i, result) in results.into_iter().enumerate() {
            match result {
                Ok(sample) if sample.latency_ms.is_finite() => {
                    if best.map_or(true, |(_, b)| sample.latency_ms < b) {
                        best = Some((i, sample.latency_ms));
                    }
                }
                Ok(_) => {}
                Err(e) => debug!("Reroute candidate {} skipped: {}", candidates[i], e),
            }
        }

        let (index, latency_ms) = best?;
        let address = &candidates[index];
        if address == active {
            return None;
        }

        Some(RerouteSuggestion {
            address: address.clone(),
            latency_ms,
        })
    }
}
