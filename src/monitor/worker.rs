//! Per-endpoint monitor loop
//!
//! Each iteration probes the endpoint, feeds the predictor, looks for a
//! faster server on a spike and reports the result. Stopping is cooperative:
//! the loop checks its stop signal at the top of every iteration, before it
//! reports, and while it sleeps.

use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::{broadcast, watch};
use tracing::{debug, error, info, warn};

use super::config::PollingConfig;
use super::error::ProbeError;
use super::journal::LatencyJournal;
use super::metrics::MonitorMetrics;
use super::predictor::{Forecast, OnlinePredictor};
use super::probe::{candidates_for, Resolver, SampleSource};
use super::reroute::RerouteSelector;
use super::status::{StatusSink, StatusUpdate};

/// Lifecycle of one endpoint's loop
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LoopState {
    Idle,
    Running,
    Stopped,
}

/// What a single iteration did
#[derive(Debug, Clone)]
pub enum IterationOutcome {
    Reported(StatusUpdate),
    ProbeFailed(ProbeError),
    /// Stop was signalled before the result was reported
    Cancelled,
}

/// Collaborators shared by every loop
#[derive(Clone)]
pub struct LoopContext {
    pub source: Arc<dyn SampleSource>,
    pub resolver: Arc<dyn Resolver>,
    pub sink: Arc<dyn StatusSink>,
    pub journal: LatencyJournal,
    pub metrics: Arc<MonitorMetrics>,
    pub events: broadcast::Sender<StatusUpdate>,
    pub polling: PollingConfig,
}

pub struct MonitorWorker {
    endpoint: String,
    predictor: Arc<Mutex<OnlinePredictor>>,
    selector: RerouteSelector,
    ctx: LoopContext,
}

impl MonitorWorker {
    pub fn new(endpoint: String, predictor: Arc<Mutex<OnlinePredictor>>, ctx: LoopContext) -> Self {
        Self {
            endpoint,
            predictor,
            selector: RerouteSelector::new(Arc::clone(&ctx.source)),
            ctx,
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Poll until `stop` turns true or its sender is dropped
    pub async fn run(self, mut stop: watch::Receiver<bool>) {
        info!(endpoint = %self.endpoint, "Monitor loop started");

        loop {
            if *stop.borrow() {
                break;
            }

            let pause = match self.run_iteration(&stop).await {
                IterationOutcome::Reported(_) => self.ctx.polling.poll_interval,
                IterationOutcome::ProbeFailed(_) => self.ctx.polling.retry_backoff,
                IterationOutcome::Cancelled => break,
            };

            tokio::select! {
                _ = tokio::time::sleep(pause) => {}
                changed = stop.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        info!(endpoint = %self.endpoint, "Monitor loop stopped");
    }

    /// One probe, forecast and report cycle. Never fails; problems are
    /// logged and reflected in the outcome.
    pub async fn run_iteration(&self, stop: &watch::Receiver<bool>) -> IterationOutcome {
        let endpoint = self.endpoint.as_str();

        let sample = match self.ctx.source.probe(endpoint).await {
            Ok(sample) => sample,
            Err(e) => {
                self.ctx.metrics.record_probe(endpoint, None);
                warn!(endpoint = %endpoint, "Failed to get latency: {}", e);
                return IterationOutcome::ProbeFailed(e);
            }
        };
        self.ctx.metrics.record_probe(endpoint, Some(sample.latency_ms));

        let predictor = Arc::clone(&self.predictor);
        let observed = sample.latency_ms;
        let (forecast, retrains) = match tokio::task::spawn_blocking(move || {
            let mut predictor = predictor.lock();
            predictor.update(sample.latency_ms, sample.timestamp);
            (predictor.predict(sample.latency_ms), predictor.retrain_count())
        })
        .await
        {
            Ok(result) => result,
            Err(e) => {
                error!(endpoint = %endpoint, "Prediction task failed: {}", e);
                (Forecast::identity(observed), 0)
            }
        };
        self.ctx
            .metrics
            .record_forecast(endpoint, forecast.predicted, forecast.is_spike, retrains);

        debug!(
            endpoint = %endpoint,
            "latency={:.2}ms predicted={:.2}ms spike={}",
            observed,
            forecast.predicted,
            forecast.is_spike
        );

        let mut suggested_server = None;
        let mut improvement_ms = None;
        if forecast.is_spike {
            let candidates = candidates_for(self.ctx.resolver.as_ref(), endpoint).await;
            if let Some(suggestion) = self.selector.select(&candidates, endpoint).await {
                improvement_ms = Some(suggestion.improvement_over(observed));
                suggested_server = Some(suggestion.address);
                self.ctx.metrics.record_suggestion(endpoint);
            }
            info!(
                endpoint = %endpoint,
                "Latency spike: {:.2}ms vs {:.2}ms predicted (severity {:.2}), suggested {:?}",
                observed,
                forecast.predicted,
                forecast.severity,
                suggested_server
            );
        }

        if *stop.borrow() {
            return IterationOutcome::Cancelled;
        }

        let update = StatusUpdate {
            endpoint: endpoint.to_string(),
            timestamp: sample.timestamp,
            observed_ms: observed,
            predicted_ms: forecast.predicted,
            is_spike: forecast.is_spike,
            severity: forecast.severity,
            suggested_server,
            improvement_ms,
        };
        self.report(&update).await;

        IterationOutcome::Reported(update)
    }

    async fn report(&self, update: &StatusUpdate) {
        if let Err(e) = self.ctx.sink.publish(update) {
            self.ctx.metrics.record_report_error();
            warn!(endpoint = %update.endpoint, "Status update dropped: {}", e);
        }

        // no subscribers is fine
        let _ = self.ctx.events.send(update.clone());

        if !self.ctx.journal.is_enabled() {
            return;
        }
        let journal = self.ctx.journal.clone();
        let record = update.clone();
        let written = tokio::task::spawn_blocking(move || journal.append(&record))
            .await
            .map_err(anyhow::Error::from)
            .and_then(|result| result);
        if let Err(e) = written {
            self.ctx.metrics.record_report_error();
            warn!(endpoint = %update.endpoint, "Journal write failed: {}", e);
        }
    }
}
