//! Endpoint registry and monitor loop lifecycle
//!
//! The supervisor owns all monitoring state explicitly: the registry of
//! endpoints with their predictors and loop handles, the status table, the
//! metrics registry and the event channel. Lifecycle operations (start, stop,
//! remove, reset, shutdown) are serialized with each other; `add` and the
//! read accessors are safe to call at any time.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use futures_util::future::join_all;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tokio::runtime::Handle;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use super::config::MonitorConfig;
use super::journal::LatencyJournal;
use super::metrics::MonitorMetrics;
use super::predictor::OnlinePredictor;
use super::probe::{Resolver, SampleSource};
use super::status::{MonitoringStatus, StatusSink, StatusTable, StatusUpdate};
use super::worker::{LoopContext, LoopState, MonitorWorker};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", content = "loops", rename_all = "snake_case")]
pub enum StartOutcome {
    /// Number of loops launched
    Started(usize),
    AlreadyRunning,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", content = "loops", rename_all = "snake_case")]
pub enum StopOutcome {
    /// Number of loops signalled
    Stopped(usize),
    NotRunning,
}

struct LoopHandle {
    stop: watch::Sender<bool>,
    task: JoinHandle<()>,
}

struct EndpointEntry {
    predictor: Arc<Mutex<OnlinePredictor>>,
    handle: Option<LoopHandle>,
    state: LoopState,
}

/// Publishes to the status table first, then to an extra sink
struct TeeSink {
    table: Arc<StatusTable>,
    extra: Arc<dyn StatusSink>,
}

impl StatusSink for TeeSink {
    fn publish(&self, update: &StatusUpdate) -> anyhow::Result<()> {
        self.table.publish(update)?;
        self.extra.publish(update)
    }
}

pub struct Supervisor {
    config: MonitorConfig,
    registry: DashMap<String, EndpointEntry>,
    status: Arc<StatusTable>,
    active: AtomicBool,
    lifecycle: tokio::sync::Mutex<()>,
    /// Runtime loops are spawned on, captured by `start`
    runtime: RwLock<Option<Handle>>,
    ctx: LoopContext,
}

impl Supervisor {
    pub fn new(
        config: MonitorConfig,
        source: Arc<dyn SampleSource>,
        resolver: Arc<dyn Resolver>,
    ) -> Self {
        let status = Arc::new(StatusTable::new());
        let (events, _) = broadcast::channel(config.polling.event_capacity.max(1));

        let ctx = LoopContext {
            source,
            resolver,
            sink: status.clone(),
            journal: LatencyJournal::from_config(&config.journal),
            metrics: Arc::new(MonitorMetrics::new()),
            events,
            polling: config.polling.clone(),
        };

        Self {
            config,
            registry: DashMap::new(),
            status,
            active: AtomicBool::new(false),
            lifecycle: tokio::sync::Mutex::new(()),
            runtime: RwLock::new(Handle::try_current().ok()),
            ctx,
        }
    }

    /// Also forward every status update to `sink`
    pub fn with_sink(mut self, sink: Arc<dyn StatusSink>) -> Self {
        self.ctx.sink = Arc::new(TeeSink {
            table: self.status.clone(),
            extra: sink,
        });
        self
    }

    /// Register an endpoint. Returns true if it was not registered before.
    ///
    /// Starts its loop right away when monitoring is active, on the runtime
    /// `start` ran on, so it may be called from any thread. Blank names are
    /// rejected.
    pub fn add(&self, endpoint: &str) -> bool {
        let name = endpoint.trim();
        if name.is_empty() {
            warn!("Ignoring empty endpoint name");
            return false;
        }

        let mut inserted = false;
        let mut entry = self.registry.entry(name.to_string()).or_insert_with(|| {
            inserted = true;
            EndpointEntry {
                predictor: Arc::new(Mutex::new(OnlinePredictor::from_config(&self.config))),
                handle: None,
                state: LoopState::Idle,
            }
        });
        self.status.ensure(name);

        // checked under the entry lock so a concurrent stop() sees the handle
        let spawned = self.active.load(Ordering::SeqCst)
            && entry.handle.is_none()
            && self.spawn_loop(name, &mut entry);
        drop(entry);

        if spawned {
            self.ctx.metrics.set_active_loops(self.running_loops());
        }

        if inserted {
            info!(endpoint = %name, "Endpoint added");
        }
        inserted
    }

    /// Stop the endpoint's loop and forget its predictor and status
    pub async fn remove(&self, endpoint: &str) -> bool {
        let _guard = self.lifecycle.lock().await;

        let Some((name, entry)) = self.registry.remove(endpoint.trim()) else {
            return false;
        };
        self.status.remove(&name);

        if let Some(handle) = entry.handle {
            let _ = handle.stop.send(true);
            self.join_loops(vec![(name.clone(), handle)]).await;
        }
        self.ctx.metrics.remove_endpoint(&name);
        self.ctx.metrics.set_active_loops(self.running_loops());

        info!(endpoint = %name, "Endpoint removed");
        true
    }

    /// Launch a loop for every registered endpoint that lacks one
    pub async fn start(&self) -> StartOutcome {
        let _guard = self.lifecycle.lock().await;

        if self.active.load(Ordering::SeqCst) {
            info!("Monitoring already running");
            return StartOutcome::AlreadyRunning;
        }
        *self.runtime.write() = Some(Handle::current());
        self.active.store(true, Ordering::SeqCst);

        let mut started = 0;
        for mut entry in self.registry.iter_mut() {
            let name = entry.key().clone();
            self.status.ensure(&name);
            if entry.handle.is_none() && self.spawn_loop(&name, entry.value_mut()) {
                started += 1;
            }
        }
        self.ctx.metrics.set_active_loops(self.running_loops());

        info!("Monitoring started ({} loops)", started);
        StartOutcome::Started(started)
    }

    /// Halt every loop, wait for in-flight iterations, then reset every
    /// status entry to neutral. Endpoints and predictors are kept.
    pub async fn stop(&self) -> StopOutcome {
        let _guard = self.lifecycle.lock().await;

        let was_active = self.active.swap(false, Ordering::SeqCst);
        let handles = self.halt_loops();
        let count = handles.len();
        self.join_loops(handles).await;
        self.status.neutralize_all();
        self.ctx.metrics.set_active_loops(0);

        if was_active {
            info!("Monitoring stopped ({} loops)", count);
            StopOutcome::Stopped(count)
        } else {
            StopOutcome::NotRunning
        }
    }

    /// Full teardown: loops, registry, predictors, status and metrics
    pub async fn reset(&self) {
        let _guard = self.lifecycle.lock().await;

        self.active.store(false, Ordering::SeqCst);
        let handles = self.halt_loops();
        self.join_loops(handles).await;

        self.registry.clear();
        self.status.clear();
        self.ctx.metrics.clear();
        self.ctx.metrics.set_active_loops(0);

        info!("Monitoring state reset");
    }

    /// Halt every loop for process exit; status is left as last reported
    pub async fn shutdown(&self) {
        let _guard = self.lifecycle.lock().await;

        self.active.store(false, Ordering::SeqCst);
        let handles = self.halt_loops();
        let count = handles.len();
        self.join_loops(handles).await;
        self.ctx.metrics.set_active_loops(0);

        info!("Supervisor shut down ({} loops)", count);
    }

    /// Registered endpoints, sorted
    pub fn endpoints(&self) -> Vec<String> {
        let mut names: Vec<String> = self.registry.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    pub fn status_snapshot(&self) -> BTreeMap<String, MonitoringStatus> {
        self.status.snapshot()
    }

    pub fn status(&self, endpoint: &str) -> Option<MonitoringStatus> {
        self.status.get(endpoint)
    }

    pub fn loop_state(&self, endpoint: &str) -> Option<LoopState> {
        self.registry.get(endpoint).map(|e| e.state)
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    pub fn metrics(&self) -> Arc<MonitorMetrics> {
        self.ctx.metrics.clone()
    }

    /// Stream of every reported status update
    pub fn subscribe(&self) -> broadcast::Receiver<StatusUpdate> {
        self.ctx.events.subscribe()
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }

    /// Returns false, leaving the entry idle, when no runtime was captured
    fn spawn_loop(&self, name: &str, entry: &mut EndpointEntry) -> bool {
        let Some(runtime) = self.runtime.read().clone() else {
            error!(endpoint = %name, "No runtime to spawn the monitor loop on");
            return false;
        };

        let (stop_tx, stop_rx) = watch::channel(false);
        let worker = MonitorWorker::new(
            name.to_string(),
            Arc::clone(&entry.predictor),
            self.ctx.clone(),
        );
        let task = runtime.spawn(worker.run(stop_rx));

        entry.handle = Some(LoopHandle {
            stop: stop_tx,
            task,
        });
        entry.state = LoopState::Running;
        true
    }

    /// Signal every running loop and take its handle
    fn halt_loops(&self) -> Vec<(String, LoopHandle)> {
        let mut handles = Vec::new();
        for mut entry in self.registry.iter_mut() {
            if let Some(handle) = entry.handle.take() {
                let _ = handle.stop.send(true);
                entry.state = LoopState::Stopped;
                handles.push((entry.key().clone(), handle));
            }
        }
        handles
    }

    /// Wait for loops to exit, detaching any that overrun `stop_timeout`
    async fn join_loops(&self, handles: Vec<(String, LoopHandle)>) {
        let deadline = self.config.polling.stop_timeout;
        let joins = handles.into_iter().map(|(name, handle)| async move {
            match tokio::time::timeout(deadline, handle.task).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => error!(endpoint = %name, "Monitor loop failed: {}", e),
                Err(_) => warn!(
                    endpoint = %name,
                    "Monitor loop did not stop within {:?}, detaching",
                    deadline
                ),
            }
        });
        join_all(joins).await;
    }

    fn running_loops(&self) -> usize {
        self.registry
            .iter()
            .filter(|e| e.handle.is_some())
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitor::test_support::{ScriptedSource, StaticResolver};
    use std::time::Duration;

    fn supervisor(source: ScriptedSource) -> Supervisor {
        let mut config = MonitorConfig::default();
        config.journal.enabled = false;
        config.predictor.model = crate::monitor::config::ModelKind::Ridge;
        config.polling.poll_interval = Duration::from_millis(10);
        config.polling.retry_backoff = Duration::from_millis(10);
        Supervisor::new(config, Arc::new(source), Arc::new(StaticResolver::new()))
    }

    #[test]
    fn test_add_is_idempotent() {
        let sup = supervisor(ScriptedSource::new());
        assert!(sup.add("example.com"));
        assert!(!sup.add("example.com"));
        assert!(!sup.add("  "));
        assert_eq!(sup.endpoints(), vec!["example.com".to_string()]);
        assert_eq!(sup.loop_state("example.com"), Some(LoopState::Idle));
        assert_eq!(
            sup.status("example.com"),
            Some(MonitoringStatus::neutral("example.com"))
        );
    }

    #[tokio::test]
    async fn test_start_stop_cycle() {
        let sup = supervisor(ScriptedSource::new().with_constant("example.com", 30.0));
        sup.add("example.com");

        assert_eq!(sup.start().await, StartOutcome::Started(1));
        assert_eq!(sup.start().await, StartOutcome::AlreadyRunning);
        assert_eq!(sup.loop_state("example.com"), Some(LoopState::Running));

        let mut events = sup.subscribe();
        let update = tokio::time::timeout(Duration::from_secs(5), events.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(update.endpoint, "example.com");

        assert_eq!(sup.stop().await, StopOutcome::Stopped(1));
        assert_eq!(sup.stop().await, StopOutcome::NotRunning);
        assert_eq!(sup.loop_state("example.com"), Some(LoopState::Stopped));
        assert_eq!(
            sup.status("example.com"),
            Some(MonitoringStatus::neutral("example.com"))
        );
        assert_eq!(sup.endpoints().len(), 1);
    }

    #[tokio::test]
    async fn test_add_while_active_starts_loop() {
        let sup = supervisor(ScriptedSource::new().with_constant("late.example", 30.0));
        assert_eq!(sup.start().await, StartOutcome::Started(0));

        sup.add("late.example");
        assert_eq!(sup.loop_state("late.example"), Some(LoopState::Running));
        sup.shutdown().await;
        assert!(!sup.is_active());
    }

    #[tokio::test]
    async fn test_predictor_survives_restart() {
        let sup = supervisor(ScriptedSource::new().with_constant("example.com", 30.0));
        sup.add("example.com");
        sup.start().await;

        let mut events = sup.subscribe();
        for _ in 0..3 {
            tokio::time::timeout(Duration::from_secs(5), events.recv())
                .await
                .unwrap()
                .unwrap();
        }
        sup.stop().await;

        let observations = sup
            .registry
            .get("example.com")
            .map(|e| e.predictor.lock().observations())
            .unwrap();
        assert!(observations >= 3);

        sup.start().await;
        let after = sup
            .registry
            .get("example.com")
            .map(|e| e.predictor.lock().observations())
            .unwrap();
        assert!(after >= observations);
        sup.shutdown().await;
    }

    #[tokio::test]
    async fn test_remove_and_reset() {
        let sup = supervisor(
            ScriptedSource::new()
                .with_constant("a.example", 30.0)
                .with_constant("b.example", 30.0),
        );
        sup.add("a.example");
        sup.add("b.example");
        sup.start().await;

        assert!(sup.remove(" a.example ").await);
        assert!(!sup.remove("a.example").await);
        assert!(sup.status("a.example").is_none());
        assert_eq!(sup.endpoints(), vec!["b.example".to_string()]);

        sup.reset().await;
        assert!(sup.status_snapshot().is_empty());
        assert!(sup.endpoints().is_empty());
        assert!(!sup.is_active());
    }
}
