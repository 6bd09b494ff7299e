//! Prometheus metrics for latency monitoring

use parking_lot::RwLock;
use std::collections::HashMap;
use std::fmt::Write as _;
use std::sync::atomic::{AtomicU64, Ordering};

/// Bucket upper bounds in milliseconds
const LATENCY_BUCKETS_MS: [f64; 11] = [
    1.0, 5.0, 10.0, 25.0, 50.0, 100.0, 250.0, 500.0, 1_000.0, 2_500.0, 5_000.0,
];

/// Fixed-bucket latency histogram
#[derive(Debug)]
pub struct LatencyHistogram {
    counts: Vec<AtomicU64>,
    /// Sum of observations in microseconds
    sum_us: AtomicU64,
    count: AtomicU64,
}

impl LatencyHistogram {
    pub fn new() -> Self {
        Self {
            counts: LATENCY_BUCKETS_MS.iter().map(|_| AtomicU64::new(0)).collect(),
            sum_us: AtomicU64::new(0),
            count: AtomicU64::new(0),
        }
    }

    pub fn record_ms(&self, value_ms: f64) {
        if !value_ms.is_finite() || value_ms < 0.0 {
            return;
        }
        if let Some(i) = LATENCY_BUCKETS_MS.iter().position(|&b| value_ms <= b) {
            self.counts[i].fetch_add(1, Ordering::Relaxed);
        }
        self.sum_us
            .fetch_add((value_ms * 1_000.0) as u64, Ordering::Relaxed);
        self.count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }

    pub fn mean_ms(&self) -> f64 {
        let count = self.count();
        if count == 0 {
            return 0.0;
        }
        self.sum_us.load(Ordering::Relaxed) as f64 / 1_000.0 / count as f64
    }

    /// Prometheus histogram lines, bounds in seconds
    pub fn to_prometheus(&self, name: &str, labels: &str) -> String {
        let mut output = String::new();
        let mut cumulative = 0u64;

        for (i, &bound_ms) in LATENCY_BUCKETS_MS.iter().enumerate() {
            cumulative += self.counts[i].load(Ordering::Relaxed);
            let _ = writeln!(
                output,
                "{}_bucket{{{},le=\"{}\"}} {}",
                name,
                labels,
                bound_ms / 1_000.0,
                cumulative
            );
        }

        let total = self.count();
        let _ = writeln!(output, "{}_bucket{{{},le=\"+Inf\"}} {}", name, labels, total);
        let _ = writeln!(
            output,
            "{}_sum{{{}}} {}",
            name,
            labels,
            self.sum_us.load(Ordering::Relaxed) as f64 / 1_000_000.0
        );
        let _ = writeln!(output, "{}_count{{{}}} {}", name, labels, total);
        output
    }
}

impl Default for LatencyHistogram {
    fn default() -> Self {
        Self::new()
    }
}

/// Per-endpoint monitoring counters and gauges
#[derive(Debug, Default)]
pub struct MonitorMetrics {
    /// Observed latency per endpoint
    pub latency: RwLock<HashMap<String, LatencyHistogram>>,

    pub probe_total: RwLock<HashMap<String, AtomicU64>>,
    pub probe_success: RwLock<HashMap<String, AtomicU64>>,

    /// Consecutive probe failures (reset on success)
    pub consecutive_failures: RwLock<HashMap<String, u32>>,

    pub spikes: RwLock<HashMap<String, AtomicU64>>,
    pub reroute_suggestions: RwLock<HashMap<String, AtomicU64>>,

    /// Model refits so far, as reported by each predictor
    pub retrains: RwLock<HashMap<String, u64>>,

    /// Last forecast per endpoint (ms)
    pub predicted: RwLock<HashMap<String, f64>>,

    /// Status sink or journal write failures
    pub report_errors: AtomicU64,

    /// Monitor loops currently running
    pub active_loops: AtomicU64,
}

fn bump(map: &RwLock<HashMap<String, AtomicU64>>, endpoint: &str) {
    if let Some(counter) = map.read().get(endpoint) {
        counter.fetch_add(1, Ordering::Relaxed);
        return;
    }
    map.write()
        .entry(endpoint.to_string())
        .or_insert_with(|| AtomicU64::new(0))
        .fetch_add(1, Ordering::Relaxed);
}

fn load(map: &RwLock<HashMap<String, AtomicU64>>, endpoint: &str) -> u64 {
    map.read()
        .get(endpoint)
        .map(|v| v.load(Ordering::Relaxed))
        .unwrap_or(0)
}

impl MonitorMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one probe outcome; `latency_ms` is `None` on failure
    pub fn record_probe(&self, endpoint: &str, latency_ms: Option<f64>) {
        bump(&self.probe_total, endpoint);

        match latency_ms {
            Some(ms) => {
                bump(&self.probe_success, endpoint);
                self.latency
                    .write()
                    .entry(endpoint.to_string())
                    .or_insert_with(LatencyHistogram::new)
                    .record_ms(ms);
                self.consecutive_failures
                    .write()
                    .insert(endpoint.to_string(), 0);
            }
            None => {
                *self
                    .consecutive_failures
                    .write()
                    .entry(endpoint.to_string())
                    .or_insert(0) += 1;
            }
        }
    }

    pub fn record_forecast(&self, endpoint: &str, predicted_ms: f64, is_spike: bool, retrains: u64) {
        self.predicted
            .write()
            .insert(endpoint.to_string(), predicted_ms);
        self.retrains.write().insert(endpoint.to_string(), retrains);
        if is_spike {
            bump(&self.spikes, endpoint);
        }
    }

    pub fn record_suggestion(&self, endpoint: &str) {
        bump(&self.reroute_suggestions, endpoint);
    }

    pub fn record_report_error(&self) {
        self.report_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn report_error_count(&self) -> u64 {
        self.report_errors.load(Ordering::Relaxed)
    }

    pub fn set_active_loops(&self, count: usize) {
        self.active_loops.store(count as u64, Ordering::Relaxed);
    }

    pub fn get_consecutive_failures(&self, endpoint: &str) -> u32 {
        *self
            .consecutive_failures
            .read()
            .get(endpoint)
            .unwrap_or(&0)
    }

    pub fn probe_count(&self, endpoint: &str) -> u64 {
        load(&self.probe_total, endpoint)
    }

    pub fn spike_count(&self, endpoint: &str) -> u64 {
        load(&self.spikes, endpoint)
    }

    pub fn suggestion_count(&self, endpoint: &str) -> u64 {
        load(&self.reroute_suggestions, endpoint)
    }

    /// Fraction of failed probes (0 when never probed)
    pub fn failure_rate(&self, endpoint: &str) -> f64 {
        let total = self.probe_count(endpoint);
        if total == 0 {
            return 0.0;
        }
        1.0 - load(&self.probe_success, endpoint) as f64 / total as f64
    }

    /// Drop every series for `endpoint`
    pub fn remove_endpoint(&self, endpoint: &str) {
        self.latency.write().remove(endpoint);
        self.probe_total.write().remove(endpoint);
        self.probe_success.write().remove(endpoint);
        self.consecutive_failures.write().remove(endpoint);
        self.spikes.write().remove(endpoint);
        self.reroute_suggestions.write().remove(endpoint);
        self.retrains.write().remove(endpoint);
        self.predicted.write().remove(endpoint);
    }

    pub fn clear(&self) {
        self.latency.write().clear();
        self.probe_total.write().clear();
        self.probe_success.write().clear();
        self.consecutive_failures.write().clear();
        self.spikes.write().clear();
        self.reroute_suggestions.write().clear();
        self.retrains.write().clear();
        self.predicted.write().clear();
        self.report_errors.store(0, Ordering::Relaxed);
    }

    /// Export all metrics in Prometheus text format
    pub fn to_prometheus(&self) -> String {
        let mut output = String::new();

        output.push_str("# HELP latency_watch_latency_seconds Observed round-trip latency\n");
        output.push_str("# TYPE latency_watch_latency_seconds histogram\n");
        for (endpoint, hist) in sorted(&self.latency.read()) {
            let labels = format!("endpoint=\"{}\"", escape_label(endpoint));
            output.push_str(&hist.to_prometheus("latency_watch_latency_seconds", &labels));
        }

        counter_family(
            &mut output,
            "latency_watch_probe_total",
            "Probes attempted",
            &self.probe_total.read(),
        );
        counter_family(
            &mut output,
            "latency_watch_probe_success_total",
            "Probes that returned a latency",
            &self.probe_success.read(),
        );
        counter_family(
            &mut output,
            "latency_watch_spikes_total",
            "Observations classified as spikes",
            &self.spikes.read(),
        );
        counter_family(
            &mut output,
            "latency_watch_reroute_suggestions_total",
            "Spikes with a faster alternate server",
            &self.reroute_suggestions.read(),
        );

        output.push_str("\n# HELP latency_watch_consecutive_failures Consecutive probe failures\n");
        output.push_str("# TYPE latency_watch_consecutive_failures gauge\n");
        for (endpoint, count) in sorted(&self.consecutive_failures.read()) {
            let _ = writeln!(
                output,
                "latency_watch_consecutive_failures{{endpoint=\"{}\"}} {}",
                escape_label(endpoint),
                count
            );
        }

        output.push_str("\n# HELP latency_watch_predicted_ms Last forecast latency\n");
        output.push_str("# TYPE latency_watch_predicted_ms gauge\n");
        for (endpoint, value) in sorted(&self.predicted.read()) {
            let _ = writeln!(
                output,
                "latency_watch_predicted_ms{{endpoint=\"{}\"}} {:.2}",
                escape_label(endpoint),
                value
            );
        }

        output.push_str("\n# HELP latency_watch_model_retrains Model refits per endpoint\n");
        output.push_str("# TYPE latency_watch_model_retrains gauge\n");
        for (endpoint, count) in sorted(&self.retrains.read()) {
            let _ = writeln!(
                output,
                "latency_watch_model_retrains{{endpoint=\"{}\"}} {}",
                escape_label(endpoint),
                count
            );
        }

        output.push_str("\n# HELP latency_watch_report_errors_total Failed status or journal writes\n");
        output.push_str("# TYPE latency_watch_report_errors_total counter\n");
        let _ = writeln!(
            output,
            "latency_watch_report_errors_total {}",
            self.report_errors.load(Ordering::Relaxed)
        );

        output.push_str("\n# HELP latency_watch_active_loops Running monitor loops\n");
        output.push_str("# TYPE latency_watch_active_loops gauge\n");
        let _ = writeln!(
            output,
            "latency_watch_active_loops {}",
            self.active_loops.load(Ordering::Relaxed)
        );

        output
    }
}

fn counter_family(
    output: &mut String,
    name: &str,
    help: &str,
    map: &HashMap<String, AtomicU64>,
) {
    let _ = writeln!(output, "\n# HELP {} {}", name, help);
    let _ = writeln!(output, "# TYPE {} counter", name);
    for (endpoint, count) in sorted(map) {
        let _ = writeln!(
            output,
            "{}{{endpoint=\"{}\"}} {}",
            name,
            escape_label(endpoint),
            count.load(Ordering::Relaxed)
        );
    }
}

fn sorted<V>(map: &HashMap<String, V>) -> Vec<(&String, &V)> {
    let mut entries: Vec<_> = map.iter().collect();
    entries.sort_by(|a, b| a.0.cmp(b.0));
    entries
}

fn escape_label(value: &str) -> String {
    value
        .replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace('\n', "\\n")
}
