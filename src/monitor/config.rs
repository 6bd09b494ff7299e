//! Latency Monitor Configuration

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::classifier::{DeviationRule, SpikeRule, ThresholdRatioRule};

/// Main configuration for latency monitoring
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Online predictor sizing and retrain cadence
    pub predictor: PredictorConfig,

    /// Feature derivation windows
    pub features: FeatureConfig,

    /// Spike rule selection and thresholds
    pub classifier: ClassifierConfig,

    /// Monitor loop timing
    pub polling: PollingConfig,

    /// Sample source settings
    pub probe: ProbeConfig,

    /// Per-endpoint CSV journal
    pub journal: JournalConfig,
}

impl MonitorConfig {
    /// Load from TOML file
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Load from `LATENCY_WATCH_CONFIG` or fall back to defaults
    pub fn from_env() -> Self {
        let path = std::env::var("LATENCY_WATCH_CONFIG")
            .unwrap_or_else(|_| "latency_watch.toml".to_string());

        Self::load(&path).unwrap_or_else(|e| {
            tracing::debug!("Using default monitor config ({}): {}", path, e);
            Self::default()
        })
    }

    /// Save to TOML file
    pub fn save(&self, path: impl AsRef<Path>) -> anyhow::Result<()> {
        let contents = toml::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }
}

/// Regression model used by the online predictor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelKind {
    RandomForest,
    Ridge,
}

/// Online predictor configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PredictorConfig {
    /// History window length used for the current feature row
    pub max_history: usize,
    /// Observations required before forecasting
    pub min_samples: usize,
    /// New observations between full refits
    pub retrain_interval: usize,
    /// Cap on the training corpus (0 = unbounded)
    pub max_training_samples: usize,
    /// Regression model
    pub model: ModelKind,
    /// Ridge penalty (used when model = ridge)
    pub ridge_lambda: f64,
    /// Random forest settings (used when model = random_forest)
    pub forest: ForestConfig,
}

impl Default for PredictorConfig {
    fn default() -> Self {
        Self {
            max_history: 100,
            min_samples: 5,
            retrain_interval: 20,
            max_training_samples: 2_000,
            model: ModelKind::RandomForest,
            ridge_lambda: 1e-3,
            forest: ForestConfig::default(),
        }
    }
}

/// Random forest hyper-parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ForestConfig {
    pub n_trees: usize,
    pub max_depth: usize,
    pub min_samples_split: usize,
    pub min_samples_leaf: usize,
    /// Bootstrap seed; identical data and seed give identical forecasts
    pub seed: u64,
}

impl Default for ForestConfig {
    fn default() -> Self {
        Self {
            n_trees: 100,
            max_depth: 12,
            min_samples_split: 2,
            min_samples_leaf: 1,
            seed: 42,
        }
    }
}

/// Feature derivation windows
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FeatureConfig {
    /// Trailing window for rolling mean / std
    pub rolling_window: usize,
    /// Short moving average
    pub short_window: usize,
    /// Long moving average
    pub long_window: usize,
    /// Trailing window for the volatility proxy
    pub volatility_window: usize,
    /// Offset for calendar features; None = host local time
    pub utc_offset_secs: Option<i32>,
}

impl Default for FeatureConfig {
    fn default() -> Self {
        Self {
            rolling_window: 5,
            short_window: 5,
            long_window: 10,
            volatility_window: 10,
            utc_offset_secs: None,
        }
    }
}

/// Which spike rule decides the reported status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpikeStrategy {
    /// observed > forecast * spike_threshold
    ThresholdRatio,
    /// relative deviation above percent_threshold and observed above a floor
    Deviation,
}

/// Spike classification configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierConfig {
    pub strategy: SpikeStrategy,
    /// Ratio for the threshold-ratio rule
    pub spike_threshold: f64,
    /// Relative deviation for the deviation rule
    pub percent_threshold: f64,
    /// Latency floor for the deviation rule (ms)
    pub min_latency_floor_ms: f64,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            strategy: SpikeStrategy::ThresholdRatio,
            spike_threshold: 2.0,
            percent_threshold: 0.2,
            min_latency_floor_ms: 100.0,
        }
    }
}

impl ClassifierConfig {
    /// Build the configured spike rule
    pub fn build(&self) -> Box<dyn SpikeRule> {
        match self.strategy {
            SpikeStrategy::ThresholdRatio => Box::new(ThresholdRatioRule {
                spike_threshold: self.spike_threshold,
            }),
            SpikeStrategy::Deviation => Box::new(DeviationRule {
                percent_threshold: self.percent_threshold,
                min_latency_floor_ms: self.min_latency_floor_ms,
            }),
        }
    }
}

/// Monitor loop timing
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PollingConfig {
    /// Sleep between successful iterations
    #[serde(with = "duration_serde")]
    pub poll_interval: Duration,
    /// Sleep after a failed probe
    #[serde(with = "duration_serde")]
    pub retry_backoff: Duration,
    /// How long stop() waits for a loop to finish its iteration
    #[serde(with = "duration_serde")]
    pub stop_timeout: Duration,
    /// Capacity of the status broadcast channel
    pub event_capacity: usize,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            retry_backoff: Duration::from_secs(1),
            stop_timeout: Duration::from_secs(5),
            event_capacity: 256,
        }
    }
}

/// Ping probe configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProbeConfig {
    /// ping executable
    pub ping_binary: String,
    /// Per-reply wait handed to ping (seconds)
    pub reply_wait_secs: u32,
    /// Hard deadline for the whole probe
    #[serde(with = "duration_serde")]
    pub timeout: Duration,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            ping_binary: "ping".into(),
            reply_wait_secs: 1,
            timeout: Duration::from_secs(2),
        }
    }
}

/// Per-endpoint CSV journal
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct JournalConfig {
    pub enabled: bool,
    /// Directory for latency_log_<endpoint>.csv files
    pub dir: PathBuf,
}

impl Default for JournalConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            dir: PathBuf::from("logs"),
        }
    }
}

impl JournalConfig {
    /// Directory to write to, if journaling is enabled
    pub fn target_dir(&self) -> Option<PathBuf> {
        self.enabled.then(|| self.dir.clone())
    }
}

// Serde helper for Duration (milliseconds)
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let ms = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(ms))
    }
}
