//! Per-endpoint online latency predictor
//!
//! Keeps a bounded history window for the current feature row and a separate
//! training corpus for periodic refits. Until the first successful fit the
//! forecast is the observation itself, so callers never special-case startup.

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use super::classifier::SpikeRule;
use super::config::{MonitorConfig, PredictorConfig};
use super::error::PredictorError;
use super::features::FeatureExtractor;
use super::regression::{build_regressor, Regressor, RegressorFactory, StandardScaler};
use super::sample::{HistoryWindow, Sample, TrainingCorpus};

/// Point forecast plus the spike decision for the observation it was made for
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Forecast {
    pub predicted: f64,
    pub is_spike: bool,
    pub severity: f64,
}

impl Forecast {
    /// Forecast equal to the observation, never a spike
    pub fn identity(observed: f64) -> Self {
        Self {
            predicted: observed,
            is_spike: false,
            severity: 0.0,
        }
    }
}

#[derive(Debug)]
pub struct OnlinePredictor {
    config: PredictorConfig,
    extractor: FeatureExtractor,
    rule: Box<dyn SpikeRule>,
    history: HistoryWindow,
    corpus: TrainingCorpus,
    scaler: StandardScaler,
    model: Box<dyn Regressor>,
    factory: RegressorFactory,
    is_trained: bool,
    observations: u64,
    samples_since_retrain: usize,
    retrain_count: u64,
}

impl OnlinePredictor {
    pub fn new(
        config: PredictorConfig,
        extractor: FeatureExtractor,
        rule: Box<dyn SpikeRule>,
    ) -> Self {
        Self {
            history: HistoryWindow::new(config.max_history),
            corpus: TrainingCorpus::new(config.max_training_samples),
            scaler: StandardScaler::default(),
            model: build_regressor(&config),
            factory: build_regressor,
            config,
            extractor,
            rule,
            is_trained: false,
            observations: 0,
            samples_since_retrain: 0,
            retrain_count: 0,
        }
    }

    pub fn from_config(config: &MonitorConfig) -> Self {
        Self::new(
            config.predictor.clone(),
            FeatureExtractor::new(config.features.clone()),
            config.classifier.build(),
        )
    }

    /// Use `factory` instead of the configured model kind for every refit
    pub fn with_regressor_factory(mut self, factory: RegressorFactory) -> Self {
        self.model = factory(&self.config);
        self.factory = factory;
        self
    }

    /// Record an observation. Refits when the lifetime observation count
    /// reaches a multiple of `retrain_interval`; fit failures are logged.
    pub fn update(&mut self, latency_ms: f64, timestamp: DateTime<Utc>) {
        if !latency_ms.is_finite() || latency_ms < 0.0 {
            warn!("Ignoring invalid latency sample: {}", latency_ms);
            return;
        }

        let sample = Sample::new(latency_ms, timestamp);
        self.history.push(sample);
        self.corpus.push(sample);
        self.observations += 1;
        self.samples_since_retrain += 1;

        let interval = self.config.retrain_interval as u64;
        if interval > 0 && self.observations % interval == 0 {
            if let Err(e) = self.retrain() {
                debug!("Scheduled retrain skipped: {}", e);
            }
        }
    }

    /// Forecast for the most recent window state and classify `current_ms`
    /// against it.
    pub fn predict(&mut self, current_ms: f64) -> Forecast {
        if self.observations < self.config.min_samples as u64 {
            return Forecast::identity(current_ms);
        }

        let Some(matrix) = self.extractor.extract(self.history.contiguous()) else {
            return Forecast::identity(current_ms);
        };

        let due = self.samples_since_retrain >= self.config.retrain_interval.max(1);
        if !self.is_trained || due {
            if let Err(e) = self.retrain() {
                warn!("Retrain before prediction failed: {}", e);
            }
        }
        if !self.is_trained {
            return Forecast::identity(current_ms);
        }

        let Some(row) = matrix.last() else {
            return Forecast::identity(current_ms);
        };
        let scaled = self.scaler.transform_row(row);
        let predicted = match self.model.predict_row(&scaled) {
            Some(p) if p.is_finite() => p,
            _ => return Forecast::identity(current_ms),
        };

        let verdict = self.rule.classify(current_ms, predicted);
        Forecast {
            predicted,
            is_spike: verdict.is_spike,
            severity: verdict.severity,
        }
    }

    /// Refit scaler and model on the whole training corpus.
    ///
    /// Both are fit fresh and swapped in only when the fit succeeds; on error
    /// the previous model stays in place.
    pub fn retrain(&mut self) -> Result<(), PredictorError> {
        let have = self.corpus.len();
        let need = self.config.min_samples.max(2);
        if have < need {
            return Err(PredictorError::InsufficientData { have, need });
        }

        let samples = self.corpus.contiguous();
        let matrix = self
            .extractor
            .extract(samples)
            .ok_or(PredictorError::NoFeatures)?;
        let targets: Vec<f64> = matrix
            .sample_indices()
            .iter()
            .map(|&i| samples[i].latency_ms)
            .collect();

        let mut scaler = StandardScaler::default();
        scaler.fit(matrix.rows())?;
        let scaled = scaler.transform(matrix.rows());

        let mut model = (self.factory)(&self.config);
        model.fit(&scaled, &targets)?;

        self.scaler = scaler;
        self.model = model;
        self.is_trained = true;
        self.samples_since_retrain = 0;
        self.retrain_count += 1;

        debug!(
            "Retrained {} on {} rows (retrain #{})",
            self.model.name(),
            targets.len(),
            self.retrain_count
        );
        Ok(())
    }

    pub fn history(&self) -> &HistoryWindow {
        &self.history
    }

    pub fn training_len(&self) -> usize {
        self.corpus.len()
    }

    pub fn is_trained(&self) -> bool {
        self.is_trained
    }

    /// Lifetime count of accepted observations
    pub fn observations(&self) -> u64 {
        self.observations
    }

    pub fn retrain_count(&self) -> u64 {
        self.retrain_count
    }

    pub fn rule_name(&self) -> &'static str {
        self.rule.name()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitor::config::{ForestConfig, ModelKind};
    use crate::monitor::error::FitError;
    use crate::monitor::features::FeatureRow;
    use chrono::{Duration, TimeZone};

    fn config(model: ModelKind) -> MonitorConfig {
        let mut config = MonitorConfig::default();
        config.features.utc_offset_secs = Some(0);
        config.predictor.model = model;
        config.predictor.forest = ForestConfig {
            n_trees: 15,
            ..ForestConfig::default()
        };
        config
    }

    fn feed(predictor: &mut OnlinePredictor, values: &[f64]) {
        let base = Utc.with_ymd_and_hms(2024, 5, 6, 14, 0, 0).unwrap();
        let offset = predictor.observations() as i64;
        for (i, &v) in values.iter().enumerate() {
            predictor.update(v, base + Duration::seconds(offset + i as i64));
        }
    }

    fn steady(n: usize) -> Vec<f64> {
        (0..n).map(|i| 40.0 + (i % 3) as f64).collect()
    }

    #[test]
    fn test_identity_below_min_samples() {
        let mut predictor = OnlinePredictor::from_config(&config(ModelKind::RandomForest));
        feed(&mut predictor, &[30.0, 900.0, 31.0, 29.0]);

        let forecast = predictor.predict(29.0);
        assert_eq!(forecast, Forecast::identity(29.0));
        assert!(!predictor.is_trained());
    }

    #[test]
    fn test_history_bounded_corpus_kept() {
        let mut cfg = config(ModelKind::Ridge);
        cfg.predictor.max_history = 10;
        cfg.predictor.max_training_samples = 0;
        let mut predictor = OnlinePredictor::from_config(&cfg);

        let values: Vec<f64> = (0..35).map(|v| v as f64 + 1.0).collect();
        feed(&mut predictor, &values);

        assert_eq!(predictor.history().len(), 10);
        let kept: Vec<f64> = predictor.history().iter().map(|s| s.latency_ms).collect();
        assert_eq!(kept, values[25..].to_vec());
        assert_eq!(predictor.training_len(), 35);
    }

    #[test]
    fn test_invalid_samples_ignored() {
        let mut predictor = OnlinePredictor::from_config(&config(ModelKind::Ridge));
        feed(&mut predictor, &[10.0, f64::NAN, -1.0, f64::INFINITY, 12.0]);
        assert_eq!(predictor.observations(), 2);
    }

    #[test]
    fn test_retrain_cadence() {
        let mut predictor = OnlinePredictor::from_config(&config(ModelKind::Ridge));
        feed(&mut predictor, &steady(19));
        assert_eq!(predictor.retrain_count(), 0);

        feed(&mut predictor, &steady(1));
        assert_eq!(predictor.retrain_count(), 1);
        assert!(predictor.is_trained());

        // a saturated history window does not cause a refit on every update
        let mut cfg = config(ModelKind::Ridge);
        cfg.predictor.max_history = 20;
        let mut saturated = OnlinePredictor::from_config(&cfg);
        feed(&mut saturated, &steady(45));
        assert_eq!(saturated.retrain_count(), 2);
    }

    #[test]
    fn test_retrain_insufficient_data() {
        let mut predictor = OnlinePredictor::from_config(&config(ModelKind::Ridge));
        feed(&mut predictor, &[10.0, 11.0]);
        assert_eq!(
            predictor.retrain(),
            Err(PredictorError::InsufficientData { have: 2, need: 5 })
        );
        assert!(!predictor.is_trained());
    }

    #[test]
    fn test_spike_after_steady_series() {
        let mut predictor = OnlinePredictor::from_config(&config(ModelKind::RandomForest));
        feed(&mut predictor, &steady(40));
        let calm = predictor.predict(41.0);
        assert!(!calm.is_spike);
        assert!(predictor.is_trained());

        feed(&mut predictor, &[500.0]);
        let forecast = predictor.predict(500.0);
        assert!(forecast.is_spike, "forecast={:?}", forecast);
        assert!(forecast.predicted < 50.0);
        assert!(forecast.severity > 1.0);
    }

    #[test]
    fn test_forecast_deterministic() {
        let values: Vec<f64> = (0..30).map(|i| 35.0 + ((i * 7) % 11) as f64).collect();

        let mut a = OnlinePredictor::from_config(&config(ModelKind::RandomForest));
        let mut b = OnlinePredictor::from_config(&config(ModelKind::RandomForest));
        feed(&mut a, &values);
        feed(&mut b, &values);

        assert_eq!(a.predict(40.0), b.predict(40.0));

        // explicit refit on unchanged data gives the same forecast
        a.retrain().unwrap();
        let before = a.predict(40.0);
        a.retrain().unwrap();
        assert_eq!(a.predict(40.0), before);
    }

    #[test]
    fn test_lazy_retrain_on_predict() {
        let mut predictor = OnlinePredictor::from_config(&config(ModelKind::Ridge));
        feed(&mut predictor, &steady(6));
        assert!(!predictor.is_trained());

        let forecast = predictor.predict(41.0);
        assert!(predictor.is_trained());
        assert!(forecast.predicted.is_finite());
        assert_eq!(predictor.retrain_count(), 1);

        // not due again until retrain_interval new samples arrive
        feed(&mut predictor, &steady(3));
        predictor.predict(41.0);
        assert_eq!(predictor.retrain_count(), 1);
    }

    /// Predicts the training mean; refuses to fit targets above 1000 ms
    #[derive(Debug, Default)]
    struct MeanRegressor {
        mean: Option<f64>,
    }

    impl Regressor for MeanRegressor {
        fn fit(&mut self, _x: &[FeatureRow], y: &[f64]) -> Result<(), FitError> {
            if y.iter().any(|&v| v > 1000.0) {
                return Err(FitError::Singular);
            }
            self.mean = Some(y.iter().sum::<f64>() / y.len() as f64);
            Ok(())
        }

        fn predict_row(&self, _row: &FeatureRow) -> Option<f64> {
            self.mean
        }

        fn name(&self) -> &'static str {
            "mean"
        }
    }

    fn mean_model(_config: &PredictorConfig) -> Box<dyn Regressor> {
        Box::new(MeanRegressor::default())
    }

    #[test]
    fn test_failed_refit_keeps_previous_model() {
        let mut predictor =
            OnlinePredictor::from_config(&config(ModelKind::Ridge)).with_regressor_factory(mean_model);
        feed(&mut predictor, &steady(20));
        assert_eq!(predictor.retrain_count(), 1);
        let before = predictor.predict(41.0);
        assert!(before.predicted > 39.0 && before.predicted < 43.0);

        feed(&mut predictor, &[5000.0]);
        assert_eq!(
            predictor.retrain(),
            Err(PredictorError::Fit(FitError::Singular))
        );
        assert!(predictor.is_trained());
        assert_eq!(predictor.retrain_count(), 1);
        assert_eq!(predictor.predict(41.0), before);

        // scheduled and lazy refits fail the same way
        feed(&mut predictor, &steady(19));
        assert_eq!(predictor.observations(), 40);
        assert_eq!(predictor.predict(41.0), before);
        assert_eq!(predictor.retrain_count(), 1);
    }
}
