//! Spike rules
//!
//! Two interchangeable strategies compare an observed latency against its
//! forecast. [`ThresholdRatioRule`] is the default; [`DeviationRule`] adds a
//! latency floor so low-latency noise is never flagged.

use std::fmt;

/// Outcome of classifying one observation
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct SpikeVerdict {
    pub is_spike: bool,
    pub severity: f64,
}

impl SpikeVerdict {
    pub fn calm() -> Self {
        Self::default()
    }
}

pub trait SpikeRule: Send + Sync + fmt::Debug {
    fn classify(&self, observed: f64, forecast: f64) -> SpikeVerdict;

    fn name(&self) -> &'static str;
}

/// `|observed - forecast| / forecast`, 0 when the forecast is not positive
pub fn relative_deviation(observed: f64, forecast: f64) -> f64 {
    if forecast <= 0.0 {
        return 0.0;
    }
    (observed - forecast).abs() / forecast
}

/// Spike when observed exceeds `forecast * spike_threshold`
#[derive(Debug, Clone)]
pub struct ThresholdRatioRule {
    pub spike_threshold: f64,
}

impl Default for ThresholdRatioRule {
    fn default() -> Self {
        Self {
            spike_threshold: 2.0,
        }
    }
}

impl SpikeRule for ThresholdRatioRule {
    fn classify(&self, observed: f64, forecast: f64) -> SpikeVerdict {
        if forecast <= 0.0 || !observed.is_finite() || !forecast.is_finite() {
            return SpikeVerdict::calm();
        }
        if observed > forecast * self.spike_threshold {
            SpikeVerdict {
                is_spike: true,
                severity: (observed - forecast) / forecast,
            }
        } else {
            SpikeVerdict::calm()
        }
    }

    fn name(&self) -> &'static str {
        "threshold_ratio"
    }
}

/// Spike when the relative deviation exceeds `percent_threshold` and the
/// observation is above `min_latency_floor_ms`. Severity is capped at 1.
#[derive(Debug, Clone)]
pub struct DeviationRule {
    pub percent_threshold: f64,
    pub min_latency_floor_ms: f64,
}

impl Default for DeviationRule {
    fn default() -> Self {
        Self {
            percent_threshold: 0.2,
            min_latency_floor_ms: 100.0,
        }
    }
}

impl SpikeRule for DeviationRule {
    fn classify(&self, observed: f64, forecast: f64) -> SpikeVerdict {
        let deviation = relative_deviation(observed, forecast);
        let is_spike = observed > self.min_latency_floor_ms && deviation > self.percent_threshold;
        SpikeVerdict {
            is_spike,
            severity: if is_spike { deviation.min(1.0) } else { 0.0 },
        }
    }

    fn name(&self) -> &'static str {
        "deviation"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deviation_rule_flags_large_deviation() {
        let rule = DeviationRule::default();
        let verdict = rule.classify(130.0, 100.0);
        assert!(verdict.is_spike);
        assert!((verdict.severity - 0.3).abs() < 1e-9);

        assert!(!rule.classify(105.0, 100.0).is_spike);
    }

    #[test]
    fn test_deviation_rule_floor() {
        let rule = DeviationRule::default();
        let verdict = rule.classify(50.0, 10.0);
        assert!(!verdict.is_spike);
        assert_eq!(verdict.severity, 0.0);
    }

    #[test]
    fn test_deviation_rule_severity_capped() {
        let verdict = DeviationRule::default().classify(900.0, 150.0);
        assert!(verdict.is_spike);
        assert_eq!(verdict.severity, 1.0);
    }

    #[test]
    fn test_ratio_rule() {
        let rule = ThresholdRatioRule::default();

        let verdict = rule.classify(500.0, 40.0);
        assert!(verdict.is_spike);
        assert!((verdict.severity - 11.5).abs() < 1e-9);

        // exactly double is not above the threshold
        assert!(!rule.classify(80.0, 40.0).is_spike);
        assert!(!rule.classify(130.0, 100.0).is_spike);
        assert_eq!(rule.classify(10.0, 0.0), SpikeVerdict::calm());
    }

    #[test]
    fn test_relative_deviation_non_positive_forecast() {
        assert_eq!(relative_deviation(50.0, 0.0), 0.0);
        assert_eq!(relative_deviation(50.0, -3.0), 0.0);
        assert!((relative_deviation(75.0, 100.0) - 0.25).abs() < 1e-12);
    }
}
