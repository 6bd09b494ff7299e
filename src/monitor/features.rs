//! Feature derivation from a timestamped latency series
//!
//! Every row carries calendar features of its own timestamp plus trailing
//! statistics over the samples up to and including it. Column order is fixed
//! by [`FEATURE_NAMES`]; a model fit on one order cannot be fed another.

use chrono::{DateTime, Datelike, FixedOffset, Local, TimeZone, Timelike, Utc};

use super::config::FeatureConfig;
use super::sample::Sample;

pub const FEATURE_COUNT: usize = 21;

/// Column order shared by training and inference
pub const FEATURE_NAMES: [&str; FEATURE_COUNT] = [
    "hour",
    "minute",
    "second",
    "day_of_week",
    "is_weekend",
    "is_business_hours",
    "is_night",
    "is_morning",
    "is_afternoon",
    "is_evening",
    "is_weekday_morning",
    "is_weekday_evening",
    "is_weekend_day",
    "is_weekend_night",
    "rolling_mean",
    "rolling_std",
    "latency_diff",
    "latency_diff_abs",
    "ma_short",
    "ma_long",
    "volatility",
];

pub type FeatureRow = [f64; FEATURE_COUNT];

/// Feature rows plus the index of the sample each row was derived from
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureMatrix {
    rows: Vec<FeatureRow>,
    sample_index: Vec<usize>,
}

impl FeatureMatrix {
    pub fn rows(&self) -> &[FeatureRow] {
        &self.rows
    }

    /// Source sample index for each row, same order as `rows()`
    pub fn sample_indices(&self) -> &[usize] {
        &self.sample_index
    }

    /// Row for the most recent sample
    pub fn last(&self) -> Option<&FeatureRow> {
        self.rows.last()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct FeatureExtractor {
    config: FeatureConfig,
}

impl FeatureExtractor {
    pub fn new(config: FeatureConfig) -> Self {
        Self { config }
    }

    /// Derive feature rows for `samples` (time-ascending).
    ///
    /// Returns `None` for fewer than two samples or when every row lacks
    /// lookback. The first sample never yields a row: it has no difference
    /// and no standard deviation.
    pub fn extract(&self, samples: &[Sample]) -> Option<FeatureMatrix> {
        if samples.len() < 2 {
            return None;
        }

        let latencies: Vec<f64> = samples.iter().map(|s| s.latency_ms).collect();
        let rolling = self.config.rolling_window.max(1);
        let short = self.config.short_window.max(1);
        let long = self.config.long_window.max(1);
        let vol = self.config.volatility_window.max(1);

        let mut rows = Vec::with_capacity(samples.len() - 1);
        let mut sample_index = Vec::with_capacity(samples.len() - 1);

        for (i, sample) in samples.iter().enumerate().skip(1) {
            let Some(rolling_std) = sample_std(trailing(&latencies, i, rolling)) else {
                continue;
            };
            let Some(volatility) = sample_std(trailing(&latencies, i, vol)) else {
                continue;
            };
            // zero spread would blow up downstream scaling
            let rolling_std = if rolling_std == 0.0 { 1.0 } else { rolling_std };
            let diff = latencies[i] - latencies[i - 1];

            let mut row = [0.0; FEATURE_COUNT];
            row[..14].copy_from_slice(&self.calendar(sample.timestamp));
            row[14] = mean(trailing(&latencies, i, rolling));
            row[15] = rolling_std;
            row[16] = diff;
            row[17] = diff.abs();
            row[18] = mean(trailing(&latencies, i, short));
            row[19] = mean(trailing(&latencies, i, long));
            row[20] = volatility;

            rows.push(row);
            sample_index.push(i);
        }

        if rows.is_empty() {
            return None;
        }

        Some(FeatureMatrix { rows, sample_index })
    }

    fn calendar(&self, ts: DateTime<Utc>) -> [f64; 14] {
        match self.config.utc_offset_secs.and_then(FixedOffset::east_opt) {
            Some(offset) => calendar_features(&ts.with_timezone(&offset)),
            None => calendar_features(&ts.with_timezone(&Local)),
        }
    }
}

/// Calendar and day-part features (Monday = 0)
fn calendar_features<Tz: TimeZone>(dt: &DateTime<Tz>) -> [f64; 14] {
    let hour = dt.hour();
    let weekday = dt.weekday().num_days_from_monday();

    let weekend = weekday >= 5;
    let night = hour >= 22 || hour <= 6;
    let morning = hour > 6 && hour <= 12;
    let afternoon = hour > 12 && hour <= 18;
    let evening = hour > 18 && hour < 22;

    [
        hour as f64,
        dt.minute() as f64,
        dt.second() as f64,
        weekday as f64,
        flag(weekend),
        flag((9..=17).contains(&hour)),
        flag(night),
        flag(morning),
        flag(afternoon),
        flag(evening),
        flag(!weekend && morning),
        flag(!weekend && evening),
        flag(weekend && hour > 6 && hour <= 18),
        flag(weekend && (hour > 18 || hour <= 6)),
    ]
}

fn flag(b: bool) -> f64 {
    if b {
        1.0
    } else {
        0.0
    }
}

/// Up to `size` values ending at `end` (inclusive)
fn trailing(values: &[f64], end: usize, size: usize) -> &[f64] {
    let start = (end + 1).saturating_sub(size);
    &values[start..=end]
}

fn mean(values: &[f64]) -> f64 {
    values.iter().sum::<f64>() / values.len() as f64
}

/// Sample standard deviation; undefined below two values
fn sample_std(values: &[f64]) -> Option<f64> {
    if values.len() < 2 {
        return None;
    }
    let m = mean(values);
    let variance = values
        .iter()
        .map(|&x| {
            let diff = x - m;
            diff * diff
        })
        .sum::<f64>()
        / (values.len() - 1) as f64;
    Some(variance.sqrt())
}
