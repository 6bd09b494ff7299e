//! Latency samples and the per-endpoint sample buffers

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::Serialize;

/// One round-trip measurement
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Sample {
    pub timestamp: DateTime<Utc>,
    pub latency_ms: f64,
}

impl Sample {
    pub fn new(latency_ms: f64, timestamp: DateTime<Utc>) -> Self {
        Self {
            timestamp,
            latency_ms,
        }
    }

    /// Sample stamped with the current wall-clock time
    pub fn now(latency_ms: f64) -> Self {
        Self::new(latency_ms, Utc::now())
    }
}

/// Bounded, time-ascending window of the most recent samples.
///
/// Pushing past capacity evicts the oldest sample first.
#[derive(Debug, Clone)]
pub struct HistoryWindow {
    samples: VecDeque<Sample>,
    capacity: usize,
}

impl HistoryWindow {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            samples: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Append a sample, returning the evicted one if the window was full
    pub fn push(&mut self, sample: Sample) -> Option<Sample> {
        let evicted = if self.samples.len() >= self.capacity {
            self.samples.pop_front()
        } else {
            None
        };
        self.samples.push_back(sample);
        evicted
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn latest(&self) -> Option<&Sample> {
        self.samples.back()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Sample> {
        self.samples.iter()
    }

    /// Samples as one ordered slice
    pub fn contiguous(&mut self) -> &[Sample] {
        self.samples.make_contiguous()
    }
}

/// Samples retained for model fitting.
///
/// Never trimmed by the history window; only by its own optional cap.
#[derive(Debug, Clone)]
pub struct TrainingCorpus {
    samples: VecDeque<Sample>,
    /// 0 = unbounded
    cap: usize,
}

impl TrainingCorpus {
    pub fn new(cap: usize) -> Self {
        Self {
            samples: VecDeque::new(),
            cap,
        }
    }

    pub fn push(&mut self, sample: Sample) {
        if self.cap > 0 && self.samples.len() >= self.cap {
            self.samples.pop_front();
        }
        self.samples.push_back(sample);
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn contiguous(&mut self) -> &[Sample] {
        self.samples.make_contiguous()
    }
}
