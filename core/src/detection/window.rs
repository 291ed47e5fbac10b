//! Sliding-window feature tracker
//!
//! Keeps the most recent arrival timestamps and inter-packet delays (IPDs) in
//! fixed-capacity rings, plus a baseline of low-delay samples that freezes once
//! it reaches capacity. Memory use is bounded by the configuration regardless
//! of how long the stream runs.

use crate::clock::Timestamp;
use crate::config::{ConfigError, DetectorConfig};
use statrs::statistics::Statistics;
use std::collections::VecDeque;

/// Mean and population standard deviation of the frozen baseline
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BaselineStats {
    pub mean: f64,
    pub std_dev: f64,
    pub samples: usize,
}

pub struct FeatureTracker {
    window_size: usize,
    baseline_capacity: usize,
    baseline_cutoff: f64,
    timestamps: VecDeque<Timestamp>,
    timestamp_capacity: usize,
    ipds: VecDeque<f64>,
    ipd_capacity: usize,
    baseline: Vec<f64>,
    baseline_established: bool,
}

impl FeatureTracker {
    pub fn new(config: &DetectorConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            window_size: config.window_size,
            baseline_capacity: config.baseline_capacity,
            baseline_cutoff: config.baseline_cutoff_secs,
            timestamps: VecDeque::with_capacity(config.timestamp_capacity()),
            timestamp_capacity: config.timestamp_capacity(),
            ipds: VecDeque::with_capacity(config.history_capacity()),
            ipd_capacity: config.history_capacity(),
            baseline: Vec::with_capacity(config.baseline_capacity),
            baseline_established: false,
        })
    }

    /// Record an arrival. Returns the IPD it produced, if any.
    pub fn add_packet(&mut self, timestamp: Timestamp) -> Option<f64> {
        let previous = self.timestamps.back().copied();

        if self.timestamps.len() == self.timestamp_capacity {
            self.timestamps.pop_front();
        }
        self.timestamps.push_back(timestamp);

        let ipd = timestamp.saturating_since(previous?).as_secs_f64();

        if self.ipds.len() == self.ipd_capacity {
            self.ipds.pop_front();
        }
        self.ipds.push_back(ipd);

        if !self.baseline_established && ipd < self.baseline_cutoff {
            self.baseline.push(ipd);
            if self.baseline.len() >= self.baseline_capacity {
                self.baseline_established = true;
            }
        }

        Some(ipd)
    }

    /// The most recent `window_size` IPDs, oldest first, or `None` while
    /// there is not yet enough evidence.
    pub fn window(&self) -> Option<Vec<f64>> {
        if self.ipds.len() < self.window_size {
            return None;
        }
        let skip = self.ipds.len() - self.window_size;
        Some(self.ipds.iter().skip(skip).copied().collect())
    }

    pub fn window_size(&self) -> usize {
        self.window_size
    }

    pub fn ipd_count(&self) -> usize {
        self.ipds.len()
    }

    pub fn timestamp_count(&self) -> usize {
        self.timestamps.len()
    }

    pub fn is_baseline_established(&self) -> bool {
        self.baseline_established
    }

    pub fn baseline_len(&self) -> usize {
        self.baseline.len()
    }

    /// Baseline statistics, available only once the baseline has frozen
    pub fn baseline(&self) -> Option<BaselineStats> {
        if !self.baseline_established || self.baseline.is_empty() {
            return None;
        }
        Some(BaselineStats {
            mean: self.baseline.iter().mean(),
            std_dev: self.baseline.iter().population_std_dev(),
            samples: self.baseline.len(),
        })
    }
}
