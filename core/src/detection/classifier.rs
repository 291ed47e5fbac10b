//! Covert timing channel classifier
//!
//! Scores the current IPD window with four independent checks and combines
//! them into one confidence value:
//!
//! | check              | weight | fires when                                              |
//! |--------------------|--------|---------------------------------------------------------|
//! | bimodal            | 0.5    | two comparable, well-separated dominant delay values     |
//! | regularity         | 0.3    | coefficient of variation below 0.7                       |
//! | baseline deviation | 0.2    | window mean more than 2 sigma from the frozen baseline   |
//! | pattern match      | 0.4    | >60% of delays sit near the two dominant values          |
//!
//! The sum is clamped to 1.0 and the verdict is positive when it strictly
//! exceeds the configured threshold.

use super::stats::{DetectionStats, DetectionStatsSnapshot};
use super::window::{BaselineStats, FeatureTracker};
use crate::clock::Timestamp;
use crate::config::{ConfigError, DetectorConfig};
use serde::{Deserialize, Serialize};
use statrs::statistics::Statistics;
use std::collections::BTreeMap;
use std::sync::Arc;

pub const BIMODAL_WEIGHT: f64 = 0.5;
pub const REGULARITY_WEIGHT: f64 = 0.3;
pub const BASELINE_WEIGHT: f64 = 0.2;
pub const PATTERN_WEIGHT: f64 = 0.4;

const MIN_CLUSTER_COUNT_RATIO: f64 = 0.5;
const MIN_CLUSTER_VALUE_RATIO: f64 = 2.0;
const MIN_CLUSTER_SPREAD: f64 = 0.2;
const MAX_REGULAR_CV: f64 = 0.7;
const MEAN_FLOOR: f64 = 0.001;
const MAX_BASELINE_Z: f64 = 2.0;
const PATTERN_LONG_FLOOR: f64 = 0.5;
const PATTERN_SHORT_FLOOR: f64 = 0.1;
const PATTERN_MIN_FRACTION: f64 = 0.6;
const TRACE_SCORE_FLOOR: f64 = 0.3;
/// (required spread, tolerance) for the coarse and fine pattern checks
const PATTERN_CHECKS: [(f64, f64); 2] = [(0.2, 0.2), (0.1, 0.1)];

/// Individual check results
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct SubScores {
    pub bimodal: f64,
    pub regularity: f64,
    pub baseline_deviation: f64,
    pub pattern_match: f64,
}

impl SubScores {
    /// Unclamped sum
    pub fn sum(&self) -> f64 {
        self.bimodal + self.regularity + self.baseline_deviation + self.pattern_match
    }
}

/// Outcome of one classification
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct DetectionVerdict {
    pub detected: bool,
    /// Combined score in [0, 1]
    pub score: f64,
    pub scores: SubScores,
}

impl DetectionVerdict {
    /// Fail-closed result while the window is not yet full
    pub fn insufficient() -> Self {
        Self::default()
    }
}

/// A rounded delay value and how often it occurs in the window
#[derive(Debug, Clone, Copy, PartialEq)]
struct DelayCluster {
    value: f64,
    count: usize,
}

/// Delays rounded to millisecond precision, counted per distinct value
struct DelayHistogram {
    buckets: BTreeMap<i64, usize>,
}

impl DelayHistogram {
    fn from_delays(delays: &[f64]) -> Self {
        let mut buckets = BTreeMap::new();
        for delay in delays {
            *buckets.entry((delay * 1000.0).round() as i64).or_insert(0) += 1;
        }
        Self { buckets }
    }

    /// The two most frequent values, most frequent first. Ties go to the
    /// smaller delay, so with three or more equally frequent values the
    /// shortest two are compared.
    fn dominant_pair(&self) -> Option<(DelayCluster, DelayCluster)> {
        if self.buckets.len() < 2 {
            return None;
        }
        let mut clusters: Vec<DelayCluster> = self
            .buckets
            .iter()
            .map(|(millis, count)| DelayCluster {
                value: *millis as f64 / 1000.0,
                count: *count,
            })
            .collect();
        // BTreeMap order is ascending by value and the sort is stable.
        clusters.sort_by(|a, b| b.count.cmp(&a.count));
        Some((clusters[0], clusters[1]))
    }
}

fn ordered_values(pair: &(DelayCluster, DelayCluster)) -> (f64, f64) {
    let (a, b) = (pair.0.value, pair.1.value);
    (a.min(b), a.max(b))
}

fn bimodal_score(histogram: &DelayHistogram) -> f64 {
    let Some(pair) = histogram.dominant_pair() else {
        return 0.0;
    };
    let count_ratio = pair.1.count as f64 / pair.0.count as f64;
    if count_ratio <= MIN_CLUSTER_COUNT_RATIO {
        return 0.0;
    }
    let (short, long) = ordered_values(&pair);
    let value_ratio = long / short.max(MEAN_FLOOR);
    if value_ratio > MIN_CLUSTER_VALUE_RATIO && long - short > MIN_CLUSTER_SPREAD {
        BIMODAL_WEIGHT
    } else {
        0.0
    }
}

fn regularity_score(delays: &[f64]) -> f64 {
    let mean = delays.iter().mean();
    let std_dev = delays.iter().population_std_dev();
    let cv = std_dev / mean.max(MEAN_FLOOR);
    if cv < MAX_REGULAR_CV {
        REGULARITY_WEIGHT
    } else {
        0.0
    }
}

fn baseline_score(delays: &[f64], baseline: Option<BaselineStats>) -> f64 {
    let Some(baseline) = baseline else {
        return 0.0;
    };
    if baseline.std_dev <= 0.0 {
        return 0.0;
    }
    let z = (delays.iter().mean() - baseline.mean).abs() / baseline.std_dev;
    if z > MAX_BASELINE_Z {
        BASELINE_WEIGHT
    } else {
        0.0
    }
}

// Coarse and fine checks are independent; either one awards the weight.
fn pattern_score(delays: &[f64], histogram: &DelayHistogram) -> f64 {
    let Some(pair) = histogram.dominant_pair() else {
        return 0.0;
    };
    let (short, long) = ordered_values(&pair);
    if long <= PATTERN_LONG_FLOOR || short <= PATTERN_SHORT_FLOOR {
        return 0.0;
    }

    let matched = PATTERN_CHECKS.iter().any(|&(spread, tolerance)| {
        if long - short <= spread {
            return false;
        }
        let near = delays
            .iter()
            .filter(|d| (*d - short).abs() <= tolerance || (*d - long).abs() <= tolerance)
            .count();
        near as f64 / delays.len() as f64 > PATTERN_MIN_FRACTION
    });

    if matched {
        PATTERN_WEIGHT
    } else {
        0.0
    }
}

/// Per-flow detector: owns the feature tracker and the detection counters
pub struct CovertChannelDetector {
    tracker: FeatureTracker,
    threshold: f64,
    stats: Arc<DetectionStats>,
}

impl CovertChannelDetector {
    pub fn new(config: &DetectorConfig) -> Result<Self, ConfigError> {
        Ok(Self {
            tracker: FeatureTracker::new(config)?,
            threshold: config.detection_threshold,
            stats: Arc::new(DetectionStats::new()),
        })
    }

    /// Record a packet arrival
    pub fn add_packet(&mut self, timestamp: Timestamp) -> Option<f64> {
        self.stats.record_packet();
        self.tracker.add_packet(timestamp)
    }

    /// Score the current window
    pub fn detect(&self) -> DetectionVerdict {
        let Some(delays) = self.tracker.window() else {
            return DetectionVerdict::insufficient();
        };

        let histogram = DelayHistogram::from_delays(&delays);
        let scores = SubScores {
            bimodal: bimodal_score(&histogram),
            regularity: regularity_score(&delays),
            baseline_deviation: baseline_score(&delays, self.tracker.baseline()),
            pattern_match: pattern_score(&delays, &histogram),
        };
        let score = scores.sum().min(1.0);
        let detected = score > self.threshold;

        if score > TRACE_SCORE_FLOOR {
            tracing::debug!(
                bimodal = scores.bimodal,
                regularity = scores.regularity,
                baseline = scores.baseline_deviation,
                pattern = scores.pattern_match,
                score,
                detected,
                "Detection analysis"
            );
        }

        if detected {
            self.stats.record_detection();
        }

        DetectionVerdict {
            detected,
            score,
            scores,
        }
    }

    pub fn tracker(&self) -> &FeatureTracker {
        &self.tracker
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    /// Shared handle to the counters, for observers on other threads
    pub fn stats_handle(&self) -> Arc<DetectionStats> {
        Arc::clone(&self.stats)
    }

    pub fn stats(&self) -> DetectionStatsSnapshot {
        self.stats.snapshot()
    }
}
