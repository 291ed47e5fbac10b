//! Covert timing channel detection
//!
//! A [`FeatureTracker`] turns packet arrivals into a bounded window of
//! inter-packet delays; a [`CovertChannelDetector`] scores that window.

pub mod classifier;
pub mod stats;
pub mod window;

pub use classifier::{
    CovertChannelDetector, DetectionVerdict, SubScores, BASELINE_WEIGHT, BIMODAL_WEIGHT,
    PATTERN_WEIGHT, REGULARITY_WEIGHT,
};
pub use stats::{DetectionStats, DetectionStatsSnapshot};
pub use window::{BaselineStats, FeatureTracker};
