//! Detection counters
//!
//! Written only by the flow worker that owns the classifier; read from any
//! thread through [`DetectionStats::snapshot`].

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::SystemTime;

#[derive(Debug, Default)]
pub struct DetectionStats {
    total_packets: AtomicU64,
    detections: AtomicU64,
    last_detection: Mutex<Option<SystemTime>>,
}

/// Point-in-time copy of the counters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionStatsSnapshot {
    /// `detections / max(1, total_packets)`
    pub detection_rate: f64,
    pub total_packets: u64,
    pub detections: u64,
    pub last_detection: Option<SystemTime>,
}

impl DetectionStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_packet(&self) {
        self.total_packets.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_detection(&self) {
        self.detections.fetch_add(1, Ordering::Relaxed);
        *self.last_detection.lock() = Some(SystemTime::now());
    }

    pub fn snapshot(&self) -> DetectionStatsSnapshot {
        let total_packets = self.total_packets.load(Ordering::Relaxed);
        let detections = self.detections.load(Ordering::Relaxed);
        DetectionStatsSnapshot {
            detection_rate: detections as f64 / total_packets.max(1) as f64,
            total_packets,
            detections,
            last_detection: *self.last_detection.lock(),
        }
    }
}

impl DetectionStatsSnapshot {
    /// Combine snapshots from several flows
    pub fn merge<'a>(snapshots: impl IntoIterator<Item = &'a DetectionStatsSnapshot>) -> Self {
        let mut total_packets = 0;
        let mut detections = 0;
        let mut last_detection: Option<SystemTime> = None;
        for snapshot in snapshots {
            total_packets += snapshot.total_packets;
            detections += snapshot.detections;
            last_detection = match (last_detection, snapshot.last_detection) {
                (Some(a), Some(b)) => Some(a.max(b)),
                (a, b) => a.or(b),
            };
        }
        Self {
            detection_rate: detections as f64 / total_packets.max(1) as f64,
            total_packets,
            detections,
            last_detection,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_rate_uses_floor() {
        let stats = DetectionStats::new();
        let snapshot = stats.snapshot();
        assert_eq!(snapshot.detection_rate, 0.0);
        assert_eq!(snapshot.last_detection, None);
    }

    #[test]
    fn test_rate_is_exact_ratio() {
        let stats = DetectionStats::new();
        for _ in 0..8 {
            stats.record_packet();
        }
        stats.record_detection();
        stats.record_detection();

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.total_packets, 8);
        assert_eq!(snapshot.detections, 2);
        assert_eq!(snapshot.detection_rate, 2.0 / 8.0);
        assert!(snapshot.last_detection.is_some());
    }

    #[test]
    fn test_merge_sums_flows() {
        let a = DetectionStatsSnapshot {
            detection_rate: 0.5,
            total_packets: 4,
            detections: 2,
            last_detection: None,
        };
        let b = DetectionStatsSnapshot {
            detection_rate: 0.0,
            total_packets: 6,
            detections: 0,
            last_detection: Some(SystemTime::UNIX_EPOCH),
        };
        let merged = DetectionStatsSnapshot::merge([&a, &b]);
        assert_eq!(merged.total_packets, 10);
        assert_eq!(merged.detections, 2);
        assert_eq!(merged.detection_rate, 0.2);
        assert_eq!(merged.last_detection, Some(SystemTime::UNIX_EPOCH));
    }
}
