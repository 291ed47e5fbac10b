//! Channel-capacity measurement for repeated send/echo trials

use serde::{Deserialize, Serialize};
use statrs::statistics::Statistics;
use std::time::Duration;

/// Result of one transmission
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrialMetrics {
    pub bits_sent: usize,
    pub bits_received: usize,
    /// Mismatches over the common prefix of sent and received streams
    pub errors: usize,
    pub bit_error_rate: f64,
    /// Correctly received bits per second
    pub capacity_bps: f64,
    pub elapsed: Duration,
}

impl TrialMetrics {
    pub fn measure(sent: &str, received: &str, elapsed: Duration) -> Self {
        let errors = sent
            .chars()
            .zip(received.chars())
            .filter(|(a, b)| a != b)
            .count();
        let bits_sent = sent.chars().count();
        let bits_received = received.chars().count();
        let bit_error_rate = if bits_sent == 0 {
            0.0
        } else {
            errors as f64 / bits_sent as f64
        };
        let secs = elapsed.as_secs_f64();
        let capacity_bps = if secs > 0.0 {
            bits_received.saturating_sub(errors) as f64 / secs
        } else {
            0.0
        };
        Self {
            bits_sent,
            bits_received,
            errors,
            bit_error_rate,
            capacity_bps,
            elapsed,
        }
    }
}

/// Aggregate over repeated trials
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrialSummary {
    pub trials: Vec<TrialMetrics>,
}

impl TrialSummary {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, trial: TrialMetrics) {
        self.trials.push(trial);
    }

    pub fn len(&self) -> usize {
        self.trials.len()
    }

    pub fn is_empty(&self) -> bool {
        self.trials.is_empty()
    }

    fn mean_of(&self, field: impl Fn(&TrialMetrics) -> f64) -> f64 {
        if self.trials.is_empty() {
            return 0.0;
        }
        self.trials.iter().map(field).mean()
    }

    pub fn mean_bit_error_rate(&self) -> f64 {
        self.mean_of(|t| t.bit_error_rate)
    }

    pub fn mean_capacity_bps(&self) -> f64 {
        self.mean_of(|t| t.capacity_bps)
    }

    pub fn mean_elapsed_secs(&self) -> f64 {
        self.mean_of(|t| t.elapsed.as_secs_f64())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_perfect_transmission() {
        let m = TrialMetrics::measure("10110", "10110", Duration::from_secs(5));
        assert_eq!(m.errors, 0);
        assert_eq!(m.bit_error_rate, 0.0);
        assert!((m.capacity_bps - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_errors_counted_over_common_prefix() {
        // Two flips in the first four bits; the missing tail is not an error
        let m = TrialMetrics::measure("101100", "0111", Duration::from_secs(2));
        assert_eq!(m.errors, 2);
        assert!((m.bit_error_rate - 2.0 / 6.0).abs() < 1e-12);
        assert!((m.capacity_bps - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_degenerate_inputs() {
        let m = TrialMetrics::measure("", "", Duration::ZERO);
        assert_eq!(m.bit_error_rate, 0.0);
        assert_eq!(m.capacity_bps, 0.0);
    }

    #[test]
    fn test_summary_means() {
        let mut summary = TrialSummary::new();
        assert_eq!(summary.mean_bit_error_rate(), 0.0);

        summary.record(TrialMetrics::measure("1111", "1111", Duration::from_secs(4)));
        summary.record(TrialMetrics::measure("1111", "0000", Duration::from_secs(2)));
        assert_eq!(summary.len(), 2);
        assert!((summary.mean_bit_error_rate() - 0.5).abs() < 1e-12);
        assert!((summary.mean_capacity_bps() - 0.5).abs() < 1e-12);
        assert!((summary.mean_elapsed_secs() - 3.0).abs() < 1e-12);
    }
}
