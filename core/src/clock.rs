//! Monotonic packet timestamps
//!
//! A [`Timestamp`] is the offset of an observation from a clock origin. Relay
//! ingress stamps packets from a [`RelayClock`]; tests and the reference
//! protocol build timestamps directly from seconds.

use serde::{Deserialize, Serialize};
use std::ops::{Add, Sub};
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Timestamp(Duration);

impl Timestamp {
    pub const ZERO: Timestamp = Timestamp(Duration::ZERO);

    pub fn from_duration(offset: Duration) -> Self {
        Self(offset)
    }

    /// Negative, NaN or infinite input gives zero; values too large for a
    /// `Duration` saturate.
    pub fn from_secs_f64(secs: f64) -> Self {
        if secs.is_finite() && secs > 0.0 {
            Self(Duration::try_from_secs_f64(secs).unwrap_or(Duration::MAX))
        } else {
            Self::ZERO
        }
    }

    pub fn as_duration(&self) -> Duration {
        self.0
    }

    pub fn as_secs_f64(&self) -> f64 {
        self.0.as_secs_f64()
    }

    /// Non-negative gap since `earlier`; zero if the clock went backwards.
    pub fn saturating_since(&self, earlier: Timestamp) -> Duration {
        self.0.saturating_sub(earlier.0)
    }
}

impl Add<Duration> for Timestamp {
    type Output = Timestamp;

    fn add(self, rhs: Duration) -> Timestamp {
        Timestamp(self.0 + rhs)
    }
}

impl Sub for Timestamp {
    type Output = Duration;

    fn sub(self, rhs: Timestamp) -> Duration {
        self.saturating_since(rhs)
    }
}

/// Clock shared by the relay ingress paths
#[derive(Debug, Clone, Copy)]
pub struct RelayClock {
    origin: Instant,
}

impl RelayClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }

    pub fn now(&self) -> Timestamp {
        Timestamp(Instant::now().saturating_duration_since(self.origin))
    }
}

impl Default for RelayClock {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gap_never_negative() {
        let early = Timestamp::from_secs_f64(1.0);
        let late = Timestamp::from_secs_f64(1.5);
        assert_eq!(late - early, Duration::from_millis(500));
        assert_eq!(early - late, Duration::ZERO);
    }

    #[test]
    fn test_invalid_seconds_saturate() {
        assert_eq!(Timestamp::from_secs_f64(-3.0), Timestamp::ZERO);
        assert_eq!(Timestamp::from_secs_f64(f64::NAN), Timestamp::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_relay_clock_follows_tokio_time() {
        let clock = RelayClock::new();
        tokio::time::advance(Duration::from_millis(250)).await;
        assert_eq!(clock.now().as_duration(), Duration::from_millis(250));
    }
}
