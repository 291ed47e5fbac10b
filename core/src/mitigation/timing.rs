// Timing Perturbation: Random delays applied before forwarding
//
// Covert timing channels encode bits in inter-packet gaps, so a delay drawn
// independently per packet scrambles the gaps the receiver measures.

use crate::config::{BackgroundDelayConfig, ConfigError, MitigationConfig};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Distribution a delay is drawn from (seconds)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum DelayDistribution {
    /// Uniform over `[min, max]`, both ends inclusive
    Uniform { min: f64, max: f64 },
    /// Exponential with the given mean; a zero mean always yields zero
    Exponential { mean: f64 },
}

/// Draw one delay from the distribution
pub fn compute_delay<R: Rng + ?Sized>(distribution: &DelayDistribution, rng: &mut R) -> Duration {
    let secs = match *distribution {
        DelayDistribution::Uniform { min, max } => {
            if min >= max {
                min
            } else {
                rng.gen_range(min..=max)
            }
        }
        DelayDistribution::Exponential { mean } => {
            if mean <= 0.0 {
                0.0
            } else {
                // Inverse transform; 1 - u lies in (0, 1] so ln() is finite.
                let uniform = rng.gen::<f64>();
                -mean * (1.0 - uniform).ln()
            }
        }
    };
    secs_to_duration(secs)
}

/// Negative or NaN input becomes zero, anything too large saturates.
fn secs_to_duration(secs: f64) -> Duration {
    if secs.is_nan() || secs <= 0.0 {
        return Duration::ZERO;
    }
    Duration::try_from_secs_f64(secs).unwrap_or(Duration::MAX)
}

/// Session delay generator, bounded by `[min_delay, max_delay]`
#[derive(Debug, Clone)]
pub struct Mitigator {
    distribution: DelayDistribution,
}

impl Mitigator {
    /// Fails if the bounds are inverted or not finite
    pub fn new(config: &MitigationConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            distribution: DelayDistribution::Uniform {
                min: config.min_delay,
                max: config.max_delay,
            },
        })
    }

    pub fn mitigate(&self) -> Duration {
        self.mitigate_with(&mut rand::thread_rng())
    }

    pub fn mitigate_with<R: Rng + ?Sized>(&self, rng: &mut R) -> Duration {
        compute_delay(&self.distribution, rng)
    }

    pub fn bounds(&self) -> (Duration, Duration) {
        match self.distribution {
            DelayDistribution::Uniform { min, max } => {
                (secs_to_duration(min), secs_to_duration(max))
            }
            DelayDistribution::Exponential { .. } => (Duration::ZERO, Duration::MAX),
        }
    }
}

/// Ordinary processing jitter applied when no session is active
#[derive(Debug, Clone)]
pub struct BackgroundDelay {
    distribution: DelayDistribution,
}

impl BackgroundDelay {
    pub fn new(config: &BackgroundDelayConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            distribution: DelayDistribution::Exponential {
                mean: config.mean_value,
            },
        })
    }

    pub fn sample_with<R: Rng + ?Sized>(&self, rng: &mut R) -> Duration {
        compute_delay(&self.distribution, rng)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn mitigation(min_delay: f64, max_delay: f64) -> MitigationConfig {
        MitigationConfig {
            min_delay,
            max_delay,
            session_length: 10,
        }
    }

    #[test]
    fn test_mitigator_rejects_inverted_bounds() {
        assert!(Mitigator::new(&mitigation(1.2, 0.9)).is_err());
    }

    #[test]
    fn test_mitigator_rejects_bounds_beyond_duration() {
        assert!(Mitigator::new(&mitigation(1e20, 1e20)).is_err());
        assert!(Mitigator::new(&mitigation(0.9, 1e20)).is_err());
    }

    #[test]
    fn test_oversized_distribution_saturates() {
        let mut rng = StdRng::seed_from_u64(1);
        let uniform = DelayDistribution::Uniform { min: 1e20, max: 1e20 };
        assert_eq!(compute_delay(&uniform, &mut rng), Duration::MAX);
        let exponential = DelayDistribution::Exponential { mean: 1e300 };
        assert!(compute_delay(&exponential, &mut rng) > Duration::from_secs(1));
    }

    #[test]
    fn test_mitigator_default_bounds() {
        let mitigator = Mitigator::new(&MitigationConfig::default()).unwrap();
        for _ in 0..200 {
            let delay = mitigator.mitigate();
            assert!(delay >= Duration::from_millis(900));
            assert!(delay <= Duration::from_millis(1200));
        }
    }

    #[test]
    fn test_mitigator_equal_bounds() {
        let mitigator = Mitigator::new(&mitigation(0.5, 0.5)).unwrap();
        assert_eq!(mitigator.mitigate(), Duration::from_millis(500));
    }

    #[test]
    fn test_background_zero_mean_is_zero() {
        let background = BackgroundDelay::new(&BackgroundDelayConfig { mean_value: 0.0 }).unwrap();
        let mut rng = StdRng::seed_from_u64(7);
        assert_eq!(background.sample_with(&mut rng), Duration::ZERO);
    }

    #[test]
    fn test_background_mean_converges() {
        let background = BackgroundDelay::new(&BackgroundDelayConfig { mean_value: 0.01 }).unwrap();
        let mut rng = StdRng::seed_from_u64(42);
        let n = 20_000;
        let total: f64 = (0..n)
            .map(|_| background.sample_with(&mut rng).as_secs_f64())
            .sum();
        let mean = total / n as f64;
        assert!((mean - 0.01).abs() < 0.001, "sample mean {mean}");
    }

    #[test]
    fn test_exponential_bias_toward_small_delays() {
        let distribution = DelayDistribution::Exponential { mean: 0.1 };
        let mut rng = StdRng::seed_from_u64(3);
        let mut small_count = 0;
        let mut large_count = 0;
        for _ in 0..1000 {
            let delay = compute_delay(&distribution, &mut rng).as_secs_f64();
            if delay < 0.1 {
                small_count += 1;
            } else if delay > 0.2 {
                large_count += 1;
            }
        }
        assert!(small_count > large_count);
    }

    #[test]
    fn test_distribution_serialization() {
        let uniform = DelayDistribution::Uniform { min: 0.9, max: 1.2 };
        let json = serde_json::to_string(&uniform).unwrap();
        let back: DelayDistribution = serde_json::from_str(&json).unwrap();
        assert_eq!(uniform, back);
    }

    proptest! {
        #[test]
        fn prop_mitigate_stays_in_bounds(
            min in 0.0f64..5.0,
            width in 0.0f64..5.0,
            seed in any::<u64>(),
        ) {
            let max = min + width;
            let mitigator = Mitigator::new(&mitigation(min, max)).unwrap();
            let (low, high) = mitigator.bounds();
            let mut rng = StdRng::seed_from_u64(seed);
            for _ in 0..50 {
                let delay = mitigator.mitigate_with(&mut rng);
                prop_assert!(delay >= low && delay <= high);
            }
        }
    }
}
