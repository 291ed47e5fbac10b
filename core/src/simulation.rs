// Offline relay simulation
//
// Runs an arrival trace through a flow pipeline without sleeping, using the
// same FIFO rule a single flow worker follows: a packet cannot leave before it
// arrives, nor before the packet ahead of it has left.

use crate::clock::Timestamp;
use crate::relay::{DelayKind, FlowPipeline, ForwardDecision, SessionTransition};
use rand::Rng;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct SimulationReport {
    pub departures: Vec<Timestamp>,
    pub decisions: Vec<ForwardDecision>,
}

impl SimulationReport {
    /// Packets whose own verdict was positive
    pub fn detections(&self) -> usize {
        self.decisions.iter().filter(|d| d.verdict.detected).count()
    }

    pub fn sessions(&self) -> usize {
        self.decisions
            .iter()
            .filter(|d| d.transition == Some(SessionTransition::Armed))
            .count()
    }

    pub fn mitigated_packets(&self) -> usize {
        self.decisions
            .iter()
            .filter(|d| d.kind == DelayKind::Mitigation)
            .count()
    }

    /// Extra time the relay added to the whole trace
    pub fn added_latency(&self, arrivals: &[Timestamp]) -> Duration {
        match (arrivals.last(), self.departures.last()) {
            (Some(arrived), Some(departed)) => departed.saturating_since(*arrived),
            _ => Duration::ZERO,
        }
    }
}

/// Feed `arrivals` through `pipeline` and compute when each packet leaves.
pub fn simulate_relay(pipeline: &mut FlowPipeline, arrivals: &[Timestamp]) -> SimulationReport {
    let mut departures = Vec::with_capacity(arrivals.len());
    let mut decisions = Vec::with_capacity(arrivals.len());
    let mut previous_departure = Timestamp::ZERO;

    for &arrived_at in arrivals {
        let decision = pipeline.on_packet(arrived_at);
        let ready = arrived_at.max(previous_departure);
        let departure = ready + decision.delay;
        previous_departure = departure;
        departures.push(departure);
        decisions.push(decision);
    }

    SimulationReport {
        departures,
        decisions,
    }
}

/// Add independent uniform `[0, max_jitter]` network delay to each send time.
/// Order is preserved: a packet never overtakes the one sent before it.
pub fn apply_jitter<R: Rng + ?Sized>(
    trace: &[Timestamp],
    max_jitter: Duration,
    rng: &mut R,
) -> Vec<Timestamp> {
    let mut previous = Timestamp::ZERO;
    trace
        .iter()
        .map(|&sent| {
            let jitter = if max_jitter.is_zero() {
                Duration::ZERO
            } else {
                rng.gen_range(Duration::ZERO..=max_jitter)
            };
            let arrived = (sent + jitter).max(previous);
            previous = arrived;
            arrived
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GuardConfig;
    use crate::protocol::{bitstream_from_message, TimingDecoder, TimingEncoder};
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn pipeline() -> FlowPipeline {
        FlowPipeline::with_seed(&GuardConfig::default(), 7).unwrap()
    }

    #[test]
    fn test_departures_never_reorder() {
        let arrivals: Vec<Timestamp> = (0..60)
            .map(|i| Timestamp::from_secs_f64(i as f64 * 0.3))
            .collect();
        let report = simulate_relay(&mut pipeline(), &arrivals);

        assert_eq!(report.departures.len(), arrivals.len());
        for (arrival, departure) in arrivals.iter().zip(&report.departures) {
            assert!(departure >= arrival);
        }
        assert!(report.departures.windows(2).all(|w| w[1] >= w[0]));
    }

    #[test]
    fn test_quiet_trace_passes_nearly_untouched() {
        let arrivals: Vec<Timestamp> = (0..50)
            .map(|i| Timestamp::from_secs_f64(i as f64 * 0.3))
            .collect();
        let report = simulate_relay(&mut pipeline(), &arrivals);

        assert_eq!(report.sessions(), 0);
        assert_eq!(report.mitigated_packets(), 0);
        assert!(report.added_latency(&arrivals) < Duration::from_millis(10));
    }

    #[test]
    fn test_covert_trace_is_mitigated() {
        let encoder = TimingEncoder::new(0.3, 0.9, 5).unwrap();
        let bits = bitstream_from_message("Hi");
        let arrivals = encoder.arrival_trace(&bits).unwrap();
        let report = simulate_relay(&mut pipeline(), &arrivals);

        assert!(report.sessions() >= 1);
        assert!(report.mitigated_packets() >= 11);
        assert!(report.added_latency(&arrivals) >= Duration::from_secs_f64(0.9));

        // Decoding the relayed trace must not be error-free any more.
        let mut decoder = TimingDecoder::new(0.3, 0.3, 5, bits.len()).unwrap();
        let decoded: Vec<String> = report
            .departures
            .iter()
            .filter_map(|t| decoder.on_arrival(*t))
            .collect();
        let received = decoded.first().map(String::as_str).unwrap_or("");
        assert_ne!(received, bits);
    }

    #[test]
    fn test_jitter_is_bounded_and_ordered() {
        let trace: Vec<Timestamp> = (0..100)
            .map(|i| Timestamp::from_secs_f64(i as f64 * 0.01))
            .collect();
        let mut rng = StdRng::seed_from_u64(3);
        let jittered = apply_jitter(&trace, Duration::from_millis(50), &mut rng);

        assert!(jittered.windows(2).all(|w| w[1] >= w[0]));
        for (sent, arrived) in trace.iter().zip(&jittered) {
            assert!(arrived >= sent);
            assert!(*arrived <= *sent + Duration::from_millis(50));
        }
        assert_eq!(apply_jitter(&trace, Duration::ZERO, &mut rng), trace);
    }
}
