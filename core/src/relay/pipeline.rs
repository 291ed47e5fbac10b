//! Per-flow relay pipeline
//!
//! One packet in, one forwarding decision out: record the arrival, classify
//! the window, advance the mitigation session and pick the delay to apply
//! before the packet is published. Owned by exactly one flow worker.

use super::session::{DelayKind, MitigationSession, MitigationState, SessionTransition};
use crate::clock::Timestamp;
use crate::config::{ConfigError, GuardConfig};
use crate::detection::{CovertChannelDetector, DetectionStats, DetectionStatsSnapshot, DetectionVerdict};
use crate::mitigation::{BackgroundDelay, Mitigator};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::sync::Arc;
use std::time::Duration;

/// What the relay does with one packet
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ForwardDecision {
    pub verdict: DetectionVerdict,
    pub kind: DelayKind,
    pub delay: Duration,
    pub transition: Option<SessionTransition>,
    /// IPD this arrival produced, in seconds
    pub ipd: Option<f64>,
}

pub struct FlowPipeline {
    detector: CovertChannelDetector,
    mitigator: Mitigator,
    background: BackgroundDelay,
    session: MitigationSession,
    rng: StdRng,
}

impl FlowPipeline {
    pub fn new(config: &GuardConfig) -> Result<Self, ConfigError> {
        Self::build(config, StdRng::from_entropy())
    }

    /// Deterministic delays, for simulation and tests
    pub fn with_seed(config: &GuardConfig, seed: u64) -> Result<Self, ConfigError> {
        Self::build(config, StdRng::seed_from_u64(seed))
    }

    fn build(config: &GuardConfig, rng: StdRng) -> Result<Self, ConfigError> {
        Ok(Self {
            detector: CovertChannelDetector::new(&config.detector)?,
            mitigator: Mitigator::new(&config.mitigation)?,
            background: BackgroundDelay::new(&config.background)?,
            session: MitigationSession::new(config.mitigation.session_length),
            rng,
        })
    }

    pub fn on_packet(&mut self, arrived_at: Timestamp) -> ForwardDecision {
        let ipd = self.detector.add_packet(arrived_at);
        let verdict = self.detector.detect();
        let step = self.session.on_verdict(verdict.detected);

        let delay = match step.kind {
            DelayKind::Background => self.background.sample_with(&mut self.rng),
            DelayKind::Mitigation => self.mitigator.mitigate_with(&mut self.rng),
        };

        ForwardDecision {
            verdict,
            kind: step.kind,
            delay,
            transition: step.transition,
            ipd,
        }
    }

    pub fn state(&self) -> MitigationState {
        self.session.state()
    }

    pub fn detector(&self) -> &CovertChannelDetector {
        &self.detector
    }

    pub fn stats_handle(&self) -> Arc<DetectionStats> {
        self.detector.stats_handle()
    }

    pub fn stats(&self) -> DetectionStatsSnapshot {
        self.detector.stats()
    }
}
