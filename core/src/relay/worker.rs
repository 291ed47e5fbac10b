//! Flow worker: owns one flow's pipeline and processes its packets in order

use super::channel::{FlowKey, PacketEvent};
use super::pipeline::FlowPipeline;
use super::session::SessionTransition;
use super::RelayError;
use crate::frame::LinkFrame;
use crate::transport::PacketSink;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DelayOutcome {
    Completed,
    /// Shutdown was signalled before the delay elapsed
    Interrupted,
}

/// Wait for `delay`, or until `shutdown` turns true.
pub async fn cancellable_delay(delay: Duration, shutdown: &mut watch::Receiver<bool>) -> DelayOutcome {
    if *shutdown.borrow() {
        return DelayOutcome::Interrupted;
    }
    if delay.is_zero() {
        return DelayOutcome::Completed;
    }
    tokio::select! {
        _ = tokio::time::sleep(delay) => DelayOutcome::Completed,
        _ = shutdown.changed() => DelayOutcome::Interrupted,
    }
}

pub(crate) struct FlowWorker {
    key: FlowKey,
    pipeline: FlowPipeline,
    sink: Arc<dyn PacketSink>,
    events: mpsc::Receiver<PacketEvent>,
    shutdown: watch::Receiver<bool>,
    max_consecutive_failures: u32,
    consecutive_failures: u32,
}

impl FlowWorker {
    pub(crate) fn new(
        key: FlowKey,
        pipeline: FlowPipeline,
        sink: Arc<dyn PacketSink>,
        events: mpsc::Receiver<PacketEvent>,
        shutdown: watch::Receiver<bool>,
        max_consecutive_failures: u32,
    ) -> Self {
        Self {
            key,
            pipeline,
            sink,
            events,
            shutdown,
            max_consecutive_failures,
            consecutive_failures: 0,
        }
    }

    pub(crate) async fn run(mut self) -> Result<(), RelayError> {
        debug!(flow = %self.key, "Flow worker started");
        loop {
            if *self.shutdown.borrow() {
                break;
            }
            let event = tokio::select! {
                event = self.events.recv() => match event {
                    Some(event) => event,
                    None => break,
                },
                _ = self.shutdown.changed() => break,
            };

            if self.process(event).await? == DelayOutcome::Interrupted {
                break;
            }
        }
        self.drain().await?;
        debug!(flow = %self.key, "Flow worker stopped");
        Ok(())
    }

    async fn process(&mut self, event: PacketEvent) -> Result<DelayOutcome, RelayError> {
        let decision = self.pipeline.on_packet(event.arrived_at);

        match LinkFrame::parse(&event.payload) {
            Ok(frame) => debug!(flow = %self.key, %frame, "Frame"),
            Err(e) => debug!(flow = %self.key, len = event.payload.len(), "Opaque payload: {}", e),
        }

        match decision.transition {
            Some(SessionTransition::Armed) => info!(
                flow = %self.key,
                score = decision.verdict.score,
                bimodal = decision.verdict.scores.bimodal,
                regularity = decision.verdict.scores.regularity,
                baseline = decision.verdict.scores.baseline_deviation,
                pattern = decision.verdict.scores.pattern_match,
                "Covert timing channel detected, mitigation armed"
            ),
            Some(SessionTransition::Expired) => {
                info!(flow = %self.key, "Mitigation session ended")
            }
            None => {}
        }
        debug!(
            flow = %self.key,
            ipd = ?decision.ipd,
            score = decision.verdict.score,
            kind = ?decision.kind,
            delay = ?decision.delay,
            "Forward decision"
        );

        let outcome = cancellable_delay(decision.delay, &mut self.shutdown).await;
        if outcome == DelayOutcome::Interrupted {
            debug!(flow = %self.key, "Delay interrupted by shutdown, forwarding now");
        }
        self.forward(event).await?;
        Ok(outcome)
    }

    /// Forward whatever is still queued, without delay
    async fn drain(&mut self) -> Result<(), RelayError> {
        self.events.close();
        while let Ok(event) = self.events.try_recv() {
            self.pipeline.on_packet(event.arrived_at);
            self.forward(event).await?;
        }
        Ok(())
    }

    async fn forward(&mut self, event: PacketEvent) -> Result<(), RelayError> {
        let channel = event.origin.forward_channel();
        match self.sink.publish(channel, event.payload).await {
            Ok(()) => {
                self.consecutive_failures = 0;
                Ok(())
            }
            Err(e) => {
                self.consecutive_failures += 1;
                warn!(
                    flow = %self.key,
                    %channel,
                    failures = self.consecutive_failures,
                    "Publish failed: {}",
                    e
                );
                if self.consecutive_failures > self.max_consecutive_failures {
                    Err(RelayError::Transport(e))
                } else {
                    Ok(())
                }
            }
        }
    }
}
