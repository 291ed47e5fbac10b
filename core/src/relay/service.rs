//! Relay service: dispatcher task plus a cloneable handle
//!
//! The dispatcher owns the flow table and spawns one [`FlowWorker`] per
//! flow key. Packets reach workers over bounded channels and are never
//! awaited on: a packet for a flow whose queue is full is dropped and
//! counted. Nothing timing related is shared between flows except read-only
//! stats handles. Shutdown travels on a watch channel beside the command
//! queue so it reaches workers even while commands are backed up.

use super::channel::{FlowKey, Origin, PacketEvent};
use super::pipeline::FlowPipeline;
use super::worker::FlowWorker;
use super::RelayError;
use crate::clock::RelayClock;
use crate::config::GuardConfig;
use crate::detection::{DetectionStats, DetectionStatsSnapshot};
use crate::transport::PacketSink;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info, warn};

const COMMAND_QUEUE_DEPTH: usize = 1024;

/// Commands accepted by the dispatcher task
#[derive(Debug)]
pub enum RelayCommand {
    Packet(PacketEvent),
    GetStats {
        reply: oneshot::Sender<RelayStats>,
    },
}

/// Per-flow detection counters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowStats {
    pub flow: FlowKey,
    pub detection: DetectionStatsSnapshot,
    /// Packets dropped because the flow's queue was full
    pub dropped_packets: u64,
}

/// Relay-wide observability snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelayStats {
    pub flows: Vec<FlowStats>,
    pub total: DetectionStatsSnapshot,
    /// Packets routed to an overflow flow because the flow table was full
    pub overflow_packets: u64,
    pub dropped_packets: u64,
}

/// Handle to communicate with the running relay
#[derive(Clone)]
pub struct RelayHandle {
    command_tx: mpsc::Sender<RelayCommand>,
    shutdown_tx: Arc<watch::Sender<bool>>,
    clock: RelayClock,
}

impl RelayHandle {
    /// Stamp a payload with the current time and submit it
    pub async fn submit(
        &self,
        origin: Origin,
        source: impl Into<String>,
        payload: Vec<u8>,
    ) -> Result<(), RelayError> {
        let event = PacketEvent::new(origin, source, payload, self.clock.now());
        self.submit_event(event).await
    }

    /// Submit an already-stamped event
    pub async fn submit_event(&self, event: PacketEvent) -> Result<(), RelayError> {
        self.command_tx
            .send(RelayCommand::Packet(event))
            .await
            .map_err(|_| RelayError::Closed)
    }

    pub async fn stats(&self) -> Result<RelayStats, RelayError> {
        let (reply, rx) = oneshot::channel();
        self.command_tx
            .send(RelayCommand::GetStats { reply })
            .await
            .map_err(|_| RelayError::Closed)?;
        rx.await.map_err(|_| RelayError::Closed)
    }

    /// Ask the relay to stop; in-flight delays are cut short and queued
    /// packets are forwarded immediately.
    pub async fn shutdown(&self) -> Result<(), RelayError> {
        if self.command_tx.is_closed() {
            return Err(RelayError::Closed);
        }
        self.shutdown_tx.send_replace(true);
        Ok(())
    }

    /// Resolves once the relay has stopped accepting commands
    pub async fn closed(&self) {
        self.command_tx.closed().await
    }

    pub fn clock(&self) -> RelayClock {
        self.clock
    }
}

struct FlowEntry {
    events: mpsc::Sender<PacketEvent>,
    stats: Arc<DetectionStats>,
    dropped: u64,
}

pub struct RelayService {
    config: GuardConfig,
    sink: Arc<dyn PacketSink>,
    commands: mpsc::Receiver<RelayCommand>,
    flows: HashMap<FlowKey, FlowEntry>,
    tracked_flows: usize,
    overflow_packets: u64,
    dropped_packets: u64,
    workers: JoinSet<(FlowKey, Result<(), RelayError>)>,
    shutdown_tx: Arc<watch::Sender<bool>>,
    shutdown_rx: watch::Receiver<bool>,
}

impl RelayService {
    /// Validate the configuration and spawn the dispatcher task.
    pub fn start(
        config: GuardConfig,
        sink: Arc<dyn PacketSink>,
    ) -> Result<(RelayHandle, JoinHandle<Result<(), RelayError>>), RelayError> {
        config.validate()?;

        let (command_tx, commands) = mpsc::channel(COMMAND_QUEUE_DEPTH);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let shutdown_tx = Arc::new(shutdown_tx);
        let handle = RelayHandle {
            command_tx,
            shutdown_tx: Arc::clone(&shutdown_tx),
            clock: RelayClock::new(),
        };

        let service = Self {
            config,
            sink,
            commands,
            flows: HashMap::new(),
            tracked_flows: 0,
            overflow_packets: 0,
            dropped_packets: 0,
            workers: JoinSet::new(),
            shutdown_tx,
            shutdown_rx,
        };

        info!(
            window_size = service.config.detector.window_size,
            threshold = service.config.detector.detection_threshold,
            min_delay = service.config.mitigation.min_delay,
            max_delay = service.config.mitigation.max_delay,
            "Relay starting"
        );
        let join = tokio::spawn(service.run());
        Ok((handle, join))
    }

    async fn run(mut self) -> Result<(), RelayError> {
        let result = loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(RelayCommand::Packet(event)) => {
                        if let Err(e) = self.dispatch(event) {
                            break Err(e);
                        }
                    }
                    Some(RelayCommand::GetStats { reply }) => {
                        let _ = reply.send(self.stats());
                    }
                    None => break Ok(()),
                },
                _ = self.shutdown_rx.changed() => break Ok(()),
                Some(joined) = self.workers.join_next() => match joined {
                    Ok((key, Ok(()))) => {
                        debug!(flow = %key, "Flow worker exited");
                        self.remove_flow(&key);
                    }
                    Ok((key, Err(e))) => {
                        error!(flow = %key, "Flow worker failed: {}", e);
                        break Err(e);
                    }
                    Err(e) => break Err(RelayError::Worker(e.to_string())),
                },
            }
        };

        info!("Relay shutting down");
        self.shutdown_tx.send_replace(true);
        self.commands.close();
        self.flows.clear();
        while let Some(joined) = self.workers.join_next().await {
            match joined {
                Ok((key, Err(e))) => warn!(flow = %key, "Flow worker failed during shutdown: {}", e),
                Err(e) => warn!("Flow worker aborted: {}", e),
                Ok(_) => {}
            }
        }
        info!("Relay stopped");
        result
    }

    fn route(&mut self, event: &PacketEvent) -> FlowKey {
        let key = event.flow_key();
        if self.flows.contains_key(&key) || self.tracked_flows < self.config.relay.max_flows {
            return key;
        }
        self.overflow_packets += 1;
        if self.overflow_packets == 1 {
            warn!(
                max_flows = self.config.relay.max_flows,
                "Flow table full, sharing an overflow flow per channel"
            );
        }
        FlowKey::overflow(event.origin)
    }

    fn dispatch(&mut self, event: PacketEvent) -> Result<(), RelayError> {
        let key = self.route(&event);
        if !self.flows.contains_key(&key) {
            self.spawn_flow(key.clone())?;
        }

        let event = match self.enqueue(&key, event) {
            Ok(()) => return Ok(()),
            Err(event) => event,
        };
        // Worker has gone away; give the flow a fresh one.
        self.remove_flow(&key);
        self.spawn_flow(key.clone())?;
        if self.enqueue(&key, event).is_err() {
            warn!(flow = %key, "Dropping packet, flow worker unavailable");
        }
        Ok(())
    }

    /// Hand the packet to the flow's worker without waiting. A full queue
    /// drops the packet; a closed one hands it back.
    fn enqueue(&mut self, key: &FlowKey, event: PacketEvent) -> Result<(), PacketEvent> {
        let Some(entry) = self.flows.get_mut(key) else {
            return Err(event);
        };
        match entry.events.try_send(event) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => {
                entry.dropped += 1;
                self.dropped_packets += 1;
                if entry.dropped == 1 {
                    warn!(
                        flow = %key,
                        depth = self.config.relay.flow_queue_depth,
                        "Flow queue full, dropping packets"
                    );
                } else {
                    debug!(flow = %key, dropped = entry.dropped, "Flow queue full, packet dropped");
                }
                Ok(())
            }
            Err(TrySendError::Closed(event)) => Err(event),
        }
    }

    fn spawn_flow(&mut self, key: FlowKey) -> Result<(), RelayError> {
        let pipeline = FlowPipeline::new(&self.config)?;
        let stats = pipeline.stats_handle();
        let (events_tx, events_rx) = mpsc::channel(self.config.relay.flow_queue_depth);

        let worker = FlowWorker::new(
            key.clone(),
            pipeline,
            Arc::clone(&self.sink),
            events_rx,
            self.shutdown_tx.subscribe(),
            self.config.relay.max_consecutive_send_failures,
        );
        let worker_key = key.clone();
        self.workers
            .spawn(async move { (worker_key, worker.run().await) });

        if !key.is_overflow() {
            self.tracked_flows += 1;
        }
        debug!(flow = %key, "Flow worker spawned");
        self.flows.insert(
            key,
            FlowEntry {
                events: events_tx,
                stats,
                dropped: 0,
            },
        );
        Ok(())
    }

    fn remove_flow(&mut self, key: &FlowKey) {
        if self.flows.remove(key).is_some() && !key.is_overflow() {
            self.tracked_flows = self.tracked_flows.saturating_sub(1);
        }
    }

    fn stats(&self) -> RelayStats {
        let mut flows: Vec<FlowStats> = self
            .flows
            .iter()
            .map(|(flow, entry)| FlowStats {
                flow: flow.clone(),
                detection: entry.stats.snapshot(),
                dropped_packets: entry.dropped,
            })
            .collect();
        flows.sort_by(|a, b| a.flow.to_string().cmp(&b.flow.to_string()));
        let total = DetectionStatsSnapshot::merge(flows.iter().map(|f| &f.detection));
        RelayStats {
            flows,
            total,
            overflow_packets: self.overflow_packets,
            dropped_packets: self.dropped_packets,
        }
    }
}
