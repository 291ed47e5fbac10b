// Transport module: publish boundary and UDP socket plumbing
//
// The relay core only ever sees a `PacketSink`; how packets reach the next
// hop (in-process channel, UDP sockets) is decided by the caller.

pub mod memory;
pub mod udp;

use crate::relay::OutputChannel;
use async_trait::async_trait;
use std::net::SocketAddr;
use thiserror::Error;

pub use memory::{MemorySink, OutboundPacket};
pub use udp::{bind_with_retry, UdpEndpoints, UdpRelayPorts, UdpSink};

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Failed to bind {addr} after {attempts} attempt(s): {source}")]
    Bind {
        addr: SocketAddr,
        attempts: u32,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to publish on {channel}: {reason}")]
    Publish {
        channel: OutputChannel,
        reason: String,
    },
    #[error("Socket error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Sink closed")]
    Closed,
}

/// Downstream side of the relay
#[async_trait]
pub trait PacketSink: Send + Sync {
    /// Publish a payload, unchanged, on the given output channel
    async fn publish(&self, channel: OutputChannel, payload: Vec<u8>) -> Result<(), TransportError>;
}
