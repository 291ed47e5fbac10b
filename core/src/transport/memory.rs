//! In-process sink backed by an unbounded tokio channel

use super::{PacketSink, TransportError};
use crate::relay::OutputChannel;
use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::time::Instant;

/// A packet as it left the relay
#[derive(Debug, Clone, PartialEq)]
pub struct OutboundPacket {
    pub channel: OutputChannel,
    pub payload: Vec<u8>,
    pub published_at: Instant,
}

#[derive(Debug, Clone)]
pub struct MemorySink {
    tx: mpsc::UnboundedSender<OutboundPacket>,
}

impl MemorySink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<OutboundPacket>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

#[async_trait]
impl PacketSink for MemorySink {
    async fn publish(&self, channel: OutputChannel, payload: Vec<u8>) -> Result<(), TransportError> {
        self.tx
            .send(OutboundPacket {
                channel,
                payload,
                published_at: Instant::now(),
            })
            .map_err(|_| TransportError::Closed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_publish_is_observable() {
        let (sink, mut rx) = MemorySink::new();
        sink.publish(OutputChannel::ToSecure, b"frame".to_vec())
            .await
            .unwrap();

        let packet = rx.recv().await.unwrap();
        assert_eq!(packet.channel, OutputChannel::ToSecure);
        assert_eq!(packet.payload, b"frame".to_vec());
    }

    #[tokio::test]
    async fn test_publish_after_receiver_dropped_fails() {
        let (sink, rx) = MemorySink::new();
        drop(rx);
        let result = sink.publish(OutputChannel::ToInsecure, vec![1]).await;
        assert!(matches!(result, Err(TransportError::Closed)));
    }
}
