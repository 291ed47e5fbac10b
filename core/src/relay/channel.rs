//! Relay channels, packet events and flow keys

use crate::clock::Timestamp;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Side of the relay a packet arrived from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Origin {
    /// Arrived from the insecure network (`inpktinsec`)
    Insecure,
    /// Arrived from the secure network (`inpktsec`)
    Secure,
}

/// Side of the relay a packet is published to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OutputChannel {
    /// Toward the secure network (`outpktsec`)
    ToSecure,
    /// Toward the insecure network (`outpktinsec`)
    ToInsecure,
}

impl Origin {
    /// Cross-connect: traffic always leaves on the opposite side
    pub fn forward_channel(&self) -> OutputChannel {
        match self {
            Origin::Insecure => OutputChannel::ToSecure,
            Origin::Secure => OutputChannel::ToInsecure,
        }
    }

    pub fn topic(&self) -> &'static str {
        match self {
            Origin::Insecure => "inpktinsec",
            Origin::Secure => "inpktsec",
        }
    }
}

impl OutputChannel {
    pub fn topic(&self) -> &'static str {
        match self {
            OutputChannel::ToSecure => "outpktsec",
            OutputChannel::ToInsecure => "outpktinsec",
        }
    }
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.topic())
    }
}

impl fmt::Display for OutputChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.topic())
    }
}

/// An observed packet arrival
#[derive(Debug, Clone, PartialEq)]
pub struct PacketEvent {
    pub origin: Origin,
    /// Flow source within the origin side, e.g. the peer socket address
    pub source: String,
    pub payload: Vec<u8>,
    pub arrived_at: Timestamp,
}

impl PacketEvent {
    pub fn new(
        origin: Origin,
        source: impl Into<String>,
        payload: Vec<u8>,
        arrived_at: Timestamp,
    ) -> Self {
        Self {
            origin,
            source: source.into(),
            payload,
            arrived_at,
        }
    }

    pub fn flow_key(&self) -> FlowKey {
        FlowKey::new(self.origin, self.source.clone())
    }
}

const OVERFLOW_SOURCE: &str = "*";

/// Identifies one directional flow; timing state is never shared across keys
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FlowKey {
    pub origin: Origin,
    pub source: String,
}

impl FlowKey {
    pub fn new(origin: Origin, source: impl Into<String>) -> Self {
        Self {
            origin,
            source: source.into(),
        }
    }

    /// Shared flow for sources beyond the tracked-flow cap
    pub fn overflow(origin: Origin) -> Self {
        Self::new(origin, OVERFLOW_SOURCE)
    }

    pub fn is_overflow(&self) -> bool {
        self.source == OVERFLOW_SOURCE
    }
}

impl fmt::Display for FlowKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.origin, self.source)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cross_connect() {
        assert_eq!(Origin::Insecure.forward_channel(), OutputChannel::ToSecure);
        assert_eq!(Origin::Secure.forward_channel(), OutputChannel::ToInsecure);
    }

    #[test]
    fn test_topics() {
        assert_eq!(Origin::Secure.to_string(), "inpktsec");
        assert_eq!(Origin::Secure.forward_channel().to_string(), "outpktinsec");
        assert_eq!(Origin::Insecure.forward_channel().to_string(), "outpktsec");
    }

    #[test]
    fn test_flow_key_display() {
        let key = FlowKey::new(Origin::Insecure, "10.0.0.2:8002");
        assert_eq!(key.to_string(), "inpktinsec/10.0.0.2:8002");
        assert!(!key.is_overflow());
        assert!(FlowKey::overflow(Origin::Secure).is_overflow());
    }
}
