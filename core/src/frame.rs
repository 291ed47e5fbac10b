//! Ethernet II header inspection for relay logs

use pnet::packet::ethernet::{EtherTypes, EthernetPacket};
use pnet::packet::Packet;
use pnet::util::MacAddr;
use std::fmt;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FrameError {
    #[error("Frame too short: {len} bytes, need at least 14")]
    Truncated { len: usize },
}

/// Parsed link-layer header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkFrame {
    pub destination: MacAddr,
    pub source: MacAddr,
    pub ethertype: u16,
    pub payload_len: usize,
}

impl LinkFrame {
    pub fn parse(bytes: &[u8]) -> Result<Self, FrameError> {
        let eth = EthernetPacket::new(bytes).ok_or(FrameError::Truncated { len: bytes.len() })?;
        Ok(Self {
            destination: eth.get_destination(),
            source: eth.get_source(),
            ethertype: eth.get_ethertype().0,
            payload_len: eth.payload().len(),
        })
    }

    pub fn is_ipv4(&self) -> bool {
        self.ethertype == EtherTypes::Ipv4.0
    }
}

impl fmt::Display for LinkFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} -> {} type=0x{:04x} len={}",
            self.source, self.destination, self.ethertype, self.payload_len
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ipv4_frame(payload: &[u8]) -> Vec<u8> {
        let mut frame = vec![0xff; 6];
        frame.extend_from_slice(&[0x02, 0x42, 0xac, 0x11, 0x00, 0x02]);
        frame.extend_from_slice(&[0x08, 0x00]);
        frame.extend_from_slice(payload);
        frame
    }

    #[test]
    fn test_parse_ethernet_header() {
        let frame = LinkFrame::parse(&ipv4_frame(&[0u8; 20])).unwrap();
        assert_eq!(frame.destination, MacAddr::broadcast());
        assert_eq!(frame.source.to_string(), "02:42:ac:11:00:02");
        assert!(frame.is_ipv4());
        assert_eq!(frame.payload_len, 20);
    }

    #[test]
    fn test_header_only_frame() {
        let frame = LinkFrame::parse(&ipv4_frame(&[])).unwrap();
        assert_eq!(frame.payload_len, 0);
    }

    #[test]
    fn test_truncated_frame() {
        assert_eq!(
            LinkFrame::parse(&[0u8; 13]),
            Err(FrameError::Truncated { len: 13 })
        );
        assert!(LinkFrame::parse(&[]).is_err());
    }

    #[test]
    fn test_display() {
        let frame = LinkFrame::parse(&ipv4_frame(&[1, 2, 3])).unwrap();
        assert_eq!(
            frame.to_string(),
            "02:42:ac:11:00:02 -> ff:ff:ff:ff:ff:ff type=0x0800 len=3"
        );
    }
}
