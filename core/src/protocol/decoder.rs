//! Receiver side: averages gap groups back into bits
//!
//! Each message is decoded on its own. Once a bitstream completes the
//! decoder forgets the last arrival too, so the idle gap before the next
//! message is never averaged into a bit and that message's first group is
//! again one gap short. A receiver that kept its state across messages would
//! instead fold the inter-message gap into a full-length first group.

use super::{check_delay, ProtocolError};
use crate::clock::Timestamp;
use tracing::{debug, trace};

#[derive(Debug, Clone)]
pub struct TimingDecoder {
    ipd_threshold: f64,
    bit_repeat_len: usize,
    bitstream_len: usize,
    last_arrival: Option<Timestamp>,
    pending: Vec<f64>,
    first_group_done: bool,
    decoded: String,
}

impl TimingDecoder {
    /// A group whose mean gap is below `sender_bit_delay + given_delay_threshold`
    /// decodes to `0`, otherwise `1`.
    pub fn new(
        sender_bit_delay: f64,
        given_delay_threshold: f64,
        bit_repeat_len: usize,
        bitstream_len: usize,
    ) -> Result<Self, ProtocolError> {
        check_delay("sender_bit_delay", sender_bit_delay)?;
        check_delay("given_delay_threshold", given_delay_threshold)?;
        if bit_repeat_len == 0 || bitstream_len == 0 {
            return Err(ProtocolError::InvalidParameter(
                "bit_repeat_len and bitstream_len must be at least 1".into(),
            ));
        }
        Ok(Self {
            ipd_threshold: sender_bit_delay + given_delay_threshold,
            bit_repeat_len,
            bitstream_len,
            last_arrival: None,
            pending: Vec::with_capacity(bit_repeat_len),
            first_group_done: false,
            decoded: String::with_capacity(bitstream_len),
        })
    }

    pub fn ipd_threshold(&self) -> f64 {
        self.ipd_threshold
    }

    /// Bits decoded so far for the stream in progress
    pub fn partial(&self) -> &str {
        &self.decoded
    }

    // The first gap needs two packets, so the opening group is one short.
    fn group_len(&self) -> usize {
        if self.first_group_done {
            self.bit_repeat_len
        } else {
            self.bit_repeat_len.saturating_sub(1).max(1)
        }
    }

    /// Record one arrival; returns the bitstream once `bitstream_len` bits
    /// have been decoded, then starts over as if nothing had been received.
    pub fn on_arrival(&mut self, arrived_at: Timestamp) -> Option<String> {
        let previous = self.last_arrival.replace(arrived_at);
        let ipd = arrived_at.saturating_since(previous?).as_secs_f64();
        trace!(ipd, "Gap observed");
        self.pending.push(ipd);

        if self.pending.len() < self.group_len() {
            return None;
        }

        let mean = self.pending.iter().sum::<f64>() / self.pending.len() as f64;
        let bit = if mean < self.ipd_threshold { '0' } else { '1' };
        debug!(%bit, mean, "Decoded bit");
        self.pending.clear();
        self.first_group_done = true;
        self.decoded.push(bit);

        if self.decoded.len() < self.bitstream_len {
            return None;
        }
        let stream = std::mem::take(&mut self.decoded);
        self.reset();
        Some(stream)
    }

    pub fn reset(&mut self) {
        self.last_arrival = None;
        self.pending.clear();
        self.first_group_done = false;
        self.decoded.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::TimingEncoder;

    fn decode_all(decoder: &mut TimingDecoder, trace: &[Timestamp]) -> Vec<String> {
        trace.iter().filter_map(|t| decoder.on_arrival(*t)).collect()
    }

    #[test]
    fn test_clean_trace_round_trips() {
        let encoder = TimingEncoder::new(0.3, 0.9, 5).unwrap();
        let mut decoder = TimingDecoder::new(0.3, 0.3, 5, 10).unwrap();
        let bits = "1011001110";
        let trace = encoder.arrival_trace(bits).unwrap();

        assert_eq!(decode_all(&mut decoder, &trace), vec![bits.to_string()]);
    }

    #[test]
    fn test_first_group_is_one_gap_short() {
        let mut decoder = TimingDecoder::new(0.3, 0.3, 3, 2).unwrap();
        // Three packets: two gaps complete the first bit
        assert_eq!(decoder.on_arrival(Timestamp::from_secs_f64(0.0)), None);
        assert_eq!(decoder.on_arrival(Timestamp::from_secs_f64(1.0)), None);
        assert_eq!(decoder.on_arrival(Timestamp::from_secs_f64(2.0)), None);
        assert_eq!(decoder.partial(), "1");
        // Later groups need three gaps
        assert_eq!(decoder.on_arrival(Timestamp::from_secs_f64(2.1)), None);
        assert_eq!(decoder.on_arrival(Timestamp::from_secs_f64(2.2)), None);
        assert_eq!(
            decoder.on_arrival(Timestamp::from_secs_f64(2.3)),
            Some("10".to_string())
        );
    }

    #[test]
    fn test_threshold_is_exclusive_for_zero() {
        // Mean exactly at the threshold decodes as 1
        let mut decoder = TimingDecoder::new(0.25, 0.25, 2, 1).unwrap();
        decoder.on_arrival(Timestamp::ZERO);
        let stream = decoder.on_arrival(Timestamp::from_secs_f64(0.5));
        assert_eq!(stream.as_deref(), Some("1"));
    }

    #[test]
    fn test_decoder_resets_between_streams() {
        let encoder = TimingEncoder::new(0.3, 0.9, 5).unwrap();
        let mut decoder = TimingDecoder::new(0.3, 0.3, 5, 4).unwrap();
        let first = encoder.arrival_trace("0110").unwrap();
        let offset = first.last().copied().unwrap_or_default() + std::time::Duration::from_secs(10);
        let second: Vec<Timestamp> = encoder
            .arrival_trace("1001")
            .unwrap()
            .into_iter()
            .map(|t| offset + t.as_duration())
            .collect();

        assert_eq!(decode_all(&mut decoder, &first), vec!["0110".to_string()]);
        assert_eq!(decode_all(&mut decoder, &second), vec!["1001".to_string()]);
    }

    #[test]
    fn test_single_packet_groups() {
        let mut decoder = TimingDecoder::new(0.3, 0.3, 1, 2).unwrap();
        assert_eq!(decoder.on_arrival(Timestamp::ZERO), None);
        assert_eq!(decoder.on_arrival(Timestamp::from_secs_f64(0.3)), None);
        assert_eq!(
            decoder.on_arrival(Timestamp::from_secs_f64(1.2)),
            Some("01".to_string())
        );
    }
}
