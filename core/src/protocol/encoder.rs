//! Sender side: bitstream construction and packet scheduling

use super::{check_delay, ProtocolError};
use crate::clock::Timestamp;
use std::time::Duration;

/// A message made only of `0`/`1` is used as-is; anything else is expanded
/// to the 8-bit binary code of each character.
pub fn bitstream_from_message(message: &str) -> String {
    if message.chars().all(|c| c == '0' || c == '1') {
        return message.to_string();
    }
    message
        .chars()
        .map(|c| format!("{:08b}", c as u32))
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimingEncoder {
    zero_bit_delay: Duration,
    one_bit_delay: Duration,
    bit_repeat_len: usize,
}

impl TimingEncoder {
    pub fn new(zero_bit_delay: f64, one_bit_delay: f64, bit_repeat_len: usize) -> Result<Self, ProtocolError> {
        check_delay("zero_bit_delay", zero_bit_delay)?;
        check_delay("one_bit_delay", one_bit_delay)?;
        if bit_repeat_len == 0 {
            return Err(ProtocolError::InvalidParameter(
                "bit_repeat_len must be at least 1".into(),
            ));
        }
        Ok(Self {
            zero_bit_delay: Duration::from_secs_f64(zero_bit_delay),
            one_bit_delay: Duration::from_secs_f64(one_bit_delay),
            bit_repeat_len,
        })
    }

    pub fn bit_repeat_len(&self) -> usize {
        self.bit_repeat_len
    }

    fn delay_for(&self, bit: char) -> Result<Duration, ProtocolError> {
        match bit {
            '0' => Ok(self.zero_bit_delay),
            '1' => Ok(self.one_bit_delay),
            other => Err(ProtocolError::InvalidBit(other)),
        }
    }

    /// Delay to wait after each packet is sent, one entry per packet
    pub fn schedule(&self, bits: &str) -> Result<Vec<Duration>, ProtocolError> {
        if bits.is_empty() {
            return Err(ProtocolError::EmptyBitstream);
        }
        let mut delays = Vec::with_capacity(bits.len() * self.bit_repeat_len);
        for bit in bits.chars() {
            let delay = self.delay_for(bit)?;
            delays.extend(std::iter::repeat(delay).take(self.bit_repeat_len));
        }
        Ok(delays)
    }

    /// Ideal send times, first packet at zero, with no network jitter
    pub fn arrival_trace(&self, bits: &str) -> Result<Vec<Timestamp>, ProtocolError> {
        let delays = self.schedule(bits)?;
        let mut now = Timestamp::ZERO;
        let mut trace = Vec::with_capacity(delays.len());
        for delay in delays {
            trace.push(now);
            now = now + delay;
        }
        Ok(trace)
    }

    /// Duration of one transmission, including the trailing gap
    pub fn transmission_time(&self, bits: &str) -> Result<Duration, ProtocolError> {
        Ok(self.schedule(bits)?.into_iter().sum())
    }
}
