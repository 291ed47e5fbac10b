// Reference timing protocol: bits carried in inter-packet gaps
//
// Each bit is sent as `bit_repeat_len` packets spaced by a short gap for `0`
// and a long gap for `1`. The receiver averages each group of gaps against a
// threshold. Used to generate realistic traces and to measure how much
// capacity survives the relay.

pub mod decoder;
pub mod encoder;
pub mod metrics;

use std::time::Duration;
use thiserror::Error;

pub use decoder::TimingDecoder;
pub use encoder::{bitstream_from_message, TimingEncoder};
pub use metrics::{TrialMetrics, TrialSummary};

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ProtocolError {
    #[error("Invalid bit {0:?}, expected '0' or '1'")]
    InvalidBit(char),
    #[error("Invalid protocol parameter: {0}")]
    InvalidParameter(String),
    #[error("Empty bitstream")]
    EmptyBitstream,
}

fn check_delay(name: &str, secs: f64) -> Result<(), ProtocolError> {
    if secs >= 0.0 && Duration::try_from_secs_f64(secs).is_ok() {
        Ok(())
    } else {
        Err(ProtocolError::InvalidParameter(format!(
            "{} must be a non-negative number of seconds, got {}",
            name, secs
        )))
    }
}
