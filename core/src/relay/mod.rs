//! Timing relay
//!
//! Packets are cross-connected between the insecure and secure sides. Each
//! flow gets its own detector, mitigation session and worker task, so the
//! delay applied to one flow never holds up another.

pub mod channel;
pub mod pipeline;
pub mod service;
pub mod session;
pub mod worker;

use crate::config::ConfigError;
use crate::transport::TransportError;
use thiserror::Error;

pub use channel::{FlowKey, Origin, OutputChannel, PacketEvent};
pub use pipeline::{FlowPipeline, ForwardDecision};
pub use service::{FlowStats, RelayCommand, RelayHandle, RelayService, RelayStats};
pub use session::{DelayKind, MitigationSession, MitigationState, SessionStep, SessionTransition};
pub use worker::{cancellable_delay, DelayOutcome};

#[derive(Debug, Error)]
pub enum RelayError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),
    #[error("Relay is not running")]
    Closed,
    #[error("Flow worker terminated abnormally: {0}")]
    Worker(String),
}
