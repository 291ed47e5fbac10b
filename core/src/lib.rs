// ctguard core: covert timing channel detection and mitigation
//
// An inline relay watches the gaps between packets of each flow, scores
// them for the signature of a timing covert channel, and when one is found
// scrambles the gaps of the packets that follow with random delay.

pub mod clock;
pub mod config;
pub mod detection;
pub mod frame;
pub mod mitigation;
pub mod protocol;
pub mod relay;
pub mod simulation;
pub mod transport;

pub use clock::{RelayClock, Timestamp};
pub use config::{
    BackgroundDelayConfig, ConfigError, DetectorConfig, GuardConfig, MitigationConfig, RelayConfig,
    RetryPolicy,
};
pub use detection::{
    CovertChannelDetector, DetectionStats, DetectionStatsSnapshot, DetectionVerdict,
    FeatureTracker, SubScores,
};
pub use frame::{FrameError, LinkFrame};
pub use mitigation::{BackgroundDelay, Mitigator};
pub use protocol::{
    bitstream_from_message, ProtocolError, TimingDecoder, TimingEncoder, TrialMetrics,
    TrialSummary,
};
pub use relay::{
    FlowKey, FlowPipeline, ForwardDecision, MitigationState, Origin, OutputChannel, PacketEvent,
    RelayError, RelayHandle, RelayService, RelayStats,
};
pub use simulation::{apply_jitter, simulate_relay, SimulationReport};
pub use transport::{
    MemorySink, OutboundPacket, PacketSink, TransportError, UdpEndpoints, UdpRelayPorts,
};
