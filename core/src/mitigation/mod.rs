// Mitigation: Delay injection that destroys timing-encoded information
//
// A mitigation session perturbs each forwarded packet by a uniformly random
// delay; outside a session packets only see ordinary exponential jitter.

pub mod timing;

pub use timing::{compute_delay, BackgroundDelay, DelayDistribution, Mitigator};
