//! Mitigation session state machine
//!
//! `Idle` --positive verdict--> `Mitigating(session_length)`. While
//! mitigating, each packet consumes one slot and positive verdicts are
//! coalesced; the session never stacks or extends. When the counter reaches
//! zero the machine returns to `Idle` and the next positive verdict re-arms it.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MitigationState {
    Idle,
    Mitigating { remaining: u32 },
}

/// Which delay source applies to a packet
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DelayKind {
    /// Exponential processing jitter
    Background,
    /// Uniform mitigation delay
    Mitigation,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionTransition {
    Armed,
    Expired,
}

/// Result of feeding one verdict through the state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionStep {
    pub kind: DelayKind,
    pub transition: Option<SessionTransition>,
    /// A positive verdict arrived while a session was already active
    pub coalesced: bool,
}

#[derive(Debug, Clone)]
pub struct MitigationSession {
    state: MitigationState,
    session_length: u32,
}

impl MitigationSession {
    pub fn new(session_length: u32) -> Self {
        Self {
            state: MitigationState::Idle,
            session_length: session_length.max(1),
        }
    }

    pub fn state(&self) -> MitigationState {
        self.state
    }

    pub fn is_active(&self) -> bool {
        matches!(self.state, MitigationState::Mitigating { .. })
    }

    /// Advance on one packet's verdict.
    ///
    /// The triggering packet is perturbed without consuming a slot, so the
    /// `session_length` packets that follow it all carry a mitigation delay.
    pub fn on_verdict(&mut self, detected: bool) -> SessionStep {
        match self.state {
            MitigationState::Idle if detected => {
                self.state = MitigationState::Mitigating {
                    remaining: self.session_length,
                };
                SessionStep {
                    kind: DelayKind::Mitigation,
                    transition: Some(SessionTransition::Armed),
                    coalesced: false,
                }
            }
            MitigationState::Idle => SessionStep {
                kind: DelayKind::Background,
                transition: None,
                coalesced: false,
            },
            MitigationState::Mitigating { remaining } => {
                let remaining = remaining.saturating_sub(1);
                let transition = if remaining == 0 {
                    self.state = MitigationState::Idle;
                    Some(SessionTransition::Expired)
                } else {
                    self.state = MitigationState::Mitigating { remaining };
                    None
                };
                SessionStep {
                    kind: DelayKind::Mitigation,
                    transition,
                    coalesced: detected,
                }
            }
        }
    }
}
