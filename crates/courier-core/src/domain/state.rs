//! Envelope state machine.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Which structure an envelope currently lives in.
///
/// State transitions:
/// - Delayed -> Ready (migration when due)
/// - Ready -> Reserved (pop)
/// - Reserved -> Deleted (delete, terminal)
/// - Reserved -> Ready | Delayed (release with attempts left, or reservation expiry)
/// - Reserved -> DeadLettered (release with attempts exhausted, terminal)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnvelopeState {
    Delayed,
    Ready,
    Reserved,
    Deleted,
    DeadLettered,
}

impl EnvelopeState {
    /// Where a freshly pushed envelope starts.
    pub fn initial(delay: Duration) -> Self {
        if delay.is_zero() {
            EnvelopeState::Ready
        } else {
            EnvelopeState::Delayed
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, EnvelopeState::Deleted | EnvelopeState::DeadLettered)
    }

    pub fn can_transition_to(self, next: EnvelopeState) -> bool {
        use EnvelopeState::*;
        matches!(
            (self, next),
            (Delayed, Ready)
                | (Ready, Reserved)
                | (Reserved, Deleted)
                | (Reserved, Ready)
                | (Reserved, Delayed)
                | (Reserved, DeadLettered)
        )
    }
}

impl fmt::Display for EnvelopeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            EnvelopeState::Delayed => "delayed",
            EnvelopeState::Ready => "ready",
            EnvelopeState::Reserved => "reserved",
            EnvelopeState::Deleted => "deleted",
            EnvelopeState::DeadLettered => "dead_lettered",
        })
    }
}
