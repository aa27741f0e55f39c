use serde::{Deserialize, Serialize};
use std::fmt;

/// Controller state machine states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BotState {
    /// Flat, waiting for a signal at the next candle boundary
    Idle,
    /// Entry pipeline is placing orders
    PendingEntry,
    /// Position is live and protected on the venue
    Open,
    /// Manual close in progress
    Closing,
    /// Unprotected exposure was detected; needs an operator
    ErrorPaused,
}

impl BotState {
    pub fn as_str(&self) -> &'static str {
        match self {
            BotState::Idle => "IDLE",
            BotState::PendingEntry => "PENDING_ENTRY",
            BotState::Open => "OPEN",
            BotState::Closing => "CLOSING",
            BotState::ErrorPaused => "ERROR_PAUSED",
        }
    }

    /// Check if this state can transition to another state
    pub fn can_transition_to(&self, target: BotState) -> bool {
        use BotState::*;

        match (self, target) {
            // From Idle
            (Idle, PendingEntry) => true, // Signal accepted
            (Idle, Closing) => true,      // Manual kill while flat

            // From PendingEntry
            (PendingEntry, Idle) => true,        // Entry order rejected
            (PendingEntry, Open) => true,        // All orders placed and recorded
            (PendingEntry, ErrorPaused) => true, // Stop could not be placed

            // From Open
            (Open, Idle) => true,        // Reconciled as closed
            (Open, Closing) => true,     // Manual kill
            (Open, ErrorPaused) => true, // Trailing stop replacement failed

            // From Closing
            (Closing, Idle) => true,        // Close order sent
            (Closing, Open) => true,        // Close failed, position still live
            (Closing, ErrorPaused) => true, // Close failed while halted

            // From ErrorPaused (operator acknowledgement or kill)
            (ErrorPaused, Idle) => true,
            (ErrorPaused, Open) => true,
            (ErrorPaused, Closing) => true,

            // All other transitions are invalid
            _ => false,
        }
    }

    /// Get valid next states from current state
    pub fn valid_transitions(&self) -> Vec<BotState> {
        use BotState::*;

        match self {
            Idle => vec![PendingEntry, Closing],
            PendingEntry => vec![Idle, Open, ErrorPaused],
            Open => vec![Idle, Closing, ErrorPaused],
            Closing => vec![Idle, Open, ErrorPaused],
            ErrorPaused => vec![Idle, Open, Closing],
        }
    }

    /// Does this state allow the entry pipeline to run?
    pub fn accepts_entries(&self) -> bool {
        matches!(self, BotState::Idle)
    }
}

impl fmt::Display for BotState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl TryFrom<&str> for BotState {
    type Error = String;

    fn try_from(s: &str) -> Result<Self, Self::Error> {
        match s.to_uppercase().as_str() {
            "IDLE" => Ok(BotState::Idle),
            "PENDING_ENTRY" => Ok(BotState::PendingEntry),
            "OPEN" => Ok(BotState::Open),
            "CLOSING" => Ok(BotState::Closing),
            "ERROR_PAUSED" => Ok(BotState::ErrorPaused),
            _ => Err(format!("Unknown state: {}", s)),
        }
    }
}
