//! Error types for Calypso commands and secure sessions

use validator_apdu_core::{Error, StatusWord};

use crate::transaction::{AccessLevel, Operation, SessionState, TransactionStatus};

/// Failure of one card or SAM command
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CommandError {
    /// Transport or framing failure
    #[error(transparent)]
    Apdu(#[from] Error),

    /// The card or SAM answered with an error status word
    #[error("{command} failed with status {status} ({})", .status.description())]
    Status {
        /// Command name
        command: &'static str,
        /// Status word returned
        status: StatusWord,
    },

    /// The response data could not be decoded
    #[error("{command} returned malformed data: {reason}")]
    Malformed {
        /// Command name
        command: &'static str,
        /// What was wrong
        reason: &'static str,
    },
}

impl CommandError {
    /// Status word carried by the error, if any
    pub const fn status_word(&self) -> Option<StatusWord> {
        match self {
            Self::Status { status, .. } => Some(*status),
            Self::Apdu(_) | Self::Malformed { .. } => None,
        }
    }
}

/// Failure of a secure session
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransactionError {
    /// A card command failed during the session
    #[error("Card command failed while {step}: {source}")]
    Card {
        /// Session step
        step: &'static str,
        /// Underlying failure
        source: CommandError,
    },

    /// A SAM command failed during the session
    #[error("SAM command failed while {step}: {source}")]
    Sam {
        /// Session step
        step: &'static str,
        /// Underlying failure
        source: CommandError,
    },

    /// The card in the field is not the one the session was opened on
    #[error("Card switched: session opened on {expected}, closing on {actual}")]
    CardSwitched {
        /// Serial number captured at open, hex
        expected: String,
        /// Serial number read back at close, hex
        actual: String,
    },

    /// Operation outside the access level of the session
    #[error("{operation:?} is not permitted at {level:?} level")]
    NotPermitted {
        /// Session access level
        level: AccessLevel,
        /// Operation attempted
        operation: Operation,
    },

    /// Operation attempted in the wrong session state
    #[error("Session is {0:?}")]
    InvalidState(SessionState),

    /// A counter change would leave the counter's range
    #[error("Counter {counter} of SFI {sfi:#04X} out of range")]
    CounterOutOfRange {
        /// File holding the counter
        sfi: u8,
        /// Counter number
        counter: u8,
    },
}

impl TransactionError {
    /// Outcome reported to callers for this error
    pub const fn status(&self) -> TransactionStatus {
        match self {
            Self::CardSwitched { .. } => TransactionStatus::CardSwitched,
            _ => TransactionStatus::SessionError,
        }
    }

    pub(crate) fn card(step: &'static str) -> impl Fn(CommandError) -> Self {
        move |source| Self::Card { step, source }
    }

    pub(crate) fn sam(step: &'static str) -> impl Fn(CommandError) -> Self {
        move |source| Self::Sam { step, source }
    }
}
