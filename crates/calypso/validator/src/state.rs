//! Application State Machine: turns reader events into the results shown to
//! the traveller.

use std::convert::Infallible;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use validator_apdu_reader::{ReaderEvent, ReaderEventKind};
use validator_calypso::{ActiveSelection, CardType, TransactionStatus};

use crate::ticketing::{NO_CONTRACT_LABEL, Ticketing};

/// Result status surfaced to the display
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    /// An operation is running
    Loading,
    /// The card could not be processed
    Error,
    /// Valid tickets or season pass
    TicketsFound,
    /// Not a card of the network
    InvalidCard,
    /// A card of the network with nothing left on it
    EmptyCard,
    /// An operation succeeded
    Success,
}

impl Status {
    /// Lowercase name
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Loading => "loading",
            Self::Error => "error",
            Self::TicketsFound => "tickets_found",
            Self::InvalidCard => "invalid_card",
            Self::EmptyCard => "empty_card",
            Self::Success => "success",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Status {
    type Err = Infallible;

    /// Unknown names read as [`Status::Error`]
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.to_ascii_lowercase().as_str() {
            "loading" => Self::Loading,
            "tickets_found" => Self::TicketsFound,
            "invalid_card" => Self::InvalidCard,
            "empty_card" => Self::EmptyCard,
            "success" => Self::Success,
            _ => Self::Error,
        })
    }
}

/// One result, delivered per completed event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CardReaderResponse {
    /// Result status
    pub status: Status,
    /// Tickets left on the card
    pub tickets_remaining: u32,
    /// Season contract label, empty for counter cards
    pub contract_label: String,
    /// Label of the detected card type
    pub card_type_label: String,
}

impl CardReaderResponse {
    /// Response with the given fields
    pub fn new(
        status: Status,
        tickets_remaining: u32,
        contract_label: impl Into<String>,
        card_type_label: impl Into<String>,
    ) -> Self {
        Self {
            status,
            tickets_remaining,
            contract_label: contract_label.into(),
            card_type_label: card_type_label.into(),
        }
    }

    /// Response carrying only a status and the card type
    pub fn status(status: Status, card_type_label: impl Into<String>) -> Self {
        Self::new(status, 0, "", card_type_label)
    }
}

/// States of the validator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ApplicationState {
    /// Reader not armed yet
    #[default]
    WaitSystemReady,
    /// Armed, waiting for a card
    WaitCard,
    /// A Calypso card is under evaluation
    CardStatus,
}

impl fmt::Display for ApplicationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::WaitSystemReady => "WAIT_SYSTEM_READY",
            Self::WaitCard => "WAIT_CARD",
            Self::CardStatus => "CARD_STATUS",
        })
    }
}

/// Malformed content found while evaluating a card
#[derive(Debug, thiserror::Error)]
enum EvaluationError {
    #[error("The card content was not read during selection")]
    MissingContent,
    #[error("The ticket counter was not read during selection")]
    MissingCounter,
}

/// The validator state machine
///
/// Driven by reader events only; the business operations it triggers go
/// through [`Ticketing`].
#[derive(Debug, Default)]
pub struct StateMachine {
    state: ApplicationState,
}

impl StateMachine {
    /// Machine waiting for the system to be ready
    pub fn new() -> Self {
        Self::default()
    }

    /// Current state
    pub const fn state(&self) -> ApplicationState {
        self.state
    }

    /// The reader is armed: start accepting cards
    pub fn system_ready(&mut self) {
        if self.state == ApplicationState::WaitSystemReady {
            self.transition(ApplicationState::WaitCard);
        }
    }

    fn transition(&mut self, next: ApplicationState) {
        if self.state != next {
            info!(from = %self.state, to = %next, "State changed");
            self.state = next;
        }
    }

    /// Handle one reader event, returning the result to display if any
    pub fn on_reader_event<T: Ticketing>(
        &mut self,
        event: &ReaderEvent,
        ticketing: &mut T,
    ) -> Option<CardReaderResponse> {
        debug!(state = %self.state, kind = ?event.kind, reader = %event.reader, "Reader event");
        match event.kind {
            ReaderEventKind::CardRemoved => {
                self.transition(ApplicationState::WaitSystemReady);
                None
            }
            ReaderEventKind::CardInserted | ReaderEventKind::CardMatched => {
                if self.state == ApplicationState::WaitSystemReady {
                    debug!("System not ready, presence dropped");
                    return None;
                }
                Some(self.on_presence(event, ticketing))
            }
        }
    }

    fn on_presence<T: Ticketing>(&mut self, event: &ReaderEvent, ticketing: &mut T) -> CardReaderResponse {
        let outcome = ticketing.process_default_selection(event.selection.as_ref());
        let Some(active) = outcome.active() else {
            warn!("Card not selected");
            self.transition(ApplicationState::WaitCard);
            return CardReaderResponse::status(Status::InvalidCard, "");
        };

        let label = active.card_type_label();
        if active.card_type != CardType::Calypso {
            info!(card_type = label, "Card of another network");
            self.transition(ApplicationState::WaitCard);
            return CardReaderResponse::status(Status::InvalidCard, label);
        }

        self.transition(ApplicationState::CardStatus);
        Self::evaluate(active, ticketing).unwrap_or_else(|e| {
            warn!(error = %e, "Card evaluation failed");
            CardReaderResponse::status(Status::Error, label)
        })
    }

    /// Decide between a season pass check and a ticket debit
    fn evaluate<T: Ticketing>(
        active: &ActiveSelection,
        ticketing: &mut T,
    ) -> Result<CardReaderResponse, EvaluationError> {
        let label = active.card_type_label();
        let content = active.content.as_deref().ok_or(EvaluationError::MissingContent)?;
        let contract = content.contract_label();
        debug!(%contract, "Evaluating contract");

        if contract.is_empty() || contract.contains(NO_CONTRACT_LABEL) || !contract.contains("SEASON") {
            let tickets = content.tickets().ok_or(EvaluationError::MissingCounter)?;
            if tickets == 0 {
                info!("No ticket left");
                return Ok(CardReaderResponse::status(Status::EmptyCard, label));
            }
            return Ok(match ticketing.debit_tickets(1) {
                TransactionStatus::Ok => {
                    info!(remaining = tickets - 1, "Ticket debited");
                    CardReaderResponse::new(Status::TicketsFound, tickets - 1, "", label)
                }
                status => {
                    warn!(%status, "Debit failed");
                    CardReaderResponse::status(Status::Error, label)
                }
            });
        }

        Ok(match ticketing.load_tickets(0) {
            TransactionStatus::Ok => {
                info!(%contract, "Season pass validated");
                CardReaderResponse::new(Status::TicketsFound, 0, contract, label)
            }
            status => {
                warn!(%status, "Season pass validation failed");
                CardReaderResponse::status(Status::Error, label)
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_names() {
        assert_eq!(Status::TicketsFound.to_string(), "tickets_found");
        assert_eq!("EMPTY_CARD".parse::<Status>(), Ok(Status::EmptyCard));
        assert_eq!("nonsense".parse::<Status>(), Ok(Status::Error));
    }

    #[test]
    fn response_serializes_with_lowercase_status() {
        let response = CardReaderResponse::new(Status::TicketsFound, 2, "", "CALYPSO");
        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["status"], "tickets_found");
        assert_eq!(json["tickets_remaining"], 2);
        assert_eq!(json["card_type_label"], "CALYPSO");
    }

    #[test]
    fn system_ready_only_arms_once() {
        let mut machine = StateMachine::new();
        assert_eq!(machine.state(), ApplicationState::WaitSystemReady);
        machine.system_ready();
        assert_eq!(machine.state(), ApplicationState::WaitCard);
        machine.system_ready();
        assert_eq!(machine.state(), ApplicationState::WaitCard);
    }
}
