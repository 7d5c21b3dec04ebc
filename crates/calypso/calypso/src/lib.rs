//! Calypso support for the validator
//!
//! - [`commands`]: the card and SAM commands the validator sends
//! - [`selection`]: the candidate applications tried on every card presence
//! - [`card`]: the selected application and the records read from it
//! - [`transaction`]: secure sessions, with or without a SAM
//! - [`sim`]: virtual cards laid out like the ticketing application
#![cfg_attr(not(test), warn(unused_crate_dependencies))]
#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod card;
pub mod commands;
pub mod constants;
mod error;
pub mod selection;
pub mod sim;
pub mod transaction;

pub use card::{CalypsoCard, CardContent};
pub use commands::CounterOp;
pub use error::{CommandError, TransactionError};
pub use selection::{
    ActiveSelection, CardType, SelectionCandidate, SelectionOutcome, SelectionPlan,
    default_candidates, prepare_selection, process_event,
};
pub use transaction::{AccessLevel, Operation, SessionState, TransactionSession, TransactionStatus};
