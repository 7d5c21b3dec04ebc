//! Contactless ticket validator
//!
//! Cards presented to the reader are classified by the default selection,
//! then debited or checked for a season pass inside one secure session:
//!
//! - [`ticketing`]: the business operations run against the card
//! - [`state`]: the state machine mapping reader events to results
//! - [`service`]: the worker thread that serializes events and operations
//! - [`config`]: settings from defaults, TOML and the environment
#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
mod error;
pub mod service;
pub mod state;
pub mod ticketing;

pub use config::{BackendKind, ValidatorConfig};
pub use error::{InitError, ServiceError};
pub use service::Validator;
pub use state::{ApplicationState, CardReaderResponse, StateMachine, Status};
pub use ticketing::{Profile, Ticketing, TicketingSession};
