//! Core traits and types for APDU (Application Protocol Data Unit) exchanges
//!
//! This crate provides the foundational types used by the validator to talk to
//! contactless ticketing cards and to the secure access module (SAM), according
//! to ISO/IEC 7816-4.
//!
//! ## Overview
//!
//! - [`Command`] and the [`ApduCommand`] trait build command APDUs
//! - [`Response`] and [`StatusWord`] decode response APDUs
//! - [`CardTransport`] is the raw byte pipe every reader back-end implements
//! - [`Error`] is the shared error type, with [`ResultExt`] for context
#![cfg_attr(not(test), warn(unused_crate_dependencies))]
#![forbid(unsafe_code)]
#![warn(missing_docs, rustdoc::missing_crate_level_docs)]

// Re-export bytes for convenience
pub use bytes::{Bytes, BytesMut};

pub mod command;
pub mod error;
pub mod response;
pub mod transport;

pub use command::{ApduCommand, Command, ExpectedLength};
pub use error::{Error, ResultExt};
pub use response::status::StatusWord;
pub use response::{ApduResponse, Response};
pub use transport::CardTransport;

#[cfg(any(test, feature = "mock"))]
pub use transport::MockTransport;

/// Prelude module containing commonly used traits and types
pub mod prelude {
    pub use crate::{Bytes, BytesMut, Error, ResultExt};

    pub use crate::Command;
    pub use crate::command::{ApduCommand, ExpectedLength};

    pub use crate::Response;
    pub use crate::response::ApduResponse;
    pub use crate::response::status::{StatusWord, common as status};

    pub use crate::CardTransport;
}
