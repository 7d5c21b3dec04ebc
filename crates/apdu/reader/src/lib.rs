//! Observable reader capability for the validator
//!
//! This crate defines the contract every reader back-end satisfies and the
//! pieces the back-ends share:
//!
//! - [`ReaderBackend`], [`ObservableReader`] and [`SamReader`], the capability
//!   traits the ticketing core depends on
//! - [`DefaultSelectionRequest`] and [`process_selection`], the first-match
//!   application selection a reader runs on every card insertion
//! - [`ReaderEvent`] and its crossbeam channel aliases
//! - [`register_backend`], which bounds back-end registration by a timeout
//!
//! Two back-ends ship with the crate: the in-process [`sim`] back-end, and a
//! PC/SC back-end behind the `pcsc` feature.
#![cfg_attr(not(test), warn(unused_crate_dependencies))]
#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod error;
pub mod event;
mod protocol;
mod reader;
pub mod selection;
pub mod sim;

#[cfg(feature = "pcsc")]
pub mod pcsc;

pub use error::ReaderError;
pub use event::{
    ReaderEvent, ReaderEventKind, ReaderEventReceiver, ReaderEventSender, reader_event_channel,
};
pub use protocol::CardProtocol;
pub use reader::{
    ObservableReader, ObserverId, ObserverList, PollingMode, ReaderBackend, SamReader,
    register_backend,
};
pub use selection::{
    AtrFilter, CardSelectionRequest, CardSelectionResponse, CardSelector,
    DefaultSelectionRequest, DefaultSelectionResponse, InvalidatedPolicy, NotificationMode,
    process_selection,
};
