//! Reader events and the channels that carry them

use crossbeam_channel::{Receiver, Sender, unbounded};

use crate::selection::DefaultSelectionResponse;

/// Kind of reader event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReaderEventKind {
    /// A card entered the field and no candidate matched, or selection failed
    CardInserted,
    /// A card entered the field and a candidate matched
    CardMatched,
    /// The card left the field
    CardRemoved,
}

/// Push-style notification from an observable reader
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReaderEvent {
    /// Reader name
    pub reader: String,
    /// Event kind
    pub kind: ReaderEventKind,
    /// Default selection outcome, absent on removal or when selection failed
    pub selection: Option<DefaultSelectionResponse>,
}

impl ReaderEvent {
    /// Event for a card that was selected, matched or not
    pub fn selected(reader: impl Into<String>, selection: DefaultSelectionResponse) -> Self {
        let kind = if selection.matched_index().is_some() {
            ReaderEventKind::CardMatched
        } else {
            ReaderEventKind::CardInserted
        };
        Self {
            reader: reader.into(),
            kind,
            selection: Some(selection),
        }
    }

    /// Event for a card whose default selection could not be run
    pub fn inserted(reader: impl Into<String>) -> Self {
        Self {
            reader: reader.into(),
            kind: ReaderEventKind::CardInserted,
            selection: None,
        }
    }

    /// Event for a card that left the field
    pub fn removed(reader: impl Into<String>) -> Self {
        Self {
            reader: reader.into(),
            kind: ReaderEventKind::CardRemoved,
            selection: None,
        }
    }

    /// Whether a card entered the field
    pub const fn is_presence(&self) -> bool {
        matches!(
            self.kind,
            ReaderEventKind::CardInserted | ReaderEventKind::CardMatched
        )
    }
}

/// Sender for reader events
pub type ReaderEventSender = Sender<ReaderEvent>;
/// Receiver for reader events
pub type ReaderEventReceiver = Receiver<ReaderEvent>;

/// Create an unbounded channel for reader events
pub fn reader_event_channel() -> (ReaderEventSender, ReaderEventReceiver) {
    unbounded()
}
