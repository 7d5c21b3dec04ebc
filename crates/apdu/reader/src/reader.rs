//! Reader capability traits

use std::fmt;
use std::thread;
use std::time::Duration;

use crossbeam_channel::RecvTimeoutError;
use tracing::{debug, info, warn};
use validator_apdu_core::CardTransport;

use crate::error::ReaderError;
use crate::event::{ReaderEvent, ReaderEventSender};
use crate::protocol::CardProtocol;
use crate::selection::DefaultSelectionRequest;

/// How long a reader keeps detecting cards
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PollingMode {
    /// Keep detecting after each removal
    #[default]
    Repeating,
    /// Stop detecting after the first removal
    SingleShot,
}

/// Handle returned by [`ObservableReader::add_observer`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObserverId(u64);

/// Observers registered on a reader
///
/// Disconnected receivers are pruned on the next notification.
#[derive(Debug, Default)]
pub struct ObserverList {
    next_id: u64,
    observers: Vec<(ObserverId, ReaderEventSender)>,
}

impl ObserverList {
    /// Register a sender
    pub fn add(&mut self, sender: ReaderEventSender) -> ObserverId {
        let id = ObserverId(self.next_id);
        self.next_id += 1;
        self.observers.push((id, sender));
        id
    }

    /// Unregister a sender, returning whether it was registered
    pub fn remove(&mut self, id: ObserverId) -> bool {
        let before = self.observers.len();
        self.observers.retain(|(observer, _)| *observer != id);
        self.observers.len() != before
    }

    /// Number of registered observers
    pub fn len(&self) -> usize {
        self.observers.len()
    }

    /// Whether no observer is registered
    pub fn is_empty(&self) -> bool {
        self.observers.is_empty()
    }

    /// Deliver an event to every observer
    pub fn notify(&mut self, event: &ReaderEvent) {
        self.observers.retain(|(id, sender)| {
            let delivered = sender.send(event.clone()).is_ok();
            if !delivered {
                debug!(observer = id.0, "Dropping disconnected observer");
            }
            delivered
        });
    }
}

/// A reader that detects cards and runs a default selection on each of them
pub trait ObservableReader: Send + fmt::Debug {
    /// Reader name
    fn name(&self) -> &str;

    /// Register the selection run on every card insertion
    fn set_default_selection(&mut self, request: DefaultSelectionRequest);

    /// Start detecting cards
    fn start_detection(&mut self, mode: PollingMode) -> Result<(), ReaderError>;

    /// Stop detecting cards
    fn stop_detection(&mut self);

    /// Register an observer
    fn add_observer(&mut self, sender: ReaderEventSender) -> ObserverId;

    /// Unregister an observer
    fn remove_observer(&mut self, id: ObserverId) -> bool;

    /// Transport to the card currently in the field
    fn transport(&mut self) -> &mut dyn CardTransport;
}

/// A reader hosting a SAM
pub trait SamReader: Send + fmt::Debug {
    /// Reader name
    fn name(&self) -> &str;

    /// Open a logical channel to the SAM
    fn open_channel(&mut self) -> Result<Box<dyn CardTransport>, ReaderError>;
}

/// A reader back-end: one variant per hardware binding
pub trait ReaderBackend: Send + fmt::Debug + 'static {
    /// Back-end name
    fn name(&self) -> &str;

    /// Bring the back-end up. May block on hardware.
    fn register(&mut self) -> Result<(), ReaderError>;

    /// Names of the readers the back-end exposes
    fn list_readers(&self) -> Result<Vec<String>, ReaderError>;

    /// The card (PO) reader, by name or the back-end's default
    fn po_reader(&mut self, name: Option<&str>) -> Result<Box<dyn ObservableReader>, ReaderError>;

    /// The SAM reader, by name or the back-end's default, if there is one
    fn sam_reader(&mut self, name: Option<&str>) -> Result<Option<Box<dyn SamReader>>, ReaderError>;

    /// ISO contactless protocol identifiers
    fn contactless_iso_protocol(&self) -> CardProtocol;

    /// Legacy contactless protocol identifiers, when the hardware supports one
    fn contactless_legacy_protocol(&self) -> Option<CardProtocol>;
}

/// Register a back-end on a helper thread, giving up after `timeout`
///
/// On timeout the helper thread is left to finish on its own and the
/// back-end it owns is dropped when it does.
pub fn register_backend<B: ReaderBackend>(
    mut backend: B,
    timeout: Duration,
) -> Result<B, ReaderError> {
    let name = backend.name().to_string();
    let (tx, rx) = crossbeam_channel::bounded(1);

    thread::Builder::new()
        .name(format!("register-{name}"))
        .spawn(move || {
            let result = backend.register().map(|()| backend);
            let _ = tx.send(result);
        })?;

    match rx.recv_timeout(timeout) {
        Ok(Ok(backend)) => {
            info!(backend = %name, "Reader back-end registered");
            Ok(backend)
        }
        Ok(Err(e)) => {
            warn!(backend = %name, error = %e, "Reader back-end registration failed");
            Err(e)
        }
        Err(RecvTimeoutError::Timeout) => {
            warn!(backend = %name, ?timeout, "Reader back-end registration timed out");
            Err(ReaderError::RegistrationTimeout {
                backend: name,
                timeout,
            })
        }
        Err(RecvTimeoutError::Disconnected) => Err(ReaderError::Registration(format!(
            "registration thread for {name} exited without a result"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::reader_event_channel;

    #[test]
    fn observer_list_prunes_disconnected_receivers() {
        let mut observers = ObserverList::default();
        let (tx1, rx1) = reader_event_channel();
        let (tx2, rx2) = reader_event_channel();
        let first = observers.add(tx1);
        observers.add(tx2);
        drop(rx2);

        observers.notify(&ReaderEvent::removed("PO"));
        assert_eq!(observers.len(), 1);
        assert_eq!(rx1.try_recv().unwrap(), ReaderEvent::removed("PO"));

        assert!(observers.remove(first));
        assert!(!observers.remove(first));
        assert!(observers.is_empty());
    }
}
