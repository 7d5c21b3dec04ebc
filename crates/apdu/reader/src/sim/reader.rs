use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info, warn};
use validator_apdu_core::prelude::*;

use super::{VirtualCard, VirtualSam};
use crate::{
    DefaultSelectionRequest, NotificationMode, ObservableReader, ObserverId, ObserverList,
    PollingMode, ReaderError, ReaderEvent, ReaderEventSender, SamReader, process_selection,
};

#[derive(Debug, Default)]
struct ReaderInner {
    card: Option<VirtualCard>,
    default_selection: Option<DefaultSelectionRequest>,
    observers: ObserverList,
    detecting: bool,
    mode: PollingMode,
    pending_swap: Option<(u8, VirtualCard)>,
    ejected: Vec<VirtualCard>,
}

/// A simulated card reader
///
/// Clones share the same field, so a test keeps one handle to insert and
/// remove cards while the validator owns another.
#[derive(Debug, Clone)]
pub struct VirtualReader {
    name: Arc<str>,
    inner: Arc<Mutex<ReaderInner>>,
}

impl VirtualReader {
    /// Create an empty reader
    pub fn new(name: &str) -> Self {
        Self {
            name: Arc::from(name),
            inner: Arc::default(),
        }
    }

    /// Put a card in the field
    ///
    /// When detection is running, the default selection is processed and the
    /// outcome delivered to observers before this returns.
    pub fn insert_card(&self, card: VirtualCard) {
        let mut guard = self.inner.lock();
        let inner = &mut *guard;

        if let Some(previous) = inner.card.replace(card) {
            debug!(reader = %self.name, "Card replaced without removal");
            inner.ejected.push(previous);
        }
        if !inner.detecting {
            debug!(reader = %self.name, "Card inserted while detection is stopped");
            return;
        }
        let Some(card) = inner.card.as_mut() else {
            return;
        };
        info!(reader = %self.name, serial = %hex::encode_upper(card.serial()), "Card inserted");

        let event = match &inner.default_selection {
            Some(request) => {
                let atr = card.atr().clone();
                let protocol = card.protocol().to_string();
                match process_selection(card, &atr, &protocol, request) {
                    Ok(selection) => {
                        let matched = selection.matched_index().is_some();
                        if !matched && request.notification == NotificationMode::MatchedOnly {
                            debug!(reader = %self.name, "No candidate matched, insertion not reported");
                            return;
                        }
                        ReaderEvent::selected(self.name.as_ref(), selection)
                    }
                    Err(e) => {
                        warn!(reader = %self.name, error = %e, "Default selection failed");
                        ReaderEvent::inserted(self.name.as_ref())
                    }
                }
            }
            None => ReaderEvent::inserted(self.name.as_ref()),
        };

        inner.observers.notify(&event);
    }

    /// Take the card out of the field, returning it
    pub fn remove_card(&self) -> Option<VirtualCard> {
        let mut inner = self.inner.lock();
        let card = inner.card.take()?;
        inner.pending_swap = None;

        if inner.detecting {
            info!(reader = %self.name, "Card removed");
            inner.observers.notify(&ReaderEvent::removed(self.name.as_ref()));
            if inner.mode == PollingMode::SingleShot {
                debug!(reader = %self.name, "Single shot polling, detection stopped");
                inner.detecting = false;
            }
        }
        Some(card)
    }

    /// Replace the card right before the next command with instruction
    /// `trigger_ins`, without notifying observers
    ///
    /// The replacement answers as if its application were already selected,
    /// which is what a terminal sees when a card is swapped mid-transaction.
    pub fn schedule_swap(&self, trigger_ins: u8, mut card: VirtualCard) {
        card.mark_selected();
        self.inner.lock().pending_swap = Some((trigger_ins, card));
    }

    /// Run `f` against the card in the field
    pub fn with_card<R>(&self, f: impl FnOnce(&VirtualCard) -> R) -> Option<R> {
        self.inner.lock().card.as_ref().map(f)
    }

    /// Run `f` against the card in the field, mutably
    pub fn with_card_mut<R>(&self, f: impl FnOnce(&mut VirtualCard) -> R) -> Option<R> {
        self.inner.lock().card.as_mut().map(f)
    }

    /// Cards that left the field through a swap or a replacement
    pub fn take_ejected(&self) -> Vec<VirtualCard> {
        std::mem::take(&mut self.inner.lock().ejected)
    }

    /// Whether a card is in the field
    pub fn has_card(&self) -> bool {
        self.inner.lock().card.is_some()
    }

    /// Whether detection is running
    pub fn is_detecting(&self) -> bool {
        self.inner.lock().detecting
    }

    /// Number of registered observers
    pub fn observer_count(&self) -> usize {
        self.inner.lock().observers.len()
    }
}

impl ObservableReader for VirtualReader {
    fn name(&self) -> &str {
        &self.name
    }

    fn set_default_selection(&mut self, request: DefaultSelectionRequest) {
        debug!(reader = %self.name, candidates = request.requests.len(), "Default selection set");
        self.inner.lock().default_selection = Some(request);
    }

    fn start_detection(&mut self, mode: PollingMode) -> Result<(), ReaderError> {
        let mut inner = self.inner.lock();
        inner.detecting = true;
        inner.mode = mode;
        info!(reader = %self.name, ?mode, "Card detection started");
        Ok(())
    }

    fn stop_detection(&mut self) {
        self.inner.lock().detecting = false;
        info!(reader = %self.name, "Card detection stopped");
    }

    fn add_observer(&mut self, sender: ReaderEventSender) -> ObserverId {
        self.inner.lock().observers.add(sender)
    }

    fn remove_observer(&mut self, id: ObserverId) -> bool {
        self.inner.lock().observers.remove(id)
    }

    fn transport(&mut self) -> &mut dyn CardTransport {
        self
    }
}

impl CardTransport for VirtualReader {
    fn do_transmit_raw(&mut self, command: &[u8]) -> Result<Bytes, Error> {
        let mut guard = self.inner.lock();
        let inner = &mut *guard;

        let trigger = inner.pending_swap.as_ref().map(|(ins, _)| *ins);
        if trigger.is_some() && command.get(1).copied() == trigger {
            if let Some((_, replacement)) = inner.pending_swap.take() {
                debug!(reader = %self.name, "Card swapped in the field");
                if let Some(previous) = inner.card.replace(replacement) {
                    inner.ejected.push(previous);
                }
            }
        }

        let card = inner.card.as_mut().ok_or(Error::CardRemoved)?;
        Ok(card.process(command))
    }

    fn is_connected(&self) -> bool {
        self.has_card()
    }

    fn release_channel(&mut self) -> Result<(), Error> {
        if let Some(card) = self.inner.lock().card.as_mut() {
            card.release();
        }
        Ok(())
    }
}

/// A simulated SAM reader
#[derive(Debug, Clone)]
pub struct VirtualSamReader {
    name: Arc<str>,
    sam: VirtualSam,
}

impl VirtualSamReader {
    /// Reader hosting `sam`
    pub fn new(name: &str, sam: VirtualSam) -> Self {
        Self {
            name: Arc::from(name),
            sam,
        }
    }

    /// Handle on the hosted SAM
    pub fn sam(&self) -> VirtualSam {
        self.sam.clone()
    }
}

impl SamReader for VirtualSamReader {
    fn name(&self) -> &str {
        &self.name
    }

    fn open_channel(&mut self) -> Result<Box<dyn CardTransport>, ReaderError> {
        let mut channel = self.sam.clone();
        channel.release_channel()?;
        Ok(Box::new(channel))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{CardSelectionRequest, CardSelector, ReaderEventKind, reader_event_channel};
    use hex_literal::hex;

    const AID: [u8; 4] = hex!("A0000001");

    fn selection(notification: NotificationMode) -> DefaultSelectionRequest {
        DefaultSelectionRequest {
            requests: vec![CardSelectionRequest::new(CardSelector::aid(
                Bytes::from_static(&AID),
            ))],
            notification,
        }
    }

    fn card(serial: u8) -> VirtualCard {
        VirtualCard::new(Bytes::from_static(&AID), [0, 0, 0, 0, 0, 0, 0, serial])
            .with_linear_file(0x07, 29, 1)
    }

    #[test]
    fn insertion_and_removal_are_reported() {
        let mut reader = VirtualReader::new("PO");
        let (tx, rx) = reader_event_channel();
        reader.add_observer(tx);
        reader.set_default_selection(selection(NotificationMode::Always));
        reader.start_detection(PollingMode::Repeating).unwrap();

        reader.insert_card(card(1));
        let event = rx.try_recv().unwrap();
        assert_eq!(event.kind, ReaderEventKind::CardMatched);
        assert_eq!(event.selection.unwrap().matched_index(), Some(0));

        assert!(reader.remove_card().is_some());
        assert_eq!(rx.try_recv().unwrap().kind, ReaderEventKind::CardRemoved);
        assert!(reader.is_detecting());
    }

    #[test]
    fn matched_only_hides_unmatched_cards() {
        let mut reader = VirtualReader::new("PO");
        let (tx, rx) = reader_event_channel();
        reader.add_observer(tx);
        reader.set_default_selection(selection(NotificationMode::MatchedOnly));
        reader.start_detection(PollingMode::Repeating).unwrap();

        reader.insert_card(VirtualCard::new(Bytes::from_static(&hex!("B0")), [0; 8]));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn single_shot_stops_after_removal() {
        let mut reader = VirtualReader::new("PO");
        reader.start_detection(PollingMode::SingleShot).unwrap();
        reader.insert_card(card(1));
        reader.remove_card();
        assert!(!reader.is_detecting());
    }

    #[test]
    fn swap_happens_before_trigger_command() {
        let mut reader = VirtualReader::new("PO");
        reader.insert_card(card(1));
        reader.schedule_swap(0xCA, card(2));

        let response = reader.transmit(&Command::new_with_le(0x00, 0xCA, 0x00, 0xC7, 0x00)).unwrap();
        assert_eq!(response.data(), &[0, 0, 0, 0, 0, 0, 0, 2]);
        assert_eq!(reader.take_ejected().len(), 1);
    }

    #[test]
    fn empty_field_reports_card_removed() {
        let mut reader = VirtualReader::new("PO");
        let result = reader.transmit(&Command::new(0x00, 0xB2, 0x01, 0x3C));
        assert_eq!(result.unwrap_err(), Error::CardRemoved);
    }
}
