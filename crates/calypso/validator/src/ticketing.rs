//! Ticketing Session: the business operations run against the card in the
//! field, each inside exactly one secure session.

use bytes::Bytes;
use chrono::{Local, NaiveDateTime};
use tracing::{debug, info, instrument, warn};
use validator_apdu_core::CardTransport;
use validator_apdu_reader::{
    CardProtocol, DefaultSelectionResponse, ObservableReader, PollingMode, ReaderError,
    ReaderEventSender, SamReader,
};
use validator_calypso::constants::{RECORD_NUMBER_1, RECORD_SIZE, TICKET_COUNTER, labels, sfi};
use validator_calypso::{
    AccessLevel, CardType, CounterOp, SelectionOutcome, SelectionPlan, TransactionError,
    TransactionSession, TransactionStatus, default_candidates, prepare_selection, process_event,
};

/// Label written by a contract load
pub const SEASON_TICKET_LABEL: &str = "1 MONTH SEASON TICKET";

/// Contract label of a personalized card without contract
pub const NO_CONTRACT_LABEL: &str = "NO CONTRACT";

/// Timestamp layout of event log records
const LOG_TIMESTAMP_FORMAT: &str = "%y%m%d %H:%M:%S";

/// Personalization profiles
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Profile {
    /// Counter-based card without contract
    CounterCard,
    /// Card holding a season pass
    SeasonPass,
}

impl Profile {
    const fn holder(self) -> &'static str {
        match self {
            Self::CounterCard => "John Smith",
            Self::SeasonPass => "Harry Potter",
        }
    }

    const fn contract(self) -> &'static str {
        match self {
            Self::CounterCard => NO_CONTRACT_LABEL,
            Self::SeasonPass => SEASON_TICKET_LABEL,
        }
    }
}

/// Text of a record, cut or space padded to the record size
pub fn pad_record(text: &str) -> Bytes {
    let mut record = text.as_bytes().to_vec();
    record.resize(RECORD_SIZE, b' ');
    Bytes::from(record)
}

/// Event log record `"<YYMMDD HH:mm:ss> <tag>"`
pub fn log_record(timestamp: NaiveDateTime, tag: &str) -> Bytes {
    pad_record(&format!("{} {tag}", timestamp.format(LOG_TIMESTAMP_FORMAT)))
}

/// Split an event log record back into its timestamp and tag
pub fn parse_log_record(record: &[u8]) -> Option<(NaiveDateTime, String)> {
    let text = std::str::from_utf8(record).ok()?;
    let stamp = text.get(..15)?;
    let timestamp = NaiveDateTime::parse_from_str(stamp, LOG_TIMESTAMP_FORMAT).ok()?;
    let tag = text.get(16..)?.trim_end_matches([' ', '\0']);
    Some((timestamp, tag.to_string()))
}

fn local_now() -> NaiveDateTime {
    Local::now().naive_local()
}

/// Business operations the state machine drives
pub trait Ticketing {
    /// Decode a default selection and cache the card type
    ///
    /// `None` stands for a presence whose selection could not be run.
    fn process_default_selection(
        &mut self,
        selection: Option<&DefaultSelectionResponse>,
    ) -> SelectionOutcome;

    /// Add `count` tickets, or renew the season pass when `count` is 0
    fn load_tickets(&mut self, count: u32) -> TransactionStatus;

    /// Consume one ticket, whatever `count`
    fn debit_tickets(&mut self, count: u32) -> TransactionStatus;

    /// Write the season ticket contract
    fn load_contract(&mut self) -> TransactionStatus;
}

/// The ticketing session bound to one card reader and an optional SAM
#[derive(Debug)]
pub struct TicketingSession {
    po_reader: Box<dyn ObservableReader>,
    sam_reader: Option<Box<dyn SamReader>>,
    plan: SelectionPlan,
    selection: SelectionOutcome,
    card_type: Option<CardType>,
    clock: fn() -> NaiveDateTime,
}

impl TicketingSession {
    /// Session over `po_reader`, selecting with the given protocols
    ///
    /// The legacy fallback candidate is only included when `legacy` is set.
    pub fn new(
        po_reader: Box<dyn ObservableReader>,
        sam_reader: Option<Box<dyn SamReader>>,
        iso: &CardProtocol,
        legacy: Option<&CardProtocol>,
    ) -> Self {
        Self {
            po_reader,
            sam_reader,
            plan: prepare_selection(default_candidates(iso, legacy)),
            selection: SelectionOutcome::NoActiveSelection,
            card_type: None,
            clock: local_now,
        }
    }

    /// Use another clock for event log timestamps
    pub fn with_clock(mut self, clock: fn() -> NaiveDateTime) -> Self {
        self.clock = clock;
        self
    }

    /// Card reader name
    pub fn po_reader_name(&self) -> &str {
        self.po_reader.name()
    }

    /// SAM reader name, if there is one
    pub fn sam_reader_name(&self) -> Option<&str> {
        self.sam_reader.as_deref().map(|reader| reader.name())
    }

    /// Selection plan registered on the reader
    pub const fn plan(&self) -> &SelectionPlan {
        &self.plan
    }

    /// Outcome of the last selection
    pub const fn selection(&self) -> &SelectionOutcome {
        &self.selection
    }

    /// Card type of the last selection
    pub const fn card_type(&self) -> Option<CardType> {
        self.card_type
    }

    /// Label of the card type of the last selection
    pub fn card_type_label(&self) -> &'static str {
        self.card_type.map_or(labels::OTHER, CardType::label)
    }

    /// Forget the last selection, on card removal
    pub fn clear_selection(&mut self) {
        self.selection = SelectionOutcome::NoActiveSelection;
        self.card_type = None;
    }

    /// Register the selection plan as the reader's default selection
    pub fn prepare_and_set_default_selection(&mut self) {
        self.po_reader
            .set_default_selection(self.plan.request().clone());
    }

    /// Arm the reader: default selection, observer, detection
    pub fn start_detection(
        &mut self,
        observer: ReaderEventSender,
        mode: PollingMode,
    ) -> Result<(), ReaderError> {
        self.prepare_and_set_default_selection();
        self.po_reader.add_observer(observer);
        self.po_reader.start_detection(mode)
    }

    /// Stop card detection
    pub fn stop_detection(&mut self) {
        self.po_reader.stop_detection();
    }

    /// Write the holder, contract and counters of `profile`
    #[instrument(skip(self))]
    pub fn personalize(&mut self, profile: Profile) -> TransactionStatus {
        let log = log_record((self.clock)(), "OP = PERSO");
        self.transact("personalize", AccessLevel::Perso, |session| {
            session.update_record(
                sfi::ENVIRONMENT_AND_HOLDER,
                RECORD_NUMBER_1,
                pad_record(profile.holder()),
            )?;
            session.update_record(sfi::CONTRACTS, RECORD_NUMBER_1, pad_record(profile.contract()))?;
            session.append_record(sfi::EVENT_LOG, log)?;
            session.update_record(sfi::COUNTER, RECORD_NUMBER_1, vec![0u8; RECORD_SIZE])
        })
    }

    /// Run `operation` inside one secure session on the selected card
    fn transact<F>(&mut self, name: &'static str, level: AccessLevel, operation: F) -> TransactionStatus
    where
        F: FnOnce(&mut TransactionSession<'_>) -> Result<(), TransactionError>,
    {
        let Some(card) = self.selection.active().and_then(|active| active.card.clone()) else {
            warn!(operation = name, "No Calypso card selected");
            return TransactionStatus::SessionError;
        };

        let mut sam_channel = match self.sam_reader.as_mut().map(|reader| reader.open_channel()) {
            Some(Ok(channel)) => Some(channel),
            Some(Err(e)) => {
                warn!(operation = name, error = %e, "Failed to open the SAM channel");
                return TransactionStatus::SessionError;
            }
            None => None,
        };
        let sam: Option<&mut dyn CardTransport> = match sam_channel.as_mut() {
            Some(channel) => Some(channel.as_mut()),
            None => None,
        };

        let result = TransactionSession::open(self.po_reader.transport(), &card, level, sam)
            .and_then(|mut session| {
                operation(&mut session)?;
                session.close()
            });

        let status = TransactionStatus::of(&result);
        match &result {
            Ok(()) => info!(operation = name, serial = %card.serial_hex(), %status, "Transaction done"),
            Err(e) => warn!(operation = name, serial = %card.serial_hex(), %status, error = %e, "Transaction failed"),
        }
        status
    }
}

impl Ticketing for TicketingSession {
    fn process_default_selection(
        &mut self,
        selection: Option<&DefaultSelectionResponse>,
    ) -> SelectionOutcome {
        let outcome = match selection {
            Some(response) => process_event(&self.plan, response),
            None => {
                debug!("Presence without selection data");
                SelectionOutcome::NoActiveSelection
            }
        };
        self.card_type = outcome.active().map(|active| active.card_type);
        self.selection = outcome.clone();
        info!(card_type = self.card_type_label(), "Card classified");
        outcome
    }

    #[instrument(skip(self))]
    fn load_tickets(&mut self, count: u32) -> TransactionStatus {
        let tag = if count > 0 {
            format!("OP = +{count}")
        } else {
            "T1".to_string()
        };
        let log = log_record((self.clock)(), &tag);

        self.transact("load tickets", AccessLevel::Load, |session| {
            let current = session.read_counter(sfi::COUNTER, TICKET_COUNTER)?;
            let anticipated =
                session.mutate_counter(sfi::COUNTER, TICKET_COUNTER, count, CounterOp::Increase)?;
            debug!(?current, ?anticipated, "Loading tickets");
            session.append_record(sfi::EVENT_LOG, log)
        })
    }

    #[instrument(skip(self))]
    fn debit_tickets(&mut self, count: u32) -> TransactionStatus {
        if count != 1 {
            debug!(requested = count, "One ticket is debited per validation");
        }
        self.transact("debit tickets", AccessLevel::Debit, |session| {
            let current = session.read_counter(sfi::COUNTER, TICKET_COUNTER)?;
            let anticipated =
                session.mutate_counter(sfi::COUNTER, TICKET_COUNTER, 1, CounterOp::Decrease)?;
            debug!(?current, ?anticipated, "Debiting one ticket");
            Ok(())
        })
    }

    #[instrument(skip(self))]
    fn load_contract(&mut self) -> TransactionStatus {
        let log = log_record((self.clock)(), "OP = +ST");
        self.transact("load contract", AccessLevel::Load, |session| {
            let tickets = session.read_counter(sfi::COUNTER, TICKET_COUNTER)?;
            debug!(?tickets, "Loading season ticket contract");
            session.update_record(sfi::CONTRACTS, RECORD_NUMBER_1, pad_record(SEASON_TICKET_LABEL))?;
            session.append_record(sfi::EVENT_LOG, log)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn at(h: u32, m: u32, s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2022, 10, 14)
            .and_then(|date| date.and_hms_opt(h, m, s))
            .unwrap()
    }

    #[test]
    fn log_records_are_fixed_width() {
        let record = log_record(at(9, 5, 7), "OP = +3");
        assert_eq!(record.len(), RECORD_SIZE);
        assert_eq!(&record[..], b"221014 09:05:07 OP = +3      ");
    }

    #[test]
    fn long_text_is_cut() {
        let record = pad_record("A TEXT MUCH LONGER THAN ONE RECORD CAN HOLD");
        assert_eq!(&record[..], b"A TEXT MUCH LONGER THAN ONE R");
    }

    #[test]
    fn log_record_parses_back() {
        let (timestamp, tag) = parse_log_record(&log_record(at(23, 59, 1), "T1")).unwrap();
        assert_eq!(timestamp, at(23, 59, 1));
        assert_eq!(tag, "T1");

        assert!(parse_log_record(&[0u8; RECORD_SIZE]).is_none());
    }
}
