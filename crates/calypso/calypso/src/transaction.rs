//! Transaction Engine: the secured open, operate, close sequence against one
//! card, optionally authenticated by a SAM.
//!
//! Reads are sent to the card as soon as they are requested. Modifications
//! are queued and sent as one batch at close, right after the card serial
//! number has been read back and checked, so a card swapped mid-transaction
//! never receives a write.
//!
//! Without a SAM the session runs in reduced mode: the terminal challenge is
//! drawn locally, the terminal signature is all zeros and the card signature
//! is not checked. The bytes exchanged with the card are otherwise the same.

use std::collections::BTreeMap;
use std::fmt;

use tracing::{debug, info, instrument, warn};
use validator_apdu_core::prelude::*;

use crate::card::{CalypsoCard, decode_counters};
use crate::commands::{
    AbortSecureSessionCommand, AppendRecordCommand, CloseSecureSessionCommand, CounterCommand,
    CounterOp, DigestAuthenticateCommand, DigestCloseCommand, DigestInitCommand,
    DigestUpdateCommand, GetChallengeCommand, GetSerialNumberCommand, OpenSecureSessionCommand,
    ReadRecordCommand, SelectApplicationCommand, SelectDiversifierCommand, UpdateRecordCommand,
    execute,
};
use crate::constants::{COUNTER_MAX, RECORD_NUMBER_1};
use crate::{CommandError, TransactionError};

/// Terminal signature sent in reduced mode
const UNSIGNED: [u8; 4] = [0; 4];

/// Card operations a session may be asked to perform
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    /// Read a record
    Read,
    /// Overwrite a record
    Update,
    /// Append a record to a cyclic file
    Append,
    /// Increase a counter
    Increase,
    /// Decrease a counter
    Decrease,
}

/// Access level a session is opened at, selecting the card key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AccessLevel {
    /// Personalization
    Perso,
    /// Reloading
    Load,
    /// Validation
    Debit,
}

impl AccessLevel {
    /// Index of the card key used at this level
    pub const fn key_index(self) -> u8 {
        match self {
            Self::Perso => 1,
            Self::Load => 2,
            Self::Debit => 3,
        }
    }

    /// Whether `operation` is allowed at this level
    pub const fn permits(self, operation: Operation) -> bool {
        match self {
            Self::Perso => true,
            Self::Load => !matches!(operation, Operation::Decrease),
            Self::Debit => matches!(
                operation,
                Operation::Read | Operation::Append | Operation::Decrease
            ),
        }
    }
}

impl fmt::Display for AccessLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Perso => "PERSO",
            Self::Load => "LOAD",
            Self::Debit => "DEBIT",
        })
    }
}

/// Lifecycle of a [`TransactionSession`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No session on the card
    Closed,
    /// Open exchange in progress
    Opening,
    /// Session open, accepting operations
    Open,
    /// Close exchange in progress
    Closing,
    /// Session aborted after a failure
    Failed,
}

/// Outcome of a transaction as reported to callers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionStatus {
    /// Committed
    Ok,
    /// Failed and aborted, nothing written
    SessionError,
    /// Another card answered at close, nothing written
    CardSwitched,
}

impl TransactionStatus {
    /// Status of a finished transaction
    pub const fn of(result: &Result<(), TransactionError>) -> Self {
        match result {
            Ok(()) => Self::Ok,
            Err(e) => e.status(),
        }
    }
}

impl fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Ok => "OK",
            Self::SessionError => "SESSION_ERROR",
            Self::CardSwitched => "CARD_SWITCHED",
        })
    }
}

#[derive(Debug, Clone)]
enum Modification {
    Update(UpdateRecordCommand),
    Append(AppendRecordCommand),
    Counter(CounterCommand),
}

/// A secure session on one card
///
/// The session borrows the card transport, and the SAM channel when there is
/// one, for its whole lifetime. Dropping a session that is still open aborts
/// it on the card.
pub struct TransactionSession<'a> {
    card: &'a mut dyn CardTransport,
    sam: Option<&'a mut dyn CardTransport>,
    aid: Bytes,
    serial_number: Bytes,
    level: AccessLevel,
    state: SessionState,
    pending: Vec<Modification>,
    counters: BTreeMap<(u8, u8), u32>,
}

impl fmt::Debug for TransactionSession<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransactionSession")
            .field("serial_number", &hex::encode_upper(&self.serial_number))
            .field("level", &self.level)
            .field("state", &self.state)
            .field("sam", &self.sam.is_some())
            .field("pending", &self.pending.len())
            .finish_non_exhaustive()
    }
}

impl<'a> TransactionSession<'a> {
    /// Open a session at `level` on the application `card`
    ///
    /// The application is selected again first: the channel may have been
    /// released since the default selection ran. On failure the session is
    /// aborted and the channel released before the error is returned.
    #[instrument(level = "debug", skip_all, fields(serial = %card.serial_hex(), %level, sam = sam.is_some()))]
    pub fn open(
        transport: &'a mut dyn CardTransport,
        card: &CalypsoCard,
        level: AccessLevel,
        sam: Option<&'a mut dyn CardTransport>,
    ) -> Result<Self, TransactionError> {
        let mut session = Self {
            card: transport,
            sam,
            aid: card.aid().clone(),
            serial_number: card.serial_number().clone(),
            level,
            state: SessionState::Opening,
            pending: Vec::new(),
            counters: BTreeMap::new(),
        };

        match session.start() {
            Ok(()) => {
                session.state = SessionState::Open;
                debug!("Secure session opened");
                Ok(session)
            }
            Err(e) => {
                session.fail(&e);
                Err(e)
            }
        }
    }

    fn start(&mut self) -> Result<(), TransactionError> {
        execute(self.card, &SelectApplicationCommand::new(self.aid.clone()))
            .map_err(TransactionError::card("selecting the application"))?;

        let challenge = match self.sam.as_deref_mut() {
            Some(sam) => {
                execute(sam, &SelectDiversifierCommand::new(self.serial_number.clone()))
                    .map_err(TransactionError::sam("diversifying"))?;
                execute(sam, &GetChallengeCommand).map_err(TransactionError::sam("getting a challenge"))?
            }
            None => rand::random(),
        };

        let opened = execute(
            self.card,
            &OpenSecureSessionCommand::new(self.level.key_index(), challenge),
        )
        .map_err(TransactionError::card("opening"))?;

        if let Some(sam) = self.sam.as_deref_mut() {
            execute(sam, &DigestInitCommand::new(opened.kvc, &opened.raw))
                .map_err(TransactionError::sam("starting the digest"))?;
        }
        Ok(())
    }

    /// Access level of the session
    pub const fn level(&self) -> AccessLevel {
        self.level
    }

    /// Current state
    pub const fn state(&self) -> SessionState {
        self.state
    }

    /// Whether a SAM authenticates the session
    pub const fn has_sam(&self) -> bool {
        self.sam.is_some()
    }

    /// Number of modifications waiting for close
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    fn check(&self, operation: Operation) -> Result<(), TransactionError> {
        if self.state != SessionState::Open {
            return Err(TransactionError::InvalidState(self.state));
        }
        if !self.level.permits(operation) {
            return Err(TransactionError::NotPermitted {
                level: self.level,
                operation,
            });
        }
        Ok(())
    }

    /// Send a command inside the session, feeding both the command and the
    /// whole response to the SAM digest
    fn exchange<C>(&mut self, step: &'static str, command: &C) -> Result<C::Success, TransactionError>
    where
        C: ApduCommand<Error = CommandError>,
    {
        let apdu = command
            .to_bytes()
            .map_err(|e| TransactionError::card(step)(e.into()))?;
        let raw = self
            .card
            .transmit_raw(&apdu)
            .map_err(|e| TransactionError::card(step)(e.into()))?;

        if let Some(sam) = self.sam.as_deref_mut() {
            execute(sam, &DigestUpdateCommand::new(apdu))
                .map_err(TransactionError::sam("updating the digest"))?;
            execute(sam, &DigestUpdateCommand::new(raw.clone()))
                .map_err(TransactionError::sam("updating the digest"))?;
        }

        C::parse_response_raw(raw).map_err(TransactionError::card(step))
    }

    /// Read `record` of the file `sfi`
    pub fn read_record(&mut self, sfi: u8, record: u8) -> Result<Bytes, TransactionError> {
        self.check(Operation::Read)?;
        self.exchange("reading a record", &ReadRecordCommand::new(sfi, record))
    }

    /// Read counter `counter` of the counter file `sfi`
    ///
    /// Returns `None` when the counter record is shorter than the counter
    /// slot.
    pub fn read_counter(&mut self, sfi: u8, counter: u8) -> Result<Option<u32>, TransactionError> {
        let record = self.read_record(sfi, RECORD_NUMBER_1)?;
        let counters = decode_counters(&record);
        for (number, value) in &counters {
            self.counters.insert((sfi, *number), *value);
        }
        Ok(counters.get(&counter).copied())
    }

    /// Queue a counter change
    ///
    /// Returns the value the counter will hold once the session is closed,
    /// when the counter was read earlier in this session.
    pub fn mutate_counter(
        &mut self,
        sfi: u8,
        counter: u8,
        delta: u32,
        op: CounterOp,
    ) -> Result<Option<u32>, TransactionError> {
        self.check(match op {
            CounterOp::Increase => Operation::Increase,
            CounterOp::Decrease => Operation::Decrease,
        })?;

        let anticipated = match self.counters.get(&(sfi, counter)) {
            Some(current) => {
                let updated = match op {
                    CounterOp::Increase => current.checked_add(delta).filter(|v| *v <= COUNTER_MAX),
                    CounterOp::Decrease => current.checked_sub(delta),
                }
                .ok_or(TransactionError::CounterOutOfRange { sfi, counter })?;
                self.counters.insert((sfi, counter), updated);
                Some(updated)
            }
            None => None,
        };

        self.pending
            .push(Modification::Counter(CounterCommand::new(op, sfi, counter, delta)));
        Ok(anticipated)
    }

    /// Queue the append of `data` to the cyclic file `sfi`
    pub fn append_record(&mut self, sfi: u8, data: impl Into<Bytes>) -> Result<(), TransactionError> {
        self.check(Operation::Append)?;
        self.pending
            .push(Modification::Append(AppendRecordCommand::new(sfi, data)));
        Ok(())
    }

    /// Queue the overwrite of `record` of the file `sfi`
    pub fn update_record(
        &mut self,
        sfi: u8,
        record: u8,
        data: impl Into<Bytes>,
    ) -> Result<(), TransactionError> {
        self.check(Operation::Update)?;
        self.pending
            .push(Modification::Update(UpdateRecordCommand::new(sfi, record, data)));
        Ok(())
    }

    /// Check the card, send the queued modifications and commit
    ///
    /// On any failure the session is aborted, the channel released and
    /// nothing is written.
    #[instrument(level = "debug", skip_all, fields(level = %self.level, pending = self.pending.len()))]
    pub fn close(mut self) -> Result<(), TransactionError> {
        if self.state != SessionState::Open {
            return Err(TransactionError::InvalidState(self.state));
        }
        self.state = SessionState::Closing;

        if let Err(e) = self.commit() {
            self.fail(&e);
            return Err(e);
        }

        if let Err(e) = self.card.release_channel() {
            warn!(error = %e, "Failed to release the card channel after commit");
        }
        self.state = SessionState::Closed;
        info!(
            serial = %hex::encode_upper(&self.serial_number),
            level = %self.level,
            "Secure session committed"
        );
        Ok(())
    }

    fn commit(&mut self) -> Result<(), TransactionError> {
        let serial = self.exchange("checking the card", &GetSerialNumberCommand)?;
        if serial != self.serial_number {
            return Err(TransactionError::CardSwitched {
                expected: hex::encode_upper(&self.serial_number),
                actual: hex::encode_upper(&serial),
            });
        }

        for modification in std::mem::take(&mut self.pending) {
            match modification {
                Modification::Update(command) => self.exchange("updating a record", &command)?,
                Modification::Append(command) => self.exchange("appending a record", &command)?,
                Modification::Counter(command) => {
                    let value = self.exchange("changing a counter", &command)?;
                    debug!(op = %command.op(), value, "Counter changed");
                }
            }
        }

        let terminal_signature = match self.sam.as_deref_mut() {
            Some(sam) => execute(sam, &DigestCloseCommand).map_err(TransactionError::sam("signing"))?,
            None => UNSIGNED,
        };

        let card_signature = execute(self.card, &CloseSecureSessionCommand::new(terminal_signature))
            .map_err(TransactionError::card("closing"))?;

        if let Some(sam) = self.sam.as_deref_mut() {
            execute(sam, &DigestAuthenticateCommand::new(card_signature))
                .map_err(TransactionError::sam("authenticating the card"))?;
        }
        Ok(())
    }

    /// Abort the session on the card and release the channel
    fn fail(&mut self, error: &TransactionError) {
        warn!(%error, state = ?self.state, "Secure session failed, aborting");
        self.abort();
        self.state = SessionState::Failed;
    }

    fn abort(&mut self) {
        self.pending.clear();
        if let Err(e) = execute(self.card, &AbortSecureSessionCommand) {
            debug!(error = %e, "Abort not acknowledged by the card");
        }
        if let Err(e) = self.card.release_channel() {
            debug!(error = %e, "Failed to release the card channel");
        }
    }
}

impl Drop for TransactionSession<'_> {
    fn drop(&mut self) {
        if matches!(
            self.state,
            SessionState::Opening | SessionState::Open | SessionState::Closing
        ) {
            warn!(state = ?self.state, "Secure session dropped while open, aborting");
            self.abort();
            self.state = SessionState::Failed;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::{CALYPSO_AID, sfi};
    use validator_apdu_reader::sim::{VirtualCard, VirtualSam};

    const SERIAL: [u8; 8] = [0, 0, 0, 0, 0x11, 0x22, 0x33, 0x44];

    fn card() -> VirtualCard {
        VirtualCard::new(CALYPSO_AID, SERIAL)
            .with_counter_file(sfi::COUNTER, 9)
            .with_cyclic_file(sfi::EVENT_LOG, 29, 3)
            .with_counter(sfi::COUNTER, 1, 5)
    }

    fn calypso() -> CalypsoCard {
        CalypsoCard::new(CALYPSO_AID, SERIAL.to_vec())
    }

    #[test]
    fn access_levels() {
        assert!(AccessLevel::Perso.permits(Operation::Decrease));
        assert!(AccessLevel::Load.permits(Operation::Update));
        assert!(!AccessLevel::Load.permits(Operation::Decrease));
        assert!(AccessLevel::Debit.permits(Operation::Decrease));
        assert!(!AccessLevel::Debit.permits(Operation::Increase));
        assert!(!AccessLevel::Debit.permits(Operation::Update));
    }

    #[test]
    fn reduced_mode_commits() {
        let mut card = card().without_signature_check();
        let mut session = TransactionSession::open(&mut card, &calypso(), AccessLevel::Load, None).unwrap();

        assert_eq!(session.read_counter(sfi::COUNTER, 1).unwrap(), Some(5));
        let anticipated = session
            .mutate_counter(sfi::COUNTER, 1, 3, CounterOp::Increase)
            .unwrap();
        assert_eq!(anticipated, Some(8));
        session.append_record(sfi::EVENT_LOG, &b"OP = +3"[..]).unwrap();
        assert_eq!(session.pending(), 2);
        session.close().unwrap();

        assert_eq!(card.counter(sfi::COUNTER, 1), Some(8));
        assert!(card.record(sfi::EVENT_LOG, 1).unwrap().starts_with(b"OP = +3"));
        assert!(!card.in_session());
    }

    #[test]
    fn sam_mode_commits_and_authenticates() {
        let mut card = card();
        let mut sam = VirtualSam::default();
        let mut session = TransactionSession::open(
            &mut card,
            &calypso(),
            AccessLevel::Debit,
            Some(&mut sam),
        )
        .unwrap();
        assert!(session.has_sam());

        session.read_counter(sfi::COUNTER, 1).unwrap();
        session
            .mutate_counter(sfi::COUNTER, 1, 1, CounterOp::Decrease)
            .unwrap();
        session.close().unwrap();

        assert_eq!(card.counter(sfi::COUNTER, 1), Some(4));
        assert_eq!(sam.signatures(), 1);
    }

    #[test]
    fn operation_outside_level_is_refused() {
        let mut card = card().without_signature_check();
        let mut session = TransactionSession::open(&mut card, &calypso(), AccessLevel::Debit, None).unwrap();

        let result = session.mutate_counter(sfi::COUNTER, 1, 1, CounterOp::Increase);
        assert!(matches!(
            result,
            Err(TransactionError::NotPermitted {
                level: AccessLevel::Debit,
                operation: Operation::Increase
            })
        ));
        assert_eq!(session.pending(), 0);
    }

    #[test]
    fn counter_underflow_is_caught_before_close() {
        let mut card = card().without_signature_check().with_counter(sfi::COUNTER, 1, 0);
        let mut session = TransactionSession::open(&mut card, &calypso(), AccessLevel::Debit, None).unwrap();

        session.read_counter(sfi::COUNTER, 1).unwrap();
        let result = session.mutate_counter(sfi::COUNTER, 1, 1, CounterOp::Decrease);
        assert!(matches!(result, Err(TransactionError::CounterOutOfRange { .. })));
    }

    #[test]
    fn rejected_card_signature_fails_the_session() {
        let mut card = card();
        let sam = VirtualSam::default();
        sam.fail_next(0x82, status::INCORRECT_SIGNATURE);
        let mut channel = sam.clone();

        let mut session =
            TransactionSession::open(&mut card, &calypso(), AccessLevel::Load, Some(&mut channel))
                .unwrap();
        session
            .mutate_counter(sfi::COUNTER, 1, 2, CounterOp::Increase)
            .unwrap();
        let error = session.close().unwrap_err();

        assert!(matches!(error, TransactionError::Sam { .. }));
        assert_eq!(error.status(), TransactionStatus::SessionError);
    }

    #[test]
    fn failed_open_reports_session_error() {
        let mut card = card().invalidated();
        let error = TransactionSession::open(&mut card, &calypso(), AccessLevel::Load, None).unwrap_err();
        assert_eq!(error.status(), TransactionStatus::SessionError);
        assert!(!card.in_session());
    }

    #[test]
    fn rejected_write_discards_the_whole_batch() {
        let mut card = card().without_signature_check();
        card.fail_next(0xE2, status::SECURITY_CONDITION_NOT_SATISFIED);

        let mut session = TransactionSession::open(&mut card, &calypso(), AccessLevel::Load, None).unwrap();
        session
            .mutate_counter(sfi::COUNTER, 1, 2, CounterOp::Increase)
            .unwrap();
        session.append_record(sfi::EVENT_LOG, &b"OP = +2"[..]).unwrap();
        assert!(session.close().is_err());

        assert_eq!(card.counter(sfi::COUNTER, 1), Some(5));
        assert!(!card.in_session());
    }

    #[test]
    fn dropped_session_is_aborted() {
        let mut card = card().without_signature_check();
        {
            let mut session =
                TransactionSession::open(&mut card, &calypso(), AccessLevel::Load, None).unwrap();
            session
                .mutate_counter(sfi::COUNTER, 1, 2, CounterOp::Increase)
                .unwrap();
        }
        assert!(!card.in_session());
        assert_eq!(card.counter(sfi::COUNTER, 1), Some(5));
        assert_eq!(card.commands().last().map(|c| &c[..]), Some(&[0x00, 0x8E, 0x00, 0x00][..]));
    }
}
