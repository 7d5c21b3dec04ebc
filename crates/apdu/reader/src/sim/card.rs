use std::collections::BTreeMap;

use bytes::{BufMut, Bytes, BytesMut};
use iso7816_tlv::ber::{Tag, Tlv, Value};
use tracing::{debug, trace};
use validator_apdu_core::prelude::*;

use super::{CARD_LABEL, DEFAULT_MASTER_KEY, TERMINAL_LABEL, diversify, session_signature};
use crate::CardProtocol;

/// Modifications a card accepts inside one secure session
const MAX_SESSION_MODIFICATIONS: usize = 6;

/// Size of one counter inside a counter record
const COUNTER_SIZE: usize = 3;

/// Largest value a counter holds
const COUNTER_MAX: u32 = 0x00FF_FFFF;

const DEFAULT_ATR: [u8; 12] = [
    0x3B, 0x8F, 0x80, 0x01, 0x80, 0x5A, 0x0A, 0x01, 0x03, 0x20, 0x03, 0x11,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FileKind {
    Linear,
    Cyclic,
    Counters,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct ElementaryFile {
    kind: FileKind,
    record_size: usize,
    records: Vec<Vec<u8>>,
}

impl ElementaryFile {
    fn new(kind: FileKind, record_size: usize, records: usize) -> Self {
        Self {
            kind,
            record_size,
            records: vec![vec![0; record_size]; records],
        }
    }

    fn record_mut(&mut self, number: u8) -> Result<&mut Vec<u8>, StatusWord> {
        usize::from(number)
            .checked_sub(1)
            .and_then(|index| self.records.get_mut(index))
            .ok_or(status::RECORD_NOT_FOUND)
    }

    fn write(&mut self, number: u8, data: &[u8]) -> Result<(), StatusWord> {
        if data.len() > self.record_size {
            return Err(status::WRONG_LENGTH);
        }
        let record_size = self.record_size;
        let record = self.record_mut(number)?;
        record.clear();
        record.extend_from_slice(data);
        record.resize(record_size, 0);
        Ok(())
    }

    fn counter(&self, number: u8) -> Option<u32> {
        let offset = usize::from(number).checked_sub(1)? * COUNTER_SIZE;
        let slot = self.records.first()?.get(offset..offset + COUNTER_SIZE)?;
        Some(u32::from_be_bytes([0, slot[0], slot[1], slot[2]]))
    }

    fn set_counter(&mut self, number: u8, value: u32) -> Result<(), StatusWord> {
        let offset = usize::from(number)
            .checked_sub(1)
            .ok_or(status::RECORD_NOT_FOUND)?
            * COUNTER_SIZE;
        let slot = self
            .records
            .first_mut()
            .and_then(|record| record.get_mut(offset..offset + COUNTER_SIZE))
            .ok_or(status::RECORD_NOT_FOUND)?;
        slot.copy_from_slice(&value.to_be_bytes()[1..]);
        Ok(())
    }
}

#[derive(Debug, Clone)]
struct SecureSession {
    terminal_challenge: Vec<u8>,
    digest: Vec<u8>,
    files: BTreeMap<u8, ElementaryFile>,
    modifications: usize,
}

/// A simulated contactless card
///
/// With an AID the card hosts one application with SFI-addressed files.
/// Without one it models a card that answers no application selection, such
/// as a MIFARE Classic tag.
#[derive(Debug, Clone)]
pub struct VirtualCard {
    aid: Option<Bytes>,
    serial: [u8; 8],
    atr: Bytes,
    protocol: String,
    key: [u8; 16],
    files: BTreeMap<u8, ElementaryFile>,
    invalidated: bool,
    verify_terminal_signature: bool,
    selected: bool,
    session: Option<SecureSession>,
    injected_failure: Option<(u8, StatusWord)>,
    commands: Vec<Bytes>,
}

impl VirtualCard {
    /// ISO 14443-4 card hosting the application `aid`
    pub fn new(aid: impl Into<Bytes>, serial: [u8; 8]) -> Self {
        Self {
            aid: Some(aid.into()),
            serial,
            atr: Bytes::from_static(&DEFAULT_ATR),
            protocol: CardProtocol::ISO_14443_4.to_string(),
            key: diversify(&DEFAULT_MASTER_KEY, &serial),
            files: BTreeMap::new(),
            invalidated: false,
            verify_terminal_signature: true,
            selected: false,
            session: None,
            injected_failure: None,
            commands: Vec::new(),
        }
    }

    /// Card hosting no selectable application
    pub fn without_application(protocol: impl Into<String>, atr: impl Into<Bytes>) -> Self {
        Self {
            aid: None,
            atr: atr.into(),
            protocol: protocol.into(),
            ..Self::new(Bytes::new(), [0; 8])
        }
    }

    /// Add a linear file
    pub fn with_linear_file(mut self, sfi: u8, record_size: usize, records: usize) -> Self {
        self.files
            .insert(sfi, ElementaryFile::new(FileKind::Linear, record_size, records));
        self
    }

    /// Add a cyclic file, where appended records push older ones out
    pub fn with_cyclic_file(mut self, sfi: u8, record_size: usize, records: usize) -> Self {
        self.files
            .insert(sfi, ElementaryFile::new(FileKind::Cyclic, record_size, records));
        self
    }

    /// Add a counter file: one record of 3-byte big-endian counters
    pub fn with_counter_file(mut self, sfi: u8, record_size: usize) -> Self {
        self.files
            .insert(sfi, ElementaryFile::new(FileKind::Counters, record_size, 1));
        self
    }

    /// Set the initial content of a record, zero padded
    pub fn with_record(mut self, sfi: u8, record: u8, data: &[u8]) -> Self {
        if let Some(file) = self.files.get_mut(&sfi) {
            if let Err(status) = file.write(record, data) {
                debug!(sfi, record, %status, "Initial record content ignored");
            }
        }
        self
    }

    /// Set the initial value of a counter
    pub fn with_counter(mut self, sfi: u8, counter: u8, value: u32) -> Self {
        if let Some(file) = self.files.get_mut(&sfi) {
            if let Err(status) = file.set_counter(counter, value.min(COUNTER_MAX)) {
                debug!(sfi, counter, %status, "Initial counter value ignored");
            }
        }
        self
    }

    /// Mark the application as invalidated
    pub const fn invalidated(mut self) -> Self {
        self.invalidated = true;
        self
    }

    /// Use a key diversified from another master key
    pub fn with_master_key(mut self, master: &[u8; 16]) -> Self {
        self.key = diversify(master, &self.serial);
        self
    }

    /// Accept any terminal signature when closing a session
    pub const fn without_signature_check(mut self) -> Self {
        self.verify_terminal_signature = false;
        self
    }

    /// Use another ATR
    pub fn with_atr(mut self, atr: impl Into<Bytes>) -> Self {
        self.atr = atr.into();
        self
    }

    /// Answer the next command with instruction `ins` with `status`
    pub fn fail_next(&mut self, ins: u8, status: StatusWord) {
        self.injected_failure = Some((ins, status));
    }

    /// Serial number
    pub const fn serial(&self) -> &[u8; 8] {
        &self.serial
    }

    /// Answer to reset
    pub const fn atr(&self) -> &Bytes {
        &self.atr
    }

    /// Application protocol name
    pub fn protocol(&self) -> &str {
        &self.protocol
    }

    /// Committed content of a record
    pub fn record(&self, sfi: u8, record: u8) -> Option<&[u8]> {
        let index = usize::from(record).checked_sub(1)?;
        self.files.get(&sfi)?.records.get(index).map(Vec::as_slice)
    }

    /// Committed value of a counter
    pub fn counter(&self, sfi: u8, counter: u8) -> Option<u32> {
        self.files.get(&sfi)?.counter(counter)
    }

    /// Whether a secure session is open
    pub const fn in_session(&self) -> bool {
        self.session.is_some()
    }

    /// Every command received, oldest first
    pub fn commands(&self) -> &[Bytes] {
        &self.commands
    }

    /// Behave as if the application had already been selected
    pub(crate) const fn mark_selected(&mut self) {
        self.selected = true;
    }

    /// Drop the logical channel: deselect and discard any open session
    pub fn release(&mut self) {
        if self.session.take().is_some() {
            debug!("Open session discarded on channel release");
        }
        self.selected = false;
    }

    /// Process one command APDU and return the response APDU
    pub fn process(&mut self, apdu: &[u8]) -> Bytes {
        self.commands.push(Bytes::copy_from_slice(apdu));

        let response = match Command::from_bytes(apdu) {
            Ok(command) => self.dispatch(&command),
            Err(_) => Response::error(status::WRONG_LENGTH),
        };
        let raw = response.to_bytes();

        // Everything between open and close feeds the session digest
        let ins = apdu.get(1).copied();
        if let Some(session) = self.session.as_mut() {
            if !matches!(ins, Some(0x8A | 0x8E)) {
                session.digest.extend_from_slice(apdu);
                session.digest.extend_from_slice(&raw);
            }
        }

        trace!(
            command = %hex::encode_upper(apdu),
            response = %hex::encode_upper(&raw),
            "Virtual card exchange"
        );
        raw
    }

    fn dispatch(&mut self, command: &Command) -> Response {
        if let Some((ins, status)) = self.injected_failure {
            if ins == command.ins {
                self.injected_failure = None;
                return Response::error(status);
            }
        }

        if command.ins == 0xA4 {
            return self.select(command);
        }
        if !self.selected {
            return Response::error(status::CONDITIONS_NOT_SATISFIED);
        }

        let result = match command.ins {
            0xB2 => self.read_record(command),
            0xDC => self.update_record(command),
            0xE2 => self.append_record(command),
            0x32 => self.change_counter(command, true),
            0x30 => self.change_counter(command, false),
            0xCA => self.get_data(command),
            0x8A => self.open_session(command),
            0x8E => self.close_session(command),
            _ => Err(status::INVALID_INSTRUCTION),
        };

        result.unwrap_or_else(Response::error)
    }

    fn select(&mut self, command: &Command) -> Response {
        self.selected = false;
        self.session = None;

        let requested = command.data.as_deref().unwrap_or_default();
        let Some(aid) = self.aid.clone() else {
            return Response::error(status::FILE_NOT_FOUND);
        };
        if requested.is_empty() || !aid.starts_with(requested) {
            return Response::error(status::FILE_NOT_FOUND);
        }

        let fci = match self.fci(&aid) {
            Ok(fci) => fci,
            Err(e) => {
                debug!(error = ?e, "Failed to build FCI");
                return Response::error((0x6F, 0x00));
            }
        };

        self.selected = true;
        let status = if self.invalidated {
            status::INVALIDATED
        } else {
            status::SUCCESS
        };
        Response::new(Some(Bytes::from(fci)), status)
    }

    /// FCI template: DF name, then the serial number in the proprietary template
    fn fci(&self, aid: &[u8]) -> Result<Vec<u8>, iso7816_tlv::TlvError> {
        let df_name = Tlv::new(Tag::try_from(0x84u8)?, Value::Primitive(aid.to_vec()))?;
        let serial = Tlv::new(Tag::try_from(0xC7u8)?, Value::Primitive(self.serial.to_vec()))?;
        let proprietary = Tlv::new(Tag::try_from(0xA5u8)?, Value::Constructed(vec![serial]))?;
        let fci = Tlv::new(
            Tag::try_from(0x6Fu8)?,
            Value::Constructed(vec![df_name, proprietary]),
        )?;
        Ok(fci.to_vec())
    }

    fn files(&self) -> &BTreeMap<u8, ElementaryFile> {
        self.session.as_ref().map_or(&self.files, |session| &session.files)
    }

    /// Files a modification applies to, counting it against the session budget
    fn files_for_modification(&mut self) -> Result<&mut BTreeMap<u8, ElementaryFile>, StatusWord> {
        let session = self
            .session
            .as_mut()
            .ok_or(status::SECURITY_CONDITION_NOT_SATISFIED)?;
        if session.modifications == MAX_SESSION_MODIFICATIONS {
            return Err(status::SESSION_BUFFER_OVERFLOW);
        }
        session.modifications += 1;
        Ok(&mut session.files)
    }

    fn read_record(&mut self, command: &Command) -> Result<Response, StatusWord> {
        if command.p2 & 0x07 != 0x04 {
            return Err(status::INCORRECT_P1P2);
        }
        let sfi = command.p2 >> 3;
        let file = self.files().get(&sfi).ok_or(status::FILE_NOT_FOUND)?;
        let record = usize::from(command.p1)
            .checked_sub(1)
            .and_then(|index| file.records.get(index))
            .ok_or(status::RECORD_NOT_FOUND)?;
        Ok(Response::success(Some(Bytes::copy_from_slice(record))))
    }

    fn update_record(&mut self, command: &Command) -> Result<Response, StatusWord> {
        if command.p2 & 0x07 != 0x04 {
            return Err(status::INCORRECT_P1P2);
        }
        let data = command.data.clone().unwrap_or_default();
        let file = self
            .files_for_modification()?
            .get_mut(&(command.p2 >> 3))
            .ok_or(status::FILE_NOT_FOUND)?;
        file.write(command.p1, &data)?;
        Ok(Response::success(None))
    }

    fn append_record(&mut self, command: &Command) -> Result<Response, StatusWord> {
        if command.p1 != 0x00 || command.p2 & 0x07 != 0x00 {
            return Err(status::INCORRECT_P1P2);
        }
        let data = command.data.clone().unwrap_or_default();
        let file = self
            .files_for_modification()?
            .get_mut(&(command.p2 >> 3))
            .ok_or(status::FILE_NOT_FOUND)?;
        if file.kind != FileKind::Cyclic {
            return Err(status::COMMAND_INCOMPATIBLE);
        }
        if data.len() > file.record_size {
            return Err(status::WRONG_LENGTH);
        }

        let mut record = data.to_vec();
        record.resize(file.record_size, 0);
        file.records.insert(0, record);
        file.records.pop();
        Ok(Response::success(None))
    }

    fn change_counter(&mut self, command: &Command, increase: bool) -> Result<Response, StatusWord> {
        let delta = match command.data.as_deref() {
            Some([a, b, c]) => u32::from_be_bytes([0, *a, *b, *c]),
            _ => return Err(status::WRONG_LENGTH),
        };
        let file = self
            .files_for_modification()?
            .get_mut(&(command.p2 >> 3))
            .ok_or(status::FILE_NOT_FOUND)?;
        if file.kind != FileKind::Counters {
            return Err(status::COMMAND_INCOMPATIBLE);
        }

        let current = file.counter(command.p1).ok_or(status::RECORD_NOT_FOUND)?;
        let updated = if increase {
            current.checked_add(delta).filter(|v| *v <= COUNTER_MAX)
        } else {
            current.checked_sub(delta)
        }
        .ok_or(status::MEMORY_UNCHANGED)?;
        file.set_counter(command.p1, updated)?;

        Ok(Response::success(Some(Bytes::copy_from_slice(
            &updated.to_be_bytes()[1..],
        ))))
    }

    fn get_data(&mut self, command: &Command) -> Result<Response, StatusWord> {
        match (command.p1, command.p2) {
            (0x00, 0xC7) => Ok(Response::success(Some(Bytes::copy_from_slice(
                &self.serial,
            )))),
            _ => Err(status::REFERENCED_DATA_NOT_FOUND),
        }
    }

    fn open_session(&mut self, command: &Command) -> Result<Response, StatusWord> {
        if self.invalidated || self.session.is_some() {
            return Err(status::CONDITIONS_NOT_SATISFIED);
        }
        let terminal_challenge = command.data.clone().ok_or(status::WRONG_LENGTH)?;
        if terminal_challenge.len() != 4 {
            return Err(status::WRONG_LENGTH);
        }
        let key_index = command.p1 & 0x07;
        if !(1..=3).contains(&key_index) {
            return Err(status::INCORRECT_P1P2);
        }

        let record_number = command.p1 >> 3;
        let sfi = command.p2 >> 3;
        let record = if sfi == 0 {
            Vec::new()
        } else {
            let file = self.files.get(&sfi).ok_or(status::FILE_NOT_FOUND)?;
            usize::from(record_number)
                .checked_sub(1)
                .and_then(|index| file.records.get(index))
                .cloned()
                .ok_or(status::RECORD_NOT_FOUND)?
        };

        let record_len = u8::try_from(record.len()).map_err(|_| status::WRONG_LENGTH)?;

        let card_challenge: [u8; 4] = rand::random();
        let mut payload = BytesMut::with_capacity(7 + record.len());
        payload.put_slice(&card_challenge);
        payload.put_u8(0x00); // ratified
        payload.put_u8(key_index); // key version
        payload.put_u8(record_len);
        payload.put_slice(&record);
        let payload = payload.freeze();

        debug!(key_index, sfi, record_number, "Virtual card session opened");
        self.session = Some(SecureSession {
            terminal_challenge: terminal_challenge.to_vec(),
            digest: payload.to_vec(),
            files: self.files.clone(),
            modifications: 0,
        });
        Ok(Response::success(Some(payload)))
    }

    fn close_session(&mut self, command: &Command) -> Result<Response, StatusWord> {
        let Some(signature) = command.data.as_deref() else {
            if self.session.take().is_some() {
                debug!("Virtual card session aborted");
            }
            return Ok(Response::success(None));
        };

        let session = self.session.take().ok_or(status::CONDITIONS_NOT_SATISFIED)?;
        let expected = session_signature(
            &self.key,
            TERMINAL_LABEL,
            &session.terminal_challenge,
            &session.digest,
        );
        if self.verify_terminal_signature && signature != expected {
            debug!("Terminal signature rejected, session discarded");
            return Err(status::INCORRECT_SIGNATURE);
        }

        self.files = session.files;
        let card_signature = session_signature(
            &self.key,
            CARD_LABEL,
            &session.terminal_challenge,
            &session.digest,
        );
        debug!(
            modifications = session.modifications,
            "Virtual card session committed"
        );
        Ok(Response::success(Some(Bytes::copy_from_slice(&card_signature))))
    }
}

impl CardTransport for VirtualCard {
    fn do_transmit_raw(&mut self, command: &[u8]) -> Result<Bytes, Error> {
        Ok(self.process(command))
    }

    fn is_connected(&self) -> bool {
        true
    }

    fn release_channel(&mut self) -> Result<(), Error> {
        self.release();
        Ok(())
    }
}
