//! Selected Calypso application and its decoded content

use std::collections::BTreeMap;

use bytes::Bytes;

use crate::constants::{COUNTER_SIZE, RECORD_NUMBER_1, TICKET_COUNTER};

/// The Calypso application found on a card by the default selection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CalypsoCard {
    aid: Bytes,
    serial_number: Bytes,
}

impl CalypsoCard {
    /// Application `aid` with serial number `serial_number`
    pub fn new(aid: impl Into<Bytes>, serial_number: impl Into<Bytes>) -> Self {
        Self {
            aid: aid.into(),
            serial_number: serial_number.into(),
        }
    }

    /// Full AID of the application
    pub const fn aid(&self) -> &Bytes {
        &self.aid
    }

    /// Application serial number
    pub const fn serial_number(&self) -> &Bytes {
        &self.serial_number
    }

    /// Serial number in upper-case hex, as logged
    pub fn serial_hex(&self) -> String {
        hex::encode_upper(&self.serial_number)
    }
}

/// Decoded view of the records read during selection
///
/// Built once per selection and never mutated afterwards: a new selection
/// produces a new value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CardContent {
    environment: Bytes,
    contracts: BTreeMap<u8, Bytes>,
    counters: BTreeMap<u8, u32>,
    events: Vec<Bytes>,
}

impl CardContent {
    /// Set the environment and holder record
    pub fn with_environment(mut self, record: impl Into<Bytes>) -> Self {
        self.environment = record.into();
        self
    }

    /// Set contract record `record`
    pub fn with_contract(mut self, record: u8, data: impl Into<Bytes>) -> Self {
        self.contracts.insert(record, data.into());
        self
    }

    /// Decode the counters record
    pub fn with_counters_record(mut self, record: &[u8]) -> Self {
        self.counters = decode_counters(record);
        self
    }

    /// Add an event log record, most recent first
    pub fn with_event(mut self, record: impl Into<Bytes>) -> Self {
        self.events.push(record.into());
        self
    }

    /// Environment and holder record
    pub const fn environment(&self) -> &Bytes {
        &self.environment
    }

    /// Holder name stored in the environment record
    pub fn holder_name(&self) -> String {
        record_text(&self.environment)
    }

    /// Contract records by record number
    pub const fn contracts(&self) -> &BTreeMap<u8, Bytes> {
        &self.contracts
    }

    /// Contract label of the first contract record, trailing padding removed
    ///
    /// Empty when the record was not read or holds nothing.
    pub fn contract_label(&self) -> String {
        self.contracts
            .get(&RECORD_NUMBER_1)
            .map(|record| record_text(record))
            .unwrap_or_default()
    }

    /// Counter values by counter number
    pub const fn counters(&self) -> &BTreeMap<u8, u32> {
        &self.counters
    }

    /// Value of counter `number`
    pub fn counter(&self, number: u8) -> Option<u32> {
        self.counters.get(&number).copied()
    }

    /// Ticket balance
    pub fn tickets(&self) -> Option<u32> {
        self.counter(TICKET_COUNTER)
    }

    /// Event log records, most recent first
    pub fn events(&self) -> &[Bytes] {
        &self.events
    }
}

/// Decode a counters record: consecutive 3-byte big-endian values, numbered
/// from 1. Trailing bytes that do not form a whole counter are ignored.
pub fn decode_counters(record: &[u8]) -> BTreeMap<u8, u32> {
    record
        .chunks_exact(COUNTER_SIZE)
        .zip(1u8..)
        .map(|(slot, number)| (number, u32::from_be_bytes([0, slot[0], slot[1], slot[2]])))
        .collect()
}

/// Text of a record with trailing NUL and space padding removed
pub fn record_text(record: &[u8]) -> String {
    String::from_utf8_lossy(record)
        .trim_end_matches(['\0', ' '])
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use hex_literal::hex;

    #[test]
    fn counters_are_numbered_from_one() {
        let counters = decode_counters(&hex!("000003 000100 FFFFFF 00"));
        assert_eq!(counters.len(), 3);
        assert_eq!(counters[&1], 3);
        assert_eq!(counters[&2], 256);
        assert_eq!(counters[&3], 0x00FF_FFFF);
    }

    #[test]
    fn contract_label_drops_padding() {
        let mut record = b"1 MONTH SEASON TICKET".to_vec();
        record.resize(29, b' ');
        let content = CardContent::default().with_contract(1, record);
        assert_eq!(content.contract_label(), "1 MONTH SEASON TICKET");

        let content = CardContent::default().with_contract(1, vec![0u8; 29]);
        assert_eq!(content.contract_label(), "");
        assert_eq!(CardContent::default().contract_label(), "");
    }

    #[test]
    fn tickets_read_counter_one() {
        let content = CardContent::default().with_counters_record(&hex!("000005000000"));
        assert_eq!(content.tickets(), Some(5));
        assert_eq!(content.counter(3), None);
    }
}
