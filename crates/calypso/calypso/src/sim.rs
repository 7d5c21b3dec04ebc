//! Ready-made virtual cards laid out like the ticketing application
//!
//! The cards are built on [`VirtualCard`] with the files the validator reads
//! and writes: the environment and contracts files (linear), the event log
//! (cyclic) and the counters file.

use validator_apdu_reader::CardProtocol;
use validator_apdu_reader::sim::VirtualCard;

use crate::constants::{
    BANKING_AID, CALYPSO_AID, CONTRACT_RECORDS, EVENT_LOG_RECORDS, NAVIGO_AID, RECORD_NUMBER_1,
    RECORD_SIZE, TICKET_COUNTER, sfi,
};

/// ATR of a MIFARE Classic 1K tag as reported through PC/SC
const MIFARE_ATR: [u8; 20] = [
    0x3B, 0x8F, 0x80, 0x01, 0x80, 0x4F, 0x0C, 0xA0, 0x00, 0x00, 0x03, 0x06, 0x03, 0x00, 0x01,
    0x00, 0x00, 0x00, 0x00, 0x6A,
];

/// Calypso card with the ticketing files and nothing written in them
pub fn blank_card(serial: [u8; 8]) -> VirtualCard {
    VirtualCard::new(CALYPSO_AID, serial)
        .with_linear_file(sfi::ENVIRONMENT_AND_HOLDER, RECORD_SIZE, 1)
        .with_linear_file(sfi::CONTRACTS, RECORD_SIZE, CONTRACT_RECORDS)
        .with_cyclic_file(sfi::EVENT_LOG, RECORD_SIZE, EVENT_LOG_RECORDS)
        .with_counter_file(sfi::COUNTER, RECORD_SIZE)
}

/// Personalized counter card holding `tickets` tickets
pub fn counter_card(serial: [u8; 8], holder: &str, tickets: u32) -> VirtualCard {
    blank_card(serial)
        .with_record(sfi::ENVIRONMENT_AND_HOLDER, RECORD_NUMBER_1, holder.as_bytes())
        .with_record(sfi::CONTRACTS, RECORD_NUMBER_1, b"NO CONTRACT")
        .with_counter(sfi::COUNTER, TICKET_COUNTER, tickets)
}

/// Personalized card holding a season pass labelled `contract`
pub fn season_card(serial: [u8; 8], holder: &str, contract: &str) -> VirtualCard {
    blank_card(serial)
        .with_record(sfi::ENVIRONMENT_AND_HOLDER, RECORD_NUMBER_1, holder.as_bytes())
        .with_record(sfi::CONTRACTS, RECORD_NUMBER_1, contract.as_bytes())
}

/// Card answering only the banking application
pub fn banking_card(serial: [u8; 8]) -> VirtualCard {
    VirtualCard::new(BANKING_AID, serial)
}

/// Card answering only the secondary transit application
pub fn navigo_card(serial: [u8; 8]) -> VirtualCard {
    VirtualCard::new(NAVIGO_AID, serial)
}

/// MIFARE Classic tag, detected through the legacy contactless protocol
pub fn mifare_card() -> VirtualCard {
    VirtualCard::without_application(CardProtocol::MIFARE_CLASSIC, MIFARE_ATR.to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::card::record_text;

    #[test]
    fn counter_card_layout() {
        let card = counter_card([1; 8], "John Smith", 7);
        assert_eq!(card.counter(sfi::COUNTER, TICKET_COUNTER), Some(7));
        assert_eq!(card.record(sfi::CONTRACTS, 1).map(record_text).as_deref(), Some("NO CONTRACT"));
        assert_eq!(card.record(sfi::EVENT_LOG, 1).map(<[u8]>::len), Some(RECORD_SIZE));
    }

    #[test]
    fn mifare_card_has_no_application() {
        assert_eq!(mifare_card().protocol(), CardProtocol::MIFARE_CLASSIC);
    }
}
