use std::time::Duration;

use hex_literal::hex;
use validator_apdu_reader::ReaderError;
use validator_apdu_reader::sim::{PO_READER_NAME, SAM_READER_NAME, VirtualBackend, VirtualReader};
use validator_app::{CardReaderResponse, InitError, Status, Validator, ValidatorConfig};
use validator_calypso::TransactionStatus;
use validator_calypso::constants::{TICKET_COUNTER, sfi};
use validator_calypso::sim::{banking_card, blank_card, counter_card, mifare_card, navigo_card, season_card};

const SERIAL: [u8; 8] = hex!("0000000011223344");
const RESULT_TIMEOUT: Duration = Duration::from_secs(5);

fn start(backend: VirtualBackend) -> (Validator, VirtualReader) {
    let reader = backend.reader();
    let validator = Validator::start(backend, &ValidatorConfig::default()).unwrap();
    (validator, reader)
}

fn next_response(validator: &Validator) -> CardReaderResponse {
    validator.responses().recv_timeout(RESULT_TIMEOUT).unwrap()
}

#[test]
fn empty_counter_card() {
    let (validator, reader) = start(VirtualBackend::new());
    reader.insert_card(blank_card(SERIAL));

    assert_eq!(
        next_response(&validator),
        CardReaderResponse::new(Status::EmptyCard, 0, "", "CALYPSO")
    );
}

#[test]
fn counter_card_with_three_tickets() {
    let (validator, reader) = start(VirtualBackend::new());
    reader.insert_card(counter_card(SERIAL, "John Smith", 3));

    assert_eq!(
        next_response(&validator),
        CardReaderResponse::new(Status::TicketsFound, 2, "", "CALYPSO")
    );
    let card = reader.remove_card().unwrap();
    assert_eq!(card.counter(sfi::COUNTER, TICKET_COUNTER), Some(2));
}

#[test]
fn season_contract_card() {
    let (validator, reader) = start(VirtualBackend::new());
    reader.insert_card(season_card(SERIAL, "Harry Potter", "1 MONTH SEASON TICKET"));

    assert_eq!(
        next_response(&validator),
        CardReaderResponse::new(Status::TicketsFound, 0, "1 MONTH SEASON TICKET", "CALYPSO")
    );
}

#[test]
fn other_networks_are_invalid_cards() {
    let (validator, reader) = start(VirtualBackend::new());

    for (card, label) in [
        (banking_card(SERIAL), "EMV"),
        (navigo_card(SERIAL), "NAVIGO"),
        (mifare_card(), "MIFARE Classic"),
    ] {
        reader.insert_card(card);
        assert_eq!(
            next_response(&validator),
            CardReaderResponse::status(Status::InvalidCard, label)
        );
        reader.remove_card();
    }
}

#[test]
fn legacy_protocol_can_be_disabled() {
    let reader_backend = VirtualBackend::new();
    let reader = reader_backend.reader();
    let config = ValidatorConfig {
        legacy_protocol: false,
        ..ValidatorConfig::default()
    };
    let validator = Validator::start(reader_backend, &config).unwrap();

    reader.insert_card(mifare_card());
    assert_eq!(
        next_response(&validator),
        CardReaderResponse::status(Status::InvalidCard, "")
    );
}

#[test]
fn each_presence_after_removal_is_evaluated() {
    let (validator, reader) = start(VirtualBackend::new());

    reader.insert_card(counter_card(SERIAL, "John Smith", 2));
    assert_eq!(next_response(&validator).tickets_remaining, 1);
    let card = reader.remove_card().unwrap();

    reader.insert_card(card);
    assert_eq!(next_response(&validator).tickets_remaining, 0);
    let card = reader.remove_card().unwrap();

    reader.insert_card(card);
    assert_eq!(next_response(&validator).status, Status::EmptyCard);
}

#[test]
fn operator_loads_tickets_on_the_card_in_the_field() {
    let (validator, reader) = start(VirtualBackend::new());
    reader.insert_card(counter_card(SERIAL, "John Smith", 0));
    assert_eq!(next_response(&validator).status, Status::EmptyCard);

    assert_eq!(validator.load_tickets(4), Ok(TransactionStatus::Ok));
    assert_eq!(
        reader.with_card(|card| card.counter(sfi::COUNTER, TICKET_COUNTER)),
        Some(Some(4))
    );
}

#[test]
fn operations_without_a_card_fail() {
    let (validator, _reader) = start(VirtualBackend::new());

    assert_eq!(validator.load_contract(), Ok(TransactionStatus::SessionError));
}

#[test]
fn reader_names_are_reported() {
    let (validator, _reader) = start(VirtualBackend::new());
    assert_eq!(validator.po_reader(), PO_READER_NAME);
    assert_eq!(validator.sam_reader(), Some(SAM_READER_NAME));

    let (validator, _reader) = start(VirtualBackend::new().without_sam());
    assert_eq!(validator.sam_reader(), None);
}

#[test]
fn missing_sam_fails_when_required() {
    let config = ValidatorConfig {
        require_sam: true,
        ..ValidatorConfig::default()
    };
    let result = Validator::start(VirtualBackend::new().without_sam(), &config);

    assert!(matches!(result, Err(InitError::SamRequired)));
}

#[test]
fn slow_registration_times_out() {
    let config = ValidatorConfig {
        init_timeout_ms: 50,
        ..ValidatorConfig::default()
    };
    let backend = VirtualBackend::new().with_registration_delay(Duration::from_millis(500));
    let result = Validator::start(backend, &config);

    assert!(matches!(
        result,
        Err(InitError::Reader(ReaderError::RegistrationTimeout { .. }))
    ));
}

#[test]
fn unknown_reader_name_fails() {
    let config = ValidatorConfig {
        po_reader: Some("ACS ACR122U".to_string()),
        ..ValidatorConfig::default()
    };
    let result = Validator::start(VirtualBackend::new(), &config);

    assert!(matches!(
        result,
        Err(InitError::Reader(ReaderError::ReaderNotFound(name))) if name == "ACS ACR122U"
    ));
}
