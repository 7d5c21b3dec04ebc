use hex_literal::hex;
use validator_apdu_reader::SamReader;
use validator_apdu_reader::sim::{VirtualReader, VirtualSam, VirtualSamReader};
use validator_calypso::constants::{CALYPSO_AID, TICKET_COUNTER, sfi};
use validator_calypso::sim::counter_card;
use validator_calypso::{
    AccessLevel, CalypsoCard, CounterOp, TransactionError, TransactionSession, TransactionStatus,
};

const SERIAL: [u8; 8] = hex!("0000000011223344");
const OTHER_SERIAL: [u8; 8] = hex!("00000000AABBCCDD");

fn calypso() -> CalypsoCard {
    CalypsoCard::new(CALYPSO_AID, SERIAL.to_vec())
}

#[test]
fn session_through_reader_and_sam_reader() {
    let reader = VirtualReader::new("PO");
    reader.insert_card(counter_card(SERIAL, "John Smith", 2));
    let mut sam_reader = VirtualSamReader::new("SAM", VirtualSam::default());

    let mut transport = reader.clone();
    let mut channel = sam_reader.open_channel().unwrap();
    let mut session = TransactionSession::open(
        &mut transport,
        &calypso(),
        AccessLevel::Load,
        Some(channel.as_mut()),
    )
    .unwrap();

    assert_eq!(session.read_counter(sfi::COUNTER, TICKET_COUNTER).unwrap(), Some(2));
    session
        .mutate_counter(sfi::COUNTER, TICKET_COUNTER, 10, CounterOp::Increase)
        .unwrap();
    session.close().unwrap();

    assert_eq!(
        reader.with_card(|card| card.counter(sfi::COUNTER, TICKET_COUNTER)),
        Some(Some(12))
    );
    assert_eq!(sam_reader.sam().signatures(), 1);
}

#[test]
fn swapped_card_is_never_written() {
    let reader = VirtualReader::new("PO");
    reader.insert_card(counter_card(SERIAL, "John Smith", 5).without_signature_check());

    let mut transport = reader.clone();
    let mut session =
        TransactionSession::open(&mut transport, &calypso(), AccessLevel::Debit, None).unwrap();
    session.read_counter(sfi::COUNTER, TICKET_COUNTER).unwrap();
    session
        .mutate_counter(sfi::COUNTER, TICKET_COUNTER, 1, CounterOp::Decrease)
        .unwrap();

    // The next GET DATA reaches another card
    reader.schedule_swap(0xCA, counter_card(OTHER_SERIAL, "Jane Doe", 5).without_signature_check());
    let error = session.close().unwrap_err();

    assert!(matches!(error, TransactionError::CardSwitched { .. }));
    assert_eq!(error.status(), TransactionStatus::CardSwitched);

    let ejected = reader.take_ejected();
    assert_eq!(ejected.len(), 1);
    assert_eq!(ejected[0].counter(sfi::COUNTER, TICKET_COUNTER), Some(5));
    assert_eq!(
        reader.with_card(|card| (card.counter(sfi::COUNTER, TICKET_COUNTER), card.in_session())),
        Some((Some(5), false))
    );
}

#[test]
fn foreign_sam_is_rejected_by_the_card() {
    let reader = VirtualReader::new("PO");
    reader.insert_card(counter_card(SERIAL, "John Smith", 5));
    let mut sam = VirtualSam::with_master_key(*b"another-master-k");

    let mut transport = reader.clone();
    let mut session =
        TransactionSession::open(&mut transport, &calypso(), AccessLevel::Debit, Some(&mut sam))
            .unwrap();
    session
        .mutate_counter(sfi::COUNTER, TICKET_COUNTER, 1, CounterOp::Decrease)
        .unwrap();
    let error = session.close().unwrap_err();

    assert!(matches!(error, TransactionError::Card { step: "closing", .. }));
    assert_eq!(
        reader.with_card(|card| card.counter(sfi::COUNTER, TICKET_COUNTER)),
        Some(Some(5))
    );
}

#[test]
fn removed_card_fails_the_session() {
    let reader = VirtualReader::new("PO");
    reader.insert_card(counter_card(SERIAL, "John Smith", 5).without_signature_check());

    let mut transport = reader.clone();
    let mut session =
        TransactionSession::open(&mut transport, &calypso(), AccessLevel::Debit, None).unwrap();
    let removed = reader.remove_card().unwrap();

    let error = session.read_record(sfi::COUNTER, 1).unwrap_err();
    assert_eq!(error.status(), TransactionStatus::SessionError);
    assert!(removed.in_session());
    drop(session);
}
