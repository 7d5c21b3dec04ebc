use chrono::{NaiveDate, NaiveDateTime};
use hex_literal::hex;
use validator_apdu_reader::sim::{VirtualBackend, VirtualCard, VirtualReader};
use validator_apdu_reader::{PollingMode, ReaderBackend, ReaderEventReceiver, reader_event_channel};
use validator_app::ticketing::{log_record, pad_record, parse_log_record};
use validator_app::{Profile, Ticketing, TicketingSession};
use validator_calypso::constants::{COUNTER_MAX, RECORD_SIZE, TICKET_COUNTER, sfi};
use validator_calypso::sim::{banking_card, blank_card, counter_card, season_card};
use validator_calypso::{CardType, TransactionStatus};

const SERIAL: [u8; 8] = hex!("0000000011223344");
const OTHER_SERIAL: [u8; 8] = hex!("00000000AABBCCDD");

fn fixed_clock() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2022, 10, 14)
        .and_then(|date| date.and_hms_opt(8, 30, 0))
        .unwrap()
}

struct Bench {
    reader: VirtualReader,
    session: TicketingSession,
    events: ReaderEventReceiver,
}

impl Bench {
    fn new(mut backend: VirtualBackend) -> Self {
        backend.register().unwrap();
        let reader = backend.reader();
        let po_reader = backend.po_reader(None).unwrap();
        let sam_reader = backend.sam_reader(None).unwrap();
        let iso = backend.contactless_iso_protocol();
        let legacy = backend.contactless_legacy_protocol();

        let mut session = TicketingSession::new(po_reader, sam_reader, &iso, legacy.as_ref())
            .with_clock(fixed_clock);
        let (tx, events) = reader_event_channel();
        session.start_detection(tx, PollingMode::Repeating).unwrap();
        Self { reader, session, events }
    }

    /// Present `card` and run the default selection processing
    fn present(&mut self, card: VirtualCard) {
        self.reader.insert_card(card);
        let event = self.events.try_recv().unwrap();
        self.session.process_default_selection(event.selection.as_ref());
    }

    fn counter(&self) -> Option<u32> {
        self.reader
            .with_card(|card| card.counter(sfi::COUNTER, TICKET_COUNTER))
            .flatten()
    }

    fn record(&self, sfi: u8, record: u8) -> Vec<u8> {
        self.reader
            .with_card(|card| card.record(sfi, record).map(<[u8]>::to_vec))
            .flatten()
            .unwrap()
    }
}

#[test]
fn load_adds_count_and_appends_one_log_record() {
    let mut bench = Bench::new(VirtualBackend::new());
    bench.present(counter_card(SERIAL, "John Smith", 2));
    assert_eq!(bench.session.card_type(), Some(CardType::Calypso));

    assert_eq!(bench.session.load_tickets(5), TransactionStatus::Ok);

    assert_eq!(bench.counter(), Some(7));
    assert_eq!(
        bench.record(sfi::EVENT_LOG, 1),
        log_record(fixed_clock(), "OP = +5").to_vec()
    );
    assert_eq!(bench.record(sfi::EVENT_LOG, 2), vec![0u8; RECORD_SIZE]);
}

#[test]
fn season_renewal_logs_t1() {
    let mut bench = Bench::new(VirtualBackend::new());
    bench.present(season_card(SERIAL, "Harry Potter", "1 MONTH SEASON TICKET"));

    assert_eq!(bench.session.load_tickets(0), TransactionStatus::Ok);

    assert_eq!(bench.counter(), Some(0));
    let (timestamp, tag) = parse_log_record(&bench.record(sfi::EVENT_LOG, 1)).unwrap();
    assert_eq!(timestamp, fixed_clock());
    assert_eq!(tag, "T1");
}

#[test]
fn debit_always_takes_one_ticket() {
    let mut bench = Bench::new(VirtualBackend::new());
    bench.present(counter_card(SERIAL, "John Smith", 3));

    assert_eq!(bench.session.debit_tickets(5), TransactionStatus::Ok);
    assert_eq!(bench.counter(), Some(2));

    assert_eq!(bench.session.debit_tickets(1), TransactionStatus::Ok);
    assert_eq!(bench.counter(), Some(1));
}

#[test]
fn debit_below_zero_is_a_session_error() {
    let mut bench = Bench::new(VirtualBackend::new());
    bench.present(counter_card(SERIAL, "John Smith", 0));

    assert_eq!(bench.session.debit_tickets(1), TransactionStatus::SessionError);
    assert_eq!(bench.counter(), Some(0));
}

#[test]
fn load_beyond_counter_max_is_a_session_error() {
    let mut bench = Bench::new(VirtualBackend::new());
    bench.present(counter_card(SERIAL, "John Smith", COUNTER_MAX - 0x0F));

    assert_eq!(bench.session.load_tickets(0x20), TransactionStatus::SessionError);
    assert_eq!(bench.counter(), Some(COUNTER_MAX - 0x0F));
    assert_eq!(bench.record(sfi::EVENT_LOG, 1), vec![0u8; RECORD_SIZE]);

    assert_eq!(bench.session.load_tickets(0x0F), TransactionStatus::Ok);
    assert_eq!(bench.counter(), Some(COUNTER_MAX));
}

#[test]
fn switched_card_keeps_its_counter() {
    let mut bench = Bench::new(VirtualBackend::new());
    bench.present(counter_card(SERIAL, "John Smith", 3));

    // The serial check at close reaches another card
    bench.reader.schedule_swap(0xCA, counter_card(OTHER_SERIAL, "Jane Doe", 3));
    assert_eq!(bench.session.debit_tickets(1), TransactionStatus::CardSwitched);

    let ejected = bench.reader.take_ejected();
    assert_eq!(ejected.len(), 1);
    assert_eq!(ejected[0].counter(sfi::COUNTER, TICKET_COUNTER), Some(3));
    assert_eq!(bench.counter(), Some(3));
}

#[test]
fn load_contract_writes_the_season_ticket() {
    let mut bench = Bench::new(VirtualBackend::new());
    bench.present(counter_card(SERIAL, "John Smith", 4));

    assert_eq!(bench.session.load_contract(), TransactionStatus::Ok);

    assert_eq!(bench.record(sfi::CONTRACTS, 1), pad_record("1 MONTH SEASON TICKET").to_vec());
    assert_eq!(
        bench.record(sfi::EVENT_LOG, 1),
        log_record(fixed_clock(), "OP = +ST").to_vec()
    );
    assert_eq!(bench.counter(), Some(4));
}

#[test]
fn personalize_counter_card() {
    let mut bench = Bench::new(VirtualBackend::new());
    bench.present(blank_card(SERIAL));

    assert_eq!(bench.session.personalize(Profile::CounterCard), TransactionStatus::Ok);

    assert_eq!(bench.record(sfi::ENVIRONMENT_AND_HOLDER, 1), pad_record("John Smith").to_vec());
    assert_eq!(bench.record(sfi::CONTRACTS, 1), pad_record("NO CONTRACT").to_vec());
    assert_eq!(
        bench.record(sfi::EVENT_LOG, 1),
        log_record(fixed_clock(), "OP = PERSO").to_vec()
    );
    assert_eq!(bench.counter(), Some(0));
}

#[test]
fn unsigned_sessions_without_sam() {
    let mut bench = Bench::new(VirtualBackend::new().without_sam());
    bench.present(counter_card(SERIAL, "John Smith", 1).without_signature_check());

    assert_eq!(bench.session.load_tickets(2), TransactionStatus::Ok);
    assert_eq!(bench.counter(), Some(3));
}

#[test]
fn operations_need_a_calypso_selection() {
    let mut bench = Bench::new(VirtualBackend::new());
    bench.present(banking_card(SERIAL));

    assert_eq!(bench.session.card_type_label(), "EMV");
    assert_eq!(bench.session.load_tickets(1), TransactionStatus::SessionError);

    bench.session.clear_selection();
    assert_eq!(bench.session.card_type_label(), "OTHER");
}
