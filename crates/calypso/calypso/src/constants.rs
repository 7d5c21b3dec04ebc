//! Identifiers and layout of the ticketing application

/// Calypso transit application AID ("1TIC.ICA1")
pub const CALYPSO_AID: &[u8] = b"\x31\x54\x49\x43\x2E\x49\x43\x41\x31";
/// Banking payment system environment AID ("2PAY.SYS.DDF01")
pub const BANKING_AID: &[u8] = b"\x32\x50\x41\x59\x2E\x53\x59\x53\x2E\x44\x44\x46\x30\x31";
/// Secondary transit application AID
pub const NAVIGO_AID: &[u8] = b"\xA0\x00\x00\x04\x04\x01\x25\x09\x01\x01";

/// Short file identifiers of the ticketing application
pub mod sfi {
    /// Environment and holder file (linear)
    pub const ENVIRONMENT_AND_HOLDER: u8 = 0x07;
    /// Event log file (cyclic)
    pub const EVENT_LOG: u8 = 0x08;
    /// Contracts file (linear)
    pub const CONTRACTS: u8 = 0x09;
    /// Counters file, one record of 3-byte counters
    pub const COUNTER: u8 = 0x19;
}

/// Record number used for every file of the ticketing application
pub const RECORD_NUMBER_1: u8 = 1;

/// Counter holding the ticket balance
pub const TICKET_COUNTER: u8 = 1;

/// Size of every record of the ticketing application
pub const RECORD_SIZE: usize = 29;

/// Size of one counter inside the counters record
pub const COUNTER_SIZE: usize = 3;

/// Largest value a 3-byte counter holds
pub const COUNTER_MAX: u32 = 0x00FF_FFFF;

/// Number of records in the event log file
pub const EVENT_LOG_RECORDS: usize = 3;

/// Number of records in the contracts file
pub const CONTRACT_RECORDS: usize = 4;

/// Tags found in the FCI returned by SELECT APPLICATION
pub mod tags {
    /// File control information template
    pub const FCI_TEMPLATE: u8 = 0x6F;
    /// Dedicated file name (the application AID)
    pub const DF_NAME: u8 = 0x84;
    /// Proprietary information template
    pub const PROPRIETARY: u8 = 0xA5;
    /// Application serial number
    pub const SERIAL_NUMBER: u8 = 0xC7;
}

/// Card type labels surfaced with every result
pub mod labels {
    /// Primary Calypso transit application
    pub const CALYPSO: &str = "CALYPSO";
    /// Generic contactless card seen through the legacy protocol
    pub const MIFARE_CLASSIC: &str = "MIFARE Classic";
    /// Banking card
    pub const EMV: &str = "EMV";
    /// Secondary transit application
    pub const NAVIGO: &str = "NAVIGO";
    /// Anything else
    pub const OTHER: &str = "OTHER";
}
