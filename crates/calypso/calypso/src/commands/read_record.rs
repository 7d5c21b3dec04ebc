use validator_apdu_core::prelude::*;

use super::{CLA_ISO, check_status, record_p2};
use crate::CommandError;

/// READ RECORD of one record, addressed by SFI
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadRecordCommand {
    sfi: u8,
    record: u8,
}

impl ReadRecordCommand {
    /// Read `record` of the file `sfi`
    pub const fn new(sfi: u8, record: u8) -> Self {
        Self { sfi, record }
    }

    /// File read
    pub const fn sfi(&self) -> u8 {
        self.sfi
    }

    /// Record read
    pub const fn record(&self) -> u8 {
        self.record
    }
}

impl ApduCommand for ReadRecordCommand {
    type Success = Bytes;
    type Error = CommandError;

    fn class(&self) -> u8 {
        CLA_ISO
    }

    fn instruction(&self) -> u8 {
        0xB2
    }

    fn p1(&self) -> u8 {
        self.record
    }

    fn p2(&self) -> u8 {
        record_p2(self.sfi)
    }

    fn data(&self) -> Option<&[u8]> {
        None
    }

    fn expected_length(&self) -> Option<ExpectedLength> {
        Some(0x00)
    }

    fn parse_response(response: Response) -> Result<Self::Success, Self::Error> {
        check_status("READ RECORD", &response)?;
        Ok(response.payload().clone().unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hex_literal::hex;

    #[test]
    fn addresses_record_by_sfi() {
        let command = ReadRecordCommand::new(0x19, 1);
        assert_eq!(command.to_bytes().unwrap().as_ref(), &hex!("00B201CC00"));
    }

    #[test]
    fn record_not_found_is_an_error() {
        let result = ReadRecordCommand::parse_response_raw(Bytes::from_static(&hex!("6A83")));
        let error = result.unwrap_err();
        assert!(error.status_word().unwrap().is_record_not_found());
    }
}
