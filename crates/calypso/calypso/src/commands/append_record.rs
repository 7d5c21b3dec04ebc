use validator_apdu_core::prelude::*;

use super::{CLA_ISO, check_status};
use crate::CommandError;

/// APPEND RECORD to a cyclic file
///
/// The new record becomes record 1 and the oldest record is dropped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppendRecordCommand {
    sfi: u8,
    data: Bytes,
}

impl AppendRecordCommand {
    /// Append `data` to the file `sfi`
    pub fn new(sfi: u8, data: impl Into<Bytes>) -> Self {
        Self {
            sfi,
            data: data.into(),
        }
    }
}

impl ApduCommand for AppendRecordCommand {
    type Success = ();
    type Error = CommandError;

    fn class(&self) -> u8 {
        CLA_ISO
    }

    fn instruction(&self) -> u8 {
        0xE2
    }

    fn p1(&self) -> u8 {
        0x00
    }

    fn p2(&self) -> u8 {
        self.sfi << 3
    }

    fn data(&self) -> Option<&[u8]> {
        Some(&self.data)
    }

    fn expected_length(&self) -> Option<ExpectedLength> {
        None
    }

    fn parse_response(response: Response) -> Result<Self::Success, Self::Error> {
        check_status("APPEND RECORD", &response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hex_literal::hex;

    #[test]
    fn encodes_sfi_without_record_number() {
        let command = AppendRecordCommand::new(0x08, Bytes::from_static(b"LOG"));
        assert_eq!(command.to_bytes().unwrap().as_ref(), &hex!("00E20040034C4F47"));
    }
}
