use validator_apdu_core::prelude::*;

use super::{CLA_ISO, check_status, record_p2};
use crate::CommandError;

/// UPDATE RECORD, replacing the whole content of one record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateRecordCommand {
    sfi: u8,
    record: u8,
    data: Bytes,
}

impl UpdateRecordCommand {
    /// Overwrite `record` of the file `sfi` with `data`
    pub fn new(sfi: u8, record: u8, data: impl Into<Bytes>) -> Self {
        Self {
            sfi,
            record,
            data: data.into(),
        }
    }
}

impl ApduCommand for UpdateRecordCommand {
    type Success = ();
    type Error = CommandError;

    fn class(&self) -> u8 {
        CLA_ISO
    }

    fn instruction(&self) -> u8 {
        0xDC
    }

    fn p1(&self) -> u8 {
        self.record
    }

    fn p2(&self) -> u8 {
        record_p2(self.sfi)
    }

    fn data(&self) -> Option<&[u8]> {
        Some(&self.data)
    }

    fn expected_length(&self) -> Option<ExpectedLength> {
        None
    }

    fn parse_response(response: Response) -> Result<Self::Success, Self::Error> {
        check_status("UPDATE RECORD", &response)
    }
}
