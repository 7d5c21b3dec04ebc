use validator_apdu_core::prelude::*;

use super::{CLA_ISO, check_status};
use crate::CommandError;
use crate::constants::tags;

/// GET DATA of the application serial number
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GetSerialNumberCommand;

impl ApduCommand for GetSerialNumberCommand {
    type Success = Bytes;
    type Error = CommandError;

    fn class(&self) -> u8 {
        CLA_ISO
    }

    fn instruction(&self) -> u8 {
        0xCA
    }

    fn p1(&self) -> u8 {
        0x00
    }

    fn p2(&self) -> u8 {
        tags::SERIAL_NUMBER
    }

    fn data(&self) -> Option<&[u8]> {
        None
    }

    fn expected_length(&self) -> Option<ExpectedLength> {
        Some(0x00)
    }

    fn parse_response(response: Response) -> Result<Self::Success, Self::Error> {
        check_status("GET DATA", &response)?;
        match response.payload() {
            Some(serial) if !serial.is_empty() => Ok(serial.clone()),
            _ => Err(CommandError::Malformed {
                command: "GET DATA",
                reason: "empty serial number",
            }),
        }
    }
}
