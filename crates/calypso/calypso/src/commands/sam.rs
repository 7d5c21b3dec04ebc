//! SAM commands computing and checking session signatures

use validator_apdu_core::prelude::*;

use super::{CLA_CALYPSO, CLA_ISO, check_status};
use crate::CommandError;

fn signature(command: &'static str, response: &Response) -> Result<[u8; 4], CommandError> {
    check_status(command, response)?;
    <[u8; 4]>::try_from(response.data()).map_err(|_| CommandError::Malformed {
        command,
        reason: "expected 4 bytes",
    })
}

/// SELECT DIVERSIFIER: derive the card key from the card serial number
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectDiversifierCommand {
    serial_number: Bytes,
}

impl SelectDiversifierCommand {
    /// Diversify with `serial_number`
    pub fn new(serial_number: impl Into<Bytes>) -> Self {
        Self {
            serial_number: serial_number.into(),
        }
    }
}

impl ApduCommand for SelectDiversifierCommand {
    type Success = ();
    type Error = CommandError;

    fn class(&self) -> u8 {
        CLA_CALYPSO
    }

    fn instruction(&self) -> u8 {
        0x14
    }

    fn p1(&self) -> u8 {
        0x00
    }

    fn p2(&self) -> u8 {
        0x00
    }

    fn data(&self) -> Option<&[u8]> {
        Some(&self.serial_number)
    }

    fn expected_length(&self) -> Option<ExpectedLength> {
        None
    }

    fn parse_response(response: Response) -> Result<Self::Success, Self::Error> {
        check_status("SELECT DIVERSIFIER", &response)
    }
}

/// GET CHALLENGE: a 4-byte terminal challenge
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GetChallengeCommand;

impl ApduCommand for GetChallengeCommand {
    type Success = [u8; 4];
    type Error = CommandError;

    fn class(&self) -> u8 {
        CLA_ISO
    }

    fn instruction(&self) -> u8 {
        0x84
    }

    fn p1(&self) -> u8 {
        0x00
    }

    fn p2(&self) -> u8 {
        0x00
    }

    fn data(&self) -> Option<&[u8]> {
        None
    }

    fn expected_length(&self) -> Option<ExpectedLength> {
        Some(0x04)
    }

    fn parse_response(response: Response) -> Result<Self::Success, Self::Error> {
        signature("GET CHALLENGE", &response)
    }
}

/// DIGEST INIT: start the session digest with the open response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DigestInitCommand {
    data: Bytes,
}

impl DigestInitCommand {
    /// Start a digest for key version `kvc` and the open response data
    pub fn new(kvc: u8, open_response: &[u8]) -> Self {
        let mut data = BytesMut::with_capacity(1 + open_response.len());
        data.extend_from_slice(&[kvc]);
        data.extend_from_slice(open_response);
        Self {
            data: data.freeze(),
        }
    }
}

impl ApduCommand for DigestInitCommand {
    type Success = ();
    type Error = CommandError;

    fn class(&self) -> u8 {
        CLA_CALYPSO
    }

    fn instruction(&self) -> u8 {
        0x8A
    }

    fn p1(&self) -> u8 {
        0x00
    }

    fn p2(&self) -> u8 {
        0x00
    }

    fn data(&self) -> Option<&[u8]> {
        Some(&self.data)
    }

    fn expected_length(&self) -> Option<ExpectedLength> {
        None
    }

    fn parse_response(response: Response) -> Result<Self::Success, Self::Error> {
        check_status("DIGEST INIT", &response)
    }
}

/// DIGEST UPDATE: one command or response exchanged inside the session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DigestUpdateCommand {
    data: Bytes,
}

impl DigestUpdateCommand {
    /// Append `data` to the digest
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self { data: data.into() }
    }
}

impl ApduCommand for DigestUpdateCommand {
    type Success = ();
    type Error = CommandError;

    fn class(&self) -> u8 {
        CLA_CALYPSO
    }

    fn instruction(&self) -> u8 {
        0x8C
    }

    fn p1(&self) -> u8 {
        0x00
    }

    fn p2(&self) -> u8 {
        0x00
    }

    fn data(&self) -> Option<&[u8]> {
        Some(&self.data)
    }

    fn expected_length(&self) -> Option<ExpectedLength> {
        None
    }

    fn parse_response(response: Response) -> Result<Self::Success, Self::Error> {
        check_status("DIGEST UPDATE", &response)
    }
}

/// DIGEST CLOSE: the terminal signature
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DigestCloseCommand;

impl ApduCommand for DigestCloseCommand {
    type Success = [u8; 4];
    type Error = CommandError;

    fn class(&self) -> u8 {
        CLA_CALYPSO
    }

    fn instruction(&self) -> u8 {
        0x8E
    }

    fn p1(&self) -> u8 {
        0x00
    }

    fn p2(&self) -> u8 {
        0x00
    }

    fn data(&self) -> Option<&[u8]> {
        None
    }

    fn expected_length(&self) -> Option<ExpectedLength> {
        Some(0x04)
    }

    fn parse_response(response: Response) -> Result<Self::Success, Self::Error> {
        signature("DIGEST CLOSE", &response)
    }
}

/// DIGEST AUTHENTICATE: check the card signature
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DigestAuthenticateCommand {
    card_signature: [u8; 4],
}

impl DigestAuthenticateCommand {
    /// Check `card_signature`
    pub const fn new(card_signature: [u8; 4]) -> Self {
        Self { card_signature }
    }
}

impl ApduCommand for DigestAuthenticateCommand {
    type Success = ();
    type Error = CommandError;

    fn class(&self) -> u8 {
        CLA_CALYPSO
    }

    fn instruction(&self) -> u8 {
        0x82
    }

    fn p1(&self) -> u8 {
        0x00
    }

    fn p2(&self) -> u8 {
        0x00
    }

    fn data(&self) -> Option<&[u8]> {
        Some(&self.card_signature)
    }

    fn expected_length(&self) -> Option<ExpectedLength> {
        None
    }

    fn parse_response(response: Response) -> Result<Self::Success, Self::Error> {
        check_status("DIGEST AUTHENTICATE", &response)
    }
}
