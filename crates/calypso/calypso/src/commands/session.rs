use validator_apdu_core::prelude::*;

use super::{CLA_ISO, check_status};
use crate::CommandError;

/// OPEN SECURE SESSION
///
/// P1 carries the record to read back in the response and the key index of
/// the access level; P2 the file holding that record (0 for none).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenSecureSessionCommand {
    key_index: u8,
    sfi: u8,
    record: u8,
    challenge: [u8; 4],
}

impl OpenSecureSessionCommand {
    /// Open a session with key `key_index`, reading no record
    pub const fn new(key_index: u8, challenge: [u8; 4]) -> Self {
        Self {
            key_index,
            sfi: 0,
            record: 0,
            challenge,
        }
    }

    /// Read back `record` of the file `sfi` in the open response
    pub const fn with_record(mut self, sfi: u8, record: u8) -> Self {
        self.sfi = sfi;
        self.record = record;
        self
    }
}

/// Decoded response to OPEN SECURE SESSION
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenSessionResponse {
    /// Card challenge
    pub card_challenge: [u8; 4],
    /// Whether the previous session was ratified
    pub ratified: bool,
    /// Key version of the session key
    pub kvc: u8,
    /// Record read at open, empty when none was requested
    pub record: Bytes,
    /// Whole response data, the first block of the session digest
    pub raw: Bytes,
}

impl ApduCommand for OpenSecureSessionCommand {
    type Success = OpenSessionResponse;
    type Error = CommandError;

    fn class(&self) -> u8 {
        CLA_ISO
    }

    fn instruction(&self) -> u8 {
        0x8A
    }

    fn p1(&self) -> u8 {
        (self.record << 3) | (self.key_index & 0x07)
    }

    fn p2(&self) -> u8 {
        self.sfi << 3
    }

    fn data(&self) -> Option<&[u8]> {
        Some(&self.challenge)
    }

    fn expected_length(&self) -> Option<ExpectedLength> {
        Some(0x00)
    }

    fn parse_response(response: Response) -> Result<Self::Success, Self::Error> {
        check_status("OPEN SECURE SESSION", &response)?;
        let raw = response.payload().clone().unwrap_or_default();

        let [c0, c1, c2, c3, ratified, kvc, length, record @ ..] = raw.as_ref() else {
            return Err(CommandError::Malformed {
                command: "OPEN SECURE SESSION",
                reason: "response shorter than 7 bytes",
            });
        };
        if record.len() != usize::from(*length) {
            return Err(CommandError::Malformed {
                command: "OPEN SECURE SESSION",
                reason: "record length mismatch",
            });
        }

        Ok(OpenSessionResponse {
            card_challenge: [*c0, *c1, *c2, *c3],
            ratified: *ratified == 0x00,
            kvc: *kvc,
            record: Bytes::copy_from_slice(record),
            raw: raw.clone(),
        })
    }
}

/// CLOSE SECURE SESSION with the terminal signature
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CloseSecureSessionCommand {
    signature: [u8; 4],
}

impl CloseSecureSessionCommand {
    /// Close the session, committing its modifications
    pub const fn new(signature: [u8; 4]) -> Self {
        Self { signature }
    }
}

impl ApduCommand for CloseSecureSessionCommand {
    /// Card signature
    type Success = [u8; 4];
    type Error = CommandError;

    fn class(&self) -> u8 {
        CLA_ISO
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
        Some(&self.signature)
    }

    fn expected_length(&self) -> Option<ExpectedLength> {
        Some(0x00)
    }

    fn parse_response(response: Response) -> Result<Self::Success, Self::Error> {
        check_status("CLOSE SECURE SESSION", &response)?;
        <[u8; 4]>::try_from(response.data()).map_err(|_| CommandError::Malformed {
            command: "CLOSE SECURE SESSION",
            reason: "card signature is not 4 bytes",
        })
    }
}

/// CLOSE SECURE SESSION without signature, discarding the session
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AbortSecureSessionCommand;

impl ApduCommand for AbortSecureSessionCommand {
    type Success = ();
    type Error = CommandError;

    fn class(&self) -> u8 {
        CLA_ISO
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
        None
    }

    fn parse_response(response: Response) -> Result<Self::Success, Self::Error> {
        check_status("ABORT SECURE SESSION", &response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hex_literal::hex;

    #[test]
    fn open_encodes_key_index_and_challenge() {
        let command = OpenSecureSessionCommand::new(3, hex!("01020304"));
        assert_eq!(command.to_bytes().unwrap().as_ref(), &hex!("008A0300040102030400"));

        let command = command.with_record(0x07, 1);
        assert_eq!(command.p1(), 0x0B);
        assert_eq!(command.p2(), 0x38);
    }

    #[test]
    fn open_response_is_decoded() {
        let response = OpenSecureSessionCommand::parse_response_raw(Bytes::from_static(&hex!(
            "AABBCCDD0002024142" "9000"
        )))
        .unwrap();
        assert_eq!(response.card_challenge, hex!("AABBCCDD"));
        assert!(response.ratified);
        assert_eq!(response.kvc, 0x02);
        assert_eq!(response.record.as_ref(), b"AB");
        assert_eq!(response.raw.len(), 9);
    }

    #[test]
    fn truncated_open_response_is_malformed() {
        let result =
            OpenSecureSessionCommand::parse_response_raw(Bytes::from_static(&hex!("AABB9000")));
        assert!(matches!(result, Err(CommandError::Malformed { .. })));
    }

    #[test]
    fn abort_has_no_body() {
        assert_eq!(AbortSecureSessionCommand.to_bytes().unwrap().as_ref(), &hex!("008E0000"));
    }
}
