//! APDU command definitions and traits
//!
//! This module provides types and traits for building short-length APDU
//! commands according to ISO/IEC 7816-4. Ticketing cards and SAMs never need
//! extended lengths, so Lc and Le are always a single byte.

use std::fmt;

use bytes::{BufMut, Bytes, BytesMut};

use crate::{Error, Response};

/// Expected length type for APDU commands
pub type ExpectedLength = u8;

/// Core trait for APDU commands
pub trait ApduCommand {
    /// Success response type
    type Success;

    /// Error response type
    type Error: From<Error> + fmt::Debug;

    /// Command class (CLA)
    fn class(&self) -> u8;

    /// Instruction code (INS)
    fn instruction(&self) -> u8;

    /// First parameter (P1)
    fn p1(&self) -> u8;

    /// Second parameter (P2)
    fn p2(&self) -> u8;

    /// Command payload data (optional)
    fn data(&self) -> Option<&[u8]>;

    /// Expected response length (optional)
    fn expected_length(&self) -> Option<ExpectedLength>;

    /// Convert to raw APDU bytes
    ///
    /// # Errors
    /// Fails when the data field does not fit a short Lc.
    fn to_bytes(&self) -> Result<Bytes, Error> {
        let mut buffer = BytesMut::with_capacity(self.command_length());

        // Header: CLA, INS, P1, P2
        buffer.put_u8(self.class());
        buffer.put_u8(self.instruction());
        buffer.put_u8(self.p1());
        buffer.put_u8(self.p2());

        if let Some(data) = self.data() {
            let lc = u8::try_from(data.len()).map_err(|_| Error::InvalidCommandLength(data.len()))?;
            buffer.put_u8(lc);
            buffer.put_slice(data);
        }

        if let Some(le) = self.expected_length() {
            buffer.put_u8(le);
        }

        Ok(buffer.freeze())
    }

    /// Calculate length of serialized command
    fn command_length(&self) -> usize {
        4 + self.data().map_or(0, |data| 1 + data.len())
            + usize::from(self.expected_length().is_some())
    }

    /// Convert to a generic Command
    fn to_command(&self) -> Command {
        Command {
            cla: self.class(),
            ins: self.instruction(),
            p1: self.p1(),
            p2: self.p2(),
            data: self.data().map(Bytes::copy_from_slice),
            le: self.expected_length(),
        }
    }

    /// Parse response into the command's response type
    fn parse_response(response: Response) -> Result<Self::Success, Self::Error>;

    /// Parse raw bytes into the command's response type
    fn parse_response_raw(bytes: Bytes) -> Result<Self::Success, Self::Error> {
        let response = Response::from_bytes(&bytes)?;
        Self::parse_response(response)
    }
}

/// Generic APDU command structure
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    /// Command class byte
    pub cla: u8,
    /// Instruction byte
    pub ins: u8,
    /// Parameter 1
    pub p1: u8,
    /// Parameter 2
    pub p2: u8,
    /// Command data (optional)
    pub data: Option<Bytes>,
    /// Expected length (optional)
    pub le: Option<ExpectedLength>,
}

impl Command {
    /// Create a new command with just the header bytes
    pub const fn new(cla: u8, ins: u8, p1: u8, p2: u8) -> Self {
        Self {
            cla,
            ins,
            p1,
            p2,
            data: None,
            le: None,
        }
    }

    /// Create a new command with expected response length (Le)
    pub const fn new_with_le(cla: u8, ins: u8, p1: u8, p2: u8, le: ExpectedLength) -> Self {
        Self {
            cla,
            ins,
            p1,
            p2,
            data: None,
            le: Some(le),
        }
    }

    /// Create a new command with both data and expected length
    pub fn new_with_data_and_le<T: Into<Bytes>>(
        cla: u8,
        ins: u8,
        p1: u8,
        p2: u8,
        data: T,
        le: ExpectedLength,
    ) -> Self {
        Self {
            cla,
            ins,
            p1,
            p2,
            data: Some(data.into()),
            le: Some(le),
        }
    }

    /// Parse a command from raw bytes
    pub fn from_bytes(data: &[u8]) -> Result<Self, Error> {
        let [cla, ins, p1, p2, body @ ..] = data else {
            return Err(Error::InvalidCommandLength(data.len()));
        };

        let mut command = Self::new(*cla, *ins, *p1, *p2);

        match body {
            [] => {}
            // Only Le present, no data
            [le] => command.le = Some(*le),
            [lc, rest @ ..] => {
                let lc = *lc as usize;
                match rest.len() {
                    n if n == lc => {}
                    n if n == lc + 1 => command.le = Some(rest[lc]),
                    _ => return Err(Error::InvalidCommandLength(data.len())),
                }
                if lc > 0 {
                    command.data = Some(Bytes::copy_from_slice(&rest[..lc]));
                }
            }
        }

        Ok(command)
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02X}{:02X}{:02X}{:02X}", self.cla, self.ins, self.p1, self.p2)?;
        if let Some(data) = &self.data {
            write!(f, " {}", hex::encode_upper(data))?;
        }
        if let Some(le) = self.le {
            write!(f, " {le:02X}")?;
        }
        Ok(())
    }
}

impl ApduCommand for Command {
    type Success = Response;
    type Error = Error;

    fn class(&self) -> u8 {
        self.cla
    }

    fn instruction(&self) -> u8 {
        self.ins
    }

    fn p1(&self) -> u8 {
        self.p1
    }

    fn p2(&self) -> u8 {
        self.p2
    }

    fn data(&self) -> Option<&[u8]> {
        self.data.as_deref()
    }

    fn expected_length(&self) -> Option<ExpectedLength> {
        self.le
    }

    fn parse_response(response: Response) -> Result<Self::Success, Self::Error> {
        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hex_literal::hex;

    #[test]
    fn test_command_serialization() {
        let aid = Bytes::from_static(&hex!("315449432E49434131"));
        let cmd = Command::new_with_data_and_le(0x00, 0xA4, 0x04, 0x00, aid, 0);
        assert_eq!(
            cmd.to_bytes().unwrap().as_ref(),
            &hex!("00A4040009315449432E4943413100")
        );
    }

    #[test]
    fn test_oversized_data_is_rejected() {
        let cmd = Command::new_with_data_and_le(0x00, 0xDC, 0x01, 0x4C, vec![0u8; 256], 0);
        assert_eq!(cmd.to_bytes(), Err(Error::InvalidCommandLength(256)));

        let cmd = Command::new_with_data_and_le(0x00, 0xDC, 0x01, 0x4C, vec![0u8; 255], 0);
        assert_eq!(cmd.to_bytes().unwrap()[4], 0xFF);
    }

    #[test]
    fn test_command_display() {
        let cmd = Command::new_with_data_and_le(0x00, 0x32, 0x01, 0xC8, vec![0, 0, 5], 0);
        assert_eq!(cmd.to_string(), "003201C8 000005 00");
    }

    #[test]
    fn test_command_length() {
        let cmd1 = Command::new(0x00, 0x8E, 0x00, 0x00);
        assert_eq!(cmd1.command_length(), 4);

        let cmd2 = Command::new_with_le(0x00, 0xB2, 0x01, 0x3C, 0x00);
        assert_eq!(cmd2.command_length(), 5);

        let data = Bytes::from_static(&[0x01, 0x02, 0x03]);
        let cmd3 = Command::new_with_data_and_le(0x00, 0x32, 0x01, 0xC8, data, 0x00);
        assert_eq!(cmd3.command_length(), 9);
    }

    #[test]
    fn test_command_from_bytes() {
        let cmd = Command::from_bytes(&hex!("008E0000")).unwrap();
        assert_eq!((cmd.cla, cmd.ins, cmd.p1, cmd.p2), (0x00, 0x8E, 0x00, 0x00));
        assert!(cmd.data.is_none());
        assert!(cmd.le.is_none());

        let cmd = Command::from_bytes(&hex!("00E2004003010203")).unwrap();
        assert_eq!(cmd.data.as_deref(), Some(&[0x01, 0x02, 0x03][..]));
        assert!(cmd.le.is_none());

        let cmd = Command::from_bytes(&hex!("003201C80300000500")).unwrap();
        assert_eq!(cmd.data.as_deref(), Some(&[0x00, 0x00, 0x05][..]));
        assert_eq!(cmd.le, Some(0x00));

        let cmd = Command::from_bytes(&hex!("00B2013C00")).unwrap();
        assert!(cmd.data.is_none());
        assert_eq!(cmd.le, Some(0x00));

        assert!(Command::from_bytes(&hex!("00B201")).is_err());
        assert!(Command::from_bytes(&hex!("00DC014C050102")).is_err());
    }

    #[test]
    fn test_command_round_trip_through_bytes() {
        let original = Command::new_with_data_and_le(0x00, 0x8E, 0x00, 0x00, vec![1, 2, 3, 4], 0);
        let parsed = Command::from_bytes(&original.to_bytes().unwrap()).unwrap();
        assert_eq!(parsed, original);
    }
}
