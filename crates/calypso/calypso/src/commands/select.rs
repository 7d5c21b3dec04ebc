use iso7816_tlv::ber::{Tag, Tlv, Value};
use validator_apdu_core::prelude::*;

use super::{CLA_ISO, check_status};
use crate::CommandError;
use crate::constants::tags;

/// Decoded file control information of a Calypso application
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fci {
    /// Dedicated file name, i.e. the full AID
    pub df_name: Bytes,
    /// Application serial number
    pub serial_number: Bytes,
}

impl Fci {
    /// Parse the FCI returned by SELECT APPLICATION
    pub fn parse(data: &[u8]) -> Result<Self, CommandError> {
        let malformed = |reason| CommandError::Malformed {
            command: "SELECT APPLICATION",
            reason,
        };

        let fci = Tlv::from_bytes(data).map_err(|_| malformed("FCI is not BER-TLV"))?;
        if fci.tag() != &tag(tags::FCI_TEMPLATE)? {
            return Err(malformed("missing FCI template"));
        }

        let df_name = find_primitive(&fci, &tag(tags::DF_NAME)?)
            .ok_or_else(|| malformed("missing DF name"))?;
        let serial_number = find_primitive(&fci, &tag(tags::SERIAL_NUMBER)?)
            .ok_or_else(|| malformed("missing serial number"))?;

        Ok(Self {
            df_name: Bytes::copy_from_slice(df_name),
            serial_number: Bytes::copy_from_slice(serial_number),
        })
    }
}

fn tag(value: u8) -> Result<Tag, CommandError> {
    Tag::try_from(value).map_err(|_| CommandError::Malformed {
        command: "SELECT APPLICATION",
        reason: "invalid tag",
    })
}

/// Depth-first search for the first primitive TLV with tag `tag`
fn find_primitive<'a>(tlv: &'a Tlv, tag: &Tag) -> Option<&'a [u8]> {
    match tlv.value() {
        Value::Primitive(value) if tlv.tag() == tag => Some(value.as_slice()),
        Value::Primitive(_) => None,
        Value::Constructed(children) => children.iter().find_map(|child| find_primitive(child, tag)),
    }
}

/// SELECT APPLICATION by AID
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectApplicationCommand {
    aid: Bytes,
}

impl SelectApplicationCommand {
    /// Select the application `aid`
    pub fn new(aid: impl Into<Bytes>) -> Self {
        Self { aid: aid.into() }
    }
}

impl ApduCommand for SelectApplicationCommand {
    type Success = Fci;
    type Error = CommandError;

    fn class(&self) -> u8 {
        CLA_ISO
    }

    fn instruction(&self) -> u8 {
        0xA4
    }

    fn p1(&self) -> u8 {
        0x04
    }

    fn p2(&self) -> u8 {
        0x00
    }

    fn data(&self) -> Option<&[u8]> {
        Some(&self.aid)
    }

    fn expected_length(&self) -> Option<ExpectedLength> {
        Some(0x00)
    }

    fn parse_response(response: Response) -> Result<Self::Success, Self::Error> {
        check_status("SELECT APPLICATION", &response)?;
        Fci::parse(response.data())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hex_literal::hex;

    #[test]
    fn parses_serial_from_proprietary_template() {
        let fci = Fci::parse(&hex!(
            "6F17" "8409315449432E49434131" "A50A" "C7080000000011223344"
        ))
        .unwrap();
        assert_eq!(fci.df_name.as_ref(), &hex!("315449432E49434131"));
        assert_eq!(fci.serial_number.as_ref(), &hex!("0000000011223344"));
    }

    #[test]
    fn rejects_fci_without_serial() {
        let result = Fci::parse(&hex!("6F0B8409315449432E49434131"));
        assert!(matches!(result, Err(CommandError::Malformed { .. })));
    }

    #[test]
    fn invalidated_application_is_not_selected() {
        let result = SelectApplicationCommand::parse_response_raw(Bytes::from_static(&hex!("6283")));
        assert!(result.unwrap_err().status_word().unwrap().is_invalidated());
    }
}
