use validator_apdu_core::prelude::*;

use super::{CLA_ISO, check_status};
use crate::CommandError;

/// Direction of a counter change
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CounterOp {
    /// Add to the counter
    Increase,
    /// Subtract from the counter
    Decrease,
}

impl CounterOp {
    const fn instruction(self) -> u8 {
        match self {
            Self::Increase => 0x32,
            Self::Decrease => 0x30,
        }
    }

    const fn name(self) -> &'static str {
        match self {
            Self::Increase => "INCREASE",
            Self::Decrease => "DECREASE",
        }
    }
}

/// INCREASE or DECREASE of one counter of a counters file
///
/// The card answers with the new counter value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CounterCommand {
    op: CounterOp,
    sfi: u8,
    counter: u8,
    delta: [u8; 3],
}

impl CounterCommand {
    /// Change counter `counter` of the file `sfi` by `delta`
    ///
    /// Only the low three bytes of `delta` are sent.
    pub const fn new(op: CounterOp, sfi: u8, counter: u8, delta: u32) -> Self {
        let [_, a, b, c] = delta.to_be_bytes();
        Self {
            op,
            sfi,
            counter,
            delta: [a, b, c],
        }
    }

    /// Direction of the change
    pub const fn op(&self) -> CounterOp {
        self.op
    }
}

impl ApduCommand for CounterCommand {
    type Success = u32;
    type Error = CommandError;

    fn class(&self) -> u8 {
        CLA_ISO
    }

    fn instruction(&self) -> u8 {
        self.op.instruction()
    }

    fn p1(&self) -> u8 {
        self.counter
    }

    fn p2(&self) -> u8 {
        self.sfi << 3
    }

    fn data(&self) -> Option<&[u8]> {
        Some(&self.delta)
    }

    fn expected_length(&self) -> Option<ExpectedLength> {
        Some(0x00)
    }

    fn parse_response(response: Response) -> Result<Self::Success, Self::Error> {
        check_status("COUNTER", &response)?;
        match response.data() {
            [a, b, c] => Ok(u32::from_be_bytes([0, *a, *b, *c])),
            _ => Err(CommandError::Malformed {
                command: "COUNTER",
                reason: "new value is not 3 bytes",
            }),
        }
    }
}

impl std::fmt::Display for CounterOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hex_literal::hex;

    #[test]
    fn increase_encoding() {
        let command = CounterCommand::new(CounterOp::Increase, 0x19, 1, 5);
        assert_eq!(command.to_bytes().unwrap().as_ref(), &hex!("003201C80300000500"));
    }

    #[test]
    fn decrease_encoding() {
        let command = CounterCommand::new(CounterOp::Decrease, 0x19, 1, 1);
        assert_eq!(command.to_bytes().unwrap().as_ref(), &hex!("003001C80300000100"));
    }

    #[test]
    fn decodes_new_value() {
        let value = CounterCommand::parse_response_raw(Bytes::from_static(&hex!("0001029000")));
        assert_eq!(value.unwrap(), 0x0102);
    }
}
