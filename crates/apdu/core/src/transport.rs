//! Transport traits for APDU communication with cards
//!
//! A transport is the raw byte pipe to one card or one SAM. It has no
//! knowledge of command structure or of the Calypso session protocol.

use std::fmt;

use bytes::Bytes;
use tracing::{debug, trace};

use crate::{ApduCommand, Command, Error, Response};

/// Trait for basic card transports
///
/// Implementations only provide [`do_transmit_raw`](Self::do_transmit_raw);
/// [`transmit_raw`](Self::transmit_raw) wraps it with hex tracing so every
/// back-end logs exchanges the same way.
pub trait CardTransport: Send + fmt::Debug {
    /// Send raw APDU bytes to card and return response bytes
    fn transmit_raw(&mut self, command: &[u8]) -> Result<Bytes, Error> {
        trace!(command = %hex::encode_upper(command), "Transmitting raw command");
        let result = self.do_transmit_raw(command);
        match &result {
            Ok(response) => {
                trace!(response = %hex::encode_upper(response), "Received raw response");
            }
            Err(e) => {
                debug!(error = ?e, "Transport error during transmission");
            }
        }
        result
    }

    /// Send a command and decode the response, whatever its status word
    fn transmit(&mut self, command: &Command) -> Result<Response, Error> {
        let raw = self.transmit_raw(&command.to_bytes()?)?;
        Response::from_bytes(&raw)
    }

    /// Internal implementation of transmit_raw
    /// This is the method that concrete implementations should override
    fn do_transmit_raw(&mut self, command: &[u8]) -> Result<Bytes, Error>;

    /// Check if the transport is connected to a card
    fn is_connected(&self) -> bool;

    /// Release the logical channel so a later selection starts from a clean state
    fn release_channel(&mut self) -> Result<(), Error>;
}

impl<T: CardTransport + ?Sized> CardTransport for Box<T> {
    fn transmit_raw(&mut self, command: &[u8]) -> Result<Bytes, Error> {
        (**self).transmit_raw(command)
    }

    fn do_transmit_raw(&mut self, command: &[u8]) -> Result<Bytes, Error> {
        (**self).do_transmit_raw(command)
    }

    fn is_connected(&self) -> bool {
        (**self).is_connected()
    }

    fn release_channel(&mut self) -> Result<(), Error> {
        (**self).release_channel()
    }
}

/// Scripted transport for tests
#[cfg(any(test, feature = "mock"))]
#[derive(Debug, Clone)]
pub struct MockTransport {
    /// Responses returned in order; the last one repeats
    pub responses: Vec<Bytes>,
    /// Commands that were sent
    pub commands: Vec<Bytes>,
    /// Whether the transport is connected
    pub connected: bool,
    /// Number of times the channel was released
    pub releases: usize,
}

#[cfg(any(test, feature = "mock"))]
impl MockTransport {
    /// Create a new mock transport with the given responses
    pub const fn new(responses: Vec<Bytes>) -> Self {
        Self {
            responses,
            commands: Vec::new(),
            connected: true,
            releases: 0,
        }
    }

    /// Create a new mock transport that always returns the given response
    pub fn with_response(response: Bytes) -> Self {
        Self::new(vec![response])
    }

    /// Create a new mock transport that always returns success (90 00)
    pub fn with_success() -> Self {
        Self::with_response(Bytes::from_static(&[0x90, 0x00]))
    }
}

#[cfg(any(test, feature = "mock"))]
impl CardTransport for MockTransport {
    fn do_transmit_raw(&mut self, command: &[u8]) -> Result<Bytes, Error> {
        if !self.connected {
            return Err(Error::ConnectionError);
        }

        self.commands.push(Bytes::copy_from_slice(command));

        match self.responses.len() {
            0 => Err(Error::TransmissionError),
            1 => Ok(self.responses[0].clone()),
            _ => Ok(self.responses.remove(0)),
        }
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    fn release_channel(&mut self) -> Result<(), Error> {
        self.releases += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hex_literal::hex;

    #[test]
    fn mock_records_commands_and_replays_responses() {
        let mut transport = MockTransport::new(vec![
            Bytes::from_static(&hex!("0102039000")),
            Bytes::from_static(&hex!("6A83")),
        ]);

        let first = transport
            .transmit(&Command::new_with_le(0x00, 0xB2, 0x01, 0x3C, 0x00))
            .unwrap();
        assert_eq!(first.data(), &[0x01, 0x02, 0x03]);

        let second = transport.transmit_raw(&hex!("00B2023C00")).unwrap();
        assert_eq!(second.as_ref(), &hex!("6A83"));

        assert_eq!(transport.commands.len(), 2);
        assert_eq!(transport.commands[0].as_ref(), &hex!("00B2013C00"));
    }

    #[test]
    fn disconnected_mock_fails() {
        let mut transport: Box<dyn CardTransport> = Box::new(MockTransport {
            connected: false,
            ..MockTransport::with_success()
        });
        assert_eq!(
            transport.transmit_raw(&hex!("00CA00C700")),
            Err(Error::ConnectionError)
        );
        assert!(!transport.is_connected());
    }
}
