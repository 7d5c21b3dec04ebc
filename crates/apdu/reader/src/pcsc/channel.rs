//! PC/SC card channel

use std::ffi::{CStr, CString};
use std::fmt;

use pcsc::{Card, Context, Disposition};
use tracing::debug;
use validator_apdu_core::prelude::*;

use super::config::PcscConfig;
use crate::ReaderError;

/// Logical channel to the card in one PC/SC reader
///
/// The connection is established on demand and dropped when the card is
/// removed or the channel released.
pub struct PcscChannel {
    context: Context,
    reader: CString,
    config: PcscConfig,
    card: Option<Card>,
}

impl fmt::Debug for PcscChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PcscChannel")
            .field("reader", &self.reader)
            .field("connected", &self.card.is_some())
            .field("config", &self.config)
            .finish()
    }
}

impl PcscChannel {
    pub(crate) fn new(context: Context, reader: &str, config: PcscConfig) -> Result<Self, ReaderError> {
        let reader =
            CString::new(reader).map_err(|_| ReaderError::ReaderNotFound(reader.to_string()))?;
        Ok(Self {
            context,
            reader,
            config,
            card: None,
        })
    }

    pub(crate) fn reader(&self) -> &CStr {
        &self.reader
    }

    /// Reader name
    pub fn reader_name(&self) -> String {
        self.reader.to_string_lossy().into_owned()
    }

    /// Connect to the card if not already connected
    pub fn connect(&mut self) -> Result<(), ReaderError> {
        if self.card.is_some() {
            return Ok(());
        }

        match self
            .context
            .connect(&self.reader, self.config.share_mode.into(), self.config.protocols)
        {
            Ok(card) => {
                debug!(reader = %self.reader_name(), "Connected to card");
                self.card = Some(card);
                Ok(())
            }
            Err(pcsc::Error::NoSmartcard | pcsc::Error::RemovedCard) => {
                Err(ReaderError::NoCard(self.reader_name()))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Drop the card connection, resetting the card
    pub fn disconnect(&mut self) {
        if let Some(card) = self.card.take() {
            if let Err((_, e)) = card.disconnect(Disposition::ResetCard) {
                debug!(reader = %self.reader_name(), error = %e, "Disconnect failed");
            }
        }
    }
}

impl CardTransport for PcscChannel {
    fn do_transmit_raw(&mut self, command: &[u8]) -> Result<Bytes, Error> {
        if self.connect().is_err() {
            return Err(Error::CardRemoved);
        }
        let card = self.card.as_ref().ok_or(Error::ConnectionError)?;

        let mut buffer = [0u8; pcsc::MAX_BUFFER_SIZE];
        match card.transmit(command, &mut buffer) {
            Ok(response) => Ok(Bytes::copy_from_slice(response)),
            Err(pcsc::Error::RemovedCard | pcsc::Error::ResetCard | pcsc::Error::NoSmartcard) => {
                self.card = None;
                Err(Error::CardRemoved)
            }
            Err(e) => {
                debug!(reader = %self.reader_name(), error = %e, "PC/SC transmit failed");
                Err(Error::TransmissionError)
            }
        }
    }

    fn is_connected(&self) -> bool {
        self.card.is_some()
    }

    fn release_channel(&mut self) -> Result<(), Error> {
        self.disconnect();
        Ok(())
    }
}

impl Drop for PcscChannel {
    fn drop(&mut self) {
        if let Some(card) = self.card.take() {
            let _ = card.disconnect(Disposition::LeaveCard);
        }
    }
}
