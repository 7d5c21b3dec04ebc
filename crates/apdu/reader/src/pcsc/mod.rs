//! PC/SC reader back-end
//!
//! Binds the capability traits to a PC/SC resource manager. Card detection
//! runs on one thread per observed reader, blocking in
//! `SCardGetStatusChange` for at most the configured poll interval.

mod channel;
mod config;
mod reader;

pub use channel::PcscChannel;
pub use config::{PcscConfig, ShareMode};
pub use reader::{PcscReader, PcscSamReader};

use std::fmt;

use pcsc::{Context, Scope};
use tracing::{debug, info};

use crate::{CardProtocol, ObservableReader, ReaderBackend, ReaderError, SamReader};

/// Reader protocol name PC/SC readers report for ISO 14443-4 cards
const ISO_14443_4_READER_PROTOCOL: &str = "ISO_14443_4_CL";

/// Reader back-end over the PC/SC resource manager
#[derive(Default)]
pub struct PcscBackend {
    context: Option<Context>,
    config: PcscConfig,
}

impl fmt::Debug for PcscBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PcscBackend")
            .field("registered", &self.context.is_some())
            .field("config", &self.config)
            .finish()
    }
}

impl PcscBackend {
    /// Back-end with the given configuration
    pub fn new(config: PcscConfig) -> Self {
        Self {
            context: None,
            config,
        }
    }

    fn context(&self) -> Result<&Context, ReaderError> {
        self.context.as_ref().ok_or(ReaderError::NotRegistered)
    }

    fn reader_names(&self) -> Result<Vec<String>, ReaderError> {
        let readers = self.context()?.list_readers_owned()?;
        if readers.is_empty() {
            return Err(ReaderError::NoReadersAvailable);
        }
        Ok(readers
            .iter()
            .map(|name| name.to_string_lossy().into_owned())
            .collect())
    }
}

impl ReaderBackend for PcscBackend {
    fn name(&self) -> &str {
        "pcsc"
    }

    fn register(&mut self) -> Result<(), ReaderError> {
        let context = Context::establish(Scope::User)?;
        info!("PC/SC context established");
        self.context = Some(context);
        Ok(())
    }

    fn list_readers(&self) -> Result<Vec<String>, ReaderError> {
        self.reader_names()
    }

    fn po_reader(&mut self, name: Option<&str>) -> Result<Box<dyn ObservableReader>, ReaderError> {
        let readers = self.reader_names()?;
        let name = match name {
            Some(name) => readers
                .iter()
                .find(|reader| reader.as_str() == name)
                .ok_or_else(|| ReaderError::ReaderNotFound(name.to_string()))?,
            None => readers
                .iter()
                .find(|reader| !self.config.is_sam_reader(reader))
                .ok_or(ReaderError::NoReadersAvailable)?,
        };
        debug!(reader = %name, "Using PC/SC card reader");

        let reader = PcscReader::new(
            self.context()?.clone(),
            name,
            self.config.clone(),
            self.contactless_iso_protocol(),
        )?;
        Ok(Box::new(reader))
    }

    fn sam_reader(&mut self, name: Option<&str>) -> Result<Option<Box<dyn SamReader>>, ReaderError> {
        let readers = self.reader_names()?;
        let found = match name {
            Some(name) => Some(
                readers
                    .into_iter()
                    .find(|reader| reader == name)
                    .ok_or_else(|| ReaderError::ReaderNotFound(name.to_string()))?,
            ),
            None => readers
                .into_iter()
                .find(|reader| self.config.is_sam_reader(reader)),
        };

        let context = self.context()?;
        Ok(found.map(|name| {
            debug!(reader = %name, "Using PC/SC SAM reader");
            Box::new(PcscSamReader::new(context.clone(), name, self.config.clone()))
                as Box<dyn SamReader>
        }))
    }

    fn contactless_iso_protocol(&self) -> CardProtocol {
        CardProtocol::new(ISO_14443_4_READER_PROTOCOL, CardProtocol::ISO_14443_4)
    }

    fn contactless_legacy_protocol(&self) -> Option<CardProtocol> {
        None
    }
}
