//! In-process reader back-end
//!
//! The virtual back-end hosts simulated cards and a simulated SAM behind the
//! same capability traits as the hardware back-ends. The card speaks the
//! subset of the Calypso command set the validator uses, including secure
//! sessions with a working copy that is committed on close and discarded on
//! abort. Session signatures are truncated SHA-256 MACs over the session
//! digest, keyed by a per-card key diversified from the SAM master key.

mod card;
mod reader;
mod sam;

use std::thread;
use std::time::Duration;

use sha2::{Digest, Sha256};
use tracing::debug;

pub use card::VirtualCard;
pub use reader::{VirtualReader, VirtualSamReader};
pub use sam::VirtualSam;

use crate::{
    CardProtocol, ObservableReader, ReaderBackend, ReaderError, SamReader,
};

/// Master key shared by the default virtual SAM and default virtual cards
pub const DEFAULT_MASTER_KEY: [u8; 16] = *b"virtual-ticketng";

/// Default name of the virtual card reader
pub const PO_READER_NAME: &str = "VIRTUAL_PO";

/// Default name of the virtual SAM reader
pub const SAM_READER_NAME: &str = "VIRTUAL_SAM";

/// Derive a card key from a master key and the card serial number
pub fn diversify(master: &[u8; 16], serial: &[u8]) -> [u8; 16] {
    let digest = Sha256::new().chain_update(master).chain_update(serial).finalize();
    let mut key = [0u8; 16];
    key.copy_from_slice(&digest[..16]);
    key
}

/// Label of the signature produced by the terminal (SAM)
pub(crate) const TERMINAL_LABEL: u8 = b'T';
/// Label of the signature produced by the card
pub(crate) const CARD_LABEL: u8 = b'C';

/// Session signature over the terminal challenge and the session digest
pub(crate) fn session_signature(key: &[u8; 16], label: u8, challenge: &[u8], digest: &[u8]) -> [u8; 4] {
    let mac = Sha256::new()
        .chain_update(key)
        .chain_update([label])
        .chain_update(challenge)
        .chain_update(digest)
        .finalize();
    [mac[0], mac[1], mac[2], mac[3]]
}

/// Reader back-end made of one virtual card reader and an optional virtual SAM
#[derive(Debug, Clone)]
pub struct VirtualBackend {
    registered: bool,
    registration_delay: Duration,
    legacy_protocol: bool,
    reader: VirtualReader,
    sam: Option<VirtualSamReader>,
}

impl Default for VirtualBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl VirtualBackend {
    /// Back-end with a card reader, a SAM reader and legacy protocol support
    pub fn new() -> Self {
        Self {
            registered: false,
            registration_delay: Duration::ZERO,
            legacy_protocol: true,
            reader: VirtualReader::new(PO_READER_NAME),
            sam: Some(VirtualSamReader::new(SAM_READER_NAME, VirtualSam::default())),
        }
    }

    /// Make registration block for `delay`
    pub const fn with_registration_delay(mut self, delay: Duration) -> Self {
        self.registration_delay = delay;
        self
    }

    /// Remove the SAM reader
    pub fn without_sam(mut self) -> Self {
        self.sam = None;
        self
    }

    /// Replace the SAM
    pub fn with_sam(mut self, sam: VirtualSam) -> Self {
        self.sam = Some(VirtualSamReader::new(SAM_READER_NAME, sam));
        self
    }

    /// Report no legacy contactless protocol
    pub const fn without_legacy_protocol(mut self) -> Self {
        self.legacy_protocol = false;
        self
    }

    /// Handle on the card reader, to insert and remove cards
    pub fn reader(&self) -> VirtualReader {
        self.reader.clone()
    }

    /// Handle on the SAM, if there is one
    pub fn sam(&self) -> Option<VirtualSam> {
        self.sam.as_ref().map(VirtualSamReader::sam)
    }

    fn ensure_registered(&self) -> Result<(), ReaderError> {
        if self.registered {
            Ok(())
        } else {
            Err(ReaderError::NotRegistered)
        }
    }
}

impl ReaderBackend for VirtualBackend {
    fn name(&self) -> &str {
        "virtual"
    }

    fn register(&mut self) -> Result<(), ReaderError> {
        if !self.registration_delay.is_zero() {
            debug!(delay = ?self.registration_delay, "Simulating slow registration");
            thread::sleep(self.registration_delay);
        }
        self.registered = true;
        Ok(())
    }

    fn list_readers(&self) -> Result<Vec<String>, ReaderError> {
        self.ensure_registered()?;
        let mut readers = vec![self.reader.name().to_string()];
        readers.extend(self.sam.iter().map(|sam| sam.name().to_string()));
        Ok(readers)
    }

    fn po_reader(&mut self, name: Option<&str>) -> Result<Box<dyn ObservableReader>, ReaderError> {
        self.ensure_registered()?;
        match name {
            Some(name) if name != self.reader.name() => {
                Err(ReaderError::ReaderNotFound(name.to_string()))
            }
            _ => Ok(Box::new(self.reader.clone())),
        }
    }

    fn sam_reader(&mut self, name: Option<&str>) -> Result<Option<Box<dyn SamReader>>, ReaderError> {
        self.ensure_registered()?;
        match (&self.sam, name) {
            (Some(sam), Some(name)) if name != sam.name() => {
                Err(ReaderError::ReaderNotFound(name.to_string()))
            }
            (Some(sam), _) => Ok(Some(Box::new(sam.clone()))),
            (None, Some(name)) => Err(ReaderError::ReaderNotFound(name.to_string())),
            (None, None) => Ok(None),
        }
    }

    fn contactless_iso_protocol(&self) -> CardProtocol {
        CardProtocol::named(CardProtocol::ISO_14443_4)
    }

    fn contactless_legacy_protocol(&self) -> Option<CardProtocol> {
        self.legacy_protocol
            .then(|| CardProtocol::named(CardProtocol::MIFARE_CLASSIC))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn diversified_keys_differ_per_serial() {
        let a = diversify(&DEFAULT_MASTER_KEY, &[0, 0, 0, 0, 0, 0, 0, 1]);
        let b = diversify(&DEFAULT_MASTER_KEY, &[0, 0, 0, 0, 0, 0, 0, 2]);
        assert_ne!(a, b);
        assert_eq!(a, diversify(&DEFAULT_MASTER_KEY, &[0, 0, 0, 0, 0, 0, 0, 1]));
    }

    #[test]
    fn backend_requires_registration() {
        let mut backend = VirtualBackend::new();
        assert!(matches!(backend.list_readers(), Err(ReaderError::NotRegistered)));

        backend.register().unwrap();
        assert_eq!(
            backend.list_readers().unwrap(),
            vec![PO_READER_NAME.to_string(), SAM_READER_NAME.to_string()]
        );
        assert!(backend.po_reader(Some("OTHER")).is_err());
        assert!(backend.po_reader(None).is_ok());
        assert!(backend.sam_reader(None).unwrap().is_some());
    }

    #[test]
    fn legacy_protocol_is_optional() {
        assert!(VirtualBackend::new().contactless_legacy_protocol().is_some());
        assert!(
            VirtualBackend::new()
                .without_legacy_protocol()
                .contactless_legacy_protocol()
                .is_none()
        );
    }
}
