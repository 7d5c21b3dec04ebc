use std::fmt;

/// A contactless protocol as named by one reader back-end
///
/// The reader-side name is what the back-end's driver calls the protocol; the
/// application-side name is what selection filters compare against. The
/// ticketing core passes both through without interpreting them.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CardProtocol {
    /// Protocol name used by the reader driver
    pub reader_protocol_name: String,
    /// Protocol name used by card selectors
    pub application_protocol_name: String,
}

impl CardProtocol {
    /// ISO 14443-4 contactless, spoken by Calypso and banking cards
    pub const ISO_14443_4: &'static str = "ISO_14443_4";
    /// MIFARE Classic, a legacy contactless protocol
    pub const MIFARE_CLASSIC: &'static str = "MIFARE_CLASSIC";

    /// Create a protocol from its reader-side and application-side names
    pub fn new(reader_protocol_name: impl Into<String>, application_protocol_name: impl Into<String>) -> Self {
        Self {
            reader_protocol_name: reader_protocol_name.into(),
            application_protocol_name: application_protocol_name.into(),
        }
    }

    /// A protocol whose reader-side and application-side names coincide
    pub fn named(name: &str) -> Self {
        Self::new(name, name)
    }
}

impl fmt::Display for CardProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.reader_protocol_name, self.application_protocol_name)
    }
}
