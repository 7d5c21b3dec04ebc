//! Error types for reader back-ends

use std::time::Duration;

/// Reader capability errors
#[derive(Debug, thiserror::Error)]
pub enum ReaderError {
    /// APDU level failure
    #[error(transparent)]
    Apdu(#[from] validator_apdu_core::Error),

    /// PC/SC error
    #[cfg(feature = "pcsc")]
    #[error("PC/SC error: {0}")]
    Pcsc(#[from] pcsc::Error),

    /// Back-end registration did not finish in time
    #[error("Registration of the {backend} back-end timed out after {timeout:?}")]
    RegistrationTimeout {
        /// Back-end name
        backend: String,
        /// Timeout that elapsed
        timeout: Duration,
    },

    /// Back-end registration failed
    #[error("Registration failed: {0}")]
    Registration(String),

    /// Back-end used before registration
    #[error("Back-end not registered")]
    NotRegistered,

    /// No readers available
    #[error("No readers available")]
    NoReadersAvailable,

    /// Reader not found
    #[error("Reader not found: {0}")]
    ReaderNotFound(String),

    /// No card present in reader
    #[error("No card present in reader: {0}")]
    NoCard(String),

    /// Thread spawn or other I/O failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
