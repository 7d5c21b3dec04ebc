//! Error types for the validator service

use validator_apdu_reader::ReaderError;

/// Failure to bring the validator up
#[derive(Debug, thiserror::Error)]
pub enum InitError {
    /// Back-end registration or reader lookup failed
    #[error(transparent)]
    Reader(#[from] ReaderError),

    /// A SAM is required and the back-end has none
    #[error("A SAM is required but no SAM reader is available")]
    SamRequired,

    /// The configured back-end was not compiled in
    #[error("The {0} back-end is not available in this build")]
    BackendUnavailable(&'static str),

    /// The worker thread could not be started
    #[error("Failed to start the validator worker: {0}")]
    Worker(#[from] std::io::Error),
}

/// Failure to reach a running validator
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ServiceError {
    /// The worker thread has stopped
    #[error("The validator worker has stopped")]
    WorkerStopped,
}
