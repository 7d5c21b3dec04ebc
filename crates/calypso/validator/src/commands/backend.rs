//! Back-end construction per configured kind

use validator_app::{InitError, Validator, ValidatorConfig};

#[cfg(feature = "pcsc")]
fn pcsc_backend() -> validator_apdu_reader::pcsc::PcscBackend {
    use validator_apdu_reader::pcsc::{PcscBackend, PcscConfig};
    PcscBackend::new(PcscConfig::default())
}

/// Start the validator on the PC/SC readers
#[cfg(feature = "pcsc")]
pub(crate) fn start_pcsc(config: &ValidatorConfig) -> Result<Validator, InitError> {
    Validator::start(pcsc_backend(), config)
}

/// Start the validator on the PC/SC readers
#[cfg(not(feature = "pcsc"))]
pub(crate) fn start_pcsc(_config: &ValidatorConfig) -> Result<Validator, InitError> {
    Err(InitError::BackendUnavailable("pcsc"))
}

/// Names of the PC/SC readers
#[cfg(feature = "pcsc")]
pub(crate) fn pcsc_readers(config: &ValidatorConfig) -> Result<Vec<String>, InitError> {
    use validator_apdu_reader::{ReaderBackend, register_backend};
    let backend = register_backend(pcsc_backend(), config.init_timeout())?;
    Ok(backend.list_readers()?)
}

/// Names of the PC/SC readers
#[cfg(not(feature = "pcsc"))]
pub(crate) fn pcsc_readers(_config: &ValidatorConfig) -> Result<Vec<String>, InitError> {
    Err(InitError::BackendUnavailable("pcsc"))
}
