//! Reader listing

use tracing::info;
use validator_apdu_reader::sim::VirtualBackend;
use validator_apdu_reader::{ReaderBackend, register_backend};
use validator_app::{BackendKind, ValidatorConfig};

use super::backend::pcsc_readers;

/// List the readers of the configured back-end
pub(crate) fn list_command(config: &ValidatorConfig) -> eyre::Result<()> {
    let readers = match config.backend {
        BackendKind::Virtual => {
            register_backend(VirtualBackend::new(), config.init_timeout())?.list_readers()?
        }
        BackendKind::Pcsc => pcsc_readers(config)?,
    };

    info!(backend = ?config.backend, count = readers.len(), "Readers found");
    for reader in readers {
        println!("{reader}");
    }
    Ok(())
}
