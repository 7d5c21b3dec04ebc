//! Calypso card and SAM commands used by the validator
//!
//! Each command implements [`ApduCommand`] and decodes its own response, so a
//! caller only ever deals with typed results or a [`CommandError`].

mod append_record;
mod counter;
mod get_data;
mod read_record;
mod sam;
mod select;
mod session;
mod update_record;

pub use append_record::AppendRecordCommand;
pub use counter::{CounterOp, CounterCommand};
pub use get_data::GetSerialNumberCommand;
pub use read_record::ReadRecordCommand;
pub use sam::{
    DigestAuthenticateCommand, DigestCloseCommand, DigestInitCommand, DigestUpdateCommand,
    GetChallengeCommand, SelectDiversifierCommand,
};
pub use select::{Fci, SelectApplicationCommand};
pub use session::{
    AbortSecureSessionCommand, CloseSecureSessionCommand, OpenSecureSessionCommand,
    OpenSessionResponse,
};
pub use update_record::UpdateRecordCommand;

use validator_apdu_core::prelude::*;

use crate::CommandError;

/// Class byte of ISO card commands
pub const CLA_ISO: u8 = 0x00;

/// Class byte of Calypso proprietary commands
pub const CLA_CALYPSO: u8 = 0x80;

/// P2 addressing record P1 of the file `sfi`
pub(crate) const fn record_p2(sfi: u8) -> u8 {
    (sfi << 3) | 0x04
}

/// Turn an error status into a [`CommandError`]
pub(crate) fn check_status(command: &'static str, response: &Response) -> Result<(), CommandError> {
    let status = response.status();
    if status.is_success() {
        Ok(())
    } else {
        Err(CommandError::Status { command, status })
    }
}

/// Send a command and decode its response
pub fn execute<C>(transport: &mut dyn CardTransport, command: &C) -> Result<C::Success, CommandError>
where
    C: ApduCommand<Error = CommandError>,
{
    let raw = transport.transmit_raw(&command.to_bytes()?)?;
    C::parse_response_raw(raw)
}
