use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, trace};
use validator_apdu_core::prelude::*;

use super::{CARD_LABEL, DEFAULT_MASTER_KEY, TERMINAL_LABEL, diversify, session_signature};

#[derive(Debug)]
struct SamState {
    master: [u8; 16],
    key: Option<[u8; 16]>,
    challenge: Option<[u8; 4]>,
    digest: Option<Vec<u8>>,
    injected_failure: Option<(u8, StatusWord)>,
    signatures: usize,
}

impl SamState {
    const fn new(master: [u8; 16]) -> Self {
        Self {
            master,
            key: None,
            challenge: None,
            digest: None,
            injected_failure: None,
            signatures: 0,
        }
    }

    fn reset(&mut self) {
        self.key = None;
        self.challenge = None;
        self.digest = None;
    }

    fn dispatch(&mut self, command: &Command) -> Result<Response, StatusWord> {
        if let Some((ins, status)) = self.injected_failure {
            if ins == command.ins {
                self.injected_failure = None;
                return Err(status);
            }
        }

        match (command.cla, command.ins) {
            (0x80, 0x14) => {
                let serial = command.data.as_deref().ok_or(status::WRONG_LENGTH)?;
                self.key = Some(diversify(&self.master, serial));
                self.digest = None;
                Ok(Response::success(None))
            }
            (0x00, 0x84) => {
                let challenge: [u8; 4] = rand::random();
                self.challenge = Some(challenge);
                Ok(Response::success(Some(Bytes::copy_from_slice(&challenge))))
            }
            (0x80, 0x8A) => {
                let data = command.data.as_deref().ok_or(status::WRONG_LENGTH)?;
                let [_kvc, payload @ ..] = data else {
                    return Err(status::WRONG_LENGTH);
                };
                if self.key.is_none() || self.challenge.is_none() {
                    return Err(status::CONDITIONS_NOT_SATISFIED);
                }
                self.digest = Some(payload.to_vec());
                Ok(Response::success(None))
            }
            (0x80, 0x8C) => {
                let data = command.data.as_deref().unwrap_or_default();
                self.digest
                    .as_mut()
                    .ok_or(status::CONDITIONS_NOT_SATISFIED)?
                    .extend_from_slice(data);
                Ok(Response::success(None))
            }
            (0x80, 0x8E) => {
                let signature = self.sign(TERMINAL_LABEL)?;
                self.signatures += 1;
                Ok(Response::success(Some(Bytes::copy_from_slice(&signature))))
            }
            (0x80, 0x82) => {
                let received = command.data.as_deref().ok_or(status::WRONG_LENGTH)?;
                let expected = self.sign(CARD_LABEL)?;
                self.digest = None;
                if received == expected {
                    Ok(Response::success(None))
                } else {
                    debug!("Card signature rejected by virtual SAM");
                    Err(status::INCORRECT_SIGNATURE)
                }
            }
            (0x00 | 0x80, _) => Err(status::INVALID_INSTRUCTION),
            _ => Err(status::CLASS_NOT_SUPPORTED),
        }
    }

    fn sign(&self, label: u8) -> Result<[u8; 4], StatusWord> {
        match (&self.key, &self.challenge, &self.digest) {
            (Some(key), Some(challenge), Some(digest)) => {
                Ok(session_signature(key, label, challenge, digest))
            }
            _ => Err(status::CONDITIONS_NOT_SATISFIED),
        }
    }
}

/// A simulated SAM computing session signatures for virtual cards
///
/// Clones share state, so a test can keep a handle on the SAM the validator
/// talks to.
#[derive(Debug, Clone)]
pub struct VirtualSam {
    state: Arc<Mutex<SamState>>,
}

impl Default for VirtualSam {
    fn default() -> Self {
        Self::with_master_key(DEFAULT_MASTER_KEY)
    }
}

impl VirtualSam {
    /// SAM holding another master key
    pub fn with_master_key(master: [u8; 16]) -> Self {
        Self {
            state: Arc::new(Mutex::new(SamState::new(master))),
        }
    }

    /// Answer the next command with instruction `ins` with `status`
    pub fn fail_next(&self, ins: u8, status: StatusWord) {
        self.state.lock().injected_failure = Some((ins, status));
    }

    /// Number of terminal signatures computed so far
    pub fn signatures(&self) -> usize {
        self.state.lock().signatures
    }
}

impl CardTransport for VirtualSam {
    fn do_transmit_raw(&mut self, apdu: &[u8]) -> Result<Bytes, Error> {
        let command = Command::from_bytes(apdu)?;
        let response = self
            .state
            .lock()
            .dispatch(&command)
            .unwrap_or_else(Response::error);
        trace!(status = %response.status(), "Virtual SAM exchange");
        Ok(response.to_bytes())
    }

    fn is_connected(&self) -> bool {
        true
    }

    fn release_channel(&mut self) -> Result<(), Error> {
        self.state.lock().reset();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hex_literal::hex;

    const SERIAL: [u8; 8] = hex!("0000000011223344");

    fn send(sam: &mut VirtualSam, apdu: &[u8]) -> Response {
        Response::from_bytes(&sam.transmit_raw(apdu).unwrap()).unwrap()
    }

    #[test]
    fn signs_and_authenticates_a_session() {
        let mut sam = VirtualSam::default();
        assert!(send(&mut sam, &hex!("80140000080000000011223344")).is_success());
        let challenge = send(&mut sam, &hex!("0084000004"));
        assert_eq!(challenge.data().len(), 4);

        assert!(send(&mut sam, &hex!("808A00000403AABBCC")).is_success());
        assert!(send(&mut sam, &hex!("808C000002DDEE")).is_success());
        let signature = send(&mut sam, &hex!("808E000004"));
        assert!(signature.is_success());

        let key = diversify(&DEFAULT_MASTER_KEY, &SERIAL);
        let digest = hex!("AABBCCDDEE");
        assert_eq!(
            signature.data(),
            session_signature(&key, TERMINAL_LABEL, challenge.data(), &digest)
        );

        let card_signature = session_signature(&key, CARD_LABEL, challenge.data(), &digest);
        let mut authenticate = hex!("8082000004").to_vec();
        authenticate.extend_from_slice(&card_signature);
        assert!(send(&mut sam, &authenticate).is_success());
        assert_eq!(sam.signatures(), 1);
    }

    #[test]
    fn rejects_wrong_card_signature() {
        let mut sam = VirtualSam::default();
        send(&mut sam, &hex!("80140000080000000011223344"));
        send(&mut sam, &hex!("0084000004"));
        send(&mut sam, &hex!("808A00000403AABBCC"));
        let response = send(&mut sam, &hex!("808200000400000000"));
        assert!(response.status().is_incorrect_signature());
    }

    #[test]
    fn digest_requires_diversifier_and_challenge() {
        let mut sam = VirtualSam::default();
        let response = send(&mut sam, &hex!("808A00000403AABBCC"));
        assert!(response.status().is_conditions_not_satisfied());
    }
}
