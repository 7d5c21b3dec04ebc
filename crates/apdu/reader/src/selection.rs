//! Default selection: the ordered, first-match application selection a reader
//! runs by itself each time a card enters its field.

use bytes::Bytes;
use tracing::{debug, trace};
use validator_apdu_core::{ApduResponse, CardTransport, Command, Error, ResultExt, Response};

/// ISO 7816-4 SELECT by DF name, first occurrence
const SELECT_BY_NAME: (u8, u8, u8, u8) = (0x00, 0xA4, 0x04, 0x00);

/// ATR matching rule
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum AtrFilter {
    /// Any ATR
    #[default]
    Any,
    /// ATR starting with the given bytes
    Prefix(Bytes),
}

impl AtrFilter {
    /// Check an ATR against this filter
    pub fn matches(&self, atr: &[u8]) -> bool {
        match self {
            Self::Any => true,
            Self::Prefix(prefix) => atr.starts_with(prefix),
        }
    }
}

/// What to do when the card answers SELECT with "application invalidated"
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InvalidatedPolicy {
    /// Treat an invalidated application as a non-match
    #[default]
    Reject,
    /// Accept an invalidated application
    Accept,
}

/// Structural matching rule for one candidate application
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CardSelector {
    /// Application protocol name the card must use, if any
    pub card_protocol: Option<String>,
    /// AID (or AID prefix) to select, if any
    pub aid: Option<Bytes>,
    /// ATR filter
    pub atr: AtrFilter,
    /// Invalidated application policy
    pub invalidated: InvalidatedPolicy,
}

impl CardSelector {
    /// Selector matching an application by AID prefix
    pub fn aid(aid: impl Into<Bytes>) -> Self {
        Self {
            aid: Some(aid.into()),
            ..Self::default()
        }
    }

    /// Selector matching any card with the given ATR filter
    pub fn atr(filter: AtrFilter) -> Self {
        Self {
            atr: filter,
            ..Self::default()
        }
    }

    /// Restrict the selector to one application protocol
    pub fn with_protocol(mut self, protocol: impl Into<String>) -> Self {
        self.card_protocol = Some(protocol.into());
        self
    }

    /// Set the invalidated application policy
    pub const fn with_invalidated(mut self, policy: InvalidatedPolicy) -> Self {
        self.invalidated = policy;
        self
    }
}

/// One candidate of a default selection, with the APDUs to run on match
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CardSelectionRequest {
    /// Matching rule
    pub selector: CardSelector,
    /// Commands sent right after a successful match
    pub commands: Vec<Command>,
}

impl CardSelectionRequest {
    /// Create a request with no prepared commands
    pub const fn new(selector: CardSelector) -> Self {
        Self {
            selector,
            commands: Vec::new(),
        }
    }

    /// Add a command to run on match
    pub fn with_command(mut self, command: Command) -> Self {
        self.commands.push(command);
        self
    }
}

/// When a reader reports a card insertion to its observers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NotificationMode {
    /// Report every insertion, matched or not
    #[default]
    Always,
    /// Report only insertions where a candidate matched
    MatchedOnly,
}

/// Ordered candidates evaluated with a first-match policy
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DefaultSelectionRequest {
    /// Candidates in priority order
    pub requests: Vec<CardSelectionRequest>,
    /// Notification mode
    pub notification: NotificationMode,
}

/// Outcome of one candidate
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CardSelectionResponse {
    /// Whether the candidate matched
    pub matched: bool,
    /// Response to SELECT, when one was sent
    pub select_response: Option<Response>,
    /// Responses to the prepared commands, in order
    pub command_responses: Vec<Response>,
}

impl CardSelectionResponse {
    /// Response for a candidate that was not matched
    pub fn not_matched(select_response: Option<Response>) -> Self {
        Self {
            matched: false,
            select_response,
            command_responses: Vec::new(),
        }
    }
}

/// Result of a default selection, one entry per attempted candidate
///
/// Entries are in candidate order. Evaluation stops at the first match, so the
/// matched entry, if any, is always the last one.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DefaultSelectionResponse {
    /// ATR of the card
    pub atr: Bytes,
    /// Per-candidate responses
    pub responses: Vec<CardSelectionResponse>,
}

impl DefaultSelectionResponse {
    /// Index of the matched candidate
    pub fn matched_index(&self) -> Option<usize> {
        self.responses.iter().position(|r| r.matched)
    }

    /// Response of the matched candidate
    pub fn matched(&self) -> Option<&CardSelectionResponse> {
        self.responses.iter().find(|r| r.matched)
    }
}

/// Run a default selection against the card behind `transport`
///
/// `protocol` is the application protocol name the card was detected with.
/// Transmission failures abort the whole selection; status words never do.
pub fn process_selection(
    transport: &mut dyn CardTransport,
    atr: &[u8],
    protocol: &str,
    request: &DefaultSelectionRequest,
) -> Result<DefaultSelectionResponse, Error> {
    let mut responses = Vec::with_capacity(request.requests.len());

    for (index, candidate) in request.requests.iter().enumerate() {
        let selector = &candidate.selector;

        if selector
            .card_protocol
            .as_deref()
            .is_some_and(|wanted| wanted != protocol)
        {
            trace!(index, protocol, "Candidate skipped on protocol");
            responses.push(CardSelectionResponse::not_matched(None));
            continue;
        }

        if !selector.atr.matches(atr) {
            trace!(index, "Candidate skipped on ATR");
            responses.push(CardSelectionResponse::not_matched(None));
            continue;
        }

        let select_response = match &selector.aid {
            Some(aid) => {
                let (cla, ins, p1, p2) = SELECT_BY_NAME;
                let select = Command::new_with_data_and_le(cla, ins, p1, p2, aid.clone(), 0x00);
                let response = transport
                    .transmit(&select)
                    .context(format!("SELECT {} failed", hex::encode_upper(aid)))?;

                let status = response.status();
                let accepted = status.is_success()
                    || (status.is_invalidated()
                        && selector.invalidated == InvalidatedPolicy::Accept);
                if !accepted {
                    debug!(index, aid = %hex::encode_upper(aid), %status, "Candidate not matched");
                    responses.push(CardSelectionResponse::not_matched(Some(response)));
                    continue;
                }
                Some(response)
            }
            None => None,
        };

        let mut command_responses = Vec::with_capacity(candidate.commands.len());
        for command in &candidate.commands {
            command_responses.push(
                transport
                    .transmit(command)
                    .context("Prepared selection command failed")?,
            );
        }

        debug!(index, "Candidate matched");
        responses.push(CardSelectionResponse {
            matched: true,
            select_response,
            command_responses,
        });
        break;
    }

    Ok(DefaultSelectionResponse {
        atr: Bytes::copy_from_slice(atr),
        responses,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use hex_literal::hex;
    use validator_apdu_core::MockTransport;

    fn request() -> DefaultSelectionRequest {
        DefaultSelectionRequest {
            requests: vec![
                CardSelectionRequest::new(CardSelector::aid(Bytes::from_static(&hex!("A0000001"))))
                    .with_command(Command::new_with_le(0x00, 0xB2, 0x01, 0x3C, 0x00)),
                CardSelectionRequest::new(
                    CardSelector::atr(AtrFilter::Any).with_protocol("MIFARE_CLASSIC"),
                ),
                CardSelectionRequest::new(CardSelector::aid(Bytes::from_static(&hex!("A0000002")))),
            ],
            notification: NotificationMode::Always,
        }
    }

    #[test]
    fn stops_at_first_match_and_runs_prepared_commands() {
        let mut transport = MockTransport::new(vec![
            Bytes::from_static(&hex!("6F009000")),
            Bytes::from_static(&hex!("01029000")),
        ]);

        let response =
            process_selection(&mut transport, &hex!("3B8F"), "ISO_14443_4", &request()).unwrap();

        assert_eq!(response.matched_index(), Some(0));
        assert_eq!(response.responses.len(), 1);
        let matched = response.matched().unwrap();
        assert_eq!(matched.command_responses[0].data(), &hex!("0102"));
        assert_eq!(transport.commands.len(), 2);
    }

    #[test]
    fn protocol_filter_skips_without_exchange() {
        let mut transport = MockTransport::new(vec![
            Bytes::from_static(&hex!("6A82")),
            Bytes::from_static(&hex!("9000")),
        ]);

        let response =
            process_selection(&mut transport, &hex!("3B8F"), "ISO_14443_4", &request()).unwrap();

        assert_eq!(response.matched_index(), Some(2));
        assert_eq!(response.responses.len(), 3);
        assert!(response.responses[1].select_response.is_none());
        assert_eq!(transport.commands.len(), 2);
    }

    #[test]
    fn invalidated_application_is_rejected_by_default() {
        let mut transport = MockTransport::new(vec![
            Bytes::from_static(&hex!("6283")),
            Bytes::from_static(&hex!("6A82")),
        ]);

        let response =
            process_selection(&mut transport, &hex!("3B8F"), "ISO_14443_4", &request()).unwrap();

        assert_eq!(response.matched_index(), None);
        let first = response.responses[0].select_response.as_ref().unwrap();
        assert!(first.status().is_invalidated());
    }

    #[test]
    fn transmission_failure_aborts_selection() {
        let mut transport = MockTransport::new(Vec::new());
        assert!(process_selection(&mut transport, &[], "ISO_14443_4", &request()).is_err());
    }
}
