//! Card Selector: the ordered candidate applications evaluated on every card
//! presence, and the decoding of the reader's default selection response.

use std::sync::Arc;

use bytes::Bytes;
use tracing::{debug, info, warn};
use validator_apdu_core::{ApduCommand, ApduResponse, Response};
use validator_apdu_reader::{
    AtrFilter, CardProtocol, CardSelectionRequest, CardSelector, DefaultSelectionRequest,
    DefaultSelectionResponse, InvalidatedPolicy, NotificationMode,
};

use crate::card::{CalypsoCard, CardContent};
use crate::commands::{Fci, ReadRecordCommand};
use crate::constants::{BANKING_AID, CALYPSO_AID, NAVIGO_AID, RECORD_NUMBER_1, labels, sfi};

/// Kind of card a candidate recognises
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CardType {
    /// Primary Calypso transit application
    Calypso,
    /// Any card seen through the legacy contactless protocol
    MifareClassic,
    /// Banking application
    Emv,
    /// Secondary transit application
    Navigo,
    /// Unclassified
    Other,
}

impl CardType {
    /// Label surfaced with results
    pub const fn label(self) -> &'static str {
        match self {
            Self::Calypso => labels::CALYPSO,
            Self::MifareClassic => labels::MIFARE_CLASSIC,
            Self::Emv => labels::EMV,
            Self::Navigo => labels::NAVIGO,
            Self::Other => labels::OTHER,
        }
    }
}

impl std::fmt::Display for CardType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// How a candidate recognises a card
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MatchRule {
    /// Application selected by AID prefix
    Aid(Bytes),
    /// Card whose ATR passes the filter
    Atr(AtrFilter),
    /// Any card
    Any,
}

/// One record read executed right after a match
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordRead {
    /// File
    pub sfi: u8,
    /// Record number
    pub record: u8,
}

/// One candidate application
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectionCandidate {
    /// Card type reported when this candidate matches
    pub card_type: CardType,
    /// Matching rule
    pub rule: MatchRule,
    /// Application protocol the card must use, if any
    pub protocol: Option<String>,
    /// What to do with an invalidated application
    pub invalidated: InvalidatedPolicy,
    /// Records read on match
    pub reads: Vec<RecordRead>,
}

impl SelectionCandidate {
    /// Candidate selecting the application `aid`
    pub fn aid(card_type: CardType, aid: &[u8]) -> Self {
        Self {
            card_type,
            rule: MatchRule::Aid(Bytes::copy_from_slice(aid)),
            protocol: None,
            invalidated: InvalidatedPolicy::Reject,
            reads: Vec::new(),
        }
    }

    /// Candidate matching cards by ATR
    pub const fn atr(card_type: CardType, filter: AtrFilter) -> Self {
        Self {
            card_type,
            rule: MatchRule::Atr(filter),
            protocol: None,
            invalidated: InvalidatedPolicy::Reject,
            reads: Vec::new(),
        }
    }

    /// Restrict to cards detected with `protocol`
    pub fn with_protocol(mut self, protocol: &CardProtocol) -> Self {
        self.protocol = Some(protocol.application_protocol_name.clone());
        self
    }

    /// Read `record` of the file `sfi` on match
    pub fn with_read(mut self, sfi: u8, record: u8) -> Self {
        self.reads.push(RecordRead { sfi, record });
        self
    }

    fn to_request(&self) -> CardSelectionRequest {
        let selector = match &self.rule {
            MatchRule::Aid(aid) => CardSelector::aid(aid.clone()),
            MatchRule::Atr(filter) => CardSelector::atr(filter.clone()),
            MatchRule::Any => CardSelector::default(),
        };
        let selector = CardSelector {
            card_protocol: self.protocol.clone(),
            ..selector.with_invalidated(self.invalidated)
        };

        self.reads.iter().fold(CardSelectionRequest::new(selector), |request, read| {
            request.with_command(ReadRecordCommand::new(read.sfi, read.record).to_command())
        })
    }
}

/// Candidates in priority order, and the reader request built from them
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectionPlan {
    candidates: Vec<SelectionCandidate>,
    request: DefaultSelectionRequest,
}

impl SelectionPlan {
    /// Candidates in priority order
    pub fn candidates(&self) -> &[SelectionCandidate] {
        &self.candidates
    }

    /// Request to register as the reader's default selection
    pub const fn request(&self) -> &DefaultSelectionRequest {
        &self.request
    }
}

/// Build the plan for `candidates`, evaluated first-match in the given order
pub fn prepare_selection(candidates: Vec<SelectionCandidate>) -> SelectionPlan {
    let request = DefaultSelectionRequest {
        requests: candidates.iter().map(SelectionCandidate::to_request).collect(),
        notification: NotificationMode::Always,
    };
    debug!(candidates = candidates.len(), "Selection plan prepared");
    SelectionPlan {
        candidates,
        request,
    }
}

/// The validator's candidates
///
/// The Calypso application comes first, with the four ticketing records read
/// on match. The ATR-wildcard fallback is only included when the back-end
/// supports a legacy contactless protocol. The banking and secondary transit
/// applications come last.
pub fn default_candidates(
    iso: &CardProtocol,
    legacy: Option<&CardProtocol>,
) -> Vec<SelectionCandidate> {
    let mut candidates = vec![
        SelectionCandidate::aid(CardType::Calypso, CALYPSO_AID)
            .with_protocol(iso)
            .with_read(sfi::ENVIRONMENT_AND_HOLDER, RECORD_NUMBER_1)
            .with_read(sfi::CONTRACTS, RECORD_NUMBER_1)
            .with_read(sfi::COUNTER, RECORD_NUMBER_1)
            .with_read(sfi::EVENT_LOG, RECORD_NUMBER_1),
    ];
    if let Some(legacy) = legacy {
        candidates.push(
            SelectionCandidate::atr(CardType::MifareClassic, AtrFilter::Any).with_protocol(legacy),
        );
    }
    candidates.push(SelectionCandidate::aid(CardType::Emv, BANKING_AID).with_protocol(iso));
    candidates.push(SelectionCandidate::aid(CardType::Navigo, NAVIGO_AID).with_protocol(iso));
    candidates
}

/// A matched candidate
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveSelection {
    /// Index of the matched candidate in the plan
    pub candidate_index: usize,
    /// Card type of the matched candidate
    pub card_type: CardType,
    /// Serial number, when the application reports one
    pub serial_number: Option<Bytes>,
    /// The Calypso application, for the primary candidate
    pub card: Option<CalypsoCard>,
    /// Content read during selection, for the primary candidate
    pub content: Option<Arc<CardContent>>,
    /// Responses to the prepared reads, in order
    pub read_responses: Vec<Response>,
}

impl ActiveSelection {
    /// Card type label
    pub const fn card_type_label(&self) -> &'static str {
        self.card_type.label()
    }
}

/// Outcome of one card presence
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SelectionOutcome {
    /// No candidate matched, or the selection could not be run
    #[default]
    NoActiveSelection,
    /// A candidate matched
    Active(Arc<ActiveSelection>),
}

impl SelectionOutcome {
    /// The active selection, if any
    pub fn active(&self) -> Option<&ActiveSelection> {
        match self {
            Self::Active(selection) => Some(selection),
            Self::NoActiveSelection => None,
        }
    }
}

/// Decode the reader's default selection response against `plan`
pub fn process_event(plan: &SelectionPlan, response: &DefaultSelectionResponse) -> SelectionOutcome {
    let Some(index) = response.matched_index() else {
        debug!("No candidate matched");
        return SelectionOutcome::NoActiveSelection;
    };
    let (Some(candidate), Some(matched)) = (plan.candidates.get(index), response.matched()) else {
        warn!(index, "Matched candidate is not part of the plan");
        return SelectionOutcome::NoActiveSelection;
    };

    let mut selection = ActiveSelection {
        candidate_index: index,
        card_type: candidate.card_type,
        serial_number: None,
        card: None,
        content: None,
        read_responses: matched.command_responses.clone(),
    };

    if candidate.card_type == CardType::Calypso {
        let fci = matched
            .select_response
            .as_ref()
            .ok_or(())
            .and_then(|select| Fci::parse(select.data()).map_err(|e| warn!(error = %e, "Invalid FCI")));
        let Ok(fci) = fci else {
            return SelectionOutcome::NoActiveSelection;
        };

        let content = decode_content(&candidate.reads, &matched.command_responses);
        info!(
            serial = %hex::encode_upper(&fci.serial_number),
            contract = %content.contract_label(),
            tickets = ?content.tickets(),
            "Calypso application selected"
        );
        selection.serial_number = Some(fci.serial_number.clone());
        selection.card = Some(CalypsoCard::new(fci.df_name, fci.serial_number));
        selection.content = Some(Arc::new(content));
    } else {
        info!(card_type = %candidate.card_type, index, "Non-primary application selected");
    }

    SelectionOutcome::Active(Arc::new(selection))
}

/// Build the card content from the reads run on match
///
/// A read that failed leaves the corresponding field empty.
fn decode_content(reads: &[RecordRead], responses: &[Response]) -> CardContent {
    reads
        .iter()
        .zip(responses)
        .fold(CardContent::default(), |content, (read, response)| {
            if !response.is_success() {
                debug!(sfi = read.sfi, record = read.record, status = %response.status(), "Record not read");
                return content;
            }
            let data = Bytes::copy_from_slice(response.data());
            match read.sfi {
                sfi::ENVIRONMENT_AND_HOLDER => content.with_environment(data),
                sfi::CONTRACTS => content.with_contract(read.record, data),
                sfi::COUNTER => content.with_counters_record(&data),
                sfi::EVENT_LOG => content.with_event(data),
                _ => content,
            }
        })
}
