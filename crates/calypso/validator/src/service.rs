//! The event-processing worker
//!
//! One thread owns the reader, the ticketing session and the state machine.
//! Reader events and control inputs are handled one at a time, in arrival
//! order, so no card exchange is ever interleaved with another.

use std::thread::{self, JoinHandle};

use crossbeam_channel::{Receiver, Sender, bounded, select, unbounded};
use tracing::{debug, error, info, warn};
use validator_apdu_reader::{
    PollingMode, ReaderBackend, ReaderEvent, ReaderEventReceiver, reader_event_channel,
    register_backend,
};
use validator_calypso::TransactionStatus;

use crate::config::ValidatorConfig;
use crate::error::{InitError, ServiceError};
use crate::state::{CardReaderResponse, StateMachine};
use crate::ticketing::{Profile, Ticketing, TicketingSession};

/// Control inputs handled by the worker
#[derive(Debug)]
enum Input {
    SystemReady,
    LoadTickets {
        count: u32,
        reply: Sender<TransactionStatus>,
    },
    LoadContract {
        reply: Sender<TransactionStatus>,
    },
    Personalize {
        profile: Profile,
        reply: Sender<TransactionStatus>,
    },
    Shutdown,
}

/// Handle on a running validator
#[derive(Debug)]
pub struct Validator {
    control: Sender<Input>,
    responses: Receiver<CardReaderResponse>,
    po_reader: String,
    sam_reader: Option<String>,
    worker: Option<JoinHandle<()>>,
}

impl Validator {
    /// Register `backend`, arm its card reader and start the worker
    ///
    /// Registration is bounded by the configured timeout. The validator is
    /// ready to accept cards once this returns.
    pub fn start<B: ReaderBackend>(backend: B, config: &ValidatorConfig) -> Result<Self, InitError> {
        let mut backend = register_backend(backend, config.init_timeout())?;

        let po_reader = backend.po_reader(config.po_reader.as_deref())?;
        let sam_reader = backend.sam_reader(config.sam_reader.as_deref())?;
        if sam_reader.is_none() {
            if config.require_sam {
                error!(backend = backend.name(), "No SAM reader available");
                return Err(InitError::SamRequired);
            }
            warn!(backend = backend.name(), "No SAM reader, sessions run unsigned");
        }

        let iso = backend.contactless_iso_protocol();
        let legacy = backend
            .contactless_legacy_protocol()
            .filter(|_| config.legacy_protocol);

        let mut ticketing = TicketingSession::new(po_reader, sam_reader, &iso, legacy.as_ref());
        let po_reader = ticketing.po_reader_name().to_string();
        let sam_reader = ticketing.sam_reader_name().map(str::to_string);

        let (events_tx, events) = reader_event_channel();
        ticketing.start_detection(events_tx, PollingMode::Repeating)?;

        let (control, inputs) = unbounded();
        let (responses_tx, responses) = unbounded();
        let backend: Box<dyn ReaderBackend> = Box::new(backend);
        let mut machine = StateMachine::new();
        machine.system_ready();
        let worker = thread::Builder::new()
            .name("validator-worker".to_string())
            .spawn(move || {
                Worker {
                    _backend: backend,
                    ticketing,
                    machine,
                    responses: responses_tx,
                }
                .run(&events, &inputs);
            })?;

        info!(%po_reader, ?sam_reader, "Validator started");
        Ok(Self {
            control,
            responses,
            po_reader,
            sam_reader,
            worker: Some(worker),
        })
    }

    /// Card reader name
    pub fn po_reader(&self) -> &str {
        &self.po_reader
    }

    /// SAM reader name, if there is one
    pub fn sam_reader(&self) -> Option<&str> {
        self.sam_reader.as_deref()
    }

    /// Results, one per card presence
    pub const fn responses(&self) -> &Receiver<CardReaderResponse> {
        &self.responses
    }

    /// Arm the state machine
    pub fn system_ready(&self) -> Result<(), ServiceError> {
        self.send(Input::SystemReady)
    }

    /// Load `count` tickets on the card in the field
    pub fn load_tickets(&self, count: u32) -> Result<TransactionStatus, ServiceError> {
        self.request(|reply| Input::LoadTickets { count, reply })
    }

    /// Load a season contract on the card in the field
    pub fn load_contract(&self) -> Result<TransactionStatus, ServiceError> {
        self.request(|reply| Input::LoadContract { reply })
    }

    /// Personalize the card in the field
    pub fn personalize(&self, profile: Profile) -> Result<TransactionStatus, ServiceError> {
        self.request(|reply| Input::Personalize { profile, reply })
    }

    /// Stop the worker and wait for it
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn send(&self, input: Input) -> Result<(), ServiceError> {
        self.control.send(input).map_err(|_| ServiceError::WorkerStopped)
    }

    fn request(
        &self,
        input: impl FnOnce(Sender<TransactionStatus>) -> Input,
    ) -> Result<TransactionStatus, ServiceError> {
        let (reply, status) = bounded(1);
        self.send(input(reply))?;
        status.recv().map_err(|_| ServiceError::WorkerStopped)
    }

    fn stop(&mut self) {
        if let Some(worker) = self.worker.take() {
            let _ = self.control.send(Input::Shutdown);
            if worker.join().is_err() {
                error!("Validator worker panicked");
            }
        }
    }
}

impl Drop for Validator {
    fn drop(&mut self) {
        self.stop();
    }
}

struct Worker {
    _backend: Box<dyn ReaderBackend>,
    ticketing: TicketingSession,
    machine: StateMachine,
    responses: Sender<CardReaderResponse>,
}

impl Worker {
    fn run(mut self, events: &ReaderEventReceiver, inputs: &Receiver<Input>) {
        debug!("Validator worker running");
        loop {
            select! {
                recv(events) -> event => match event {
                    Ok(event) => self.on_event(&event),
                    Err(_) => {
                        warn!("Reader event channel closed");
                        break;
                    }
                },
                recv(inputs) -> input => match input {
                    Ok(Input::Shutdown) | Err(_) => break,
                    Ok(input) => self.on_input(input),
                },
            }
        }
        self.ticketing.stop_detection();
        info!("Validator worker stopped");
    }

    fn on_event(&mut self, event: &ReaderEvent) {
        if let Some(response) = self.machine.on_reader_event(event, &mut self.ticketing) {
            info!(
                status = %response.status,
                tickets = response.tickets_remaining,
                card_type = %response.card_type_label,
                "Result"
            );
            if self.responses.send(response).is_err() {
                debug!("Nobody listens for results");
            }
        }
        if !event.is_presence() {
            self.ticketing.clear_selection();
            self.machine.system_ready();
        }
    }

    fn on_input(&mut self, input: Input) {
        let (status, reply) = match input {
            Input::SystemReady => {
                self.machine.system_ready();
                return;
            }
            Input::LoadTickets { count, reply } => (self.ticketing.load_tickets(count), reply),
            Input::LoadContract { reply } => (self.ticketing.load_contract(), reply),
            Input::Personalize { profile, reply } => (self.ticketing.personalize(profile), reply),
            Input::Shutdown => return,
        };
        if reply.send(status).is_err() {
            debug!(%status, "Requester gone before the reply");
        }
    }
}
