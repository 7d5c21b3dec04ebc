//! PC/SC observable reader and SAM reader

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};

use parking_lot::Mutex;
use pcsc::{Context, ReaderState, State};
use tracing::{debug, error, info, warn};
use validator_apdu_core::prelude::*;

use super::channel::PcscChannel;
use super::config::PcscConfig;
use crate::{
    CardProtocol, DefaultSelectionRequest, NotificationMode, ObservableReader, ObserverId,
    ObserverList, PollingMode, ReaderError, ReaderEvent, ReaderEventSender, SamReader,
    process_selection,
};

#[derive(Debug, Default)]
struct Observation {
    default_selection: Option<DefaultSelectionRequest>,
    observers: ObserverList,
}

/// Channel shared between the detection thread and the reader's owner
#[derive(Debug, Clone)]
struct SharedChannel(Arc<Mutex<PcscChannel>>);

impl CardTransport for SharedChannel {
    fn do_transmit_raw(&mut self, command: &[u8]) -> Result<Bytes, Error> {
        self.0.lock().do_transmit_raw(command)
    }

    fn is_connected(&self) -> bool {
        self.0.lock().is_connected()
    }

    fn release_channel(&mut self) -> Result<(), Error> {
        self.0.lock().release_channel()
    }
}

/// A PC/SC reader with card detection on a background thread
pub struct PcscReader {
    name: String,
    context: Context,
    poll_interval: std::time::Duration,
    protocol: CardProtocol,
    channel: SharedChannel,
    observation: Arc<Mutex<Observation>>,
    running: Arc<AtomicBool>,
    monitor: Option<JoinHandle<()>>,
}

impl fmt::Debug for PcscReader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PcscReader")
            .field("name", &self.name)
            .field("protocol", &self.protocol)
            .field("detecting", &self.running.load(Ordering::SeqCst))
            .finish()
    }
}

impl PcscReader {
    pub(crate) fn new(
        context: Context,
        name: &str,
        config: PcscConfig,
        protocol: CardProtocol,
    ) -> Result<Self, ReaderError> {
        let poll_interval = config.poll_interval;
        let channel = PcscChannel::new(context.clone(), name, config)?;
        Ok(Self {
            name: name.to_string(),
            context,
            poll_interval,
            protocol,
            channel: SharedChannel(Arc::new(Mutex::new(channel))),
            observation: Arc::default(),
            running: Arc::new(AtomicBool::new(false)),
            monitor: None,
        })
    }

    fn spawn_monitor(&self, mode: PollingMode) -> Result<JoinHandle<()>, ReaderError> {
        let monitor = Monitor {
            name: self.name.clone(),
            context: self.context.clone(),
            poll_interval: self.poll_interval,
            protocol: self.protocol.application_protocol_name.clone(),
            channel: self.channel.clone(),
            observation: Arc::clone(&self.observation),
            running: Arc::clone(&self.running),
            mode,
        };
        let handle = thread::Builder::new()
            .name(format!("detect-{}", self.name))
            .spawn(move || monitor.run())?;
        Ok(handle)
    }
}

impl ObservableReader for PcscReader {
    fn name(&self) -> &str {
        &self.name
    }

    fn set_default_selection(&mut self, request: DefaultSelectionRequest) {
        self.observation.lock().default_selection = Some(request);
    }

    fn start_detection(&mut self, mode: PollingMode) -> Result<(), ReaderError> {
        if self.running.swap(true, Ordering::SeqCst) {
            debug!(reader = %self.name, "Detection already running");
            return Ok(());
        }
        if let Some(previous) = self.monitor.take() {
            let _ = previous.join();
        }
        match self.spawn_monitor(mode) {
            Ok(handle) => {
                info!(reader = %self.name, ?mode, "Card detection started");
                self.monitor = Some(handle);
                Ok(())
            }
            Err(e) => {
                self.running.store(false, Ordering::SeqCst);
                Err(e)
            }
        }
    }

    fn stop_detection(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.monitor.take() {
            if handle.join().is_err() {
                error!(reader = %self.name, "Detection thread panicked");
            }
        }
        info!(reader = %self.name, "Card detection stopped");
    }

    fn add_observer(&mut self, sender: ReaderEventSender) -> ObserverId {
        self.observation.lock().observers.add(sender)
    }

    fn remove_observer(&mut self, id: ObserverId) -> bool {
        self.observation.lock().observers.remove(id)
    }

    fn transport(&mut self) -> &mut dyn CardTransport {
        &mut self.channel
    }
}

impl Drop for PcscReader {
    fn drop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
    }
}

/// State moved onto the detection thread
struct Monitor {
    name: String,
    context: Context,
    poll_interval: std::time::Duration,
    protocol: String,
    channel: SharedChannel,
    observation: Arc<Mutex<Observation>>,
    running: Arc<AtomicBool>,
    mode: PollingMode,
}

impl Monitor {
    fn run(self) {
        let reader = self.channel.0.lock().reader().to_owned();
        let mut states = [ReaderState::new(reader, State::UNAWARE)];
        let mut present = false;

        while self.running.load(Ordering::SeqCst) {
            states[0].sync_current_state();
            match self
                .context
                .get_status_change(Some(self.poll_interval), &mut states)
            {
                Ok(()) => {}
                Err(pcsc::Error::Timeout) => continue,
                Err(e) => {
                    warn!(reader = %self.name, error = %e, "Status change wait failed");
                    thread::sleep(self.poll_interval);
                    continue;
                }
            }

            let event_state = states[0].event_state();
            let now_present =
                event_state.contains(State::PRESENT) && !event_state.contains(State::EMPTY);

            if now_present && !present {
                present = true;
                let atr = states[0].atr().to_vec();
                self.on_insertion(&atr);
            } else if !now_present && present {
                present = false;
                self.on_removal();
                if self.mode == PollingMode::SingleShot {
                    debug!(reader = %self.name, "Single shot polling, detection stopped");
                    self.running.store(false, Ordering::SeqCst);
                }
            }
        }
    }

    fn on_insertion(&self, atr: &[u8]) {
        info!(reader = %self.name, atr = %hex::encode_upper(atr), "Card inserted");
        let mut observation = self.observation.lock();
        let observation = &mut *observation;

        let event = match &observation.default_selection {
            Some(request) => {
                let selection = {
                    let mut channel = self.channel.0.lock();
                    channel
                        .connect()
                        .map_err(|e| Error::message(e.to_string()))
                        .and_then(|()| {
                            process_selection(&mut *channel, atr, &self.protocol, request)
                        })
                };
                match selection {
                    Ok(selection) => {
                        if selection.matched_index().is_none()
                            && request.notification == NotificationMode::MatchedOnly
                        {
                            debug!(reader = %self.name, "No candidate matched, insertion not reported");
                            return;
                        }
                        ReaderEvent::selected(self.name.as_str(), selection)
                    }
                    Err(e) => {
                        warn!(reader = %self.name, error = %e, "Default selection failed");
                        ReaderEvent::inserted(self.name.as_str())
                    }
                }
            }
            None => ReaderEvent::inserted(self.name.as_str()),
        };

        observation.observers.notify(&event);
    }

    fn on_removal(&self) {
        info!(reader = %self.name, "Card removed");
        self.channel.0.lock().disconnect();
        self.observation
            .lock()
            .observers
            .notify(&ReaderEvent::removed(self.name.as_str()));
    }
}

/// A PC/SC reader hosting a SAM
pub struct PcscSamReader {
    name: String,
    context: Context,
    config: PcscConfig,
}

impl fmt::Debug for PcscSamReader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PcscSamReader")
            .field("name", &self.name)
            .field("config", &self.config)
            .finish()
    }
}

impl PcscSamReader {
    pub(crate) const fn new(context: Context, name: String, config: PcscConfig) -> Self {
        Self {
            name,
            context,
            config,
        }
    }
}

impl SamReader for PcscSamReader {
    fn name(&self) -> &str {
        &self.name
    }

    fn open_channel(&mut self) -> Result<Box<dyn CardTransport>, ReaderError> {
        let mut channel = PcscChannel::new(self.context.clone(), &self.name, self.config.clone())?;
        channel.connect()?;
        Ok(Box::new(channel))
    }
}
