/// Detection orchestrator
///
/// Owns the audio source, the wake-word port and the dispatcher, and runs
/// the detector state machine on the calling thread:
///
/// ```text
/// Idle -> AwaitingWakeWord -> CountingClaps -> AwaitingWakeWord -> ...
///               |   ^
///               v   |
///              Paused            (any) -> Idle on stop
/// ```
///
/// The microphone is handed between the wake-word and clap phases by
/// closing one stream before opening the next, so at most one capture
/// stream exists at any time.

use crate::audio_source::{AudioError, AudioSource, ScopedStream, StreamHandle};
use crate::clap_counter::{listen_for_claps, ListenOutcome};
use crate::config::{ConfigError, DetectionConfig};
use crate::dispatch::{ActionDispatcher, TriggerActions};
use crate::events::{DetectorEvent, DetectorState, EventSender};
use crate::loudness::level;
use crate::service::DetectorControl;
use crate::wake::{EngineError, KeywordEngine, WakeWordPort};
use serde::Serialize;
use std::thread;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, error, info, warn};

/// Wait between attempts to reopen the microphone
pub const REOPEN_BACKOFF: Duration = Duration::from_millis(250);

/// Flag polling period while paused
pub const PAUSE_POLL: Duration = Duration::from_millis(50);

#[derive(Error, Debug)]
pub enum DetectorError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error("Audio initialization failed: {0}")]
    Audio(#[from] AudioError),

    #[error("Failed to spawn detector worker: {0}")]
    Spawn(String),

    #[error("Detector worker panicked")]
    WorkerPanicked,
}

/// Detector statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DetectorStats {
    pub frames_processed: u64,
    pub wake_words_detected: u64,
    pub sequences_counted: u64,
    pub actions_dispatched: u64,
    pub dispatch_failures: u64,
}

pub struct Orchestrator<S, E, D>
where
    S: AudioSource,
    E: KeywordEngine,
    D: ActionDispatcher,
{
    config: DetectionConfig,
    source: S,
    port: Option<WakeWordPort<E>>,
    dispatcher: D,
    actions: TriggerActions<D::Action>,
    events: EventSender,
    control: DetectorControl,
    state: DetectorState,
    wake_stream: Option<StreamHandle>,
    stats: DetectorStats,
}

impl<S, E, D> Orchestrator<S, E, D>
where
    S: AudioSource,
    E: KeywordEngine,
    D: ActionDispatcher,
{
    pub fn new(
        config: DetectionConfig,
        source: S,
        engine: E,
        dispatcher: D,
        actions: TriggerActions<D::Action>,
        events: EventSender,
        control: DetectorControl,
    ) -> Result<Self, DetectorError> {
        if engine.sample_rate() != config.sample_rate {
            return Err(EngineError::Init(format!(
                "engine runs at {} Hz, detector is configured for {} Hz",
                engine.sample_rate(),
                config.sample_rate
            ))
            .into());
        }

        info!("Initializing clap detector");
        info!("Keyword: {}", config.keyword);
        info!(
            "Clap threshold: {}, debounce: {}ms, window: {}ms",
            config.amplitude_threshold, config.debounce_ms, config.clap_interval_ms
        );

        let port = WakeWordPort::new(engine, config.keyword.clone());

        Ok(Self {
            config,
            source,
            port: Some(port),
            dispatcher,
            actions,
            events,
            control,
            state: DetectorState::Idle,
            wake_stream: None,
            stats: DetectorStats::default(),
        })
    }

    /// Acquire the device and open the first wake stream. Any failure here
    /// is fatal for the detector.
    pub fn start(&mut self) -> Result<(), DetectorError> {
        self.source.acquire()?;

        let spec = self
            .port
            .as_ref()
            .map(|p| p.stream_spec())
            .ok_or(EngineError::Unavailable)?;
        let handle = self.source.open(spec)?;
        self.wake_stream = Some(handle);

        self.set_state(DetectorState::AwaitingWakeWord);
        self.events.log(format!(
            "Listening for wake word '{}'",
            self.config.keyword
        ));
        Ok(())
    }

    /// Main loop; returns after a stop request with everything released
    pub fn run(&mut self) {
        loop {
            if self.control.is_stopped() {
                break;
            }

            if self.control.is_paused() {
                if self.state != DetectorState::Paused {
                    self.pause();
                }
                thread::sleep(PAUSE_POLL);
                continue;
            }

            let handle = match self.ensure_wake_stream() {
                Some(handle) => handle,
                None => {
                    self.backoff(REOPEN_BACKOFF);
                    continue;
                }
            };

            if self.state != DetectorState::AwaitingWakeWord {
                self.set_state(DetectorState::AwaitingWakeWord);
                self.events.log("Detection resumed");
            }

            let frame_length = match self.port.as_ref() {
                Some(port) => port.frame_length(),
                None => break,
            };

            let frame = match self.source.read(handle, frame_length) {
                Ok(frame) => frame,
                Err(e) if e.is_transient() => {
                    debug!("Skipping frame: {}", e);
                    continue;
                }
                Err(e) => {
                    warn!("Audio read failed, reopening stream: {}", e);
                    self.close_wake_stream();
                    continue;
                }
            };

            self.stats.frames_processed += 1;
            if self.stats.frames_processed % 1000 == 0 {
                debug!(
                    "Processed {} frames, detected {} wake-words",
                    self.stats.frames_processed, self.stats.wake_words_detected
                );
            }

            self.events.emit(DetectorEvent::AudioLevel(level(
                frame.samples(),
                self.config.level_ceiling,
            )));

            let detected = match self.port.as_mut() {
                Some(port) => port.detect(&frame),
                None => break,
            };

            match detected {
                Ok(true) => self.handle_wake(),
                Ok(false) => {}
                Err(e) => error!("Wake-word detection error: {}", e),
            }
        }

        self.teardown();
    }

    /// Wake word heard: count claps on a fresh stream, then act on the count
    fn handle_wake(&mut self) {
        self.stats.wake_words_detected += 1;
        self.events.emit(DetectorEvent::WakeDetected);
        self.events.log(format!(
            "Wake word '{}' detected",
            self.config.keyword
        ));

        self.close_wake_stream();
        self.set_state(DetectorState::CountingClaps);
        self.events.emit(DetectorEvent::ListeningForClaps);
        self.events.log("Listening for claps...");

        let spec = self.config.clap_stream_spec();
        let counter = self.config.counter_config();
        let control = self.control.clone();
        let started = Instant::now();

        let outcome = match ScopedStream::open(&mut self.source, spec) {
            Ok(mut stream) => listen_for_claps(&mut stream, counter, || {
                control.is_stopped() || control.is_paused()
            }),
            Err(e) => {
                warn!("Failed to open clap stream: {}", e);
                ListenOutcome::Truncated(0)
            }
        };

        debug!("Clap window closed after {:?}: {:?}", started.elapsed(), outcome);

        let count = match outcome {
            ListenOutcome::Interrupted(count) => {
                self.events.log(format!(
                    "Clap detection interrupted after {} clap(s)",
                    count
                ));
                return;
            }
            ListenOutcome::Completed(count) | ListenOutcome::Truncated(count) => count,
        };

        self.stats.sequences_counted += 1;
        self.dispatch(count);

        self.set_state(DetectorState::AwaitingWakeWord);
        // Reopen failure is retried by the main loop
        self.ensure_wake_stream();
    }

    fn dispatch(&mut self, count: u32) {
        match self.actions.resolve(count) {
            Some((trigger, action)) => {
                self.events.log(format!("{} claps detected", count));
                self.events
                    .emit(DetectorEvent::ActionTriggered { count, trigger });

                debug!("Dispatching {:?} action: {:?}", trigger, action);
                match self.dispatcher.execute(action) {
                    Ok(()) => self.stats.actions_dispatched += 1,
                    Err(e) => {
                        self.stats.dispatch_failures += 1;
                        self.events.log(format!("Action failed: {}", e));
                    }
                }
            }
            None => {
                self.events
                    .log(format!("No match for {} clap(s), back to listening", count));
            }
        }
    }

    /// Make sure a wake stream is open, acquiring the device if needed
    fn ensure_wake_stream(&mut self) -> Option<StreamHandle> {
        if let Some(handle) = self.wake_stream {
            return Some(handle);
        }

        if !self.source.is_acquired() {
            if let Err(e) = self.source.acquire() {
                warn!("Failed to acquire audio device: {}", e);
                return None;
            }
        }

        let spec = self.port.as_ref()?.stream_spec();
        match self.source.open(spec) {
            Ok(handle) => {
                debug!("Wake stream {:?} opened", handle);
                self.wake_stream = Some(handle);
                Some(handle)
            }
            Err(e) => {
                warn!("Failed to open wake stream, retrying: {}", e);
                None
            }
        }
    }

    fn close_wake_stream(&mut self) {
        if let Some(handle) = self.wake_stream.take() {
            self.source.close(handle);
        }
    }

    /// Release stream and device; the engine stays loaded
    fn pause(&mut self) {
        self.close_wake_stream();
        if self.source.is_acquired() {
            self.source.release();
        }
        self.set_state(DetectorState::Paused);
        self.events.log("Detection paused");
    }

    /// Sleep in short steps so stop and pause stay responsive
    fn backoff(&self, duration: Duration) {
        let step = Duration::from_millis(10);
        let deadline = Instant::now() + duration;
        while Instant::now() < deadline {
            if self.control.is_stopped() || self.control.is_paused() {
                return;
            }
            thread::sleep(step);
        }
    }

    fn set_state(&mut self, state: DetectorState) {
        if self.state == state {
            return;
        }
        debug!("State: {} -> {}", self.state, state);
        self.state = state;
        self.control.set_state(state);
        self.events.emit(DetectorEvent::StateChanged(state));
    }

    /// Release stream, device and engine, in that order. Idempotent.
    pub fn teardown(&mut self) {
        self.close_wake_stream();
        if self.source.is_acquired() {
            self.source.release();
        }
        if self.port.take().is_some() {
            debug!("Keyword engine released");
        }
        if self.state != DetectorState::Idle {
            self.set_state(DetectorState::Idle);
            info!(
                "Detector stopped: {} frames, {} wake-words, {} actions",
                self.stats.frames_processed,
                self.stats.wake_words_detected,
                self.stats.actions_dispatched
            );
        }
    }

    pub fn state(&self) -> DetectorState {
        self.state
    }

    pub fn stats(&self) -> DetectorStats {
        self.stats
    }

    pub fn source(&self) -> &S {
        &self.source
    }
}

impl<S, E, D> Drop for Orchestrator<S, E, D>
where
    S: AudioSource,
    E: KeywordEngine,
    D: ActionDispatcher,
{
    fn drop(&mut self) {
        self.teardown();
    }
}
