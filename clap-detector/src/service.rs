/// Detector service
///
/// Runs an `Orchestrator` on a dedicated worker thread. The audio source and
/// keyword engine are built inside that thread by a factory, since capture
/// streams are not always `Send`. Control from other threads goes through
/// atomic flags that the worker checks once per frame.

use crate::audio_source::AudioSource;
use crate::config::DetectionConfig;
use crate::dispatch::{ActionDispatcher, TriggerActions};
use crate::events::{event_channel, DetectorState, EventReceiver, EventSender};
use crate::orchestrator::{DetectorError, DetectorStats, Orchestrator};
use crate::wake::KeywordEngine;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use tokio::sync::oneshot;
use tracing::{error, info, warn};

/// Cross-thread control of one detector worker
#[derive(Debug, Clone, Default)]
pub struct DetectorControl {
    paused: Arc<AtomicBool>,
    stopped: Arc<AtomicBool>,
    state: Arc<AtomicU8>,
}

impl DetectorControl {
    pub fn new() -> Self {
        Self::default()
    }

    /// Release the microphone until `resume`
    pub fn pause(&self) {
        self.paused.store(true, Ordering::SeqCst);
    }

    pub fn resume(&self) {
        self.paused.store(false, Ordering::SeqCst);
    }

    /// Ask the worker to tear down and exit
    pub fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    /// Last state published by the worker
    pub fn state(&self) -> DetectorState {
        match self.state.load(Ordering::Acquire) {
            1 => DetectorState::AwaitingWakeWord,
            2 => DetectorState::CountingClaps,
            3 => DetectorState::Paused,
            _ => DetectorState::Idle,
        }
    }

    pub(crate) fn set_state(&self, state: DetectorState) {
        let code = match state {
            DetectorState::Idle => 0,
            DetectorState::AwaitingWakeWord => 1,
            DetectorState::CountingClaps => 2,
            DetectorState::Paused => 3,
        };
        self.state.store(code, Ordering::Release);
    }
}

type Launch<A> = dyn Fn(
        DetectionConfig,
        TriggerActions<A>,
        EventSender,
        DetectorControl,
    ) -> Result<Worker, DetectorError>
    + Send
    + Sync;

/// A spawned worker thread and its startup result
struct Worker {
    thread: JoinHandle<DetectorStats>,
    ready: oneshot::Receiver<Result<(), DetectorError>>,
}

impl Worker {
    /// Wait for startup; on failure the thread has already exited
    async fn ready(self) -> Result<JoinHandle<DetectorStats>, DetectorError> {
        match self.ready.await {
            Ok(Ok(())) => Ok(self.thread),
            Ok(Err(e)) => {
                let _ = tokio::task::spawn_blocking(move || self.thread.join()).await;
                Err(e)
            }
            Err(_) => Err(DetectorError::WorkerPanicked),
        }
    }
}

pub struct DetectorService;

impl DetectorService {
    /// Spawn a detector worker and wait until it is listening.
    ///
    /// Startup errors (engine construction, no audio device, invalid
    /// configuration) are returned here rather than from the worker.
    pub async fn start<S, E, D, F>(
        config: DetectionConfig,
        actions: TriggerActions<D::Action>,
        dispatcher: D,
        factory: F,
    ) -> Result<(DetectorHandle<D::Action>, EventReceiver), DetectorError>
    where
        S: AudioSource + 'static,
        E: KeywordEngine + 'static,
        D: ActionDispatcher + Clone + Send + Sync + 'static,
        D::Action: Clone + Send + 'static,
        F: Fn(&DetectionConfig) -> Result<(S, E), DetectorError> + Send + Sync + 'static,
    {
        let factory = Arc::new(factory);

        let launch: Arc<Launch<D::Action>> = Arc::new(
            move |config: DetectionConfig,
                  actions: TriggerActions<D::Action>,
                  events: EventSender,
                  control: DetectorControl|
                  -> Result<Worker, DetectorError> {
                let factory = factory.clone();
                let dispatcher = dispatcher.clone();
                let (ready_tx, ready) = oneshot::channel();

                let thread = std::thread::Builder::new()
                    .name("clap-detector".to_string())
                    .spawn(move || {
                        let init = config.validate().map_err(DetectorError::from).and_then(|_| {
                            let (source, engine) = (*factory)(&config)?;
                            Orchestrator::new(
                                config, source, engine, dispatcher, actions, events, control,
                            )
                        });

                        let mut orchestrator = match init {
                            Ok(orchestrator) => orchestrator,
                            Err(e) => {
                                let _ = ready_tx.send(Err(e));
                                return DetectorStats::default();
                            }
                        };

                        if let Err(e) = orchestrator.start() {
                            orchestrator.teardown();
                            let _ = ready_tx.send(Err(e));
                            return orchestrator.stats();
                        }

                        if ready_tx.send(Ok(())).is_err() {
                            warn!("Detector start abandoned by caller, releasing audio");
                            orchestrator.teardown();
                            return orchestrator.stats();
                        }

                        orchestrator.run();
                        orchestrator.stats()
                    })
                    .map_err(|e| DetectorError::Spawn(e.to_string()))?;

                Ok(Worker { thread, ready })
            },
        );

        let (events, receiver) = event_channel();
        let control = DetectorControl::new();
        let thread = launch(config, actions, events.clone(), control.clone())?
            .ready()
            .await?;

        info!("Detector service started");

        Ok((
            DetectorHandle {
                control,
                thread: Some(thread),
                events,
                launch,
            },
            receiver,
        ))
    }
}

/// Owner-side handle to a running detector
pub struct DetectorHandle<A> {
    control: DetectorControl,
    thread: Option<JoinHandle<DetectorStats>>,
    events: EventSender,
    launch: Arc<Launch<A>>,
}

impl<A> DetectorHandle<A> {
    pub fn pause(&self) {
        info!("Pause requested");
        self.control.pause();
    }

    pub fn resume(&self) {
        info!("Resume requested");
        self.control.resume();
    }

    pub fn stop(&self) {
        info!("Stop requested");
        self.control.stop();
    }

    pub fn state(&self) -> DetectorState {
        self.control.state()
    }

    pub fn is_running(&self) -> bool {
        self.thread.as_ref().map(|t| !t.is_finished()).unwrap_or(false)
    }

    /// Stop the worker and block until it exits
    pub fn join(mut self) -> Result<DetectorStats, DetectorError> {
        self.control.stop();
        join_worker(self.thread.take())
    }

    /// Stop the worker and wait for it without blocking the runtime
    pub async fn shutdown(mut self) -> Result<DetectorStats, DetectorError> {
        self.control.stop();
        let thread = self.thread.take();
        tokio::task::spawn_blocking(move || join_worker(thread))
            .await
            .map_err(|_| DetectorError::WorkerPanicked)?
    }

    /// Replace the running worker with one built from a new configuration.
    ///
    /// Observers keep their event receiver. If the new worker fails to
    /// start, the old one is already gone and the error is returned.
    pub async fn reload(
        &mut self,
        config: DetectionConfig,
        actions: TriggerActions<A>,
    ) -> Result<DetectorStats, DetectorError> {
        info!("Reloading detector");
        self.control.stop();
        let old = self.thread.take();
        let stats = tokio::task::spawn_blocking(move || join_worker(old))
            .await
            .map_err(|_| DetectorError::WorkerPanicked)??;

        let control = DetectorControl::new();
        let worker = (self.launch)(config, actions, self.events.clone(), control.clone())?;
        self.control = control;
        self.thread = Some(worker.ready().await?);

        info!("Detector reloaded");
        Ok(stats)
    }
}

fn join_worker(thread: Option<JoinHandle<DetectorStats>>) -> Result<DetectorStats, DetectorError> {
    match thread {
        Some(thread) => thread.join().map_err(|_| {
            error!("Detector worker panicked");
            DetectorError::WorkerPanicked
        }),
        None => Ok(DetectorStats::default()),
    }
}

impl<A> Drop for DetectorHandle<A> {
    fn drop(&mut self) {
        if self.thread.is_some() {
            warn!("Detector handle dropped while running, stopping worker");
            self.control.stop();
        }
    }
}
