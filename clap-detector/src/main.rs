/// clapwake service binary
///
/// Say the wake word, then clap: two claps run the primary action, three
/// the secondary one. Configuration comes from `clapwake.json` (or
/// `$CLAPWAKE_CONFIG`) plus environment overrides. SIGHUP reloads it.
///
/// Wake-word detection needs the Porcupine engine, which is optional:
///
///     cargo run --release --features porcupine
///
/// Built without it, the binary exits at startup with an error.

use anyhow::Context;
use clap_detector::{
    AppConfig, AudioSource, CpalSource, DetectionConfig, DetectorError, DetectorEvent,
    DetectorService, EngineError, KeywordEngine, WavSource,
};
use action_launcher::Launcher;
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, trace, warn};
use tracing_subscriber::EnvFilter;

type Components = (Box<dyn AudioSource>, Box<dyn KeywordEngine>);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::from_env().context("Failed to load configuration")?;
    init_tracing(config.debug);

    info!("Starting clapwake v{}", env!("CARGO_PKG_VERSION"));

    let launcher =
        Launcher::from_current(config.launcher.clone()).context("Failed to create launcher")?;
    let replay = config.replay.clone();

    let (mut handle, mut events) = DetectorService::start(
        config.detection.clone(),
        config.trigger_actions(),
        launcher,
        move |detection: &DetectionConfig| build_components(detection, replay.as_deref()),
    )
    .await
    .context("Failed to start detector")?;

    info!(
        "Detector running. Say '{}' and clap {} or {} times...",
        config.detection.keyword,
        config.detection.primary_clap_count,
        config.detection.secondary_clap_count
    );

    let mut reload = ReloadSignal::new().context("Failed to install SIGHUP handler")?;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupt received, shutting down");
                break;
            }
            _ = reload.recv() => {
                let new_config = match AppConfig::from_env() {
                    Ok(new_config) => new_config,
                    Err(e) => {
                        warn!("Keeping current configuration: {}", e);
                        continue;
                    }
                };
                let stats = handle
                    .reload(new_config.detection.clone(), new_config.trigger_actions())
                    .await
                    .context("Reload failed")?;
                info!("Previous detector stats: {:?}", stats);
            }
            event = events.recv() => match event {
                Some(event) => log_event(event),
                None => {
                    info!("Event channel closed, shutting down");
                    break;
                }
            }
        }
    }

    let stats = handle.shutdown().await.context("Detector shutdown failed")?;
    info!("Final stats: {:?}", stats);
    info!("clapwake stopped");
    Ok(())
}

fn init_tracing(debug: bool) {
    let level = if debug { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "clap_detector={level},action_launcher={level},clapwake={level}"
        ))
    });

    tracing_subscriber::fmt().with_env_filter(filter).init();
}

/// Build the audio source and keyword engine on the worker thread
fn build_components(
    config: &DetectionConfig,
    replay: Option<&Path>,
) -> Result<Components, DetectorError> {
    let engine = build_engine(config)?;

    let source: Box<dyn AudioSource> = match replay {
        Some(path) => {
            info!("Replay mode: {}", path.display());
            Box::new(WavSource::new(PathBuf::from(path)).paced(true))
        }
        None => Box::new(CpalSource::new()),
    };

    Ok((source, engine))
}

#[cfg(feature = "porcupine")]
fn build_engine(config: &DetectionConfig) -> Result<Box<dyn KeywordEngine>, EngineError> {
    let engine = clap_detector::porcupine::PorcupineEngine::new(
        &config.access_key,
        &config.keyword,
        config.sensitivity,
    )?;
    Ok(Box::new(engine))
}

#[cfg(not(feature = "porcupine"))]
fn build_engine(_config: &DetectionConfig) -> Result<Box<dyn KeywordEngine>, EngineError> {
    Err(EngineError::Unavailable)
}

fn log_event(event: DetectorEvent) {
    match event {
        DetectorEvent::StateChanged(state) => debug!("State: {}", state),
        DetectorEvent::WakeDetected => info!("Wake word detected"),
        DetectorEvent::ListeningForClaps => info!("Listening for claps..."),
        DetectorEvent::ActionTriggered { count, trigger } => {
            info!("{} claps -> {:?} action", count, trigger)
        }
        DetectorEvent::AudioLevel(level) => trace!("Level: {:.2}", level),
        // Already written to the log by the worker
        DetectorEvent::Log(_) => {}
    }
}

#[cfg(unix)]
struct ReloadSignal(tokio::signal::unix::Signal);

#[cfg(unix)]
impl ReloadSignal {
    fn new() -> std::io::Result<Self> {
        use tokio::signal::unix::{signal, SignalKind};
        Ok(Self(signal(SignalKind::hangup())?))
    }

    async fn recv(&mut self) {
        if self.0.recv().await.is_none() {
            error!("SIGHUP stream closed, reload disabled");
            std::future::pending::<()>().await;
        }
        info!("SIGHUP received, reloading configuration");
    }
}

#[cfg(not(unix))]
struct ReloadSignal;

#[cfg(not(unix))]
impl ReloadSignal {
    fn new() -> std::io::Result<Self> {
        Ok(Self)
    }

    async fn recv(&mut self) {
        std::future::pending::<()>().await
    }
}
