/// Clap detector library
///
/// Listens for a wake word, then counts claps and dispatches an action for
/// the recognised pattern. Audio capture goes through cpal with a lock-free
/// capture ring; the keyword engine (Porcupine) is behind the `porcupine`
/// feature.

pub mod audio_buffer;
pub mod audio_source;
pub mod capture;
pub mod clap_counter;
pub mod config;
pub mod dispatch;
pub mod events;
pub mod loudness;
pub mod orchestrator;
#[cfg(feature = "porcupine")]
pub mod porcupine;
pub mod service;
pub mod wake;
pub mod wav_source;

// Re-export main types
pub use audio_buffer::{AudioSample, SAMPLE_RATE};
pub use audio_source::{AudioError, AudioFrame, AudioSource, ScopedStream, StreamHandle, StreamSpec};
pub use capture::CpalSource;
pub use clap_counter::{count_claps, ClapCounter, ClapCounterConfig, ListenOutcome, LoudnessSample};
pub use config::{AppConfig, ConfigError, DetectionConfig};
pub use dispatch::{ActionDispatcher, DispatchError, Trigger, TriggerActions};
pub use events::{DetectorEvent, DetectorState, EventReceiver, EventSender};
pub use loudness::{level, loudness};
pub use orchestrator::{DetectorError, DetectorStats, Orchestrator};
pub use service::{DetectorControl, DetectorHandle, DetectorService};
pub use wake::{EngineError, KeywordEngine, WakeWordPort};
pub use wav_source::WavSource;
