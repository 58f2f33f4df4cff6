/// Detector notifications
///
/// One-way channel from the detection worker to observers (tray icon, HUD,
/// logger). Sending never blocks: the channel is unbounded and a closed
/// receiver is silently ignored, so a slow or absent observer cannot stall
/// audio capture.

use crate::dispatch::Trigger;
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{info, trace};

/// Detector state machine states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DetectorState {
    /// Not listening (before start, after stop)
    Idle,

    /// Feeding frames to the keyword engine
    AwaitingWakeWord,

    /// Wake word heard, counting claps
    CountingClaps,

    /// Microphone released on request
    Paused,
}

impl std::fmt::Display for DetectorState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            DetectorState::Idle => "idle",
            DetectorState::AwaitingWakeWord => "awaiting wake word",
            DetectorState::CountingClaps => "counting claps",
            DetectorState::Paused => "paused",
        };
        f.write_str(name)
    }
}

/// Notification pushed to observers
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum DetectorEvent {
    StateChanged(DetectorState),

    /// Keyword spotted
    WakeDetected,

    /// Clap window opened
    ListeningForClaps,

    /// Clap count matched a configured action
    ActionTriggered { count: u32, trigger: Trigger },

    /// Live input level in [0, 1]
    AudioLevel(f32),

    /// Human-readable status line
    Log(String),
}

pub type EventReceiver = mpsc::UnboundedReceiver<DetectorEvent>;

/// Create a connected sender/receiver pair
pub fn event_channel() -> (EventSender, EventReceiver) {
    let (tx, rx) = mpsc::unbounded_channel();
    (EventSender { tx }, rx)
}

/// Worker-side end of the event channel
#[derive(Debug, Clone)]
pub struct EventSender {
    tx: mpsc::UnboundedSender<DetectorEvent>,
}

impl EventSender {
    pub fn emit(&self, event: DetectorEvent) {
        if self.tx.send(event).is_err() {
            trace!("No event observer attached, notification dropped");
        }
    }

    /// Emit a `Log` event and mirror it to tracing
    pub fn log(&self, message: impl Into<String>) {
        let message = message.into();
        info!("{}", message);
        self.emit(DetectorEvent::Log(message));
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}
