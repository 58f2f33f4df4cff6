//! Shared test doubles: a scripted audio source that counts every resource
//! operation, and a keyword engine that matches a marker frame.

#![allow(dead_code)]

use clap_detector::{
    ActionDispatcher, AudioError, AudioFrame, AudioSource, DetectionConfig, DetectorControl,
    DetectorEvent, DetectorState, DispatchError, EngineError, EventReceiver, KeywordEngine,
    StreamHandle, StreamSpec, TriggerActions,
};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// First sample of a frame the stub engine treats as the wake word
pub const WAKE_MARKER: i16 = 7777;

/// Stub engine frame length
pub const ENGINE_FRAME: usize = 512;

/// Amplitude of a clap frame (well above the 1500 threshold)
pub const CLAP_AMPLITUDE: i16 = 5000;

/// Frames of silence that close a 1s window at 64ms per clap frame
pub const WINDOW_TAIL: usize = 16;

/// One scripted read result
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Chunk {
    Quiet,
    Loud,
    Wake,
    Overflow,
    Fail,
}

/// Resource operation, in the order the source saw them
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Acquire,
    Release,
    Open(StreamHandle, usize),
    Close(StreamHandle),
}

#[derive(Debug, Default)]
pub struct SourceStats {
    pub ops: Vec<Op>,
    pub open_now: usize,
    pub max_open: usize,
    pub busy_rejections: usize,
    pub failed_opens: usize,
    pub stale_closes: usize,
    pub reads: usize,
}

impl SourceStats {
    pub fn count(&self, wanted: fn(&Op) -> bool) -> usize {
        self.ops.iter().filter(|op| wanted(op)).count()
    }

    pub fn opens(&self) -> usize {
        self.count(|op| matches!(op, Op::Open(..)))
    }

    pub fn closes(&self) -> usize {
        self.count(|op| matches!(op, Op::Close(_)))
    }

    pub fn acquires(&self) -> usize {
        self.count(|op| matches!(op, Op::Acquire))
    }

    pub fn releases(&self) -> usize {
        self.count(|op| matches!(op, Op::Release))
    }

    /// Frame sizes of every opened stream, in order
    pub fn opened_frame_sizes(&self) -> Vec<usize> {
        self.ops
            .iter()
            .filter_map(|op| match op {
                Op::Open(_, size) => Some(*size),
                _ => None,
            })
            .collect()
    }
}

/// What the source does once the script runs out
pub enum Exhausted {
    /// Request a stop and report a transient overflow
    Stop(DetectorControl),

    /// Keep delivering silence
    Silence,
}

pub struct StubSource {
    script: VecDeque<Chunk>,
    exhausted: Exhausted,
    stats: Arc<Mutex<SourceStats>>,
    acquired: bool,
    fail_acquire: bool,
    failing_opens: usize,
    open: Option<StreamHandle>,
    next_id: u64,
}

impl StubSource {
    pub fn new(script: Vec<Chunk>, exhausted: Exhausted) -> Self {
        Self {
            script: script.into(),
            exhausted,
            stats: Arc::new(Mutex::new(SourceStats::default())),
            acquired: false,
            fail_acquire: false,
            failing_opens: 0,
            open: None,
            next_id: 0,
        }
    }

    /// Source without a device
    pub fn unavailable() -> Self {
        let mut source = Self::new(Vec::new(), Exhausted::Silence);
        source.fail_acquire = true;
        source
    }

    /// Fail `count` opens once the first stream has been opened
    pub fn failing_opens(mut self, count: usize) -> Self {
        self.failing_opens = count;
        self
    }

    pub fn stats(&self) -> Arc<Mutex<SourceStats>> {
        self.stats.clone()
    }

    fn record(&self, op: Op) {
        self.stats.lock().unwrap().ops.push(op);
    }
}

impl AudioSource for StubSource {
    fn acquire(&mut self) -> Result<(), AudioError> {
        if self.fail_acquire {
            return Err(AudioError::DeviceUnavailable("stub has no device".to_string()));
        }
        self.acquired = true;
        self.record(Op::Acquire);
        Ok(())
    }

    fn release(&mut self) {
        if let Some(handle) = self.open {
            self.close(handle);
        }
        self.acquired = false;
        self.record(Op::Release);
    }

    fn open(&mut self, spec: StreamSpec) -> Result<StreamHandle, AudioError> {
        if !self.acquired {
            return Err(AudioError::DeviceUnavailable("not acquired".to_string()));
        }
        if self.open.is_some() {
            self.stats.lock().unwrap().busy_rejections += 1;
            return Err(AudioError::Busy);
        }
        if self.next_id > 0 && self.failing_opens > 0 {
            self.failing_opens -= 1;
            self.stats.lock().unwrap().failed_opens += 1;
            return Err(AudioError::Backend("scripted open failure".to_string()));
        }

        self.next_id += 1;
        let handle = StreamHandle::new(self.next_id);
        self.open = Some(handle);

        let mut stats = self.stats.lock().unwrap();
        stats.ops.push(Op::Open(handle, spec.frame_size));
        stats.open_now += 1;
        stats.max_open = stats.max_open.max(stats.open_now);
        Ok(handle)
    }

    fn read(&mut self, handle: StreamHandle, frame_size: usize) -> Result<AudioFrame, AudioError> {
        if self.open != Some(handle) {
            return Err(AudioError::StreamClosed(handle));
        }
        self.stats.lock().unwrap().reads += 1;

        let chunk = match self.script.pop_front() {
            Some(chunk) => chunk,
            None => match &self.exhausted {
                Exhausted::Stop(control) => {
                    control.stop();
                    return Err(AudioError::Overflow(1));
                }
                Exhausted::Silence => {
                    std::thread::sleep(Duration::from_millis(1));
                    Chunk::Quiet
                }
            },
        };

        let fill = match chunk {
            Chunk::Quiet => 0,
            Chunk::Loud => CLAP_AMPLITUDE,
            Chunk::Wake => WAKE_MARKER,
            Chunk::Overflow => return Err(AudioError::Overflow(1)),
            Chunk::Fail => return Err(AudioError::Backend("scripted failure".to_string())),
        };
        Ok(AudioFrame::new(vec![fill; frame_size]))
    }

    fn close(&mut self, handle: StreamHandle) {
        let mut stats = self.stats.lock().unwrap();
        if self.open == Some(handle) {
            self.open = None;
            stats.open_now -= 1;
            stats.ops.push(Op::Close(handle));
        } else {
            stats.stale_closes += 1;
        }
    }

    fn is_acquired(&self) -> bool {
        self.acquired
    }
}

/// Matches any frame starting with `WAKE_MARKER`
#[derive(Debug, Default)]
pub struct StubEngine;

impl KeywordEngine for StubEngine {
    fn sample_rate(&self) -> u32 {
        16000
    }

    fn frame_length(&self) -> usize {
        ENGINE_FRAME
    }

    fn process(&mut self, frame: &[i16]) -> Result<i32, EngineError> {
        Ok(if frame.first() == Some(&WAKE_MARKER) { 0 } else { -1 })
    }
}

/// Clonable dispatcher that records what it was asked to run
#[derive(Debug, Clone, Default)]
pub struct RecordingDispatcher {
    pub calls: Arc<Mutex<Vec<String>>>,
    pub stop_on_dispatch: Option<DetectorControl>,
}

impl RecordingDispatcher {
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

impl ActionDispatcher for RecordingDispatcher {
    type Action = String;

    fn execute(&self, action: &String) -> Result<(), DispatchError> {
        self.calls.lock().unwrap().push(action.clone());
        if let Some(control) = &self.stop_on_dispatch {
            control.stop();
        }
        Ok(())
    }
}

pub fn test_config() -> DetectionConfig {
    DetectionConfig {
        access_key: "test_key".to_string(),
        clap_frame_size: 1024,
        listen_timeout_ms: 500,
        ..Default::default()
    }
}

pub fn test_actions() -> TriggerActions<String> {
    TriggerActions::new(2, "primary".to_string(), 3, "secondary".to_string())
}

/// `n` claps 192ms apart, followed by enough silence to close the window
pub fn claps(n: usize) -> Vec<Chunk> {
    let mut script = Vec::new();
    for _ in 0..n {
        script.extend([Chunk::Loud, Chunk::Quiet, Chunk::Quiet]);
    }
    script.extend(std::iter::repeat(Chunk::Quiet).take(WINDOW_TAIL));
    script
}

/// Quiet wake frames, the wake word, then the given clap pattern
pub fn wake_then(pattern: Vec<Chunk>) -> Vec<Chunk> {
    let mut script = vec![Chunk::Quiet, Chunk::Quiet, Chunk::Wake];
    script.extend(pattern);
    script
}

pub fn drain(rx: &mut EventReceiver) -> Vec<DetectorEvent> {
    std::iter::from_fn(|| rx.try_recv().ok()).collect()
}

pub fn states(events: &[DetectorEvent]) -> Vec<DetectorState> {
    events
        .iter()
        .filter_map(|e| match e {
            DetectorEvent::StateChanged(s) => Some(*s),
            _ => None,
        })
        .collect()
}

pub fn logs(events: &[DetectorEvent]) -> Vec<String> {
    events
        .iter()
        .filter_map(|e| match e {
            DetectorEvent::Log(m) => Some(m.clone()),
            _ => None,
        })
        .collect()
}

/// Block until the worker reports `wanted`, collecting events on the way
pub fn wait_for_state(
    rx: &mut EventReceiver,
    wanted: DetectorState,
    timeout: Duration,
    seen: &mut Vec<DetectorEvent>,
) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        match rx.try_recv() {
            Ok(event) => {
                let hit = event == DetectorEvent::StateChanged(wanted);
                seen.push(event);
                if hit {
                    return true;
                }
            }
            Err(_) => std::thread::sleep(Duration::from_millis(2)),
        }
    }
    false
}
