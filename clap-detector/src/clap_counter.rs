/// Clap counting over one detection window
///
/// The counter waits (up to `timeout`) for a first loudness sample above the
/// threshold, then counts further qualifying samples for `interval` measured
/// from that first event. A sample only counts when it lands more than
/// `debounce` after the previously counted one, so the several peaks of one
/// physical clap collapse into a single event.
///
/// Boundaries are half-open: a sample at exactly `t0 + interval` closes the
/// window uncounted, and a sample exactly `debounce` after the last event is
/// merged into it.

use crate::audio_source::{AudioError, AudioSource, ScopedStream};
use crate::loudness::loudness;
use std::time::Duration;
use tracing::{debug, warn};

/// Configuration for one counting window
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClapCounterConfig {
    /// RMS value a frame must exceed to count as a clap
    pub amplitude_threshold: f32,

    /// Minimum gap between two counted claps (exclusive)
    pub debounce: Duration,

    /// Window length measured from the first clap
    pub interval: Duration,

    /// How long to wait for the first clap
    pub timeout: Duration,
}

impl Default for ClapCounterConfig {
    fn default() -> Self {
        Self {
            amplitude_threshold: 1500.0,
            debounce: Duration::from_millis(150),
            interval: Duration::from_secs(1),
            timeout: Duration::from_secs(30),
        }
    }
}

/// Loudness of one frame at a point in time
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LoudnessSample {
    pub timestamp: Duration,
    pub energy: f32,
}

impl LoudnessSample {
    pub fn new(timestamp: Duration, energy: f32) -> Self {
        Self { timestamp, energy }
    }
}

/// Where the counter stands after a sample
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CounterStatus {
    /// Still waiting for the first clap
    Waiting,

    /// Inside a sequence with this many claps so far
    Counting(u32),

    /// Window closed with the final count
    Finished(u32),
}

#[derive(Debug, Clone, Copy)]
enum Phase {
    Waiting,
    Counting {
        first: Duration,
        last: Duration,
        count: u32,
    },
    Finished(u32),
}

/// Clap counter state machine
#[derive(Debug, Clone)]
pub struct ClapCounter {
    config: ClapCounterConfig,
    started_at: Duration,
    phase: Phase,
}

impl ClapCounter {
    /// New window; `started_at` is the timestamp the timeout runs from
    pub fn new(config: ClapCounterConfig, started_at: Duration) -> Self {
        Self {
            config,
            started_at,
            phase: Phase::Waiting,
        }
    }

    /// Feed one sample. Samples after the window closed are ignored.
    pub fn feed(&mut self, sample: LoudnessSample) -> CounterStatus {
        let loud = sample.energy > self.config.amplitude_threshold;

        self.phase = match self.phase {
            Phase::Waiting => {
                let waited = sample.timestamp.saturating_sub(self.started_at);
                if waited >= self.config.timeout {
                    debug!("No clap within {:?}", self.config.timeout);
                    Phase::Finished(0)
                } else if loud {
                    debug!(
                        "First clap at {:?} (loudness {:.1})",
                        sample.timestamp, sample.energy
                    );
                    Phase::Counting {
                        first: sample.timestamp,
                        last: sample.timestamp,
                        count: 1,
                    }
                } else {
                    Phase::Waiting
                }
            }

            Phase::Counting { first, last, count } => {
                let elapsed = sample.timestamp.saturating_sub(first);
                if elapsed >= self.config.interval {
                    Phase::Finished(count)
                } else if loud && sample.timestamp.saturating_sub(last) > self.config.debounce {
                    debug!(
                        "Clap {} at {:?} (loudness {:.1})",
                        count + 1,
                        sample.timestamp,
                        sample.energy
                    );
                    Phase::Counting {
                        first,
                        last: sample.timestamp,
                        count: count + 1,
                    }
                } else {
                    Phase::Counting { first, last, count }
                }
            }

            Phase::Finished(count) => Phase::Finished(count),
        };

        self.status()
    }

    /// Close the window early, keeping what was counted
    pub fn finish(&mut self) -> u32 {
        let count = self.count();
        self.phase = Phase::Finished(count);
        count
    }

    pub fn status(&self) -> CounterStatus {
        match self.phase {
            Phase::Waiting => CounterStatus::Waiting,
            Phase::Counting { count, .. } => CounterStatus::Counting(count),
            Phase::Finished(count) => CounterStatus::Finished(count),
        }
    }

    pub fn count(&self) -> u32 {
        match self.phase {
            Phase::Waiting => 0,
            Phase::Counting { count, .. } | Phase::Finished(count) => count,
        }
    }

    pub fn is_finished(&self) -> bool {
        matches!(self.phase, Phase::Finished(_))
    }
}

/// Count claps in a finite sample sequence; running out of samples
/// truncates the window.
pub fn count_claps<I>(config: ClapCounterConfig, samples: I) -> u32
where
    I: IntoIterator<Item = LoudnessSample>,
{
    let mut counter = ClapCounter::new(config, Duration::ZERO);
    for sample in samples {
        if let CounterStatus::Finished(count) = counter.feed(sample) {
            return count;
        }
    }
    counter.finish()
}

/// How a live counting window ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenOutcome {
    /// Window elapsed (or timed out with 0)
    Completed(u32),

    /// A read error cut the window short; count so far
    Truncated(u32),

    /// Pause or stop was requested mid-window
    Interrupted(u32),
}

impl ListenOutcome {
    pub fn count(&self) -> u32 {
        match *self {
            ListenOutcome::Completed(c)
            | ListenOutcome::Truncated(c)
            | ListenOutcome::Interrupted(c) => c,
        }
    }
}

/// Drive a counter from a live stream.
///
/// Timestamps come from the number of frames consumed, so they advance at
/// exactly the capture rate. An overflow advances the clock by every frame
/// of audio it lost.
pub fn listen_for_claps<S, F>(
    stream: &mut ScopedStream<'_, S>,
    config: ClapCounterConfig,
    mut should_abort: F,
) -> ListenOutcome
where
    S: AudioSource + ?Sized,
    F: FnMut() -> bool,
{
    let frame_duration = stream.spec().frame_duration();
    let mut counter = ClapCounter::new(config, Duration::ZERO);
    let mut frame_index: u32 = 0;

    loop {
        if should_abort() {
            return ListenOutcome::Interrupted(counter.finish());
        }

        let timestamp = frame_duration * frame_index;
        frame_index = frame_index.saturating_add(1);

        let frame = match stream.read() {
            Ok(frame) => frame,
            Err(AudioError::Overflow(lost)) => {
                debug!("Lost {} frame(s) while counting", lost);
                frame_index = frame_index.saturating_add(lost.saturating_sub(1));
                continue;
            }
            Err(e) if e.is_transient() => {
                debug!("Dropped frame while counting: {}", e);
                continue;
            }
            Err(e) => {
                log_truncation(&e, counter.count());
                return ListenOutcome::Truncated(counter.finish());
            }
        };

        let sample = LoudnessSample::new(timestamp, loudness(frame.samples()));
        if let CounterStatus::Finished(count) = counter.feed(sample) {
            return ListenOutcome::Completed(count);
        }
    }
}

fn log_truncation(error: &AudioError, count: u32) {
    warn!(
        "Audio read error while counting claps, ending window early with {} clap(s): {}",
        count, error
    );
}
