/// WAV replay source
///
/// Plays a 16kHz mono 16-bit recording through the `AudioSource` contract.
/// The playback position is shared by every stream opened on the source, so
/// a wake stream followed by a clap stream hears the recording as one
/// continuous take, like a live microphone. Reaching the end rewinds and
/// reports `EndOfStream`; a reopened stream starts the recording again.

use crate::audio_source::{AudioError, AudioFrame, AudioSource, StreamHandle, StreamSpec};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

pub struct WavSource {
    path: PathBuf,
    samples: Option<Vec<i16>>,
    sample_rate: u32,
    position: usize,
    active: Option<(StreamHandle, StreamSpec)>,
    next_id: u64,
    paced: bool,
}

impl WavSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            samples: None,
            sample_rate: 0,
            position: 0,
            active: None,
            next_id: 0,
            paced: false,
        }
    }

    /// Sleep one frame period per read so replay runs at capture speed
    pub fn paced(mut self, paced: bool) -> Self {
        self.paced = paced;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Samples left before the recording wraps
    pub fn remaining(&self) -> usize {
        self.samples
            .as_ref()
            .map(|s| s.len().saturating_sub(self.position))
            .unwrap_or(0)
    }

    fn load(path: &Path) -> Result<(Vec<i16>, u32), AudioError> {
        let reader = hound::WavReader::open(path).map_err(|e| {
            AudioError::DeviceUnavailable(format!("cannot open {}: {}", path.display(), e))
        })?;

        let spec = reader.spec();
        if spec.channels != 1
            || spec.bits_per_sample != 16
            || spec.sample_format != hound::SampleFormat::Int
        {
            return Err(AudioError::UnsupportedFormat(format!(
                "{} is {} channel(s), {}-bit {:?}; need mono 16-bit PCM",
                path.display(),
                spec.channels,
                spec.bits_per_sample,
                spec.sample_format
            )));
        }

        let samples = reader
            .into_samples::<i16>()
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| AudioError::Backend(format!("corrupt WAV data: {}", e)))?;

        Ok((samples, spec.sample_rate))
    }
}

impl AudioSource for WavSource {
    fn acquire(&mut self) -> Result<(), AudioError> {
        if self.samples.is_some() {
            return Ok(());
        }

        let (samples, sample_rate) = Self::load(&self.path)?;
        info!(
            "Replaying {} ({} samples at {} Hz, {:.1}s)",
            self.path.display(),
            samples.len(),
            sample_rate,
            samples.len() as f64 / sample_rate.max(1) as f64
        );

        self.samples = Some(samples);
        self.sample_rate = sample_rate;
        self.position = 0;
        Ok(())
    }

    fn release(&mut self) {
        self.active = None;
        self.samples = None;
        self.position = 0;
    }

    fn open(&mut self, spec: StreamSpec) -> Result<StreamHandle, AudioError> {
        if self.active.is_some() {
            return Err(AudioError::Busy);
        }
        if self.samples.is_none() {
            return Err(AudioError::DeviceUnavailable(
                "replay file not loaded".to_string(),
            ));
        }
        if spec.sample_rate != self.sample_rate {
            return Err(AudioError::UnsupportedFormat(format!(
                "recording is {} Hz, stream wants {} Hz",
                self.sample_rate, spec.sample_rate
            )));
        }
        if spec.frame_size == 0 {
            return Err(AudioError::UnsupportedFormat("frame size 0".to_string()));
        }

        self.next_id += 1;
        let handle = StreamHandle::new(self.next_id);
        self.active = Some((handle, spec));
        debug!("Opened replay stream {:?} at sample {}", handle, self.position);
        Ok(handle)
    }

    fn read(&mut self, handle: StreamHandle, frame_size: usize) -> Result<AudioFrame, AudioError> {
        let spec = match self.active {
            Some((active, spec)) if active == handle => spec,
            _ => return Err(AudioError::StreamClosed(handle)),
        };
        let samples = self
            .samples
            .as_ref()
            .ok_or(AudioError::StreamClosed(handle))?;

        if self.position >= samples.len() {
            self.position = 0;
            return Err(AudioError::EndOfStream);
        }

        let end = (self.position + frame_size).min(samples.len());
        let mut frame = samples[self.position..end].to_vec();
        // Last frame is padded with silence
        frame.resize(frame_size, 0);
        self.position = end;

        if self.paced {
            let period = Duration::from_secs_f64(frame_size as f64 / spec.sample_rate as f64);
            std::thread::sleep(period);
        }

        Ok(AudioFrame::new(frame))
    }

    fn close(&mut self, handle: StreamHandle) {
        if matches!(self.active, Some((active, _)) if active == handle) {
            self.active = None;
            debug!("Closed replay stream {:?}", handle);
        }
    }

    fn is_acquired(&self) -> bool {
        self.samples.is_some()
    }
}
