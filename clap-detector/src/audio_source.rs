/// Audio source abstraction
///
/// An `AudioSource` owns a device context and at most one open capture
/// stream. Streams are identified by `StreamHandle`s; a handle outlives
/// the stream it names, so closing twice or reading after close is safe.

use crate::audio_buffer::AudioSample;
use thiserror::Error;
use tracing::debug;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AudioError {
    #[error("Audio device unavailable: {0}")]
    DeviceUnavailable(String),

    #[error("Unsupported stream format: {0}")]
    UnsupportedFormat(String),

    #[error("Device busy: a capture stream is already open")]
    Busy,

    /// Reader fell behind; carries how many frames of audio were lost
    #[error("Input overflow: reader fell behind, {0} frame(s) dropped")]
    Overflow(u32),

    #[error("Stream {0:?} is not open")]
    StreamClosed(StreamHandle),

    #[error("Stream stalled: no audio for {0} ms")]
    Stalled(u64),

    #[error("End of audio stream")]
    EndOfStream,

    #[error("Audio backend error: {0}")]
    Backend(String),
}

impl AudioError {
    /// Transient errors mean "drop this frame and read again"
    pub fn is_transient(&self) -> bool {
        matches!(self, AudioError::Overflow(_) | AudioError::Busy)
    }
}

/// Opaque identifier of one opened capture stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StreamHandle(u64);

impl StreamHandle {
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn id(&self) -> u64 {
        self.0
    }
}

/// Requested stream shape. Mono 16-bit is implied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamSpec {
    pub sample_rate: u32,
    pub frame_size: usize,
}

impl StreamSpec {
    pub fn new(sample_rate: u32, frame_size: usize) -> Self {
        Self {
            sample_rate,
            frame_size,
        }
    }

    /// Wall-clock span of one frame
    pub fn frame_duration(&self) -> std::time::Duration {
        std::time::Duration::from_secs_f64(self.frame_size as f64 / self.sample_rate as f64)
    }
}

/// One block of consecutive mono samples
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioFrame {
    samples: Vec<AudioSample>,
}

impl AudioFrame {
    pub fn new(samples: Vec<AudioSample>) -> Self {
        Self { samples }
    }

    pub fn samples(&self) -> &[AudioSample] {
        &self.samples
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn into_samples(self) -> Vec<AudioSample> {
        self.samples
    }
}

impl From<Vec<AudioSample>> for AudioFrame {
    fn from(samples: Vec<AudioSample>) -> Self {
        Self::new(samples)
    }
}

/// Capture device with exclusive, one-stream-at-a-time access
pub trait AudioSource {
    /// Obtain the device context. Calling while acquired is a no-op.
    fn acquire(&mut self) -> Result<(), AudioError>;

    /// Drop the device context, closing any open stream first.
    fn release(&mut self);

    /// Open a stream with exactly the requested rate and frame size.
    fn open(&mut self, spec: StreamSpec) -> Result<StreamHandle, AudioError>;

    /// Block until one frame of `frame_size` samples is available.
    fn read(&mut self, handle: StreamHandle, frame_size: usize) -> Result<AudioFrame, AudioError>;

    /// Close a stream. Idempotent; unknown handles are ignored.
    fn close(&mut self, handle: StreamHandle);

    fn is_acquired(&self) -> bool;
}

impl<S: AudioSource + ?Sized> AudioSource for Box<S> {
    fn acquire(&mut self) -> Result<(), AudioError> {
        (**self).acquire()
    }

    fn release(&mut self) {
        (**self).release()
    }

    fn open(&mut self, spec: StreamSpec) -> Result<StreamHandle, AudioError> {
        (**self).open(spec)
    }

    fn read(&mut self, handle: StreamHandle, frame_size: usize) -> Result<AudioFrame, AudioError> {
        (**self).read(handle, frame_size)
    }

    fn close(&mut self, handle: StreamHandle) {
        (**self).close(handle)
    }

    fn is_acquired(&self) -> bool {
        (**self).is_acquired()
    }
}

/// Open/close pair with guaranteed close on every exit path
pub struct ScopedStream<'a, S: AudioSource + ?Sized> {
    source: &'a mut S,
    handle: StreamHandle,
    spec: StreamSpec,
}

impl<'a, S: AudioSource + ?Sized> ScopedStream<'a, S> {
    pub fn open(source: &'a mut S, spec: StreamSpec) -> Result<Self, AudioError> {
        let handle = source.open(spec)?;
        debug!("Opened scoped stream {:?} ({:?})", handle, spec);
        Ok(Self {
            source,
            handle,
            spec,
        })
    }

    /// Read one frame of the size this stream was opened with
    pub fn read(&mut self) -> Result<AudioFrame, AudioError> {
        self.source.read(self.handle, self.spec.frame_size)
    }

    pub fn handle(&self) -> StreamHandle {
        self.handle
    }

    pub fn spec(&self) -> StreamSpec {
        self.spec
    }
}

impl<S: AudioSource + ?Sized> Drop for ScopedStream<'_, S> {
    fn drop(&mut self) {
        self.source.close(self.handle);
        debug!("Closed scoped stream {:?}", self.handle);
    }
}
