/// Microphone capture via cpal
///
/// The device context is the cpal input `Device`; each opened stream gets
/// its own capture ring. `cpal::Stream` is not `Send` on every platform, so
/// a `CpalSource` must be created on the thread that uses it.

use crate::audio_buffer::{capture_ring, RingReader, RingWriter, RING_FRAMES};
use crate::audio_source::{AudioError, AudioFrame, AudioSource, StreamHandle, StreamSpec};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleFormat, SampleRate, StreamConfig};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// How long `read` waits for a frame before giving up on the stream
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(2);

struct ActiveStream {
    handle: StreamHandle,
    spec: StreamSpec,
    reader: RingReader,
    failed: Arc<AtomicBool>,
    // Dropping the cpal stream stops capture
    _stream: cpal::Stream,
}

/// Live microphone source on the default input device
pub struct CpalSource {
    device: Option<cpal::Device>,
    active: Option<ActiveStream>,
    next_id: u64,
    read_timeout: Duration,
}

impl CpalSource {
    pub fn new() -> Self {
        Self {
            device: None,
            active: None,
            next_id: 0,
            read_timeout: DEFAULT_READ_TIMEOUT,
        }
    }

    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    /// Pick a mono format that runs at exactly the requested rate
    fn pick_format(device: &cpal::Device, sample_rate: u32) -> Result<SampleFormat, AudioError> {
        let configs = device
            .supported_input_configs()
            .map_err(|e| AudioError::DeviceUnavailable(e.to_string()))?;

        let mut formats: Vec<SampleFormat> = configs
            .filter(|c| c.channels() == 1)
            .filter(|c| c.min_sample_rate().0 <= sample_rate && c.max_sample_rate().0 >= sample_rate)
            .map(|c| c.sample_format())
            .filter(|f| matches!(f, SampleFormat::I16 | SampleFormat::F32))
            .collect();

        // Native 16-bit first, then float
        formats.sort_by_key(|f| if *f == SampleFormat::I16 { 0 } else { 1 });

        formats.first().copied().ok_or_else(|| {
            AudioError::UnsupportedFormat(format!(
                "device has no mono 16-bit or float input at {} Hz",
                sample_rate
            ))
        })
    }

    fn build_stream(
        device: &cpal::Device,
        spec: StreamSpec,
        format: SampleFormat,
        mut writer: RingWriter,
        failed: Arc<AtomicBool>,
    ) -> Result<cpal::Stream, AudioError> {
        let config = StreamConfig {
            channels: 1,
            sample_rate: SampleRate(spec.sample_rate),
            buffer_size: cpal::BufferSize::Default,
        };

        let err_fn = move |err: cpal::StreamError| {
            error!("Audio stream error: {}", err);
            failed.store(true, Ordering::Release);
        };

        let stream = match format {
            SampleFormat::I16 => device.build_input_stream(
                &config,
                move |data: &[i16], _: &cpal::InputCallbackInfo| {
                    writer.write(data);
                },
                err_fn,
                None,
            ),
            SampleFormat::F32 => device.build_input_stream(
                &config,
                move |data: &[f32], _: &cpal::InputCallbackInfo| {
                    writer.write_f32(data);
                },
                err_fn,
                None,
            ),
            other => {
                return Err(AudioError::UnsupportedFormat(format!(
                    "sample format {:?}",
                    other
                )))
            }
        };

        stream.map_err(|e| match e {
            cpal::BuildStreamError::DeviceNotAvailable => {
                AudioError::DeviceUnavailable("input device not available".to_string())
            }
            cpal::BuildStreamError::StreamConfigNotSupported => {
                AudioError::UnsupportedFormat(format!("{:?}", spec))
            }
            other => AudioError::Backend(other.to_string()),
        })
    }
}

impl Default for CpalSource {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioSource for CpalSource {
    fn acquire(&mut self) -> Result<(), AudioError> {
        if self.device.is_some() {
            return Ok(());
        }

        let host = cpal::default_host();
        let device = host
            .default_input_device()
            .ok_or_else(|| AudioError::DeviceUnavailable("no default input device".to_string()))?;

        let name = device.name().unwrap_or_else(|_| "Unknown".to_string());
        info!("Using input device '{}' (host {})", name, host.id().name());

        self.device = Some(device);
        Ok(())
    }

    fn release(&mut self) {
        if let Some(active) = self.active.take() {
            debug!("Closing stream {:?} on release", active.handle);
        }
        if self.device.take().is_some() {
            info!("Input device released");
        }
    }

    fn open(&mut self, spec: StreamSpec) -> Result<StreamHandle, AudioError> {
        if self.active.is_some() {
            return Err(AudioError::Busy);
        }
        if spec.frame_size == 0 {
            return Err(AudioError::UnsupportedFormat("frame size 0".to_string()));
        }

        let device = self
            .device
            .as_ref()
            .ok_or_else(|| AudioError::DeviceUnavailable("device not acquired".to_string()))?;

        let format = Self::pick_format(device, spec.sample_rate)?;
        let (writer, reader) = capture_ring(spec.frame_size * RING_FRAMES)
            .map_err(|e| AudioError::Backend(e.to_string()))?;
        let failed = Arc::new(AtomicBool::new(false));

        let stream = Self::build_stream(device, spec, format, writer, failed.clone())?;
        stream
            .play()
            .map_err(|e| AudioError::Backend(format!("failed to start stream: {}", e)))?;

        self.next_id += 1;
        let handle = StreamHandle::new(self.next_id);
        debug!(
            "Opened stream {:?}: {} Hz, frame {} samples, {:?}",
            handle, spec.sample_rate, spec.frame_size, format
        );

        self.active = Some(ActiveStream {
            handle,
            spec,
            reader,
            failed,
            _stream: stream,
        });
        Ok(handle)
    }

    fn read(&mut self, handle: StreamHandle, frame_size: usize) -> Result<AudioFrame, AudioError> {
        let read_timeout = self.read_timeout;
        let active = match self.active.as_mut() {
            Some(active) if active.handle == handle => active,
            _ => return Err(AudioError::StreamClosed(handle)),
        };

        if frame_size > active.reader.capacity() {
            return Err(AudioError::UnsupportedFormat(format!(
                "frame of {} samples exceeds capture ring",
                frame_size
            )));
        }

        // Poll at a fraction of the frame period
        let poll = (active.spec.frame_duration() / 8).max(Duration::from_millis(1));
        let started = Instant::now();

        loop {
            if active.failed.load(Ordering::Acquire) {
                return Err(AudioError::Backend("capture stream reported an error".to_string()));
            }

            let dropped = active.reader.take_dropped();
            if dropped > 0 {
                let lost = dropped + active.reader.clear();
                let frames = lost.div_ceil(frame_size.max(1)) as u32;
                warn!(
                    "Input overflow on stream {:?}, dropped {} frame(s) of audio",
                    handle, frames
                );
                return Err(AudioError::Overflow(frames));
            }

            if active.reader.len() >= frame_size {
                let samples = active
                    .reader
                    .read(frame_size)
                    .map_err(|e| AudioError::Backend(e.to_string()))?;
                return Ok(AudioFrame::new(samples));
            }

            if started.elapsed() >= read_timeout {
                return Err(AudioError::Stalled(read_timeout.as_millis() as u64));
            }

            std::thread::sleep(poll);
        }
    }

    fn close(&mut self, handle: StreamHandle) {
        match self.active.as_ref() {
            Some(active) if active.handle == handle => {
                self.active = None;
                debug!("Closed stream {:?}", handle);
            }
            _ => debug!("Stream {:?} already closed", handle),
        }
    }

    fn is_acquired(&self) -> bool {
        self.device.is_some()
    }
}
