/// Capture ring buffer between the audio callback and the reader
///
/// The device callback owns the writer half, the detection worker owns the
/// reader half. When the reader falls behind and the ring fills up, new
/// samples are dropped and counted so the reader can report one transient
/// error, resynchronise, and account for the lost audio.

use cache_padded::CachePadded;
use ringbuf::traits::{Consumer, Observer, Producer, Split};
use ringbuf::HeapRb;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, trace};

/// Audio sample format (16-bit PCM)
pub type AudioSample = i16;

/// Fixed capture rate used everywhere
pub const SAMPLE_RATE: u32 = 16000;

/// Ring capacity, in frames of the stream's frame size
pub const RING_FRAMES: usize = 8;

#[derive(Error, Debug)]
pub enum AudioBufferError {
    #[error("Buffer underflow: attempted to read {0} samples, but only {1} available")]
    Underflow(usize, usize),

    #[error("Invalid buffer size: {0}")]
    InvalidSize(usize),
}

type RingBuffer = HeapRb<AudioSample>;
type RingProducer = <RingBuffer as Split>::Prod;
type RingConsumer = <RingBuffer as Split>::Cons;

/// Create a ring with room for `capacity` samples
pub fn capture_ring(capacity: usize) -> Result<(RingWriter, RingReader), AudioBufferError> {
    if capacity == 0 {
        return Err(AudioBufferError::InvalidSize(capacity));
    }

    debug!("Creating capture ring with capacity: {} samples", capacity);

    let (producer, consumer) = RingBuffer::new(capacity).split();
    let dropped = Arc::new(CachePadded::new(AtomicUsize::new(0)));

    Ok((
        RingWriter {
            producer,
            dropped: dropped.clone(),
        },
        RingReader { consumer, dropped },
    ))
}

/// Producer half, moved into the device callback
pub struct RingWriter {
    producer: RingProducer,
    dropped: Arc<CachePadded<AtomicUsize>>,
}

impl RingWriter {
    /// Push samples; returns how many fit. Never blocks or allocates.
    pub fn write(&mut self, samples: &[AudioSample]) -> usize {
        let written = self.producer.push_slice(samples);
        if written < samples.len() {
            self.dropped
                .fetch_add(samples.len() - written, Ordering::AcqRel);
        }
        written
    }

    /// Push float samples in [-1.0, 1.0], converting to 16-bit
    pub fn write_f32(&mut self, samples: &[f32]) -> usize {
        let mut written = 0;
        for &s in samples {
            let sample = (s * 32767.0).clamp(-32768.0, 32767.0) as AudioSample;
            if self.producer.try_push(sample).is_err() {
                self.dropped
                    .fetch_add(samples.len() - written, Ordering::AcqRel);
                break;
            }
            written += 1;
        }
        written
    }
}

/// Consumer half, owned by the reader
pub struct RingReader {
    consumer: RingConsumer,
    dropped: Arc<CachePadded<AtomicUsize>>,
}

impl RingReader {
    /// Number of samples waiting
    pub fn len(&self) -> usize {
        self.consumer.occupied_len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.consumer.capacity().get()
    }

    /// Samples the writer dropped since the last call; resets the count
    pub fn take_dropped(&self) -> usize {
        self.dropped.swap(0, Ordering::AcqRel)
    }

    /// Pop exactly `count` samples
    pub fn read(&mut self, count: usize) -> Result<Vec<AudioSample>, AudioBufferError> {
        let available = self.consumer.occupied_len();

        if count > available {
            return Err(AudioBufferError::Underflow(count, available));
        }

        let mut result = vec![0; count];
        let read = self.consumer.pop_slice(&mut result);
        result.truncate(read);

        trace!("Read {} samples from capture ring", read);
        Ok(result)
    }

    /// Discard everything buffered; returns how many samples were skipped
    pub fn clear(&mut self) -> usize {
        let occupied = self.consumer.occupied_len();
        self.consumer.skip(occupied);
        debug!("Cleared capture ring ({} samples dropped)", occupied);
        occupied
    }
}
