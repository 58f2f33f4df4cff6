/// Wake-word port
///
/// Thin adapter between audio frames and an external keyword-spotting
/// engine. The engine dictates frame length and sample rate; the port only
/// checks the frame shape and turns the engine's keyword index into a
/// match / no-match answer.

use crate::audio_source::{AudioFrame, StreamSpec};
use thiserror::Error;
use tracing::{debug, info};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum EngineError {
    #[error("Wake-word engine initialization failed: {0}")]
    Init(String),

    #[error("Unknown keyword '{0}' (use a built-in keyword or a .ppn file path)")]
    UnknownKeyword(String),

    #[error("Frame has {actual} samples, engine expects {expected}")]
    FrameLength { expected: usize, actual: usize },

    #[error("Wake-word engine processing failed: {0}")]
    Process(String),

    #[error("Wake-word engine support not compiled in (enable the `porcupine` feature)")]
    Unavailable,
}

/// Keywords bundled with the engine. Anything else must be a `.ppn` path.
pub const BUILTIN_KEYWORDS: &[&str] = &[
    "alexa",
    "americano",
    "blueberry",
    "bumblebee",
    "computer",
    "grapefruit",
    "grasshopper",
    "hey google",
    "hey siri",
    "jarvis",
    "ok google",
    "picovoice",
    "porcupine",
    "terminator",
];

/// Custom keyword model file extension
pub const KEYWORD_FILE_EXTENSION: &str = "ppn";

/// Whether `keyword` names a built-in keyword or a keyword model file
pub fn is_supported_keyword(keyword: &str) -> bool {
    let normalized = keyword.trim().to_lowercase();
    BUILTIN_KEYWORDS.contains(&normalized.as_str()) || is_keyword_file(keyword)
}

pub fn is_keyword_file(keyword: &str) -> bool {
    std::path::Path::new(keyword.trim())
        .extension()
        .map(|ext| ext.eq_ignore_ascii_case(KEYWORD_FILE_EXTENSION))
        .unwrap_or(false)
}

/// External keyword-spotting engine
pub trait KeywordEngine {
    /// Sample rate the engine expects
    fn sample_rate(&self) -> u32;

    /// Samples per `process` call
    fn frame_length(&self) -> usize;

    /// Non-negative keyword index on a match, negative otherwise
    fn process(&mut self, frame: &[i16]) -> Result<i32, EngineError>;
}

impl<E: KeywordEngine + ?Sized> KeywordEngine for Box<E> {
    fn sample_rate(&self) -> u32 {
        (**self).sample_rate()
    }

    fn frame_length(&self) -> usize {
        (**self).frame_length()
    }

    fn process(&mut self, frame: &[i16]) -> Result<i32, EngineError> {
        (**self).process(frame)
    }
}

/// Adapter from audio frames to the engine
pub struct WakeWordPort<E: KeywordEngine> {
    engine: E,
    keyword: String,
    matches: u64,
}

impl<E: KeywordEngine> WakeWordPort<E> {
    pub fn new(engine: E, keyword: impl Into<String>) -> Self {
        let keyword = keyword.into();
        info!(
            "Wake-word port ready: keyword='{}', frame_length={}, sample_rate={}",
            keyword,
            engine.frame_length(),
            engine.sample_rate()
        );
        Self {
            engine,
            keyword,
            matches: 0,
        }
    }

    /// Stream shape to open for wake-word listening
    pub fn stream_spec(&self) -> StreamSpec {
        StreamSpec::new(self.engine.sample_rate(), self.engine.frame_length())
    }

    pub fn frame_length(&self) -> usize {
        self.engine.frame_length()
    }

    pub fn sample_rate(&self) -> u32 {
        self.engine.sample_rate()
    }

    pub fn keyword(&self) -> &str {
        &self.keyword
    }

    pub fn matches(&self) -> u64 {
        self.matches
    }

    /// Feed one frame; true when the keyword was spotted
    pub fn detect(&mut self, frame: &AudioFrame) -> Result<bool, EngineError> {
        let expected = self.engine.frame_length();
        if frame.len() != expected {
            return Err(EngineError::FrameLength {
                expected,
                actual: frame.len(),
            });
        }

        let index = self.engine.process(frame.samples())?;
        if index >= 0 {
            self.matches += 1;
            debug!("Keyword '{}' matched (index {})", self.keyword, index);
            return Ok(true);
        }

        Ok(false)
    }

    /// Hand back the engine, e.g. to drop it at a chosen point
    pub fn into_engine(self) -> E {
        self.engine
    }
}
