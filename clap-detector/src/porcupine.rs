/// Picovoice Porcupine keyword engine

use crate::wake::{is_keyword_file, EngineError, KeywordEngine};
use porcupine::{BuiltinKeywords, Porcupine, PorcupineBuilder};
use tracing::info;

pub struct PorcupineEngine {
    inner: Porcupine,
}

impl PorcupineEngine {
    /// Build an engine for one keyword: a built-in name or a `.ppn` path
    pub fn new(access_key: &str, keyword: &str, sensitivity: f32) -> Result<Self, EngineError> {
        if access_key.trim().is_empty() {
            return Err(EngineError::Init("Porcupine access key is missing".to_string()));
        }

        let mut builder = if is_keyword_file(keyword) {
            PorcupineBuilder::new_with_keyword_paths(access_key, &[keyword.trim()])
        } else {
            let builtin = builtin_keyword(keyword)?;
            PorcupineBuilder::new_with_keywords(access_key, &[builtin])
        };

        let inner = builder
            .sensitivities(&[sensitivity])
            .init()
            .map_err(|e| EngineError::Init(format!("{:?}", e)))?;

        info!(
            "Porcupine ready (frame_length={}, sample_rate={})",
            inner.frame_length(),
            inner.sample_rate()
        );

        Ok(Self { inner })
    }
}

impl KeywordEngine for PorcupineEngine {
    fn sample_rate(&self) -> u32 {
        self.inner.sample_rate()
    }

    fn frame_length(&self) -> usize {
        self.inner.frame_length() as usize
    }

    fn process(&mut self, frame: &[i16]) -> Result<i32, EngineError> {
        self.inner
            .process(frame)
            .map_err(|e| EngineError::Process(format!("{:?}", e)))
    }
}

fn builtin_keyword(keyword: &str) -> Result<BuiltinKeywords, EngineError> {
    let keyword = match keyword.trim().to_lowercase().as_str() {
        "alexa" => BuiltinKeywords::Alexa,
        "americano" => BuiltinKeywords::Americano,
        "blueberry" => BuiltinKeywords::Blueberry,
        "bumblebee" => BuiltinKeywords::Bumblebee,
        "computer" => BuiltinKeywords::Computer,
        "grapefruit" => BuiltinKeywords::Grapefruit,
        "grasshopper" => BuiltinKeywords::Grasshopper,
        "hey google" => BuiltinKeywords::HeyGoogle,
        "hey siri" => BuiltinKeywords::HeySiri,
        "jarvis" => BuiltinKeywords::Jarvis,
        "ok google" => BuiltinKeywords::OkGoogle,
        "picovoice" => BuiltinKeywords::Picovoice,
        "porcupine" => BuiltinKeywords::Porcupine,
        "terminator" => BuiltinKeywords::Terminator,
        _ => return Err(EngineError::UnknownKeyword(keyword.to_string())),
    };
    Ok(keyword)
}
