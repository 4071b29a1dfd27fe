/// Keyword detector module
///
/// Owns one keyword-spotting engine instance and feeds it frames of
/// little-endian 16-bit PCM bytes. Uses the native Porcupine SDK when the
/// `porcupine` feature is enabled and a silent mock engine otherwise.

use crate::engine::{AudioSample, KeywordEngine, BYTES_PER_SAMPLE};
use crate::keyword::{KeywordSpec, Keywords};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, trace};

#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("Invalid keyword specification: {0}")]
    InvalidKeyword(String),

    #[error("Sensitivity of keyword {index} must be between 0.0 and 1.0, got {value}")]
    SensitivityOutOfRange { index: usize, value: f32 },

    #[error("Model file not found: {0}")]
    ModelNotFound(PathBuf),

    #[error("Keyword file {path} cannot be read: {source}")]
    KeywordFileUnreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Access key is required")]
    MissingAccessKey,

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Engine initialization failed: {0}")]
    Init(String),

    #[error("Engine error: {0}")]
    Engine(String),

    #[error("Frame must be exactly {expected} bytes, got {actual}")]
    FrameLength { expected: usize, actual: usize },

    #[error("Detector already disposed")]
    Disposed,
}

impl DetectorError {
    /// True for errors raised while constructing a detector
    pub fn is_construction(&self) -> bool {
        matches!(
            self,
            Self::InvalidKeyword(_)
                | Self::SensitivityOutOfRange { .. }
                | Self::ModelNotFound(_)
                | Self::KeywordFileUnreadable { .. }
                | Self::MissingAccessKey
                | Self::Config(_)
                | Self::Init(_)
        )
    }
}

/// Raw per-frame result of the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessOutcome {
    /// Single-keyword construction: did the keyword end at this frame
    Flag(bool),

    /// Multi-keyword construction: index of the keyword, or -1
    Index(i32),
}

impl ProcessOutcome {
    /// Normalized keyword index: `true` maps to 0, `false` and `-1` to `None`
    pub fn keyword_index(self) -> Option<usize> {
        match self {
            Self::Flag(true) => Some(0),
            Self::Flag(false) => None,
            Self::Index(index) => usize::try_from(index).ok(),
        }
    }
}

/// Frame-level capability the stream adapter depends on
#[cfg_attr(test, mockall::automock)]
pub trait FrameProcessor: Send {
    /// Samples per frame
    fn frame_length(&self) -> usize;

    /// Consume exactly `frame_length() * 2` bytes of little-endian PCM
    fn process(&mut self, frame: &[u8]) -> Result<ProcessOutcome, DetectorError>;

    /// Release engine resources
    fn dispose(&mut self);
}

/// Configuration for the keyword detector
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectorConfig {
    /// Picovoice access key (required by the SDK)
    #[serde(default)]
    pub access_key: String,

    /// Path to the model parameter file (.pv)
    pub model_path: PathBuf,

    /// One keyword (boolean results) or an ordered list (index results)
    pub keywords: Keywords,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            access_key: String::new(), // Must be provided by user
            model_path: PathBuf::from("models/porcupine_params.pv"),
            keywords: Keywords::Single(KeywordSpec::new("models/porcupine.ppn")),
        }
    }
}

impl DetectorConfig {
    /// Load configuration from a JSON file
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, DetectorError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| DetectorError::Config(format!("{}: {}", path.display(), e)))?;

        serde_json::from_str(&text)
            .map_err(|e| DetectorError::Config(format!("{}: {}", path.display(), e)))
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), DetectorError> {
        if self.access_key.is_empty() {
            return Err(DetectorError::MissingAccessKey);
        }

        self.keywords.validate()?;

        if !self.model_path.is_file() {
            return Err(DetectorError::ModelNotFound(self.model_path.clone()));
        }

        for spec in self.keywords.specs() {
            File::open(spec.file_path()).map_err(|source| DetectorError::KeywordFileUnreadable {
                path: spec.file_path().to_path_buf(),
                source,
            })?;
        }

        Ok(())
    }
}

/// Keyword detector owning one engine instance
pub struct Detector {
    engine: Option<Box<dyn KeywordEngine>>,
    multiple_keywords: bool,
    frame_length: usize,
    sample_rate: u32,
    version: String,
    pcm: Vec<AudioSample>,
    frames_processed: u64,
}

impl Detector {
    /// Validate the configuration and construct the engine
    pub fn new(config: &DetectorConfig) -> Result<Self, DetectorError> {
        config.validate()?;

        info!("Initializing keyword detector");
        info!("Model: {}", config.model_path.display());
        for (index, spec) in config.keywords.specs().iter().enumerate() {
            info!(
                "Keyword {}: {} (sensitivity {})",
                index,
                spec.file_path().display(),
                spec.sensitivity()
            );
        }

        let engine = backend::open(config)?;
        Ok(Self::with_engine(engine, config.keywords.is_multiple()))
    }

    /// Wrap an already constructed engine
    pub fn with_engine(engine: Box<dyn KeywordEngine>, multiple_keywords: bool) -> Self {
        let frame_length = engine.frame_length();
        let sample_rate = engine.sample_rate();
        let version = engine.version();

        debug!(
            "Detector ready: version {}, {} Hz, {} samples/frame",
            version, sample_rate, frame_length
        );

        Self {
            engine: Some(engine),
            multiple_keywords,
            frame_length,
            sample_rate,
            version,
            pcm: Vec::with_capacity(frame_length),
            frames_processed: 0,
        }
    }

    /// Process one frame of little-endian PCM bytes
    pub fn process(&mut self, frame: &[u8]) -> Result<ProcessOutcome, DetectorError> {
        let engine = self.engine.as_mut().ok_or(DetectorError::Disposed)?;

        let expected = self.frame_length * BYTES_PER_SAMPLE;
        if frame.len() != expected {
            return Err(DetectorError::FrameLength {
                expected,
                actual: frame.len(),
            });
        }

        self.pcm.clear();
        self.pcm.extend(
            frame
                .chunks_exact(BYTES_PER_SAMPLE)
                .map(|b| AudioSample::from_le_bytes([b[0], b[1]])),
        );

        let index = engine.process(&self.pcm)?;
        self.frames_processed += 1;
        trace!("Frame {} -> {}", self.frames_processed, index);

        Ok(if self.multiple_keywords {
            ProcessOutcome::Index(index)
        } else {
            ProcessOutcome::Flag(index >= 0)
        })
    }

    /// Release the engine. Later calls are no-ops.
    pub fn dispose(&mut self) {
        if self.engine.take().is_some() {
            info!(
                "Keyword detector disposed after {} frames",
                self.frames_processed
            );
        }
    }

    pub fn is_disposed(&self) -> bool {
        self.engine.is_none()
    }

    pub fn frame_length(&self) -> usize {
        self.frame_length
    }

    /// Bytes per frame
    pub fn frame_bytes(&self) -> usize {
        self.frame_length * BYTES_PER_SAMPLE
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn multiple_keywords(&self) -> bool {
        self.multiple_keywords
    }

    pub fn frames_processed(&self) -> u64 {
        self.frames_processed
    }
}

impl FrameProcessor for Detector {
    fn frame_length(&self) -> usize {
        self.frame_length
    }

    fn process(&mut self, frame: &[u8]) -> Result<ProcessOutcome, DetectorError> {
        Detector::process(self, frame)
    }

    fn dispose(&mut self) {
        Detector::dispose(self)
    }
}

// Real Porcupine implementation
#[cfg(feature = "porcupine")]
mod backend {
    use super::*;
    use porcupine::{Porcupine, PorcupineBuilder};

    struct NativeEngine {
        inner: Porcupine,
    }

    impl KeywordEngine for NativeEngine {
        fn process(&mut self, pcm: &[AudioSample]) -> Result<i32, DetectorError> {
            self.inner
                .process(pcm)
                .map_err(|e| DetectorError::Engine(format!("{:?}", e)))
        }

        fn frame_length(&self) -> usize {
            self.inner.frame_length() as usize
        }

        fn sample_rate(&self) -> u32 {
            self.inner.sample_rate()
        }

        fn version(&self) -> String {
            self.inner.version().to_string()
        }
    }

    pub fn open(config: &DetectorConfig) -> Result<Box<dyn KeywordEngine>, DetectorError> {
        let specs = config.keywords.specs();
        let keyword_paths: Vec<PathBuf> = specs.iter().map(|s| s.file_path().to_path_buf()).collect();
        let sensitivities: Vec<f32> = specs.iter().map(|s| s.sensitivity()).collect();

        let inner = PorcupineBuilder::new_with_keyword_paths(config.access_key.clone(), &keyword_paths)
            .model_path(config.model_path.clone())
            .sensitivities(&sensitivities)
            .init()
            .map_err(|e| DetectorError::Init(format!("{:?}", e)))?;

        info!("Porcupine engine loaded");
        Ok(Box::new(NativeEngine { inner }))
    }
}

// Mock implementation for running without the Porcupine SDK
#[cfg(not(feature = "porcupine"))]
mod backend {
    use super::*;
    use crate::engine::ScriptedEngine;
    use tracing::warn;

    pub fn open(_config: &DetectorConfig) -> Result<Box<dyn KeywordEngine>, DetectorError> {
        warn!("Using MOCK keyword engine (porcupine feature not enabled), no keyword will be detected");
        Ok(Box::new(ScriptedEngine::silent()))
    }
}
