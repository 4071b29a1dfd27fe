/// Keyword-spotting stream library
///
/// This library feeds arbitrarily chunked 16-bit PCM byte streams into the
/// Porcupine keyword-spotting engine, frame by frame, and reports keyword
/// detections.

pub mod detector;
pub mod engine;
pub mod keyword;
pub mod pipeline;
pub mod source;
pub mod stream;

// Re-export main types
pub use detector::{Detector, DetectorConfig, DetectorError, FrameProcessor, ProcessOutcome};
pub use engine::{AudioSample, KeywordEngine, ScriptedEngine, DEFAULT_FRAME_LENGTH, DEFAULT_SAMPLE_RATE};
pub use keyword::{KeywordSpec, Keywords, DEFAULT_SENSITIVITY};
pub use pipeline::{KeywordStream, StreamConfig};
pub use source::{AudioSource, ReaderSource, TextLineSource, WavSource};
pub use stream::{
    AssemblerState, Detection, FrameAssembler, KeywordEvent, StreamError, StreamStats, TextEncoding,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
