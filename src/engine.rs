/// Keyword-spotting engine abstraction
///
/// The acoustic engine is opaque to this crate: it consumes exactly one frame
/// of 16-bit mono PCM per call, keeps its own feature history between calls,
/// and reports which keyword (if any) ended at the frame it just consumed.
/// Native resources are released when the engine is dropped.

use crate::detector::DetectorError;
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::trace;

/// Audio sample format (16-bit PCM)
pub type AudioSample = i16;

/// Bytes per 16-bit sample
pub const BYTES_PER_SAMPLE: usize = 2;

/// Porcupine operates on 16kHz audio
pub const DEFAULT_SAMPLE_RATE: u32 = 16000;

/// Porcupine frame length in samples (32ms at 16kHz)
pub const DEFAULT_FRAME_LENGTH: usize = 512;

/// Result value meaning "no keyword ended at this frame"
pub const NO_DETECTION: i32 = -1;

/// Contract for keyword-spotting backends
pub trait KeywordEngine: Send {
    /// Process exactly `frame_length()` samples.
    ///
    /// Returns the 0-based index of the keyword judged to end at this frame,
    /// or [`NO_DETECTION`].
    fn process(&mut self, pcm: &[AudioSample]) -> Result<i32, DetectorError>;

    /// Samples per frame
    fn frame_length(&self) -> usize;

    /// Samples per second
    fn sample_rate(&self) -> u32;

    fn version(&self) -> String;
}

/// Shared log of every frame an engine received, in delivery order
#[derive(Debug, Clone, Default)]
pub struct FrameLog(Arc<Mutex<Vec<Vec<AudioSample>>>>);

impl FrameLog {
    pub fn frames(&self) -> Vec<Vec<AudioSample>> {
        self.0.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.0.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// All received samples concatenated
    pub fn samples(&self) -> Vec<AudioSample> {
        self.0.lock().iter().flatten().copied().collect()
    }

    fn push(&self, frame: &[AudioSample]) {
        self.0.lock().push(frame.to_vec());
    }
}

/// Deterministic engine driven by per-frame scripted results
///
/// Frame `n` (0-based, counted over the engine's lifetime) returns
/// `script[n]`; frames past the end of the script return [`NO_DETECTION`].
/// Used as the backend when the native SDK is not compiled in, and as a
/// test double.
pub struct ScriptedEngine {
    frame_length: usize,
    sample_rate: u32,
    script: Vec<i32>,
    frames_seen: usize,
    log: FrameLog,
}

impl ScriptedEngine {
    /// Engine that never detects anything
    pub fn new(frame_length: usize) -> Self {
        Self {
            frame_length,
            sample_rate: DEFAULT_SAMPLE_RATE,
            script: Vec::new(),
            frames_seen: 0,
            log: FrameLog::default(),
        }
    }

    /// Silent engine with Porcupine's frame geometry
    pub fn silent() -> Self {
        Self::new(DEFAULT_FRAME_LENGTH)
    }

    /// Replace the per-frame results
    pub fn with_script(mut self, script: impl IntoIterator<Item = i32>) -> Self {
        self.script = script.into_iter().collect();
        self
    }

    /// Report `keyword_index` at frame `frame`
    pub fn detect_at(mut self, frame: usize, keyword_index: i32) -> Self {
        if self.script.len() <= frame {
            self.script.resize(frame + 1, NO_DETECTION);
        }
        self.script[frame] = keyword_index;
        self
    }

    /// Handle for inspecting received frames after the engine is moved
    pub fn frame_log(&self) -> FrameLog {
        self.log.clone()
    }
}

impl KeywordEngine for ScriptedEngine {
    fn process(&mut self, pcm: &[AudioSample]) -> Result<i32, DetectorError> {
        if pcm.len() != self.frame_length {
            return Err(DetectorError::FrameLength {
                expected: self.frame_length * BYTES_PER_SAMPLE,
                actual: pcm.len() * BYTES_PER_SAMPLE,
            });
        }

        self.log.push(pcm);
        let result = self
            .script
            .get(self.frames_seen)
            .copied()
            .unwrap_or(NO_DETECTION);
        self.frames_seen += 1;

        trace!("Scripted frame {} -> {}", self.frames_seen - 1, result);
        Ok(result)
    }

    fn frame_length(&self) -> usize {
        self.frame_length
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn version(&self) -> String {
        format!("scripted-{}", env!("CARGO_PKG_VERSION"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_silent_engine_geometry() {
        let engine = ScriptedEngine::silent();
        assert_eq!(engine.frame_length(), DEFAULT_FRAME_LENGTH);
        assert_eq!(engine.sample_rate(), DEFAULT_SAMPLE_RATE);
    }

    #[test]
    fn test_script_results_in_order() {
        let mut engine = ScriptedEngine::new(2).with_script([NO_DETECTION, 1, 0]);
        let frame = [0i16; 2];

        assert_eq!(engine.process(&frame).unwrap(), NO_DETECTION);
        assert_eq!(engine.process(&frame).unwrap(), 1);
        assert_eq!(engine.process(&frame).unwrap(), 0);
        // Past the end of the script
        assert_eq!(engine.process(&frame).unwrap(), NO_DETECTION);
    }

    #[test]
    fn test_detect_at_pads_script() {
        let mut engine = ScriptedEngine::new(1).detect_at(3, 2);
        let results: Vec<i32> = (0..5).map(|_| engine.process(&[0]).unwrap()).collect();
        assert_eq!(results, vec![-1, -1, -1, 2, -1]);
    }

    #[test]
    fn test_frame_log_records_frames() {
        let mut engine = ScriptedEngine::new(2);
        let log = engine.frame_log();

        engine.process(&[1, 2]).unwrap();
        engine.process(&[3, 4]).unwrap();

        assert_eq!(log.len(), 2);
        assert_eq!(log.frames(), vec![vec![1, 2], vec![3, 4]]);
        assert_eq!(log.samples(), vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_wrong_frame_length_rejected() {
        let mut engine = ScriptedEngine::new(4);
        let log = engine.frame_log();

        match engine.process(&[0; 3]) {
            Err(DetectorError::FrameLength { expected, actual }) => {
                assert_eq!(expected, 8);
                assert_eq!(actual, 6);
            }
            other => panic!("Expected FrameLength error, got {:?}", other),
        }
        assert!(log.is_empty());
    }
}
