/// Frame assembler
///
/// Accepts byte chunks of arbitrary size and alignment, reassembles them into
/// the fixed-size frames the detector requires and reports keyword
/// detections. Partial frames are carried over between chunks in a buffer of
/// exactly one frame.
///
/// When a frame in a chunk produces a detection, processing of that chunk
/// stops: the bytes following the frame are handed back in the
/// [`Detection`] and are not buffered or processed by this call.

use crate::detector::{Detector, DetectorConfig, DetectorError, FrameProcessor, ProcessOutcome};
use crate::engine::{AudioSample, BYTES_PER_SAMPLE};
use base64::Engine as _;
use serde::Serialize;
use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;
use tracing::{debug, error, info, trace, warn};

#[derive(Error, Debug)]
pub enum StreamError {
    #[error("Detector error: {0}")]
    Detector(#[from] DetectorError),

    #[error("Unsupported input: {0}")]
    InputType(String),

    #[error("Stream closed")]
    Closed,

    #[error("Stream faulted by an earlier processing error")]
    Faulted,

    #[error("Invalid frame length: {0}")]
    InvalidFrameLength(usize),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("WAV error: {0}")]
    Wav(#[from] hound::Error),
}

/// Assembler state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssemblerState {
    /// No partial frame pending
    Idle,

    /// Partial frame held in the carry-over buffer
    Accumulating,

    /// Detector disposed
    Closed,

    /// A processing error broke the frame invariants
    Faulted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lifecycle {
    Open,
    Closed,
    Faulted,
}

/// Encoding of text chunks
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextEncoding {
    /// Raw UTF-8 bytes of the text
    Utf8,

    /// One byte per character, characters above U+00FF are rejected
    Latin1,

    /// Standard base64 with padding
    Base64,
}

impl TextEncoding {
    pub fn decode(self, data: &str) -> Result<Vec<u8>, StreamError> {
        match self {
            Self::Utf8 => Ok(data.as_bytes().to_vec()),
            Self::Latin1 => data
                .chars()
                .map(|c| {
                    u8::try_from(u32::from(c)).map_err(|_| {
                        StreamError::InputType(format!("character {:?} is not latin1", c))
                    })
                })
                .collect(),
            Self::Base64 => base64::engine::general_purpose::STANDARD
                .decode(data)
                .map_err(|e| StreamError::InputType(format!("invalid base64: {}", e))),
        }
    }
}

impl FromStr for TextEncoding {
    type Err = StreamError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "utf8" | "utf-8" => Ok(Self::Utf8),
            "latin1" | "binary" => Ok(Self::Latin1),
            "base64" => Ok(Self::Base64),
            other => Err(StreamError::InputType(format!(
                "unsupported text encoding '{}'",
                other
            ))),
        }
    }
}

/// Keyword detection borrowed from the chunk that triggered it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Detection<'a> {
    /// 0-based keyword index in construction order
    pub keyword_index: usize,

    /// 0-based index of the triggering frame within the stream
    pub frame_index: u64,

    /// Unprocessed bytes of the chunk after the triggering frame
    pub remaining: &'a [u8],
}

impl Detection<'_> {
    pub fn into_owned(self) -> KeywordEvent {
        KeywordEvent {
            keyword_index: self.keyword_index,
            frame_index: self.frame_index,
            timestamp: current_timestamp_micros(),
            remaining: self.remaining.to_vec(),
        }
    }
}

/// Owned keyword detection event
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct KeywordEvent {
    /// 0-based keyword index in construction order
    pub keyword_index: usize,

    /// 0-based index of the triggering frame within the stream
    pub frame_index: u64,

    /// Microseconds since epoch when the event was created
    pub timestamp: i64,

    /// Unprocessed bytes of the chunk after the triggering frame
    #[serde(skip)]
    pub remaining: Vec<u8>,
}

/// Assembler statistics
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StreamStats {
    pub frames_processed: u64,
    pub detections: u64,
    /// Bytes passed to `write`
    pub bytes_received: u64,
    /// Bytes handed back after detections and never fed back in
    pub bytes_skipped: u64,
    /// Bytes currently held in the carry-over buffer
    pub fill_level: usize,
}

/// Reassembles byte chunks into detector frames
pub struct FrameAssembler<P: FrameProcessor = Detector> {
    processor: P,
    buffer: Box<[u8]>,
    fill: usize,
    lifecycle: Lifecycle,
    stats: StreamStats,
}

impl FrameAssembler<Detector> {
    /// Construct a detector from `config` and wrap it
    pub fn open(config: &DetectorConfig) -> Result<Self, StreamError> {
        let detector = Detector::new(config)?;
        Self::new(detector)
    }
}

impl<P: FrameProcessor> FrameAssembler<P> {
    pub fn new(processor: P) -> Result<Self, StreamError> {
        let frame_length = processor.frame_length();
        if frame_length == 0 {
            return Err(StreamError::InvalidFrameLength(frame_length));
        }

        let capacity = frame_length * BYTES_PER_SAMPLE;
        debug!("Creating frame assembler with capacity: {} bytes", capacity);

        Ok(Self {
            processor,
            buffer: vec![0u8; capacity].into_boxed_slice(),
            fill: 0,
            lifecycle: Lifecycle::Open,
            stats: StreamStats::default(),
        })
    }

    /// Feed one chunk of little-endian PCM bytes.
    ///
    /// Returns the first detection produced while consuming the chunk. Bytes
    /// after the detection frame are returned in [`Detection::remaining`] and
    /// are not processed.
    pub fn write<'c>(&mut self, chunk: &'c [u8]) -> Result<Option<Detection<'c>>, StreamError> {
        self.ensure_open()?;
        self.stats.bytes_received += chunk.len() as u64;
        self.consume(chunk)
    }

    /// Feed the [`Detection::remaining`] tail of the previous write.
    ///
    /// The tail was already counted as received and as skipped; feeding it
    /// moves it back out of the skipped count.
    pub(crate) fn write_tail<'c>(
        &mut self,
        tail: &'c [u8],
    ) -> Result<Option<Detection<'c>>, StreamError> {
        self.ensure_open()?;
        self.stats.bytes_skipped = self.stats.bytes_skipped.saturating_sub(tail.len() as u64);
        self.consume(tail)
    }

    fn consume<'c>(&mut self, chunk: &'c [u8]) -> Result<Option<Detection<'c>>, StreamError> {
        let capacity = self.buffer.len();
        let mut offset = 0;

        if self.fill > 0 {
            let to_copy = (capacity - self.fill).min(chunk.len());
            self.buffer[self.fill..self.fill + to_copy].copy_from_slice(&chunk[..to_copy]);
            self.fill += to_copy;
            offset = to_copy;

            if self.fill == capacity {
                let outcome = self.processor.process(&self.buffer);
                self.fill = 0;
                if let Some(keyword_index) = self.settle(outcome)? {
                    return Ok(Some(self.detection(keyword_index, &chunk[offset..])));
                }
            }
        }

        while chunk.len() - offset >= capacity {
            let outcome = self.processor.process(&chunk[offset..offset + capacity]);
            offset += capacity;
            if let Some(keyword_index) = self.settle(outcome)? {
                return Ok(Some(self.detection(keyword_index, &chunk[offset..])));
            }
        }

        if offset < chunk.len() {
            let rest = &chunk[offset..];
            self.buffer[..rest.len()].copy_from_slice(rest);
            self.fill = rest.len();
            trace!("Carrying {} bytes to the next chunk", self.fill);
        }

        Ok(None)
    }

    /// Feed samples, serialized as little-endian bytes
    pub fn write_samples(
        &mut self,
        samples: &[AudioSample],
    ) -> Result<Option<KeywordEvent>, StreamError> {
        let bytes: Vec<u8> = samples.iter().flat_map(|s| s.to_le_bytes()).collect();
        Ok(self.write(&bytes)?.map(Detection::into_owned))
    }

    /// Feed a text chunk, decoded with `encoding` first.
    ///
    /// A decoding failure leaves the assembler untouched.
    pub fn write_encoded(
        &mut self,
        data: &str,
        encoding: TextEncoding,
    ) -> Result<Option<KeywordEvent>, StreamError> {
        self.ensure_open()?;
        let bytes = encoding.decode(data)?;
        Ok(self.write(&bytes)?.map(Detection::into_owned))
    }

    /// Dispose the detector. Writes after this fail with [`StreamError::Closed`].
    pub fn close(&mut self) {
        if self.lifecycle == Lifecycle::Closed {
            warn!("Frame assembler already closed");
            return;
        }

        self.processor.dispose();
        self.lifecycle = Lifecycle::Closed;
        if self.fill > 0 {
            debug!("Discarding {} buffered bytes on close", self.fill);
        }
        self.fill = 0;

        info!(
            "Frame assembler closed: {} frames, {} detections",
            self.stats.frames_processed, self.stats.detections
        );
    }

    pub fn state(&self) -> AssemblerState {
        match self.lifecycle {
            Lifecycle::Closed => AssemblerState::Closed,
            Lifecycle::Faulted => AssemblerState::Faulted,
            Lifecycle::Open if self.fill > 0 => AssemblerState::Accumulating,
            Lifecycle::Open => AssemblerState::Idle,
        }
    }

    /// Bytes currently held in the carry-over buffer
    pub fn fill_level(&self) -> usize {
        self.fill
    }

    /// Frame size in bytes
    pub fn capacity(&self) -> usize {
        self.buffer.len()
    }

    pub fn stats(&self) -> StreamStats {
        StreamStats {
            fill_level: self.fill,
            ..self.stats.clone()
        }
    }

    pub fn processor(&self) -> &P {
        &self.processor
    }

    fn ensure_open(&self) -> Result<(), StreamError> {
        match self.lifecycle {
            Lifecycle::Open => Ok(()),
            Lifecycle::Closed => Err(StreamError::Closed),
            Lifecycle::Faulted => Err(StreamError::Faulted),
        }
    }

    /// Account for one processed frame and normalize its outcome
    fn settle(
        &mut self,
        outcome: Result<ProcessOutcome, DetectorError>,
    ) -> Result<Option<usize>, StreamError> {
        match outcome {
            Ok(outcome) => {
                self.stats.frames_processed += 1;
                if self.stats.frames_processed % 1000 == 0 {
                    debug!(
                        "Processed {} frames, detected {} keywords",
                        self.stats.frames_processed, self.stats.detections
                    );
                }
                Ok(outcome.keyword_index())
            }
            Err(e) => {
                error!("Frame processing failed: {}", e);
                self.lifecycle = Lifecycle::Faulted;
                self.fill = 0;
                Err(e.into())
            }
        }
    }

    fn detection<'c>(&mut self, keyword_index: usize, remaining: &'c [u8]) -> Detection<'c> {
        self.stats.detections += 1;
        self.stats.bytes_skipped += remaining.len() as u64;

        let frame_index = self.stats.frames_processed - 1;
        info!("Keyword {} detected at frame {}", keyword_index, frame_index);
        if !remaining.is_empty() {
            debug!(
                "{} bytes after the detection frame left unprocessed",
                remaining.len()
            );
        }

        Detection {
            keyword_index,
            frame_index,
            remaining,
        }
    }
}

impl<P: FrameProcessor> Drop for FrameAssembler<P> {
    fn drop(&mut self) {
        if self.lifecycle != Lifecycle::Closed {
            self.processor.dispose();
        }
    }
}

fn current_timestamp_micros() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_micros() as i64)
        .unwrap_or_default()
}
