/// Keyword stream driver
///
/// Pulls chunks from an [`AudioSource`] one at a time, feeds them to a
/// [`FrameAssembler`] and publishes detections on a channel. The next chunk
/// is requested only after the previous one has been consumed, which is the
/// only flow control between producer and detector.

use crate::detector::{Detector, FrameProcessor};
use crate::source::{AudioSource, DEFAULT_CHUNK_SIZE};
use crate::stream::{FrameAssembler, KeywordEvent, StreamError, StreamStats};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Streaming configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamConfig {
    /// Read size for sources, in bytes
    pub chunk_size: usize,

    /// Re-feed the bytes following a detection frame instead of skipping
    /// them until the next chunk
    pub feed_remaining: bool,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            feed_remaining: false,
        }
    }
}

/// Drives a frame assembler from an audio source
pub struct KeywordStream<P: FrameProcessor = Detector> {
    assembler: FrameAssembler<P>,
    config: StreamConfig,
    events: mpsc::UnboundedSender<KeywordEvent>,
}

impl<P: FrameProcessor> KeywordStream<P> {
    /// Create a stream and the receiver for its keyword events
    pub fn new(
        assembler: FrameAssembler<P>,
        config: StreamConfig,
    ) -> (Self, mpsc::UnboundedReceiver<KeywordEvent>) {
        let (events, rx) = mpsc::unbounded_channel();
        (
            Self {
                assembler,
                config,
                events,
            },
            rx,
        )
    }

    /// Consume `source` until it ends, then dispose the detector.
    ///
    /// The detector is disposed on error as well.
    pub async fn run<S>(mut self, source: &mut S) -> Result<StreamStats, StreamError>
    where
        S: AudioSource + ?Sized,
    {
        info!(
            "Keyword stream started (frame size {} bytes)",
            self.assembler.capacity()
        );

        let result = self.pump(source).await;
        self.assembler.close();

        let stats = self.assembler.stats();
        match &result {
            Ok(()) => info!(
                "Keyword stream finished: {} frames, {} detections",
                stats.frames_processed, stats.detections
            ),
            Err(e) => warn!("Keyword stream stopped: {}", e),
        }

        result.map(|()| stats)
    }

    async fn pump<S>(&mut self, source: &mut S) -> Result<(), StreamError>
    where
        S: AudioSource + ?Sized,
    {
        while let Some(chunk) = source.next_chunk().await? {
            self.feed(&chunk)?;
        }
        Ok(())
    }

    /// Write one chunk, publishing any detection
    fn feed(&mut self, chunk: &[u8]) -> Result<(), StreamError> {
        let mut found = self.assembler.write(chunk)?;

        while let Some(detection) = found {
            let remaining = detection.remaining;
            if self.events.send(detection.into_owned()).is_err() {
                debug!("Keyword event receiver dropped");
            }

            if !self.config.feed_remaining || remaining.is_empty() {
                break;
            }
            found = self.assembler.write_tail(remaining)?;
        }

        Ok(())
    }

    pub fn stats(&self) -> StreamStats {
        self.assembler.stats()
    }
}
