/// Audio sources
///
/// Producers that deliver 16-bit little-endian mono PCM as byte chunks of
/// arbitrary size. Chunk boundaries carry no meaning; the frame assembler
/// realigns them.

use crate::engine::BYTES_PER_SAMPLE;
use crate::stream::{StreamError, TextEncoding};
use async_trait::async_trait;
use std::path::Path;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncReadExt, Lines};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Default read size: 4096 bytes (128ms at 16kHz)
pub const DEFAULT_CHUNK_SIZE: usize = 4096;

/// Asynchronous producer of PCM byte chunks
#[async_trait]
pub trait AudioSource: Send {
    /// Next chunk, or `None` at end of stream
    async fn next_chunk(&mut self) -> Result<Option<Vec<u8>>, StreamError>;
}

/// Reads raw PCM from any async reader (file, stdin, socket)
pub struct ReaderSource<R> {
    reader: R,
    chunk_size: usize,
}

impl<R: AsyncRead + Unpin + Send> ReaderSource<R> {
    pub fn new(reader: R, chunk_size: usize) -> Self {
        Self {
            reader,
            chunk_size: chunk_size.max(1),
        }
    }
}

#[async_trait]
impl<R: AsyncRead + Unpin + Send> AudioSource for ReaderSource<R> {
    async fn next_chunk(&mut self) -> Result<Option<Vec<u8>>, StreamError> {
        let mut buf = vec![0u8; self.chunk_size];
        let read = self.reader.read(&mut buf).await?;
        if read == 0 {
            return Ok(None);
        }

        buf.truncate(read);
        Ok(Some(buf))
    }
}

/// Reads one text-encoded chunk per line
///
/// Lines that fail to decode are logged and skipped; the stream continues
/// with the next line.
pub struct TextLineSource<R> {
    lines: Lines<R>,
    encoding: TextEncoding,
    rejected: u64,
}

impl<R: AsyncBufRead + Unpin + Send> TextLineSource<R> {
    pub fn new(reader: R, encoding: TextEncoding) -> Self {
        Self {
            lines: reader.lines(),
            encoding,
            rejected: 0,
        }
    }

    /// Lines skipped because they did not decode
    pub fn rejected(&self) -> u64 {
        self.rejected
    }
}

#[async_trait]
impl<R: AsyncBufRead + Unpin + Send> AudioSource for TextLineSource<R> {
    async fn next_chunk(&mut self) -> Result<Option<Vec<u8>>, StreamError> {
        while let Some(line) = self.lines.next_line().await? {
            match self.encoding.decode(&line) {
                Ok(bytes) => return Ok(Some(bytes)),
                Err(e) => {
                    self.rejected += 1;
                    warn!("Skipping text chunk: {}", e);
                }
            }
        }
        Ok(None)
    }
}

/// Plays back a WAV file as PCM chunks
///
/// The file must be 16-bit integer mono at the detector's sample rate.
pub struct WavSource {
    data: Vec<u8>,
    position: usize,
    chunk_size: usize,
    sample_rate: u32,
}

impl WavSource {
    pub fn open(
        path: impl AsRef<Path>,
        sample_rate: u32,
        chunk_size: usize,
    ) -> Result<Self, StreamError> {
        let path = path.as_ref();
        let reader = hound::WavReader::open(path)?;
        let spec = reader.spec();

        if spec.channels != 1
            || spec.bits_per_sample != 16
            || spec.sample_format != hound::SampleFormat::Int
        {
            return Err(StreamError::InputType(format!(
                "{}: expected 16-bit integer mono PCM, got {} channel(s) of {}-bit {:?}",
                path.display(),
                spec.channels,
                spec.bits_per_sample,
                spec.sample_format
            )));
        }

        if spec.sample_rate != sample_rate {
            return Err(StreamError::InputType(format!(
                "{}: sample rate must be {} Hz, got {} Hz",
                path.display(),
                sample_rate,
                spec.sample_rate
            )));
        }

        let mut data = Vec::with_capacity(reader.len() as usize * BYTES_PER_SAMPLE);
        for sample in reader.into_samples::<i16>() {
            data.extend_from_slice(&sample?.to_le_bytes());
        }

        info!(
            "Loaded {}: {:.2}s of audio",
            path.display(),
            (data.len() / BYTES_PER_SAMPLE) as f32 / sample_rate as f32
        );

        Ok(Self {
            data,
            position: 0,
            chunk_size: chunk_size.max(1),
            sample_rate,
        })
    }

    /// Total audio duration in seconds
    pub fn duration_secs(&self) -> f32 {
        (self.data.len() / BYTES_PER_SAMPLE) as f32 / self.sample_rate as f32
    }

    pub fn len_bytes(&self) -> usize {
        self.data.len()
    }
}

#[async_trait]
impl AudioSource for WavSource {
    async fn next_chunk(&mut self) -> Result<Option<Vec<u8>>, StreamError> {
        if self.position >= self.data.len() {
            debug!("WAV source exhausted");
            return Ok(None);
        }

        let end = (self.position + self.chunk_size).min(self.data.len());
        let chunk = self.data[self.position..end].to_vec();
        self.position = end;
        Ok(Some(chunk))
    }
}

/// Chunks pushed by another task. A bounded channel makes the producer wait
/// for the stream to consume earlier chunks.
#[async_trait]
impl AudioSource for mpsc::Receiver<Vec<u8>> {
    async fn next_chunk(&mut self) -> Result<Option<Vec<u8>>, StreamError> {
        Ok(self.recv().await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use tempfile::TempDir;

    fn write_wav(path: &Path, spec: hound::WavSpec, samples: &[i16]) {
        let mut writer = hound::WavWriter::create(path, spec).unwrap();
        for &s in samples {
            writer.write_sample(s).unwrap();
        }
        writer.finalize().unwrap();
    }

    fn mono_spec(sample_rate: u32) -> hound::WavSpec {
        hound::WavSpec {
            channels: 1,
            sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        }
    }

    async fn drain<S: AudioSource>(source: &mut S) -> Vec<Vec<u8>> {
        let mut chunks = Vec::new();
        while let Some(chunk) = source.next_chunk().await.unwrap() {
            chunks.push(chunk);
        }
        chunks
    }

    #[tokio::test]
    async fn test_reader_source_chunks() {
        let data: Vec<u8> = (0..10).collect();
        let mut source = ReaderSource::new(&data[..], 4);

        let chunks = drain(&mut source).await;
        assert_eq!(chunks, vec![vec![0, 1, 2, 3], vec![4, 5, 6, 7], vec![8, 9]]);
    }

    #[tokio::test]
    async fn test_reader_source_zero_chunk_size() {
        let data = [1u8, 2];
        let mut source = ReaderSource::new(&data[..], 0);
        let chunks = drain(&mut source).await;
        assert_eq!(chunks.concat(), vec![1, 2]);
    }

    #[tokio::test]
    async fn test_text_line_source_skips_bad_lines() {
        let text = "AAECAw==\nnot base64!\nBAU=\n";
        let mut source = TextLineSource::new(text.as_bytes(), TextEncoding::Base64);

        let chunks = drain(&mut source).await;
        assert_eq!(chunks, vec![vec![0, 1, 2, 3], vec![4, 5]]);
        assert_eq!(source.rejected(), 1);
    }

    #[tokio::test]
    async fn test_wav_source_roundtrip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("tone.wav");
        let samples: Vec<i16> = (0..1600).map(|i| (i * 7 % 2000) as i16 - 1000).collect();
        write_wav(&path, mono_spec(16000), &samples);

        let mut source = WavSource::open(&path, 16000, 1000).unwrap();
        assert_relative_eq!(source.duration_secs(), 0.1, epsilon = 0.001);
        assert_eq!(source.len_bytes(), 3200);

        let chunks = drain(&mut source).await;
        assert_eq!(chunks.len(), 4);
        let expected: Vec<u8> = samples.iter().flat_map(|s| s.to_le_bytes()).collect();
        assert_eq!(chunks.concat(), expected);
    }

    #[test]
    fn test_wav_source_rejects_wrong_format() {
        let dir = TempDir::new().unwrap();

        let path = dir.path().join("rate.wav");
        write_wav(&path, mono_spec(44100), &[0; 10]);
        assert!(matches!(
            WavSource::open(&path, 16000, 512),
            Err(StreamError::InputType(_))
        ));

        let path = dir.path().join("stereo.wav");
        let spec = hound::WavSpec {
            channels: 2,
            ..mono_spec(16000)
        };
        write_wav(&path, spec, &[0; 10]);
        assert!(matches!(
            WavSource::open(&path, 16000, 512),
            Err(StreamError::InputType(_))
        ));
    }

    #[test]
    fn test_wav_source_missing_file() {
        assert!(matches!(
            WavSource::open("/nonexistent/input.wav", 16000, 512),
            Err(StreamError::Wav(_))
        ));
    }

    #[tokio::test]
    async fn test_channel_source() {
        let (tx, mut rx) = mpsc::channel(2);
        tokio::spawn(async move {
            tx.send(vec![1, 2, 3]).await.unwrap();
            tx.send(vec![]).await.unwrap();
            tx.send(vec![4]).await.unwrap();
        });

        let chunks = drain(&mut rx).await;
        assert_eq!(chunks, vec![vec![1, 2, 3], vec![], vec![4]]);
    }
}
