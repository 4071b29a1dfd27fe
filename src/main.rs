/// Keyword-spotting stream binary
///
/// Streams raw PCM or WAV audio into the detector and prints one JSON line
/// per keyword detection.

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use porcupine_stream::{
    AudioSource, Detector, DetectorConfig, FrameAssembler, KeywordEvent, KeywordSpec,
    KeywordStream, Keywords, ReaderSource, StreamConfig, StreamError, StreamStats, TextEncoding,
    TextLineSource, WavSource,
};
use std::io::Write;
use std::path::{Path, PathBuf};
use tokio::io::BufReader;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "porcupine-stream", version, about = "Keyword spotting over PCM streams")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print engine version, sample rate and frame length
    Info(EngineArgs),

    /// Stream audio into the detector and print keyword events
    Listen {
        #[command(flatten)]
        engine: EngineArgs,

        /// Input file: .wav or raw 16-bit little-endian mono PCM (default: stdin)
        #[arg(short, long)]
        input: Option<PathBuf>,

        /// Read size in bytes
        #[arg(long, default_value_t = porcupine_stream::source::DEFAULT_CHUNK_SIZE)]
        chunk_size: usize,

        /// Keep processing the audio following a detection in the same chunk
        #[arg(long)]
        feed_remaining: bool,

        /// Read text input, one chunk per line: utf8, latin1 or base64
        #[arg(long, value_name = "ENCODING")]
        text_encoding: Option<TextEncoding>,
    },
}

#[derive(Args)]
struct EngineArgs {
    /// JSON detector configuration file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Model parameter file (.pv)
    #[arg(long)]
    model: Option<PathBuf>,

    /// Keyword file, optionally with sensitivity: path[:0.5]. Repeat for several keywords.
    #[arg(short, long = "keyword")]
    keywords: Vec<KeywordSpec>,
}

#[tokio::main]
async fn main() {
    // Initialize tracing; stdout carries events
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("porcupine_stream=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    if let Err(e) = run(cli.command).await {
        error!("{:#}", e);
        std::process::exit(1);
    }
}

async fn run(command: Command) -> anyhow::Result<()> {
    match command {
        Command::Info(args) => {
            let config = load_config(&args)?;
            let mut detector = Detector::new(&config).context("Failed to create detector")?;
            println!("version: {}", detector.version());
            println!("sample_rate: {}", detector.sample_rate());
            println!("frame_length: {}", detector.frame_length());
            detector.dispose();
            Ok(())
        }
        Command::Listen {
            engine,
            input,
            chunk_size,
            feed_remaining,
            text_encoding,
        } => {
            let config = load_config(&engine)?;
            let stream_config = StreamConfig {
                chunk_size,
                feed_remaining,
            };
            listen(&config, stream_config, input.as_deref(), text_encoding).await
        }
    }
}

async fn listen(
    config: &DetectorConfig,
    stream_config: StreamConfig,
    input: Option<&Path>,
    text_encoding: Option<TextEncoding>,
) -> anyhow::Result<()> {
    let detector = Detector::new(config).context("Failed to create detector")?;
    let sample_rate = detector.sample_rate();
    let mut source =
        open_source(input, text_encoding, sample_rate, stream_config.chunk_size).await?;

    let assembler = FrameAssembler::new(detector)?;
    let (stream, events) = KeywordStream::new(assembler, stream_config);
    let printer = tokio::spawn(print_events(events, std::io::stdout()));

    info!("Listening for keywords...");

    let outcome = tokio::select! {
        result = stream.run(&mut *source) => result.map(Some),
        _ = tokio::signal::ctrl_c() => {
            info!("Interrupted, shutting down");
            Ok(None)
        }
    };

    finish(outcome, printer).await
}

/// Print each event as one JSON line until the stream drops its sender
async fn print_events<W: Write>(
    mut events: mpsc::UnboundedReceiver<KeywordEvent>,
    mut out: W,
) -> u64 {
    let mut printed = 0;
    while let Some(event) = events.recv().await {
        let line = match serde_json::to_string(&event) {
            Ok(line) => line,
            Err(e) => {
                warn!("Failed to serialize event: {}", e);
                continue;
            }
        };
        if let Err(e) = writeln!(out, "{}", line).and_then(|()| out.flush()) {
            warn!("Failed to write event: {}", e);
            continue;
        }
        printed += 1;
    }
    printed
}

/// Wait until every event already sent has been printed, then report the
/// stream result
async fn finish(
    outcome: Result<Option<StreamStats>, StreamError>,
    printer: JoinHandle<u64>,
) -> anyhow::Result<()> {
    let printed = printer.await.context("Event printer task failed")?;
    info!("Printed {} keyword events", printed);

    if let Some(stats) = outcome.context("Keyword stream failed")? {
        info!(
            "Processed {} frames, detected {} keywords",
            stats.frames_processed, stats.detections
        );
    }
    Ok(())
}

async fn open_source(
    input: Option<&Path>,
    text_encoding: Option<TextEncoding>,
    sample_rate: u32,
    chunk_size: usize,
) -> anyhow::Result<Box<dyn AudioSource>> {
    if let Some(encoding) = text_encoding {
        return match input {
            None => {
                info!("Reading {:?} text chunks from stdin", encoding);
                let reader = BufReader::new(tokio::io::stdin());
                Ok(Box::new(TextLineSource::new(reader, encoding)))
            }
            Some(path) => {
                let file = tokio::fs::File::open(path)
                    .await
                    .with_context(|| format!("Failed to open {}", path.display()))?;
                Ok(Box::new(TextLineSource::new(BufReader::new(file), encoding)))
            }
        };
    }

    match input {
        None => {
            info!("Reading PCM from stdin");
            Ok(Box::new(ReaderSource::new(tokio::io::stdin(), chunk_size)))
        }
        Some(path) if is_wav(path) => {
            let source = WavSource::open(path, sample_rate, chunk_size)
                .with_context(|| format!("Failed to open {}", path.display()))?;
            Ok(Box::new(source))
        }
        Some(path) => {
            let file = tokio::fs::File::open(path)
                .await
                .with_context(|| format!("Failed to open {}", path.display()))?;
            Ok(Box::new(ReaderSource::new(file, chunk_size)))
        }
    }
}

fn is_wav(path: &Path) -> bool {
    path.extension()
        .map(|ext| ext.eq_ignore_ascii_case("wav"))
        .unwrap_or(false)
}

/// Load configuration: defaults, then config file, then environment, then flags
fn load_config(args: &EngineArgs) -> anyhow::Result<DetectorConfig> {
    let mut config = match &args.config {
        Some(path) => DetectorConfig::from_json_file(path)?,
        None => DetectorConfig::default(),
    };

    if let Ok(access_key) = std::env::var("PORCUPINE_ACCESS_KEY") {
        config.access_key = access_key;
    }

    if let Ok(model_path) = std::env::var("PORCUPINE_MODEL_PATH") {
        config.model_path = PathBuf::from(model_path);
    }

    if let Ok(keywords) = std::env::var("PORCUPINE_KEYWORDS") {
        let specs = keywords
            .split(',')
            .filter(|s| !s.trim().is_empty())
            .map(str::parse)
            .collect::<Result<Vec<KeywordSpec>, _>>()
            .context("Invalid PORCUPINE_KEYWORDS")?;
        config.keywords = keywords_from(specs);
    }

    if let Some(model) = &args.model {
        config.model_path = model.clone();
    }

    if !args.keywords.is_empty() {
        config.keywords = keywords_from(args.keywords.clone());
    }

    Ok(config)
}

fn keywords_from(mut specs: Vec<KeywordSpec>) -> Keywords {
    if specs.len() == 1 {
        Keywords::Single(specs.remove(0))
    } else {
        Keywords::Multiple(specs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use porcupine_stream::ScriptedEngine;
    use std::sync::Arc;

    #[derive(Clone, Default)]
    struct SharedBuf(Arc<Mutex<Vec<u8>>>);

    impl Write for SharedBuf {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    /// Yields its chunks, then fails with an I/O error
    struct FailingSource {
        chunks: Vec<Vec<u8>>,
    }

    #[async_trait::async_trait]
    impl AudioSource for FailingSource {
        async fn next_chunk(&mut self) -> Result<Option<Vec<u8>>, StreamError> {
            if self.chunks.is_empty() {
                return Err(StreamError::Io(std::io::Error::new(
                    std::io::ErrorKind::BrokenPipe,
                    "input closed",
                )));
            }
            Ok(Some(self.chunks.remove(0)))
        }
    }

    #[tokio::test]
    async fn test_events_printed_before_stream_error() {
        let engine = ScriptedEngine::new(2).detect_at(0, 0);
        let detector = Detector::with_engine(Box::new(engine), false);
        let (stream, events) =
            KeywordStream::new(FrameAssembler::new(detector).unwrap(), StreamConfig::default());

        let out = SharedBuf::default();
        let printer = tokio::spawn(print_events(events, out.clone()));

        let mut source = FailingSource {
            chunks: vec![vec![0u8; 4]],
        };
        let outcome = stream.run(&mut source).await.map(Some);
        assert!(outcome.is_err());

        let result = finish(outcome, printer).await;
        assert!(result.is_err());

        let printed = String::from_utf8(out.0.lock().clone()).unwrap();
        let lines: Vec<&str> = printed.lines().collect();
        assert_eq!(lines.len(), 1);
        let event: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(event["keyword_index"], 0);
        assert_eq!(event["frame_index"], 0);
    }

    #[tokio::test]
    async fn test_finish_reports_success() {
        let (tx, rx) = mpsc::unbounded_channel::<KeywordEvent>();
        drop(tx);
        let printer = tokio::spawn(print_events(rx, std::io::sink()));

        assert!(finish(Ok(Some(StreamStats::default())), printer).await.is_ok());
    }

    #[test]
    fn test_text_encoding_flag() {
        let cli = Cli::try_parse_from(["porcupine-stream", "listen", "--text-encoding", "base64"])
            .unwrap();
        match cli.command {
            Command::Listen { text_encoding, .. } => {
                assert_eq!(text_encoding, Some(TextEncoding::Base64))
            }
            _ => panic!("Expected listen command"),
        }

        assert!(
            Cli::try_parse_from(["porcupine-stream", "listen", "--text-encoding", "utf16"]).is_err()
        );
    }
}
