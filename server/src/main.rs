//! Rigel TTS server binary.
//!
//! Loads the Piper voice table, starts the synthesis worker, and serves
//! the event protocol over TCP:
//!
//!   cargo run --release -p rigel-server -- --voices-dir models/

use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;

use rigel_engine::{Device, PiperConfig, PiperEngine, SynthesisEngine};
use rigel_server::{scheduler::Scheduler, Server, ServerState, DEFAULT_CHUNK_BYTES};

#[derive(Parser, Debug)]
#[command(author, version, about = "Rigel TTS server")]
struct Args {
    /// Address to listen on
    #[arg(long, default_value = "127.0.0.1:10200", env = "RIGEL_ADDR")]
    bind: SocketAddr,

    /// Piper executable; bare names resolve through PATH
    #[arg(long, default_value = "piper", env = "RIGEL_PIPER")]
    piper: PathBuf,

    /// Directory with one .onnx voice model per voice
    #[arg(long, default_value = "models", env = "RIGEL_VOICES")]
    voices_dir: PathBuf,

    /// Default voice; first in the table when unset
    #[arg(long, env = "RIGEL_VOICE")]
    voice: Option<String>,

    /// Inference device (cpu or gpu)
    #[arg(long, default_value_t = Device::Cpu)]
    device: Device,

    /// Maximum audio-chunk payload size in bytes
    #[arg(long, default_value_t = DEFAULT_CHUNK_BYTES)]
    chunk_bytes: usize,

    /// Sentence terminators; the first is appended to unterminated request
    /// text. Pass an empty string to disable.
    #[arg(long, default_value = ".?!")]
    auto_punctuation: String,

    /// Silence between sentences, in milliseconds
    #[arg(long, default_value_t = 250)]
    sentence_pause_ms: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("rigel_server=info".parse()?),
        )
        .init();

    let args = Args::parse();

    info!("Loading synthesis engine...");
    let engine = PiperEngine::load(PiperConfig {
        binary: args.piper,
        voices_dir: args.voices_dir,
        default_voice: args.voice,
        device: args.device,
        sentence_pause_ms: args.sentence_pause_ms,
    })
    .context("failed to load synthesis engine")?;

    let state = ServerState::new(engine.info())
        .with_chunk_bytes(args.chunk_bytes)
        .with_auto_punctuation(args.auto_punctuation);
    info!(voices = state.info.voices.len(), "engine ready");

    let scheduler =
        Scheduler::spawn(Box::new(engine)).context("failed to start synthesis worker")?;

    let server = Server::bind(args.bind)
        .await
        .with_context(|| format!("failed to bind {}", args.bind))?;

    server.run(scheduler, state).await
}
