//! Rigel TTS client.
//!
//! Connects to a Rigel server, lists voices or synthesizes text, and
//! writes the returned audio to WAV files.
//!
//! Usage:
//!   # Single text mode
//!   cargo run --release -p rigel-client -- --text "Hello world" --output hello.wav
//!
//!   # List the server's voices
//!   cargo run --release -p rigel-client -- --list-voices
//!
//!   # Interactive mode (each line becomes one request and one WAV file)
//!   cargo run --release -p rigel-client

mod wav;

use std::io::{self, BufRead, Write as _};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::Parser;
use tokio::io::BufReader;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tracing::info;

use rigel_protocol::{read_event, write_event, Event, Synthesize};

type Reader = BufReader<OwnedReadHalf>;

#[derive(Parser, Debug)]
#[command(author, version, about = "Rigel TTS client")]
struct Args {
    /// Server address
    #[arg(short, long, default_value = "127.0.0.1:10200", env = "RIGEL_ADDR")]
    server: SocketAddr,

    /// Text to synthesize (interactive mode when omitted)
    #[arg(short, long)]
    text: Option<String>,

    /// Output WAV file
    #[arg(short, long, default_value = "out.wav")]
    output: PathBuf,

    /// Voice to use (server default when omitted)
    #[arg(short, long)]
    voice: Option<String>,

    /// List the server's voices and exit
    #[arg(long)]
    list_voices: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("rigel_client=info".parse()?),
        )
        .init();

    let args = Args::parse();

    info!("Connecting to {}", args.server);
    let stream = TcpStream::connect(args.server)
        .await
        .with_context(|| format!("cannot connect to {}", args.server))?;
    let (read, write) = stream.into_split();
    let mut reader = BufReader::new(read);
    let mut writer = write;

    if args.list_voices {
        return list_voices(&mut reader, &mut writer).await;
    }

    if let Some(text) = &args.text {
        return synthesize_to_file(
            &mut reader,
            &mut writer,
            text,
            args.voice.as_deref(),
            &args.output,
        )
        .await;
    }

    // Interactive mode
    println!("Rigel TTS client - type text, press Enter to synthesize.");
    println!("Empty line or Ctrl+D exits.");

    let stdin = io::stdin();
    let mut n = 0u32;
    loop {
        print!("> ");
        io::stdout().flush()?;

        let mut line = String::new();
        if stdin.lock().read_line(&mut line)? == 0 {
            break;
        }
        let line = line.trim();
        if line.is_empty() {
            break;
        }

        let output = PathBuf::from(format!("out-{n}.wav"));
        synthesize_to_file(&mut reader, &mut writer, line, args.voice.as_deref(), &output).await?;
        n += 1;
    }

    Ok(())
}

async fn list_voices(reader: &mut Reader, writer: &mut OwnedWriteHalf) -> Result<()> {
    write_event(writer, &Event::Describe).await?;

    match read_event(reader).await? {
        Some(Event::Voices(info)) => {
            println!(
                "{} {} ({} Hz, {}-bit, {} ch)",
                info.name, info.version, info.audio.rate, info.audio.width, info.audio.channels
            );
            for voice in &info.voices {
                let languages = voice.languages.join(", ");
                println!("  {:<30} {}", voice.name, languages);
            }
            Ok(())
        }
        Some(Event::Error { text }) => bail!("server error: {text}"),
        other => bail!("unexpected reply: {other:?}"),
    }
}

async fn synthesize_to_file(
    reader: &mut Reader,
    writer: &mut OwnedWriteHalf,
    text: &str,
    voice: Option<&str>,
    output: &Path,
) -> Result<()> {
    let mut request = Synthesize::new(text);
    if let Some(voice) = voice {
        request = request.with_voice(voice);
    }
    write_event(writer, &Event::Synthesize(request)).await?;

    let format = match read_event(reader).await? {
        Some(Event::AudioStart(format)) => format,
        Some(Event::Error { text }) => bail!("server error: {text}"),
        other => bail!("unexpected reply: {other:?}"),
    };

    let mut pcm = Vec::new();
    loop {
        match read_event(reader).await? {
            Some(Event::AudioChunk { payload, .. }) => pcm.extend_from_slice(&payload),
            Some(Event::AudioStop) => break,
            other => bail!("unexpected event: {other:?}"),
        }
    }

    wav::write_wav(output, format, &pcm)?;
    let secs = pcm.len() as f32 / (format.rate as f32 * format.bytes_per_frame() as f32).max(1.0);
    info!(
        "Wrote {:.2}s audio ({} bytes) to {}",
        secs,
        pcm.len(),
        output.display()
    );
    Ok(())
}
