//! Engine boundary for Rigel.
//!
//! The server treats speech synthesis as an opaque, blocking, exclusive-use
//! resource behind [`SynthesisEngine`]: load once at startup, hand ownership
//! to a single worker, call `synthesize` one request at a time. This crate
//! defines that contract plus one concrete engine, [`PiperEngine`], which
//! drives the Piper TTS binary as a subprocess.

mod piper;

pub use piper::{PiperConfig, PiperEngine};

use std::fmt;
use std::str::FromStr;

use rigel_protocol::{AudioFormat, VoiceInfo};

/// Raw PCM produced for one request. Owned by whoever streams it; never
/// cached across requests.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioResult {
    pub pcm: Vec<u8>,
    pub format: AudioFormat,
}

impl AudioResult {
    pub fn duration_secs(&self) -> f32 {
        let frame = self.format.bytes_per_frame();
        if frame == 0 || self.format.rate == 0 {
            return 0.0;
        }
        self.pcm.len() as f32 / (self.format.rate as f32 * frame as f32)
    }
}

/// Static engine metadata, read once at startup so capability replies never
/// have to touch the engine itself.
#[derive(Debug, Clone)]
pub struct EngineInfo {
    pub voices: Vec<VoiceInfo>,
    /// Output format of the default voice
    pub format: AudioFormat,
}

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("cannot load engine: {0}")]
    Load(String),
    #[error("unknown voice {0:?}")]
    VoiceNotFound(String),
    #[error("synthesis failed: {0}")]
    Synthesis(String),
    #[error("engine i/o error: {0}")]
    Io(#[from] std::io::Error),
}

/// A loaded text-to-speech engine.
///
/// Calls block until audio is ready and must never overlap; callers are
/// expected to serialize access by owning the engine exclusively.
pub trait SynthesisEngine: Send {
    /// Installed voices and the native output format.
    fn info(&self) -> EngineInfo;

    /// Render `text` to PCM with the given voice, or the engine default
    /// when `voice` is `None`.
    fn synthesize(&mut self, text: &str, voice: Option<&str>) -> Result<AudioResult, EngineError>;
}

/// Execution device for inference.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Device {
    Cpu,
    Gpu,
}

impl FromStr for Device {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "cpu" => Ok(Device::Cpu),
            "gpu" | "cuda" => Ok(Device::Gpu),
            other => Err(format!("unknown device {other:?}, expected cpu or gpu")),
        }
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Device::Cpu => "cpu",
            Device::Gpu => "gpu",
        })
    }
}
