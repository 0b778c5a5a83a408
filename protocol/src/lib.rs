//! Shared protocol definitions for Rigel TTS client-server communication.
//!
//! Every message on the wire is one *event*: a newline-terminated JSON
//! header, optionally followed by a raw binary payload whose byte length
//! the header declares. Only `audio-chunk` events carry a payload.
//!
//! Exchange pattern:
//! - Client sends `describe`, server replies with `voices` (capabilities)
//! - Client sends `synthesize`, server replies with `audio-start`,
//!   N x `audio-chunk` (payload = raw PCM), `audio-stop`
//! - On failure the server replies with a single `error` event instead

mod codec;

pub use codec::{read_event, write_event, CodecError, MAX_PAYLOAD};

use serde::{Deserialize, Serialize};

/// PCM audio format carried by `audio-start` and `audio-chunk` headers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioFormat {
    /// Sample rate in Hz
    pub rate: u32,
    /// Bits per sample (16 for s16le)
    pub width: u16,
    /// Number of channels
    pub channels: u16,
}

impl AudioFormat {
    /// Bytes occupied by one frame (one sample across all channels).
    pub fn bytes_per_frame(&self) -> usize {
        (self.width as usize / 8) * self.channels as usize
    }
}

/// Request to synthesize speech for a piece of text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Synthesize {
    /// The text to synthesize
    pub text: String,
    /// Voice to use; the server default when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub voice: Option<String>,
}

impl Synthesize {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            voice: None,
        }
    }

    pub fn with_voice(mut self, voice: impl Into<String>) -> Self {
        self.voice = Some(voice.into());
        self
    }
}

/// One installed voice, as advertised in the `voices` reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoiceInfo {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub languages: Vec<String>,
}

/// Static capability metadata sent in reply to `describe`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerInfo {
    pub name: String,
    pub description: String,
    pub version: String,
    pub voices: Vec<VoiceInfo>,
    /// Native output format of the engine
    pub audio: AudioFormat,
}

/// One protocol event. The closed set of message types; anything else on
/// the wire is a decode error.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    /// Client asks for server capabilities
    Describe,
    /// Server capability reply
    Voices(ServerInfo),
    /// Client requests synthesis
    Synthesize(Synthesize),
    /// Audio response follows
    AudioStart(AudioFormat),
    /// One slice of the PCM response
    AudioChunk {
        format: AudioFormat,
        payload: Vec<u8>,
    },
    /// Audio response complete
    AudioStop,
    /// Request-level failure
    Error { text: String },
}

impl Event {
    /// The wire tag for this event.
    pub fn kind(&self) -> &'static str {
        match self {
            Event::Describe => "describe",
            Event::Voices(_) => "voices",
            Event::Synthesize(_) => "synthesize",
            Event::AudioStart(_) => "audio-start",
            Event::AudioChunk { .. } => "audio-chunk",
            Event::AudioStop => "audio-stop",
            Event::Error { .. } => "error",
        }
    }

    pub fn error(text: impl Into<String>) -> Self {
        Event::Error { text: text.into() }
    }
}
