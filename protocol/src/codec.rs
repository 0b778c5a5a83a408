//! Wire codec: one newline-terminated JSON header per event, followed by
//! the declared number of raw payload bytes.
//!
//! Header shape: `{"type": "...", "data": {...}, "payload_length": N}`.
//! `data` and `payload_length` are omitted when empty. Decoding validates
//! against the closed event set; nothing malformed crosses this boundary.

use std::io;

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::Event;

/// Hard cap on a declared payload length, so a bad header cannot make the
/// receiver allocate an absurd buffer.
pub const MAX_PAYLOAD: usize = 32 * 1024 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
    #[error("malformed header: {0}")]
    MalformedHeader(String),
    #[error("unknown event type {0:?}")]
    UnknownType(String),
    #[error("event type {0:?} does not carry a payload")]
    UnexpectedPayload(String),
    #[error("audio-chunk header missing payload_length")]
    MissingPayload,
    #[error("payload truncated before {expected} declared bytes")]
    TruncatedPayload { expected: usize },
    #[error("declared payload of {0} bytes exceeds the 32 MiB limit")]
    PayloadTooLarge(usize),
}

impl CodecError {
    /// Whether this is a protocol violation by the peer, as opposed to a
    /// dead socket. Violations still get an `error` event written back
    /// before the connection is closed.
    pub fn is_protocol(&self) -> bool {
        !matches!(
            self,
            CodecError::Io(_) | CodecError::TruncatedPayload { .. }
        )
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct Header {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    data: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    payload_length: Option<usize>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ErrorData {
    text: String,
}

/// Read one event from the stream. `Ok(None)` means the peer closed the
/// connection cleanly at an event boundary.
pub async fn read_event<R>(reader: &mut R) -> Result<Option<Event>, CodecError>
where
    R: AsyncBufRead + Unpin,
{
    let mut line = String::new();
    if reader.read_line(&mut line).await? == 0 {
        return Ok(None);
    }

    let header: Header = serde_json::from_str(line.trim_end())
        .map_err(|e| CodecError::MalformedHeader(e.to_string()))?;

    let declared = header.payload_length.unwrap_or(0);
    if declared > MAX_PAYLOAD {
        return Err(CodecError::PayloadTooLarge(declared));
    }

    let mut payload = vec![0u8; declared];
    reader.read_exact(&mut payload).await.map_err(|e| {
        if e.kind() == io::ErrorKind::UnexpectedEof {
            CodecError::TruncatedPayload { expected: declared }
        } else {
            CodecError::Io(e)
        }
    })?;

    event_from(header, payload).map(Some)
}

/// Write one event to the stream, header line then payload.
pub async fn write_event<W>(writer: &mut W, event: &Event) -> Result<(), CodecError>
where
    W: AsyncWrite + Unpin,
{
    let bytes = encode(event)?;
    writer.write_all(&bytes).await?;
    writer.flush().await?;
    Ok(())
}

fn encode(event: &Event) -> Result<Vec<u8>, CodecError> {
    fn value<T: Serialize>(v: &T) -> Result<serde_json::Value, CodecError> {
        serde_json::to_value(v).map_err(|e| CodecError::MalformedHeader(format!("encode: {e}")))
    }

    let (data, payload): (Option<serde_json::Value>, Option<&[u8]>) = match event {
        Event::Describe | Event::AudioStop => (None, None),
        Event::Voices(info) => (Some(value(info)?), None),
        Event::Synthesize(req) => (Some(value(req)?), None),
        Event::AudioStart(format) => (Some(value(format)?), None),
        Event::AudioChunk { format, payload } => (Some(value(format)?), Some(payload)),
        Event::Error { text } => (Some(serde_json::json!({ "text": text })), None),
    };

    let header = Header {
        kind: event.kind().to_string(),
        data,
        payload_length: payload.map(<[u8]>::len),
    };

    let mut bytes = serde_json::to_vec(&header)
        .map_err(|e| CodecError::MalformedHeader(format!("encode: {e}")))?;
    bytes.push(b'\n');
    if let Some(payload) = payload {
        bytes.extend_from_slice(payload);
    }
    Ok(bytes)
}

fn event_from(header: Header, payload: Vec<u8>) -> Result<Event, CodecError> {
    fn data<T: serde::de::DeserializeOwned>(
        kind: &str,
        data: Option<serde_json::Value>,
    ) -> Result<T, CodecError> {
        let value = data
            .ok_or_else(|| CodecError::MalformedHeader(format!("{kind} header missing data")))?;
        serde_json::from_value(value)
            .map_err(|e| CodecError::MalformedHeader(format!("bad {kind} data: {e}")))
    }

    let kind = header.kind.as_str();
    if kind != "audio-chunk" && !payload.is_empty() {
        return Err(CodecError::UnexpectedPayload(header.kind));
    }

    match kind {
        "describe" => Ok(Event::Describe),
        "voices" => Ok(Event::Voices(data(kind, header.data)?)),
        "synthesize" => Ok(Event::Synthesize(data(kind, header.data)?)),
        "audio-start" => Ok(Event::AudioStart(data(kind, header.data)?)),
        "audio-chunk" => {
            if header.payload_length.is_none() {
                return Err(CodecError::MissingPayload);
            }
            Ok(Event::AudioChunk {
                format: data(kind, header.data)?,
                payload,
            })
        }
        "audio-stop" => Ok(Event::AudioStop),
        "error" => {
            let ErrorData { text } = data(kind, header.data)?;
            Ok(Event::Error { text })
        }
        _ => Err(CodecError::UnknownType(header.kind)),
    }
}
