//! One client connection's lifetime: read events, dispatch, write replies.
//!
//! All failures here are isolated to the one connection. Protocol
//! violations get a single `error` event back before the close when the
//! socket is still writable; a dead socket just terminates the handler.

use std::future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tracing::{debug, info, trace, warn};

use rigel_protocol::{read_event, write_event, CodecError, Event, Synthesize};

use crate::scheduler::{Scheduler, SubmitError, SynthesisRequest};
use crate::stream;
use crate::ServerState;

/// Per-connection state: the split socket and an event sequence counter.
pub struct Session {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
    peer: SocketAddr,
    events_written: u64,
}

impl Session {
    pub fn new(stream: TcpStream, peer: SocketAddr) -> Self {
        let (read, write) = stream.into_split();
        Self {
            reader: BufReader::new(read),
            writer: write,
            peer,
            events_written: 0,
        }
    }

    async fn send(&mut self, event: &Event) -> Result<(), CodecError> {
        write_event(&mut self.writer, event).await?;
        self.events_written += 1;
        trace!(
            peer = %self.peer,
            seq = self.events_written,
            kind = event.kind(),
            "sent event"
        );
        Ok(())
    }
}

/// Drive one connection until EOF or a fatal I/O error.
pub async fn run(
    mut session: Session,
    scheduler: Scheduler,
    state: Arc<ServerState>,
) -> anyhow::Result<()> {
    info!(peer = %session.peer, "client connected");

    loop {
        let event = match read_event(&mut session.reader).await {
            Ok(Some(event)) => event,
            Ok(None) => break, // clean EOF
            Err(e) if e.is_protocol() => {
                warn!(peer = %session.peer, error = %e, "protocol violation");
                let _ = session.send(&Event::error(e.to_string())).await;
                break;
            }
            Err(e) => return Err(e.into()),
        };

        match event {
            Event::Describe => {
                session.send(&Event::Voices(state.info.clone())).await?;
                debug!(peer = %session.peer, "sent capabilities");
            }
            Event::Synthesize(request) => {
                if !synthesize(&mut session, &scheduler, &state, request).await? {
                    // client went away while its request was queued
                    break;
                }
            }
            other => {
                warn!(peer = %session.peer, kind = other.kind(), "unexpected client event");
                let _ = session
                    .send(&Event::error(format!("unexpected event {:?}", other.kind())))
                    .await;
                break;
            }
        }
    }

    info!(peer = %session.peer, "connection closed");
    Ok(())
}

/// Handle one `synthesize` request. Returns `Ok(false)` when the client
/// disconnected while the request was waiting its turn.
async fn synthesize(
    session: &mut Session,
    scheduler: &Scheduler,
    state: &ServerState,
    request: Synthesize,
) -> anyhow::Result<bool> {
    let text = normalize_text(&request.text, &state.auto_punctuation);
    debug!(peer = %session.peer, raw = %request.text, text = %text, "synthesize");

    if text.is_empty() {
        // nothing to say; an empty audio sequence keeps the exchange well formed
        session.send(&Event::AudioStart(state.info.audio)).await?;
        session.send(&Event::AudioStop).await?;
        return Ok(true);
    }

    let start = Instant::now();
    let peer = session.peer;
    let pending = scheduler.submit(SynthesisRequest {
        text,
        voice: request.voice,
    });

    let outcome = tokio::select! {
        outcome = pending.wait() => outcome,
        _ = connection_lost(&mut session.reader) => {
            debug!(peer = %peer, "client went away while request was queued");
            return Ok(false);
        }
    };

    match outcome {
        Ok(audio) => {
            info!(
                peer = %session.peer,
                bytes = audio.pcm.len(),
                secs = audio.duration_secs() as f64,
                elapsed = ?start.elapsed(),
                "synthesized"
            );
            for event in stream::events(&audio, state.chunk_bytes) {
                session.send(&event).await?;
            }
        }
        Err(SubmitError::Engine(e)) => {
            // already logged by the worker; only this client hears about it
            session.send(&Event::error(e.to_string())).await?;
        }
        Err(SubmitError::SchedulerGone) => {
            let _ = session
                .send(&Event::error("synthesis backend unavailable"))
                .await;
            anyhow::bail!("synthesis worker is gone");
        }
    }

    Ok(true)
}

/// Resolves when the peer disconnects. Buffered input that is not EOF
/// (a pipelined event) parks forever instead, letting the reply arm win.
async fn connection_lost<R: AsyncBufRead + Unpin>(reader: &mut R) {
    match reader.fill_buf().await {
        Ok(buf) if buf.is_empty() => {}
        Ok(_) => future::pending().await,
        Err(_) => {}
    }
}

/// Join multi-line text and make sure it ends with a sentence terminator,
/// so voices that need trailing punctuation do not trail off.
fn normalize_text(raw: &str, auto_punctuation: &str) -> String {
    let mut text = raw
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join(" ");

    if !text.is_empty() && !text.ends_with(|c| auto_punctuation.contains(c)) {
        if let Some(first) = auto_punctuation.chars().next() {
            text.push(first);
        }
    }
    text
}

#[cfg(test)]
mod tests {
    use super::normalize_text;

    #[test]
    fn joins_lines_and_appends_punctuation() {
        assert_eq!(normalize_text("hello\nworld", ".?!"), "hello world.");
        assert_eq!(normalize_text("  spaced  \n\n lines ", ".?!"), "spaced lines.");
    }

    #[test]
    fn existing_terminator_is_kept() {
        assert_eq!(normalize_text("ready?", ".?!"), "ready?");
        assert_eq!(normalize_text("done.", ".?!"), "done.");
    }

    #[test]
    fn empty_text_stays_empty() {
        assert_eq!(normalize_text("", ".?!"), "");
        assert_eq!(normalize_text(" \n \n ", ".?!"), "");
    }

    #[test]
    fn no_punctuation_set_leaves_text_alone() {
        assert_eq!(normalize_text("hello\nworld", ""), "hello world");
    }
}
