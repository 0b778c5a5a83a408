//! Rigel TTS server.
//!
//! Accepts TCP connections speaking the line-delimited event protocol and
//! funnels every `synthesize` request through one serialized engine. Each
//! connection gets its own task; the engine gets its own worker; errors on
//! one connection never touch another.

pub mod handler;
pub mod scheduler;
pub mod stream;

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::{TcpListener, ToSocketAddrs};
use tracing::{error, info, warn};

use rigel_engine::EngineInfo;
use rigel_protocol::ServerInfo;

use scheduler::Scheduler;

pub const DEFAULT_CHUNK_BYTES: usize = 4096;

/// Immutable per-process state shared by every connection.
#[derive(Debug, Clone)]
pub struct ServerState {
    /// Capability metadata returned for `describe`
    pub info: ServerInfo,
    /// Maximum `audio-chunk` payload size
    pub chunk_bytes: usize,
    /// Sentence terminators; the first is appended to unterminated text
    pub auto_punctuation: String,
}

impl ServerState {
    /// Snapshot the engine's capabilities once, so `describe` replies never
    /// have to wait behind the synthesis queue.
    pub fn new(engine_info: EngineInfo) -> Self {
        Self {
            info: ServerInfo {
                name: "rigel".into(),
                description: "Rigel speech synthesis server".into(),
                version: env!("CARGO_PKG_VERSION").into(),
                voices: engine_info.voices,
                audio: engine_info.format,
            },
            chunk_bytes: DEFAULT_CHUNK_BYTES,
            auto_punctuation: ".?!".into(),
        }
    }

    pub fn with_chunk_bytes(mut self, chunk_bytes: usize) -> Self {
        self.chunk_bytes = chunk_bytes;
        self
    }

    pub fn with_auto_punctuation(mut self, auto_punctuation: impl Into<String>) -> Self {
        self.auto_punctuation = auto_punctuation.into();
        self
    }
}

/// Listening socket. Binding failure is fatal at startup; accept failures
/// once running are transient and only logged.
pub struct Server {
    listener: TcpListener,
}

impl Server {
    pub async fn bind<A: ToSocketAddrs>(addr: A) -> io::Result<Server> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Server { listener })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept connections until the process dies, one handler task each.
    pub async fn run(self, scheduler: Scheduler, state: ServerState) -> anyhow::Result<()> {
        let state = Arc::new(state);
        info!(addr = %self.listener.local_addr()?, "listening");

        loop {
            match self.listener.accept().await {
                Ok((stream, peer)) => {
                    let scheduler = scheduler.clone();
                    let state = Arc::clone(&state);
                    tokio::spawn(async move {
                        let session = handler::Session::new(stream, peer);
                        if let Err(e) = handler::run(session, scheduler, state).await {
                            error!(peer = %peer, error = %e, "connection error");
                        }
                    });
                }
                Err(e) => {
                    warn!(error = %e, "failed to accept connection");
                }
            }
        }
    }
}
