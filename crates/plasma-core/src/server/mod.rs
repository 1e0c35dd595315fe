//! Plasma chat server.
//!
//! One task per accepted connection runs the handshake, joins the roster,
//! then hands the session to a [`PeerHandler`] until it leaves.
//!
//! ```text
//! accept ─▶ Session ─▶ Handshake ─▶ Roster::insert ─▶ PeerHandler::run
//!                          │ fail                           │ leave/EOF
//!                          ▼                                ▼
//!                        close                      Roster::remove, close
//! ```

mod config;
mod file_store;
mod limits;
mod peer;
mod roster;

pub use config::{LimitsConfig, ServerConfig, DEFAULT_CONTENT_LIMIT};
pub use file_store::{FileStore, FILE_ID_LEN};
pub use limits::{default_probe, ByteCeiling, Limits, MemoryProbe, NoMemoryProbe};
pub use peer::{is_valid_name, Flow, PeerHandler, MAX_NAME_LEN};
pub use roster::{PeerId, Roster, SharedWriter, DELIVERY_TIMEOUT};

#[cfg(feature = "memory-probe")]
pub use limits::SystemMemory;

use crate::crypto::UidKey;
use crate::error::Result;
use crate::handshake::Handshake;
use crate::logging::sanitize_for_log;
use crate::protocol::{kind, GuildSnapshot, Packet, PeerSummary};
use crate::session::Session;
use chrono::Utc;
use serde_json::Value;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// State shared by every connection.
pub struct ServerContext {
    /// Server name shown to clients.
    pub name: String,
    /// Message and packet limits.
    pub limits: Limits,
    /// Connected peers.
    pub roster: Roster,
    /// Uploaded files.
    pub files: FileStore,
    uid_key: UidKey,
}

impl ServerContext {
    /// Create a context with a fresh uid key.
    pub fn new(name: impl Into<String>, limits: Limits, files: FileStore) -> Self {
        Self {
            name: name.into(),
            limits,
            roster: Roster::new(),
            files,
            uid_key: UidKey::generate(),
        }
    }

    /// Byte ceiling for the current number of peers.
    pub async fn packet_limit(&self) -> usize {
        self.limits.packet.resolve(self.roster.len().await)
    }

    /// Current guild snapshot.
    pub async fn guild(&self) -> GuildSnapshot {
        GuildSnapshot {
            name: self.name.clone(),
            users: self.roster.users().await,
            packet_limit: self.packet_limit().await,
        }
    }

    /// Build a server-originated packet stamped with the current time and guild.
    pub async fn pack(&self, packet_kind: &str, author: PeerSummary, content: Value) -> Result<Packet> {
        Packet::from_server(packet_kind, author, content, now(), self.guild().await)
    }

    /// Build a packet and deliver it to every peer.
    pub async fn broadcast(
        &self,
        packet_kind: &str,
        author: PeerSummary,
        content: Value,
    ) -> Result<usize> {
        if matches!(packet_kind, kind::MESSAGE | kind::JOIN | kind::LEAVE) {
            if let Some(text) = content.as_str() {
                info!(author = %author.name, "{}", sanitize_for_log(text));
            }
        }
        let packet = self.pack(packet_kind, author, content).await?;
        self.roster.broadcast(&packet).await
    }
}

fn now() -> f64 {
    Utc::now().timestamp_micros() as f64 / 1_000_000.0
}

/// Accepts connections and serves them.
pub struct ChatServer {
    ctx: Arc<ServerContext>,
    handshake: Handshake,
}

impl ChatServer {
    /// Open the file store, purge it and build the shared context.
    pub async fn new(config: &ServerConfig) -> Result<Self> {
        let files = FileStore::open(&config.files_dir).await?;
        let purged = files.purge().await?;
        if purged > 0 {
            info!(removed = purged, dir = %files.dir().display(), "Cleared stale uploads");
        }
        let ctx = ServerContext::new(config.name.clone(), config.limits()?, files);
        Ok(Self::from_context(Arc::new(ctx)))
    }

    /// Serve an existing context.
    pub fn from_context(ctx: Arc<ServerContext>) -> Self {
        Self {
            ctx,
            handshake: Handshake::default(),
        }
    }

    /// Override handshake settings.
    pub fn with_handshake(mut self, handshake: Handshake) -> Self {
        self.handshake = handshake;
        self
    }

    /// Shared state.
    pub fn context(&self) -> &Arc<ServerContext> {
        &self.ctx
    }

    /// Accept connections forever.
    pub async fn serve(&self, listener: TcpListener) -> Result<()> {
        loop {
            match listener.accept().await {
                Ok((stream, addr)) => {
                    if let Err(e) = stream.set_nodelay(true) {
                        debug!(peer = %addr, error = %e, "Failed to set TCP_NODELAY");
                    }
                    self.spawn_connection(stream, addr);
                }
                Err(e) => warn!(error = %e, "Accept failed"),
            }
        }
    }

    /// Serve one connection on its own task.
    pub fn spawn_connection<S>(&self, stream: S, addr: SocketAddr) -> JoinHandle<()>
    where
        S: AsyncRead + AsyncWrite + Send + Sync + 'static,
    {
        let ctx = Arc::clone(&self.ctx);
        let handshake = self.handshake.clone();
        tokio::spawn(handle_connection(ctx, handshake, stream, addr))
    }

    /// Close every session.
    pub async fn shutdown(&self) {
        let peers = self.ctx.roster.len().await;
        self.ctx.roster.close_all().await;
        info!(peers, "Server shut down");
    }
}

async fn handle_connection<S>(ctx: Arc<ServerContext>, handshake: Handshake, stream: S, addr: SocketAddr)
where
    S: AsyncRead + AsyncWrite + Send + Sync + 'static,
{
    debug!(peer = %addr, "New connection");
    let mut session = Session::new(stream);

    let handshake = handshake.with_limit(ctx.packet_limit().await);
    if let Err(e) = handshake.as_server(&mut session).await {
        warn!(peer = %addr, error = %e, "Handshake failed");
        if let Err(e) = session.close().await {
            debug!(peer = %addr, error = %e, "Close failed");
        }
        return;
    }

    let (reader, writer) = session.split();
    let writer: SharedWriter = Arc::new(Mutex::new(writer));
    let id = ctx.roster.insert(addr, Arc::clone(&writer)).await;
    info!(peer = %addr, "Session established");

    PeerHandler::new(id, addr, ctx, reader, writer).run().await;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_send<T: Send>(_: &T) {}

    #[tokio::test]
    async fn test_connection_task_is_send() {
        let dir = tempfile::tempdir().expect("tempdir");
        let files = FileStore::open(dir.path()).await.expect("open store");
        let limits = Limits {
            content: 280,
            packet: ByteCeiling::Fixed(4096),
        };
        let ctx = Arc::new(ServerContext::new("Test Server", limits, files));
        let (stream, _peer) = tokio::io::duplex(64);

        let task = handle_connection(ctx, Handshake::default(), stream, SocketAddr::from(([127, 0, 0, 1], 1)));
        assert_send(&task);
    }
}
