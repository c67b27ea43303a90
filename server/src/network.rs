//! Server network layer: TCP accept loop, admission and per-connection input loops

use crate::arena::{Arena, RemovalReason};
use crate::broadcast::{default_workers, run_broadcaster, run_tick_driver, BroadcastConfig};
use crate::framing::{read_frame, ConnectionError};
use crate::sessions::session_writer;
use log::{debug, error, info, warn};
use shared::protocol::MSG_PASSKEY;
use shared::{Message, World, WorldConfig, FPS, MAX_PLAYERS};
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::tcp::OwnedReadHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{watch, Notify};

/// Everything the server needs to know at startup
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind_addr: String,
    /// Simulation ticks per second
    pub fps: u32,
    /// Publish a snapshot every this many ticks
    pub broadcast_every: u32,
    /// Secret a client must present before it is admitted
    pub passkey: String,
    pub max_players: usize,
    /// Longest a connection may stay silent
    pub recv_timeout: Duration,
    /// Longest a single write to a client may take
    pub send_timeout: Duration,
    /// Longest a new connection may take to present its passkey
    pub admission_timeout: Duration,
    pub cull_snapshots: bool,
    pub broadcast_workers: usize,
    pub world: WorldConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:12345".to_string(),
            fps: FPS,
            broadcast_every: 1,
            passkey: "slither".to_string(),
            max_players: MAX_PLAYERS,
            recv_timeout: Duration::from_secs(10),
            send_timeout: Duration::from_secs(1),
            admission_timeout: Duration::from_secs(5),
            cull_snapshots: true,
            broadcast_workers: default_workers(MAX_PLAYERS),
            world: WorldConfig::default(),
        }
    }
}

/// Main server owning the listener and the shared arena
pub struct Server {
    listener: TcpListener,
    arena: Arc<Arena>,
    config: Arc<ServerConfig>,
}

impl Server {
    pub async fn bind(config: ServerConfig) -> io::Result<Self> {
        let listener = TcpListener::bind(&config.bind_addr).await?;
        let world = World::new(config.world.clone());
        let arena = Arc::new(Arena::new(world, config.max_players, config.send_timeout));

        Ok(Server {
            listener,
            arena,
            config: Arc::new(config),
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn arena(&self) -> Arc<Arena> {
        Arc::clone(&self.arena)
    }

    /// Starts the tick driver and broadcaster, then accepts connections forever.
    pub async fn run(self) -> io::Result<()> {
        let (snapshot_tx, snapshot_rx) = watch::channel(None);

        tokio::spawn(run_tick_driver(
            Arc::clone(&self.arena),
            self.config.fps,
            self.config.broadcast_every,
            snapshot_tx,
        ));
        tokio::spawn(run_broadcaster(
            Arc::clone(&self.arena),
            snapshot_rx,
            BroadcastConfig {
                workers: self.config.broadcast_workers,
                send_timeout: self.config.send_timeout,
                cull: self.config.cull_snapshots,
            },
        ));

        info!("Server listening on {}", self.local_addr()?);

        loop {
            match self.listener.accept().await {
                Ok((stream, addr)) => {
                    debug!("Accepted connection from {}", addr);
                    let arena = Arc::clone(&self.arena);
                    let config = Arc::clone(&self.config);
                    tokio::spawn(handle_connection(arena, config, stream, addr));
                }
                Err(e) => {
                    error!("Error accepting connection: {}", e);
                    tokio::time::sleep(Duration::from_millis(10)).await;
                }
            }
        }
    }
}

/// Reads the admission frame. Returns true only for a passkey frame carrying
/// exactly the configured passkey.
async fn admit(reader: &mut OwnedReadHalf, config: &ServerConfig, addr: SocketAddr) -> bool {
    match read_frame(reader, config.admission_timeout).await {
        Ok(frame) if frame.msg_type == MSG_PASSKEY && frame.payload == config.passkey.as_bytes() => true,
        Ok(frame) => {
            warn!("Rejected {}: bad admission frame of type {}", addr, frame.msg_type);
            false
        }
        Err(e) => {
            warn!("Rejected {}: {}", addr, e);
            false
        }
    }
}

/// Drives one connection from admission to removal.
///
/// Rejected connections are closed without any reply. Admitted ones stay in
/// the input loop until the peer goes away, faults, or the session is closed
/// from elsewhere.
async fn handle_connection(arena: Arc<Arena>, config: Arc<ServerConfig>, stream: TcpStream, addr: SocketAddr) {
    if let Err(e) = stream.set_nodelay(true) {
        debug!("Could not disable Nagle for {}: {}", addr, e);
    }
    let (mut reader, writer) = stream.into_split();

    if !admit(&mut reader, &config, addr).await {
        return;
    }

    let closed = Arc::new(Notify::new());
    let identity = match arena
        .register(addr, session_writer(writer), Arc::clone(&closed))
        .await
    {
        Ok(identity) => identity,
        Err(e) => {
            warn!("Dropping {}: {}", addr, e);
            return;
        }
    };

    receive_inputs(&arena, &config, &identity, &mut reader, &closed).await;
    arena.remove_session(&identity, RemovalReason::Disconnected).await;
}

async fn receive_inputs(
    arena: &Arena,
    config: &ServerConfig,
    identity: &str,
    reader: &mut OwnedReadHalf,
    closed: &Notify,
) {
    loop {
        let frame = tokio::select! {
            _ = closed.notified() => {
                debug!("Session {} closed, stopping its receive loop", identity);
                return;
            }
            frame = read_frame(reader, config.recv_timeout) => frame,
        };

        let frame = match frame {
            Ok(frame) => frame,
            Err(ConnectionError::Closed) => {
                info!("Player {} closed the connection", identity);
                return;
            }
            Err(e) => {
                info!("Connection with {} interrupted: {}", identity, e);
                return;
            }
        };

        match frame.decode() {
            Ok(Message::Input { heading, speed }) => {
                arena.apply_input(identity, heading, speed).await;
            }
            Ok(other) => debug!("Ignoring message type {} from {}", other.msg_type(), identity),
            Err(e) if e.is_recoverable() => warn!("Ignoring frame from {}: {}", identity, e),
            Err(e) => {
                warn!("Dropping {}: {}", identity, e);
                return;
            }
        }
    }
}
