//! Shared arena state: the simulated world plus the sessions steering it.
//!
//! World and registry live behind separate locks. Whenever both are needed
//! they are taken through [`Arena::lock_both`], world first, and no caller
//! ever gets a guard back, so the order cannot be broken from outside.

use crate::framing::{write_frame, ConnectionError};
use crate::sessions::{Session, SessionRegistry, SessionWriter};
use log::{debug, info, warn};
use shared::{Message, ProtocolError, Speed, World, WorldSnapshot};
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::sync::{Mutex, MutexGuard, Notify};
use tokio::time::timeout;

#[derive(Debug, Error)]
pub enum ArenaError {
    #[error("no free identity for {0}")]
    Full(IpAddr),
    #[error("failed to encode frame: {0}")]
    Encode(#[from] ProtocolError),
    #[error("failed to deliver identity: {0}")]
    Delivery(#[from] ConnectionError),
}

/// Why a session is being torn down.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemovalReason {
    /// The agent died in the simulation.
    Killed,
    /// The connection ended or faulted on the receive side.
    Disconnected,
    /// A write to the connection failed or timed out.
    SendFailed,
}

impl RemovalReason {
    fn sends_notice(self) -> bool {
        !matches!(self, RemovalReason::SendFailed)
    }
}

impl fmt::Display for RemovalReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            RemovalReason::Killed => "killed",
            RemovalReason::Disconnected => "disconnected",
            RemovalReason::SendFailed => "send failed",
        };
        f.write_str(text)
    }
}

/// A session already taken out of the arena whose connection still has to
/// be closed.
pub struct Departure {
    session: Session,
    reason: RemovalReason,
    send_timeout: Duration,
}

impl Departure {
    pub fn identity(&self) -> &str {
        &self.session.identity
    }

    /// Sends the death notice when the reason calls for one, then shuts the
    /// connection. Each step is bounded by the send timeout.
    pub async fn close(self) {
        let identity = &self.session.identity;
        let writer = self.session.writer();
        let mut out = match timeout(self.send_timeout, writer.lock()).await {
            Ok(out) => out,
            Err(_) => {
                debug!("Writer of {} stayed busy, dropping it without a notice", identity);
                return;
            }
        };

        if self.reason.sends_notice() {
            match Message::DeathNotice.to_frame() {
                Ok(frame) => {
                    if let Err(e) = write_frame(&mut *out, &frame, self.send_timeout).await {
                        debug!("Death notice to {} not delivered: {}", identity, e);
                    }
                }
                Err(e) => warn!("Failed to encode death notice: {}", e),
            }
        }

        if let Ok(Err(e)) = timeout(self.send_timeout, out.shutdown()).await {
            debug!("Shutting down {} failed: {}", identity, e);
        }
    }
}

/// Counters for the periodic status line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArenaStatus {
    pub tick: u32,
    pub agents: usize,
    pub resources: usize,
    pub sessions: usize,
}

pub struct Arena {
    world: Mutex<World>,
    sessions: Mutex<SessionRegistry>,
    send_timeout: Duration,
}

impl Arena {
    pub fn new(world: World, max_players: usize, send_timeout: Duration) -> Self {
        Self {
            world: Mutex::new(world),
            sessions: Mutex::new(SessionRegistry::new(max_players)),
            send_timeout,
        }
    }

    pub fn send_timeout(&self) -> Duration {
        self.send_timeout
    }

    async fn lock_both(&self) -> (MutexGuard<'_, World>, MutexGuard<'_, SessionRegistry>) {
        let world = self.world.lock().await;
        let sessions = self.sessions.lock().await;
        (world, sessions)
    }

    /// Runs `f` with the world locked.
    pub async fn with_world<T>(&self, f: impl FnOnce(&mut World) -> T) -> T {
        let mut world = self.world.lock().await;
        f(&mut world)
    }

    /// Runs `f` with the session registry locked.
    pub async fn with_sessions<T>(&self, f: impl FnOnce(&mut SessionRegistry) -> T) -> T {
        let mut sessions = self.sessions.lock().await;
        f(&mut sessions)
    }

    /// Admits a connection: picks an identity, spawns its agent, registers
    /// the session and sends the identity frame.
    ///
    /// The writer stays locked from before registration until the identity
    /// frame is out, so no snapshot can reach the client ahead of it.
    pub async fn register(
        &self,
        addr: SocketAddr,
        writer: SessionWriter,
        closed: Arc<Notify>,
    ) -> Result<String, ArenaError> {
        let mut out = writer.lock().await;

        let identity = {
            let (mut world, mut sessions) = self.lock_both().await;
            let identity = sessions
                .generate_identity(addr, &world)
                .ok_or(ArenaError::Full(addr.ip()))?;
            world.spawn_agent(identity.clone());
            sessions.insert(Session::new(identity.clone(), addr, Arc::clone(&writer), closed));
            identity
        };

        let delivered = match Message::Identity(identity.clone()).to_frame() {
            Ok(frame) => write_frame(&mut *out, &frame, self.send_timeout)
                .await
                .map_err(ArenaError::from),
            Err(e) => Err(e.into()),
        };
        drop(out);

        if let Err(e) = delivered {
            warn!("Could not admit {} as {}: {}", addr, identity, e);
            self.remove_session(&identity, RemovalReason::SendFailed).await;
            return Err(e);
        }

        info!("Player {} joined from {}", identity, addr);
        Ok(identity)
    }

    /// Tears a session down. Safe to call any number of times; only the
    /// first call for an identity does anything and returns true.
    ///
    /// Waits for the connection to be closed. Callers that must not wait on
    /// a socket use [`Arena::detach_session`] instead.
    pub async fn remove_session(&self, identity: &str, reason: RemovalReason) -> bool {
        match self.detach_session(identity, reason).await {
            Some(departure) => {
                departure.close().await;
                true
            }
            None => false,
        }
    }

    /// Takes a session out of the arena without touching its socket.
    ///
    /// The agent, if still alive, is turned into remains and the receive loop
    /// is told to stop. The returned [`Departure`] still has to be closed; only
    /// the first call for an identity gets one.
    pub async fn detach_session(&self, identity: &str, reason: RemovalReason) -> Option<Departure> {
        let session = {
            let (mut world, mut sessions) = self.lock_both().await;
            let session = sessions.remove(identity)?;
            world.kill_agent(identity);
            session
        };

        session.signal_closed();
        info!("Player {} removed ({})", identity, reason);
        Some(Departure {
            session,
            reason,
            send_timeout: self.send_timeout,
        })
    }

    /// Steers a player's agent. Non-finite headings and unknown identities
    /// are ignored and return false.
    pub async fn apply_input(&self, identity: &str, heading: f32, speed: f32) -> bool {
        if !heading.is_finite() {
            debug!("Ignoring non-finite heading from {}", identity);
            return false;
        }
        self.with_world(|world| world.steer_agent(identity, heading as f64, Speed::from_input(speed)))
            .await
    }

    /// Advances the world one tick. Returns who died and, when asked for,
    /// a snapshot taken right after the tick.
    pub async fn advance(&self, take_snapshot: bool) -> (Vec<String>, Option<WorldSnapshot>) {
        self.with_world(|world| {
            let killed = world.advance();
            let snapshot = take_snapshot.then(|| world.snapshot());
            (killed, snapshot)
        })
        .await
    }

    pub async fn snapshot(&self) -> WorldSnapshot {
        self.with_world(|world| world.snapshot()).await
    }

    pub async fn session_writers(&self) -> Vec<(String, SessionWriter)> {
        self.with_sessions(|sessions| sessions.writers()).await
    }

    pub async fn status(&self) -> ArenaStatus {
        let (world, sessions) = self.lock_both().await;
        ArenaStatus {
            tick: world.tick,
            agents: world.agent_count(),
            resources: world.resource_count(),
            sessions: sessions.len(),
        }
    }
}
