//! Registry of admitted connections for the arena server
//!
//! This module tracks every player connection that got past admission:
//! - The identity assigned to it, shared with the agent it controls
//! - The outbound half of its socket, shared between broadcasts and notices
//! - A close signal that tells its receive loop to stop
//!
//! Identities are derived from the peer's IP address, so several players
//! behind one address get distinct `"{ip}_{n}"` identities.

use log::info;
use shared::World;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tokio::io::AsyncWrite;
use tokio::sync::{Mutex, Notify};

/// Outbound half of a connection.
///
/// Every write to a player goes through this lock so frames never interleave.
pub type SessionWriter = Arc<Mutex<Box<dyn AsyncWrite + Send + Unpin>>>;

/// Wraps any writer into a [`SessionWriter`].
pub fn session_writer<W>(writer: W) -> SessionWriter
where
    W: AsyncWrite + Send + Unpin + 'static,
{
    Arc::new(Mutex::new(Box::new(writer)))
}

/// An admitted player connection
pub struct Session {
    /// Identity of the agent this connection steers
    pub identity: String,
    /// Peer address, kept for logging
    pub addr: SocketAddr,
    pub connected_at: Instant,
    writer: SessionWriter,
    closed: Arc<Notify>,
}

impl Session {
    pub fn new(identity: String, addr: SocketAddr, writer: SessionWriter, closed: Arc<Notify>) -> Self {
        Self {
            identity,
            addr,
            connected_at: Instant::now(),
            writer,
            closed,
        }
    }

    pub fn writer(&self) -> SessionWriter {
        Arc::clone(&self.writer)
    }

    /// Wakes the connection's receive loop so it stops reading.
    ///
    /// A signal sent while the loop is busy is kept until it next waits.
    pub fn signal_closed(&self) {
        self.closed.notify_one();
    }
}

/// All admitted sessions, keyed by identity
///
/// Capacity is bounded by `max_players`; identities are only handed out
/// while a slot is free.
pub struct SessionRegistry {
    sessions: HashMap<String, Session>,
    max_players: usize,
}

impl SessionRegistry {
    pub fn new(max_players: usize) -> Self {
        Self {
            sessions: HashMap::new(),
            max_players,
        }
    }

    pub fn max_players(&self) -> usize {
        self.max_players
    }

    /// Picks the identity for a new connection from `addr`
    ///
    /// Tries `"{ip}_1"`, `"{ip}_2"`, ... up to `max_players` and returns the
    /// first one used neither by a session nor by a living agent. Returns
    /// None when the server is full or every candidate is taken.
    pub fn generate_identity(&self, addr: SocketAddr, world: &World) -> Option<String> {
        if self.sessions.len() >= self.max_players {
            return None;
        }

        let ip = addr.ip();
        (1..=self.max_players)
            .map(|n| format!("{}_{}", ip, n))
            .find(|candidate| !self.sessions.contains_key(candidate) && !world.contains_agent(candidate))
    }

    /// Adds a session. Returns false if its identity is already registered.
    pub fn insert(&mut self, session: Session) -> bool {
        if self.sessions.contains_key(&session.identity) {
            return false;
        }
        info!("Session {} registered from {}", session.identity, session.addr);
        self.sessions.insert(session.identity.clone(), session);
        true
    }

    /// Removes a session, handing it back so the caller can close it.
    pub fn remove(&mut self, identity: &str) -> Option<Session> {
        self.sessions.remove(identity)
    }

    pub fn get(&self, identity: &str) -> Option<&Session> {
        self.sessions.get(identity)
    }

    pub fn contains(&self, identity: &str) -> bool {
        self.sessions.contains_key(identity)
    }

    /// Identity and writer of every session, for broadcasting
    pub fn writers(&self) -> Vec<(String, SessionWriter)> {
        self.sessions
            .values()
            .map(|session| (session.identity.clone(), session.writer()))
            .collect()
    }

    pub fn identities(&self) -> Vec<String> {
        self.sessions.keys().cloned().collect()
    }

    /// Returns the number of registered sessions
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Returns true if nobody is connected
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::{Color, Position, WorldConfig};

    fn test_addr() -> SocketAddr {
        "127.0.0.1:8080".parse().unwrap()
    }

    fn other_addr() -> SocketAddr {
        "10.1.2.3:5000".parse().unwrap()
    }

    fn test_world() -> World {
        World::new(WorldConfig {
            resource_floor: 0,
            rng_seed: Some(1),
            ..WorldConfig::default()
        })
    }

    fn session(identity: &str, addr: SocketAddr) -> Session {
        Session::new(
            identity.to_string(),
            addr,
            session_writer(tokio::io::sink()),
            Arc::new(Notify::new()),
        )
    }

    #[test]
    fn test_registry_creation() {
        let registry = SessionRegistry::new(5);
        assert_eq!(registry.max_players(), 5);
        assert!(registry.is_empty());
        assert_eq!(registry.len(), 0);
    }

    #[test]
    fn test_first_identity_uses_ip() {
        let registry = SessionRegistry::new(3);
        let world = test_world();
        assert_eq!(
            registry.generate_identity(test_addr(), &world),
            Some("127.0.0.1_1".to_string())
        );
    }

    #[test]
    fn test_identity_skips_registered_and_living() {
        let mut registry = SessionRegistry::new(5);
        let mut world = test_world();

        assert!(registry.insert(session("127.0.0.1_1", test_addr())));
        world.add_agent("127.0.0.1_2", Position::new(100, 100), Color::new(1, 1, 1));

        assert_eq!(
            registry.generate_identity(test_addr(), &world),
            Some("127.0.0.1_3".to_string())
        );
        assert_eq!(
            registry.generate_identity(other_addr(), &world),
            Some("10.1.2.3_1".to_string())
        );
    }

    #[test]
    fn test_identity_reuses_smallest_free_number() {
        let mut registry = SessionRegistry::new(5);
        let world = test_world();
        registry.insert(session("127.0.0.1_1", test_addr()));
        registry.insert(session("127.0.0.1_2", test_addr()));
        registry.remove("127.0.0.1_1");

        assert_eq!(
            registry.generate_identity(test_addr(), &world),
            Some("127.0.0.1_1".to_string())
        );
    }

    #[test]
    fn test_identity_exhaustion() {
        let mut registry = SessionRegistry::new(2);
        let mut world = test_world();
        world.add_agent("127.0.0.1_1", Position::new(100, 100), Color::new(1, 1, 1));
        world.add_agent("127.0.0.1_2", Position::new(900, 900), Color::new(1, 1, 1));

        assert!(registry.generate_identity(test_addr(), &world).is_none());
        assert!(registry.generate_identity(other_addr(), &world).is_some());

        registry.insert(session("10.1.2.3_1", other_addr()));
        registry.insert(session("10.1.2.3_2", other_addr()));
        assert!(registry.generate_identity(test_addr(), &test_world()).is_none());
    }

    #[test]
    fn test_duplicate_insert_rejected() {
        let mut registry = SessionRegistry::new(3);
        assert!(registry.insert(session("a_1", test_addr())));
        assert!(!registry.insert(session("a_1", other_addr())));
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.get("a_1").map(|s| s.addr), Some(test_addr()));
    }

    #[test]
    fn test_remove_session() {
        let mut registry = SessionRegistry::new(2);
        registry.insert(session("a_1", test_addr()));

        assert!(registry.remove("a_1").is_some());
        assert!(registry.remove("a_1").is_none());
        assert!(!registry.contains("a_1"));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_writers_and_identities() {
        let mut registry = SessionRegistry::new(3);
        registry.insert(session("a_1", test_addr()));
        registry.insert(session("b_1", other_addr()));

        let mut ids: Vec<String> = registry.writers().into_iter().map(|(id, _)| id).collect();
        ids.sort();
        assert_eq!(ids, vec!["a_1".to_string(), "b_1".to_string()]);

        let mut ids = registry.identities();
        ids.sort();
        assert_eq!(ids, vec!["a_1".to_string(), "b_1".to_string()]);
    }

    #[tokio::test]
    async fn test_close_signal_is_kept_until_awaited() {
        let closed = Arc::new(Notify::new());
        let session = Session::new(
            "a_1".to_string(),
            test_addr(),
            session_writer(tokio::io::sink()),
            Arc::clone(&closed),
        );
        session.signal_closed();
        tokio::time::timeout(std::time::Duration::from_secs(1), closed.notified())
            .await
            .unwrap();
    }
}
