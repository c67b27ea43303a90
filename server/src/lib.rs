//! # Arena Server Library
//!
//! This library provides the authoritative server for the multiplayer slither
//! arena. It owns the simulated world, admits players over TCP, applies their
//! steering input and streams world snapshots back to them.
//!
//! ## Core Responsibilities
//!
//! ### Authoritative Simulation
//! The world in [`shared::World`] is only ever advanced here. Clients send a
//! heading and a speed; everything else, from movement to collisions and
//! deaths, is decided by the server tick.
//!
//! ### Session Management
//! Handles the lifecycle of player connections:
//! - Passkey admission, with silent rejection of anything else
//! - Identity assignment per peer address (`"{ip}_{n}"`)
//! - Removal on death, disconnect or failed sends, exactly once
//!
//! ### Snapshot Broadcasting
//! A snapshot of the world is published every few ticks and delivered to
//! every session, optionally trimmed to what each player's camera can see.
//!
//! ## Architecture Design
//!
//! ### Tasks
//! - **Accept loop**: admits connections and spawns one task per player
//! - **Connection tasks**: read input frames and steer the player's agent
//! - **Tick driver**: advances the world at a fixed rate and publishes snapshots
//! - **Broadcaster**: fans snapshots out through a bounded pool of send tasks
//!
//! ### Locking
//! The world and the session registry each sit behind their own async mutex
//! inside [`arena::Arena`]. Code that needs both takes the world first, and
//! no lock is held while writing to a socket except the per-session writer.
//!
//! ## Module Organization
//!
//! - `arena`: shared state, admission and removal
//! - `broadcast`: tick driver and snapshot fan-out
//! - `framing`: reading and writing frames with deadlines
//! - `network`: listener, configuration and per-connection loops
//! - `sessions`: registry of admitted connections
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use server::network::{Server, ServerConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ServerConfig {
//!         bind_addr: "0.0.0.0:12345".to_string(),
//!         passkey: "letmein".to_string(),
//!         ..ServerConfig::default()
//!     };
//!
//!     let server = Server::bind(config).await?;
//!     server.run().await?;
//!     Ok(())
//! }
//! ```

pub mod arena;
pub mod broadcast;
pub mod framing;
pub mod network;
pub mod sessions;
