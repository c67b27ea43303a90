//! Simulation core shared by the arena server and any client.
//!
//! Holds the game constants, the agent and world model, the snapshot types
//! streamed to clients, the message codec and the viewer helpers a renderer
//! uses to place map coordinates on screen. Nothing here performs I/O.

pub mod agent;
pub mod protocol;
pub mod snapshot;
pub mod view;
pub mod world;

pub use agent::{radius_for_length, Agent, BoundingBox, Color, Position, Speed};
pub use protocol::{FrameHeader, Message, ProtocolError};
pub use snapshot::{AgentView, ResourceView, WorldSnapshot};
pub use world::{Resource, ResourceOrigin, World, WorldConfig};

pub const FPS: u32 = 60;

pub const MAP_WIDTH: i32 = 3000;
pub const MAP_HEIGHT: i32 = 3000;

pub const SCREEN_WIDTH: f64 = 1200.0;
pub const SCREEN_HEIGHT: f64 = 800.0;
/// Divisor applied to the zoom factor so a fresh agent sees slightly more than one screen.
pub const ZOOM_DIVISOR: f64 = 1.3;

/// Initial heading and facing of a new agent, in degrees.
pub const DIRECTION_INIT: f64 = 0.0;
pub const LENGTH_MIN: f64 = 28.0;
pub const RADIUS_MIN: f64 = 9.0;
/// Maximum change of facing per tick, in degrees.
pub const ANGLE_MAX: f64 = 6.0;
pub const SPEED_NORMAL: f64 = 2.4;
pub const SPEED_BOOST: f64 = 5.6;
/// Length lost per tick while boosting.
pub const BOOST_COST: f64 = 0.16;

pub const RESOURCE_FLOOR: usize = 4000;
pub const RESOURCE_RADIUS_AVG: f64 = 5.5;
pub const RESOURCE_VALUE_AVG: f64 = 1.75;
pub const REMAINS_RADIUS_AVG: f64 = RADIUS_MIN + 2.0;
pub const REMAINS_VALUE_AVG: f64 = RESOURCE_VALUE_AVG * 3.0;

pub const MAX_PLAYERS: usize = 200;

pub fn map_center() -> Position {
    Position::new(MAP_WIDTH / 2, MAP_HEIGHT / 2)
}
