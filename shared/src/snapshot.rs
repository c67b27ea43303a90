//! Read-only copies of world state, as streamed to clients each broadcast.

use crate::agent::{Agent, BoundingBox, Color, Position, Speed};
use crate::world::Resource;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentView {
    pub id: String,
    /// Tail first, head last.
    pub positions: Vec<Position>,
    pub radius: f64,
    pub length: f64,
    pub facing: f64,
    pub speed: Speed,
    pub color: Color,
    pub bounding_box: BoundingBox,
}

impl AgentView {
    pub fn from_agent(id: &str, agent: &Agent) -> Self {
        Self {
            id: id.to_string(),
            positions: agent.positions().iter().copied().collect(),
            radius: agent.radius,
            length: agent.length,
            facing: agent.facing,
            speed: agent.speed,
            color: agent.color,
            bounding_box: *agent.bounding_box(),
        }
    }

    pub fn head(&self) -> Option<Position> {
        self.positions.last().copied()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ResourceView {
    pub position: Position,
    pub color: Color,
    pub radius: f64,
    pub value: f64,
}

impl ResourceView {
    pub fn from_resource(position: Position, resource: &Resource) -> Self {
        Self {
            position,
            color: resource.color,
            radius: resource.radius,
            value: resource.value,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorldSnapshot {
    pub tick: u32,
    pub map_width: i32,
    pub map_height: i32,
    /// Sorted by identity.
    pub agents: Vec<AgentView>,
    pub resources: Vec<ResourceView>,
}

impl WorldSnapshot {
    pub fn agent(&self, id: &str) -> Option<&AgentView> {
        self.agents
            .binary_search_by(|a| a.id.as_str().cmp(id))
            .ok()
            .map(|i| &self.agents[i])
    }
}
