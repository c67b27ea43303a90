//! The authoritative world: every agent, every resource, and the tick that advances them.

use crate::agent::{Agent, Color, Position, Speed};
use crate::snapshot::{AgentView, ResourceView, WorldSnapshot};
use crate::{
    MAP_HEIGHT, MAP_WIDTH, REMAINS_RADIUS_AVG, REMAINS_VALUE_AVG, RESOURCE_FLOOR,
    RESOURCE_RADIUS_AVG, RESOURCE_VALUE_AVG,
};
use log::{debug, info};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResourceOrigin {
    /// Spawned to keep the map populated.
    Ambient,
    /// Left behind by a dead agent.
    Remains,
}

/// A consumable item. Its position is the key it is stored under.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Resource {
    pub color: Color,
    pub radius: f64,
    /// Length added to the agent that consumes it.
    pub value: f64,
    pub origin: ResourceOrigin,
}

/// Tunable parameters of a world.
#[derive(Debug, Clone, PartialEq)]
pub struct WorldConfig {
    pub map_width: i32,
    pub map_height: i32,
    /// Minimum number of ambient resources kept on the map.
    pub resource_floor: usize,
    pub resource_radius_avg: f64,
    pub resource_value_avg: f64,
    pub remains_radius_avg: f64,
    pub remains_value_avg: f64,
    /// Seed for resource placement and jitter; `None` seeds from entropy.
    pub rng_seed: Option<u64>,
}

impl Default for WorldConfig {
    fn default() -> Self {
        Self {
            map_width: MAP_WIDTH,
            map_height: MAP_HEIGHT,
            resource_floor: RESOURCE_FLOOR,
            resource_radius_avg: RESOURCE_RADIUS_AVG,
            resource_value_avg: RESOURCE_VALUE_AVG,
            remains_radius_avg: REMAINS_RADIUS_AVG,
            remains_value_avg: REMAINS_VALUE_AVG,
            rng_seed: None,
        }
    }
}

impl WorldConfig {
    pub fn center(&self) -> Position {
        Position::new(self.map_width / 2, self.map_height / 2)
    }
}

/// Uniform sample from `avg * (1 - spread) ..= avg * (1 + spread)`, never negative.
fn around<R: Rng + ?Sized>(rng: &mut R, avg: f64, spread: f64) -> f64 {
    let low = (avg * (1.0 - spread)).max(0.0);
    let high = (avg * (1.0 + spread)).max(low);
    rng.gen_range(low..=high)
}

#[derive(Debug)]
pub struct World {
    pub tick: u32,
    config: WorldConfig,
    /// Ordered by identity so each tick processes agents in a stable order.
    agents: BTreeMap<String, Agent>,
    resources: HashMap<Position, Resource>,
    ambient_count: usize,
    rng: StdRng,
}

impl World {
    pub fn new(config: WorldConfig) -> Self {
        let rng = match config.rng_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            tick: 0,
            config,
            agents: BTreeMap::new(),
            resources: HashMap::new(),
            ambient_count: 0,
            rng,
        }
    }

    pub fn config(&self) -> &WorldConfig {
        &self.config
    }

    /// Adds an agent at `position`. Returns false if the identity is already taken.
    pub fn add_agent(&mut self, id: impl Into<String>, position: Position, color: Color) -> bool {
        let id = id.into();
        if self.agents.contains_key(&id) {
            return false;
        }
        info!("Added agent {} at ({}, {})", id, position.x, position.y);
        self.agents.insert(id, Agent::new(position, color));
        true
    }

    /// Adds an agent at the map centre with a random bright color.
    pub fn spawn_agent(&mut self, id: impl Into<String>) -> bool {
        let color = Color::random_bright(&mut self.rng);
        let center = self.config.center();
        self.add_agent(id, center, color)
    }

    pub fn contains_agent(&self, id: &str) -> bool {
        self.agents.contains_key(id)
    }

    pub fn agent(&self, id: &str) -> Option<&Agent> {
        self.agents.get(id)
    }

    pub fn agent_mut(&mut self, id: &str) -> Option<&mut Agent> {
        self.agents.get_mut(id)
    }

    pub fn agents(&self) -> impl Iterator<Item = (&String, &Agent)> {
        self.agents.iter()
    }

    pub fn agent_count(&self) -> usize {
        self.agents.len()
    }

    /// Removes an agent without leaving remains.
    pub fn remove_agent(&mut self, id: &str) -> Option<Agent> {
        let removed = self.agents.remove(id);
        if removed.is_some() {
            info!("Removed agent {}", id);
        }
        removed
    }

    /// Updates an agent's target heading and speed. Returns false if it no longer exists.
    pub fn steer_agent(&mut self, id: &str, heading: f64, speed: Speed) -> bool {
        match self.agents.get_mut(id) {
            Some(agent) => {
                agent.steer(heading, speed);
                true
            }
            None => false,
        }
    }

    pub fn resources(&self) -> &HashMap<Position, Resource> {
        &self.resources
    }

    pub fn resource_count(&self) -> usize {
        self.resources.len()
    }

    pub fn ambient_resource_count(&self) -> usize {
        self.ambient_count
    }

    /// Places a resource unless the position is occupied.
    pub fn place_resource(&mut self, position: Position, resource: Resource) -> bool {
        if self.resources.contains_key(&position) {
            return false;
        }
        if resource.origin == ResourceOrigin::Ambient {
            self.ambient_count += 1;
        }
        self.resources.insert(position, resource);
        true
    }

    fn take_resource(&mut self, position: &Position) -> Option<Resource> {
        let taken = self.resources.remove(position)?;
        if taken.origin == ResourceOrigin::Ambient {
            self.ambient_count -= 1;
        }
        Some(taken)
    }

    /// Tops ambient resources back up to the configured floor.
    pub fn replenish_resources(&mut self) {
        let floor = self.config.resource_floor;
        let max_attempts = floor.saturating_mul(4).saturating_add(1024);
        let mut attempts = 0;

        while self.ambient_count < floor && attempts < max_attempts {
            attempts += 1;
            let position = Position::new(
                self.rng.gen_range(0..=self.config.map_width),
                self.rng.gen_range(0..=self.config.map_height),
            );
            if self.resources.contains_key(&position) {
                continue;
            }
            let resource = Resource {
                color: Color::random(&mut self.rng, 0, 255),
                radius: around(&mut self.rng, self.config.resource_radius_avg, 0.25),
                value: around(&mut self.rng, self.config.resource_value_avg, 0.25),
                origin: ResourceOrigin::Ambient,
            };
            self.place_resource(position, resource);
        }

        if self.ambient_count < floor {
            debug!(
                "Resource floor not reached: {} of {} after {} attempts",
                self.ambient_count, floor, attempts
            );
        }
    }

    /// Kills an agent and scatters its body as resources.
    ///
    /// The total value scattered equals the number of body positions. Returns
    /// false if the agent does not exist.
    pub fn kill_agent(&mut self, id: &str) -> bool {
        let Some(agent) = self.agents.remove(id) else {
            return false;
        };

        let body: Vec<Position> = agent.positions().iter().copied().collect();
        let mut remaining = body.len() as f64;
        let max_attempts = body.len() * 16 + 64;
        let mut attempts = 0;

        while remaining > 0.0 {
            if attempts >= max_attempts {
                debug!(
                    "Gave up scattering {:.2} of agent {}'s remains, area too crowded",
                    remaining, id
                );
                break;
            }
            attempts += 1;

            let origin = body[self.rng.gen_range(0..body.len())];
            let position = origin.jittered(&mut self.rng, 1.0);
            if self.resources.contains_key(&position) {
                continue;
            }
            let value = around(&mut self.rng, self.config.remains_value_avg, 0.5).min(remaining);
            let resource = Resource {
                color: agent.color.jittered(&mut self.rng, -10, 40),
                radius: around(&mut self.rng, self.config.remains_radius_avg, 0.25),
                value,
                origin: ResourceOrigin::Remains,
            };
            self.place_resource(position, resource);
            remaining -= value;
        }

        info!("Agent {} died with {} body positions", id, body.len());
        true
    }

    fn touches_boundary(&self, head: Position, radius: f64) -> bool {
        let (x, y) = (head.x as f64, head.y as f64);
        x <= radius
            || y <= radius
            || x >= self.config.map_width as f64 - radius
            || y >= self.config.map_height as f64 - radius
    }

    fn hits_other_agent(&self, id: &str, head: Position, radius: f64) -> bool {
        self.agents
            .iter()
            .filter(|(other_id, _)| other_id.as_str() != id)
            .any(|(_, other)| {
                let reach = radius + other.radius;
                other.bounding_box().expanded(reach).contains(head)
                    && other.positions().iter().any(|p| head.distance_to(p) <= reach)
            })
    }

    /// Removes every resource in the square around `head` and returns their summed value.
    ///
    /// The square spans `[head - half, head + half)` on each axis, `half` being
    /// `radius + resource_radius_avg` truncated, so its side is `2 * half`.
    fn consume_resources_near(&mut self, head: Position, radius: f64) -> f64 {
        let half = (radius + self.config.resource_radius_avg) as i32;
        let side = (2 * half) as usize;
        let within = |d: i32| (-half..half).contains(&d);

        // scan whichever is smaller: the cells of the square or the resource map
        let hits: Vec<Position> = if self.resources.len() < side * side {
            self.resources
                .keys()
                .filter(|p| within(p.x - head.x) && within(p.y - head.y))
                .copied()
                .collect()
        } else {
            (head.x - half..head.x + half)
                .flat_map(|x| (head.y - half..head.y + half).map(move |y| Position::new(x, y)))
                .filter(|p| self.resources.contains_key(p))
                .collect()
        };

        hits.iter()
            .filter_map(|p| self.take_resource(p))
            .map(|resource| resource.value)
            .sum()
    }

    /// Runs collision checks for one agent. Returns true if it was killed.
    fn resolve_collisions(&mut self, id: &str) -> bool {
        let (head, radius) = match self.agents.get(id) {
            Some(agent) => (agent.head(), agent.radius),
            None => return false,
        };

        if self.touches_boundary(head, radius) || self.hits_other_agent(id, head, radius) {
            self.kill_agent(id);
            return true;
        }

        let gained = self.consume_resources_near(head, radius);
        if gained > 0.0 {
            if let Some(agent) = self.agents.get_mut(id) {
                agent.length += gained;
            }
        }
        false
    }

    /// Advances the world by one tick and returns the identities killed during it.
    pub fn advance(&mut self) -> Vec<String> {
        self.replenish_resources();

        let ids: Vec<String> = self.agents.keys().cloned().collect();
        let mut killed = Vec::new();

        for id in ids {
            if self.resolve_collisions(&id) {
                killed.push(id);
                continue;
            }
            if let Some(agent) = self.agents.get_mut(&id) {
                agent.advance();
            }
        }

        self.tick = self.tick.wrapping_add(1);
        killed
    }

    /// Copies the current state into a form that can be sent to clients.
    pub fn snapshot(&self) -> WorldSnapshot {
        WorldSnapshot {
            tick: self.tick,
            map_width: self.config.map_width,
            map_height: self.config.map_height,
            agents: self
                .agents
                .iter()
                .map(|(id, agent)| AgentView::from_agent(id, agent))
                .collect(),
            resources: self
                .resources
                .iter()
                .map(|(position, resource)| ResourceView::from_resource(*position, resource))
                .collect(),
        }
    }
}

impl Default for World {
    fn default() -> Self {
        World::new(WorldConfig::default())
    }
}
