//! A single serpentine agent: its body, steering and growth rules.

use crate::{ANGLE_MAX, BOOST_COST, DIRECTION_INIT, LENGTH_MIN, RADIUS_MIN, SPEED_BOOST, SPEED_NORMAL};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;

/// Integer map coordinate. `y` grows downwards, matching screen space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Position {
    pub x: i32,
    pub y: i32,
}

impl Position {
    pub fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }

    pub fn distance_to(&self, other: &Position) -> f64 {
        let dx = (other.x - self.x) as f64;
        let dy = (other.y - self.y) as f64;
        (dx * dx + dy * dy).sqrt()
    }

    /// Returns a position shifted by up to `factor / 2` on each axis.
    pub fn jittered<R: Rng + ?Sized>(&self, rng: &mut R, factor: f64) -> Position {
        let dx = (rng.gen::<f64>() - 0.5) * factor;
        let dy = (rng.gen::<f64>() - 0.5) * factor;
        Position::new(
            (self.x as f64 + dx).round() as i32,
            (self.y as f64 + dy).round() as i32,
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Color {
    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    /// Random color with every channel drawn from `low..=high`.
    pub fn random<R: Rng + ?Sized>(rng: &mut R, low: u8, high: u8) -> Color {
        let (low, high) = (low.min(high), high.max(low));
        Color::new(
            rng.gen_range(low..=high),
            rng.gen_range(low..=high),
            rng.gen_range(low..=high),
        )
    }

    /// Random color bright enough to stand out against a dark background.
    pub fn random_bright<R: Rng + ?Sized>(rng: &mut R) -> Color {
        Color::random(rng, 100, 255)
    }

    /// Shifts every channel by a random amount in `negative..=positive`, saturating.
    pub fn jittered<R: Rng + ?Sized>(&self, rng: &mut R, negative: i16, positive: i16) -> Color {
        let mut shift = |c: u8| (c as i16 + rng.gen_range(negative..=positive)).clamp(0, 255) as u8;
        Color::new(shift(self.r), shift(self.g), shift(self.b))
    }
}

/// Axis-aligned bounds over a set of map positions.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub min_x: f64,
    pub min_y: f64,
    pub max_x: f64,
    pub max_y: f64,
}

impl BoundingBox {
    pub fn around(p: Position) -> Self {
        Self {
            min_x: p.x as f64,
            min_y: p.y as f64,
            max_x: p.x as f64,
            max_y: p.y as f64,
        }
    }

    /// Bounds of every position yielded, or `None` for an empty iterator.
    pub fn from_positions<'a, I>(positions: I) -> Option<Self>
    where
        I: IntoIterator<Item = &'a Position>,
    {
        let mut iter = positions.into_iter();
        let mut bounds = BoundingBox::around(*iter.next()?);
        for p in iter {
            bounds.min_x = bounds.min_x.min(p.x as f64);
            bounds.min_y = bounds.min_y.min(p.y as f64);
            bounds.max_x = bounds.max_x.max(p.x as f64);
            bounds.max_y = bounds.max_y.max(p.y as f64);
        }
        Some(bounds)
    }

    pub fn expanded(&self, margin: f64) -> Self {
        Self {
            min_x: self.min_x - margin,
            min_y: self.min_y - margin,
            max_x: self.max_x + margin,
            max_y: self.max_y + margin,
        }
    }

    pub fn contains(&self, p: Position) -> bool {
        let (x, y) = (p.x as f64, p.y as f64);
        x >= self.min_x && x <= self.max_x && y >= self.min_y && y <= self.max_y
    }

    pub fn intersects(&self, other: &BoundingBox) -> bool {
        !(self.max_x < other.min_x
            || other.max_x < self.min_x
            || self.max_y < other.min_y
            || other.max_y < self.min_y)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Speed {
    Normal,
    Boosted,
}

impl Speed {
    /// Interprets the raw speed a client sends: anything above normal asks for a boost.
    pub fn from_input(raw: f32) -> Speed {
        if raw > SPEED_NORMAL as f32 {
            Speed::Boosted
        } else {
            Speed::Normal
        }
    }

    /// Map units travelled per tick.
    pub fn value(&self) -> f64 {
        match self {
            Speed::Normal => SPEED_NORMAL,
            Speed::Boosted => SPEED_BOOST,
        }
    }
}

/// Radius of an agent of the given length.
///
/// `RADIUS_MIN * (length / LENGTH_MIN)^0.125 * log_LENGTH_MIN(length)`. Clients
/// evaluate the same expression, so it must not be approximated.
pub fn radius_for_length(length: f64) -> f64 {
    RADIUS_MIN * (length / LENGTH_MIN).powf(0.125) * (length.ln() / LENGTH_MIN.ln())
}

/// Maps any angle in degrees into `[0, 360)`.
pub fn normalize_angle(degrees: f64) -> f64 {
    let a = degrees.rem_euclid(360.0);
    // rem_euclid can round up to exactly 360 for tiny negative inputs
    if a >= 360.0 {
        0.0
    } else {
        a
    }
}

/// Smallest circular distance between two angles, in degrees.
pub fn angle_between(a: f64, b: f64) -> f64 {
    let d = (normalize_angle(a) - normalize_angle(b)).abs();
    d.min(360.0 - d)
}

/// Rotates `facing` toward `heading` by at most `ANGLE_MAX`.
///
/// When both rotation directions leave the same remaining difference the
/// clockwise (decreasing) rotation wins.
pub fn turn_toward(facing: f64, heading: f64) -> f64 {
    if angle_between(facing, heading) <= ANGLE_MAX {
        return normalize_angle(heading);
    }
    let counter_clockwise = normalize_angle(facing + ANGLE_MAX);
    let clockwise = normalize_angle(facing - ANGLE_MAX);
    if angle_between(counter_clockwise, heading) < angle_between(clockwise, heading) {
        counter_clockwise
    } else {
        clockwise
    }
}

#[derive(Debug, Clone)]
pub struct Agent {
    /// Oldest position at the front, head at the back.
    positions: VecDeque<Position>,
    /// Direction requested by input, degrees.
    pub heading: f64,
    /// Direction actually travelled, degrees.
    pub facing: f64,
    pub speed: Speed,
    pub length: f64,
    pub radius: f64,
    pub color: Color,
    bounding_box: BoundingBox,
}

impl Agent {
    pub fn new(position: Position, color: Color) -> Self {
        let mut positions = VecDeque::new();
        positions.push_back(position);
        Self {
            positions,
            heading: DIRECTION_INIT,
            facing: DIRECTION_INIT,
            speed: Speed::Normal,
            length: LENGTH_MIN,
            radius: RADIUS_MIN,
            color,
            bounding_box: BoundingBox::around(position),
        }
    }

    pub fn head(&self) -> Position {
        // positions is never empty: it starts with the spawn point and only
        // the tail beyond round(length) >= 1 is ever dropped
        self.positions.back().copied().unwrap_or(Position::new(0, 0))
    }

    pub fn positions(&self) -> &VecDeque<Position> {
        &self.positions
    }

    pub fn bounding_box(&self) -> &BoundingBox {
        &self.bounding_box
    }

    /// Applies client input. Only targets change; movement happens in `advance`.
    pub fn steer(&mut self, heading: f64, speed: Speed) {
        self.heading = heading;
        self.speed = speed;
    }

    /// Number of body positions kept after a tick.
    fn body_len_target(&self) -> usize {
        (self.length.round() as usize).max(1)
    }

    /// Advances the agent by one tick.
    pub fn advance(&mut self) {
        self.heading = normalize_angle(self.heading);
        self.facing = normalize_angle(self.facing);
        self.facing = turn_toward(self.facing, self.heading);

        if self.speed == Speed::Boosted && self.length - BOOST_COST >= LENGTH_MIN {
            self.length -= BOOST_COST;
        } else {
            self.speed = Speed::Normal;
        }

        let head = self.head();
        let (sin, cos) = self.facing.to_radians().sin_cos();
        let step = self.speed.value();
        // screen space: up is negative y
        let next = Position::new(
            head.x + (cos * step).round() as i32,
            head.y - (sin * step).round() as i32,
        );
        self.positions.push_back(next);

        let target = self.body_len_target();
        while self.positions.len() > target {
            self.positions.pop_front();
        }

        self.radius = radius_for_length(self.length);
        if let Some(bounds) = BoundingBox::from_positions(self.positions.iter()) {
            self.bounding_box = bounds;
        }
    }
}

impl fmt::Display for Agent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let head = self.head();
        write!(
            f,
            "<Head=({}, {}), L={:.0}, Direction={:.1}, R={:.2}>",
            head.x, head.y, self.length, self.facing, self.radius
        )
    }
}
