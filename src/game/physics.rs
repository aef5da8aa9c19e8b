//! Field geometry, rectangle collision and grid-aligned movement

use super::Direction;

/// Side length of one map block
pub const BLOCK_SIZE: f64 = 16.0;
/// The square battlefield (13 blocks)
pub const FIELD_SIZE: f64 = BLOCK_SIZE * 13.0;
pub const TANK_SIZE: f64 = 16.0;
pub const BULLET_SIZE: f64 = 3.0;

/// Tolerance for tank-vs-wall and bot-vs-tank blocking
pub const WALL_TOLERANCE: f64 = -0.01;
/// Tolerance for spawn-point occupancy
pub const SPAWN_TOLERANCE: f64 = -2.0;

/// Grid that tanks snap to when turning
const TURN_GRID: f64 = 8.0;

/// Axis-aligned rectangle anchored at its top-left corner
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl Rect {
    pub fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn tank(x: f64, y: f64) -> Self {
        Self::new(x, y, TANK_SIZE, TANK_SIZE)
    }
}

/// Stateless movement and collision helpers
pub struct PhysicsSystem;

impl PhysicsSystem {
    /// Rectangle overlap with tolerance `t`.
    ///
    /// `a` collides with `b` when `b.x - a.w - t <= a.x <= b.x + b.w + t`
    /// and likewise on y. Negative `t` lets boxes overlap slightly before
    /// counting as a hit.
    pub fn test_collision(a: &Rect, b: &Rect, tolerance: f64) -> bool {
        let between = |min: f64, value: f64, max: f64| min - tolerance <= value && value <= max + tolerance;

        between(b.x - a.width, a.x, b.x + b.width) && between(b.y - a.height, a.y, b.y + b.height)
    }

    /// Move `distance` units along `direction`
    pub fn advance(x: f64, y: f64, direction: Direction, distance: f64) -> (f64, f64) {
        match direction {
            Direction::Up => (x, y - distance),
            Direction::Down => (x, y + distance),
            Direction::Left => (x - distance, y),
            Direction::Right => (x + distance, y),
        }
    }

    /// Keep an object of `size` inside the field
    pub fn clamp_to_field(x: f64, y: f64, size: f64) -> (f64, f64) {
        (
            x.clamp(0.0, FIELD_SIZE - size),
            y.clamp(0.0, FIELD_SIZE - size),
        )
    }

    /// Snap a coordinate to the 8-unit turning grid.
    ///
    /// Floor and ceil candidates are tried against `fits`; if exactly one
    /// fits it wins, otherwise the nearest grid line is used.
    pub fn grid_align(coord: f64, fits: impl Fn(f64) -> bool) -> f64 {
        let floor = (coord / TURN_GRID).floor() * TURN_GRID;
        let ceil = (coord / TURN_GRID).ceil() * TURN_GRID;
        // half-up rounding, not half-away-from-zero
        let round = (coord / TURN_GRID + 0.5).floor() * TURN_GRID;

        match (fits(floor), fits(ceil)) {
            (false, true) => ceil,
            (true, false) => floor,
            _ => round,
        }
    }
}
