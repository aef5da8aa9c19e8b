//! Game simulation modules

pub mod ai;
pub mod combat;
pub mod engine;
pub mod map;
pub mod physics;
pub mod snapshot;
pub mod tank;
pub mod world;

pub use engine::{EngineCore, EngineRegistry, GameEngine};
pub use snapshot::StateSnapshot;
pub use tank::{TankColor, TankLevel, TankSide, TankState};
pub use world::{GameStatus, PlayerSlot, Players, World};

use serde::{Deserialize, Serialize};

/// Facing / travel direction of tanks and bullets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Up,
    Down,
    Left,
    Right,
}

impl Direction {
    pub const ALL: [Direction; 4] = [
        Direction::Up,
        Direction::Down,
        Direction::Left,
        Direction::Right,
    ];

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "up" => Some(Direction::Up),
            "down" => Some(Direction::Down),
            "left" => Some(Direction::Left),
            "right" => Some(Direction::Right),
            _ => None,
        }
    }

    pub fn is_horizontal(self) -> bool {
        matches!(self, Direction::Left | Direction::Right)
    }
}
