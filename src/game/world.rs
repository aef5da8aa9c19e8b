//! Authoritative match state owned by one engine

use serde::Serialize;

use super::map::MapState;
use super::combat::BulletState;
use super::physics::{PhysicsSystem, Rect, SPAWN_TOLERANCE, WALL_TOLERANCE};
use super::tank::TankState;
use crate::room::PlayerRole;

pub const STARTING_LIVES: u32 = 3;
pub const BOTS_PER_MATCH: u32 = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum GameStatus {
    Waiting,
    Playing,
    Finished,
}

/// Per-role lives and the tank currently driven
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerSlot {
    pub lives: u32,
    pub score: u32,
    pub active_tank_id: Option<u32>,
}

impl Default for PlayerSlot {
    fn default() -> Self {
        Self {
            lives: STARTING_LIVES,
            score: 0,
            active_tank_id: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Players {
    pub host: PlayerSlot,
    pub guest: PlayerSlot,
}

impl Players {
    pub fn get(&self, role: PlayerRole) -> &PlayerSlot {
        match role {
            PlayerRole::Host => &self.host,
            PlayerRole::Guest => &self.guest,
        }
    }

    pub fn get_mut(&mut self, role: PlayerRole) -> &mut PlayerSlot {
        match role {
            PlayerRole::Host => &mut self.host,
            PlayerRole::Guest => &mut self.guest,
        }
    }
}

#[derive(Debug, Clone)]
pub struct World {
    pub tanks: Vec<TankState>,
    pub bullets: Vec<BulletState>,
    pub map: MapState,
    pub players: Players,
    pub remaining_bots: u32,
    pub game_status: GameStatus,
}

impl World {
    pub fn new(map: MapState) -> Self {
        Self {
            tanks: Vec::new(),
            bullets: Vec::new(),
            map,
            players: Players::default(),
            remaining_bots: BOTS_PER_MATCH,
            game_status: GameStatus::Waiting,
        }
    }

    pub fn tank(&self, tank_id: u32) -> Option<&TankState> {
        self.tanks.iter().find(|t| t.tank_id == tank_id)
    }

    pub fn tank_index(&self, tank_id: u32) -> Option<usize> {
        self.tanks.iter().position(|t| t.tank_id == tank_id)
    }

    pub fn living_bots(&self) -> usize {
        self.tanks.iter().filter(|t| t.is_bot() && t.alive).count()
    }

    /// A living tank sits (noticeably) on the spawn square at `(x, y)`
    pub fn spawn_occupied(&self, x: f64, y: f64) -> bool {
        let spot = Rect::tank(x, y);
        self.tanks
            .iter()
            .any(|t| t.alive && PhysicsSystem::test_collision(&spot, &t.rect(), SPAWN_TOLERANCE))
    }

    /// A tank at `(x, y)` would overlap a living tank other than `tank_id`
    pub fn blocked_by_tank(&self, tank_id: u32, x: f64, y: f64) -> bool {
        let moved = Rect::tank(x, y);
        self.tanks.iter().any(|t| {
            t.tank_id != tank_id && t.alive && PhysicsSystem::test_collision(&moved, &t.rect(), WALL_TOLERANCE)
        })
    }
}

impl Default for World {
    fn default() -> Self {
        Self::new(MapState::stage_one())
    }
}
