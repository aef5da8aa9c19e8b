//! Tank records shared by the engine and the snapshot

use serde::{Deserialize, Serialize};

use super::ai::AiState;
use super::physics::Rect;
use super::Direction;
use crate::room::PlayerRole;

/// Invulnerability granted to a freshly spawned human tank (ms)
pub const SPAWN_HELMET_MS: f64 = 2000.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TankSide {
    Player,
    Bot,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TankLevel {
    Basic,
    Fast,
    Power,
    Armor,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TankColor {
    Yellow,
    Green,
    Silver,
}

impl TankColor {
    pub fn for_role(role: PlayerRole) -> Self {
        match role {
            PlayerRole::Host => TankColor::Yellow,
            PlayerRole::Guest => TankColor::Green,
        }
    }
}

/// One tank on the field.
///
/// Destroyed tanks keep their record with `alive == false`; nothing is
/// removed from the world's tank list during a match.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TankState {
    pub tank_id: u32,
    pub x: f64,
    pub y: f64,
    pub direction: Direction,
    pub moving: bool,
    pub alive: bool,
    pub side: TankSide,
    pub level: TankLevel,
    pub color: TankColor,
    pub hp: u32,
    pub helmet_duration: f64,
    pub frozen_timeout: f64,
    pub cooldown: f64,
    pub with_power_up: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ai_state: Option<AiState>,
}

impl TankState {
    /// Human tank facing up with a spawn helmet
    pub fn player(tank_id: u32, role: PlayerRole, x: f64, y: f64) -> Self {
        Self {
            tank_id,
            x,
            y,
            direction: Direction::Up,
            moving: false,
            alive: true,
            side: TankSide::Player,
            level: TankLevel::Basic,
            color: TankColor::for_role(role),
            hp: 1,
            helmet_duration: SPAWN_HELMET_MS,
            frozen_timeout: 0.0,
            cooldown: 0.0,
            with_power_up: false,
            ai_state: None,
        }
    }

    /// Bot tank facing down
    pub fn bot(tank_id: u32, level: TankLevel, x: f64, y: f64, with_power_up: bool, ai: AiState) -> Self {
        Self {
            tank_id,
            x,
            y,
            direction: Direction::Down,
            moving: true,
            alive: true,
            side: TankSide::Bot,
            level,
            color: TankColor::Silver,
            hp: super::ai::hp_for_level(level),
            helmet_duration: 0.0,
            frozen_timeout: 0.0,
            cooldown: 0.0,
            with_power_up,
            ai_state: Some(ai),
        }
    }

    pub fn is_bot(&self) -> bool {
        self.side == TankSide::Bot
    }

    pub fn rect(&self) -> Rect {
        Rect::tank(self.x, self.y)
    }
}
