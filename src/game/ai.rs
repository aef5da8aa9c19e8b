//! Bot steering: wander/attack modes, stall detection and fire timing

use rand::Rng;
use serde::Serialize;

use super::tank::TankLevel;
use super::Direction;

pub const MAX_BOTS_ON_FIELD: usize = 4;
pub const BOT_SPAWN_INTERVAL_MS: f64 = 3000.0;
/// Spawn points cycled in order
pub const BOT_SPAWN_POINTS: [(f64, f64); 3] = [(0.0, 0.0), (96.0, 0.0), (192.0, 0.0)];
/// Where attack-mode bots head
pub const EAGLE_POSITION: (f64, f64) = (96.0, 192.0);

pub const PLAYER_SPEED: f64 = 0.045;
pub const BOT_SPEED: f64 = 0.03;
pub const FAST_BOT_SPEED: f64 = 0.06;

const MOVE_INTERVAL_MS: (u32, u32) = (1000, 3000);
const FIRE_INTERVAL_MS: (u32, u32) = (500, 1500);
const BLOCKED_THRESHOLD_MS: f64 = 500.0;
/// Less travel than this in a tick counts as stalled
const STALL_DISTANCE: f64 = 0.5;
const ATTACK_MODE_CHANCE: f64 = 0.3;
const MODE_FLIP_CHANCE: f64 = 0.1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AiMode {
    Wander,
    Attack,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AiState {
    pub mode: AiMode,
    pub move_timer: f64,
    pub target_direction: Direction,
    pub fire_timer: f64,
    pub blocked_timer: f64,
    pub last_x: f64,
    pub last_y: f64,
}

impl AiState {
    /// Fresh state for a bot spawned at `(x, y)`
    pub fn spawn(rng: &mut impl Rng, x: f64, y: f64) -> Self {
        let mode = if rng.gen::<f64>() < ATTACK_MODE_CHANCE {
            AiMode::Attack
        } else {
            AiMode::Wander
        };

        Self {
            mode,
            move_timer: random_interval(rng, MOVE_INTERVAL_MS),
            target_direction: Direction::Down,
            fire_timer: random_interval(rng, FIRE_INTERVAL_MS),
            blocked_timer: 0.0,
            last_x: x,
            last_y: y,
        }
    }

    /// Update stall detection and the move timer for a bot now at `(x, y)`
    /// facing `current`; returns the direction to drive this tick.
    pub fn steer(&mut self, rng: &mut impl Rng, x: f64, y: f64, current: Direction, delta_ms: f64) -> Direction {
        let moved = (x - self.last_x).abs() + (y - self.last_y).abs();
        if moved < STALL_DISTANCE {
            self.blocked_timer += delta_ms;
        } else {
            self.blocked_timer = 0.0;
        }
        self.last_x = x;
        self.last_y = y;

        if self.blocked_timer >= BLOCKED_THRESHOLD_MS {
            self.blocked_timer = 0.0;
            self.target_direction = random_direction(rng, Some(current));
            self.move_timer = random_interval(rng, MOVE_INTERVAL_MS);
        }

        self.move_timer -= delta_ms;
        if self.move_timer <= 0.0 {
            self.target_direction = match self.mode {
                AiMode::Attack => direction_toward_eagle(x, y),
                AiMode::Wander => random_direction(rng, None),
            };
            self.move_timer = random_interval(rng, MOVE_INTERVAL_MS);
            if rng.gen::<f64>() < MODE_FLIP_CHANCE {
                self.mode = match self.mode {
                    AiMode::Attack => AiMode::Wander,
                    AiMode::Wander => AiMode::Attack,
                };
            }
        }

        self.target_direction
    }

    /// The intended step was blocked: pick anything but `current`
    pub fn on_blocked(&mut self, rng: &mut impl Rng, current: Direction) {
        self.target_direction = random_direction(rng, Some(current));
    }

    /// Count down the fire timer; true once it has run out
    pub fn fire_due(&mut self, delta_ms: f64) -> bool {
        self.fire_timer -= delta_ms;
        self.fire_timer <= 0.0
    }

    pub fn reload(&mut self, rng: &mut impl Rng) {
        self.fire_timer = random_interval(rng, FIRE_INTERVAL_MS);
    }
}

/// Level of the bot spawned while `remaining` bots are left (before decrement)
pub fn level_for_remaining(remaining: u32) -> TankLevel {
    if remaining <= 4 {
        TankLevel::Armor
    } else if remaining % 4 == 0 {
        TankLevel::Fast
    } else if remaining % 5 == 0 {
        TankLevel::Power
    } else {
        TankLevel::Basic
    }
}

pub fn carries_power_up(remaining: u32) -> bool {
    matches!(remaining, 15 | 10 | 5)
}

pub fn hp_for_level(level: TankLevel) -> u32 {
    match level {
        TankLevel::Armor => 4,
        _ => 1,
    }
}

pub fn speed_for_level(level: TankLevel) -> f64 {
    match level {
        TankLevel::Fast => FAST_BOT_SPEED,
        _ => BOT_SPEED,
    }
}

/// Uniform over the four directions, or the other three when `exclude` is set
pub fn random_direction(rng: &mut impl Rng, exclude: Option<Direction>) -> Direction {
    let choices: Vec<Direction> = Direction::ALL
        .into_iter()
        .filter(|d| Some(*d) != exclude)
        .collect();
    choices[rng.gen_range(0..choices.len())]
}

/// Axis with the larger distance to the eagle wins; ties go horizontal
pub fn direction_toward_eagle(x: f64, y: f64) -> Direction {
    let dx = EAGLE_POSITION.0 - x;
    let dy = EAGLE_POSITION.1 - y;

    if dy.abs() > dx.abs() {
        if dy > 0.0 {
            Direction::Down
        } else {
            Direction::Up
        }
    } else if dx > 0.0 {
        Direction::Right
    } else {
        Direction::Left
    }
}

/// Whole milliseconds in `[min, max]`
fn random_interval(rng: &mut impl Rng, (min, max): (u32, u32)) -> f64 {
    f64::from(rng.gen_range(min..=max))
}
