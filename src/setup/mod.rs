//! Deterministic initial scenario handed to both clients at match start

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::info;

use crate::game::TankColor;
use crate::util::time::unix_millis;

/// Stage every match currently uses
pub const DEFAULT_MAP_ID: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

/// Seed, stage and per-role cosmetics for one match.
///
/// Informational only: clients use it to line up their local assets, the
/// engine always loads stage 1 itself.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitialState {
    pub seed: u32,
    pub map_id: u32,
    pub host_position: Position,
    pub guest_position: Position,
    pub host_tank_color: TankColor,
    pub guest_tank_color: TankColor,
    pub timestamp: u64,
}

/// Builds and checks [`InitialState`] payloads
#[derive(Debug, Clone, Copy, Default)]
pub struct GameStateManager;

impl GameStateManager {
    pub fn new() -> Self {
        Self
    }

    pub fn generate_initial_state(&self, room_id: &str) -> InitialState {
        let state = InitialState {
            seed: room_seed(room_id),
            map_id: DEFAULT_MAP_ID,
            host_position: Position { x: 128.0, y: 384.0 },
            guest_position: Position { x: 256.0, y: 384.0 },
            host_tank_color: TankColor::Yellow,
            guest_tank_color: TankColor::Green,
            timestamp: unix_millis(),
        };

        info!(room_id = %room_id, seed = state.seed, map_id = state.map_id, "Generated initial state");
        state
    }

    /// Shape check for an externally supplied initial state
    pub fn validate_state(&self, state: &Value) -> bool {
        let Some(obj) = state.as_object() else {
            return false;
        };

        let numeric = |key: &str| obj.get(key).map(Value::is_number).unwrap_or(false);
        if !numeric("seed") || !numeric("mapId") || !numeric("timestamp") {
            return false;
        }

        ["hostPosition", "guestPosition"].iter().all(|key| {
            obj.get(*key)
                .and_then(Value::as_object)
                .map(|pos| {
                    pos.get("x").map(Value::is_number).unwrap_or(false)
                        && pos.get("y").map(Value::is_number).unwrap_or(false)
                })
                .unwrap_or(false)
        })
    }
}

/// Rolling `hash * 31 + code_unit` over UTF-16 code units, wrapped to i32, absolute value.
///
/// Clients run the same hash, so both peers derive the seed from the room id alone.
pub fn room_seed(room_id: &str) -> u32 {
    let hash = room_id.encode_utf16().fold(0i32, |hash, unit| {
        hash.wrapping_shl(5)
            .wrapping_sub(hash)
            .wrapping_add(i32::from(unit))
    });
    hash.unsigned_abs()
}
