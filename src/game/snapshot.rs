//! Snapshot building for state sync

use serde::Serialize;

use super::combat::BulletState;
use super::map::MapState;
use super::tank::TankState;
use super::world::{GameStatus, Players, World};
use crate::util::time::unix_millis;

/// Full authoritative state as broadcast to both clients
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StateSnapshot {
    pub tanks: Vec<TankState>,
    pub bullets: Vec<BulletState>,
    pub map: MapState,
    pub players: Players,
    pub remaining_bots: u32,
    pub game_status: GameStatus,
    /// Server clock, unix ms
    pub timestamp: u64,
}

impl StateSnapshot {
    pub fn capture(world: &World) -> Self {
        Self {
            tanks: world.tanks.clone(),
            bullets: world.bullets.clone(),
            map: world.map.clone(),
            players: world.players.clone(),
            remaining_bots: world.remaining_bots,
            game_status: world.game_status,
            timestamp: unix_millis(),
        }
    }
}

/// Snapshot size stats for debugging
#[derive(Debug, Default)]
pub struct SnapshotStats {
    pub total_snapshots: u64,
    pub total_bytes: u64,
    pub avg_tanks_per_snapshot: f32,
}

impl SnapshotStats {
    pub fn record(&mut self, tank_count: usize, bytes: usize) {
        self.total_snapshots += 1;
        self.total_bytes += bytes as u64;

        // Running average
        let n = self.total_snapshots as f32;
        self.avg_tanks_per_snapshot =
            self.avg_tanks_per_snapshot * ((n - 1.0) / n) + (tank_count as f32 / n);
    }

    pub fn avg_bytes(&self) -> u64 {
        if self.total_snapshots == 0 {
            0
        } else {
            self.total_bytes / self.total_snapshots
        }
    }
}
