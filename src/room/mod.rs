//! Room, player and session bookkeeping

pub mod manager;

pub use manager::RoomManager;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Transport identity of a socket; replaced when a player reconnects
pub type ConnId = String;

/// Seat a player occupies in a room
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlayerRole {
    Host,
    Guest,
}

impl PlayerRole {
    pub const ALL: [PlayerRole; 2] = [PlayerRole::Host, PlayerRole::Guest];

    pub fn opponent(self) -> Self {
        match self {
            PlayerRole::Host => PlayerRole::Guest,
            PlayerRole::Guest => PlayerRole::Host,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            PlayerRole::Host => "host",
            PlayerRole::Guest => "guest",
        }
    }
}

impl std::fmt::Display for PlayerRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Room lifecycle phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RoomStatus {
    Waiting,
    Playing,
    Finished,
}

/// Transport liveness of a seated player
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    Connected,
    Disconnected,
}

/// A seated player
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Player {
    /// Current socket; swapped by `reconnect`
    pub conn_id: ConnId,
    /// Stable identity for the room's lifetime
    pub session_id: String,
    pub role: PlayerRole,
    pub status: ConnectionStatus,
    pub joined_at: DateTime<Utc>,
}

impl Player {
    fn new(conn_id: &str, session_id: String, role: PlayerRole) -> Self {
        Self {
            conn_id: conn_id.to_string(),
            session_id,
            role,
            status: ConnectionStatus::Connected,
            joined_at: Utc::now(),
        }
    }
}

/// A shareable room with at most one host and one guest
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Room {
    /// Six-digit numeric code
    pub id: String,
    pub status: RoomStatus,
    pub players: BTreeMap<PlayerRole, Player>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
}

impl Room {
    pub fn player(&self, role: PlayerRole) -> Option<&Player> {
        self.players.get(&role)
    }

    pub fn player_count(&self) -> usize {
        self.players.len()
    }

    /// Connection ids of everyone seated, host first
    pub fn conn_ids(&self) -> Vec<ConnId> {
        self.players.values().map(|p| p.conn_id.clone()).collect()
    }
}

/// Where a session (or connection) sits
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Seat {
    pub room_id: String,
    pub role: PlayerRole,
}

/// Result of a successful `create_room`
#[derive(Debug, Clone)]
pub struct CreatedRoom {
    pub room_id: String,
    pub session_id: String,
}

/// Recoverable room lifecycle errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RoomError {
    #[error("room does not exist")]
    RoomNotFound,

    #[error("room is full")]
    RoomFull,

    #[error("invalid session")]
    Unauthorized,
}

impl RoomError {
    /// Wire code sent to clients
    pub fn code(&self) -> &'static str {
        match self {
            RoomError::RoomNotFound => "ROOM_NOT_FOUND",
            RoomError::RoomFull => "ROOM_FULL",
            RoomError::Unauthorized => "UNAUTHORIZED",
        }
    }
}
