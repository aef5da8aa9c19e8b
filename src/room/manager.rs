//! Room lifecycle: creation, join, leave, reconnect and waiting-room expiry

use chrono::Utc;
use parking_lot::Mutex;
use rand::Rng;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use crate::config::RoomConfig;

use super::{
    ConnId, ConnectionStatus, CreatedRoom, Player, PlayerRole, Room, RoomError, RoomStatus, Seat,
};

struct RoomEntry {
    room: Room,
    /// Distinguishes a recycled room id from the room an expiry timer was armed for
    generation: u64,
}

/// The three maps that must change together
#[derive(Default)]
struct RoomTable {
    rooms: HashMap<String, RoomEntry>,
    conn_to_room: HashMap<ConnId, String>,
    session_to_seat: HashMap<String, Seat>,
    next_generation: u64,
}

impl RoomTable {
    fn generate_room_id(&self) -> String {
        let mut rng = rand::thread_rng();
        loop {
            let id = rng.gen_range(100_000..=999_999u32).to_string();
            if !self.rooms.contains_key(&id) {
                return id;
            }
        }
    }

    fn close(&mut self, room_id: &str) -> Option<Room> {
        let entry = self.rooms.remove(room_id)?;
        for player in entry.room.players.values() {
            self.conn_to_room.remove(&player.conn_id);
            self.session_to_seat.remove(&player.session_id);
        }
        Some(entry.room)
    }

    fn seat_of_conn(&self, conn_id: &str) -> Option<Seat> {
        let room_id = self.conn_to_room.get(conn_id)?;
        let entry = self.rooms.get(room_id)?;
        entry
            .room
            .players
            .values()
            .find(|p| p.conn_id == conn_id)
            .map(|p| Seat {
                room_id: room_id.clone(),
                role: p.role,
            })
    }
}

/// Session registry for every room on this server.
///
/// Cloning yields another handle to the same registry.
#[derive(Clone)]
pub struct RoomManager {
    table: Arc<Mutex<RoomTable>>,
    config: RoomConfig,
}

impl RoomManager {
    pub fn new(config: RoomConfig) -> Self {
        Self {
            table: Arc::new(Mutex::new(RoomTable::default())),
            config,
        }
    }

    /// Open a room with `host_conn` as host.
    ///
    /// When called inside a tokio runtime, also arms the waiting-room expiry.
    pub fn create_room(&self, host_conn: &str) -> CreatedRoom {
        let session_id = Uuid::new_v4().to_string();
        let now = Utc::now();

        let (room_id, generation) = {
            let mut table = self.table.lock();
            let room_id = table.generate_room_id();
            let generation = table.next_generation;
            table.next_generation += 1;

            let host = Player::new(host_conn, session_id.clone(), PlayerRole::Host);
            let room = Room {
                id: room_id.clone(),
                status: RoomStatus::Waiting,
                players: BTreeMap::from([(PlayerRole::Host, host)]),
                created_at: now,
                started_at: None,
            };

            table
                .rooms
                .insert(room_id.clone(), RoomEntry { room, generation });
            table
                .conn_to_room
                .insert(host_conn.to_string(), room_id.clone());
            table.session_to_seat.insert(
                session_id.clone(),
                Seat {
                    room_id: room_id.clone(),
                    role: PlayerRole::Host,
                },
            );
            (room_id, generation)
        };

        info!(room_id = %room_id, conn_id = %host_conn, "Room created");

        self.schedule_room_cleanup(room_id.clone(), generation);

        CreatedRoom {
            room_id,
            session_id,
        }
    }

    /// Seat `guest_conn` as guest; returns the guest's session id
    pub fn join_room(&self, room_id: &str, guest_conn: &str) -> Result<String, RoomError> {
        let mut table = self.table.lock();

        let entry = table.rooms.get_mut(room_id).ok_or(RoomError::RoomNotFound)?;
        if entry.room.players.len() >= self.config.max_players
            || entry.room.players.contains_key(&PlayerRole::Guest)
        {
            return Err(RoomError::RoomFull);
        }

        let session_id = Uuid::new_v4().to_string();
        entry.room.players.insert(
            PlayerRole::Guest,
            Player::new(guest_conn, session_id.clone(), PlayerRole::Guest),
        );

        table
            .conn_to_room
            .insert(guest_conn.to_string(), room_id.to_string());
        table.session_to_seat.insert(
            session_id.clone(),
            Seat {
                room_id: room_id.to_string(),
                role: PlayerRole::Guest,
            },
        );

        info!(room_id = %room_id, conn_id = %guest_conn, "Player joined room");

        Ok(session_id)
    }

    /// Remove the player behind `conn_id`.
    ///
    /// A departing host closes the whole room; a departing guest frees the
    /// seat and puts the room back to `waiting`.
    pub fn leave_room(&self, conn_id: &str) {
        let mut table = self.table.lock();
        let Some(seat) = table.seat_of_conn(conn_id) else {
            return;
        };

        info!(room_id = %seat.room_id, conn_id = %conn_id, role = %seat.role, "Player left room");

        match seat.role {
            PlayerRole::Host => {
                table.close(&seat.room_id);
                info!(room_id = %seat.room_id, "Room closed");
            }
            PlayerRole::Guest => {
                let removed = table.rooms.get_mut(&seat.room_id).and_then(|entry| {
                    entry.room.status = RoomStatus::Waiting;
                    entry.room.players.remove(&PlayerRole::Guest)
                });
                if let Some(player) = removed {
                    table.session_to_seat.remove(&player.session_id);
                }
                table.conn_to_room.remove(conn_id);
            }
        }
    }

    /// Bind an existing session to a new connection
    pub fn reconnect(&self, session_id: &str, new_conn: &str) -> Result<Seat, RoomError> {
        let mut table = self.table.lock();

        let seat = table
            .session_to_seat
            .get(session_id)
            .cloned()
            .ok_or(RoomError::Unauthorized)?;

        let entry = table
            .rooms
            .get_mut(&seat.room_id)
            .ok_or(RoomError::RoomNotFound)?;
        let player = entry
            .room
            .players
            .get_mut(&seat.role)
            .ok_or(RoomError::Unauthorized)?;

        let old_conn = std::mem::replace(&mut player.conn_id, new_conn.to_string());
        player.status = ConnectionStatus::Connected;

        table.conn_to_room.remove(&old_conn);
        table
            .conn_to_room
            .insert(new_conn.to_string(), seat.room_id.clone());

        info!(
            room_id = %seat.room_id,
            conn_id = %new_conn,
            role = %seat.role,
            "Player reconnected"
        );

        Ok(seat)
    }

    /// Flip a full room to `playing`; false if missing or not full
    pub fn start_game(&self, room_id: &str) -> bool {
        let mut table = self.table.lock();
        let Some(entry) = table.rooms.get_mut(room_id) else {
            return false;
        };

        if entry.room.players.len() < self.config.max_players {
            return false;
        }

        entry.room.status = RoomStatus::Playing;
        entry.room.started_at = Some(Utc::now());

        info!(room_id = %room_id, "Game started");
        true
    }

    pub fn end_game(&self, room_id: &str) {
        let mut table = self.table.lock();
        if let Some(entry) = table.rooms.get_mut(room_id) {
            entry.room.status = RoomStatus::Finished;
            info!(room_id = %room_id, "Game ended");
        }
    }

    /// Drop a room and every mapping that points into it
    pub fn close_room(&self, room_id: &str) {
        if self.table.lock().close(room_id).is_some() {
            info!(room_id = %room_id, "Room closed");
        }
    }

    pub fn update_player_status(&self, conn_id: &str, status: ConnectionStatus) {
        let mut table = self.table.lock();
        let Some(room_id) = table.conn_to_room.get(conn_id).cloned() else {
            return;
        };
        let Some(entry) = table.rooms.get_mut(&room_id) else {
            return;
        };

        if let Some(player) = entry
            .room
            .players
            .values_mut()
            .find(|p| p.conn_id == conn_id)
        {
            player.status = status;
            info!(conn_id = %conn_id, status = ?status, "Player status updated");
        }
    }

    pub fn get_room(&self, room_id: &str) -> Option<Room> {
        self.table.lock().rooms.get(room_id).map(|e| e.room.clone())
    }

    pub fn get_room_id_by_conn(&self, conn_id: &str) -> Option<String> {
        self.table.lock().conn_to_room.get(conn_id).cloned()
    }

    /// Room and role currently bound to a connection
    pub fn get_seat_by_conn(&self, conn_id: &str) -> Option<Seat> {
        self.table.lock().seat_of_conn(conn_id)
    }

    pub fn get_opponent(&self, room_id: &str, role: PlayerRole) -> Option<Player> {
        let table = self.table.lock();
        table
            .rooms
            .get(room_id)
            .and_then(|e| e.room.players.get(&role.opponent()).cloned())
    }

    pub fn get_room_count(&self) -> usize {
        self.table.lock().rooms.len()
    }

    pub fn get_player_count(&self) -> usize {
        self.table
            .lock()
            .rooms
            .values()
            .map(|e| e.room.players.len())
            .sum()
    }

    fn schedule_room_cleanup(&self, room_id: String, generation: u64) {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            return;
        };

        let manager = self.clone();
        let timeout = self.config.waiting_timeout;
        runtime.spawn(async move {
            tokio::time::sleep(timeout).await;
            manager.expire_waiting_room(&room_id, generation);
        });
    }

    fn expire_waiting_room(&self, room_id: &str, generation: u64) {
        let mut table = self.table.lock();
        let expired = table
            .rooms
            .get(room_id)
            .map(|e| e.generation == generation && e.room.status == RoomStatus::Waiting)
            .unwrap_or(false);

        if expired {
            info!(room_id = %room_id, "Room timeout, closing");
            table.close(room_id);
        }
    }
}

impl Default for RoomManager {
    fn default() -> Self {
        Self::new(RoomConfig::default())
    }
}
