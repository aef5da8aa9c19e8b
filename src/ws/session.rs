//! Per-connection message dispatch and room/match orchestration

use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::app::AppState;
use crate::game::snapshot::SnapshotStats;
use crate::game::GameEngine;
use crate::room::{ConnectionStatus, PlayerRole};
use crate::util::rate_limit::LobbyRateLimiter;
use crate::util::time::{unix_millis, SNAPSHOT_INTERVAL_MICROS};

use super::protocol::{codes, decode, ClientMsg, Incoming, ServerMsg};

/// One socket's view of the server
pub struct Session {
    conn_id: String,
    lobby: LobbyRateLimiter,
}

impl Session {
    pub fn new(conn_id: impl Into<String>) -> Self {
        Self {
            conn_id: conn_id.into(),
            lobby: LobbyRateLimiter::new(),
        }
    }

    pub fn conn_id(&self) -> &str {
        &self.conn_id
    }

    /// Route one text frame
    pub fn handle_text(&self, state: &AppState, text: &str) {
        match decode(text) {
            Ok(Incoming::Input(raw)) => handle_input(state, &self.conn_id, &raw),
            Ok(Incoming::Control(msg)) => {
                if msg.is_lobby_action() && !self.lobby.check() {
                    warn!(conn_id = %self.conn_id, "Rate limited lobby message");
                    reply(state, &self.conn_id, ServerMsg::error(codes::RATE_LIMITED, "too many requests"));
                    return;
                }
                handle_control(state, &self.conn_id, msg);
            }
            Err(e) => {
                warn!(conn_id = %self.conn_id, error = %e, "Failed to parse client message");
                reply(state, &self.conn_id, ServerMsg::error(codes::INVALID_MESSAGE, e.to_string()));
            }
        }
    }
}

fn reply(state: &AppState, conn_id: &str, msg: ServerMsg) {
    state.hub.send(conn_id, &msg);
}

/// Rate limit, validate, then hand the input to the room's engine.
/// Anything rejected along the way is dropped.
pub fn handle_input(state: &AppState, conn_id: &str, raw: &Value) {
    if !state.validator.check_rate_limit(conn_id) {
        return;
    }
    let Ok(input) = state.validator.parse_input(raw) else {
        return;
    };
    let Some(seat) = state.rooms.get_seat_by_conn(conn_id) else {
        debug!(conn_id = %conn_id, "Input from connection without a room");
        return;
    };
    let Some(engine) = state.engines.get(&seat.room_id) else {
        return;
    };

    engine.handle_input(seat.role, &input);
}

pub fn handle_control(state: &AppState, conn_id: &str, msg: ClientMsg) {
    match msg {
        ClientMsg::CreateRoom => create_room(state, conn_id),
        ClientMsg::JoinRoom { room_id } => join_room(state, conn_id, &room_id),
        ClientMsg::Reconnect { session_id } => reconnect(state, conn_id, &session_id),
        ClientMsg::LeaveRoom => {
            if !leave(state, conn_id) {
                reply(state, conn_id, ServerMsg::error(codes::NOT_IN_ROOM, "not in a room"));
            }
        }
        ClientMsg::StartGame => start_game(state, conn_id),
        ClientMsg::EndGame => end_game(state, conn_id),
        ClientMsg::Ping { t } => reply(
            state,
            conn_id,
            ServerMsg::Pong {
                t,
                server_time: unix_millis(),
            },
        ),
    }
}

fn create_room(state: &AppState, conn_id: &str) {
    if state.rooms.get_seat_by_conn(conn_id).is_some() {
        reply(state, conn_id, ServerMsg::error(codes::ALREADY_IN_ROOM, "already in a room"));
        return;
    }

    let created = state.rooms.create_room(conn_id);
    reply(
        state,
        conn_id,
        ServerMsg::RoomCreated {
            room_id: created.room_id,
            session_id: created.session_id,
            role: PlayerRole::Host,
        },
    );
}

fn join_room(state: &AppState, conn_id: &str, room_id: &str) {
    if state.rooms.get_seat_by_conn(conn_id).is_some() {
        reply(state, conn_id, ServerMsg::error(codes::ALREADY_IN_ROOM, "already in a room"));
        return;
    }

    match state.rooms.join_room(room_id, conn_id) {
        Ok(session_id) => {
            reply(
                state,
                conn_id,
                ServerMsg::RoomJoined {
                    room_id: room_id.to_string(),
                    session_id,
                    role: PlayerRole::Guest,
                },
            );
            if let Some(host) = state.rooms.get_opponent(room_id, PlayerRole::Guest) {
                reply(state, &host.conn_id, ServerMsg::PlayerJoined { role: PlayerRole::Guest });
            }
        }
        Err(e) => {
            warn!(conn_id = %conn_id, room_id = %room_id, error = %e, "Join rejected");
            reply(state, conn_id, ServerMsg::error(e.code(), e.to_string()));
        }
    }
}

fn reconnect(state: &AppState, conn_id: &str, session_id: &str) {
    let seat = match state.rooms.reconnect(session_id, conn_id) {
        Ok(seat) => seat,
        Err(e) => {
            warn!(conn_id = %conn_id, error = %e, "Reconnect rejected");
            reply(state, conn_id, ServerMsg::error(e.code(), e.to_string()));
            return;
        }
    };

    let Some(room) = state.rooms.get_room(&seat.room_id) else {
        return;
    };
    let initial_state = state
        .engines
        .get(&seat.room_id)
        .filter(|engine| !engine.is_finished())
        .map(|_| state.setup.generate_initial_state(&seat.room_id));

    reply(
        state,
        conn_id,
        ServerMsg::Reconnected {
            room_id: seat.room_id.clone(),
            role: seat.role,
            room_status: room.status,
            initial_state,
        },
    );
    if let Some(opponent) = room.player(seat.role.opponent()) {
        reply(
            state,
            &opponent.conn_id,
            ServerMsg::OpponentStatus {
                role: seat.role,
                status: ConnectionStatus::Connected,
            },
        );
    }
}

/// Leave whatever room `conn_id` sits in; false if it sits nowhere.
///
/// The room's engine is stopped either way. A host leaving closes the room.
pub fn leave(state: &AppState, conn_id: &str) -> bool {
    let Some(seat) = state.rooms.get_seat_by_conn(conn_id) else {
        return false;
    };

    let opponent = state.rooms.get_opponent(&seat.room_id, seat.role);
    let was_running = stop_engine(state, &seat.room_id);
    state.rooms.leave_room(conn_id);

    if let Some(opponent) = opponent {
        match seat.role {
            PlayerRole::Host => reply(
                state,
                &opponent.conn_id,
                ServerMsg::RoomClosed {
                    room_id: seat.room_id.clone(),
                    reason: "host_left".to_string(),
                },
            ),
            PlayerRole::Guest => {
                if was_running {
                    reply(
                        state,
                        &opponent.conn_id,
                        ServerMsg::GameOver {
                            room_id: seat.room_id.clone(),
                            reason: "opponent_left".to_string(),
                        },
                    );
                }
                reply(state, &opponent.conn_id, ServerMsg::PlayerLeft { role: seat.role });
            }
        }
    }
    true
}

fn start_game(state: &AppState, conn_id: &str) {
    let Some(seat) = state.rooms.get_seat_by_conn(conn_id) else {
        reply(state, conn_id, ServerMsg::error(codes::NOT_IN_ROOM, "not in a room"));
        return;
    };
    if seat.role != PlayerRole::Host {
        reply(state, conn_id, ServerMsg::error(codes::NOT_HOST, "only the host can start"));
        return;
    }
    // registered engines are removed when a match ends
    if state.engines.contains(&seat.room_id) {
        warn!(room_id = %seat.room_id, "Start requested while a match is running");
        reply(state, conn_id, ServerMsg::error(codes::START_FAILED, "match already running"));
        return;
    }
    if !state.rooms.start_game(&seat.room_id) {
        reply(state, conn_id, ServerMsg::error(codes::START_FAILED, "room is not ready"));
        return;
    }

    launch_match(state, &seat.room_id);
}

/// Start an engine for a room that just entered `playing`
fn launch_match(state: &AppState, room_id: &str) {
    let engine = Arc::new(GameEngine::new(room_id));
    engine.start();
    state.engines.insert(Arc::clone(&engine));
    spawn_state_sync(state.clone(), engine);

    let initial_state = state.setup.generate_initial_state(room_id);
    if let Some(room) = state.rooms.get_room(room_id) {
        state
            .hub
            .send_all(&room.conn_ids(), &ServerMsg::GameStart { initial_state });
    }
}

fn end_game(state: &AppState, conn_id: &str) {
    let Some(seat) = state.rooms.get_seat_by_conn(conn_id) else {
        reply(state, conn_id, ServerMsg::error(codes::NOT_IN_ROOM, "not in a room"));
        return;
    };

    stop_engine(state, &seat.room_id);
    state.rooms.end_game(&seat.room_id);

    if let Some(room) = state.rooms.get_room(&seat.room_id) {
        state.hub.send_all(
            &room.conn_ids(),
            &ServerMsg::GameOver {
                room_id: seat.room_id.clone(),
                reason: "ended".to_string(),
            },
        );
    }
}

/// Stop and deregister a room's engine; true if one was running
fn stop_engine(state: &AppState, room_id: &str) -> bool {
    match state.engines.remove(room_id) {
        Some(engine) => {
            let was_running = !engine.is_finished();
            engine.stop();
            was_running
        }
        None => false,
    }
}

/// Socket closed: keep the seat for the reconnect window, then leave
pub fn on_disconnect(state: &AppState, conn_id: &str) {
    state.validator.clear_rate_limit(conn_id);
    state.hub.unregister(conn_id);

    let Some(seat) = state.rooms.get_seat_by_conn(conn_id) else {
        return;
    };

    state
        .rooms
        .update_player_status(conn_id, ConnectionStatus::Disconnected);
    if let Some(opponent) = state.rooms.get_opponent(&seat.room_id, seat.role) {
        reply(
            state,
            &opponent.conn_id,
            ServerMsg::OpponentStatus {
                role: seat.role,
                status: ConnectionStatus::Disconnected,
            },
        );
    }

    let grace = state.config.room.reconnect_timeout;
    let state = state.clone();
    let conn_id = conn_id.to_string();
    tokio::spawn(async move {
        tokio::time::sleep(grace).await;
        // reconnecting rebinds the seat to a new connection id
        if state.rooms.get_seat_by_conn(&conn_id).is_some() {
            info!(conn_id = %conn_id, room_id = %seat.room_id, "Reconnect window expired");
            leave(&state, &conn_id);
        }
    });
}

/// Broadcast `state_sync` to the room's connected players until the engine stops
fn spawn_state_sync(state: AppState, engine: Arc<GameEngine>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let room_id = engine.get_room_id().to_string();
        let mut ticker = interval(Duration::from_micros(SNAPSHOT_INTERVAL_MICROS));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut stats = SnapshotStats::default();

        loop {
            ticker.tick().await;
            if engine.is_finished() {
                break;
            }
            let Some(room) = state.rooms.get_room(&room_id) else {
                break;
            };

            let snapshot = engine.get_state();
            let tank_count = snapshot.tanks.len();
            let text = match (ServerMsg::StateSync { state: snapshot }).encode() {
                Ok(text) => text,
                Err(e) => {
                    error!(room_id = %room_id, error = %e, "Failed to encode state sync");
                    break;
                }
            };
            stats.record(tank_count, text.len());

            for player in room.players.values() {
                if player.status == ConnectionStatus::Connected && state.hub.is_connected(&player.conn_id) {
                    state.hub.send_text(&player.conn_id, text.clone());
                }
            }
        }

        debug!(
            room_id = %room_id,
            snapshots = stats.total_snapshots,
            avg_bytes = stats.avg_bytes(),
            "State sync stopped"
        );
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::room::RoomStatus;
    use tokio::sync::mpsc::Receiver;

    async fn next(rx: &mut Receiver<String>) -> Value {
        let text = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .expect("timed out waiting for a message")
            .expect("outbox closed");
        serde_json::from_str(&text).unwrap()
    }

    /// Skip frames until one with the given `type`
    async fn next_of(rx: &mut Receiver<String>, kind: &str) -> Value {
        loop {
            let msg = next(rx).await;
            if msg["type"] == kind {
                return msg;
            }
        }
    }

    struct Lobby {
        state: AppState,
        host: Session,
        guest: Session,
        host_rx: Receiver<String>,
        guest_rx: Receiver<String>,
        room_id: String,
        guest_session: String,
    }

    async fn lobby() -> Lobby {
        let state = AppState::new(Config::default());
        let host = Session::new("h");
        let guest = Session::new("g");
        let mut host_rx = state.hub.register("h");
        let mut guest_rx = state.hub.register("g");

        host.handle_text(&state, r#"{"type":"create_room"}"#);
        let created = next(&mut host_rx).await;
        assert_eq!(created["type"], "room_created");
        assert_eq!(created["role"], "host");
        let room_id = created["roomId"].as_str().unwrap().to_string();

        guest.handle_text(&state, &format!(r#"{{"type":"join_room","roomId":"{room_id}"}}"#));
        let joined = next(&mut guest_rx).await;
        assert_eq!(joined["type"], "room_joined");
        assert_eq!(joined["role"], "guest");
        let guest_session = joined["sessionId"].as_str().unwrap().to_string();

        let notice = next(&mut host_rx).await;
        assert_eq!(notice["type"], "player_joined");

        Lobby {
            state,
            host,
            guest,
            host_rx,
            guest_rx,
            room_id,
            guest_session,
        }
    }

    #[tokio::test]
    async fn join_errors_carry_room_codes() {
        let mut l = lobby().await;
        let third = Session::new("x");
        let mut third_rx = l.state.hub.register("x");

        third.handle_text(&l.state, &format!(r#"{{"type":"join_room","roomId":"{}"}}"#, l.room_id));
        assert_eq!(next(&mut third_rx).await["code"], "ROOM_FULL");

        third.handle_text(&l.state, r#"{"type":"join_room","roomId":"000000"}"#);
        assert_eq!(next(&mut third_rx).await["code"], "ROOM_NOT_FOUND");

        third.handle_text(&l.state, r#"{"type":"reconnect","sessionId":"nope"}"#);
        assert_eq!(next(&mut third_rx).await["code"], "UNAUTHORIZED");

        l.host.handle_text(&l.state, r#"{"type":"create_room"}"#);
        assert_eq!(next(&mut l.host_rx).await["code"], "ALREADY_IN_ROOM");
    }

    #[tokio::test]
    async fn malformed_frames_get_an_error_and_ping_gets_pong() {
        let l = lobby().await;
        let mut rx = l.host_rx;

        l.host.handle_text(&l.state, "{oops");
        assert_eq!(next(&mut rx).await["code"], "INVALID_MESSAGE");

        l.host.handle_text(&l.state, r#"{"type":"ping","t":42}"#);
        let pong = next(&mut rx).await;
        assert_eq!(pong["type"], "pong");
        assert_eq!(pong["t"], 42);
    }

    #[tokio::test]
    async fn only_the_host_starts_and_both_get_game_start() {
        let mut l = lobby().await;

        l.guest.handle_text(&l.state, r#"{"type":"start_game"}"#);
        assert_eq!(next(&mut l.guest_rx).await["code"], "NOT_HOST");

        l.host.handle_text(&l.state, r#"{"type":"start_game"}"#);
        let start = next_of(&mut l.host_rx, "game_start").await;
        assert_eq!(start["initialState"]["mapId"], 1);
        let guest_start = next_of(&mut l.guest_rx, "game_start").await;
        assert_eq!(guest_start["initialState"]["seed"], start["initialState"]["seed"]);

        assert_eq!(l.state.rooms.get_room(&l.room_id).unwrap().status, RoomStatus::Playing);
        let engine = l.state.engines.get(&l.room_id).unwrap();

        let sync = next_of(&mut l.host_rx, "state_sync").await;
        assert_eq!(sync["state"]["gameStatus"], "playing");
        assert_eq!(sync["state"]["remainingBots"], 20);

        l.host.handle_text(
            &l.state,
            &format!(
                r#"{{"type":"state","direction":"left","moving":true,"firing":false,"timestamp":{}}}"#,
                unix_millis()
            ),
        );

        l.host.handle_text(&l.state, r#"{"type":"end_game"}"#);
        assert_eq!(next_of(&mut l.host_rx, "game_over").await["reason"], "ended");
        assert_eq!(next_of(&mut l.guest_rx, "game_over").await["reason"], "ended");
        assert!(engine.is_finished());
        assert!(l.state.engines.get(&l.room_id).is_none());
        assert_eq!(l.state.rooms.get_room(&l.room_id).unwrap().status, RoomStatus::Finished);
    }

    #[tokio::test]
    async fn second_start_keeps_the_running_engine() {
        let mut l = lobby().await;
        l.host.handle_text(&l.state, r#"{"type":"start_game"}"#);
        next_of(&mut l.host_rx, "game_start").await;
        let engine = l.state.engines.get(&l.room_id).unwrap();

        l.host.handle_text(&l.state, r#"{"type":"start_game"}"#);
        assert_eq!(next_of(&mut l.host_rx, "error").await["code"], "START_FAILED");
        assert_eq!(l.state.engines.active_engines(), 1);
        assert!(Arc::ptr_eq(&engine, &l.state.engines.get(&l.room_id).unwrap()));

        l.host.handle_text(&l.state, r#"{"type":"end_game"}"#);
        next_of(&mut l.host_rx, "game_over").await;
        assert!(engine.is_finished());
        assert_eq!(l.state.engines.active_engines(), 0);

        tokio::time::sleep(Duration::from_millis(200)).await;
        while let Ok(text) = l.host_rx.try_recv() {
            assert!(!text.contains("state_sync"), "state sync after game over: {text}");
        }
    }

    #[tokio::test]
    async fn guest_leaving_mid_match_stops_the_engine() {
        let mut l = lobby().await;
        l.host.handle_text(&l.state, r#"{"type":"start_game"}"#);
        next_of(&mut l.host_rx, "game_start").await;
        let engine = l.state.engines.get(&l.room_id).unwrap();

        l.guest.handle_text(&l.state, r#"{"type":"leave_room"}"#);
        assert!(engine.is_finished());
        assert_eq!(next_of(&mut l.host_rx, "game_over").await["reason"], "opponent_left");
        assert_eq!(next_of(&mut l.host_rx, "player_left").await["role"], "guest");

        let room = l.state.rooms.get_room(&l.room_id).unwrap();
        assert_eq!(room.status, RoomStatus::Waiting);
        assert_eq!(room.player_count(), 1);
    }

    #[tokio::test]
    async fn host_leaving_closes_the_room() {
        let mut l = lobby().await;
        l.host.handle_text(&l.state, r#"{"type":"leave_room"}"#);

        let closed = next(&mut l.guest_rx).await;
        assert_eq!(closed["type"], "room_closed");
        assert_eq!(closed["reason"], "host_left");
        assert!(l.state.rooms.get_room(&l.room_id).is_none());

        l.host.handle_text(&l.state, r#"{"type":"leave_room"}"#);
        assert_eq!(next(&mut l.host_rx).await["code"], "NOT_IN_ROOM");
    }

    #[tokio::test(start_paused = true)]
    async fn dropped_guest_is_removed_after_grace_window() {
        let mut l = lobby().await;

        on_disconnect(&l.state, "g");
        let status = next(&mut l.host_rx).await;
        assert_eq!(status["type"], "opponent_status");
        assert_eq!(status["status"], "disconnected");

        tokio::time::sleep(Duration::from_secs(29)).await;
        assert_eq!(l.state.rooms.get_room(&l.room_id).unwrap().player_count(), 2);

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(next(&mut l.host_rx).await["type"], "player_left");
        assert_eq!(l.state.rooms.get_room(&l.room_id).unwrap().player_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn reconnect_within_grace_keeps_the_seat() {
        let mut l = lobby().await;
        on_disconnect(&l.state, "g");
        next(&mut l.host_rx).await;

        let resumed = Session::new("g2");
        let mut resumed_rx = l.state.hub.register("g2");
        resumed.handle_text(
            &l.state,
            &format!(r#"{{"type":"reconnect","sessionId":"{}"}}"#, l.guest_session),
        );

        let ack = next(&mut resumed_rx).await;
        assert_eq!(ack["type"], "reconnected");
        assert_eq!(ack["role"], "guest");
        assert_eq!(ack["roomStatus"], "waiting");
        assert!(ack.get("initialState").is_none());

        let status = next(&mut l.host_rx).await;
        assert_eq!(status["status"], "connected");

        tokio::time::sleep(Duration::from_secs(31)).await;
        let room = l.state.rooms.get_room(&l.room_id).unwrap();
        assert_eq!(room.player_count(), 2);
        assert_eq!(room.player(PlayerRole::Guest).unwrap().conn_id, "g2");
        assert!(l.host_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn lobby_spam_is_throttled() {
        let state = AppState::new(Config::default());
        let session = Session::new("spam");
        let mut rx = state.hub.register("spam");

        for _ in 0..20 {
            session.handle_text(&state, r#"{"type":"leave_room"}"#);
        }

        let mut throttled = 0;
        for _ in 0..20 {
            if next(&mut rx).await["code"] == "RATE_LIMITED" {
                throttled += 1;
            }
        }
        assert!(throttled >= 10);
    }
}
