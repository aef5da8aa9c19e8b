//! WebSocket protocol message definitions
//! These are the wire types for client-server communication

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::game::StateSnapshot;
use crate::room::{ConnectionStatus, PlayerRole, RoomStatus};
use crate::setup::InitialState;

/// `type` tag of the gameplay input payload, validated separately
pub const INPUT_TYPE: &str = "state";

/// Messages sent from client to server (besides gameplay input)
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum ClientMsg {
    /// Open a new room and take the host seat
    CreateRoom,

    /// Take the guest seat of an existing room
    JoinRoom { room_id: String },

    /// Resume a seat after the socket dropped
    Reconnect { session_id: String },

    LeaveRoom,

    /// Host only; requires a full room
    StartGame,

    EndGame,

    /// Ping for latency measurement
    Ping {
        /// Client timestamp
        t: u64,
    },
}

impl ClientMsg {
    /// Lobby verbs are throttled; pings are not
    pub fn is_lobby_action(&self) -> bool {
        !matches!(self, ClientMsg::Ping { .. })
    }
}

/// A decoded text frame
#[derive(Debug, Clone, PartialEq)]
pub enum Incoming {
    /// Raw `{type:"state", ...}` payload for the input validator
    Input(Value),
    Control(ClientMsg),
}

/// Split a text frame into gameplay input or a control message
pub fn decode(text: &str) -> Result<Incoming, serde_json::Error> {
    let value: Value = serde_json::from_str(text)?;
    if value.get("type").and_then(Value::as_str) == Some(INPUT_TYPE) {
        return Ok(Incoming::Input(value));
    }
    serde_json::from_value(value).map(Incoming::Control)
}

/// Messages sent from server to client
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum ServerMsg {
    /// Welcome message after connection
    Welcome { conn_id: String, server_time: u64 },

    RoomCreated {
        room_id: String,
        session_id: String,
        role: PlayerRole,
    },

    RoomJoined {
        room_id: String,
        session_id: String,
        role: PlayerRole,
    },

    /// Sent to the host when a guest takes the seat
    PlayerJoined { role: PlayerRole },

    Reconnected {
        room_id: String,
        role: PlayerRole,
        room_status: RoomStatus,
        /// Present when a match is already running
        #[serde(skip_serializing_if = "Option::is_none")]
        initial_state: Option<InitialState>,
    },

    /// The opponent's socket dropped or came back
    OpponentStatus {
        role: PlayerRole,
        status: ConnectionStatus,
    },

    PlayerLeft { role: PlayerRole },

    RoomClosed { room_id: String, reason: String },

    GameStart { initial_state: InitialState },

    /// Authoritative state, broadcast at the snapshot rate
    StateSync { state: StateSnapshot },

    GameOver { room_id: String, reason: String },

    /// Error message
    Error { code: String, message: String },

    /// Pong response
    Pong {
        /// Echo back client timestamp
        t: u64,
        server_time: u64,
    },
}

impl ServerMsg {
    pub fn error(code: &str, message: impl Into<String>) -> Self {
        ServerMsg::Error {
            code: code.to_string(),
            message: message.into(),
        }
    }

    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Error codes the transport adds on top of the room errors
pub mod codes {
    pub const INVALID_MESSAGE: &str = "INVALID_MESSAGE";
    pub const RATE_LIMITED: &str = "RATE_LIMITED";
    pub const ALREADY_IN_ROOM: &str = "ALREADY_IN_ROOM";
    pub const NOT_IN_ROOM: &str = "NOT_IN_ROOM";
    pub const NOT_HOST: &str = "NOT_HOST";
    pub const START_FAILED: &str = "START_FAILED";
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn control_messages_decode_with_camel_case_fields() {
        assert_eq!(
            decode(r#"{"type":"join_room","roomId":"123456"}"#).unwrap(),
            Incoming::Control(ClientMsg::JoinRoom {
                room_id: "123456".into()
            })
        );
        assert_eq!(
            decode(r#"{"type":"reconnect","sessionId":"abc"}"#).unwrap(),
            Incoming::Control(ClientMsg::Reconnect {
                session_id: "abc".into()
            })
        );
        assert_eq!(
            decode(r#"{"type":"create_room"}"#).unwrap(),
            Incoming::Control(ClientMsg::CreateRoom)
        );
        assert_eq!(
            decode(r#"{"type":"ping","t":5}"#).unwrap(),
            Incoming::Control(ClientMsg::Ping { t: 5 })
        );
    }

    #[test]
    fn input_payloads_pass_through_raw() {
        let raw = r#"{"type":"state","direction":"up","moving":true,"firing":false,"timestamp":1}"#;
        match decode(raw).unwrap() {
            Incoming::Input(value) => assert_eq!(value["direction"], "up"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn garbage_is_rejected() {
        assert!(decode("not json").is_err());
        assert!(decode(r#"{"type":"teleport"}"#).is_err());
        assert!(decode(r#"{"type":"join_room"}"#).is_err());
    }

    #[test]
    fn server_messages_use_snake_case_tags() {
        let msg = ServerMsg::RoomCreated {
            room_id: "000001".into(),
            session_id: "s".into(),
            role: PlayerRole::Host,
        };
        let value: Value = serde_json::from_str(&msg.encode().unwrap()).unwrap();
        assert_eq!(
            value,
            json!({"type": "room_created", "roomId": "000001", "sessionId": "s", "role": "host"})
        );

        let value = serde_json::to_value(ServerMsg::error("ROOM_FULL", "room is full")).unwrap();
        assert_eq!(value["type"], "error");
        assert_eq!(value["code"], "ROOM_FULL");

        let value = serde_json::to_value(ServerMsg::OpponentStatus {
            role: PlayerRole::Guest,
            status: ConnectionStatus::Disconnected,
        })
        .unwrap();
        assert_eq!(value["status"], "disconnected");
    }
}
