//! # Tank Duel Server
//!
//! Authoritative server for two-player online tank battles.
//!
//! ## Architecture
//!
//! ```text
//! room/      - Room lifecycle, seats and reconnect sessions
//! input/     - Remote input shape checks and cadence limiting
//! setup/     - Match bootstrap payload
//! game/      - Fixed-rate simulation (physics, map, combat, bot AI)
//! ws/        - Wire protocol, socket outboxes and session orchestration
//! http/      - Router: /health and /ws
//! ```

pub mod app;
pub mod config;
pub mod game;
pub mod http;
pub mod input;
pub mod room;
pub mod setup;
pub mod util;
pub mod ws;
