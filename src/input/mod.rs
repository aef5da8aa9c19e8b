//! Remote input shape checks and per-connection cadence limiting

pub mod validator;

pub use validator::{InputError, InputValidator};

use serde::{Deserialize, Serialize};

use crate::game::Direction;

/// The one input shape accepted from clients: `{type:"state", direction?, moving, firing, timestamp}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerInput {
    pub direction: Option<Direction>,
    pub moving: bool,
    pub firing: bool,
    /// Client clock, unix milliseconds
    pub timestamp: f64,
}

impl PlayerInput {
    pub fn new(direction: Option<Direction>, moving: bool, firing: bool) -> Self {
        Self {
            direction,
            moving,
            firing,
            timestamp: crate::util::time::unix_millis() as f64,
        }
    }
}
