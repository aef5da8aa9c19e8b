//! Rate limiting utilities

use governor::{
    clock::DefaultClock,
    state::{InMemoryState, NotKeyed},
    Quota, RateLimiter,
};
use std::num::NonZeroU32;
use std::sync::Arc;

/// Rate limiter type alias
pub type Limiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// Create a rate limiter with the specified requests per second
pub fn create_limiter(requests_per_second: u32) -> Arc<Limiter> {
    let quota = Quota::per_second(NonZeroU32::new(requests_per_second).unwrap_or(NonZeroU32::MIN));
    Arc::new(RateLimiter::direct(quota))
}

/// Lobby control messages (create/join/reconnect/start) per connection
pub const LOBBY_RATE_LIMIT: u32 = 5; // Max 5 lobby actions per second

/// Per-connection limiter for room lifecycle requests.
///
/// Gameplay input has its own sliding-window limiter in
/// [`crate::input::InputValidator`]; this one only guards the lobby verbs.
#[derive(Clone)]
pub struct LobbyRateLimiter {
    lobby_limiter: Arc<Limiter>,
}

impl LobbyRateLimiter {
    pub fn new() -> Self {
        Self {
            lobby_limiter: create_limiter(LOBBY_RATE_LIMIT),
        }
    }

    /// Check if a lobby action is allowed (returns true if allowed)
    pub fn check(&self) -> bool {
        self.lobby_limiter.check().is_ok()
    }
}

impl Default for LobbyRateLimiter {
    fn default() -> Self {
        Self::new()
    }
}
