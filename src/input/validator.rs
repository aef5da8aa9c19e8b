//! Input validation and sliding-window rate limiting

use dashmap::DashMap;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::game::Direction;
use crate::util::time::unix_millis;

use super::PlayerInput;

/// Length of the rate-limit window
const RATE_WINDOW: Duration = Duration::from_millis(1000);

/// How far into the future a client timestamp may point
const FUTURE_TOLERANCE_MS: f64 = 1000.0;

/// How often empty windows are swept
const CLEANUP_INTERVAL: Duration = Duration::from_secs(5);

/// Why an input payload was rejected
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum InputError {
    #[error("invalid input type")]
    InvalidType,

    #[error("invalid direction")]
    InvalidDirection,

    #[error("moving/firing must be booleans")]
    InvalidFlags,

    #[error("invalid timestamp")]
    InvalidTimestamp,

    #[error("timestamp {timestamp} is ahead of server time {now}")]
    FutureTimestamp { timestamp: f64, now: f64 },
}

/// Shape and cadence gate in front of the engines.
///
/// Knows nothing about game rules; it only decides whether a payload is the
/// right shape and whether a connection is sending too fast.
pub struct InputValidator {
    windows: DashMap<String, VecDeque<Instant>>,
    max_per_window: usize,
}

impl InputValidator {
    pub fn new(max_inputs_per_second: usize) -> Self {
        Self {
            windows: DashMap::new(),
            max_per_window: max_inputs_per_second,
        }
    }

    /// Check a raw payload against the input shape
    pub fn validate_input(&self, raw: &Value) -> bool {
        self.parse_input(raw).is_ok()
    }

    /// Validate and convert a raw payload
    pub fn parse_input(&self, raw: &Value) -> Result<PlayerInput, InputError> {
        parse_input_at(raw, unix_millis() as f64).map_err(|e| {
            warn!(error = %e, "Rejected input");
            e
        })
    }

    /// Record an input from `conn_id`; false once the window is full
    pub fn check_rate_limit(&self, conn_id: &str) -> bool {
        self.check_rate_limit_at(conn_id, Instant::now())
    }

    pub fn check_rate_limit_at(&self, conn_id: &str, now: Instant) -> bool {
        let mut window = self.windows.entry(conn_id.to_string()).or_default();
        prune(&mut window, now);

        if window.len() >= self.max_per_window {
            warn!(conn_id = %conn_id, "Rate limit exceeded");
            return false;
        }

        window.push_back(now);
        true
    }

    /// Forget a connection's window (on disconnect)
    pub fn clear_rate_limit(&self, conn_id: &str) {
        self.windows.remove(conn_id);
    }

    /// Drop windows with no events in the last second
    pub fn sweep_at(&self, now: Instant) {
        self.windows.retain(|_, window| {
            prune(window, now);
            !window.is_empty()
        });
    }

    /// Number of connections currently tracked
    pub fn tracked_connections(&self) -> usize {
        self.windows.len()
    }

    /// Spawn the periodic sweep; the task ends when the validator is dropped
    pub fn start_cleanup(self: &Arc<Self>) -> JoinHandle<()> {
        let validator = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(CLEANUP_INTERVAL);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(validator) = validator.upgrade() else {
                    break;
                };
                validator.sweep_at(Instant::now());
                debug!(
                    tracked = validator.tracked_connections(),
                    "Swept input rate windows"
                );
            }
        })
    }
}

fn prune(window: &mut VecDeque<Instant>, now: Instant) {
    while let Some(front) = window.front() {
        if now.saturating_duration_since(*front) >= RATE_WINDOW {
            window.pop_front();
        } else {
            break;
        }
    }
}

/// Shape check with an explicit server clock (unix ms)
pub fn parse_input_at(raw: &Value, now_ms: f64) -> Result<PlayerInput, InputError> {
    let obj = raw.as_object().ok_or(InputError::InvalidType)?;

    if obj.get("type").and_then(Value::as_str) != Some("state") {
        return Err(InputError::InvalidType);
    }

    let direction = match obj.get("direction") {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) => Some(Direction::parse(s).ok_or(InputError::InvalidDirection)?),
        Some(_) => return Err(InputError::InvalidDirection),
    };

    let (Some(moving), Some(firing)) = (
        obj.get("moving").and_then(Value::as_bool),
        obj.get("firing").and_then(Value::as_bool),
    ) else {
        return Err(InputError::InvalidFlags);
    };

    let timestamp = obj
        .get("timestamp")
        .and_then(Value::as_f64)
        .filter(|t| t.is_finite() && *t != 0.0)
        .ok_or(InputError::InvalidTimestamp)?;

    if timestamp > now_ms + FUTURE_TOLERANCE_MS {
        return Err(InputError::FutureTimestamp {
            timestamp,
            now: now_ms,
        });
    }

    Ok(PlayerInput {
        direction,
        moving,
        firing,
        timestamp,
    })
}

impl Default for InputValidator {
    fn default() -> Self {
        Self::new(60)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const NOW: f64 = 1_700_000_000_000.0;

    #[test]
    fn accepts_well_formed_input() {
        let input = parse_input_at(
            &json!({"type": "state", "direction": "left", "moving": true, "firing": false, "timestamp": NOW}),
            NOW,
        )
        .unwrap();
        assert_eq!(input.direction, Some(Direction::Left));
        assert!(input.moving);
        assert!(!input.firing);
    }

    #[test]
    fn direction_may_be_absent() {
        let input = parse_input_at(
            &json!({"type": "state", "moving": false, "firing": true, "timestamp": NOW}),
            NOW,
        )
        .unwrap();
        assert_eq!(input.direction, None);
    }

    #[test]
    fn rejects_wrong_type() {
        assert_eq!(
            parse_input_at(
                &json!({"type": "move", "moving": true, "firing": false, "timestamp": NOW}),
                NOW
            ),
            Err(InputError::InvalidType)
        );
        assert_eq!(parse_input_at(&json!([1, 2]), NOW), Err(InputError::InvalidType));
    }

    #[test]
    fn rejects_unknown_direction() {
        for direction in [json!("diagonal"), json!(3), json!(true)] {
            assert_eq!(
                parse_input_at(
                    &json!({"type": "state", "direction": direction, "moving": true, "firing": false, "timestamp": NOW}),
                    NOW
                ),
                Err(InputError::InvalidDirection)
            );
        }
    }

    #[test]
    fn rejects_non_boolean_flags() {
        assert_eq!(
            parse_input_at(
                &json!({"type": "state", "moving": 1, "firing": false, "timestamp": NOW}),
                NOW
            ),
            Err(InputError::InvalidFlags)
        );
        assert_eq!(
            parse_input_at(
                &json!({"type": "state", "moving": true, "firing": "yes", "timestamp": NOW}),
                NOW
            ),
            Err(InputError::InvalidFlags)
        );
        assert_eq!(
            parse_input_at(&json!({"type": "state", "moving": true, "timestamp": NOW}), NOW),
            Err(InputError::InvalidFlags)
        );
    }

    #[test]
    fn rejects_bad_timestamps() {
        assert_eq!(
            parse_input_at(
                &json!({"type": "state", "moving": true, "firing": false, "timestamp": "now"}),
                NOW
            ),
            Err(InputError::InvalidTimestamp)
        );
        assert_eq!(
            parse_input_at(
                &json!({"type": "state", "moving": true, "firing": false, "timestamp": 0}),
                NOW
            ),
            Err(InputError::InvalidTimestamp)
        );
    }

    #[test]
    fn future_timestamp_tolerance_is_one_second() {
        let at = |ts: f64| {
            parse_input_at(
                &json!({"type": "state", "moving": true, "firing": false, "timestamp": ts}),
                NOW,
            )
        };
        assert!(at(NOW + 1000.0).is_ok());
        assert!(matches!(
            at(NOW + 1001.0),
            Err(InputError::FutureTimestamp { .. })
        ));
        assert!(at(NOW - 60_000.0).is_ok());
    }

    #[test]
    fn validate_input_reports_bool() {
        let validator = InputValidator::default();
        let now = unix_millis() as f64;
        assert!(validator.validate_input(
            &json!({"type": "state", "direction": "up", "moving": true, "firing": false, "timestamp": now})
        ));
        assert!(!validator.validate_input(&json!({"type": "state"})));
    }

    #[test]
    fn sixty_first_input_in_window_is_rejected() {
        let validator = InputValidator::new(60);
        let start = Instant::now();

        for i in 0..60 {
            let at = start + Duration::from_millis(i * 10);
            assert!(validator.check_rate_limit_at("conn", at), "input {i}");
        }
        assert!(!validator.check_rate_limit_at("conn", start + Duration::from_millis(900)));

        // Once the earliest entries age out, acceptance resumes
        assert!(validator.check_rate_limit_at("conn", start + Duration::from_millis(1000)));
        assert!(validator.check_rate_limit_at("conn", start + Duration::from_millis(2500)));
    }

    #[test]
    fn rejected_inputs_do_not_extend_the_window() {
        let validator = InputValidator::new(2);
        let start = Instant::now();
        assert!(validator.check_rate_limit_at("conn", start));
        assert!(validator.check_rate_limit_at("conn", start));
        for ms in [100, 500, 900] {
            assert!(!validator.check_rate_limit_at("conn", start + Duration::from_millis(ms)));
        }
        assert!(validator.check_rate_limit_at("conn", start + Duration::from_millis(1000)));
    }

    #[test]
    fn connections_are_limited_independently() {
        let validator = InputValidator::new(1);
        let now = Instant::now();
        assert!(validator.check_rate_limit_at("a", now));
        assert!(!validator.check_rate_limit_at("a", now));
        assert!(validator.check_rate_limit_at("b", now));
    }

    #[test]
    fn clear_and_sweep_evict_windows() {
        let validator = InputValidator::new(60);
        let start = Instant::now();
        validator.check_rate_limit_at("a", start);
        validator.check_rate_limit_at("b", start);
        assert_eq!(validator.tracked_connections(), 2);

        validator.clear_rate_limit("a");
        assert_eq!(validator.tracked_connections(), 1);

        validator.sweep_at(start + Duration::from_millis(500));
        assert_eq!(validator.tracked_connections(), 1);
        validator.sweep_at(start + Duration::from_millis(1500));
        assert_eq!(validator.tracked_connections(), 0);
    }
}
