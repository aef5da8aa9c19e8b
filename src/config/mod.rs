//! Configuration module - environment variable parsing

use std::env;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

/// Application configuration loaded from environment variables
#[derive(Clone, Debug)]
pub struct Config {
    /// Server binding address
    pub server_addr: SocketAddr,
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Allowed client origins for CORS
    pub cors_origins: Vec<String>,
    /// Room lifecycle settings
    pub room: RoomConfig,
    /// Input cadence settings
    pub rate_limit: RateLimitConfig,
}

/// Room lifecycle settings
#[derive(Clone, Debug)]
pub struct RoomConfig {
    /// Players needed to start (and the most a room accepts)
    pub max_players: usize,
    /// How long a room may sit in `waiting` before it is closed
    pub waiting_timeout: Duration,
    /// Grace window for a dropped connection to resume its session
    pub reconnect_timeout: Duration,
}

impl Default for RoomConfig {
    fn default() -> Self {
        Self {
            max_players: 2,
            waiting_timeout: Duration::from_secs(30 * 60),
            reconnect_timeout: Duration::from_secs(30),
        }
    }
}

/// Input cadence settings
#[derive(Clone, Debug)]
pub struct RateLimitConfig {
    pub max_inputs_per_second: usize,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_inputs_per_second: 60,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server_addr: SocketAddr::from(([0, 0, 0, 0], 3001)),
            log_level: "info".to_string(),
            cors_origins: vec!["http://localhost:8080".to_string()],
            room: RoomConfig::default(),
            rate_limit: RateLimitConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Config::default();

        // PORT wins over SERVER_ADDR so container platforms can inject it
        let server_addr = if let Ok(port) = env::var("PORT") {
            format!("0.0.0.0:{}", port)
        } else {
            env::var("SERVER_ADDR").unwrap_or_else(|_| defaults.server_addr.to_string())
        };

        let cors_origins = match env::var("CORS_ORIGIN") {
            Ok(raw) => parse_origins(&raw),
            Err(_) => defaults.cors_origins,
        };

        Ok(Self {
            server_addr: server_addr
                .parse()
                .map_err(|_| ConfigError::InvalidAddress)?,

            log_level: env::var("LOG_LEVEL").unwrap_or(defaults.log_level),

            cors_origins,

            room: RoomConfig {
                max_players: parse_var("ROOM_MAX_PLAYERS", defaults.room.max_players)?,
                waiting_timeout: Duration::from_millis(parse_var(
                    "ROOM_TIMEOUT_MS",
                    defaults.room.waiting_timeout.as_millis() as u64,
                )?),
                reconnect_timeout: Duration::from_millis(parse_var(
                    "RECONNECT_TIMEOUT_MS",
                    defaults.room.reconnect_timeout.as_millis() as u64,
                )?),
            },

            rate_limit: RateLimitConfig {
                max_inputs_per_second: parse_var(
                    "MAX_INPUTS_PER_SECOND",
                    defaults.rate_limit.max_inputs_per_second,
                )?,
            },
        })
    }
}

/// Split a comma-separated origin list, dropping blanks
fn parse_origins(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn parse_var<T: FromStr>(name: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(name) {
        Ok(raw) => raw.trim().parse().map_err(|_| ConfigError::Invalid(name)),
        Err(_) => Ok(default),
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for environment variable: {0}")]
    Invalid(&'static str),

    #[error("Invalid server address format")]
    InvalidAddress,
}
