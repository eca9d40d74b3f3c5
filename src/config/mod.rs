//! Configuration module - environment variable parsing

use std::env;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use crate::game::state::DEFAULT_MAX_SCORE;
use crate::util::rate_limit::{INPUT_RATE_LIMIT, MESSAGE_RATE_LIMIT};
use crate::util::time::tick_interval;

/// Application configuration loaded from environment variables
#[derive(Clone, Debug)]
pub struct Config {
    /// Server binding address
    pub server_addr: SocketAddr,
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,

    /// Allowed client origins for CORS
    pub client_origins: Vec<String>,

    /// HS256 secret for WebSocket identity tokens; unset means trust the query nickname
    pub jwt_secret: Option<String>,

    /// PostgREST endpoint for match results
    pub result_store_url: Option<String>,
    /// Service key for the result store
    pub result_store_key: Option<String>,

    pub game: GameConfig,
}

/// Tunables for the simulation and session handling
#[derive(Clone, Debug)]
pub struct GameConfig {
    pub target_fps: u32,
    pub max_score: u32,
    /// In-match forgiveness window for offline players
    pub disconnect_grace: Duration,
    /// Connection-level liveness timeout
    pub heartbeat_timeout: Duration,
    pub heartbeat_sweep_interval: Duration,
    /// Paddle control messages per second per player
    pub input_rate_limit: u32,
    /// Inbound frames of any kind per second per connection
    pub message_rate_limit: u32,
    pub max_input_skew_ms: u64,
    pub room_cleanup_delay: Duration,
    pub result_queue_capacity: usize,
}

impl Default for GameConfig {
    fn default() -> Self {
        Self {
            target_fps: 60,
            max_score: DEFAULT_MAX_SCORE,
            disconnect_grace: Duration::from_secs(30),
            heartbeat_timeout: Duration::from_secs(60),
            heartbeat_sweep_interval: Duration::from_secs(10),
            input_rate_limit: INPUT_RATE_LIMIT,
            message_rate_limit: MESSAGE_RATE_LIMIT,
            max_input_skew_ms: 30_000,
            room_cleanup_delay: Duration::from_millis(150),
            result_queue_capacity: 256,
        }
    }
}

impl GameConfig {
    pub fn tick_interval(&self) -> Duration {
        tick_interval(self.target_fps)
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(|key| env::var(key).ok())
    }

    fn from_vars(var: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        // Hosting platforms provide PORT, fall back to SERVER_ADDR or default
        let server_addr = match var("PORT") {
            Some(port) => format!("0.0.0.0:{}", port),
            None => var("SERVER_ADDR").unwrap_or_else(|| "0.0.0.0:8080".to_string()),
        };

        let defaults = GameConfig::default();
        let game = GameConfig {
            target_fps: parse_or(&var, "TARGET_FPS", defaults.target_fps)?,
            max_score: parse_or(&var, "MAX_SCORE", defaults.max_score)?,
            disconnect_grace: secs_or(&var, "DISCONNECT_GRACE_SECS", defaults.disconnect_grace)?,
            heartbeat_timeout: secs_or(&var, "HEARTBEAT_TIMEOUT_SECS", defaults.heartbeat_timeout)?,
            heartbeat_sweep_interval: secs_or(
                &var,
                "HEARTBEAT_SWEEP_SECS",
                defaults.heartbeat_sweep_interval,
            )?,
            input_rate_limit: parse_or(&var, "INPUT_RATE_LIMIT", defaults.input_rate_limit)?,
            message_rate_limit: parse_or(&var, "MESSAGE_RATE_LIMIT", defaults.message_rate_limit)?,
            max_input_skew_ms: parse_or(&var, "MAX_INPUT_SKEW_MS", defaults.max_input_skew_ms)?,
            room_cleanup_delay: Duration::from_millis(parse_or(
                &var,
                "ROOM_CLEANUP_DELAY_MS",
                defaults.room_cleanup_delay.as_millis() as u64,
            )?),
            result_queue_capacity: parse_or(
                &var,
                "RESULT_QUEUE_CAPACITY",
                defaults.result_queue_capacity,
            )?,
        };

        if game.target_fps == 0 {
            return Err(ConfigError::Invalid("TARGET_FPS"));
        }
        if game.max_score == 0 {
            return Err(ConfigError::Invalid("MAX_SCORE"));
        }

        let result_store_url = var("RESULT_STORE_URL").filter(|v| !v.is_empty());
        let result_store_key = var("RESULT_STORE_KEY").filter(|v| !v.is_empty());
        if result_store_url.is_some() && result_store_key.is_none() {
            return Err(ConfigError::Missing("RESULT_STORE_KEY"));
        }

        Ok(Self {
            server_addr: server_addr
                .parse()
                .map_err(|_| ConfigError::InvalidAddress)?,

            log_level: var("LOG_LEVEL").unwrap_or_else(|| "info".to_string()),

            client_origins: var("CLIENT_ORIGIN")
                .unwrap_or_else(|| "http://localhost:8443".to_string())
                .split(',')
                .map(|origin| origin.trim().to_string())
                .filter(|origin| !origin.is_empty())
                .collect(),

            jwt_secret: var("JWT_SECRET").filter(|v| !v.is_empty()),

            result_store_url,
            result_store_key,

            game,
        })
    }
}

fn parse_or<T: FromStr>(
    var: &impl Fn(&str) -> Option<String>,
    key: &'static str,
    default: T,
) -> Result<T, ConfigError> {
    match var(key) {
        Some(raw) => raw.trim().parse().map_err(|_| ConfigError::Invalid(key)),
        None => Ok(default),
    }
}

fn secs_or(
    var: &impl Fn(&str) -> Option<String>,
    key: &'static str,
    default: Duration,
) -> Result<Duration, ConfigError> {
    parse_or(var, key, default.as_secs()).map(Duration::from_secs)
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    Missing(&'static str),

    #[error("Invalid value for environment variable: {0}")]
    Invalid(&'static str),

    #[error("Invalid server address format")]
    InvalidAddress,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(pairs: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_vars(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_apply_when_unset() {
        let config = load(&[]).unwrap();
        assert_eq!(config.server_addr, "0.0.0.0:8080".parse().unwrap());
        assert_eq!(config.client_origins, vec!["http://localhost:8443"]);
        assert_eq!(config.game.max_score, 5);
        assert_eq!(config.game.disconnect_grace, Duration::from_secs(30));
        assert_eq!(config.game.room_cleanup_delay, Duration::from_millis(150));
        assert!(config.jwt_secret.is_none());
        assert!(config.result_store_url.is_none());
    }

    #[test]
    fn port_wins_over_server_addr() {
        let config = load(&[("PORT", "9000"), ("SERVER_ADDR", "127.0.0.1:1")]).unwrap();
        assert_eq!(config.server_addr.port(), 9000);
    }

    #[test]
    fn overrides_are_parsed() {
        let config = load(&[
            ("TARGET_FPS", "30"),
            ("MAX_SCORE", "11"),
            ("CLIENT_ORIGIN", "https://a.example, https://b.example"),
        ])
        .unwrap();
        assert_eq!(config.game.max_score, 11);
        assert_eq!(config.game.tick_interval(), Duration::from_micros(33_333));
        assert_eq!(config.client_origins.len(), 2);
    }

    #[test]
    fn bad_values_fail_fast() {
        assert!(matches!(
            load(&[("MAX_SCORE", "lots")]),
            Err(ConfigError::Invalid("MAX_SCORE"))
        ));
        assert!(matches!(
            load(&[("TARGET_FPS", "0")]),
            Err(ConfigError::Invalid("TARGET_FPS"))
        ));
        assert!(matches!(
            load(&[("SERVER_ADDR", "nowhere")]),
            Err(ConfigError::InvalidAddress)
        ));
        assert!(matches!(
            load(&[("RESULT_STORE_URL", "https://db.example")]),
            Err(ConfigError::Missing("RESULT_STORE_KEY"))
        ));
    }
}
