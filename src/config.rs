//! Process-wide configuration, loaded once at startup.
//!
//! Mirrors the teacher's `AuthConfig::from_env()` pattern: sensible
//! defaults, overridable by `CONNECT4_*` environment variables, with a
//! single fallible entry point so `main` can fail fast on a malformed
//! override rather than limp along with a silently-ignored one.

use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("environment variable {name} has invalid value {value:?}: {reason}")]
    InvalidValue { name: &'static str, value: String, reason: String },
}

/// All tunables named in `spec.md` §5's timeout/resource table, gathered in
/// one place rather than scattered as magic numbers through the core.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind_addr: String,
    pub max_connections: usize,

    /// How often the matchmaking pairing tick fires.
    pub matchmaking_tick_interval: Duration,
    /// A queued player is escalated to a bot session after waiting this long.
    pub bot_escalation_deadline: Duration,

    /// Window during which a disconnected player may reconnect without
    /// forfeiting.
    pub disconnect_grace: Duration,
    /// How often the session sweeper runs.
    pub sweep_interval: Duration,
    /// How long a `Completed`/`Abandoned` session stays in memory after
    /// ending, before the sweeper evicts it (persistence is unaffected).
    pub session_retention: Duration,

    /// Per-call deadline for repository operations.
    pub repository_timeout: Duration,
    /// Read idle timeout on a hub connection; a ping resets it.
    pub read_idle_timeout: Duration,
    /// Per-write deadline on a hub connection.
    pub write_timeout: Duration,
    /// Capacity of a connection's outbound writer queue.
    pub outbound_queue_capacity: usize,

    /// Soft cap on the in-memory analytics queue before oldest events drop.
    pub analytics_queue_soft_cap: usize,
    pub breaker_failure_threshold: u32,
    pub breaker_success_threshold: u32,
    pub breaker_cooldown: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:8080".to_string(),
            max_connections: 10_000,

            matchmaking_tick_interval: Duration::from_millis(75),
            bot_escalation_deadline: Duration::from_secs(10),

            disconnect_grace: Duration::from_secs(30),
            sweep_interval: Duration::from_secs(5),
            session_retention: Duration::from_secs(5 * 60),

            repository_timeout: Duration::from_secs(5),
            read_idle_timeout: Duration::from_secs(60),
            write_timeout: Duration::from_secs(10),
            outbound_queue_capacity: 64,

            analytics_queue_soft_cap: 10_000,
            breaker_failure_threshold: 3,
            breaker_success_threshold: 2,
            breaker_cooldown: Duration::from_millis(250),
        }
    }
}

impl ServerConfig {
    /// Starts from [`Default`] and overlays any `CONNECT4_*` environment
    /// variables that are present. Unset variables keep their default;
    /// present-but-malformed variables fail the whole load.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(v) = env_var("CONNECT4_BIND_ADDR") {
            config.bind_addr = v;
        }
        config.max_connections = env_parse("CONNECT4_MAX_CONNECTIONS", config.max_connections)?;
        config.matchmaking_tick_interval =
            env_parse_millis("CONNECT4_MATCHMAKING_TICK_MS", config.matchmaking_tick_interval)?;
        config.bot_escalation_deadline =
            env_parse_secs("CONNECT4_BOT_ESCALATION_SECS", config.bot_escalation_deadline)?;
        config.disconnect_grace = env_parse_secs("CONNECT4_DISCONNECT_GRACE_SECS", config.disconnect_grace)?;
        config.sweep_interval = env_parse_secs("CONNECT4_SWEEP_INTERVAL_SECS", config.sweep_interval)?;
        config.session_retention = env_parse_secs("CONNECT4_SESSION_RETENTION_SECS", config.session_retention)?;
        config.repository_timeout = env_parse_secs("CONNECT4_REPOSITORY_TIMEOUT_SECS", config.repository_timeout)?;
        config.read_idle_timeout = env_parse_secs("CONNECT4_READ_IDLE_TIMEOUT_SECS", config.read_idle_timeout)?;
        config.write_timeout = env_parse_secs("CONNECT4_WRITE_TIMEOUT_SECS", config.write_timeout)?;
        config.outbound_queue_capacity =
            env_parse("CONNECT4_OUTBOUND_QUEUE_CAPACITY", config.outbound_queue_capacity)?;
        config.analytics_queue_soft_cap =
            env_parse("CONNECT4_ANALYTICS_QUEUE_SOFT_CAP", config.analytics_queue_soft_cap)?;
        config.breaker_failure_threshold =
            env_parse("CONNECT4_BREAKER_FAILURE_THRESHOLD", config.breaker_failure_threshold)?;
        config.breaker_success_threshold =
            env_parse("CONNECT4_BREAKER_SUCCESS_THRESHOLD", config.breaker_success_threshold)?;
        config.breaker_cooldown = env_parse_millis("CONNECT4_BREAKER_COOLDOWN_MS", config.breaker_cooldown)?;

        Ok(config)
    }
}

fn env_var(name: &'static str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn env_parse<T>(name: &'static str, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match env_var(name) {
        None => Ok(default),
        Some(value) => value.parse::<T>().map_err(|e| ConfigError::InvalidValue {
            name,
            value,
            reason: e.to_string(),
        }),
    }
}

fn env_parse_secs(name: &'static str, default: Duration) -> Result<Duration, ConfigError> {
    match env_var(name) {
        None => Ok(default),
        Some(value) => {
            let secs: u64 = value.parse().map_err(|e: std::num::ParseIntError| ConfigError::InvalidValue {
                name,
                value: value.clone(),
                reason: e.to_string(),
            })?;
            Ok(Duration::from_secs(secs))
        }
    }
}

fn env_parse_millis(name: &'static str, default: Duration) -> Result<Duration, ConfigError> {
    match env_var(name) {
        None => Ok(default),
        Some(value) => {
            let millis: u64 = value.parse().map_err(|e: std::num::ParseIntError| ConfigError::InvalidValue {
                name,
                value: value.clone(),
                reason: e.to_string(),
            })?;
            Ok(Duration::from_millis(millis))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_matches_spec_timeouts() {
        let config = ServerConfig::default();
        assert_eq!(config.disconnect_grace, Duration::from_secs(30));
        assert_eq!(config.repository_timeout, Duration::from_secs(5));
        assert_eq!(config.write_timeout, Duration::from_secs(10));
        assert_eq!(config.read_idle_timeout, Duration::from_secs(60));
        assert_eq!(config.bot_escalation_deadline, Duration::from_secs(10));
        assert_eq!(config.session_retention, Duration::from_secs(300));
    }

    #[test]
    fn from_env_rejects_malformed_override() {
        std::env::set_var("CONNECT4_MAX_CONNECTIONS", "not-a-number");
        let result = ServerConfig::from_env();
        std::env::remove_var("CONNECT4_MAX_CONNECTIONS");
        assert!(result.is_err());
    }
}
