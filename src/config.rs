//! Event service configuration loaded from environment variables.
//!
//! Follows 12-factor style: all settings come from environment variables
//! (or a `.env` file via `dotenvy`). Unlike a lazily initialized global,
//! the resulting [`EventServiceConfig`] is constructed once and passed down
//! to the registry, the connectors and the HTTP layer.

use std::fmt;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::error::EventServiceError;

/// Default coalescing window in milliseconds.
pub const DEFAULT_MIN_WAITING_TIME_MS: u64 = 0;
/// Default keep-alive window in milliseconds.
pub const DEFAULT_MAX_WAITING_TIME_MS: u64 = 20_000;
/// Default inactivity timeout in milliseconds.
pub const DEFAULT_TIMEOUT_TIME_MS: u64 = 90_000;
/// Default bound on consecutive immediate listen retries on the client.
pub const DEFAULT_MAX_LISTEN_RETRIES: u32 = 3;

/// How listen results are flushed to a waiting client.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStrategy {
    /// One discrete request per batch; the client re-requests after every
    /// response, including empty keep-alive responses.
    #[default]
    Polling,
    /// One long-lived response per connection window; every batch is written
    /// as a self-delimited chunk without closing the connection.
    Streaming,
}

impl ConnectionStrategy {
    /// Returns the configuration name of the strategy.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Polling => "polling",
            Self::Streaming => "streaming",
        }
    }
}

impl FromStr for ConnectionStrategy {
    type Err = EventServiceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "polling" | "long_polling" | "long-polling" => Ok(Self::Polling),
            "streaming" => Ok(Self::Streaming),
            other => Err(EventServiceError::Configuration(format!(
                "unknown connection strategy: {other}"
            ))),
        }
    }
}

impl fmt::Display for ConnectionStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How connection ids are assigned to clients.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionIdStrategy {
    /// A fresh UUID v4 is handed out on init and echoed back by the client.
    #[default]
    Uuid,
    /// The host's session id (sent by the client) doubles as connection id.
    Session,
}

impl FromStr for ConnectionIdStrategy {
    type Err = EventServiceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "uuid" | "unique" => Ok(Self::Uuid),
            "session" | "session_based" => Ok(Self::Session),
            other => Err(EventServiceError::Configuration(format!(
                "unknown connection id generator: {other}"
            ))),
        }
    }
}

/// Timing and strategy configuration of the event service.
///
/// Loaded once at startup via [`EventServiceConfig::from_env`], or built
/// directly with [`EventServiceConfig::new`] for embedding and tests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventServiceConfig {
    /// A listen call never returns events before this has elapsed.
    pub min_waiting_time: Duration,
    /// A listen call returns (possibly empty) once this has elapsed.
    pub max_waiting_time: Duration,
    /// Users idle for longer than this are evicted.
    pub timeout_time: Duration,
    /// Strategy advertised to clients on init.
    pub connection_strategy: ConnectionStrategy,
    /// Strategy for assigning connection ids.
    pub connection_id_strategy: ConnectionIdStrategy,
    /// How often the activity scheduler scans for idle users.
    pub scheduler_poll_interval: Duration,
    /// Evict idle users automatically instead of only marking them.
    pub auto_clean: bool,
    /// Consecutive immediate listen retries a client performs.
    pub max_listen_retries: u32,
}

impl EventServiceConfig {
    /// Creates a configuration from the three timing values, using defaults
    /// for everything else.
    ///
    /// # Errors
    ///
    /// Returns [`EventServiceError::Configuration`] if the values are
    /// inconsistent (see [`EventServiceConfig::validate`]).
    pub fn new(
        min_waiting_time: Duration,
        max_waiting_time: Duration,
        timeout_time: Duration,
    ) -> Result<Self, EventServiceError> {
        let config = Self {
            min_waiting_time,
            max_waiting_time,
            timeout_time,
            scheduler_poll_interval: default_poll_interval(timeout_time),
            ..Self::default()
        };
        config.validate()?;
        Ok(config)
    }

    /// Loads configuration from environment variables.
    ///
    /// Falls back to defaults when a variable is not set. Calls
    /// `dotenvy::dotenv().ok()` to optionally load a `.env` file.
    ///
    /// # Errors
    ///
    /// Returns [`EventServiceError::Configuration`] if a variable is set but
    /// cannot be parsed, or if the resulting values are inconsistent.
    pub fn from_env() -> Result<Self, EventServiceError> {
        dotenvy::dotenv().ok();

        let min_waiting_time =
            parse_env_millis("EVENTSERVICE_MIN_WAITING_TIME", DEFAULT_MIN_WAITING_TIME_MS)?;
        let max_waiting_time =
            parse_env_millis("EVENTSERVICE_MAX_WAITING_TIME", DEFAULT_MAX_WAITING_TIME_MS)?;
        let timeout_time = parse_env_millis("EVENTSERVICE_TIMEOUT_TIME", DEFAULT_TIMEOUT_TIME_MS)?;

        let poll_default = default_poll_interval(timeout_time);
        let scheduler_poll_interval = parse_env_millis(
            "EVENTSERVICE_SCHEDULER_POLL_INTERVAL",
            u64::try_from(poll_default.as_millis()).unwrap_or(u64::MAX),
        )?;

        let config = Self {
            min_waiting_time,
            max_waiting_time,
            timeout_time,
            connection_strategy: parse_env("EVENTSERVICE_CONNECTION_STRATEGY")?
                .unwrap_or_default(),
            connection_id_strategy: parse_env("EVENTSERVICE_CONNECTION_ID_GENERATOR")?
                .unwrap_or_default(),
            scheduler_poll_interval,
            auto_clean: parse_env_bool("EVENTSERVICE_AUTO_CLEAN", true)?,
            max_listen_retries: parse_env("EVENTSERVICE_MAX_LISTEN_RETRIES")?
                .unwrap_or(DEFAULT_MAX_LISTEN_RETRIES),
        };
        config.validate()?;
        Ok(config)
    }

    /// Checks the timing values for consistency.
    ///
    /// # Errors
    ///
    /// Returns [`EventServiceError::Configuration`] if `min_waiting_time`
    /// exceeds `max_waiting_time`, if `timeout_time` is zero, or if the
    /// scheduler poll interval is zero or not smaller than the timeout.
    pub fn validate(&self) -> Result<(), EventServiceError> {
        if self.min_waiting_time > self.max_waiting_time {
            return Err(EventServiceError::Configuration(format!(
                "min waiting time ({}ms) exceeds max waiting time ({}ms)",
                self.min_waiting_time.as_millis(),
                self.max_waiting_time.as_millis()
            )));
        }
        if self.timeout_time.is_zero() {
            return Err(EventServiceError::Configuration(
                "timeout time must be positive".to_string(),
            ));
        }
        if self.scheduler_poll_interval.is_zero()
            || self.scheduler_poll_interval >= self.timeout_time
        {
            return Err(EventServiceError::Configuration(format!(
                "scheduler poll interval ({}ms) must be positive and below the timeout ({}ms)",
                self.scheduler_poll_interval.as_millis(),
                self.timeout_time.as_millis()
            )));
        }
        Ok(())
    }
}

impl Default for EventServiceConfig {
    fn default() -> Self {
        let timeout_time = Duration::from_millis(DEFAULT_TIMEOUT_TIME_MS);
        Self {
            min_waiting_time: Duration::from_millis(DEFAULT_MIN_WAITING_TIME_MS),
            max_waiting_time: Duration::from_millis(DEFAULT_MAX_WAITING_TIME_MS),
            timeout_time,
            connection_strategy: ConnectionStrategy::default(),
            connection_id_strategy: ConnectionIdStrategy::default(),
            scheduler_poll_interval: default_poll_interval(timeout_time),
            auto_clean: true,
            max_listen_retries: DEFAULT_MAX_LISTEN_RETRIES,
        }
    }
}

impl fmt::Display for EventServiceConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "EventServiceConfiguration. Min.: {}ms; Max.: {}ms; Timeout: {}ms",
            self.min_waiting_time.as_millis(),
            self.max_waiting_time.as_millis(),
            self.timeout_time.as_millis()
        )
    }
}

/// Host process settings that are not part of the event service contract.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Socket address to bind the HTTP server to (e.g. `0.0.0.0:3000`).
    pub listen_addr: SocketAddr,
    /// Event service configuration.
    pub event_service: EventServiceConfig,
}

impl ServerConfig {
    /// Loads the host settings and the event service configuration.
    ///
    /// # Errors
    ///
    /// Returns [`EventServiceError::Configuration`] if `LISTEN_ADDR` cannot
    /// be parsed or the event service configuration is invalid.
    pub fn from_env() -> Result<Self, EventServiceError> {
        let event_service = EventServiceConfig::from_env()?;
        let listen_addr = std::env::var("LISTEN_ADDR")
            .unwrap_or_else(|_| "0.0.0.0:3000".to_string())
            .parse()
            .map_err(|e| EventServiceError::Configuration(format!("LISTEN_ADDR: {e}")))?;
        Ok(Self {
            listen_addr,
            event_service,
        })
    }
}

/// A third of the timeout, capped at one minute and floored at 1ms.
fn default_poll_interval(timeout_time: Duration) -> Duration {
    (timeout_time / 3)
        .min(Duration::from_secs(60))
        .max(Duration::from_millis(1))
}

/// Parses an environment variable as `T`. A missing variable yields `None`;
/// a present but invalid one is a configuration error.
fn parse_env<T>(key: &str) -> Result<Option<T>, EventServiceError>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e| EventServiceError::Configuration(format!("{key}={raw}: {e}"))),
        Err(_) => Ok(None),
    }
}

/// Parses a millisecond value from the environment.
fn parse_env_millis(key: &str, default: u64) -> Result<Duration, EventServiceError> {
    Ok(Duration::from_millis(parse_env(key)?.unwrap_or(default)))
}

/// Parses a boolean environment variable. A missing variable yields
/// `default`; anything but `true`/`false`/`1`/`0` (any case) is a
/// configuration error.
fn parse_env_bool(key: &str, default: bool) -> Result<bool, EventServiceError> {
    match std::env::var(key) {
        Ok(raw) => parse_bool(key, &raw),
        Err(_) => Ok(default),
    }
}

fn parse_bool(key: &str, raw: &str) -> Result<bool, EventServiceError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "true" | "1" => Ok(true),
        "false" | "0" => Ok(false),
        _ => Err(EventServiceError::Configuration(format!(
            "{key}={raw}: expected a boolean"
        ))),
    }
}
