//! Environment-driven configuration for the observer.
//!
//! Every key is optional. A value that fails to parse is reported and the
//! default is used instead; a malformed environment never stops the process.

use std::time::Duration;
use thiserror::Error;
use tracing::warn;

/// Default upstream stream endpoint.
pub const DEFAULT_WS_URL: &str = "wss://ws.cs2run.app/connection/websocket";

/// Default credential endpoint.
pub const DEFAULT_TOKEN_URL: &str = "https://cs2run.app/current-state";

/// Default subscription channel.
pub const DEFAULT_CHANNEL: &str = "csgorun:crash";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid value for {key}: {value:?}")]
    InvalidValue { key: String, value: String },

    #[error("{key} must be greater than zero")]
    MustBePositive { key: String },
}

/// Reconnect backoff parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct BackoffConfig {
    pub initial: Duration,
    pub max: Duration,
    pub multiplier: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial: Duration::from_millis(2_000),
            max: Duration::from_secs(30),
            multiplier: 1.5,
        }
    }
}

impl BackoffConfig {
    /// Delay before the next attempt after `failures` consecutive failures.
    ///
    /// Zero failures yields `initial`; each failure multiplies by
    /// `multiplier`, never exceeding `max`.
    pub fn delay_for(&self, failures: u32) -> Duration {
        let factor = self.multiplier.powi(failures.min(64) as i32);
        let millis = self.initial.as_millis() as f64 * factor;
        let capped = millis.min(self.max.as_millis() as f64);
        Duration::from_millis(capped as u64)
    }
}

/// Connection lifecycle timings.
#[derive(Debug, Clone)]
pub struct StreamConfig {
    pub ws_url: String,
    pub channel: String,
    pub open_timeout: Duration,
    pub heartbeat_interval: Duration,
    pub idle_timeout: Duration,
    pub subscribe_delay: Duration,
    pub token_retry: Duration,
    pub backoff: BackoffConfig,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            ws_url: DEFAULT_WS_URL.to_string(),
            channel: DEFAULT_CHANNEL.to_string(),
            open_timeout: Duration::from_secs(10),
            heartbeat_interval: Duration::from_secs(10),
            idle_timeout: Duration::from_secs(60),
            subscribe_delay: Duration::from_millis(200),
            token_retry: Duration::from_secs(3),
            backoff: BackoffConfig::default(),
        }
    }
}

/// Full process configuration.
#[derive(Debug, Clone)]
pub struct ObserverConfig {
    pub stream: StreamConfig,
    pub token_url: String,
    pub host: String,
    pub port: u16,
    pub log_retention: usize,
    pub history_capacity: usize,
    pub self_ping_url: Option<String>,
    pub self_ping_interval: Duration,
    pub json_logs: bool,
}

impl Default for ObserverConfig {
    fn default() -> Self {
        Self {
            stream: StreamConfig::default(),
            token_url: DEFAULT_TOKEN_URL.to_string(),
            host: "0.0.0.0".to_string(),
            port: 10_000,
            log_retention: 2_000,
            history_capacity: 50,
            self_ping_url: None,
            self_ping_interval: Duration::from_secs(240),
            json_logs: false,
        }
    }
}

impl ObserverConfig {
    /// Builds the configuration from process environment variables.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let stream_defaults = StreamConfig::default();
        let backoff_defaults = BackoffConfig::default();

        let text = |key: &str, fallback: &str| -> String {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
                .unwrap_or_else(|| fallback.to_string())
        };
        let millis = |key: &str, fallback: Duration| -> Duration {
            read_positive::<u64>(&lookup, key)
                .map(Duration::from_millis)
                .unwrap_or(fallback)
        };

        let backoff_initial = millis("BACKOFF_INITIAL_MS", backoff_defaults.initial);
        let mut backoff_max = millis("BACKOFF_MAX_MS", backoff_defaults.max);
        if backoff_max < backoff_initial {
            warn!("BACKOFF_MAX_MS is below BACKOFF_INITIAL_MS, using the initial delay as the cap");
            backoff_max = backoff_initial;
        }

        let stream = StreamConfig {
            ws_url: text("WS_URL", DEFAULT_WS_URL),
            channel: text("CHANNEL", DEFAULT_CHANNEL),
            open_timeout: millis("WS_OPEN_TIMEOUT_MS", stream_defaults.open_timeout),
            heartbeat_interval: millis("HEARTBEAT_INTERVAL_MS", stream_defaults.heartbeat_interval),
            idle_timeout: millis("IDLE_TIMEOUT_MS", stream_defaults.idle_timeout),
            subscribe_delay: millis("SUBSCRIBE_DELAY_MS", stream_defaults.subscribe_delay),
            token_retry: millis("TOKEN_RETRY_MS", stream_defaults.token_retry),
            backoff: BackoffConfig {
                initial: backoff_initial,
                max: backoff_max,
                multiplier: backoff_defaults.multiplier,
            },
        };

        Self {
            stream,
            token_url: text("TOKEN_URL", DEFAULT_TOKEN_URL),
            host: text("HOST", &defaults.host),
            port: read_positive::<u16>(&lookup, "PORT").unwrap_or(defaults.port),
            log_retention: read_positive::<usize>(&lookup, "LOG_RETENTION")
                .unwrap_or(defaults.log_retention),
            history_capacity: read_positive::<usize>(&lookup, "HISTORY_CAPACITY")
                .unwrap_or(defaults.history_capacity),
            self_ping_url: lookup("SELF_PING_URL")
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty()),
            self_ping_interval: millis("SELF_PING_INTERVAL_MS", defaults.self_ping_interval),
            json_logs: json_logs_requested(lookup("LOG_FORMAT").as_deref()),
        }
    }
}

/// True when `LOG_FORMAT` selects JSON output.
pub fn json_logs_requested(log_format: Option<&str>) -> bool {
    log_format
        .map(|v| v.trim().eq_ignore_ascii_case("json"))
        .unwrap_or(false)
}

/// Parses a strictly positive numeric value for `key`.
///
/// Returns `None` when the key is unset; logs and returns `None` when the
/// value is present but invalid.
fn read_positive<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T>
where
    T: std::str::FromStr + PartialEq + Default,
{
    let raw = lookup(key)?;
    match parse_positive::<T>(key, &raw) {
        Ok(value) => Some(value),
        Err(e) => {
            warn!("{}, using default", e);
            None
        }
    }
}

fn parse_positive<T>(key: &str, raw: &str) -> Result<T, ConfigError>
where
    T: std::str::FromStr + PartialEq + Default,
{
    let value = raw
        .trim()
        .parse::<T>()
        .map_err(|_| ConfigError::InvalidValue {
            key: key.to_string(),
            value: raw.to_string(),
        })?;
    if value == T::default() {
        return Err(ConfigError::MustBePositive {
            key: key.to_string(),
        });
    }
    Ok(value)
}
