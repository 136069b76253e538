//! Configuration layer: typed settings with layered precedence (file → env).

use std::num::NonZeroU32;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "telaio";
const DEFAULT_DB_MAX_CONNECTIONS: u32 = 8;
const DEFAULT_TRIGGER_DELAY_MS: u64 = 400;
const DEFAULT_QUEUE_INTERVAL_MS: u64 = 200;
const DEFAULT_POLL_INTERVAL_MS: u64 = 400;
const DEFAULT_USER_PROFILE_TTL_SECS: u64 = 900;

/// Fully-resolved settings after precedence resolution and validation.
#[derive(Debug, Clone)]
pub struct Settings {
    pub database: DatabaseSettings,
    pub tracker: TrackerSettings,
    pub cache: CacheSettings,
    pub logging: LoggingSettings,
}

#[derive(Debug, Clone)]
pub struct DatabaseSettings {
    /// Absent when the host runs on the in-memory backend.
    pub url: Option<String>,
    pub max_connections: NonZeroU32,
}

/// Change tracker timing knobs. The defaults mirror the engine's historical
/// cadence: a 400 ms coalescing delay after a push notification, a 200 ms
/// dispatch tick, and a 400 ms poll when push is unavailable.
#[derive(Debug, Clone)]
pub struct TrackerSettings {
    pub use_push_notifications: bool,
    pub trigger_delay: Duration,
    pub queue_interval: Duration,
    pub poll_interval: Duration,
}

impl Default for TrackerSettings {
    fn default() -> Self {
        Self {
            use_push_notifications: true,
            trigger_delay: Duration::from_millis(DEFAULT_TRIGGER_DELAY_MS),
            queue_interval: Duration::from_millis(DEFAULT_QUEUE_INTERVAL_MS),
            poll_interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CacheSettings {
    /// Time-to-live for per-user profile handlers.
    pub user_profile_ttl: Duration,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            user_profile_ttl: Duration::from_secs(DEFAULT_USER_PROFILE_TTL_SECS),
        }
    }
}

#[derive(Debug, Clone)]
pub struct LoggingSettings {
    pub level: LevelFilter,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy)]
pub enum LogFormat {
    Json,
    Compact,
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to build configuration: {0}")]
    Build(#[from] config::ConfigError),
    #[error("invalid configuration for `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },
}

impl LoadError {
    fn invalid(key: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key,
            reason: reason.into(),
        }
    }
}

/// Load settings using the configured precedence (file → environment).
pub fn load() -> Result<Settings, LoadError> {
    let raw: RawSettings = Config::builder()
        .add_source(File::with_name(DEFAULT_CONFIG_BASENAME).required(false))
        .add_source(File::with_name(LOCAL_CONFIG_BASENAME).required(false))
        .add_source(Environment::with_prefix("TELAIO").separator("__"))
        .build()?
        .try_deserialize()?;

    Settings::from_raw(raw)
}

/// Load settings from an explicit file, with environment overrides on top.
pub fn load_from(path: &Path) -> Result<Settings, LoadError> {
    let raw: RawSettings = Config::builder()
        .add_source(File::from(path).required(true))
        .add_source(Environment::with_prefix("TELAIO").separator("__"))
        .build()?
        .try_deserialize()?;

    Settings::from_raw(raw)
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    database: RawDatabaseSettings,
    tracker: RawTrackerSettings,
    cache: RawCacheSettings,
    logging: RawLoggingSettings,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawDatabaseSettings {
    url: Option<String>,
    max_connections: Option<u32>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawTrackerSettings {
    use_push_notifications: Option<bool>,
    trigger_delay_ms: Option<u64>,
    queue_interval_ms: Option<u64>,
    poll_interval_ms: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawCacheSettings {
    user_profile_ttl_seconds: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawLoggingSettings {
    level: Option<String>,
    json: Option<bool>,
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        Ok(Self {
            database: build_database_settings(raw.database)?,
            tracker: build_tracker_settings(raw.tracker)?,
            cache: build_cache_settings(raw.cache),
            logging: build_logging_settings(raw.logging)?,
        })
    }
}

fn build_database_settings(database: RawDatabaseSettings) -> Result<DatabaseSettings, LoadError> {
    let max_connections = database.max_connections.unwrap_or(DEFAULT_DB_MAX_CONNECTIONS);
    let max_connections = NonZeroU32::new(max_connections)
        .ok_or_else(|| LoadError::invalid("database.max_connections", "must be greater than 0"))?;

    Ok(DatabaseSettings {
        url: database.url,
        max_connections,
    })
}

fn build_tracker_settings(tracker: RawTrackerSettings) -> Result<TrackerSettings, LoadError> {
    let trigger_delay_ms = tracker.trigger_delay_ms.unwrap_or(DEFAULT_TRIGGER_DELAY_MS);
    let queue_interval_ms = tracker
        .queue_interval_ms
        .unwrap_or(DEFAULT_QUEUE_INTERVAL_MS);
    let poll_interval_ms = tracker.poll_interval_ms.unwrap_or(DEFAULT_POLL_INTERVAL_MS);

    if queue_interval_ms == 0 {
        return Err(LoadError::invalid(
            "tracker.queue_interval_ms",
            "must be greater than 0",
        ));
    }
    if poll_interval_ms == 0 {
        return Err(LoadError::invalid(
            "tracker.poll_interval_ms",
            "must be greater than 0",
        ));
    }

    Ok(TrackerSettings {
        use_push_notifications: tracker.use_push_notifications.unwrap_or(true),
        trigger_delay: Duration::from_millis(trigger_delay_ms),
        queue_interval: Duration::from_millis(queue_interval_ms),
        poll_interval: Duration::from_millis(poll_interval_ms),
    })
}

fn build_cache_settings(cache: RawCacheSettings) -> CacheSettings {
    CacheSettings {
        user_profile_ttl: Duration::from_secs(
            cache
                .user_profile_ttl_seconds
                .unwrap_or(DEFAULT_USER_PROFILE_TTL_SECS),
        ),
    }
}

fn build_logging_settings(logging: RawLoggingSettings) -> Result<LoggingSettings, LoadError> {
    let level = match logging.level.as_deref() {
        Some(raw_level) => LevelFilter::from_str(raw_level)
            .map_err(|err| LoadError::invalid("logging.level", err.to_string()))?,
        None => LevelFilter::INFO,
    };
    let format = if logging.json.unwrap_or(false) {
        LogFormat::Json
    } else {
        LogFormat::Compact
    };

    Ok(LoggingSettings { level, format })
}
