//! Daemon configuration.
//!
//! Loaded from TOML at `$ORDERWATCH_CONFIG` or
//! `<config_dir>/orderwatch/config.toml`. A missing file means defaults;
//! unknown keys are rejected so typos do not silently fall back.

use std::env;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::Timelike;
use orderwatch_core::NotifyPolicy;
use orderwatch_protocol::DEFAULT_ENDPOINT_PATTERN;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::cycle::{CycleSettings, DEFAULT_OPEN_URL};

/// Environment variable naming the config file.
pub const CONFIG_ENV: &str = "ORDERWATCH_CONFIG";

/// Environment variable overriding the state directory.
pub const STATE_DIR_ENV: &str = "ORDERWATCH_STATE_DIR";

const APP_DIR: &str = "orderwatch";
const CONFIG_FILE_NAME: &str = "config.toml";

/// Errors raised while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config {path}: {message}")]
    Parse { path: PathBuf, message: String },

    #[error("invalid config value: {0}")]
    Invalid(String),
}

// ============================================================================
// Replay Interval
// ============================================================================

/// Minutes between scheduled replays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub struct ReplayInterval(u32);

impl ReplayInterval {
    /// Accepted values, in minutes.
    pub const ALLOWED: [u32; 7] = [1, 5, 10, 30, 60, 120, 180];

    pub fn minutes(&self) -> u32 {
        self.0
    }

    /// Returns true if a replay is due at the given wall-clock minute.
    ///
    /// Sub-hour intervals fire when the minute is a multiple of the
    /// interval; hour-based ones fire on the hour when the hour is a
    /// multiple of the interval in hours.
    pub fn is_due_at(&self, hour: u32, minute: u32) -> bool {
        if self.0 < 60 {
            minute % self.0 == 0
        } else {
            minute == 0 && hour % (self.0 / 60) == 0
        }
    }

    pub fn is_due<T: Timelike>(&self, now: &T) -> bool {
        self.is_due_at(now.hour(), now.minute())
    }
}

impl Default for ReplayInterval {
    fn default() -> Self {
        Self(30)
    }
}

impl TryFrom<u32> for ReplayInterval {
    type Error = ConfigError;

    fn try_from(minutes: u32) -> Result<Self, Self::Error> {
        if Self::ALLOWED.contains(&minutes) {
            Ok(Self(minutes))
        } else {
            Err(ConfigError::Invalid(format!(
                "replay_interval must be one of {:?}, got {minutes}",
                Self::ALLOWED
            )))
        }
    }
}

impl From<ReplayInterval> for u32 {
    fn from(interval: ReplayInterval) -> Self {
        interval.0
    }
}

impl fmt::Display for ReplayInterval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}m", self.0)
    }
}

// ============================================================================
// Config
// ============================================================================

/// User-facing configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub enable_notification: bool,
    /// Sound name; empty for silent notifications.
    pub notification_sound: String,
    pub monitor_all_status: bool,
    pub only_notify_on_change: bool,
    pub replay_interval: ReplayInterval,
    pub cooldown_secs: u64,
    pub request_timeout_secs: u64,
    pub endpoint_pattern: String,
    /// Deep link attached to notifications; empty for none.
    pub open_url: String,
    pub require_status: bool,
    pub state_dir: Option<PathBuf>,
    /// Append notifications to this JSON lines file instead of the log.
    pub notification_file: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            enable_notification: true,
            notification_sound: "default".to_string(),
            monitor_all_status: true,
            only_notify_on_change: true,
            replay_interval: ReplayInterval::default(),
            cooldown_secs: 30,
            request_timeout_secs: 15,
            endpoint_pattern: DEFAULT_ENDPOINT_PATTERN.to_string(),
            open_url: DEFAULT_OPEN_URL.to_string(),
            require_status: false,
            state_dir: None,
            notification_file: None,
        }
    }
}

impl Config {
    /// Loads from `$ORDERWATCH_CONFIG` or the default location.
    pub fn load() -> Result<Self, ConfigError> {
        match env::var_os(CONFIG_ENV) {
            Some(path) => Self::load_from(Path::new(&path)),
            None => match default_config_path() {
                Some(path) if path.exists() => Self::load_from(&path),
                _ => Ok(Self::default()),
            },
        }
    }

    /// Loads from an explicit file, which must exist.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&content).map_err(|e| match e {
            ConfigError::Parse { message, .. } => ConfigError::Parse {
                path: path.to_path_buf(),
                message,
            },
            other => other,
        })
    }

    /// Parses TOML text and validates it.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content).map_err(|e| ConfigError::Parse {
            path: PathBuf::new(),
            message: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.request_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "request_timeout_secs must be positive".to_string(),
            ));
        }
        if self.endpoint_pattern.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "endpoint_pattern must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn policy(&self) -> NotifyPolicy {
        NotifyPolicy::new(
            self.only_notify_on_change,
            Duration::from_secs(self.cooldown_secs),
        )
    }

    pub fn cycle_settings(&self) -> CycleSettings {
        CycleSettings {
            enable_notification: self.enable_notification,
            monitor_all_status: self.monitor_all_status,
            require_status: self.require_status,
            policy: self.policy(),
            endpoint_pattern: self.endpoint_pattern.clone(),
            open_url: non_empty(&self.open_url),
            sound: non_empty(&self.notification_sound),
        }
    }

    /// State directory: `$ORDERWATCH_STATE_DIR`, then the config value,
    /// then the platform state directory.
    pub fn state_dir(&self) -> PathBuf {
        self.resolve_state_dir(env::var_os(STATE_DIR_ENV).map(PathBuf::from))
    }

    fn resolve_state_dir(&self, env_override: Option<PathBuf>) -> PathBuf {
        env_override
            .or_else(|| self.state_dir.clone())
            .unwrap_or_else(default_state_dir)
    }
}

/// `<config_dir>/orderwatch/config.toml`, if the platform has one.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join(APP_DIR).join(CONFIG_FILE_NAME))
}

fn default_state_dir() -> PathBuf {
    dirs::state_dir()
        .or_else(dirs::data_local_dir)
        .unwrap_or_else(|| PathBuf::from("/tmp"))
        .join(APP_DIR)
}

fn non_empty(value: &str) -> Option<String> {
    let value = value.trim();
    (!value.is_empty()).then(|| value.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::from_toml("").unwrap();
        assert_eq!(config, Config::default());
        assert!(config.enable_notification);
        assert!(config.only_notify_on_change);
        assert_eq!(config.replay_interval.minutes(), 30);
        assert_eq!(config.request_timeout(), Duration::from_secs(15));
        assert_eq!(config.policy(), NotifyPolicy::default());
    }

    #[test]
    fn test_partial_override() {
        let config = Config::from_toml(
            r#"
            monitor_all_status = false
            replay_interval = 120
            notification_sound = ""
            "#,
        )
        .unwrap();
        assert!(!config.monitor_all_status);
        assert_eq!(config.replay_interval.minutes(), 120);

        let settings = config.cycle_settings();
        assert!(!settings.monitor_all_status);
        assert_eq!(settings.sound, None);
        assert_eq!(settings.open_url.as_deref(), Some(DEFAULT_OPEN_URL));
    }

    #[test]
    fn test_unknown_key_rejected() {
        let err = Config::from_toml("cooldown = 5").unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
        assert!(err.to_string().contains("cooldown"));
    }

    #[test]
    fn test_invalid_interval_rejected() {
        let err = Config::from_toml("replay_interval = 7").unwrap_err();
        assert!(err.to_string().contains("replay_interval"));
    }

    #[test]
    fn test_zero_timeout_rejected() {
        assert!(matches!(
            Config::from_toml("request_timeout_secs = 0"),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "cooldown_secs = 60\n").unwrap();
        let config = Config::load_from(&path).unwrap();
        assert_eq!(config.cooldown_secs, 60);

        let missing = Config::load_from(&dir.path().join("nope.toml"));
        assert!(matches!(missing, Err(ConfigError::Io { .. })));

        fs::write(&path, "cooldown_secs = \"soon\"\n").unwrap();
        match Config::load_from(&path) {
            Err(ConfigError::Parse { path: p, .. }) => assert_eq!(p, path),
            other => panic!("expected parse error, got {other:?}"),
        }
    }

    #[test]
    fn test_state_dir_precedence() {
        let config = Config {
            state_dir: Some(PathBuf::from("/var/lib/orderwatch")),
            ..Config::default()
        };
        assert_eq!(
            config.resolve_state_dir(Some(PathBuf::from("/override"))),
            PathBuf::from("/override")
        );
        assert_eq!(
            config.resolve_state_dir(None),
            PathBuf::from("/var/lib/orderwatch")
        );
        assert!(Config::default()
            .resolve_state_dir(None)
            .ends_with(APP_DIR));
    }

    #[test]
    fn test_interval_due_minutes() {
        let every_five = ReplayInterval::try_from(5).unwrap();
        assert!(every_five.is_due_at(13, 0));
        assert!(every_five.is_due_at(13, 25));
        assert!(!every_five.is_due_at(13, 26));

        let every_minute = ReplayInterval::try_from(1).unwrap();
        assert!((0..60).all(|m| every_minute.is_due_at(7, m)));

        let two_hours = ReplayInterval::try_from(120).unwrap();
        assert!(two_hours.is_due_at(14, 0));
        assert!(!two_hours.is_due_at(15, 0));
        assert!(!two_hours.is_due_at(14, 30));

        let hourly = ReplayInterval::try_from(60).unwrap();
        assert!(hourly.is_due_at(15, 0));
        assert!(!hourly.is_due_at(15, 1));

        let three_hours = ReplayInterval::try_from(180).unwrap();
        assert!(three_hours.is_due_at(0, 0));
        assert!(three_hours.is_due_at(21, 0));
        assert!(!three_hours.is_due_at(22, 0));
    }

    #[test]
    fn test_interval_rejects_unlisted() {
        assert!(ReplayInterval::try_from(0).is_err());
        assert!(ReplayInterval::try_from(15).is_err());
        assert_eq!(ReplayInterval::default().to_string(), "30m");
    }
}
