//! Persisted per-key state records and notification policy.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Default minimum time between two notifications for one key.
pub const DEFAULT_COOLDOWN: Duration = Duration::from_secs(30);

// ============================================================================
// Status State
// ============================================================================

/// Which trigger path produced an observation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusSource {
    /// Passively intercepted from the app's own request.
    Manual,
    /// Actively replayed by the scheduler.
    Scheduled,
}

impl StatusSource {
    /// Returns the label shown in notification bodies.
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Self::Manual => "App请求",
            Self::Scheduled => "定时检查",
        }
    }
}

impl fmt::Display for StatusSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Manual => write!(f, "manual"),
            Self::Scheduled => write!(f, "scheduled"),
        }
    }
}

/// Classified, persisted view of an observation's status dimension.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusState {
    pub code: i64,
    pub name: String,
    pub description: String,
    pub captured_at: DateTime<Utc>,
    pub source: StatusSource,
}

// ============================================================================
// Notify State
// ============================================================================

/// Cooldown anchor for one key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotifyState {
    pub last_notified_at: DateTime<Utc>,
}

impl NotifyState {
    pub fn new(last_notified_at: DateTime<Utc>) -> Self {
        Self { last_notified_at }
    }

    /// Time elapsed since the last notification (negative if `now` is earlier).
    pub fn elapsed(&self, now: DateTime<Utc>) -> ChronoDuration {
        now.signed_duration_since(self.last_notified_at)
    }

    /// Returns the state after a notification at `now`.
    ///
    /// The timestamp never moves backwards, so a late-arriving record
    /// from a slower trigger path cannot reopen the cooldown window.
    #[must_use]
    pub fn advanced_to(self, now: DateTime<Utc>) -> Self {
        Self {
            last_notified_at: self.last_notified_at.max(now),
        }
    }

    /// Parses the bare millisecond form used in the key-value store.
    pub fn from_millis_str(raw: &str) -> Option<Self> {
        let millis: i64 = raw.trim().parse().ok()?;
        DateTime::from_timestamp_millis(millis).map(Self::new)
    }

    /// Renders the bare millisecond form used in the key-value store.
    pub fn to_millis_string(&self) -> String {
        self.last_notified_at.timestamp_millis().to_string()
    }
}

// ============================================================================
// Notify Policy
// ============================================================================

/// Gating policy for one key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NotifyPolicy {
    /// Only notify when the observation changed.
    pub only_on_change: bool,
    /// Minimum time between two notifications.
    pub cooldown: Duration,
}

impl NotifyPolicy {
    pub fn new(only_on_change: bool, cooldown: Duration) -> Self {
        Self {
            only_on_change,
            cooldown,
        }
    }

    /// Cooldown as a signed chrono duration, saturating on overflow.
    pub fn cooldown_chrono(&self) -> ChronoDuration {
        ChronoDuration::from_std(self.cooldown).unwrap_or(ChronoDuration::MAX)
    }
}

impl Default for NotifyPolicy {
    fn default() -> Self {
        Self::new(true, DEFAULT_COOLDOWN)
    }
}
