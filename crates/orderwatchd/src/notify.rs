//! Notification sinks.
//!
//! A sink receives fully assembled notifications from the monitor cycle.
//! Delivery is fire-and-forget from the host's point of view; a sink only
//! reports whether it accepted the notification, which decides whether
//! the cooldown is anchored.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

/// Errors raised when a sink cannot accept a notification.
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("notification sink I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("notification could not be encoded: {0}")]
    Encode(String),

    #[error("notification sink lock poisoned")]
    Poisoned,
}

/// Optional delivery hints.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationOptions {
    /// Deep link opened when the notification is tapped.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// Sound name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sound: Option<String>,
}

/// A user-facing notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub title: String,
    pub subtitle: String,
    pub body: String,
    #[serde(default)]
    pub options: NotificationOptions,
}

/// Destination for notifications.
pub trait NotificationSink: Send + Sync {
    /// Hands a notification to the host.
    fn post(&self, notification: &Notification) -> Result<(), SinkError>;
}

// ============================================================================
// Sinks
// ============================================================================

/// Emits notifications as structured log lines.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl NotificationSink for LogSink {
    fn post(&self, notification: &Notification) -> Result<(), SinkError> {
        info!(
            title = %notification.title,
            subtitle = %notification.subtitle,
            url = notification.options.url.as_deref().unwrap_or(""),
            "NOTIFY\n{}",
            notification.body
        );
        Ok(())
    }
}

/// Appends notifications as JSON lines for the host to pick up.
#[derive(Debug)]
pub struct JsonlSink {
    path: PathBuf,
    lock: Mutex<()>,
}

impl JsonlSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl NotificationSink for JsonlSink {
    fn post(&self, notification: &Notification) -> Result<(), SinkError> {
        let line =
            serde_json::to_string(notification).map_err(|e| SinkError::Encode(e.to_string()))?;
        let _guard = self.lock.lock().map_err(|_| SinkError::Poisoned)?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        writeln!(file, "{line}")?;
        Ok(())
    }
}

/// Keeps notifications in memory.
#[derive(Debug, Default)]
pub struct RecordingSink {
    posted: Mutex<Vec<Notification>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Notifications posted so far, oldest first.
    pub fn notifications(&self) -> Vec<Notification> {
        self.posted.lock().map(|p| p.clone()).unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.posted.lock().map(|p| p.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl NotificationSink for RecordingSink {
    fn post(&self, notification: &Notification) -> Result<(), SinkError> {
        let mut posted = self.posted.lock().map_err(|_| SinkError::Poisoned)?;
        posted.push(notification.clone());
        Ok(())
    }
}
