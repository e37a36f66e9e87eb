//! One monitoring cycle: parse, classify, diff, gate, notify, persist.
//!
//! A cycle is synchronous and runs to completion against the store. The
//! registry actor calls it for both trigger paths, so no two cycles ever
//! interleave their read-modify-write of a key's state.
//!
//! Side effects happen in a fixed order: the notification is posted
//! first, then the cooldown anchor is recorded, then the snapshot and the
//! status are persisted. A cycle that fails before posting leaves the
//! store untouched, apart from the baseline a first observation writes.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Local, Utc};
use orderwatch_core::{
    classify_availability, Availability, ChangeRecord, Classification, DiffError, MonitorKey,
    NotifyPolicy, StatusSource, StatusState, StatusTable,
};
use orderwatch_protocol::{
    endpoint_matches, parse_observation, CapturedRequest, OrderView, ProtocolError, StatusInfo,
    DEFAULT_ENDPOINT_PATTERN,
};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::fetch::FetchError;
use crate::gate::{GateDecision, NotificationGate};
use crate::lock::FileLock;
use crate::notify::{Notification, NotificationOptions, NotificationSink, SinkError};
use crate::store::{KvStore, StoreError, REQUEST_TEMPLATE_KEY};
use crate::tracker::{ChangeTracker, Evaluation};

/// Title used when the observation carries no classifiable status.
pub const GENERIC_TITLE: &str = "🛒 订单数据变化提醒";

/// Deep link opened from a notification by default.
pub const DEFAULT_OPEN_URL: &str = "xiaomiev://";

// ============================================================================
// Errors
// ============================================================================

/// Errors that abort a cycle.
#[derive(Debug, Error)]
pub enum CycleError {
    /// The replay request failed.
    #[error("replay request failed: {0}")]
    Transport(#[from] FetchError),

    /// The response body or the stored template could not be parsed.
    #[error("parse error: {0}")]
    Parse(ProtocolError),

    /// Nothing to replay yet.
    #[error("no captured request yet; open the order page in the app once to capture it")]
    MissingPrerequisite,

    /// The response parsed but lacks what the cycle needs.
    #[error("unexpected response shape: {0}")]
    UnexpectedShape(String),

    #[error(transparent)]
    Diff(#[from] DiffError),

    #[error(transparent)]
    Store(#[from] StoreError),

    /// The sink refused the notification.
    #[error(transparent)]
    Sink(#[from] SinkError),

    /// State could not be serialized for the store.
    #[error("state encoding failed: {0}")]
    Encode(#[from] serde_json::Error),

    /// The monitor actor is gone.
    #[error("monitor channel closed")]
    ChannelClosed,

    /// The blocking task running the cycle panicked or was cancelled.
    #[error("cycle worker failed: {0}")]
    Worker(String),
}

impl From<ProtocolError> for CycleError {
    fn from(err: ProtocolError) -> Self {
        match err {
            ProtocolError::MissingData { .. } => Self::UnexpectedShape(err.to_string()),
            other => Self::Parse(other),
        }
    }
}

// ============================================================================
// Settings and Outcomes
// ============================================================================

/// Knobs that shape a cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CycleSettings {
    pub enable_notification: bool,
    /// Notify for unimportant status transitions too.
    pub monitor_all_status: bool,
    /// Reject observations without an order status.
    pub require_status: bool,
    pub policy: NotifyPolicy,
    /// URL fragment the live path must match.
    pub endpoint_pattern: String,
    pub open_url: Option<String>,
    pub sound: Option<String>,
}

impl Default for CycleSettings {
    fn default() -> Self {
        Self {
            enable_notification: true,
            monitor_all_status: true,
            require_status: false,
            policy: NotifyPolicy::default(),
            endpoint_pattern: DEFAULT_ENDPOINT_PATTERN.to_string(),
            open_url: Some(DEFAULT_OPEN_URL.to_string()),
            sound: Some("default".to_string()),
        }
    }
}

/// How a cycle ended.
#[derive(Debug, Clone, PartialEq)]
pub enum CycleOutcome {
    /// First observation for the key, stored without notifying.
    Baseline { key: MonitorKey },
    /// Nothing changed and the policy wants changes.
    Unchanged { key: MonitorKey },
    /// Inside the cooldown window.
    Suppressed {
        key: MonitorKey,
        changes: usize,
        remaining: Duration,
    },
    /// Status transition to an unimportant status.
    Filtered { key: MonitorKey, changes: usize },
    /// Notifications are turned off.
    Disabled { key: MonitorKey, changes: usize },
    /// A notification was posted.
    Notified {
        key: MonitorKey,
        changes: Vec<ChangeRecord>,
        notification: Box<Notification>,
    },
    /// The intercepted URL is not the monitored endpoint.
    Ignored { url: String },
}

impl CycleOutcome {
    pub fn key(&self) -> Option<&MonitorKey> {
        match self {
            Self::Baseline { key }
            | Self::Unchanged { key }
            | Self::Suppressed { key, .. }
            | Self::Filtered { key, .. }
            | Self::Disabled { key, .. }
            | Self::Notified { key, .. } => Some(key),
            Self::Ignored { .. } => None,
        }
    }

    pub fn is_notified(&self) -> bool {
        matches!(self, Self::Notified { .. })
    }
}

// ============================================================================
// Monitor Cycle
// ============================================================================

/// Everything derived from an observation before touching state.
struct Classified {
    key: MonitorKey,
    order_number: Option<String>,
    status: Option<StatusInfo>,
    classification: Option<Classification>,
}

/// Runs cycles against an injected store and sink.
pub struct MonitorCycle {
    store: Arc<dyn KvStore>,
    sink: Arc<dyn NotificationSink>,
    table: StatusTable,
    settings: CycleSettings,
    cycle_lock: Option<PathBuf>,
}

impl MonitorCycle {
    pub fn new(
        store: Arc<dyn KvStore>,
        sink: Arc<dyn NotificationSink>,
        settings: CycleSettings,
    ) -> Self {
        Self {
            store,
            sink,
            table: StatusTable::default(),
            settings,
            cycle_lock: None,
        }
    }

    /// Holds an exclusive lock on `path` for the duration of every cycle,
    /// so processes sharing one state directory never interleave cycles.
    #[must_use]
    pub fn with_cycle_lock(mut self, path: impl Into<PathBuf>) -> Self {
        self.cycle_lock = Some(path.into());
        self
    }

    pub fn store(&self) -> &Arc<dyn KvStore> {
        &self.store
    }

    fn lock(&self) -> Result<Option<FileLock>, CycleError> {
        self.cycle_lock
            .as_deref()
            .map(FileLock::acquire)
            .transpose()
            .map_err(|e| CycleError::Store(StoreError::Io(e)))
    }

    /// Handles an intercepted exchange: saves the request as the replay
    /// template, then runs a manual cycle on the response.
    pub fn intercept(
        &self,
        request: &CapturedRequest,
        body: &str,
    ) -> Result<CycleOutcome, CycleError> {
        self.intercept_at(request, body, Utc::now())
    }

    pub fn intercept_at(
        &self,
        request: &CapturedRequest,
        body: &str,
        now: DateTime<Utc>,
    ) -> Result<CycleOutcome, CycleError> {
        if !endpoint_matches(&request.url, &self.settings.endpoint_pattern) {
            debug!(url = %request.url, "Intercepted URL does not match endpoint, ignoring");
            return Ok(CycleOutcome::Ignored {
                url: request.url.clone(),
            });
        }

        let _guard = self.lock()?;
        match request.validate() {
            Ok(()) => self.save_template(request)?,
            Err(e) => warn!(url = %request.url, error = %e, "Request not saved as replay template"),
        }

        self.run_locked(StatusSource::Manual, body, now)
    }

    /// Stored replay template, if one was captured.
    pub fn template(&self) -> Result<Option<CapturedRequest>, CycleError> {
        let Some(raw) = self.store.read(REQUEST_TEMPLATE_KEY)? else {
            return Ok(None);
        };
        Ok(Some(CapturedRequest::from_json(&raw)?))
    }

    fn save_template(&self, request: &CapturedRequest) -> Result<(), CycleError> {
        self.store.write(REQUEST_TEMPLATE_KEY, &request.to_json()?)?;
        debug!(url = %request.url, method = %request.method, "Replay template saved");
        Ok(())
    }

    /// Runs one cycle on a raw response body.
    pub fn run(&self, source: StatusSource, body: &str) -> Result<CycleOutcome, CycleError> {
        self.run_at(source, body, Utc::now())
    }

    /// Runs one cycle with an explicit clock reading.
    pub fn run_at(
        &self,
        source: StatusSource,
        body: &str,
        now: DateTime<Utc>,
    ) -> Result<CycleOutcome, CycleError> {
        let _guard = self.lock()?;
        self.run_locked(source, body, now)
    }

    fn run_locked(
        &self,
        source: StatusSource,
        body: &str,
        now: DateTime<Utc>,
    ) -> Result<CycleOutcome, CycleError> {
        let data = parse_observation(body)?;
        let classified = self.classify(&data)?;
        let key = classified.key.clone();
        let status_state = classified.status.as_ref().map(|status| StatusState {
            code: status.code,
            name: status.name.clone(),
            description: classified
                .classification
                .as_ref()
                .map(|c| c.description.clone())
                .unwrap_or_default(),
            captured_at: now,
            source,
        });

        let tracker = ChangeTracker::new(self.store.as_ref());
        let evaluation = tracker.evaluate(&key, &data)?;

        if evaluation.is_first_observation {
            if let Some(state) = &status_state {
                tracker.record_status(&key, state)?;
            }
            info!(key = %key, source = %source, "Baseline recorded, no notification");
            return Ok(CycleOutcome::Baseline { key });
        }

        let previous_status = tracker.status(&key)?;
        let transition = match (&previous_status, &classified.status) {
            (Some(prev), Some(cur)) if prev.code != cur.code => {
                Some(self.table.describe_transition(prev.code, cur.code))
            }
            _ => None,
        };
        let status_changed = match (&previous_status, &classified.status) {
            (Some(prev), Some(cur)) => prev.code != cur.code,
            (None, Some(_)) => true,
            _ => false,
        };
        let change_count = evaluation.changes.len();
        for change in &evaluation.changes {
            info!(key = %key, "🔹 {change}");
        }

        let important = classified
            .classification
            .as_ref()
            .is_some_and(|c| c.is_important);
        if status_changed && !self.settings.monitor_all_status && !important {
            self.persist(&tracker, &key, &data, &evaluation, status_state.as_ref())?;
            info!(
                key = %key,
                changes = change_count,
                "Unimportant status change, skipping notification"
            );
            return Ok(CycleOutcome::Filtered {
                key,
                changes: change_count,
            });
        }

        if !self.settings.enable_notification {
            self.persist(&tracker, &key, &data, &evaluation, status_state.as_ref())?;
            info!(key = %key, changes = change_count, "Notifications disabled");
            return Ok(CycleOutcome::Disabled {
                key,
                changes: change_count,
            });
        }

        let gate = NotificationGate::new(self.store.as_ref());
        match gate.should_notify(&key, now, evaluation.has_changes(), &self.settings.policy)? {
            GateDecision::Suppressed { remaining } => {
                self.persist(&tracker, &key, &data, &evaluation, status_state.as_ref())?;
                info!(
                    key = %key,
                    changes = change_count,
                    remaining_secs = remaining.as_secs(),
                    "In cooldown, notification suppressed"
                );
                Ok(CycleOutcome::Suppressed {
                    key,
                    changes: change_count,
                    remaining,
                })
            }
            GateDecision::NoChange => {
                self.persist(&tracker, &key, &data, &evaluation, status_state.as_ref())?;
                debug!(key = %key, source = %source, "No change");
                Ok(CycleOutcome::Unchanged { key })
            }
            GateDecision::Allow => {
                let notification =
                    self.build_notification(&classified, &evaluation, transition, source, now);
                self.sink.post(&notification)?;
                gate.record_notified(&key, now)?;
                self.persist(&tracker, &key, &data, &evaluation, status_state.as_ref())?;
                info!(key = %key, changes = change_count, source = %source, "Notification sent");
                Ok(CycleOutcome::Notified {
                    key,
                    changes: evaluation.changes,
                    notification: Box::new(notification),
                })
            }
        }
    }

    fn classify(&self, data: &Value) -> Result<Classified, CycleError> {
        let view = OrderView::new(data);
        let status = view.status();
        if status.is_none() && self.settings.require_status {
            return Err(CycleError::UnexpectedShape(
                "response carries no order status".to_string(),
            ));
        }

        let classification = match &status {
            Some(status) => Some(self.table.classify(status.code, view.detail())),
            None => match classify_availability(data) {
                Availability::Unknown => None,
                availability => Some(availability.classification()),
            },
        };

        Ok(Classified {
            key: view.monitor_key(),
            order_number: view.order_number(),
            status,
            classification,
        })
    }

    /// Writes the snapshot (only when it changed) and the status.
    fn persist(
        &self,
        tracker: &ChangeTracker<'_>,
        key: &MonitorKey,
        data: &Value,
        evaluation: &Evaluation,
        status: Option<&StatusState>,
    ) -> Result<(), CycleError> {
        if evaluation.has_changes() {
            tracker.commit(key, data)?;
        }
        if let Some(status) = status {
            tracker.record_status(key, status)?;
        }
        Ok(())
    }

    fn build_notification(
        &self,
        classified: &Classified,
        evaluation: &Evaluation,
        transition: Option<String>,
        source: StatusSource,
        now: DateTime<Utc>,
    ) -> Notification {
        let title = classified
            .classification
            .as_ref()
            .map(|c| c.title.clone())
            .unwrap_or_else(|| GENERIC_TITLE.to_string());

        let subtitle = match (&classified.order_number, &classified.status) {
            (Some(number), _) => format!("订单: {number}"),
            (None, Some(status)) => status.name.clone(),
            (None, None) => format!("检测到 {} 处变化", evaluation.changes.len()),
        };

        let mut lines = Vec::new();
        if let Some(status) = &classified.status {
            lines.push(status.name.clone());
        }
        if let Some(classification) = &classified.classification {
            lines.push(classification.description.clone());
        }
        if let Some(transition) = transition {
            lines.push(format!("📈 变化: {transition}"));
        }
        lines.extend(evaluation.changes.iter().map(|change| format!("🔹 {change}")));
        lines.push(format!(
            "⏰ {}",
            now.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S")
        ));
        lines.push(format!("📱 来源: {}", source.label()));

        Notification {
            title,
            subtitle,
            body: lines.join("\n"),
            options: NotificationOptions {
                url: self.settings.open_url.clone(),
                sound: self.settings.sound.clone(),
            },
        }
    }
}
