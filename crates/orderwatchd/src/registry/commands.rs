//! Monitor actor commands, state views, and events.
//!
//! - `MonitorCommand`: commands sent to the actor
//! - `KeyState`: everything stored for one monitor key
//! - `MonitorEvent`: cycle results published to subscribers

use orderwatch_core::{MonitorKey, NotifyState, StatusSource, StatusState};
use orderwatch_protocol::CapturedRequest;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::oneshot;

use crate::cycle::{CycleError, CycleOutcome};

// ============================================================================
// Monitor Commands
// ============================================================================

/// Commands sent to the monitor actor.
///
/// Each command carries a oneshot channel for its response.
///
/// ```ignore
/// let (tx, rx) = oneshot::channel();
/// monitor_tx.send(MonitorCommand::GetState {
///     key,
///     respond_to: tx,
/// }).await?;
/// let state = rx.await??;
/// ```
#[derive(Debug)]
pub enum MonitorCommand {
    /// Handle an intercepted request/response pair (live path).
    ///
    /// The request is saved as the replay template when its URL matches
    /// the endpoint pattern.
    Intercept {
        /// The app's own request (boxed to keep the enum small)
        request: Box<CapturedRequest>,
        /// Raw response body
        body: String,
        respond_to: oneshot::Sender<Result<CycleOutcome, CycleError>>,
    },

    /// Run a cycle on a response body obtained elsewhere.
    Observe {
        source: StatusSource,
        body: String,
        respond_to: oneshot::Sender<Result<CycleOutcome, CycleError>>,
    },

    /// Read the stored replay template.
    GetTemplate {
        respond_to: oneshot::Sender<Result<Option<CapturedRequest>, CycleError>>,
    },

    /// Read everything stored for one key.
    GetState {
        key: MonitorKey,
        respond_to: oneshot::Sender<Result<KeyState, CycleError>>,
    },

    /// List keys that have a baseline.
    ListKeys {
        respond_to: oneshot::Sender<Result<Vec<MonitorKey>, CycleError>>,
    },
}

// ============================================================================
// State View
// ============================================================================

/// Stored state for one monitor key.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct KeyState {
    pub key: MonitorKey,
    pub snapshot: Option<Value>,
    pub status: Option<StatusState>,
    pub notify: Option<NotifyState>,
}

impl KeyState {
    /// True if nothing has been observed for this key.
    pub fn is_empty(&self) -> bool {
        self.snapshot.is_none() && self.status.is_none() && self.notify.is_none()
    }
}

// ============================================================================
// Monitor Events
// ============================================================================

/// Events published after every cycle.
#[derive(Debug, Clone)]
pub enum MonitorEvent {
    /// A cycle completed.
    Observed {
        source: StatusSource,
        /// Boxed for size
        outcome: Box<CycleOutcome>,
    },

    /// A cycle aborted; state was left as it was.
    Failed {
        source: StatusSource,
        error: String,
    },
}
