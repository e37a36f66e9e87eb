//! Per-key change tracking against the last persisted snapshot.

use orderwatch_core::{
    check_depth, diff, ChangeRecord, MonitorKey, StatusState, DEFAULT_BASE_PATH,
};
use serde_json::Value;
use tracing::{debug, warn};

use crate::cycle::CycleError;
use crate::store::{snapshot_key, status_key, KvStore};

/// Result of comparing an observation with the stored snapshot.
#[derive(Debug, Clone, PartialEq)]
pub struct Evaluation {
    /// No usable snapshot existed; the observation became the baseline.
    pub is_first_observation: bool,
    /// Differences in traversal order, at most `MAX_CHANGES`.
    pub changes: Vec<ChangeRecord>,
    /// The snapshot the observation was compared with.
    pub previous: Option<Value>,
}

impl Evaluation {
    pub fn has_changes(&self) -> bool {
        !self.changes.is_empty()
    }
}

/// Compares observations with persisted snapshots.
///
/// The tracker holds no state of its own; every call goes through the
/// store, so the live and scheduled paths see the same baseline.
pub struct ChangeTracker<'a> {
    store: &'a dyn KvStore,
}

impl<'a> ChangeTracker<'a> {
    pub fn new(store: &'a dyn KvStore) -> Self {
        Self { store }
    }

    /// Loads the snapshot for `key`.
    ///
    /// A snapshot that no longer parses is reported and treated as absent.
    pub fn snapshot(&self, key: &MonitorKey) -> Result<Option<Value>, CycleError> {
        let Some(raw) = self.store.read(&snapshot_key(key))? else {
            return Ok(None);
        };
        match serde_json::from_str(&raw) {
            Ok(value) => Ok(Some(value)),
            Err(e) => {
                warn!(key = %key, error = %e, "Stored snapshot is unreadable, starting over");
                Ok(None)
            }
        }
    }

    /// Compares `observation` with the stored snapshot.
    ///
    /// A first observation is persisted immediately. Later observations
    /// are not persisted here; see [`ChangeTracker::commit`].
    ///
    /// An observation nested too deeply to diff is rejected before
    /// anything is stored. A stored snapshot that is too deep is treated
    /// like an unreadable one.
    pub fn evaluate(
        &self,
        key: &MonitorKey,
        observation: &Value,
    ) -> Result<Evaluation, CycleError> {
        check_depth(observation, DEFAULT_BASE_PATH)?;

        let previous = self.snapshot(key)?.filter(|snapshot| {
            match check_depth(snapshot, DEFAULT_BASE_PATH) {
                Ok(()) => true,
                Err(e) => {
                    warn!(key = %key, error = %e, "Stored snapshot is too deep, starting over");
                    false
                }
            }
        });

        let Some(previous) = previous else {
            self.commit(key, observation)?;
            debug!(key = %key, "First observation stored as baseline");
            return Ok(Evaluation {
                is_first_observation: true,
                changes: Vec::new(),
                previous: None,
            });
        };

        let changes = diff(Some(&previous), Some(observation), DEFAULT_BASE_PATH)?;
        Ok(Evaluation {
            is_first_observation: false,
            changes,
            previous: Some(previous),
        })
    }

    /// Persists `observation` as the new baseline for `key`.
    pub fn commit(&self, key: &MonitorKey, observation: &Value) -> Result<(), CycleError> {
        let raw = serde_json::to_string(observation)?;
        self.store.write(&snapshot_key(key), &raw)?;
        Ok(())
    }

    /// Loads the last classified status for `key`.
    pub fn status(&self, key: &MonitorKey) -> Result<Option<StatusState>, CycleError> {
        let Some(raw) = self.store.read(&status_key(key))? else {
            return Ok(None);
        };
        match serde_json::from_str(&raw) {
            Ok(state) => Ok(Some(state)),
            Err(e) => {
                warn!(key = %key, error = %e, "Stored status is unreadable, ignoring it");
                Ok(None)
            }
        }
    }

    pub fn record_status(&self, key: &MonitorKey, state: &StatusState) -> Result<(), CycleError> {
        let raw = serde_json::to_string(state)?;
        self.store.write(&status_key(key), &raw)?;
        Ok(())
    }
}
