//! Cooldown and change gating for notifications.

use std::time::Duration;

use chrono::{DateTime, Utc};
use orderwatch_core::{MonitorKey, NotifyPolicy, NotifyState};
use tracing::warn;

use crate::cycle::CycleError;
use crate::store::{notified_at_key, KvStore};

/// Outcome of a gating check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateDecision {
    /// A notification may be sent.
    Allow,
    /// The key notified too recently.
    Suppressed { remaining: Duration },
    /// Change-only policy and nothing changed.
    NoChange,
}

impl GateDecision {
    pub fn allows(&self) -> bool {
        matches!(self, Self::Allow)
    }
}

/// Decides whether a key may notify and records when it did.
pub struct NotificationGate<'a> {
    store: &'a dyn KvStore,
}

impl<'a> NotificationGate<'a> {
    pub fn new(store: &'a dyn KvStore) -> Self {
        Self { store }
    }

    /// Loads the cooldown anchor; an unreadable value counts as missing.
    pub fn state(&self, key: &MonitorKey) -> Result<Option<NotifyState>, CycleError> {
        let Some(raw) = self.store.read(&notified_at_key(key))? else {
            return Ok(None);
        };
        let state = NotifyState::from_millis_str(&raw);
        if state.is_none() {
            warn!(key = %key, value = %raw, "Stored notification time is unreadable, ignoring it");
        }
        Ok(state)
    }

    /// Applies the cooldown veto, then the change-only policy.
    pub fn should_notify(
        &self,
        key: &MonitorKey,
        now: DateTime<Utc>,
        has_change: bool,
        policy: &NotifyPolicy,
    ) -> Result<GateDecision, CycleError> {
        if let Some(state) = self.state(key)? {
            let elapsed = state.elapsed(now);
            let cooldown = policy.cooldown_chrono();
            if !policy.cooldown.is_zero() && elapsed < cooldown {
                let remaining = (cooldown - elapsed)
                    .to_std()
                    .unwrap_or_default()
                    .min(policy.cooldown);
                return Ok(GateDecision::Suppressed { remaining });
            }
        }

        if policy.only_on_change && !has_change {
            return Ok(GateDecision::NoChange);
        }
        Ok(GateDecision::Allow)
    }

    /// Records a notification at `now`, never moving the anchor backwards.
    pub fn record_notified(
        &self,
        key: &MonitorKey,
        now: DateTime<Utc>,
    ) -> Result<NotifyState, CycleError> {
        let next = match self.state(key)? {
            Some(state) => state.advanced_to(now),
            None => NotifyState::new(now),
        };
        self.store.write(&notified_at_key(key), &next.to_millis_string())?;
        Ok(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn at(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(1_714_000_000 + secs, 0).unwrap()
    }

    #[test]
    fn test_first_change_allowed() {
        let store = MemoryStore::new();
        let gate = NotificationGate::new(&store);
        let key = MonitorKey::for_order("E1");
        let decision = gate
            .should_notify(&key, at(0), true, &NotifyPolicy::default())
            .unwrap();
        assert_eq!(decision, GateDecision::Allow);
        assert!(decision.allows());
    }

    #[test]
    fn test_cooldown_window() {
        let store = MemoryStore::new();
        let gate = NotificationGate::new(&store);
        let key = MonitorKey::for_order("E1");
        let policy = NotifyPolicy::default();
        gate.record_notified(&key, at(0)).unwrap();

        let decision = gate.should_notify(&key, at(10), true, &policy).unwrap();
        assert_eq!(
            decision,
            GateDecision::Suppressed {
                remaining: Duration::from_secs(20)
            }
        );
        assert!(!decision.allows());

        assert!(gate.should_notify(&key, at(30), true, &policy).unwrap().allows());
    }

    #[test]
    fn test_only_on_change() {
        let store = MemoryStore::new();
        let gate = NotificationGate::new(&store);
        let key = MonitorKey::default();

        let strict = NotifyPolicy::new(true, Duration::from_secs(30));
        assert_eq!(
            gate.should_notify(&key, at(0), false, &strict).unwrap(),
            GateDecision::NoChange
        );

        let loose = NotifyPolicy::new(false, Duration::from_secs(30));
        assert!(gate.should_notify(&key, at(0), false, &loose).unwrap().allows());
    }

    #[test]
    fn test_cooldown_vetoes_before_change_check() {
        let store = MemoryStore::new();
        let gate = NotificationGate::new(&store);
        let key = MonitorKey::default();
        gate.record_notified(&key, at(0)).unwrap();
        let decision = gate
            .should_notify(&key, at(5), false, &NotifyPolicy::default())
            .unwrap();
        assert!(matches!(decision, GateDecision::Suppressed { .. }));
    }

    #[test]
    fn test_record_notified_is_monotonic() {
        let store = MemoryStore::new();
        let gate = NotificationGate::new(&store);
        let key = MonitorKey::for_order("E1");

        gate.record_notified(&key, at(100)).unwrap();
        let state = gate.record_notified(&key, at(50)).unwrap();
        assert_eq!(state.last_notified_at, at(100));
        assert_eq!(gate.state(&key).unwrap(), Some(NotifyState::new(at(100))));
    }

    #[test]
    fn test_malformed_anchor_treated_as_missing() {
        let store = MemoryStore::new();
        let key = MonitorKey::for_order("E1");
        store.write(&notified_at_key(&key), "yesterday").unwrap();

        let gate = NotificationGate::new(&store);
        assert!(gate
            .should_notify(&key, at(0), true, &NotifyPolicy::default())
            .unwrap()
            .allows());
        let state = gate.record_notified(&key, at(0)).unwrap();
        assert_eq!(state.last_notified_at, at(0));
    }

    #[test]
    fn test_zero_cooldown_never_suppresses() {
        let store = MemoryStore::new();
        let gate = NotificationGate::new(&store);
        let key = MonitorKey::default();
        let policy = NotifyPolicy::new(true, Duration::ZERO);
        gate.record_notified(&key, at(0)).unwrap();
        assert!(gate.should_notify(&key, at(0), true, &policy).unwrap().allows());
    }
}
