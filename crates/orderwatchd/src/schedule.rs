//! Scheduled replay of the captured order request.
//!
//! A task wakes once a minute and, when the configured interval is due
//! for the current wall-clock minute, replays the stored template and
//! feeds the response to the monitor actor. The request is issued
//! outside the actor so a slow server never delays live observations.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Local};
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use orderwatch_core::StatusSource;

use crate::config::ReplayInterval;
use crate::cycle::{CycleError, CycleOutcome};
use crate::fetch::ObservationFetcher;
use crate::registry::MonitorHandle;

/// How often the scheduler checks whether a replay is due.
pub const TICK_INTERVAL: Duration = Duration::from_secs(60);

/// Replays the stored template once and runs a scheduled cycle.
///
/// Fails with `MissingPrerequisite` until the live path has captured a
/// request. A transport failure aborts before the actor sees anything.
pub async fn replay_once(
    handle: &MonitorHandle,
    fetcher: &dyn ObservationFetcher,
) -> Result<CycleOutcome, CycleError> {
    let template = handle
        .template()
        .await?
        .ok_or(CycleError::MissingPrerequisite)?;

    debug!(url = %template.url, method = %template.method, "Replaying captured request");
    let body = fetcher.fetch(&template).await?;
    handle.observe(StatusSource::Scheduled, body).await
}

/// Spawns the replay loop.
///
/// Stops when `cancel_token` is cancelled or the actor goes away.
pub fn spawn_replay_task(
    handle: MonitorHandle,
    fetcher: Arc<dyn ObservationFetcher>,
    every: ReplayInterval,
    cancel_token: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut tick = interval(TICK_INTERVAL);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut last_minute: Option<i64> = None;

        info!(interval = %every, "Replay scheduler started");

        loop {
            tokio::select! {
                biased;

                _ = cancel_token.cancelled() => {
                    info!("Replay scheduler shutting down");
                    break;
                }

                _ = tick.tick() => {
                    let now = Local::now();
                    if !take_due_minute(every, now, &mut last_minute) {
                        continue;
                    }
                    match replay_once(&handle, fetcher.as_ref()).await {
                        Ok(outcome) => log_outcome(&outcome),
                        Err(CycleError::ChannelClosed) => {
                            debug!("Monitor actor gone, stopping scheduler");
                            break;
                        }
                        Err(e) => warn!(error = %e, "Scheduled replay failed"),
                    }
                }
            }
        }

        debug!("Replay scheduler task completed");
    })
}

/// Returns true once per due minute, even if ticks drift within it.
fn take_due_minute(
    every: ReplayInterval,
    now: DateTime<Local>,
    last_minute: &mut Option<i64>,
) -> bool {
    let minute_id = now.timestamp().div_euclid(60);
    if !every.is_due(&now) || *last_minute == Some(minute_id) {
        return false;
    }
    *last_minute = Some(minute_id);
    true
}

fn log_outcome(outcome: &CycleOutcome) {
    match outcome {
        CycleOutcome::Notified { key, changes, .. } => {
            info!(key = %key, changes = changes.len(), "Scheduled check notified")
        }
        CycleOutcome::Suppressed { key, remaining, .. } => {
            info!(key = %key, remaining_secs = remaining.as_secs(), "Scheduled check in cooldown")
        }
        other => debug!(outcome = ?other, "Scheduled check complete"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn local(hour: u32, minute: u32, second: u32) -> DateTime<Local> {
        Local
            .with_ymd_and_hms(2024, 5, 1, hour, minute, second)
            .single()
            .unwrap()
    }

    #[test]
    fn test_due_minute_fires_once() {
        let every = ReplayInterval::try_from(5).unwrap();
        let mut last = None;
        assert!(take_due_minute(every, local(10, 5, 1), &mut last));
        assert!(!take_due_minute(every, local(10, 5, 40), &mut last));
        assert!(!take_due_minute(every, local(10, 6, 1), &mut last));
        assert!(take_due_minute(every, local(10, 10, 0), &mut last));
    }

    #[test]
    fn test_hourly_interval_only_on_the_hour() {
        let every = ReplayInterval::try_from(60).unwrap();
        let mut last = None;
        assert!(!take_due_minute(every, local(9, 30, 0), &mut last));
        assert!(take_due_minute(every, local(10, 0, 0), &mut last));
    }

    #[test]
    fn test_tick_interval() {
        assert_eq!(TICK_INTERVAL, Duration::from_secs(60));
    }
}
