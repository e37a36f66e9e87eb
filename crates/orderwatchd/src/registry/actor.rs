//! Monitor actor - owns the cycle and processes commands one at a time.
//!
//! Every read-modify-write of a key's snapshot, status and cooldown
//! anchor happens inside this task, so the live and scheduled paths can
//! never interleave on the same key. Cycles touch the store and the sink
//! synchronously, so each command runs on the blocking pool while the
//! actor awaits it.
//!
//! # Panic-Free Guarantees
//!
//! - No `.unwrap()`, `.expect()`, `panic!()` outside tests
//! - A dropped responder is ignored; a closed event channel is not an error

use std::sync::Arc;

use tokio::sync::{broadcast, mpsc};
use tracing::{info, warn};

use orderwatch_core::{MonitorKey, StatusSource};

use super::commands::{KeyState, MonitorCommand, MonitorEvent};
use crate::cycle::{CycleError, CycleOutcome, MonitorCycle};
use crate::gate::NotificationGate;
use crate::store::monitor_keys;
use crate::tracker::ChangeTracker;

/// The monitor actor.
pub struct MonitorActor {
    receiver: mpsc::Receiver<MonitorCommand>,
    cycle: Arc<MonitorCycle>,
    event_publisher: broadcast::Sender<MonitorEvent>,
    cycles_run: u64,
}

impl MonitorActor {
    pub fn new(
        receiver: mpsc::Receiver<MonitorCommand>,
        cycle: MonitorCycle,
        event_publisher: broadcast::Sender<MonitorEvent>,
    ) -> Self {
        Self {
            receiver,
            cycle: Arc::new(cycle),
            event_publisher,
            cycles_run: 0,
        }
    }

    /// Processes commands until every sender is dropped.
    pub async fn run(mut self) {
        info!("Monitor actor starting");

        while let Some(cmd) = self.receiver.recv().await {
            self.handle_command(cmd).await;
        }

        info!(cycles = self.cycles_run, "Monitor actor stopped");
    }

    async fn handle_command(&mut self, cmd: MonitorCommand) {
        match cmd {
            MonitorCommand::Intercept {
                request,
                body,
                respond_to,
            } => {
                let result = self
                    .offload(move |cycle| cycle.intercept(&request, &body))
                    .await;
                if !matches!(result, Ok(CycleOutcome::Ignored { .. })) {
                    self.publish(StatusSource::Manual, &result);
                }
                let _ = respond_to.send(result);
            }
            MonitorCommand::Observe {
                source,
                body,
                respond_to,
            } => {
                let result = self.offload(move |cycle| cycle.run(source, &body)).await;
                self.publish(source, &result);
                let _ = respond_to.send(result);
            }
            MonitorCommand::GetTemplate { respond_to } => {
                let result = self.offload(|cycle| cycle.template()).await;
                let _ = respond_to.send(result);
            }
            MonitorCommand::GetState { key, respond_to } => {
                let result = self.offload(move |cycle| key_state(cycle, key)).await;
                let _ = respond_to.send(result);
            }
            MonitorCommand::ListKeys { respond_to } => {
                let result = self
                    .offload(|cycle| Ok(monitor_keys(cycle.store().as_ref())?))
                    .await;
                let _ = respond_to.send(result);
            }
        }
    }

    /// Runs `work` against the cycle on the blocking pool.
    async fn offload<T, F>(&self, work: F) -> Result<T, CycleError>
    where
        T: Send + 'static,
        F: FnOnce(&MonitorCycle) -> Result<T, CycleError> + Send + 'static,
    {
        let cycle = Arc::clone(&self.cycle);
        tokio::task::spawn_blocking(move || work(&cycle))
            .await
            .map_err(|e| CycleError::Worker(e.to_string()))?
    }

    fn publish(&mut self, source: StatusSource, result: &Result<CycleOutcome, CycleError>) {
        self.cycles_run += 1;
        let event = match result {
            Ok(outcome) => MonitorEvent::Observed {
                source,
                outcome: Box::new(outcome.clone()),
            },
            Err(e) => {
                warn!(source = %source, error = %e, "Monitor cycle failed");
                MonitorEvent::Failed {
                    source,
                    error: e.to_string(),
                }
            }
        };
        // No subscribers is fine.
        let _ = self.event_publisher.send(event);
    }

    /// Number of cycles run so far.
    pub fn cycles_run(&self) -> u64 {
        self.cycles_run
    }
}

fn key_state(cycle: &MonitorCycle, key: MonitorKey) -> Result<KeyState, CycleError> {
    let store = cycle.store().as_ref();
    let tracker = ChangeTracker::new(store);
    let gate = NotificationGate::new(store);
    Ok(KeyState {
        snapshot: tracker.snapshot(&key)?,
        status: tracker.status(&key)?,
        notify: gate.state(&key)?,
        key,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cycle::CycleSettings;
    use crate::notify::{Notification, NotificationSink, RecordingSink, SinkError};
    use crate::store::MemoryStore;
    use orderwatch_protocol::CapturedRequest;
    use serde_json::json;
    use std::collections::BTreeMap;
    use std::sync::Mutex;
    use std::thread::{self, ThreadId};
    use tokio::sync::oneshot;

    fn order_body(code: i64) -> String {
        json!({
            "data": {
                "orderDetailDto": {
                    "orderNumber": "E7",
                    "statusInfo": {"orderStatus": code, "orderStatusName": "状态"}
                }
            }
        })
        .to_string()
    }

    fn create_actor() -> (
        mpsc::Sender<MonitorCommand>,
        MonitorActor,
        broadcast::Receiver<MonitorEvent>,
        Arc<RecordingSink>,
    ) {
        let (cmd_tx, cmd_rx) = mpsc::channel(16);
        let (event_tx, event_rx) = broadcast::channel(16);
        let sink = Arc::new(RecordingSink::new());
        let cycle = MonitorCycle::new(
            Arc::new(MemoryStore::new()),
            sink.clone(),
            CycleSettings::default(),
        );
        let actor = MonitorActor::new(cmd_rx, cycle, event_tx);
        (cmd_tx, actor, event_rx, sink)
    }

    async fn observe(actor: &mut MonitorActor, body: String) -> Result<CycleOutcome, CycleError> {
        let (tx, mut rx) = oneshot::channel();
        actor
            .handle_command(MonitorCommand::Observe {
                source: StatusSource::Scheduled,
                body,
                respond_to: tx,
            })
            .await;
        rx.try_recv().unwrap()
    }

    #[tokio::test]
    async fn test_observe_publishes_event() {
        let (cmd_tx, mut actor, mut event_rx, _sink) = create_actor();
        let (respond_tx, respond_rx) = oneshot::channel();

        cmd_tx
            .send(MonitorCommand::Observe {
                source: StatusSource::Manual,
                body: order_body(2520),
                respond_to: respond_tx,
            })
            .await
            .unwrap();

        // Process the command manually (actor not running in background)
        if let Some(cmd) = actor.receiver.recv().await {
            actor.handle_command(cmd).await;
        }

        let outcome = respond_rx.await.unwrap().unwrap();
        assert!(matches!(outcome, CycleOutcome::Baseline { .. }));
        assert_eq!(actor.cycles_run(), 1);

        let event = event_rx.try_recv().unwrap();
        assert!(matches!(event, MonitorEvent::Observed { .. }));
    }

    #[tokio::test]
    async fn test_failed_cycle_publishes_failure() {
        let (_, mut actor, mut event_rx, _sink) = create_actor();
        let result = observe(&mut actor, "not json".to_string()).await;
        assert!(matches!(result, Err(CycleError::Parse(_))));

        match event_rx.try_recv().unwrap() {
            MonitorEvent::Failed { source, error } => {
                assert_eq!(source, StatusSource::Scheduled);
                assert!(error.contains("malformed"));
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_sequential_cycles_share_state() {
        let (_, mut actor, _, sink) = create_actor();
        observe(&mut actor, order_body(2520)).await.unwrap();
        let outcome = observe(&mut actor, order_body(2605)).await.unwrap();
        assert!(outcome.is_notified());
        assert_eq!(sink.len(), 1);

        let (tx, mut rx) = oneshot::channel();
        actor
            .handle_command(MonitorCommand::GetState {
                key: MonitorKey::for_order("E7"),
                respond_to: tx,
            })
            .await;
        let state = rx.try_recv().unwrap().unwrap();
        assert_eq!(state.status.map(|s| s.code), Some(2605));
        assert!(state.notify.is_some());
        assert_eq!(
            state
                .snapshot
                .and_then(|s| s.pointer("/orderDetailDto/statusInfo/orderStatus").cloned()),
            Some(json!(2605))
        );
    }

    #[tokio::test]
    async fn test_ignored_intercept_is_not_published() {
        let (_, mut actor, mut event_rx, _) = create_actor();
        let (tx, mut rx) = oneshot::channel();
        actor
            .handle_command(MonitorCommand::Intercept {
                request: Box::new(CapturedRequest::new(
                    "https://example.com/other",
                    None,
                    BTreeMap::new(),
                    "",
                )),
                body: order_body(2520),
                respond_to: tx,
            })
            .await;
        let outcome = rx.try_recv().unwrap().unwrap();
        assert!(matches!(outcome, CycleOutcome::Ignored { .. }));
        assert!(event_rx.try_recv().is_err());
        assert_eq!(actor.cycles_run(), 0);
    }

    #[tokio::test]
    async fn test_list_keys_and_template() {
        let (_, mut actor, _, _) = create_actor();
        let (tx, mut rx) = oneshot::channel();
        actor
            .handle_command(MonitorCommand::GetTemplate { respond_to: tx })
            .await;
        assert_eq!(rx.try_recv().unwrap().unwrap(), None);

        let (tx, mut rx) = oneshot::channel();
        actor
            .handle_command(MonitorCommand::Intercept {
                request: Box::new(CapturedRequest::new(
                    "https://api.retail.xiaomiev.com/mtop/carlife/product/order",
                    None,
                    BTreeMap::new(),
                    "[]",
                )),
                body: order_body(2520),
                respond_to: tx,
            })
            .await;
        assert!(rx.try_recv().unwrap().is_ok());

        let (tx, mut rx) = oneshot::channel();
        actor
            .handle_command(MonitorCommand::ListKeys { respond_to: tx })
            .await;
        assert_eq!(
            rx.try_recv().unwrap().unwrap(),
            vec![MonitorKey::for_order("E7")]
        );

        let (tx, mut rx) = oneshot::channel();
        actor
            .handle_command(MonitorCommand::GetTemplate { respond_to: tx })
            .await;
        let template = rx.try_recv().unwrap().unwrap().unwrap();
        assert_eq!(template.body, "[]");
    }

    /// Remembers which thread delivered each notification.
    #[derive(Default)]
    struct ThreadSink {
        threads: Mutex<Vec<ThreadId>>,
    }

    impl NotificationSink for ThreadSink {
        fn post(&self, _notification: &Notification) -> Result<(), SinkError> {
            self.threads.lock().unwrap().push(thread::current().id());
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_cycle_io_runs_off_the_runtime_thread() {
        let (_cmd_tx, cmd_rx) = mpsc::channel(16);
        let (event_tx, _event_rx) = broadcast::channel(16);
        let sink = Arc::new(ThreadSink::default());
        let cycle = MonitorCycle::new(
            Arc::new(MemoryStore::new()),
            sink.clone(),
            CycleSettings::default(),
        );
        let mut actor = MonitorActor::new(cmd_rx, cycle, event_tx);

        observe(&mut actor, order_body(2520)).await.unwrap();
        let outcome = observe(&mut actor, order_body(2605)).await.unwrap();
        assert!(outcome.is_notified());

        let threads = sink.threads.lock().unwrap();
        assert_eq!(threads.len(), 1);
        assert_ne!(threads[0], thread::current().id());
    }
}
