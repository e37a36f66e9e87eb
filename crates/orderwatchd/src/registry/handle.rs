//! Client interface for the monitor actor.
//!
//! `MonitorHandle` is cheap to clone and shared by the live path, the
//! replay scheduler and the CLI.
//!
//! # Panic-Free Guarantees
//!
//! Channel failures map to `CycleError::ChannelClosed`.

use tokio::sync::{broadcast, mpsc, oneshot};

use orderwatch_core::{MonitorKey, StatusSource};
use orderwatch_protocol::CapturedRequest;

use super::commands::{KeyState, MonitorCommand, MonitorEvent};
use crate::cycle::{CycleError, CycleOutcome};

/// Handle for interacting with the monitor actor.
///
/// ```ignore
/// let outcome = handle.intercept(request, body).await?;
///
/// let mut rx = handle.subscribe();
/// while let Ok(event) = rx.recv().await {
///     // Handle event
/// }
/// ```
#[derive(Clone)]
pub struct MonitorHandle {
    sender: mpsc::Sender<MonitorCommand>,
    event_sender: broadcast::Sender<MonitorEvent>,
}

impl MonitorHandle {
    pub fn new(
        sender: mpsc::Sender<MonitorCommand>,
        event_sender: broadcast::Sender<MonitorEvent>,
    ) -> Self {
        Self {
            sender,
            event_sender,
        }
    }

    /// Live path: an intercepted request and its response body.
    pub async fn intercept(
        &self,
        request: CapturedRequest,
        body: String,
    ) -> Result<CycleOutcome, CycleError> {
        let (tx, rx) = oneshot::channel();

        self.sender
            .send(MonitorCommand::Intercept {
                request: Box::new(request),
                body,
                respond_to: tx,
            })
            .await
            .map_err(|_| CycleError::ChannelClosed)?;

        rx.await.map_err(|_| CycleError::ChannelClosed)?
    }

    /// Runs a cycle on a body obtained by other means.
    pub async fn observe(
        &self,
        source: StatusSource,
        body: String,
    ) -> Result<CycleOutcome, CycleError> {
        let (tx, rx) = oneshot::channel();

        self.sender
            .send(MonitorCommand::Observe {
                source,
                body,
                respond_to: tx,
            })
            .await
            .map_err(|_| CycleError::ChannelClosed)?;

        rx.await.map_err(|_| CycleError::ChannelClosed)?
    }

    /// The stored replay template, if any.
    pub async fn template(&self) -> Result<Option<CapturedRequest>, CycleError> {
        let (tx, rx) = oneshot::channel();

        self.sender
            .send(MonitorCommand::GetTemplate { respond_to: tx })
            .await
            .map_err(|_| CycleError::ChannelClosed)?;

        rx.await.map_err(|_| CycleError::ChannelClosed)?
    }

    pub async fn state(&self, key: MonitorKey) -> Result<KeyState, CycleError> {
        let (tx, rx) = oneshot::channel();

        self.sender
            .send(MonitorCommand::GetState { key, respond_to: tx })
            .await
            .map_err(|_| CycleError::ChannelClosed)?;

        rx.await.map_err(|_| CycleError::ChannelClosed)?
    }

    /// Keys with a stored baseline.
    pub async fn keys(&self) -> Result<Vec<MonitorKey>, CycleError> {
        let (tx, rx) = oneshot::channel();

        self.sender
            .send(MonitorCommand::ListKeys { respond_to: tx })
            .await
            .map_err(|_| CycleError::ChannelClosed)?;

        rx.await.map_err(|_| CycleError::ChannelClosed)?
    }

    /// Subscribe to cycle events.
    ///
    /// Slow subscribers may miss events (`RecvError::Lagged`).
    pub fn subscribe(&self) -> broadcast::Receiver<MonitorEvent> {
        self.event_sender.subscribe()
    }
}
