//! Monitor registry using the actor pattern.
//!
//! One actor task owns the `MonitorCycle` and runs every cycle in
//! arrival order. Trigger paths talk to it through a `MonitorHandle`.
//!
//! ```text
//! ┌──────────────┐                  ┌──────────────┐     ┌──────────────────┐
//! │  intercept   │──┐               │              │     │                  │
//! └──────────────┘  │ MonitorCommand│ MonitorActor │────▶│ broadcast of     │
//! ┌──────────────┐  ├──────────────▶│ (owns cycle, │     │ MonitorEvent     │
//! │ replay task  │──┘  (mpsc)       │  store, sink)│     │                  │
//! └──────────────┘                  └──────────────┘     └──────────────────┘
//! ```
//!
//! # Panic-Free Guarantees
//!
//! - No `.unwrap()` or `.expect()` in production code
//! - Channel operations handle closure gracefully

use tokio::sync::{broadcast, mpsc};

use crate::cycle::MonitorCycle;

mod actor;
mod commands;
mod handle;

pub use actor::MonitorActor;
pub use commands::{KeyState, MonitorCommand, MonitorEvent};
pub use handle::MonitorHandle;

/// Channel buffer sizes
const COMMAND_BUFFER: usize = 64;
const EVENT_BUFFER: usize = 64;

/// Spawns the monitor actor and returns a handle to it.
///
/// The actor stops once every handle is dropped.
///
/// ```no_run
/// use std::sync::Arc;
/// use orderwatchd::cycle::{CycleSettings, MonitorCycle};
/// use orderwatchd::notify::LogSink;
/// use orderwatchd::registry::spawn_monitor;
/// use orderwatchd::store::MemoryStore;
///
/// #[tokio::main]
/// async fn main() {
///     let cycle = MonitorCycle::new(
///         Arc::new(MemoryStore::new()),
///         Arc::new(LogSink),
///         CycleSettings::default(),
///     );
///     let handle = spawn_monitor(cycle);
///     let keys = handle.keys().await;
/// }
/// ```
pub fn spawn_monitor(cycle: MonitorCycle) -> MonitorHandle {
    let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_BUFFER);
    let (event_tx, _) = broadcast::channel(EVENT_BUFFER);

    let actor = MonitorActor::new(cmd_rx, cycle, event_tx.clone());
    tokio::spawn(actor.run());

    MonitorHandle::new(cmd_tx, event_tx)
}
