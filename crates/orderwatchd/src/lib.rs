//! orderwatch daemon - change tracking, notification gating and replay.
//!
//! - `store` - key-value persistence (`MemoryStore`, `FileStore`)
//! - `lock` - advisory file locks shared between processes
//! - `tracker` - snapshot comparison per monitor key
//! - `gate` - cooldown and change-only gating
//! - `cycle` - one parse → classify → diff → gate → notify → persist pass
//! - `registry` - actor that serializes all cycles
//! - `fetch` / `schedule` - scheduled replay of the captured request
//! - `notify` - notification sinks
//! - `config` / `cli` - configuration and the command-line entry point
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                      orderwatchd                             │
//! ├──────────────────────────────────────────────────────────────┤
//! │                                                              │
//! │  ingest ─────────────┐                                       │
//! │  (intercepted body)  │       ┌────────────────────────┐      │
//! │                      ├──────▶│     MonitorActor       │      │
//! │  replay task ────────┘       │  MonitorCycle          │      │
//! │  (HttpReplayer,              │   ├─ ChangeTracker ──┐ │      │
//! │   outside the actor)         │   ├─ NotificationGate├─┼─▶ KvStore
//! │                              │   └─ NotificationSink│ │      │
//! │                              └──────────┬─────────────┘      │
//! │                                         │ MonitorEvent       │
//! │                                         ▼                    │
//! │                              broadcast::Sender               │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Panic-Free Guarantees
//!
//! Production code in this crate does not `.unwrap()`, `.expect()` or
//! `panic!()`; fallible operations return `Result` and channel closure
//! maps to `CycleError::ChannelClosed`.

pub mod cli;
pub mod config;
pub mod cycle;
pub mod fetch;
pub mod gate;
pub mod lock;
pub mod notify;
pub mod registry;
pub mod schedule;
pub mod store;
pub mod tracker;
