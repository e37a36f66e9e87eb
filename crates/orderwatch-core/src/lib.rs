//! orderwatch Core - Shared types for order change monitoring
//!
//! This crate provides the pure decision pieces shared between the
//! protocol layer and the daemon (orderwatchd):
//! - `diff` - bounded structural diff over JSON observations
//! - `status` - data-driven status and purchase availability classification
//! - `key` / `state` - monitor keys and the persisted per-key state records
//!
//! All code follows the panic-free policy: no `.unwrap()`, `.expect()`,
//! `panic!()`, `unreachable!()`, `todo!()`, or direct indexing `[i]`.

pub mod diff;
pub mod error;
pub mod key;
pub mod state;
pub mod status;

// Re-exports for convenience
pub use diff::{
    check_depth, diff, diff_values, ChangeRecord, DiffError, DEFAULT_BASE_PATH, MAX_CHANGES,
};
pub use error::{DomainError, DomainResult};
pub use key::MonitorKey;
pub use state::{NotifyPolicy, NotifyState, StatusSource, StatusState};
pub use status::{
    classify_availability, Availability, Classification, ImportanceMarker, StatusEntry, StatusTable,
};
