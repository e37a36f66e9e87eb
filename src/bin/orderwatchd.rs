//! orderwatchd - order status monitor daemon.
//!
//! Watches a vehicle retail order API for status and data changes and
//! raises notifications, with a cooldown so bursts of changes do not spam.
//!
//! # Usage
//!
//! ```bash
//! # Run the replay scheduler (foreground)
//! orderwatchd run
//!
//! # Feed an intercepted exchange
//! orderwatchd ingest --url "$URL" --response body.json
//!
//! # Replay once / inspect state
//! orderwatchd check
//! orderwatchd status
//! ```
//!
//! # Signal Handling
//!
//! - SIGTERM/SIGINT: graceful shutdown of `run`

fn main() -> anyhow::Result<()> {
    orderwatchd::cli::run()
}
