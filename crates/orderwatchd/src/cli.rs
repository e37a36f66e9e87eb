//! Command-line entry point shared by the `orderwatchd` binaries.
//!
//! ```bash
//! # Run the replay scheduler in the foreground
//! orderwatchd run
//!
//! # Feed an intercepted exchange (live path)
//! orderwatchd ingest --url "$URL" --response body.json --headers headers.json --body request.json
//!
//! # Replay the captured request once, now
//! orderwatchd check
//!
//! # Show stored state
//! orderwatchd status --key order:E100
//!
//! # Enable debug logging
//! RUST_LOG=orderwatchd=debug orderwatchd run
//! ```

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use orderwatch_core::MonitorKey;
use orderwatch_protocol::{parse_headers, CapturedRequest};

use crate::config::Config;
use crate::cycle::{CycleOutcome, MonitorCycle};
use crate::fetch::HttpReplayer;
use crate::lock::CYCLE_LOCK_FILE_NAME;
use crate::notify::{JsonlSink, LogSink, NotificationSink};
use crate::registry::{spawn_monitor, KeyState, MonitorHandle};
use crate::schedule::{replay_once, spawn_replay_task};
use crate::store::FileStore;

/// orderwatch daemon - order status change monitor
#[derive(Parser, Debug)]
#[command(name = "orderwatchd", version, about)]
struct Args {
    /// Config file (defaults to $ORDERWATCH_CONFIG, then the platform config dir)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the replay scheduler until SIGINT/SIGTERM
    Run,
    /// Process an intercepted request and its response
    Ingest {
        /// Request URL
        #[arg(long)]
        url: String,
        /// File holding the response body
        #[arg(long)]
        response: PathBuf,
        /// Request method (defaults to POST)
        #[arg(long)]
        method: Option<String>,
        /// File holding the request headers as a JSON object
        #[arg(long)]
        headers: Option<PathBuf>,
        /// File holding the request body
        #[arg(long)]
        body: Option<PathBuf>,
    },
    /// Replay the captured request once
    Check,
    /// Print stored state
    Status {
        /// Only this key (e.g. order:E100)
        #[arg(long)]
        key: Option<String>,
    },
}

/// Parses arguments and runs the selected command.
pub fn run() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("orderwatchd=info".parse()?)
                .add_directive("orderwatch_core=info".parse()?)
                .add_directive("orderwatch_protocol=info".parse()?),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = match &args.config {
        Some(path) => Config::load_from(path),
        None => Config::load(),
    }
    .context("Failed to load configuration")?;

    dispatch(args.command.unwrap_or(Command::Run), config)
}

#[tokio::main]
async fn dispatch(command: Command, config: Config) -> Result<()> {
    let handle = spawn_monitor(build_cycle(&config)?);

    match command {
        Command::Run => run_daemon(handle, &config).await,
        Command::Ingest {
            url,
            response,
            method,
            headers,
            body,
        } => {
            let request = CapturedRequest::new(
                url,
                method.as_deref(),
                parse_headers(&read_optional(headers.as_deref())?)
                    .context("Failed to parse request headers")?,
                read_optional(body.as_deref())?,
            );
            let response = read_file(&response)?;
            let outcome = handle.intercept(request, response).await?;
            println!("{}", describe_outcome(&outcome));
            Ok(())
        }
        Command::Check => {
            let replayer = HttpReplayer::new(config.request_timeout())?;
            let outcome = replay_once(&handle, &replayer).await?;
            println!("{}", describe_outcome(&outcome));
            Ok(())
        }
        Command::Status { key } => {
            let keys = match key {
                Some(raw) => vec![MonitorKey::parse(&raw)?],
                None => handle.keys().await?,
            };
            print_status(&handle, keys).await
        }
    }
}

fn build_cycle(config: &Config) -> Result<MonitorCycle> {
    let state_dir = config.state_dir();
    let store = FileStore::open_in(&state_dir)
        .with_context(|| format!("Failed to open state store in {}", state_dir.display()))?;

    let sink: Arc<dyn NotificationSink> = match &config.notification_file {
        Some(path) => Arc::new(JsonlSink::new(path)),
        None => Arc::new(LogSink),
    };

    Ok(
        MonitorCycle::new(Arc::new(store), sink, config.cycle_settings())
            .with_cycle_lock(state_dir.join(CYCLE_LOCK_FILE_NAME)),
    )
}

async fn run_daemon(handle: MonitorHandle, config: &Config) -> Result<()> {
    info!(
        version = env!("CARGO_PKG_VERSION"),
        pid = std::process::id(),
        state_dir = %config.state_dir().display(),
        "orderwatch daemon starting"
    );

    let cancel_token = CancellationToken::new();

    let shutdown_token = cancel_token.clone();
    tokio::spawn(async move {
        if let Err(e) = wait_for_shutdown_signal().await {
            error!(error = %e, "Error waiting for shutdown signal");
        }
        info!("Shutdown signal received");
        shutdown_token.cancel();
    });

    let replayer = HttpReplayer::new(config.request_timeout())?;
    let task = spawn_replay_task(
        handle,
        Arc::new(replayer),
        config.replay_interval,
        cancel_token,
    );

    task.await.context("Replay scheduler panicked")?;
    info!("orderwatch daemon stopped");
    Ok(())
}

async fn print_status(handle: &MonitorHandle, keys: Vec<MonitorKey>) -> Result<()> {
    let mut states: Vec<KeyState> = Vec::with_capacity(keys.len());
    for key in keys {
        states.push(handle.state(key).await?);
    }
    let template = handle.template().await?;

    let report = serde_json::json!({
        "template": template.map(|t| serde_json::json!({
            "url": t.url,
            "method": t.method,
            "captured_at": t.captured_at,
        })),
        "keys": states,
    });
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

fn describe_outcome(outcome: &CycleOutcome) -> String {
    match outcome {
        CycleOutcome::Baseline { key } => format!("{key}: baseline recorded"),
        CycleOutcome::Unchanged { key } => format!("{key}: no change"),
        CycleOutcome::Suppressed {
            key,
            changes,
            remaining,
        } => format!(
            "{key}: {changes} change(s), in cooldown for {}s",
            remaining.as_secs()
        ),
        CycleOutcome::Filtered { key, changes } => {
            format!("{key}: {changes} change(s), status not important")
        }
        CycleOutcome::Disabled { key, changes } => {
            format!("{key}: {changes} change(s), notifications disabled")
        }
        CycleOutcome::Notified {
            key, notification, ..
        } => format!("{key}: notified \"{}\"", notification.title),
        CycleOutcome::Ignored { url } => format!("ignored {url}"),
    }
}

fn read_file(path: &Path) -> Result<String> {
    fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))
}

fn read_optional(path: Option<&Path>) -> Result<String> {
    path.map(read_file).transpose().map(Option::unwrap_or_default)
}

/// Waits for a shutdown signal (SIGTERM or SIGINT).
async fn wait_for_shutdown_signal() -> Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigterm = signal(SignalKind::terminate())?;
        let mut sigint = signal(SignalKind::interrupt())?;

        tokio::select! {
            _ = sigterm.recv() => {
                info!("Received SIGTERM");
            }
            _ = sigint.recv() => {
                info!("Received SIGINT");
            }
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
        info!("Received Ctrl+C");
    }

    Ok(())
}
