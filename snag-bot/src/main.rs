//! Snag Bot (snag-bot) - Main entry point
//!
//! Drives the conversational core from newline-delimited JSON events on
//! stdin and writes outbound messages as JSON lines on stdout. Logs go to
//! stderr.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use snag_bot::db::DefectStore;
use snag_bot::ephemeral::SqliteEphemeralStore;
use snag_bot::inbound::InboundEvent;
use snag_bot::messaging::{ConsoleMessenger, Messenger};
use snag_bot::reminders::ReminderService;
use snag_bot::Engine;
use snag_common::config;
use snag_common::db::init_database;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::signal;
use tracing::{debug, error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Command-line arguments for snag-bot
#[derive(Parser, Debug)]
#[command(name = "snag-bot")]
#[command(about = "Conversational defect tracker core")]
#[command(version)]
struct Args {
    /// Path to the TOML config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// SQLite database file (overrides the config file)
    #[arg(short, long, env = "SNAG_DATABASE")]
    database: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = config::load_config(args.config.as_deref()).context("Failed to load configuration")?;

    // Initialize tracing (stdout is reserved for outbound messages)
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                format!("snag_bot={lvl},snag_common={lvl}", lvl = config.logging.level).into()
            }),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let db_path = args.database.clone().unwrap_or_else(|| config.database_path());
    info!("Starting snag-bot");
    info!("Database: {}", db_path.display());

    let pool = init_database(&db_path)
        .await
        .context("Failed to initialize database")?;

    let store = DefectStore::new(pool.clone());
    let ephemeral = Arc::new(SqliteEphemeralStore::new(pool.clone()));
    let messenger: Arc<dyn Messenger> = Arc::new(ConsoleMessenger::new());

    let engine = Engine::new(store.clone(), ephemeral.clone(), messenger.clone(), &config);
    info!("Conversation engine initialized");

    let reminders = Arc::new(ReminderService::new(
        store,
        messenger,
        config.reminders.clone(),
        config.control.utc_offset_minutes,
        engine.event_sender(),
    ));
    reminders.run();

    // Expired drafts and wizard states are dropped lazily on read; sweep the rest
    tokio::spawn(async move {
        let mut timer = tokio::time::interval(Duration::from_secs(600));
        timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            timer.tick().await;
            if let Err(e) = ephemeral.purge_expired().await {
                warn!("Ephemeral purge failed: {}", e);
            }
        }
    });

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    let mut input_closed = false;
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line.context("Failed to read stdin")? else {
                    info!("Input closed");
                    input_closed = true;
                    break;
                };
                if line.trim().is_empty() {
                    continue;
                }
                let event: InboundEvent = match serde_json::from_str(&line) {
                    Ok(event) => event,
                    Err(e) => {
                        warn!("Skipping malformed event: {}", e);
                        continue;
                    }
                };

                // Enqueued here so stdin order is kept per actor
                let outcome = engine.submit(event);
                tokio::spawn(async move {
                    match outcome.await {
                        Ok(handled) => debug!(?handled, "Event processed"),
                        Err(e) => error!("Event failed: {}", e),
                    }
                });
            }
            _ = &mut shutdown => break,
        }
    }

    if input_closed {
        // Pending bursts still owe their next prompt
        let limit = config.capture.album_delay().max(config.capture.single_delay()) + Duration::from_secs(5);
        if !engine.settle(limit).await {
            warn!("Exiting with conversation work still pending");
        }
    }
    info!("Shutdown complete");
    Ok(())
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down");
        },
    }
}
