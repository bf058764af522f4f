//! # Dentiq — Notification Dispatch & Scheduling Engine
//!
//! Delivers appointment confirmations, reminders and cancellations to
//! patients over WhatsApp and email, with a durable retry queue and a
//! scheduler for the daily reminder scan and cleanup.
//!
//! Usage:
//!   dentiq                         # Run the dispatch service
//!   dentiq config-init             # Write a default config file
//!   dentiq status                  # Print queue counts and exit

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

use dentiq_channels::{EmailAdapter, WhatsAppAdapter};
use dentiq_core::config::DentiqConfig;
use dentiq_core::traits::AppointmentDirectory;
use dentiq_notify::{Orchestrator, TemplateCatalog};
use dentiq_queue::{QueueEngine, spawn_queue_loop};
use dentiq_scheduler::{
    CleanupRunner, ReminderScanRunner, Schedule, TaskScheduler, spawn_scheduler,
};
use dentiq_store::{JobStore, SqliteDirectory};

#[derive(Parser)]
#[command(
    name = "dentiq",
    version,
    about = "🦷 Dentiq — notification dispatch & scheduling engine"
)]
struct Cli {
    /// Config file path (default: ~/.dentiq/config.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the dispatch service (default)
    Serve,
    /// Write a default config file and exit
    ConfigInit,
    /// Print queue counts and exit
    Status,
}

fn expand_path(p: &str) -> PathBuf {
    match p.strip_prefix("~/") {
        Some(rest) => dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(rest),
        None => PathBuf::from(p),
    }
}

fn load_config(cli: &Cli) -> Result<DentiqConfig> {
    match &cli.config {
        Some(path) => Ok(DentiqConfig::load_from(path)?),
        None => Ok(DentiqConfig::load()?),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "dentiq=debug" } else { "dentiq=info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_target(false)
        .init();

    match cli.command.as_ref().unwrap_or(&Command::Serve) {
        Command::ConfigInit => config_init(&cli),
        Command::Status => status(&cli),
        Command::Serve => serve(&cli).await,
    }
}

fn config_init(cli: &Cli) -> Result<()> {
    let path = cli
        .config
        .clone()
        .unwrap_or_else(DentiqConfig::default_path);
    if path.exists() {
        println!("⚠️  Config already exists at {}", path.display());
        return Ok(());
    }
    DentiqConfig::default().save_to(&path)?;
    println!("✅ Default config written to {}", path.display());
    Ok(())
}

fn status(cli: &Cli) -> Result<()> {
    let config = load_config(cli)?;
    let store = JobStore::open(&expand_path(&config.store.db_path))?;
    let counts = store.queue_counts()?;
    println!("{}", serde_json::to_string_pretty(&counts)?);
    Ok(())
}

async fn serve(cli: &Cli) -> Result<()> {
    let config = load_config(cli)?;
    let db_path = expand_path(&config.store.db_path);
    tracing::info!("🦷 Dentiq starting (db: {})", db_path.display());

    let store = Arc::new(JobStore::open(&db_path)?);
    let directory = SqliteDirectory::open(&db_path)?;
    directory.ensure_schema()?;
    let directory: Arc<dyn AppointmentDirectory> = Arc::new(directory);

    // Queue engine with whichever channels are configured.
    let mut engine = QueueEngine::new(store.clone(), config.queue.clone());
    match &config.channels.whatsapp {
        Some(wa) => {
            engine.register_adapter(Arc::new(WhatsAppAdapter::new(wa.clone())));
            tracing::info!("📱 WhatsApp channel registered (enabled: {})", wa.enabled);
        }
        None => tracing::warn!("⚠️ WhatsApp channel not configured"),
    }
    match &config.channels.email {
        Some(em) => {
            engine.register_adapter(Arc::new(EmailAdapter::new(em.clone())));
            tracing::info!("📧 Email channel registered (enabled: {})", em.enabled);
        }
        None => tracing::warn!("⚠️ Email channel not configured"),
    }
    let engine = Arc::new(engine);

    let orchestrator = Arc::new(Orchestrator::new(
        store.clone(),
        directory.clone(),
        TemplateCatalog::new(),
        &config,
    ));

    // Maintenance tasks on their configured crons.
    let mut scheduler = TaskScheduler::new();
    scheduler.register(
        "reminder-scan",
        Schedule::cron(&config.scheduler.reminder_cron),
        Arc::new(ReminderScanRunner::new(
            orchestrator.clone(),
            directory.clone(),
            config.reminder.scan_window_hours,
        )),
    )?;
    scheduler.register(
        "cleanup",
        Schedule::cron(&config.scheduler.cleanup_cron),
        Arc::new(CleanupRunner::new(
            engine.clone(),
            config.cleanup.retention_days,
        )),
    )?;
    let scheduler = Arc::new(scheduler);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let queue_handle = tokio::spawn(spawn_queue_loop(engine.clone(), shutdown_rx.clone()));
    let scheduler_handle = tokio::spawn(spawn_scheduler(
        scheduler.clone(),
        config.scheduler.tick_secs,
        shutdown_rx,
    ));

    tracing::info!("✅ Dentiq running — press ctrl-c to stop");
    tokio::signal::ctrl_c().await?;
    tracing::info!("🛑 Shutting down");
    shutdown_tx.send(true)?;
    queue_handle.await?;
    scheduler_handle.await?;

    tracing::info!("👋 Dentiq stopped");
    Ok(())
}
