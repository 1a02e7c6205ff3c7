//! Command-line interface for voiceform.
//!
//! Provides commands for submitting intake forms, inspecting and clearing
//! the offline queue, syncing it once or continuously, and listing what
//! already reached the remote store.

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use crate::adapters::{DisconnectedRemote, RemoteStore, SupabaseClient};
use crate::config::{self, ResolvedConfig, StorageBackend};
use crate::core::{probe_once, DrainReport, IntakeService, ProbeMonitor, SubmitResult};
use crate::domain::{FormData, ServerRecord};
use crate::storage::{FileStore, KeyValueStore, SqliteStore};

/// voiceform - Offline-first intake form sync
#[derive(Parser, Debug)]
#[command(name = "voiceform")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Submit a form (queued automatically when offline)
    Submit {
        /// Name of the person
        #[arg(short, long)]
        name: String,

        /// Role, e.g. "Head of Family" or "Patient"
        #[arg(short, long)]
        role: String,

        /// Phone number
        #[arg(short, long)]
        phone: Option<String>,

        /// Address
        #[arg(short, long)]
        address: Option<String>,

        /// Free-text message
        #[arg(short, long)]
        message: Option<String>,

        /// Skip the connectivity probe and queue directly
        #[arg(long)]
        offline: bool,
    },

    /// List submissions waiting in the offline queue
    Pending,

    /// Push queued submissions to the remote store once
    Sync,

    /// Watch connectivity and sync whenever it comes back
    Watch,

    /// List submissions already stored remotely (newest first)
    Submissions {
        /// Maximum number of submissions to show
        #[arg(short, long, default_value = "20")]
        limit: usize,
    },

    /// Drop everything in the offline queue
    Clear {
        /// Required confirmation
        #[arg(long)]
        yes: bool,
    },

    /// Show resolved configuration (debug)
    Config,
}

impl Cli {
    /// Execute the CLI command
    pub async fn execute(self) -> Result<()> {
        match self.command {
            Commands::Submit {
                name,
                role,
                phone,
                address,
                message,
                offline,
            } => {
                let mut form = FormData::new(name, role);
                if let Some(phone) = phone {
                    form = form.with_phone(phone);
                }
                if let Some(address) = address {
                    form = form.with_address(address);
                }
                if let Some(message) = message {
                    form = form.with_message(message);
                }
                submit(form, offline).await
            }
            Commands::Pending => list_pending().await,
            Commands::Sync => sync_once().await,
            Commands::Watch => watch().await,
            Commands::Submissions { limit } => list_submissions(limit).await,
            Commands::Clear { yes } => clear_queue(yes).await,
            Commands::Config => show_config().await,
        }
    }
}

/// Open the configured queue storage backend
fn open_store(cfg: &ResolvedConfig) -> Result<Arc<dyn KeyValueStore>> {
    let store: Arc<dyn KeyValueStore> = match cfg.storage_backend {
        StorageBackend::File => Arc::new(FileStore::new(cfg.queue_dir())),
        StorageBackend::Sqlite => {
            let path = cfg.sqlite_path();
            Arc::new(
                SqliteStore::open(&path)
                    .with_context(|| format!("Failed to open queue database: {}", path.display()))?,
            )
        }
    };
    Ok(store)
}

/// Build the remote client; without credentials the device is treated as offline
fn open_remote(cfg: &ResolvedConfig) -> Result<Arc<dyn RemoteStore>> {
    match (&cfg.remote.url, &cfg.remote.anon_key) {
        (Some(url), Some(key)) => {
            let client = SupabaseClient::new(url, key, cfg.remote_timeout())
                .context("Failed to create Supabase client")?;
            Ok(Arc::new(client))
        }
        _ => {
            tracing::warn!("SUPABASE_URL / SUPABASE_ANON_KEY not set, running offline");
            Ok(Arc::new(DisconnectedRemote::new(
                "set SUPABASE_URL and SUPABASE_ANON_KEY",
            )))
        }
    }
}

/// Build the service plus the remote handle used for probing
fn open_service(cfg: &ResolvedConfig) -> Result<(IntakeService, Arc<dyn RemoteStore>)> {
    let store = open_store(cfg)?;
    let remote = open_remote(cfg)?;
    let service = IntakeService::with_table(store, remote.clone(), cfg.remote.table.clone())
        .with_drain_lock(cfg.drain_lock_path());
    Ok((service, remote))
}

/// Submit one form
async fn submit(form: FormData, force_offline: bool) -> Result<()> {
    let cfg = config::config()?;
    let (service, remote) = open_service(cfg)?;

    let is_online = if force_offline {
        false
    } else {
        probe_once(remote.as_ref()).await
    };

    let result = service.submit(form, is_online).await;
    println!("{}", result.user_message());

    match result {
        SubmitResult::Uploaded(record) => {
            println!("  Remote id: {}", record.id);
        }
        SubmitResult::Queued(queued) => {
            println!("  Queue id:  {}", queued.temp_id);
            println!("  Pending:   {}", service.queue().len().await);
        }
        SubmitResult::Failed(e) => {
            anyhow::bail!("{}", e);
        }
    }

    Ok(())
}

/// List the offline queue
async fn list_pending() -> Result<()> {
    let cfg = config::config()?;
    let (service, _) = open_service(cfg)?;
    let pending = service.get_all().await;

    if pending.is_empty() {
        println!("No pending submissions");
        return Ok(());
    }

    println!(
        "{:<15} {:<26} {:<24} {:<16}",
        "QUEUE ID", "CAPTURED", "NAME", "ROLE"
    );
    println!("{}", "-".repeat(83));

    for item in &pending {
        println!(
            "{:<15} {:<26} {:<24} {:<16}",
            item.temp_id,
            item.created_at.format("%Y-%m-%d %H:%M:%S UTC"),
            truncate(&item.form.name, 23),
            truncate(&item.form.role, 16),
        );
    }

    let status = service.queue().status().await;
    println!();
    println!("{} submission(s) waiting to sync", status.pending);
    if status.unreadable > 0 {
        println!("{} unreadable stored entries kept as-is", status.unreadable);
    }
    if let Some(oldest) = status.oldest {
        println!("Oldest captured {}", oldest.format("%Y-%m-%d %H:%M:%S UTC"));
    }
    Ok(())
}

/// One drain pass, skipped when the remote is unreachable
async fn sync_once() -> Result<()> {
    let cfg = config::config()?;
    let (service, remote) = open_service(cfg)?;

    let pending = service.queue().len().await;
    if pending == 0 {
        println!("✓ Nothing to sync");
        return Ok(());
    }

    if !probe_once(remote.as_ref()).await {
        println!("Offline: {} submission(s) remain queued", pending);
        return Ok(());
    }

    let report = service.drain().await;
    print_report(&report);

    if !report.failed.is_empty() {
        anyhow::bail!("{} submission(s) failed to sync", report.failed.len());
    }
    Ok(())
}

/// Watch connectivity and drain on every reconnect
async fn watch() -> Result<()> {
    let cfg = config::config()?;
    let (service, remote) = open_service(cfg)?;

    println!("👁️  Watching connectivity to {}", remote.name());
    println!("    Probe every {}s, press Ctrl+C to stop", cfg.probe_interval().as_secs());
    println!("    Pending: {}", service.queue().len().await);
    println!();

    let monitor = ProbeMonitor::spawn(remote, cfg.probe_interval());
    let (mut reports, handle) = service.spawn_sync_on_reconnect(&monitor, cfg.safety_net());

    loop {
        tokio::select! {
            Some(report) = reports.recv() => {
                print_report(&report);
            }
            _ = tokio::signal::ctrl_c() => {
                println!();
                println!("🛑 Stopping...");
                break;
            }
        }
    }

    handle.abort();
    monitor.stop();

    let remaining = service.queue().len().await;
    if remaining > 0 {
        println!("{} submission(s) still queued", remaining);
    }
    Ok(())
}

/// List remote submissions
async fn list_submissions(limit: usize) -> Result<()> {
    let cfg = config::config()?;
    let (service, _) = open_service(cfg)?;

    let records = service
        .list_remote()
        .await
        .context("Failed to fetch submissions")?;

    if records.is_empty() {
        println!("No submissions found");
        return Ok(());
    }

    print_records_header();
    for record in records.iter().take(limit) {
        print_record(record);
    }

    if records.len() > limit {
        println!();
        println!("... and {} more", records.len() - limit);
    }
    Ok(())
}

/// Empty the offline queue
async fn clear_queue(confirmed: bool) -> Result<()> {
    if !confirmed {
        anyhow::bail!("Refusing to clear the queue without --yes (queued submissions are not synced)");
    }

    let cfg = config::config()?;
    let (service, _) = open_service(cfg)?;

    let dropped = service.queue().len().await;
    service.queue().clear().await?;
    println!("Cleared {} queued submission(s)", dropped);
    Ok(())
}

/// Show the resolved configuration (for debugging)
async fn show_config() -> Result<()> {
    let cfg = config::config()?;

    println!("voiceform configuration");
    println!("══════════════════════════════════════════════════════════════");
    println!();
    println!(
        "Config file: {}",
        cfg.config_file
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "(none - using defaults)".to_string())
    );
    println!();
    println!("Storage:");
    println!("  Home:     {}", cfg.home.display());
    match cfg.storage_backend {
        StorageBackend::File => println!("  Backend:  file ({})", cfg.queue_dir().display()),
        StorageBackend::Sqlite => println!("  Backend:  sqlite ({})", cfg.sqlite_path().display()),
    }
    println!();
    println!("Remote:");
    println!(
        "  URL:      {}",
        cfg.remote.url.as_deref().unwrap_or("(not set)")
    );
    println!(
        "  Anon key: {}",
        if cfg.remote.anon_key.is_some() { "(set)" } else { "(not set)" }
    );
    println!("  Table:    {}", cfg.remote.table);
    println!("  Timeout:  {}s", cfg.remote.timeout_seconds);
    println!();
    println!("Sync:");
    println!("  Probe interval: {}s", cfg.probe_interval().as_secs());
    match cfg.safety_net() {
        Some(period) => println!("  Safety net:     every {}s", period.as_secs()),
        None => println!("  Safety net:     disabled"),
    }

    Ok(())
}

fn print_report(report: &DrainReport) {
    if report.skipped {
        println!("⏳ Another voiceform process is syncing, try again shortly");
        return;
    }

    println!(
        "🔄 Synced {} of {} queued submission(s)",
        report.succeeded.len(),
        report.attempted()
    );

    if !report.uploaded.is_empty() {
        print_records_header();
        for record in &report.uploaded {
            print_record(record);
        }
    }

    for temp_id in &report.failed {
        println!("  ⚠️  {} still queued", temp_id);
    }
}

fn print_records_header() {
    println!("{:<10} {:<24} {:<16} {:<16}", "ID", "NAME", "ROLE", "PHONE");
    println!("{}", "-".repeat(69));
}

fn print_record(record: &ServerRecord) {
    println!(
        "{:<10} {:<24} {:<16} {:<16}",
        truncate(&record.id.to_string(), 10),
        truncate(&record.name, 23),
        truncate(record.role().unwrap_or("-"), 16),
        record.phone.as_deref().unwrap_or("-"),
    );
}

/// Shorten to `max` chars, marking the cut
fn truncate(value: &str, max: usize) -> String {
    if value.chars().count() <= max {
        value.to_string()
    } else {
        let kept: String = value.chars().take(max.saturating_sub(1)).collect();
        format!("{}…", kept)
    }
}
