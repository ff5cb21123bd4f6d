//! sidecar-daemon: Keeps attachment sidecars in sync for a vault on disk.
//!
//! Runs the same reactor as any other host, but over the native filesystem
//! with a notify watcher as the event source.

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use sidecar_core::reconcile::DEFAULT_CONCURRENCY;
use sidecar_core::{reconcile, repair, DeleteMode, Outcome, Reactor, ReactorConfig, StoreEvent};
use sidecar_daemon::native_fs::NativeStore;
use sidecar_daemon::settings::SettingsStorage;
use sidecar_daemon::watcher::{FileWatcher, RENAME_PAIR_TTL};

#[derive(Parser, Debug)]
#[command(name = "sidecar-daemon")]
#[command(about = "Attachment sidecar sync daemon")]
struct Args {
    /// Path to the vault directory
    #[arg(short, long, env = "SIDECAR_VAULT")]
    vault: PathBuf,

    /// Enable verbose logging
    #[arg(long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Watch the vault and keep sidecars in sync (default)
    Watch(WatchArgs),
    /// Create missing sidecars for every attachment, then exit
    Reconcile {
        /// Number of sidecars created concurrently
        #[arg(long, default_value_t = DEFAULT_CONCURRENCY)]
        concurrency: usize,
    },
    /// Rewrite stale back-references left by interrupted renames, then exit
    Repair,
    /// Show or change presentation settings
    Settings {
        /// Hide sidecar files from the file explorer
        #[arg(long)]
        hide_sidecar_files: Option<bool>,
    },
}

#[derive(clap::Args, Debug, Default)]
struct WatchArgs {
    /// Delete sidecars outright instead of moving them to .trash
    #[arg(long)]
    permanent_delete: bool,

    /// Deleting a sidecar also deletes its attachment
    #[arg(long)]
    cascade_sidecar_delete: bool,

    /// Run a reconciliation pass before watching
    #[arg(long)]
    reconcile_on_start: bool,
}

impl WatchArgs {
    fn reactor_config(&self) -> ReactorConfig {
        ReactorConfig {
            delete_mode: if self.permanent_delete {
                DeleteMode::Permanent
            } else {
                DeleteMode::Trash
            },
            cascade_sidecar_delete: self.cascade_sidecar_delete,
        }
    }
}

/// Daemon state holding all components.
struct Daemon {
    /// Applies sidecar policies to vault events
    reactor: Reactor<NativeStore>,
    /// File watcher
    watcher: FileWatcher,
}

impl Daemon {
    /// Handle a store event from the watcher.
    async fn on_store_event(&self, event: StoreEvent) {
        // Mutations and failures are logged by the reactor
        if let Outcome::Skipped(reason) = self.reactor.handle(event.clone()).await {
            debug!("Skipped {}: {:?}", event.path(), reason);
        }
    }
}

async fn run_watch(vault: PathBuf, args: WatchArgs) -> Result<()> {
    let store = NativeStore::new(vault.clone());

    if args.reconcile_on_start {
        reconcile(&store, DEFAULT_CONCURRENCY).await?;
    }

    let watcher = FileWatcher::new(vault)?;
    info!("File watcher started");

    let mut daemon = Daemon {
        reactor: Reactor::new(store, args.reactor_config()),
        watcher,
    };
    info!("Reactor config: {:?}", daemon.reactor.config());

    let mut flush = tokio::time::interval(RENAME_PAIR_TTL);
    flush.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    info!("Daemon running. Press Ctrl+C to stop.");

    // Main event loop
    loop {
        tokio::select! {
            // Handle file watcher events
            Some(event) = daemon.watcher.event_rx().recv() => {
                daemon.on_store_event(event).await;
            }
            // Surface renames that left the vault as deletions
            _ = flush.tick() => {
                daemon.watcher.flush_expired();
            }
            // Handle graceful shutdown
            _ = tokio::signal::ctrl_c() => {
                info!("Shutdown signal received");
                break;
            }
        }
    }

    info!("Shutting down");
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Set up logging - respects RUST_LOG env var, defaults to info (or debug with --verbose)
    let default_filter = if args.verbose {
        "debug,sidecar_core=debug,sidecar_daemon=debug"
    } else {
        "info,sidecar_core=info,sidecar_daemon=info"
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    if !args.vault.is_dir() {
        bail!("Vault path is not a directory: {}", args.vault.display());
    }
    info!("Vault path: {:?}", args.vault);

    match args.command.unwrap_or(Command::Watch(WatchArgs::default())) {
        Command::Watch(watch) => run_watch(args.vault, watch).await?,
        Command::Reconcile { concurrency } => {
            let store = NativeStore::new(args.vault);
            let report = reconcile(&store, concurrency).await?;
            for path in &report.orphaned {
                info!("Orphaned sidecar: {}", path);
            }
            println!("{}", report);
        }
        Command::Repair => {
            let store = NativeStore::new(args.vault);
            let report = repair(&store).await?;
            println!("{}", report);
        }
        Command::Settings { hide_sidecar_files } => {
            let mut storage = SettingsStorage::new(&args.vault)?;
            if let Some(hide) = hide_sidecar_files {
                storage.set_hide_sidecar_files(hide)?;
                info!("Saved settings to {:?}", storage.path());
            }
            println!("{}", serde_json::to_string_pretty(storage.get())?);
        }
    }

    Ok(())
}
