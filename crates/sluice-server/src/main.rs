mod commands;

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use sluice_core::{
    AdminService, Maintenance, MessageStore, QueueService, RocksDbStorage, SluiceConfig,
};
use tracing::info;

#[derive(Parser)]
#[command(name = "sluice", about = "Sluice durable message queue")]
struct Cli {
    /// Config file (defaults to sluice.toml, then /etc/sluice/sluice.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the maintenance schedulers until SIGINT/SIGTERM
    Serve,

    /// Show message counts for a topic
    Stats {
        /// Topic name
        topic: String,

        /// Print as JSON
        #[arg(long)]
        json: bool,
    },

    /// Return expired leases to ready
    Reclaim {
        /// Maximum number of leases to reclaim
        #[arg(long, default_value = "500")]
        limit: usize,
    },

    /// Delete completed messages older than the given age
    PurgeDone {
        /// Topic name
        topic: String,

        /// Minimum age in seconds since completion
        #[arg(long, default_value = "0")]
        older_than_secs: u64,
    },

    /// Remove all dead letters of a topic (tombstones them when soft delete is on)
    PurgeDlq {
        /// Topic name
        topic: String,
    },

    /// Replay dead letters of a topic back into the live queue
    Replay {
        /// Topic name
        topic: String,

        /// Maximum number of dead letters to replay
        #[arg(long, default_value = "100")]
        limit: usize,
    },

    /// Inspect individual dead letters
    #[command(subcommand)]
    Dlq(DlqCommands),
}

#[derive(Subcommand)]
enum DlqCommands {
    /// List dead letters of a topic, oldest first
    List {
        /// Topic name
        topic: String,

        #[arg(long, default_value = "20")]
        limit: usize,
    },

    /// Replay one dead letter by id
    Replay {
        /// Dead letter id
        id: u64,
    },

    /// Permanently delete one dead letter by id
    Delete {
        /// Dead letter id
        id: u64,
    },
}

struct Services {
    queue: Arc<QueueService>,
    admin: Arc<AdminService>,
}

fn open_services(config: &SluiceConfig) -> Result<Services, Box<dyn std::error::Error>> {
    let storage = RocksDbStorage::open(&config.storage.data_dir)?
        .with_reclaim_policy(config.queue.reclaim_policy());
    let store: Arc<dyn MessageStore> = Arc::new(storage);
    info!(data_dir = %config.storage.data_dir.display(), "storage opened");

    let queue = Arc::new(QueueService::new(
        Arc::clone(&store),
        config.queue.clone(),
    ));
    let admin = Arc::new(AdminService::new(
        store,
        config.queue.clone(),
        config.dead_letter.clone(),
    ));
    Ok(Services { queue, admin })
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let config = SluiceConfig::load(cli.config.as_deref())?;
    sluice_core::telemetry::init_tracing(&config.logging);
    let services = open_services(&config)?;

    let result = match cli.command {
        Commands::Serve => return serve(services, &config).await,
        Commands::Stats { topic, json } => commands::stats(&services.admin, &topic, json),
        Commands::Reclaim { limit } => commands::reclaim(&services.admin, limit),
        Commands::PurgeDone {
            topic,
            older_than_secs,
        } => commands::purge_done(&services.admin, &services.queue, &topic, older_than_secs),
        Commands::PurgeDlq { topic } => commands::purge_dlq(&services.admin, &topic),
        Commands::Replay { topic, limit } => commands::replay(&services.admin, &topic, limit),
        Commands::Dlq(DlqCommands::List { topic, limit }) => {
            commands::dlq_list(&services.admin, &topic, limit)
        }
        Commands::Dlq(DlqCommands::Replay { id }) => commands::dlq_replay(&services.admin, id),
        Commands::Dlq(DlqCommands::Delete { id }) => commands::dlq_delete(&services.admin, id),
    };
    commands::exit_on_request_error(result)?;

    Ok(())
}

async fn serve(services: Services, config: &SluiceConfig) -> Result<(), Box<dyn std::error::Error>> {
    let maintenance = Maintenance::start(
        Arc::clone(&services.queue),
        Arc::clone(&services.admin),
        &config.maintenance,
    )?;
    info!(tasks = ?maintenance.tasks(), "sluice running");

    shutdown_signal().await;

    maintenance.shutdown()?;
    info!("sluice stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler");
        tokio::select! {
            _ = ctrl_c => {},
            _ = sigterm.recv() => {},
        }
    }

    #[cfg(not(unix))]
    {
        ctrl_c.await.expect("failed to install CTRL+C handler");
    }

    info!("received shutdown signal");
}
