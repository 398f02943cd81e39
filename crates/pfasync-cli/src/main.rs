mod commands;
mod logging;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "pfasync",
    version,
    about = "Plan-Forecast-Actual ingestion with raw capture, mapping and lineage"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to the ingest YAML file
    #[arg(long, short, default_value = "pfasync.yaml", global = true)]
    config: PathBuf,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, default_value = "info", global = true)]
    log_level: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a sync for one endpoint; the batch id is printed before fetching starts
    Sync {
        /// Endpoint id from the config
        endpoint: String,
        /// Ingest changes only; skips orphan reconciliation
        #[arg(long)]
        delta: bool,
        /// Print progress once per second until the run finishes
        #[arg(long)]
        watch: bool,
    },
    /// Show progress counters for a batch
    Progress { batch: String },
    /// List batches, newest first
    History {
        #[arg(long)]
        endpoint: Option<String>,
        /// Only batches whose fetch completed
        #[arg(long)]
        sealed: bool,
        #[arg(long, default_value_t = 20)]
        limit: u32,
        #[arg(long, default_value_t = 0)]
        offset: u32,
    },
    /// Print raw records captured in a batch
    Bronze {
        batch: String,
        #[arg(long, default_value_t = 50)]
        limit: u32,
        #[arg(long, default_value_t = 0)]
        offset: u32,
    },
    /// Print records that failed capture or transformation in a batch
    DeadLetters {
        batch: String,
        #[arg(long, default_value_t = 50)]
        limit: u32,
        #[arg(long, default_value_t = 0)]
        offset: u32,
    },
    /// Trace a normalized record back to its raw record and mapping version
    Lineage {
        record: i64,
        /// Show every transformation instead of the current edge
        #[arg(long)]
        history: bool,
    },
    /// Compare the two latest sealed batches of an endpoint
    Drift { endpoint: String },
    /// Manage field mapping rules
    Mappings {
        #[command(subcommand)]
        command: MappingsCommand,
    },
    /// List or restore discontinued records
    Orphans {
        #[command(subcommand)]
        command: OrphansCommand,
    },
    /// Request cancellation of an in-progress run
    Cancel { batch: String },
    /// Start a new run for a failed or cancelled batch
    Retry { batch: String },
    /// Re-run the transformation of a sealed batch with the current rules
    Recommit { batch: String },
    /// Mark runs left in progress by a dead process as failed
    Recover,
    /// Validate the config and open the record store
    Check,
}

#[derive(Subcommand)]
pub enum MappingsCommand {
    /// Print active rules
    List { endpoint: String },
    /// Replace active rules with the contents of a JSON or YAML file
    Save { endpoint: String, file: PathBuf },
    /// Run rules from a file against recent raw records without writing
    Preview { endpoint: String, file: PathBuf },
    /// Snapshot the active rules
    Snapshot { endpoint: String },
    /// List snapshots, oldest first
    Versions { endpoint: String },
    /// Print one snapshot
    Show { version: i64 },
    /// Replace active rules with a snapshot
    Restore { endpoint: String, version: i64 },
}

#[derive(Subcommand)]
pub enum OrphansCommand {
    /// List discontinued records in a scope
    List {
        scope: String,
        #[arg(long, default_value_t = 50)]
        limit: u32,
        #[arg(long, default_value_t = 0)]
        offset: u32,
    },
    /// Clear the discontinued flag on the given records
    Restore {
        #[arg(required = true)]
        ids: Vec<i64>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    logging::init(&cli.log_level);

    let config = cli.config.as_path();
    match cli.command {
        Commands::Sync { endpoint, delta, watch } => {
            commands::sync::execute(config, &endpoint, delta, watch).await
        }
        Commands::Progress { batch } => commands::runs::progress(config, &batch).await,
        Commands::History { endpoint, sealed, limit, offset } => {
            commands::bronze::history(config, endpoint, sealed, limit, offset).await
        }
        Commands::Bronze { batch, limit, offset } => {
            commands::bronze::records(config, &batch, limit, offset).await
        }
        Commands::DeadLetters { batch, limit, offset } => {
            commands::bronze::dead_letters(config, &batch, limit, offset).await
        }
        Commands::Lineage { record, history } => {
            commands::lineage::execute(config, record, history).await
        }
        Commands::Drift { endpoint } => commands::drift::execute(config, &endpoint).await,
        Commands::Mappings { command } => commands::mappings::execute(config, command).await,
        Commands::Orphans { command } => commands::orphans::execute(config, command).await,
        Commands::Cancel { batch } => commands::runs::cancel(config, &batch).await,
        Commands::Retry { batch } => commands::runs::retry(config, &batch).await,
        Commands::Recommit { batch } => commands::runs::recommit(config, &batch).await,
        Commands::Recover => commands::runs::recover(config).await,
        Commands::Check => commands::check::execute(config).await,
    }
}
