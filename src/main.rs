use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use erp_flow::config::ErpFlowConfig;
use erp_flow::inventory::{Caller, NewTransaction, Receipt, ReportFilter, TransactionType};
use erp_flow::store::{MemoryStore, RecordStore};
use erp_flow::telemetry::{init_telemetry, shutdown_telemetry};
use erp_flow::{workflow_metrics, ProjectChangeEvent, Services};

#[derive(Parser)]
#[command(name = "erp-flow")]
#[command(about = "Project workflow orchestration and inventory ledger")]
#[command(long_about = "erp-flow reacts to project change events (role assignments, notifications, \
                       task index upkeep, stock deduction on completion) and books inventory \
                       movements through an atomic, append-only ledger.")]
struct Cli {
    /// JSON fixture `{collection: {id: document}}` to seed the in-memory store
    #[arg(long, global = true)]
    seed: Option<PathBuf>,

    /// Print the whole store as JSON after the command (in-memory store only)
    #[arg(long, global = true)]
    dump: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Handle one project change event read from a JSON file
    Event {
        /// File holding `{projectId, eventId?, before, after}`
        #[arg(long)]
        file: PathBuf,
    },
    /// List inventory items
    Report {
        #[arg(long)]
        category: Option<String>,
        #[arg(long)]
        location: Option<String>,
        /// Only items whose stock is below their minimum
        #[arg(long)]
        below_minimum: bool,
    },
    /// Book a stock movement
    Transaction {
        #[arg(long)]
        item: String,
        /// IN, OUT, ADJUST or TRANSFER
        #[arg(long = "type")]
        kind: TransactionType,
        #[arg(long)]
        quantity: f64,
        /// Identity recorded on the transaction
        #[arg(long)]
        user: String,
        #[arg(long)]
        note: Option<String>,
        /// Destination location for TRANSFER
        #[arg(long)]
        destination: Option<String>,
    },
    /// Confirm a goods receipt read from a JSON file
    Receive {
        #[arg(long)]
        file: PathBuf,
        #[arg(long)]
        user: String,
    },
    /// Replay an item's transaction log and compare it with the recorded stock
    Verify {
        #[arg(long)]
        item: String,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let _ = ErpFlowConfig::load_env_file();
    let config = ErpFlowConfig::load()?;
    init_telemetry(&config.observability)?;

    let result = tokio::runtime::Runtime::new()?.block_on(async { run(cli, &config).await });

    workflow_metrics().log_stats();
    shutdown_telemetry();
    result
}

async fn run(cli: Cli, config: &ErpFlowConfig) -> Result<()> {
    let (store, memory) = open_store(config, cli.seed.as_deref()).await?;
    let services = Services::new(store, config);

    match cli.command {
        Commands::Event { file } => {
            let event: ProjectChangeEvent = read_json(&file)?;
            let report = services.engine.handle(event).await?;
            print_json(&report)?;
        }
        Commands::Report {
            category,
            location,
            below_minimum,
        } => {
            let filter = ReportFilter {
                category_id: category,
                location_id: location,
                below_minimum,
            };
            let items = services.ledger.report(&filter).await?;
            print_json(&items)?;
        }
        Commands::Transaction {
            item,
            kind,
            quantity,
            user,
            note,
            destination,
        } => {
            let mut input = NewTransaction::new(kind, item, quantity);
            if let Some(note) = note {
                input = input.with_note(note);
            }
            if let Some(destination) = destination {
                input = input.to_location(destination);
            }
            let receipt = services
                .ledger
                .create_transaction(Some(&Caller::new(user)), input)
                .await?;
            print_json(&receipt)?;
        }
        Commands::Receive { file, user } => {
            let receipt: Receipt = read_json(&file)?;
            let results = services.receipts.confirm(Some(&Caller::new(user)), &receipt).await?;
            print_json(&results)?;
        }
        Commands::Verify { item } => {
            let check = services.ledger.verify_item(&item).await?;
            println!(
                "{} item {}: recorded {} / replayed {} over {} entries",
                if check.is_consistent() { "✅" } else { "❌" },
                check.item_id,
                check.recorded,
                check.replayed,
                check.entries
            );
        }
    }

    if cli.dump {
        match memory {
            Some(memory) => print_json(&memory.dump().await)?,
            None => eprintln!("--dump only applies to the in-memory store"),
        }
    }
    Ok(())
}

/// SQLite when built with `database` and configured, otherwise a (seeded)
/// in-memory store.
async fn open_store(config: &ErpFlowConfig, seed: Option<&Path>) -> Result<(Arc<dyn RecordStore>, Option<Arc<MemoryStore>>)> {
    if let Some(store) = open_database(config).await? {
        if seed.is_some() {
            tracing::warn!("--seed is ignored when a database is configured");
        }
        return Ok((store, None));
    }

    let memory = match seed {
        Some(path) => Arc::new(MemoryStore::from_fixture(&read_json::<Value>(path)?)?),
        None => Arc::new(MemoryStore::new()),
    };
    let store: Arc<dyn RecordStore> = memory.clone();
    Ok((store, Some(memory)))
}

#[cfg(feature = "database")]
async fn open_database(config: &ErpFlowConfig) -> Result<Option<Arc<dyn RecordStore>>> {
    let Some(database) = &config.database else {
        return Ok(None);
    };
    let store: Arc<dyn RecordStore> =
        Arc::new(erp_flow::store::SqliteStore::new(&database.url, database.auto_migrate).await?);
    Ok(Some(store))
}

#[cfg(not(feature = "database"))]
async fn open_database(config: &ErpFlowConfig) -> Result<Option<Arc<dyn RecordStore>>> {
    if config.database.is_some() {
        tracing::warn!("database configured but erp-flow was built without the `database` feature, using memory");
    }
    Ok(None)
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let raw = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("parsing {}", path.display()))
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
