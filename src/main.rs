//! homeledger main entry point

use anyhow::Context;
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::runtime::Runtime;

use homeledger_api::{start_server, AppState};
use homeledger_config::{Config, ConfigError};
use homeledger_core::{ErrorCode, ImportRequest, ImportService, MemoryStore, StoreRef};
use homeledger_parser::SourceKind;
use homeledger_utils::{format_amount, month_key};

#[derive(Parser, Debug)]
#[command(name = "homeledger")]
#[command(version = "0.1.0")]
#[command(about = "Household budget tracker: transaction import, deduplication and limit flagging", long_about = None)]
struct Args {
    /// Configuration file path
    #[arg(short, long, default_value = "homeledger.yaml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Import a bank export or a JSON array of transactions
    Import {
        /// Household the transactions belong to
        #[arg(short, long)]
        tenant: String,
        /// Source file
        file: PathBuf,
        /// Format tag (checking, card, semicolon, generic); detected from the header when omitted
        #[arg(short, long)]
        format: Option<String>,
        /// The file is a JSON array instead of delimited text
        #[arg(long, conflicts_with = "format")]
        structured: bool,
        /// Batch currency
        #[arg(long)]
        currency: Option<String>,
        /// Payer for rows that do not name one
        #[arg(long)]
        payer: Option<String>,
        /// Covered month, YYYY-MM
        #[arg(long)]
        month: Option<String>,
    },
    /// Show spending against category limits
    Status {
        #[arg(short, long)]
        tenant: String,
        /// YYYY-MM, defaults to the current month
        #[arg(long)]
        month: Option<String>,
    },
    /// Write one month of transactions as CSV
    Export {
        #[arg(short, long)]
        tenant: String,
        #[arg(long)]
        month: String,
        /// Output directory
        #[arg(short, long, default_value = ".")]
        output: PathBuf,
    },
    /// Run the HTTP API
    Serve,
    /// Print a default configuration file
    InitConfig,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    if let Command::InitConfig = args.command {
        print!("{}", Config::generate_default());
        return Ok(());
    }

    let config = load_config(&args.config)?;
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(config.logging.level.as_str()))
        .init();
    log::debug!(target: "homeledger", "configuration: {:?}", config);

    let rt = Runtime::new()?;
    rt.block_on(run(args.command, config))
}

/// Configuration from `path`, or the built-in defaults when the file is absent
fn load_config(path: &Path) -> anyhow::Result<Config> {
    match Config::load(path) {
        Ok(config) => Ok(config),
        Err(ConfigError::FileNotFound { .. }) => {
            eprintln!("{} not found, using default settings", path.display());
            Ok(Config::default())
        }
        Err(e) => {
            eprintln!("{}", e.to_details());
            Err(e.into())
        }
    }
}

async fn open_store(config: &Config) -> anyhow::Result<Arc<MemoryStore>> {
    let store = match &config.store.snapshot_path {
        Some(path) => MemoryStore::load(path)
            .await
            .with_context(|| format!("reading store snapshot {}", path.display()))?,
        None => MemoryStore::new(),
    };
    Ok(Arc::new(store))
}

async fn save_store(config: &Config, store: &MemoryStore) -> anyhow::Result<()> {
    if let Some(path) = &config.store.snapshot_path {
        store
            .save(path)
            .await
            .with_context(|| format!("writing store snapshot {}", path.display()))?;
    }
    Ok(())
}

async fn run(command: Command, config: Config) -> anyhow::Result<()> {
    let store = open_store(&config).await?;
    let store_ref: StoreRef = store.clone();
    let service = ImportService::from_config(store_ref, &config);

    match command {
        Command::Import {
            tenant,
            file,
            format,
            structured,
            currency,
            payer,
            month,
        } => {
            let payload = tokio::fs::read_to_string(&file)
                .await
                .with_context(|| format!("reading {}", file.display()))?;
            let kind = if structured {
                SourceKind::Structured
            } else {
                SourceKind::Tabular { format }
            };
            let request = ImportRequest {
                tenant_id: tenant,
                payload,
                kind,
                currency,
                default_payer: payer,
                month,
            };

            let report = service.import(request).await;
            save_store(&config, &store).await?;

            println!("{}", report.summary_line());
            if let Some(batch_id) = &report.batch_id {
                println!("batch: {}", batch_id);
            }
            for row in &report.flagged {
                let reason = row.reason.as_ref().map(|r| r.to_string()).unwrap_or_default();
                println!(
                    "  flagged  {}  {:>12}  {}  ({})",
                    row.date,
                    format_amount(row.amount),
                    row.description,
                    reason
                );
            }
            for row in &report.manual_entry {
                println!("  manual   row {}: {}  | {}", row.row, row.kind, row.raw);
            }
            for error in report.errors.iter().filter(|e| e.code != ErrorCode::RowParseError) {
                eprintln!("  [{}] {}", error.code, error.message);
            }
            // partial, failed and rejected imports exit non-zero for scripted runs
            if !report.is_success() {
                anyhow::bail!("import {}", report.outcome);
            }
        }
        Command::Status { tenant, month } => {
            let month = month.unwrap_or_else(|| month_key(chrono::Utc::now().date_naive()));
            let statuses = service.limit_status(&tenant, &month).await?;
            if statuses.is_empty() {
                println!("no category limits configured");
            }
            for status in statuses {
                println!(
                    "{:<16} {:>12} / {:>12}  {:>6.1}%  {:<11} remaining {}",
                    status.category,
                    format_amount(status.spent),
                    format_amount(status.limit),
                    status.percentage,
                    status.state.to_string(),
                    format_amount(status.remaining)
                );
            }
        }
        Command::Export { tenant, month, output } => {
            let (filename, csv) = service.export(&tenant, &month).await?;
            let path = output.join(filename);
            tokio::fs::write(&path, csv)
                .await
                .with_context(|| format!("writing {}", path.display()))?;
            println!("wrote {}", path.display());
        }
        Command::Serve => {
            let mut state = AppState::new(service, config.clone());
            if let Some(path) = &config.store.snapshot_path {
                state = state.with_snapshot(store, path.clone());
            }
            start_server(state).await?;
        }
        Command::InitConfig => print!("{}", Config::generate_default()),
    }

    Ok(())
}
