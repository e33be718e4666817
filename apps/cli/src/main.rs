//! Command line front end for the brokerage history cache.
//!
//! Reads credentials and cache settings from the environment (a `.env` file
//! is honored) and prints results as JSON.

use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use tradecache_api::{ClientConfig, HistoryApi, HistoryApiClient, RateLimiter};
use tradecache_core::history::{AccountId, HistoryFilter, HistoryTable};
use tradecache_core::{CacheConfig, Error};
use tradecache_storage_sqlite::SqliteHistoryStore;
use tradecache_sync::{HistoryService, SyncConfig, SyncOrchestrator};

const ENV_LOG_FORMAT: &str = "TRADECACHE_LOG_FORMAT";

#[derive(Parser)]
#[command(name = "tradecache")]
#[command(about = "Local cache of brokerage order, dividend and transaction history")]
#[command(version)]
struct Cli {
    /// Account to operate on. Looked up from the API when omitted.
    #[arg(short, long, global = true)]
    account_id: Option<AccountId>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Sync history tables into the cache.
    Sync {
        /// Tables to sync (orders, dividends, transactions). Defaults to all.
        #[arg(short, long, value_delimiter = ',')]
        tables: Vec<String>,

        /// Clear the cached rows first and fetch everything again.
        #[arg(short, long)]
        force: bool,
    },

    /// Read cached records, syncing first when the table is stale.
    Query {
        /// Table to read.
        table: String,

        #[arg(long)]
        ticker: Option<String>,

        /// Order status filter.
        #[arg(long)]
        status: Option<String>,

        /// Transaction type filter.
        #[arg(long)]
        kind: Option<String>,

        /// Only records at or after this RFC 3339 timestamp.
        #[arg(long)]
        since: Option<DateTime<Utc>>,

        #[arg(short, long)]
        limit: Option<i64>,

        /// Sync before reading regardless of freshness.
        #[arg(short, long)]
        refresh: bool,
    },

    /// Sync a table only if its last sync is older than the freshness threshold.
    Fresh {
        table: String,
    },

    /// Show row counts and sizes.
    Stats {
        /// Restrict to one table.
        #[arg(short, long)]
        table: Option<String>,
    },

    /// Delete cached rows and their sync cursors.
    Clear {
        /// Restrict to one table.
        #[arg(short, long)]
        table: Option<String>,
    },
}

fn init_tracing() {
    let log_format = std::env::var(ENV_LOG_FORMAT).unwrap_or_else(|_| "text".to_string());
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);

    if log_format.eq_ignore_ascii_case("json") {
        registry
            .with(fmt::layer().json().with_current_span(false).with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
            .init();
    }
}

fn parse_table(name: &str) -> Result<HistoryTable> {
    Ok(name.parse::<HistoryTable>()?)
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

struct App {
    api: Arc<HistoryApiClient>,
    service: HistoryService,
}

impl App {
    fn build(cache: CacheConfig) -> Result<Self> {
        let client_config = ClientConfig::from_env().context("Missing API credentials")?;
        info!("Using {} environment", client_config.environment);
        let limiter = Arc::new(RateLimiter::new());
        let api = Arc::new(HistoryApiClient::from_config(&client_config, limiter)?);

        if !cache.enabled {
            warn!("Local cache is disabled");
            return Ok(Self {
                api: api.clone(),
                service: HistoryService::disabled(api.clone(), cache),
            });
        }

        let store = Arc::new(
            SqliteHistoryStore::open(&cache.database_path)
                .with_context(|| format!("Failed to open cache at {}", cache.database_path))?,
        );
        info!("Cache database: {}", store.database_path());
        let sync_config = SyncConfig {
            freshness_minutes: cache.freshness_minutes,
            ..SyncConfig::default()
        };
        let orchestrator = Arc::new(SyncOrchestrator::new(api.clone(), store.clone(), sync_config));

        Ok(Self {
            api,
            service: HistoryService::new(orchestrator, store, cache),
        })
    }

    async fn account_id(&self, explicit: Option<AccountId>) -> Result<AccountId> {
        if let Some(id) = explicit {
            return Ok(id);
        }
        let info = self
            .api
            .account_info()
            .await
            .context("Failed to resolve account id")?;
        Ok(info.id)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    let cli = Cli::parse();
    let app = App::build(CacheConfig::from_env())?;

    match cli.command {
        Commands::Sync { tables, force } => {
            let tables = tables
                .iter()
                .map(|t| parse_table(t))
                .collect::<Result<Vec<_>>>()?;
            let account_id = app.account_id(cli.account_id).await?;
            let selected = if tables.is_empty() {
                None
            } else {
                Some(tables.as_slice())
            };
            match app.service.sync(selected, account_id, force).await {
                Ok(report) => print_json(&report)?,
                Err(Error::SyncIncomplete(failure)) => {
                    print_json(&failure.report)?;
                    anyhow::bail!("{}", failure);
                }
                Err(e) => return Err(e.into()),
            }
        }

        Commands::Query {
            table,
            ticker,
            status,
            kind,
            since,
            limit,
            refresh,
        } => {
            let table = parse_table(&table)?;
            let account_id = app.account_id(cli.account_id).await?;
            let filter = HistoryFilter {
                ticker,
                status,
                kind,
                since,
                limit,
            };
            let records = app.service.query(table, account_id, &filter, refresh).await?;
            info!("{} {} records", records.len(), table);
            print_json(&records)?;
        }

        Commands::Fresh { table } => {
            let table = parse_table(&table)?;
            let account_id = app.account_id(cli.account_id).await?;
            match app.service.ensure_fresh(table, account_id).await? {
                Some(result) => print_json(&result)?,
                None => info!("{} is fresh, nothing to do", table),
            }
        }

        Commands::Stats { table } => {
            let table = table.as_deref().map(parse_table).transpose()?;
            print_json(&app.service.stats(table, cli.account_id)?)?;
        }

        Commands::Clear { table } => {
            let table = table.as_deref().map(parse_table).transpose()?;
            let summary = app.service.clear(table, cli.account_id).await?;
            info!("Deleted {} rows", summary.total());
            print_json(&summary)?;
        }
    }

    Ok(())
}
