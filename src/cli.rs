use crate::config::AppConfig;
use crate::database::models::{
    parse_timestamp, Instrument, InstrumentStatus, Metadata, Observation, TimeRange,
};
use crate::database::Store;
use crate::indicators::IndicatorEngine;
use crate::signals::{SignalStore, TrendClassifier};
use crate::utils::{format_optional, format_time};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::{Args, Parser, Subcommand, ValueEnum};
use serde::de::DeserializeOwned;
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "market-store")]
#[command(about = "Market data store and RSI signal CLI", long_about = None)]
pub struct Cli {
    /// Configuration file (defaults to market-store.toml when present)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Optional inclusive date bounds shared by the per-instrument commands
#[derive(Args, Debug, Clone, Default)]
pub struct RangeArgs {
    /// Start date (YYYY-MM-DD, "YYYY-MM-DD HH:MM:SS" or RFC 3339)
    #[arg(long)]
    pub start_date: Option<String>,

    /// End date (same formats as start date)
    #[arg(long)]
    pub end_date: Option<String>,
}

impl RangeArgs {
    pub fn to_range(&self) -> Result<TimeRange> {
        let start = self.start_date.as_deref().map(parse_date).transpose()?;
        let end = self.end_date.as_deref().map(parse_date).transpose()?;
        Ok(TimeRange::new(start, end))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum ImportKind {
    Instruments,
    Observations,
    Metadata,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Create all tables and indices
    Init,

    /// Upsert rows from a JSON array file
    Import {
        /// Kind of rows in the file
        #[arg(value_enum)]
        kind: ImportKind,

        /// Input file
        file: PathBuf,
    },

    /// List known instruments
    Instruments,

    /// Show one instrument with its metadata and latest observation
    Info {
        /// Instrument ID
        #[arg(short, long)]
        id: i64,
    },

    /// Compute indicators for an instrument without saving them
    Indicators {
        /// Instrument ID
        #[arg(short, long)]
        id: i64,

        #[command(flatten)]
        range: RangeArgs,

        /// Export the series to a JSON file
        #[arg(short, long)]
        export: Option<PathBuf>,
    },

    /// Recompute and save signals, then print the trend verdict
    Analyze {
        /// Instrument ID
        #[arg(short, long)]
        id: i64,

        #[command(flatten)]
        range: RangeArgs,
    },

    /// Show saved signals for an instrument
    Signals {
        /// Instrument ID
        #[arg(short, long)]
        id: i64,

        #[command(flatten)]
        range: RangeArgs,
    },

    /// Show instruments with the largest latest market cap
    Top {
        #[arg(short, long, default_value = "10")]
        limit: u32,
    },

    /// Mark an instrument active or inactive
    SetStatus {
        /// Instrument ID
        #[arg(short, long)]
        id: i64,

        /// New status ("active" or "inactive")
        #[arg(short, long)]
        status: InstrumentStatus,
    },

    /// Correct the price of one observation
    SetPrice {
        /// Instrument ID
        #[arg(short, long)]
        id: i64,

        /// Observation timestamp
        #[arg(short, long)]
        timestamp: String,

        /// New price in USD
        #[arg(short, long)]
        price: f64,
    },

    /// Delete an instrument with its observations and signals (metadata is kept)
    Purge {
        /// Instrument ID
        #[arg(short, long)]
        id: i64,
    },

    /// Delete observations older than a date
    Prune {
        /// Cutoff date; strictly older observations are removed
        #[arg(long)]
        before: String,
    },
}

/// Parse a date in any of the accepted timestamp formats
pub fn parse_date(date_str: &str) -> Result<DateTime<Utc>> {
    parse_timestamp(date_str).with_context(|| format!("Invalid date: {date_str}"))
}

/// Open the store described by `config`
pub fn open_store(config: &AppConfig) -> Result<Arc<Store>> {
    let store = Store::open(&config.database, config.retry.clone()).with_context(|| {
        format!(
            "Failed to open database at {}",
            config.database.path.display()
        )
    })?;
    Ok(Arc::new(store))
}

/// Comma-separated category tags, `-` when there are none
pub fn format_tags(metadata: &Metadata) -> String {
    let tags = metadata.tags();
    if tags.is_empty() {
        "-".to_string()
    } else {
        tags.join(", ")
    }
}

fn read_rows<T: DeserializeOwned>(file: &Path) -> Result<Vec<T>> {
    let json = std::fs::read_to_string(file)
        .with_context(|| format!("Failed to read {}", file.display()))?;
    serde_json::from_str(&json).with_context(|| format!("Failed to parse {}", file.display()))
}

/// Execute a command from the CLI
pub async fn execute_command(command: Commands, config: &AppConfig) -> Result<()> {
    let store = open_store(config)?;

    match command {
        Commands::Init => {
            store.ensure_schema().await?;
            println!("Schema ready at {}", store.path().display());
        }

        Commands::Import { kind, file } => {
            let affected = match kind {
                ImportKind::Instruments => {
                    let rows: Vec<Instrument> = read_rows(&file)?;
                    store.upsert_instruments(&rows).await?
                }
                ImportKind::Observations => {
                    let rows: Vec<Observation> = read_rows(&file)?;
                    store.upsert_observations(&rows).await?
                }
                ImportKind::Metadata => {
                    let rows: Vec<Metadata> = read_rows(&file)?;
                    store.upsert_metadata(&rows).await?
                }
            };
            println!("Imported {:?}: {} rows affected.", kind, affected);
        }

        Commands::Instruments => {
            let instruments = store.list_instruments().await?;

            println!("Found {} instruments:", instruments.len());
            println!("{:<8} | {:<10} | {:<30} | {:<10}", "ID", "Symbol", "Name", "Status");
            println!("{:-<8}-+-{:-<10}-+-{:-<30}-+-{:-<10}", "", "", "", "");
            for instrument in instruments {
                println!(
                    "{:<8} | {:<10} | {:<30} | {:<10}",
                    instrument.id, instrument.symbol, instrument.name, instrument.status
                );
            }
        }

        Commands::Info { id } => {
            match store.get_instrument(id).await? {
                Some(instrument) => {
                    println!("{} ({}) [{}]", instrument.name, instrument.symbol, instrument.status);
                    println!("ID: {}", instrument.id);
                    if let Some(slug) = &instrument.slug {
                        println!("Slug: {}", slug);
                    }
                }
                None => println!("No instrument with ID {id}."),
            }

            if let Some(metadata) = store.get_metadata(id).await? {
                println!("Tags: {}", format_tags(&metadata));
                if let Some(website) = &metadata.website_url {
                    println!("Website: {}", website);
                }
                if let Some(description) = &metadata.description {
                    println!("Description: {}", description);
                }
            }

            if let Some(latest) = store.latest_observation(id).await? {
                println!(
                    "Latest: {} price {:.4} USD, market cap {}",
                    format_time(&latest.timestamp),
                    latest.price_usd,
                    format_optional(latest.market_cap_usd, 0)
                );
            }
        }

        Commands::Indicators { id, range, export } => {
            let engine = IndicatorEngine::new(Arc::clone(&store), config.indicators.clone());
            let series = engine.compute_indicators(id, range.to_range()?).await?;

            if let Some(export_path) = export {
                let json = serde_json::to_string_pretty(&series)?;
                std::fs::write(&export_path, json)?;
                println!("Indicators exported to: {}", export_path.display());
            } else {
                println!("{} indicator rows for instrument {}:", series.len(), id);
                println!(
                    "{:<23} | {:>9} | {:>14} | {:>12} | {:>7} | {}",
                    "Timestamp", "Return %", "MA", "Std", "RSI", "Signal"
                );
                for row in &series.rows {
                    println!(
                        "{:<23} | {:>9} | {:>14} | {:>12} | {:>7} | {}",
                        format_time(&row.timestamp),
                        format_optional(row.daily_return, 2),
                        format_optional(row.ma_7d, 4),
                        format_optional(row.std_7d, 4),
                        format_optional(row.rsi, 2),
                        row.signal
                    );
                }
            }
        }

        Commands::Analyze { id, range } => {
            let classifier = TrendClassifier::new(Arc::clone(&store), config.indicators.clone());
            let verdict = classifier.classify(id, range.to_range()?).await?;
            println!("{verdict}");
        }

        Commands::Signals { id, range } => {
            let signals = SignalStore::new(Arc::clone(&store));
            let rows = signals.load(id, range.to_range()?).await?;

            println!("{} saved signals for instrument {}:", rows.len(), id);
            for row in rows {
                println!(
                    "{}  RSI {:>7}  {}",
                    format_time(&row.timestamp),
                    format_optional(row.rsi, 2),
                    row.signal
                );
            }
        }

        Commands::Top { limit } => {
            let snapshots = store.top_by_market_cap(limit).await?;

            println!(
                "{:<8} | {:<10} | {:>16} | {:>20} | {:>8} | {:>8}",
                "ID", "Symbol", "Price", "Market Cap", "24h %", "7d %"
            );
            println!("{:-<8}-+-{:-<10}-+-{:->16}-+-{:->20}-+-{:->8}-+-{:->8}", "", "", "", "", "", "");
            for snap in snapshots {
                println!(
                    "{:<8} | {:<10} | {:>16.4} | {:>20} | {:>8} | {:>8}",
                    snap.id,
                    snap.symbol,
                    snap.price_usd,
                    format_optional(snap.market_cap_usd, 0),
                    format_optional(snap.percent_change_24h, 2),
                    format_optional(snap.percent_change_7d, 2)
                );
            }
        }

        Commands::SetStatus { id, status } => {
            let affected = store.update_instrument_status(id, status).await?;
            if affected == 0 {
                println!("No instrument with ID {id}.");
            } else {
                println!("Instrument {id} is now {status}.");
            }
        }

        Commands::SetPrice { id, timestamp, price } => {
            let timestamp = parse_date(&timestamp)?;
            let affected = store.update_observation_price(id, timestamp, price).await?;
            println!("{affected} observation(s) updated.");
        }

        Commands::Purge { id } => {
            let removed = store.purge_instrument(id).await?;
            println!("Instrument {id} purged with {removed} observation(s); metadata kept.");
        }

        Commands::Prune { before } => {
            let cutoff = parse_date(&before)?;
            let deleted = store.delete_observations_before(cutoff).await?;
            println!("Deleted {deleted} observation(s) before {}.", format_time(&cutoff));
        }
    }

    Ok(())
}
