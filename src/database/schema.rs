// Table definitions for the market data store. Every statement is
// idempotent so the schema can be applied on each start and by concurrent
// processes. Timestamps are TEXT in `YYYY-MM-DD HH:MM:SS` (UTC).

use crate::database::connection::Store;
use crate::error::Result;
use sqlx::SqliteConnection;
use tracing::info;

pub const CREATE_INSTRUMENTS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS instruments (
    id INTEGER PRIMARY KEY,
    symbol TEXT NOT NULL,
    name TEXT NOT NULL,
    slug TEXT,
    first_historical_data TEXT,
    last_historical_data TEXT,
    status TEXT NOT NULL DEFAULT 'active'
);
"#;

pub const CREATE_OBSERVATIONS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS observations (
    instrument_id INTEGER NOT NULL REFERENCES instruments(id) ON DELETE CASCADE,
    timestamp TEXT NOT NULL,
    price_usd REAL NOT NULL,
    market_cap_usd REAL,
    volume_24h_usd REAL,
    percent_change_1h REAL,
    percent_change_24h REAL,
    percent_change_7d REAL,
    circulating_supply REAL,
    total_supply REAL,
    max_supply REAL,
    PRIMARY KEY (instrument_id, timestamp)
);
"#;

// No foreign key: metadata outlives a purged instrument.
pub const CREATE_METADATA_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS instrument_metadata (
    instrument_id INTEGER PRIMARY KEY,
    logo_url TEXT,
    website_url TEXT,
    technical_doc TEXT,
    description TEXT,
    category TEXT
);
"#;

// The composite key guarantees a signal row always has its observation.
pub const CREATE_SIGNALS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS signals (
    instrument_id INTEGER NOT NULL,
    timestamp TEXT NOT NULL,
    daily_return REAL,
    ma_7d REAL,
    std_7d REAL,
    rsi REAL,
    signal TEXT NOT NULL,
    PRIMARY KEY (instrument_id, timestamp),
    FOREIGN KEY (instrument_id, timestamp)
        REFERENCES observations(instrument_id, timestamp) ON DELETE CASCADE
);
"#;

pub const CREATE_INDICES: &str = r#"
CREATE INDEX IF NOT EXISTS idx_observations_timestamp ON observations(timestamp);
"#;

const SCHEMA: [&str; 5] = [
    CREATE_INSTRUMENTS_TABLE,
    CREATE_OBSERVATIONS_TABLE,
    CREATE_METADATA_TABLE,
    CREATE_SIGNALS_TABLE,
    CREATE_INDICES,
];

pub(crate) async fn create_signal_table(conn: &mut SqliteConnection) -> std::result::Result<(), sqlx::Error> {
    sqlx::query(CREATE_SIGNALS_TABLE).execute(&mut *conn).await?;
    Ok(())
}

impl Store {
    /// Create every table and index that does not exist yet.
    pub async fn ensure_schema(&self) -> Result<()> {
        self.with_connection(|conn| {
            Box::pin(async move {
                for ddl in SCHEMA {
                    sqlx::query(ddl).execute(&mut *conn).await?;
                }
                Ok(())
            })
        })
        .await?;

        info!("Database tables initialized successfully");
        Ok(())
    }

    pub async fn ensure_signal_table(&self) -> Result<()> {
        self.with_connection(|conn| Box::pin(create_signal_table(conn)))
            .await?;

        info!("Ensured that signals table exists");
        Ok(())
    }
}
