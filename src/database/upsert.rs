// Batch insert-or-update for the three raw entity kinds.
//
// Each call is a single unit of work built from multi-row INSERT statements.
// A batch larger than SQLite's bound-parameter limit is split into several
// statements inside the same transaction, so the batch still applies
// all-or-nothing.

use crate::database::connection::Store;
use crate::database::models::{format_timestamp, Instrument, Metadata, Observation};
use crate::error::Result;
use sqlx::{QueryBuilder, Sqlite, SqliteConnection};
use std::sync::Arc;
use tracing::{debug, info};

/// Upper bound on `?` placeholders per statement in the bundled SQLite.
const SQLITE_MAX_VARIABLES: usize = 32_766;

const INSTRUMENT_COLUMNS: usize = 7;
const OBSERVATION_COLUMNS: usize = 11;
const METADATA_COLUMNS: usize = 6;

impl Store {
    /// Insert instruments that are not yet known; existing rows are left untouched.
    pub async fn upsert_instruments(&self, rows: &[Instrument]) -> Result<u64> {
        if rows.is_empty() {
            debug!("No instruments to insert");
            return Ok(0);
        }

        let rows: Arc<[Instrument]> = Arc::from(rows);
        let count = rows.len();
        let inserted = self
            .with_connection(move |conn| {
                let rows = Arc::clone(&rows);
                Box::pin(async move { insert_instruments(conn, &rows).await })
            })
            .await?;

        info!(count, inserted, "Instruments inserted (existing ids ignored)");
        Ok(inserted)
    }

    /// Insert observations, overwriting every value column of an existing
    /// (instrument, timestamp) row. Later rows in the batch win over earlier ones.
    pub async fn upsert_observations(&self, rows: &[Observation]) -> Result<u64> {
        if rows.is_empty() {
            debug!("No observations to upsert");
            return Ok(0);
        }

        let rows: Arc<[Observation]> = Arc::from(rows);
        let count = rows.len();
        let affected = self
            .with_connection(move |conn| {
                let rows = Arc::clone(&rows);
                Box::pin(async move { upsert_observation_rows(conn, &rows).await })
            })
            .await?;

        info!(count, affected, "Observations inserted/updated");
        Ok(affected)
    }

    /// Insert metadata; on conflict only the category is refreshed.
    pub async fn upsert_metadata(&self, rows: &[Metadata]) -> Result<u64> {
        if rows.is_empty() {
            debug!("No metadata to upsert");
            return Ok(0);
        }

        let rows: Arc<[Metadata]> = Arc::from(rows);
        let count = rows.len();
        let affected = self
            .with_connection(move |conn| {
                let rows = Arc::clone(&rows);
                Box::pin(async move { upsert_metadata_rows(conn, &rows).await })
            })
            .await?;

        info!(count, affected, "Metadata inserted/updated");
        Ok(affected)
    }
}

async fn insert_instruments(
    conn: &mut SqliteConnection,
    rows: &[Instrument],
) -> std::result::Result<u64, sqlx::Error> {
    let mut affected = 0;

    for chunk in rows.chunks(SQLITE_MAX_VARIABLES / INSTRUMENT_COLUMNS) {
        let mut query: QueryBuilder<Sqlite> = QueryBuilder::new(
            "INSERT OR IGNORE INTO instruments \
             (id, symbol, name, slug, first_historical_data, last_historical_data, status) ",
        );
        query.push_values(chunk, |mut b, row| {
            b.push_bind(row.id)
                .push_bind(row.symbol.clone())
                .push_bind(row.name.clone())
                .push_bind(row.slug.clone())
                .push_bind(row.first_historical_data.as_ref().map(format_timestamp))
                .push_bind(row.last_historical_data.as_ref().map(format_timestamp))
                .push_bind(row.status.as_str());
        });

        affected += query.build().execute(&mut *conn).await?.rows_affected();
    }

    Ok(affected)
}

async fn upsert_observation_rows(
    conn: &mut SqliteConnection,
    rows: &[Observation],
) -> std::result::Result<u64, sqlx::Error> {
    let mut affected = 0;

    for chunk in rows.chunks(SQLITE_MAX_VARIABLES / OBSERVATION_COLUMNS) {
        let mut query: QueryBuilder<Sqlite> = QueryBuilder::new(
            "INSERT INTO observations (\
                instrument_id, timestamp, price_usd, market_cap_usd, volume_24h_usd, \
                percent_change_1h, percent_change_24h, percent_change_7d, \
                circulating_supply, total_supply, max_supply) ",
        );
        query.push_values(chunk, |mut b, row| {
            b.push_bind(row.instrument_id)
                .push_bind(format_timestamp(&row.timestamp))
                .push_bind(row.price_usd)
                .push_bind(row.market_cap_usd)
                .push_bind(row.volume_24h_usd)
                .push_bind(row.percent_change_1h)
                .push_bind(row.percent_change_24h)
                .push_bind(row.percent_change_7d)
                .push_bind(row.circulating_supply)
                .push_bind(row.total_supply)
                .push_bind(row.max_supply);
        });
        query.push(
            " ON CONFLICT(instrument_id, timestamp) DO UPDATE SET \
                price_usd = excluded.price_usd, \
                market_cap_usd = excluded.market_cap_usd, \
                volume_24h_usd = excluded.volume_24h_usd, \
                percent_change_1h = excluded.percent_change_1h, \
                percent_change_24h = excluded.percent_change_24h, \
                percent_change_7d = excluded.percent_change_7d, \
                circulating_supply = excluded.circulating_supply, \
                total_supply = excluded.total_supply, \
                max_supply = excluded.max_supply",
        );

        affected += query.build().execute(&mut *conn).await?.rows_affected();
    }

    Ok(affected)
}

async fn upsert_metadata_rows(
    conn: &mut SqliteConnection,
    rows: &[Metadata],
) -> std::result::Result<u64, sqlx::Error> {
    let mut affected = 0;

    for chunk in rows.chunks(SQLITE_MAX_VARIABLES / METADATA_COLUMNS) {
        let mut query: QueryBuilder<Sqlite> = QueryBuilder::new(
            "INSERT INTO instrument_metadata \
             (instrument_id, logo_url, website_url, technical_doc, description, category) ",
        );
        query.push_values(chunk, |mut b, row| {
            b.push_bind(row.instrument_id)
                .push_bind(row.logo_url.clone())
                .push_bind(row.website_url.clone())
                .push_bind(row.technical_doc.clone())
                .push_bind(row.description.clone())
                .push_bind(row.category.clone());
        });
        query.push(" ON CONFLICT(instrument_id) DO UPDATE SET category = excluded.category");

        affected += query.build().execute(&mut *conn).await?.rows_affected();
    }

    Ok(affected)
}
