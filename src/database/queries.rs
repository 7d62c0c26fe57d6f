// Parameterized reads for downstream consumers plus the administrative
// writes (status changes, price corrections, purges).

use crate::database::connection::Store;
use crate::database::models::{
    format_timestamp, Instrument, InstrumentStatus, MarketSnapshot, Metadata, Observation,
    TimeRange,
};
use crate::error::Result;
use chrono::{DateTime, Utc};
use sqlx::{QueryBuilder, Sqlite, SqliteConnection};
use tracing::{info, warn};

const OBSERVATION_COLUMNS: &str = "instrument_id, timestamp, price_usd, market_cap_usd, \
    volume_24h_usd, percent_change_1h, percent_change_24h, percent_change_7d, \
    circulating_supply, total_supply, max_supply";

/// Observations for one instrument, ascending by timestamp, bounds inclusive.
pub(crate) async fn fetch_observations(
    conn: &mut SqliteConnection,
    instrument_id: i64,
    range: TimeRange,
) -> std::result::Result<Vec<Observation>, sqlx::Error> {
    let mut query: QueryBuilder<Sqlite> = QueryBuilder::new(format!(
        "SELECT {OBSERVATION_COLUMNS} FROM observations WHERE instrument_id = "
    ));
    query.push_bind(instrument_id);

    if let Some(start) = range.start {
        query.push(" AND timestamp >= ").push_bind(format_timestamp(&start));
    }
    if let Some(end) = range.end {
        query.push(" AND timestamp <= ").push_bind(format_timestamp(&end));
    }
    query.push(" ORDER BY timestamp ASC");

    query
        .build_query_as::<Observation>()
        .fetch_all(&mut *conn)
        .await
}

impl Store {
    pub async fn list_instruments(&self) -> Result<Vec<Instrument>> {
        self.with_connection(|conn| {
            Box::pin(async move {
                sqlx::query_as::<_, Instrument>(
                    "SELECT id, symbol, name, slug, first_historical_data, last_historical_data, status
                     FROM instruments
                     ORDER BY id ASC",
                )
                .fetch_all(&mut *conn)
                .await
            })
        })
        .await
    }

    pub async fn get_instrument(&self, id: i64) -> Result<Option<Instrument>> {
        self.with_connection(move |conn| {
            Box::pin(async move {
                sqlx::query_as::<_, Instrument>(
                    "SELECT id, symbol, name, slug, first_historical_data, last_historical_data, status
                     FROM instruments
                     WHERE id = ?",
                )
                .bind(id)
                .fetch_optional(&mut *conn)
                .await
            })
        })
        .await
    }

    pub async fn get_metadata(&self, instrument_id: i64) -> Result<Option<Metadata>> {
        self.with_connection(move |conn| {
            Box::pin(async move {
                sqlx::query_as::<_, Metadata>(
                    "SELECT instrument_id, logo_url, website_url, technical_doc, description, category
                     FROM instrument_metadata
                     WHERE instrument_id = ?",
                )
                .bind(instrument_id)
                .fetch_optional(&mut *conn)
                .await
            })
        })
        .await
    }

    pub async fn get_observations(
        &self,
        instrument_id: i64,
        range: TimeRange,
    ) -> Result<Vec<Observation>> {
        self.with_connection(move |conn| Box::pin(fetch_observations(conn, instrument_id, range)))
            .await
    }

    pub async fn latest_observation(&self, instrument_id: i64) -> Result<Option<Observation>> {
        self.with_connection(move |conn| {
            Box::pin(async move {
                let sql = format!(
                    "SELECT {OBSERVATION_COLUMNS}
                     FROM observations
                     WHERE instrument_id = ?
                     ORDER BY timestamp DESC
                     LIMIT 1"
                );
                sqlx::query_as::<_, Observation>(&sql)
                    .bind(instrument_id)
                    .fetch_optional(&mut *conn)
                    .await
            })
        })
        .await
    }

    /// Each instrument's most recent observation, largest market cap first.
    pub async fn top_by_market_cap(&self, limit: u32) -> Result<Vec<MarketSnapshot>> {
        self.with_connection(move |conn| {
            Box::pin(async move {
                sqlx::query_as::<_, MarketSnapshot>(
                    "SELECT i.id, i.symbol, i.name, o.timestamp, o.price_usd, o.market_cap_usd,
                            o.percent_change_24h, o.percent_change_7d
                     FROM instruments i
                     JOIN (
                         SELECT instrument_id, MAX(timestamp) AS max_time
                         FROM observations
                         GROUP BY instrument_id
                     ) latest ON i.id = latest.instrument_id
                     JOIN observations o
                       ON o.instrument_id = latest.instrument_id AND o.timestamp = latest.max_time
                     ORDER BY o.market_cap_usd DESC, i.id ASC
                     LIMIT ?",
                )
                .bind(i64::from(limit))
                .fetch_all(&mut *conn)
                .await
            })
        })
        .await
    }

    pub async fn update_instrument_status(
        &self,
        id: i64,
        status: InstrumentStatus,
    ) -> Result<u64> {
        let affected = self
            .with_connection(move |conn| {
                Box::pin(async move {
                    let result = sqlx::query("UPDATE instruments SET status = ? WHERE id = ?")
                        .bind(status.as_str())
                        .bind(id)
                        .execute(&mut *conn)
                        .await?;
                    Ok(result.rows_affected())
                })
            })
            .await?;

        if affected == 0 {
            warn!(id, "No instrument to update status for");
        } else {
            info!(id, %status, "Instrument status updated");
        }
        Ok(affected)
    }

    /// Correct the price of one observation. Persisted signals are not
    /// touched; they refresh on the next classification.
    pub async fn update_observation_price(
        &self,
        instrument_id: i64,
        timestamp: DateTime<Utc>,
        price_usd: f64,
    ) -> Result<u64> {
        let stamp = format_timestamp(&timestamp);
        let affected = self
            .with_connection(move |conn| {
                let stamp = stamp.clone();
                Box::pin(async move {
                    let result = sqlx::query(
                        "UPDATE observations SET price_usd = ?
                         WHERE instrument_id = ? AND timestamp = ?",
                    )
                    .bind(price_usd)
                    .bind(instrument_id)
                    .bind(stamp)
                    .execute(&mut *conn)
                    .await?;
                    Ok(result.rows_affected())
                })
            })
            .await?;

        info!(instrument_id, %timestamp, price_usd, affected, "Observation price updated");
        Ok(affected)
    }

    /// Remove an instrument with its observations and signals. Metadata stays.
    pub async fn purge_instrument(&self, id: i64) -> Result<u64> {
        let removed = self
            .with_connection(move |conn| {
                Box::pin(async move {
                    let observations = sqlx::query("DELETE FROM observations WHERE instrument_id = ?")
                        .bind(id)
                        .execute(&mut *conn)
                        .await?
                        .rows_affected();
                    sqlx::query("DELETE FROM instruments WHERE id = ?")
                        .bind(id)
                        .execute(&mut *conn)
                        .await?;
                    Ok(observations)
                })
            })
            .await?;

        info!(id, observations = removed, "Instrument purged (metadata preserved)");
        Ok(removed)
    }

    /// Delete observations strictly older than `cutoff`; their signals go with them.
    pub async fn delete_observations_before(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let stamp = format_timestamp(&cutoff);
        let deleted = self
            .with_connection(move |conn| {
                let stamp = stamp.clone();
                Box::pin(async move {
                    let result = sqlx::query("DELETE FROM observations WHERE timestamp < ?")
                        .bind(stamp)
                        .execute(&mut *conn)
                        .await?;
                    Ok(result.rows_affected())
                })
            })
            .await?;

        info!(cutoff = %format_timestamp(&cutoff), deleted, "Old observations deleted");
        Ok(deleted)
    }
}
