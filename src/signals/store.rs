// Persistence of derived indicator rows. The table is created on demand so
// a signal write never depends on `ensure_schema` having run first.

use crate::database::connection::Store;
use crate::database::models::{format_timestamp, IndicatorRow, TimeRange};
use crate::database::schema::create_signal_table;
use crate::error::Result;
use crate::indicators::IndicatorSeries;
use sqlx::{QueryBuilder, Sqlite, SqliteConnection};
use std::sync::Arc;
use tracing::{info, info_span, warn, Instrument, Span};

const SQLITE_MAX_VARIABLES: usize = 32_766;
const SIGNAL_COLUMNS: usize = 7;

pub struct SignalStore {
    store: Arc<Store>,
    span: Span,
}

impl SignalStore {
    pub fn new(store: Arc<Store>) -> Self {
        Self {
            store,
            span: info_span!("signals"),
        }
    }

    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    /// Insert or replace every row of `series`, keyed by (instrument, timestamp).
    pub async fn persist(&self, series: &IndicatorSeries) -> Result<u64> {
        async move {
            if series.is_empty() {
                warn!(instrument_id = series.instrument_id, "No signals to save");
                return Ok(0);
            }

            let rows: Arc<[IndicatorRow]> = Arc::from(series.rows.as_slice());
            let written = self
                .store
                .with_connection(move |conn| {
                    let rows = Arc::clone(&rows);
                    Box::pin(async move {
                        create_signal_table(conn).await?;
                        replace_signal_rows(conn, &rows).await
                    })
                })
                .await?;

            info!(
                instrument_id = series.instrument_id,
                rows = series.len(),
                written,
                "Signals saved"
            );
            Ok(written)
        }
        .instrument(self.span.clone())
        .await
    }

    /// Persisted rows for one instrument, ascending by timestamp.
    pub async fn load(&self, instrument_id: i64, range: TimeRange) -> Result<Vec<IndicatorRow>> {
        self.store
            .with_connection(move |conn| {
                Box::pin(async move {
                    let mut query: QueryBuilder<Sqlite> = QueryBuilder::new(
                        "SELECT instrument_id, timestamp, daily_return, ma_7d, std_7d, rsi, signal \
                         FROM signals WHERE instrument_id = ",
                    );
                    query.push_bind(instrument_id);
                    if let Some(start) = range.start {
                        query.push(" AND timestamp >= ").push_bind(format_timestamp(&start));
                    }
                    if let Some(end) = range.end {
                        query.push(" AND timestamp <= ").push_bind(format_timestamp(&end));
                    }
                    query.push(" ORDER BY timestamp ASC");

                    query
                        .build_query_as::<IndicatorRow>()
                        .fetch_all(&mut *conn)
                        .await
                })
            })
            .instrument(self.span.clone())
            .await
    }
}

async fn replace_signal_rows(
    conn: &mut SqliteConnection,
    rows: &[IndicatorRow],
) -> std::result::Result<u64, sqlx::Error> {
    let mut affected = 0;

    for chunk in rows.chunks(SQLITE_MAX_VARIABLES / SIGNAL_COLUMNS) {
        let mut query: QueryBuilder<Sqlite> = QueryBuilder::new(
            "INSERT OR REPLACE INTO signals \
             (instrument_id, timestamp, daily_return, ma_7d, std_7d, rsi, signal) ",
        );
        query.push_values(chunk, |mut b, row| {
            b.push_bind(row.instrument_id)
                .push_bind(format_timestamp(&row.timestamp))
                .push_bind(row.daily_return)
                .push_bind(row.ma_7d)
                .push_bind(row.std_7d)
                .push_bind(row.rsi)
                .push_bind(row.signal.as_str());
        });

        affected += query.build().execute(&mut *conn).await?.rows_affected();
    }

    Ok(affected)
}
