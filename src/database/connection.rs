use crate::config::{DatabaseConfig, RetryConfig};
use crate::error::{classify, ErrorClass, Result, StoreError};
use futures::future::BoxFuture;
use rand::Rng;
use sqlx::sqlite::{SqliteConnectOptions, SqliteConnection, SqliteJournalMode};
use sqlx::Connection;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info_span, warn, Instrument, Span};

/// Handle to the SQLite store.
///
/// Holds no open connection: every unit of work opens its own, runs inside a
/// transaction, and closes it again, so several processes can share the file.
pub struct Store {
    path: PathBuf,
    options: SqliteConnectOptions,
    retry: RetryConfig,
    span: Span,
}

impl Store {
    pub fn open(database: &DatabaseConfig, retry: RetryConfig) -> Result<Self> {
        if let Some(parent) = database.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let mut options = SqliteConnectOptions::new()
            .filename(&database.path)
            .create_if_missing(true)
            .foreign_keys(true)
            .busy_timeout(database.busy_timeout());

        if database.wal {
            options = options.journal_mode(SqliteJournalMode::Wal);
        }

        let span = info_span!("store", path = %database.path.display());

        Ok(Self {
            path: database.path.clone(),
            options,
            retry,
            span,
        })
    }

    /// Replace the span this store logs under.
    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Run `work` as one transaction on a fresh connection.
    ///
    /// Busy/locked failures are retried with exponential backoff and jitter,
    /// each time on a new connection. Any other failure is rolled back and
    /// returned as-is.
    pub async fn with_connection<T, F>(&self, mut work: F) -> Result<T>
    where
        T: Send,
        F: for<'c> FnMut(&'c mut SqliteConnection) -> BoxFuture<'c, std::result::Result<T, sqlx::Error>>
            + Send,
    {
        async move {
            let mut retries: u32 = 0;

            loop {
                match self.run_unit(&mut work).await {
                    Ok(value) => return Ok(value),
                    Err(err) if classify(&err) == ErrorClass::Transient => {
                        if retries >= self.retry.max_retries {
                            warn!(attempts = retries + 1, error = %err, "Giving up on locked database");
                            return Err(StoreError::LockTimeout {
                                attempts: retries + 1,
                                source: err,
                            });
                        }

                        let delay = backoff_delay(self.retry.base_delay(), retries);
                        debug!(retry = retries + 1, ?delay, error = %err, "Database busy, retrying");
                        tokio::time::sleep(delay).await;
                        retries += 1;
                    }
                    Err(err) => {
                        warn!(error = %err, "Unit of work rolled back");
                        return Err(StoreError::from(err));
                    }
                }
            }
        }
        .instrument(self.span.clone())
        .await
    }

    async fn run_unit<T, F>(&self, work: &mut F) -> std::result::Result<T, sqlx::Error>
    where
        F: for<'c> FnMut(&'c mut SqliteConnection) -> BoxFuture<'c, std::result::Result<T, sqlx::Error>>,
    {
        let mut conn = SqliteConnection::connect_with(&self.options).await?;
        let outcome = transact(&mut conn, work).await;

        if let Err(e) = conn.close().await {
            debug!(error = %e, "Connection did not close cleanly");
        }

        outcome
    }
}

async fn transact<T, F>(conn: &mut SqliteConnection, work: &mut F) -> std::result::Result<T, sqlx::Error>
where
    F: for<'c> FnMut(&'c mut SqliteConnection) -> BoxFuture<'c, std::result::Result<T, sqlx::Error>>,
{
    let mut tx = conn.begin().await?;

    match work(&mut *tx).await {
        Ok(value) => {
            tx.commit().await?;
            Ok(value)
        }
        Err(err) => {
            if let Err(rollback_err) = tx.rollback().await {
                debug!(error = %rollback_err, "Rollback failed");
            }
            Err(err)
        }
    }
}

/// Ceiling on a single backoff sleep, applied before jitter.
const MAX_BACKOFF: Duration = Duration::from_secs(60);

/// `min(base × 2^retry, MAX_BACKOFF) × uniform(0.5, 1.0)`.
fn backoff_delay(base: Duration, retry: u32) -> Duration {
    let factor = 2u32.pow(retry.min(16));
    let jitter = rand::thread_rng().gen_range(0.5..=1.0);
    base.saturating_mul(factor).min(MAX_BACKOFF).mul_f64(jitter)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_grows_exponentially_within_jitter_bounds() {
        let base = Duration::from_millis(100);
        for retry in 0..5 {
            let ceiling = base * 2u32.pow(retry);
            for _ in 0..50 {
                let delay = backoff_delay(base, retry);
                assert!(delay <= ceiling, "{delay:?} > {ceiling:?}");
                assert!(delay >= ceiling / 2, "{delay:?} < half of {ceiling:?}");
            }
        }
    }

    #[test]
    fn backoff_is_capped_for_huge_base_delays() {
        let base = Duration::from_millis(u64::MAX);
        for retry in [0, 5, 16, 40] {
            let delay = backoff_delay(base, retry);
            assert!(delay <= MAX_BACKOFF, "{delay:?}");
            assert!(delay >= MAX_BACKOFF / 2, "{delay:?}");
        }
    }

    #[test]
    fn open_creates_missing_parent_directory() {
        let dir = tempfile::tempdir().unwrap();
        let config = DatabaseConfig {
            path: dir.path().join("nested/deeper/market.db"),
            ..DatabaseConfig::default()
        };

        let store = Store::open(&config, RetryConfig::default()).unwrap();
        assert!(dir.path().join("nested/deeper").is_dir());
        assert_eq!(store.path(), config.path.as_path());
    }
}
