use chrono::{DateTime, Duration, TimeZone, Utc};
use market_data_store::config::{DatabaseConfig, RetryConfig};
use market_data_store::database::models::{
    Instrument, InstrumentStatus, Metadata, Observation, TimeRange,
};
use market_data_store::{ErrorClass, Store, StoreError};
use sqlx::sqlite::SqliteConnectOptions;
use sqlx::{Connection, SqliteConnection};
use tempfile::TempDir;

fn config_in(dir: &TempDir) -> DatabaseConfig {
    DatabaseConfig {
        path: dir.path().join("market.db"),
        ..DatabaseConfig::default()
    }
}

fn fast_retry() -> RetryConfig {
    RetryConfig {
        max_retries: 5,
        base_delay_ms: 5,
    }
}

async fn fresh_store() -> (TempDir, Store) {
    let dir = tempfile::tempdir().unwrap();
    let store = Store::open(&config_in(&dir), fast_retry()).unwrap();
    store.ensure_schema().await.unwrap();
    (dir, store)
}

fn day(n: i64) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + Duration::days(n)
}

fn instrument(id: i64, symbol: &str) -> Instrument {
    Instrument {
        id,
        symbol: symbol.to_string(),
        name: format!("{symbol} token"),
        slug: Some(symbol.to_lowercase()),
        first_historical_data: Some(day(0)),
        last_historical_data: None,
        status: InstrumentStatus::Active,
    }
}

fn metadata(id: i64, description: &str, category: &str) -> Metadata {
    Metadata {
        instrument_id: id,
        logo_url: None,
        website_url: Some("https://example.org".to_string()),
        technical_doc: None,
        description: Some(description.to_string()),
        category: Some(category.to_string()),
    }
}

#[tokio::test]
async fn schema_creation_is_idempotent() {
    let (_dir, store) = fresh_store().await;
    store.ensure_schema().await.unwrap();
    store.ensure_signal_table().await.unwrap();
    assert!(store.list_instruments().await.unwrap().is_empty());
}

#[tokio::test]
async fn instruments_are_insert_or_ignore() {
    let (_dir, store) = fresh_store().await;

    let inserted = store.upsert_instruments(&[instrument(1, "OLD")]).await.unwrap();
    assert_eq!(inserted, 1);

    let again = store.upsert_instruments(&[instrument(1, "NEW")]).await.unwrap();
    assert_eq!(again, 0);

    let stored = store.get_instrument(1).await.unwrap().unwrap();
    assert_eq!(stored.symbol, "OLD");
    assert_eq!(stored.first_historical_data, Some(day(0)));
    assert_eq!(stored.slug.as_deref(), Some("old"));
}

#[tokio::test]
async fn observations_are_last_write_wins() {
    let (_dir, store) = fresh_store().await;
    store.upsert_instruments(&[instrument(1, "BTC")]).await.unwrap();

    let mut first = Observation::with_price(1, day(0), 100.0);
    first.market_cap_usd = Some(1_000.0);
    store.upsert_observations(&[first]).await.unwrap();

    let mut second = Observation::with_price(1, day(0), 150.0);
    second.volume_24h_usd = Some(42.0);
    store.upsert_observations(&[second]).await.unwrap();

    let rows = store.get_observations(1, TimeRange::all()).await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].price_usd, 150.0);
    assert_eq!(rows[0].volume_24h_usd, Some(42.0));
    // every value column is overwritten, including ones the new row leaves empty
    assert_eq!(rows[0].market_cap_usd, None);
}

#[tokio::test]
async fn duplicate_keys_in_one_batch_keep_the_later_row() {
    let (_dir, store) = fresh_store().await;
    store.upsert_instruments(&[instrument(1, "BTC")]).await.unwrap();

    let batch = vec![
        Observation::with_price(1, day(0), 10.0),
        Observation::with_price(1, day(1), 20.0),
        Observation::with_price(1, day(0), 11.0),
    ];
    store.upsert_observations(&batch).await.unwrap();

    let rows = store.get_observations(1, TimeRange::all()).await.unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].timestamp, day(0));
    assert_eq!(rows[0].price_usd, 11.0);
    assert_eq!(rows[1].price_usd, 20.0);
}

#[tokio::test]
async fn metadata_conflict_refreshes_only_category() {
    let (_dir, store) = fresh_store().await;

    store.upsert_metadata(&[metadata(1, "first", "coin")]).await.unwrap();
    store.upsert_metadata(&[metadata(1, "second", "token")]).await.unwrap();

    let stored = store.get_metadata(1).await.unwrap().unwrap();
    assert_eq!(stored.description.as_deref(), Some("first"));
    assert_eq!(stored.category.as_deref(), Some("token"));
}

#[tokio::test]
async fn empty_batches_are_noops() {
    let dir = tempfile::tempdir().unwrap();
    // no schema: an empty batch must not even reach the database
    let store = Store::open(&config_in(&dir), fast_retry()).unwrap();

    assert_eq!(store.upsert_instruments(&[]).await.unwrap(), 0);
    assert_eq!(store.upsert_observations(&[]).await.unwrap(), 0);
    assert_eq!(store.upsert_metadata(&[]).await.unwrap(), 0);
}

#[tokio::test]
async fn missing_table_is_a_fatal_error() {
    let dir = tempfile::tempdir().unwrap();
    let store = Store::open(&config_in(&dir), fast_retry()).unwrap();

    let err = store
        .upsert_instruments(&[instrument(1, "BTC")])
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::Database(_)), "{err:?}");
    assert_eq!(err.class(), ErrorClass::Fatal);
}

#[tokio::test]
async fn orphan_observation_is_a_constraint_violation() {
    let (_dir, store) = fresh_store().await;

    let err = store
        .upsert_observations(&[Observation::with_price(99, day(0), 1.0)])
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::Constraint(_)), "{err:?}");
    assert_eq!(err.class(), ErrorClass::Fatal);
}

#[tokio::test]
async fn failed_batch_leaves_nothing_behind() {
    let (_dir, store) = fresh_store().await;
    store.upsert_instruments(&[instrument(1, "BTC")]).await.unwrap();

    let batch = vec![
        Observation::with_price(1, day(0), 1.0),
        Observation::with_price(2, day(0), 2.0),
    ];
    assert!(store.upsert_observations(&batch).await.is_err());
    assert!(store.get_observations(1, TimeRange::all()).await.unwrap().is_empty());
}

#[tokio::test]
async fn large_batches_span_several_statements() {
    let (_dir, store) = fresh_store().await;
    store.upsert_instruments(&[instrument(1, "BTC")]).await.unwrap();

    let batch: Vec<Observation> = (0..5_000)
        .map(|i| Observation::with_price(1, day(0) + Duration::minutes(i), i as f64))
        .collect();
    let affected = store.upsert_observations(&batch).await.unwrap();
    assert_eq!(affected, 5_000);

    let latest = store.latest_observation(1).await.unwrap().unwrap();
    assert_eq!(latest.price_usd, 4_999.0);
}

#[tokio::test]
async fn observation_range_bounds_are_inclusive() {
    let (_dir, store) = fresh_store().await;
    store.upsert_instruments(&[instrument(1, "BTC")]).await.unwrap();
    let batch: Vec<Observation> = (0..10)
        .map(|i| Observation::with_price(1, day(i), 100.0 + i as f64))
        .collect();
    store.upsert_observations(&batch).await.unwrap();

    let middle = store
        .get_observations(1, TimeRange::new(Some(day(2)), Some(day(5))))
        .await
        .unwrap();
    let prices: Vec<f64> = middle.iter().map(|o| o.price_usd).collect();
    assert_eq!(prices, vec![102.0, 103.0, 104.0, 105.0]);

    let tail = store
        .get_observations(1, TimeRange::new(Some(day(8)), None))
        .await
        .unwrap();
    assert_eq!(tail.len(), 2);

    let head = store
        .get_observations(1, TimeRange::new(None, Some(day(0))))
        .await
        .unwrap();
    assert_eq!(head.len(), 1);
}

#[tokio::test]
async fn top_by_market_cap_uses_latest_observation() {
    let (_dir, store) = fresh_store().await;
    store
        .upsert_instruments(&[instrument(1, "BTC"), instrument(2, "ETH"), instrument(3, "DOGE")])
        .await
        .unwrap();

    let with_cap = |id: i64, n: i64, cap: f64| {
        let mut obs = Observation::with_price(id, day(n), 1.0);
        obs.market_cap_usd = Some(cap);
        obs
    };
    store
        .upsert_observations(&[
            with_cap(1, 0, 900.0),
            with_cap(1, 1, 500.0),
            with_cap(2, 0, 100.0),
            with_cap(2, 1, 700.0),
            with_cap(3, 1, 10.0),
        ])
        .await
        .unwrap();

    let top = store.top_by_market_cap(2).await.unwrap();
    let symbols: Vec<&str> = top.iter().map(|s| s.symbol.as_str()).collect();
    assert_eq!(symbols, vec!["ETH", "BTC"]);
    assert_eq!(top[0].timestamp, day(1));
    assert_eq!(top[1].market_cap_usd, Some(500.0));
}

#[tokio::test]
async fn status_and_price_updates() {
    let (_dir, store) = fresh_store().await;
    store.upsert_instruments(&[instrument(1, "BTC")]).await.unwrap();
    store
        .upsert_observations(&[Observation::with_price(1, day(0), 10.0)])
        .await
        .unwrap();

    assert_eq!(
        store
            .update_instrument_status(1, InstrumentStatus::Inactive)
            .await
            .unwrap(),
        1
    );
    assert_eq!(
        store
            .update_instrument_status(2, InstrumentStatus::Inactive)
            .await
            .unwrap(),
        0
    );
    assert_eq!(
        store.get_instrument(1).await.unwrap().unwrap().status,
        InstrumentStatus::Inactive
    );

    assert_eq!(store.update_observation_price(1, day(0), 12.5).await.unwrap(), 1);
    assert_eq!(store.update_observation_price(1, day(3), 12.5).await.unwrap(), 0);
    assert_eq!(store.latest_observation(1).await.unwrap().unwrap().price_usd, 12.5);
}

#[tokio::test]
async fn prune_deletes_strictly_older_observations() {
    let (_dir, store) = fresh_store().await;
    store.upsert_instruments(&[instrument(1, "BTC")]).await.unwrap();
    let batch: Vec<Observation> = (0..5)
        .map(|i| Observation::with_price(1, day(i), 1.0))
        .collect();
    store.upsert_observations(&batch).await.unwrap();

    assert_eq!(store.delete_observations_before(day(3)).await.unwrap(), 3);
    let left = store.get_observations(1, TimeRange::all()).await.unwrap();
    assert_eq!(left.first().map(|o| o.timestamp), Some(day(3)));
}

#[tokio::test]
async fn concurrent_writers_on_disjoint_keys_both_succeed() {
    let (dir, store) = fresh_store().await;
    store
        .upsert_instruments(&[instrument(1, "BTC"), instrument(2, "ETH")])
        .await
        .unwrap();

    let other = Store::open(&config_in(&dir), fast_retry()).unwrap();
    let batch = |id: i64| -> Vec<Observation> {
        (0..200)
            .map(|i| Observation::with_price(id, day(0) + Duration::hours(i), i as f64))
            .collect()
    };
    let (first, second) = (batch(1), batch(2));

    let (a, b) = tokio::join!(
        store.upsert_observations(&first),
        other.upsert_observations(&second)
    );
    assert_eq!(a.unwrap(), 200);
    assert_eq!(b.unwrap(), 200);

    assert_eq!(store.get_observations(1, TimeRange::all()).await.unwrap().len(), 200);
    assert_eq!(store.get_observations(2, TimeRange::all()).await.unwrap().len(), 200);
}

#[tokio::test]
async fn held_write_lock_exhausts_retry_budget() {
    let (dir, store) = fresh_store().await;

    let config = DatabaseConfig {
        busy_timeout_ms: 0,
        ..config_in(&dir)
    };
    let retry = RetryConfig {
        max_retries: 2,
        base_delay_ms: 1,
    };
    let contender = Store::open(&config, retry).unwrap();

    let mut locker = SqliteConnection::connect_with(
        &SqliteConnectOptions::new().filename(&config.path),
    )
    .await
    .unwrap();
    let mut tx = locker.begin().await.unwrap();
    sqlx::query("INSERT INTO instruments (id, symbol, name) VALUES (9, 'LCK', 'Lock')")
        .execute(&mut *tx)
        .await
        .unwrap();

    let err = contender
        .upsert_instruments(&[instrument(1, "BTC")])
        .await
        .unwrap_err();
    assert!(
        matches!(err, StoreError::LockTimeout { attempts: 3, .. }),
        "{err:?}"
    );
    assert_eq!(err.class(), ErrorClass::Transient);

    tx.rollback().await.unwrap();
    assert_eq!(store.upsert_instruments(&[instrument(1, "BTC")]).await.unwrap(), 1);
}

#[tokio::test]
async fn writer_recovers_once_lock_is_released() {
    let (dir, _store) = fresh_store().await;

    let config = DatabaseConfig {
        busy_timeout_ms: 0,
        ..config_in(&dir)
    };
    let retry = RetryConfig {
        max_retries: 10,
        base_delay_ms: 20,
    };
    let contender = Store::open(&config, retry).unwrap();

    let mut locker = SqliteConnection::connect_with(
        &SqliteConnectOptions::new().filename(&config.path),
    )
    .await
    .unwrap();
    let mut tx = locker.begin().await.unwrap();
    sqlx::query("INSERT INTO instruments (id, symbol, name) VALUES (9, 'LCK', 'Lock')")
        .execute(&mut *tx)
        .await
        .unwrap();

    let release = async move {
        tokio::time::sleep(std::time::Duration::from_millis(60)).await;
        tx.commit().await.unwrap();
    };
    let rows = [instrument(1, "BTC")];
    let (written, ()) = tokio::join!(contender.upsert_instruments(&rows), release);

    assert_eq!(written.unwrap(), 1);
    assert_eq!(contender.list_instruments().await.unwrap().len(), 2);
}
