use crate::config::IndicatorConfig;
use crate::database::connection::Store;
use crate::database::models::{IndicatorRow, Observation, Signal, TimeRange};
use crate::database::queries::fetch_observations;
use crate::error::Result;
use crate::indicators::ta::{
    Next, PercentChange, RelativeStrengthIndex, SimpleMovingAverage, StandardDeviation,
};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info_span, warn, Instrument, Span};

/// Indicator rows for one instrument, ascending by timestamp.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IndicatorSeries {
    pub instrument_id: i64,
    pub rows: Vec<IndicatorRow>,
}

impl IndicatorSeries {
    pub fn empty(instrument_id: i64) -> Self {
        Self {
            instrument_id,
            rows: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn latest(&self) -> Option<&IndicatorRow> {
        self.rows.last()
    }
}

/// Map an RSI reading to its contrarian label. A missing reading is neutral.
pub fn classify_rsi(rsi: Option<f64>, config: &IndicatorConfig) -> Signal {
    match rsi {
        Some(value) if value > config.overbought => Signal::Bearish,
        Some(value) if value < config.oversold => Signal::Bullish,
        _ => Signal::Neutral,
    }
}

/// Derive the full indicator series from observations already sorted by
/// timestamp. Pure; the same input always yields the same output.
pub fn derive_indicators(
    instrument_id: i64,
    observations: &[Observation],
    config: &IndicatorConfig,
) -> Result<IndicatorSeries> {
    let mut daily_return = PercentChange::new();
    let mut moving_average = SimpleMovingAverage::new(config.ma_window)?;
    let mut deviation = StandardDeviation::new(config.ma_window)?;
    let mut rsi = RelativeStrengthIndex::new(config.rsi_period, config.epsilon)?;

    let rows = observations
        .iter()
        .map(|obs| {
            let price = obs.price_usd;
            let strength = rsi.next(price);
            IndicatorRow {
                instrument_id,
                timestamp: obs.timestamp,
                daily_return: daily_return.next(price),
                ma_7d: moving_average.next(price),
                std_7d: deviation.next(price),
                rsi: strength,
                signal: classify_rsi(strength, config),
            }
        })
        .collect();

    Ok(IndicatorSeries {
        instrument_id,
        rows,
    })
}

/// Reads an instrument's price history and derives its indicators.
pub struct IndicatorEngine {
    store: Arc<Store>,
    config: IndicatorConfig,
    span: Span,
}

impl IndicatorEngine {
    pub fn new(store: Arc<Store>, config: IndicatorConfig) -> Self {
        Self {
            store,
            config,
            span: info_span!("indicators"),
        }
    }

    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    /// Compute indicators for every observation inside `range`.
    /// An instrument with no observations yields an empty series.
    pub async fn compute_indicators(
        &self,
        instrument_id: i64,
        range: TimeRange,
    ) -> Result<IndicatorSeries> {
        async move {
            let observations = self
                .store
                .with_connection(move |conn| {
                    Box::pin(fetch_observations(conn, instrument_id, range))
                })
                .await?;

            if observations.is_empty() {
                warn!(instrument_id, "No data found for instrument");
                return Ok(IndicatorSeries::empty(instrument_id));
            }

            let series = derive_indicators(instrument_id, &observations, &self.config)?;
            debug!(instrument_id, rows = series.len(), "Indicators derived");
            Ok(series)
        }
        .instrument(self.span.clone())
        .await
    }
}
