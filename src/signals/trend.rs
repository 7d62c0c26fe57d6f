use crate::config::IndicatorConfig;
use crate::database::connection::Store;
use crate::database::models::{Signal, TimeRange};
use crate::error::Result;
use crate::indicators::IndicatorEngine;
use crate::signals::store::SignalStore;
use crate::utils::measure_time;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use tracing::{info, info_span, Instrument, Span};

/// Outlook for one instrument, taken from its most recent signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "verdict", content = "instrument_id", rename_all = "snake_case")]
pub enum Verdict {
    Bullish(i64),
    Bearish(i64),
    Neutral(i64),
    NoData,
}

impl Verdict {
    pub fn from_signal(instrument_id: i64, signal: Signal) -> Self {
        match signal {
            Signal::Bullish => Verdict::Bullish(instrument_id),
            Signal::Bearish => Verdict::Bearish(instrument_id),
            Signal::Neutral => Verdict::Neutral(instrument_id),
        }
    }

    pub fn instrument_id(&self) -> Option<i64> {
        match self {
            Verdict::Bullish(id) | Verdict::Bearish(id) | Verdict::Neutral(id) => Some(*id),
            Verdict::NoData => None,
        }
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Verdict::Bullish(id) => write!(f, "Bullish outlook for {id} based on RSI signal."),
            Verdict::Bearish(id) => write!(f, "Bearish outlook for {id} based on RSI signal."),
            Verdict::Neutral(id) => write!(f, "Neutral signals for {id} at the moment."),
            Verdict::NoData => f.write_str("No data available to determine a trend."),
        }
    }
}

/// Recomputes indicators, saves them, and reports the latest signal.
pub struct TrendClassifier {
    engine: IndicatorEngine,
    signals: SignalStore,
    span: Span,
}

impl TrendClassifier {
    pub fn new(store: Arc<Store>, config: IndicatorConfig) -> Self {
        Self {
            engine: IndicatorEngine::new(Arc::clone(&store), config),
            signals: SignalStore::new(store),
            span: info_span!("trend"),
        }
    }

    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    pub async fn classify(&self, instrument_id: i64, range: TimeRange) -> Result<Verdict> {
        async move {
            let series = measure_time(
                "compute_indicators",
                self.engine.compute_indicators(instrument_id, range),
            )
            .await?;

            let Some(latest) = series.latest() else {
                info!(instrument_id, "No data to classify");
                return Ok(Verdict::NoData);
            };
            let verdict = Verdict::from_signal(instrument_id, latest.signal);

            measure_time("persist_signals", self.signals.persist(&series)).await?;

            info!(instrument_id, %verdict, "Trend classified");
            Ok(verdict)
        }
        .instrument(self.span.clone())
        .await
    }
}
