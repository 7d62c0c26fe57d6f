use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqliteRow;
use sqlx::{FromRow, Row};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Storage format for every timestamp column: UTC, second precision, no offset.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

pub fn format_timestamp(time: &DateTime<Utc>) -> String {
    time.format(TIMESTAMP_FORMAT).to_string()
}

/// Parse a timestamp in storage format, RFC 3339, or a bare `YYYY-MM-DD` date
/// (taken as midnight UTC).
pub fn parse_timestamp(value: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
    let value = value.trim();
    let stored = NaiveDateTime::parse_from_str(value, TIMESTAMP_FORMAT);
    if let Ok(naive) = &stored {
        return Ok(Utc.from_utc_datetime(naive));
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Ok(dt.with_timezone(&Utc));
    }
    if let Some(naive) = NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
    {
        return Ok(Utc.from_utc_datetime(&naive));
    }
    stored.map(|naive| Utc.from_utc_datetime(&naive))
}

fn decode_timestamp(row: &SqliteRow, column: &str) -> Result<DateTime<Utc>, sqlx::Error> {
    let raw: String = row.try_get(column)?;
    parse_timestamp(&raw).map_err(|e| sqlx::Error::ColumnDecode {
        index: column.to_string(),
        source: Box::new(e),
    })
}

fn decode_optional_timestamp(
    row: &SqliteRow,
    column: &str,
) -> Result<Option<DateTime<Utc>>, sqlx::Error> {
    let raw: Option<String> = row.try_get(column)?;
    raw.map(|value| {
        parse_timestamp(&value).map_err(|e| sqlx::Error::ColumnDecode {
            index: column.to_string(),
            source: Box::new(e),
        })
    })
    .transpose()
}

/// Serde adapters so JSON producers may use either storage format or RFC 3339.
pub mod serde_timestamp {
    use super::{format_timestamp, parse_timestamp};
    use chrono::{DateTime, Utc};
    use serde::{de::Error, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(time: &DateTime<Utc>, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&format_timestamp(time))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<DateTime<Utc>, D::Error> {
        let raw = String::deserialize(d)?;
        parse_timestamp(&raw).map_err(D::Error::custom)
    }

    pub mod option {
        use super::super::{format_timestamp, parse_timestamp};
        use chrono::{DateTime, Utc};
        use serde::{de::Error, Deserialize, Deserializer, Serializer};

        pub fn serialize<S: Serializer>(
            time: &Option<DateTime<Utc>>,
            s: S,
        ) -> Result<S::Ok, S::Error> {
            match time {
                Some(time) => s.serialize_str(&format_timestamp(time)),
                None => s.serialize_none(),
            }
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(
            d: D,
        ) -> Result<Option<DateTime<Utc>>, D::Error> {
            Option::<String>::deserialize(d)?
                .map(|raw| parse_timestamp(&raw).map_err(D::Error::custom))
                .transpose()
        }
    }
}

#[derive(Debug, Error)]
#[error("unrecognised value {value:?} for {kind}")]
pub struct ParseLabelError {
    kind: &'static str,
    value: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstrumentStatus {
    #[default]
    Active,
    Inactive,
}

impl InstrumentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            InstrumentStatus::Active => "active",
            InstrumentStatus::Inactive => "inactive",
        }
    }
}

impl fmt::Display for InstrumentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for InstrumentStatus {
    type Err = ParseLabelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "active" => Ok(InstrumentStatus::Active),
            "inactive" => Ok(InstrumentStatus::Inactive),
            _ => Err(ParseLabelError {
                kind: "instrument status",
                value: s.to_string(),
            }),
        }
    }
}

/// Identity record of a tradable instrument. Ids come from the upstream
/// provider and are never generated locally.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Instrument {
    pub id: i64,
    pub symbol: String,
    pub name: String,
    #[serde(default)]
    pub slug: Option<String>,
    #[serde(default, with = "serde_timestamp::option")]
    pub first_historical_data: Option<DateTime<Utc>>,
    #[serde(default, with = "serde_timestamp::option")]
    pub last_historical_data: Option<DateTime<Utc>>,
    #[serde(default)]
    pub status: InstrumentStatus,
}

impl<'r> FromRow<'r, SqliteRow> for Instrument {
    fn from_row(row: &'r SqliteRow) -> Result<Self, sqlx::Error> {
        let status: String = row.try_get("status")?;
        Ok(Self {
            id: row.try_get("id")?,
            symbol: row.try_get("symbol")?,
            name: row.try_get("name")?,
            slug: row.try_get("slug")?,
            first_historical_data: decode_optional_timestamp(row, "first_historical_data")?,
            last_historical_data: decode_optional_timestamp(row, "last_historical_data")?,
            status: status.parse().map_err(|e| sqlx::Error::ColumnDecode {
                index: "status".to_string(),
                source: Box::new(e),
            })?,
        })
    }
}

/// One market snapshot for an instrument at a point in time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    pub instrument_id: i64,
    #[serde(with = "serde_timestamp")]
    pub timestamp: DateTime<Utc>,
    pub price_usd: f64,
    #[serde(default)]
    pub market_cap_usd: Option<f64>,
    #[serde(default)]
    pub volume_24h_usd: Option<f64>,
    #[serde(default)]
    pub percent_change_1h: Option<f64>,
    #[serde(default)]
    pub percent_change_24h: Option<f64>,
    #[serde(default)]
    pub percent_change_7d: Option<f64>,
    #[serde(default)]
    pub circulating_supply: Option<f64>,
    #[serde(default)]
    pub total_supply: Option<f64>,
    #[serde(default)]
    pub max_supply: Option<f64>,
}

impl Observation {
    /// An observation carrying only a price; every other value column is null.
    pub fn with_price(instrument_id: i64, timestamp: DateTime<Utc>, price_usd: f64) -> Self {
        Self {
            instrument_id,
            timestamp,
            price_usd,
            market_cap_usd: None,
            volume_24h_usd: None,
            percent_change_1h: None,
            percent_change_24h: None,
            percent_change_7d: None,
            circulating_supply: None,
            total_supply: None,
            max_supply: None,
        }
    }
}

impl<'r> FromRow<'r, SqliteRow> for Observation {
    fn from_row(row: &'r SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            instrument_id: row.try_get("instrument_id")?,
            timestamp: decode_timestamp(row, "timestamp")?,
            price_usd: row.try_get("price_usd")?,
            market_cap_usd: row.try_get("market_cap_usd")?,
            volume_24h_usd: row.try_get("volume_24h_usd")?,
            percent_change_1h: row.try_get("percent_change_1h")?,
            percent_change_24h: row.try_get("percent_change_24h")?,
            percent_change_7d: row.try_get("percent_change_7d")?,
            circulating_supply: row.try_get("circulating_supply")?,
            total_supply: row.try_get("total_supply")?,
            max_supply: row.try_get("max_supply")?,
        })
    }
}

/// Descriptive data for an instrument. Survives an instrument purge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct Metadata {
    pub instrument_id: i64,
    #[serde(default)]
    pub logo_url: Option<String>,
    #[serde(default)]
    pub website_url: Option<String>,
    #[serde(default)]
    pub technical_doc: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    /// Comma-joined tag list.
    #[serde(default)]
    pub category: Option<String>,
}

impl Metadata {
    pub fn tags(&self) -> Vec<&str> {
        self.category
            .as_deref()
            .map(|c| c.split(',').map(str::trim).filter(|t| !t.is_empty()).collect())
            .unwrap_or_default()
    }
}

/// Discrete label derived from RSI. High RSI reads as a bearish warning and
/// low RSI as a bullish opportunity (mean reversion).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Signal {
    #[serde(rename = "Bullish Signal")]
    Bullish,
    #[serde(rename = "Bearish Signal")]
    Bearish,
    #[serde(rename = "Neutral/No signal")]
    Neutral,
}

impl Signal {
    pub fn as_str(&self) -> &'static str {
        match self {
            Signal::Bullish => "Bullish Signal",
            Signal::Bearish => "Bearish Signal",
            Signal::Neutral => "Neutral/No signal",
        }
    }
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Signal {
    type Err = ParseLabelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Bullish Signal" => Ok(Signal::Bullish),
            "Bearish Signal" => Ok(Signal::Bearish),
            "Neutral/No signal" => Ok(Signal::Neutral),
            _ => Err(ParseLabelError {
                kind: "signal",
                value: s.to_string(),
            }),
        }
    }
}

/// Indicator values for one observation. Window-based columns are `None`
/// until enough history exists.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndicatorRow {
    pub instrument_id: i64,
    #[serde(with = "serde_timestamp")]
    pub timestamp: DateTime<Utc>,
    pub daily_return: Option<f64>,
    pub ma_7d: Option<f64>,
    pub std_7d: Option<f64>,
    pub rsi: Option<f64>,
    pub signal: Signal,
}

impl<'r> FromRow<'r, SqliteRow> for IndicatorRow {
    fn from_row(row: &'r SqliteRow) -> Result<Self, sqlx::Error> {
        let signal: String = row.try_get("signal")?;
        Ok(Self {
            instrument_id: row.try_get("instrument_id")?,
            timestamp: decode_timestamp(row, "timestamp")?,
            daily_return: row.try_get("daily_return")?,
            ma_7d: row.try_get("ma_7d")?,
            std_7d: row.try_get("std_7d")?,
            rsi: row.try_get("rsi")?,
            signal: signal.parse().map_err(|e| sqlx::Error::ColumnDecode {
                index: "signal".to_string(),
                source: Box::new(e),
            })?,
        })
    }
}

/// Latest observation of an instrument joined with its identity.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MarketSnapshot {
    pub id: i64,
    pub symbol: String,
    pub name: String,
    #[serde(with = "serde_timestamp")]
    pub timestamp: DateTime<Utc>,
    pub price_usd: f64,
    pub market_cap_usd: Option<f64>,
    pub percent_change_24h: Option<f64>,
    pub percent_change_7d: Option<f64>,
}

impl<'r> FromRow<'r, SqliteRow> for MarketSnapshot {
    fn from_row(row: &'r SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            symbol: row.try_get("symbol")?,
            name: row.try_get("name")?,
            timestamp: decode_timestamp(row, "timestamp")?,
            price_usd: row.try_get("price_usd")?,
            market_cap_usd: row.try_get("market_cap_usd")?,
            percent_change_24h: row.try_get("percent_change_24h")?,
            percent_change_7d: row.try_get("percent_change_7d")?,
        })
    }
}

/// Inclusive, optionally open-ended time window.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TimeRange {
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
}

impl TimeRange {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn new(start: Option<DateTime<Utc>>, end: Option<DateTime<Utc>>) -> Self {
        Self { start, end }
    }
}
