pub mod engine;
pub mod ta;

pub use self::engine::{derive_indicators, IndicatorEngine, IndicatorSeries};
