pub mod cli;
pub mod config;
pub mod database;
pub mod error;
pub mod indicators;
pub mod signals;
pub mod utils;

pub use config::AppConfig;
pub use database::Store;
pub use error::{ErrorClass, Result, StoreError};
pub use indicators::{IndicatorEngine, IndicatorSeries};
pub use signals::{SignalStore, TrendClassifier, Verdict};
