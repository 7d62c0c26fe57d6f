pub mod store;
pub mod trend;

pub use self::store::SignalStore;
pub use self::trend::{TrendClassifier, Verdict};
