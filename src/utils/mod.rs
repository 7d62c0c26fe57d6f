use chrono::{DateTime, Utc};
use std::future::Future;
use std::time::Instant;
use tracing::debug;

// Measure execution time of an async operation and log it at debug level
pub async fn measure_time<F, T, E>(operation_name: &str, f: F) -> Result<T, E>
where
    F: Future<Output = Result<T, E>>,
{
    let start = Instant::now();
    let result = f.await;
    let elapsed = start.elapsed();

    debug!(
        operation = operation_name,
        ok = result.is_ok(),
        "{} completed in {:.2?}",
        operation_name,
        elapsed
    );

    result
}

// Format a timestamp for console output
pub fn format_time(time: &DateTime<Utc>) -> String {
    time.format("%Y-%m-%d %H:%M:%S UTC").to_string()
}

// Render an optional value with fixed precision, `-` when absent
pub fn format_optional(value: Option<f64>, precision: usize) -> String {
    match value {
        Some(v) => format!("{:.*}", precision, v),
        None => "-".to_string(),
    }
}
