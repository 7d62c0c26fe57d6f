// Streaming rolling-window indicators. Each one consumes a price at a time
// and yields `None` until its window is full.

use crate::error::{Result, StoreError};
use std::collections::VecDeque;

/// The `Next` trait is used for indicators that produce a single value
pub trait Next<T> {
    type Output;
    fn next(&mut self, input: T) -> Self::Output;
}

fn check_window(name: &'static str, value: usize, min: usize) -> Result<()> {
    if value < min {
        return Err(StoreError::InvalidWindow { name, min, value });
    }
    Ok(())
}

/// Push onto a fixed-size window, evicting the oldest value once full.
fn slide(window: &mut VecDeque<f64>, period: usize, value: f64) {
    if window.len() == period {
        window.pop_front();
    }
    window.push_back(value);
}

fn mean(window: &VecDeque<f64>) -> f64 {
    window.iter().sum::<f64>() / window.len() as f64
}

/// Simple Moving Average
pub struct SimpleMovingAverage {
    period: usize,
    window: VecDeque<f64>,
}

impl SimpleMovingAverage {
    pub fn new(period: usize) -> Result<Self> {
        check_window("moving average", period, 1)?;

        Ok(Self {
            period,
            window: VecDeque::with_capacity(period),
        })
    }
}

impl Next<f64> for SimpleMovingAverage {
    type Output = Option<f64>;

    fn next(&mut self, input: f64) -> Self::Output {
        slide(&mut self.window, self.period, input);
        (self.window.len() == self.period).then(|| mean(&self.window))
    }
}

/// Sample standard deviation (n - 1 denominator) over a rolling window.
pub struct StandardDeviation {
    period: usize,
    window: VecDeque<f64>,
}

impl StandardDeviation {
    pub fn new(period: usize) -> Result<Self> {
        check_window("standard deviation", period, 2)?;

        Ok(Self {
            period,
            window: VecDeque::with_capacity(period),
        })
    }
}

impl Next<f64> for StandardDeviation {
    type Output = Option<f64>;

    fn next(&mut self, input: f64) -> Self::Output {
        slide(&mut self.window, self.period, input);
        if self.window.len() < self.period {
            return None;
        }

        let mean = mean(&self.window);
        let sum_sq: f64 = self.window.iter().map(|x| (x - mean).powi(2)).sum();
        Some((sum_sq / (self.period - 1) as f64).sqrt())
    }
}

/// Percent change against the previous input. Undefined for the first
/// input and whenever the previous value is zero.
#[derive(Default)]
pub struct PercentChange {
    prev_value: Option<f64>,
}

impl PercentChange {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Next<f64> for PercentChange {
    type Output = Option<f64>;

    fn next(&mut self, input: f64) -> Self::Output {
        let change = match self.prev_value {
            Some(prev) if prev != 0.0 => Some((input - prev) / prev * 100.0),
            _ => None,
        };
        self.prev_value = Some(input);
        change
    }
}

/// Relative Strength Index over plain rolling means of gains and losses.
///
/// The first input counts as a zero change, so the first value appears
/// after `period` inputs. `epsilon` is added to the average loss to keep
/// the ratio finite on a series that never falls.
pub struct RelativeStrengthIndex {
    period: usize,
    epsilon: f64,
    prev_value: Option<f64>,
    gains: VecDeque<f64>,
    losses: VecDeque<f64>,
}

impl RelativeStrengthIndex {
    pub fn new(period: usize, epsilon: f64) -> Result<Self> {
        check_window("RSI", period, 1)?;

        Ok(Self {
            period,
            epsilon,
            prev_value: None,
            gains: VecDeque::with_capacity(period),
            losses: VecDeque::with_capacity(period),
        })
    }
}

impl Next<f64> for RelativeStrengthIndex {
    type Output = Option<f64>;

    fn next(&mut self, input: f64) -> Self::Output {
        let change = self.prev_value.map_or(0.0, |prev| input - prev);
        self.prev_value = Some(input);

        slide(&mut self.gains, self.period, change.max(0.0));
        slide(&mut self.losses, self.period, (-change).max(0.0));

        if self.gains.len() < self.period {
            return None;
        }

        let avg_gain = mean(&self.gains);
        let avg_loss = mean(&self.losses);
        let rs = avg_gain / (avg_loss + self.epsilon);
        Some(100.0 - 100.0 / (1.0 + rs))
    }
}
