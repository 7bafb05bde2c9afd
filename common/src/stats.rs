//! Summary statistics over measurement series.

use serde::Serialize;

/// Mean, extremes and size of a series.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct Summary {
    pub mean: f64,
    pub min: f64,
    pub max: f64,
    pub count: usize,
}

impl Summary {
    /// `None` for an empty series.
    pub fn of(samples: &[f64]) -> Option<Summary> {
        if samples.is_empty() {
            return None;
        }

        let (min, max, sum) = samples.iter()
            .fold((f64::INFINITY, f64::NEG_INFINITY, 0.0), |(min, max, sum), &x| {
                (min.min(x), max.max(x), sum + x)
            });

        Some(Summary {
            mean: sum / samples.len() as f64,
            min,
            max,
            count: samples.len(),
        })
    }
}

/// Round to two decimals.
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
