//! Running statistics over valid pixel values.

use serde::{Deserialize, Serialize};

use crate::special::{is_special, VALID_MAXIMUM, VALID_MINIMUM};

/// Accumulates sum and sum of squares over values that are neither special
/// nor outside the configured valid range. Rejected values are counted but
/// otherwise ignored.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Statistics {
    valid_min: f64,
    valid_max: f64,
    sum: f64,
    sum_sq: f64,
    minimum: f64,
    maximum: f64,
    valid_pixels: u64,
    total_pixels: u64,
}

impl Default for Statistics {
    fn default() -> Self {
        Self::with_valid_range(VALID_MINIMUM, VALID_MAXIMUM)
    }
}

impl Statistics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_valid_range(valid_min: f64, valid_max: f64) -> Self {
        Self {
            valid_min,
            valid_max,
            sum: 0.0,
            sum_sq: 0.0,
            minimum: f64::INFINITY,
            maximum: f64::NEG_INFINITY,
            valid_pixels: 0,
            total_pixels: 0,
        }
    }

    pub fn reset(&mut self) {
        *self = Self::with_valid_range(self.valid_min, self.valid_max);
    }

    #[inline]
    pub fn in_valid_range(&self, value: f64) -> bool {
        !is_special(value) && value >= self.valid_min && value <= self.valid_max
    }

    #[inline]
    pub fn add(&mut self, value: f64) {
        self.total_pixels += 1;
        if !self.in_valid_range(value) {
            return;
        }
        self.valid_pixels += 1;
        self.sum += value;
        self.sum_sq += value * value;
        self.minimum = self.minimum.min(value);
        self.maximum = self.maximum.max(value);
    }

    pub fn add_all(&mut self, values: &[f64]) {
        for &v in values {
            self.add(v);
        }
    }

    /// Folds another accumulator into this one. The valid range of `self` is kept.
    pub fn merge(&mut self, other: &Statistics) {
        self.sum += other.sum;
        self.sum_sq += other.sum_sq;
        self.minimum = self.minimum.min(other.minimum);
        self.maximum = self.maximum.max(other.maximum);
        self.valid_pixels += other.valid_pixels;
        self.total_pixels += other.total_pixels;
    }

    pub fn valid_pixels(&self) -> u64 {
        self.valid_pixels
    }

    pub fn total_pixels(&self) -> u64 {
        self.total_pixels
    }

    pub fn sum(&self) -> f64 {
        self.sum
    }

    /// Mean of valid values, `None` if there are none.
    pub fn average(&self) -> Option<f64> {
        (self.valid_pixels > 0).then(|| self.sum / self.valid_pixels as f64)
    }

    /// Sample variance (n - 1 denominator).
    pub fn variance(&self) -> Option<f64> {
        if self.valid_pixels < 2 {
            return None;
        }
        let n = self.valid_pixels as f64;
        let var = (self.sum_sq - self.sum * self.sum / n) / (n - 1.0);
        Some(var.max(0.0))
    }

    pub fn standard_deviation(&self) -> Option<f64> {
        self.variance().map(f64::sqrt)
    }

    /// Root mean square of valid values.
    pub fn rms(&self) -> Option<f64> {
        (self.valid_pixels > 0).then(|| (self.sum_sq / self.valid_pixels as f64).sqrt())
    }

    pub fn minimum(&self) -> Option<f64> {
        (self.valid_pixels > 0).then_some(self.minimum)
    }

    pub fn maximum(&self) -> Option<f64> {
        (self.valid_pixels > 0).then_some(self.maximum)
    }

    /// `(value - mean) / stddev`; `None` when the deviation is zero or undefined.
    pub fn z_score(&self, value: f64) -> Option<f64> {
        let mean = self.average()?;
        let sd = self.standard_deviation()?;
        (sd > 0.0).then(|| (value - mean) / sd)
    }

    /// Percentage of added values that were valid.
    pub fn valid_percent(&self) -> f64 {
        if self.total_pixels == 0 {
            return 0.0;
        }
        100.0 * self.valid_pixels as f64 / self.total_pixels as f64
    }
}
