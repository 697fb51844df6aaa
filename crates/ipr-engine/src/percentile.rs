// SPDX-License-Identifier: MIT OR Apache-2.0

#![forbid(unsafe_code)]

/// Collects samples and answers arbitrary percentile queries.
///
/// Samples are appended in O(1) and sorted lazily on the first query after an
/// insertion, so repeated queries are cheap and never consume the samples.
#[derive(Clone, Debug)]
pub struct PercentileAccumulator {
    samples: Vec<f64>,
    sorted: bool,
}

impl PercentileAccumulator {
    pub fn new() -> Self {
        Self::with_capacity(0)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            samples: Vec::with_capacity(capacity),
            sorted: true,
        }
    }

    pub fn add(&mut self, value: f64) {
        if let Some(&last) = self.samples.last() {
            if self.sorted && last.total_cmp(&value).is_gt() {
                self.sorted = false;
            }
        }
        self.samples.push(value);
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Value at rank `p` (clamped to `[0, 1]`), interpolated linearly between
    /// the two bracketing order statistics. `None` until a sample is added.
    pub fn percentile(&mut self, p: f64) -> Option<f64> {
        if !self.sorted {
            self.samples.sort_by(f64::total_cmp);
            self.sorted = true;
        }
        percentile_of_sorted(&self.samples, p)
    }
}

impl Default for PercentileAccumulator {
    fn default() -> Self {
        Self::new()
    }
}

impl Extend<f64> for PercentileAccumulator {
    fn extend<I: IntoIterator<Item = f64>>(&mut self, iter: I) {
        for value in iter {
            self.add(value);
        }
    }
}

impl FromIterator<f64> for PercentileAccumulator {
    fn from_iter<I: IntoIterator<Item = f64>>(iter: I) -> Self {
        let mut accumulator = Self::new();
        accumulator.extend(iter);
        accumulator
    }
}

/// Linear-interpolation percentile over an ascending slice.
pub fn percentile_of_sorted(sorted: &[f64], p: f64) -> Option<f64> {
    let last = sorted.len().checked_sub(1)?;
    let p = if p.is_nan() { 0.5 } else { p.clamp(0.0, 1.0) };
    let rank = p * last as f64;
    let lo = rank.floor() as usize;
    let hi = (rank.ceil() as usize).min(last);
    let (a, b) = (sorted[lo], sorted[hi]);
    if lo == hi || a == b {
        return Some(a);
    }
    // Weighted form stays finite when `b - a` would overflow.
    let t = rank - lo as f64;
    Some(a * (1.0 - t) + b * t)
}

/// Median of an unordered slice; the mean of the two middle values for even lengths.
pub fn median(values: &[f64]) -> Option<f64> {
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    percentile_of_sorted(&sorted, 0.5)
}
