// SPDX-License-Identifier: MIT OR Apache-2.0

#![forbid(unsafe_code)]

use crate::synth::SynthesizedRanges;
use ipr_core::{IprError, Key, SampleTypeFilter, TrainingDiagnostics, WaveNumber};
use std::collections::HashSet;

/// Stable model identifier written into persisted envelopes.
pub const IPR_MODEL_ID: &str = "ipr";
/// Model schema version written into persisted envelopes.
pub const IPR_MODEL_SCHEMA_VERSION: u32 = 1;

/// Synthesized low/high percentile pair of one key.
///
/// `high >= low` is not guaranteed; use [`InterPercentileRange::clamped_width`]
/// when a non-negative spread is needed.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct InterPercentileRange {
    pub low: f64,
    pub high: f64,
}

impl InterPercentileRange {
    pub fn new(low: f64, high: f64) -> Self {
        Self { low, high }
    }

    /// Signed width `high - low`.
    pub fn width(&self) -> f64 {
        self.high - self.low
    }

    pub fn clamped_width(&self) -> f64 {
        self.width().max(0.0)
    }

    /// Inclusive acceptance interval `[low - f*w, high + f*w]` with signed width `w`.
    pub fn bounds(&self, tolerance_factor: f64) -> (f64, f64) {
        let margin = tolerance_factor * self.width();
        (self.low - margin, self.high + margin)
    }

    /// Inclusive bound check; NaN never passes.
    pub fn accepts(&self, value: f64, tolerance_factor: f64) -> bool {
        let (lower, upper) = self.bounds(tolerance_factor);
        value >= lower && value <= upper
    }
}

/// Immutable trained model: ranges per wave number and per numeric field in
/// population order, plus the population filter it was trained on.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Clone, Debug, PartialEq)]
pub struct IprModel {
    sample_type_filter: SampleTypeFilter,
    amplitude_ranges: Vec<(WaveNumber, InterPercentileRange)>,
    field_ranges: Vec<(String, InterPercentileRange)>,
    diagnostics: TrainingDiagnostics,
}

impl IprModel {
    pub fn new(
        sample_type_filter: SampleTypeFilter,
        ranges: SynthesizedRanges,
        diagnostics: TrainingDiagnostics,
    ) -> Result<Self, IprError> {
        let model = Self {
            sample_type_filter,
            amplitude_ranges: ranges.amplitudes,
            field_ranges: ranges.fields,
            diagnostics,
        };
        model.validate()?;
        Ok(model)
    }

    /// Checks the invariants a deserialized model must also hold.
    pub fn validate(&self) -> Result<(), IprError> {
        let mut seen_wave_numbers = HashSet::with_capacity(self.amplitude_ranges.len());
        for (wave_number, range) in &self.amplitude_ranges {
            if !wave_number.value().is_finite() {
                return Err(IprError::invalid_input(format!(
                    "model wave number must be finite; got {wave_number}"
                )));
            }
            if !seen_wave_numbers.insert(*wave_number) {
                return Err(IprError::invalid_input(format!(
                    "model contains duplicate wave number {wave_number}"
                )));
            }
            validate_range(&Key::WaveNumber(*wave_number), range)?;
        }

        let mut seen_fields = HashSet::with_capacity(self.field_ranges.len());
        for (name, range) in &self.field_ranges {
            if !seen_fields.insert(name.as_str()) {
                return Err(IprError::invalid_input(format!(
                    "model contains duplicate field {name}"
                )));
            }
            validate_range(&Key::Field(name.clone()), range)?;
        }
        Ok(())
    }

    pub fn sample_type_filter(&self) -> &SampleTypeFilter {
        &self.sample_type_filter
    }

    pub fn amplitude_ranges(&self) -> &[(WaveNumber, InterPercentileRange)] {
        &self.amplitude_ranges
    }

    pub fn field_ranges(&self) -> &[(String, InterPercentileRange)] {
        &self.field_ranges
    }

    pub fn diagnostics(&self) -> &TrainingDiagnostics {
        &self.diagnostics
    }

    pub fn amplitude_key_count(&self) -> usize {
        self.amplitude_ranges.len()
    }

    pub fn amplitude_range(&self, wave_number: WaveNumber) -> Option<InterPercentileRange> {
        self.amplitude_ranges
            .iter()
            .find(|(candidate, _)| *candidate == wave_number)
            .map(|(_, range)| *range)
    }

    pub fn field_range(&self, name: &str) -> Option<InterPercentileRange> {
        self.field_ranges
            .iter()
            .find(|(candidate, _)| candidate == name)
            .map(|(_, range)| *range)
    }

    /// Every key in validation order: wave numbers first, then fields.
    pub fn keys(&self) -> Vec<Key> {
        self.amplitude_ranges
            .iter()
            .map(|(wave_number, _)| Key::WaveNumber(*wave_number))
            .chain(
                self.field_ranges
                    .iter()
                    .map(|(name, _)| Key::Field(name.clone())),
            )
            .collect()
    }
}

fn validate_range(key: &Key, range: &InterPercentileRange) -> Result<(), IprError> {
    if !range.low.is_finite() || !range.high.is_finite() {
        return Err(IprError::invalid_input(format!(
            "model range for {key} must be finite; got low={}, high={}",
            range.low, range.high
        )));
    }
    Ok(())
}
