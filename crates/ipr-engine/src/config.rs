// SPDX-License-Identifier: MIT OR Apache-2.0

#![forbid(unsafe_code)]

use ipr_core::{IprError, SampleTypeFilter};

pub const DEFAULT_CHUNK_SIZE: usize = 1000;
pub const DEFAULT_LOW_PERCENTILE: f64 = 0.25;
pub const DEFAULT_HIGH_PERCENTILE: f64 = 0.75;
pub const DEFAULT_TOLERANCE_FACTOR: f64 = 3.0;

/// How many issues a validation run collects.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ReportMode {
    /// Stop at the first issue.
    #[default]
    FirstViolation,
    /// Collect every issue, in the same order fail-fast would visit them.
    AllViolations,
}

/// Training and validation settings for the inter-percentile-range checker.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
#[derive(Clone, Debug, PartialEq)]
pub struct IprConfig {
    pub chunk_size: usize,
    pub low_percentile: f64,
    pub high_percentile: f64,
    pub tolerance_factor: f64,
    pub population_filter: SampleTypeFilter,
    pub report_mode: ReportMode,
}

impl Default for IprConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            low_percentile: DEFAULT_LOW_PERCENTILE,
            high_percentile: DEFAULT_HIGH_PERCENTILE,
            tolerance_factor: DEFAULT_TOLERANCE_FACTOR,
            population_filter: SampleTypeFilter::match_all(),
            report_mode: ReportMode::FirstViolation,
        }
    }
}

impl IprConfig {
    pub fn validate(&self) -> Result<(), IprError> {
        validate_training_settings(self.chunk_size, self.low_percentile, self.high_percentile)?;
        validate_tolerance_factor(self.tolerance_factor)
    }

    /// True when `other` would train a different model from the same population.
    ///
    /// Tolerance factor and report mode only affect validation.
    pub fn training_differs(&self, other: &Self) -> bool {
        self.chunk_size != other.chunk_size
            || self.low_percentile.to_bits() != other.low_percentile.to_bits()
            || self.high_percentile.to_bits() != other.high_percentile.to_bits()
            || self.population_filter != other.population_filter
    }
}

pub(crate) fn validate_training_settings(
    chunk_size: usize,
    low_percentile: f64,
    high_percentile: f64,
) -> Result<(), IprError> {
    if chunk_size == 0 {
        return Err(IprError::configuration("chunk_size must be >= 1; got 0"));
    }
    for (name, value) in [
        ("low_percentile", low_percentile),
        ("high_percentile", high_percentile),
    ] {
        if !value.is_finite() || !(0.0..=1.0).contains(&value) {
            return Err(IprError::configuration(format!(
                "{name} must be finite and within [0, 1]; got {value}"
            )));
        }
    }
    if low_percentile > high_percentile {
        return Err(IprError::configuration(format!(
            "percentiles must satisfy low <= high; got low={low_percentile}, high={high_percentile}"
        )));
    }
    Ok(())
}

pub(crate) fn validate_tolerance_factor(factor: f64) -> Result<(), IprError> {
    if !factor.is_finite() || factor < 0.0 {
        return Err(IprError::configuration(format!(
            "tolerance_factor must be finite and >= 0; got {factor}"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::{IprConfig, ReportMode};
    use ipr_core::SampleTypeFilter;

    #[test]
    fn defaults_match_documented_values() {
        let config = IprConfig::default();
        assert_eq!(config.chunk_size, 1000);
        assert_eq!(config.low_percentile, 0.25);
        assert_eq!(config.high_percentile, 0.75);
        assert_eq!(config.tolerance_factor, 3.0);
        assert!(config.population_filter.is_match_all());
        assert_eq!(config.report_mode, ReportMode::FirstViolation);
        config.validate().expect("defaults must validate");
    }

    #[test]
    fn invalid_settings_are_configuration_errors() {
        let cases = [
            IprConfig {
                chunk_size: 0,
                ..IprConfig::default()
            },
            IprConfig {
                low_percentile: 0.8,
                high_percentile: 0.2,
                ..IprConfig::default()
            },
            IprConfig {
                high_percentile: 1.5,
                ..IprConfig::default()
            },
            IprConfig {
                low_percentile: f64::NAN,
                ..IprConfig::default()
            },
            IprConfig {
                tolerance_factor: -0.1,
                ..IprConfig::default()
            },
        ];
        for config in cases {
            let err = config.validate().expect_err("invalid config must fail");
            assert!(err.is_configuration(), "unexpected error: {err}");
        }
    }

    #[test]
    fn equal_percentiles_are_allowed() {
        let config = IprConfig {
            low_percentile: 0.5,
            high_percentile: 0.5,
            ..IprConfig::default()
        };
        config.validate().expect("low == high is valid");
    }

    #[test]
    fn only_training_settings_trigger_retraining() {
        let base = IprConfig::default();
        let factor_only = IprConfig {
            tolerance_factor: 5.0,
            report_mode: ReportMode::AllViolations,
            ..base.clone()
        };
        assert!(!base.training_differs(&factor_only));

        let new_filter = IprConfig {
            population_filter: SampleTypeFilter::new("wheat"),
            ..base.clone()
        };
        assert!(base.training_differs(&new_filter));

        let new_chunk = IprConfig {
            chunk_size: 250,
            ..base.clone()
        };
        assert!(base.training_differs(&new_chunk));
    }

    #[cfg(feature = "serde")]
    #[test]
    fn partial_json_fills_defaults() {
        let config: IprConfig =
            serde_json::from_str(r#"{"chunk_size": 50, "report_mode": "all_violations"}"#)
                .expect("partial config should deserialize");
        assert_eq!(config.chunk_size, 50);
        assert_eq!(config.low_percentile, 0.25);
        assert_eq!(config.report_mode, ReportMode::AllViolations);
    }
}
