// SPDX-License-Identifier: MIT OR Apache-2.0

#![forbid(unsafe_code)]

use crate::config::{IprConfig, ReportMode, validate_tolerance_factor};
use crate::model::{InterPercentileRange, IprModel};
use ipr_core::{IprError, Key, Record, RecordId, WaveNumber};

/// Coarse classification of a validation issue.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IssueCategory {
    /// The sample does not have the shape the model was trained on.
    DataShape,
    /// A value fell outside its tolerance bounds.
    Violation,
}

/// One key whose value fell outside `[lower_bound, upper_bound]`.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Clone, Debug, PartialEq)]
pub struct RangeViolation {
    pub key: Key,
    pub value: f64,
    pub lower_bound: f64,
    pub upper_bound: f64,
}

#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(tag = "kind", rename_all = "snake_case"))]
#[derive(Clone, Debug, PartialEq)]
pub enum ValidationIssue {
    AmplitudeCountMismatch { expected: usize, actual: usize },
    SampleTypeMismatch { filter: String, actual: String },
    MissingAmplitude { wave_number: WaveNumber },
    OutOfRange(RangeViolation),
}

impl ValidationIssue {
    pub fn category(&self) -> IssueCategory {
        match self {
            Self::OutOfRange(_) => IssueCategory::Violation,
            Self::AmplitudeCountMismatch { .. }
            | Self::SampleTypeMismatch { .. }
            | Self::MissingAmplitude { .. } => IssueCategory::DataShape,
        }
    }
}

/// Outcome of validating one sample. Empty `issues` means clean.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Clone, Debug, PartialEq)]
pub struct ValidationReport {
    pub sample_id: RecordId,
    pub issues: Vec<ValidationIssue>,
}

impl ValidationReport {
    pub fn clean(sample_id: RecordId) -> Self {
        Self {
            sample_id,
            issues: vec![],
        }
    }

    pub fn is_clean(&self) -> bool {
        self.issues.is_empty()
    }

    pub fn first_issue(&self) -> Option<&ValidationIssue> {
        self.issues.first()
    }

    pub fn violations(&self) -> impl Iterator<Item = &RangeViolation> {
        self.issues.iter().filter_map(|issue| match issue {
            ValidationIssue::OutOfRange(violation) => Some(violation),
            _ => None,
        })
    }

    pub fn has_data_shape_issue(&self) -> bool {
        self.issues
            .iter()
            .any(|issue| issue.category() == IssueCategory::DataShape)
    }
}

/// Checks samples against a trained model. Never mutates the model.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Validator {
    tolerance_factor: f64,
    report_mode: ReportMode,
}

impl Validator {
    pub fn new(tolerance_factor: f64, report_mode: ReportMode) -> Result<Self, IprError> {
        validate_tolerance_factor(tolerance_factor)?;
        Ok(Self {
            tolerance_factor,
            report_mode,
        })
    }

    pub fn from_config(config: &IprConfig) -> Result<Self, IprError> {
        Self::new(config.tolerance_factor, config.report_mode)
    }

    pub fn tolerance_factor(&self) -> f64 {
        self.tolerance_factor
    }

    pub fn report_mode(&self) -> ReportMode {
        self.report_mode
    }

    /// Amplitude count and sample type short-circuit; then amplitude keys in
    /// population order, then numeric fields present on the sample.
    pub fn validate(&self, model: &IprModel, sample: &Record) -> ValidationReport {
        let mut report = ValidationReport::clean(sample.id);

        let expected = model.amplitude_key_count();
        let actual = sample.amplitude_count();
        if expected != actual {
            report
                .issues
                .push(ValidationIssue::AmplitudeCountMismatch { expected, actual });
            return report;
        }

        let filter = model.sample_type_filter();
        if let Some(sample_type) = sample.sample_type.as_deref() {
            if !filter.accepts(Some(sample_type)) {
                report.issues.push(ValidationIssue::SampleTypeMismatch {
                    filter: filter.pattern().to_string(),
                    actual: sample_type.to_string(),
                });
                return report;
            }
        }

        let amplitudes = sample.amplitude_index();
        for (wave_number, range) in model.amplitude_ranges() {
            let issue = match amplitudes.get(wave_number) {
                None => Some(ValidationIssue::MissingAmplitude {
                    wave_number: *wave_number,
                }),
                Some(&value) => self.check_value(Key::WaveNumber(*wave_number), value, range),
            };
            if let Some(issue) = issue {
                report.issues.push(issue);
                if self.report_mode == ReportMode::FirstViolation {
                    return report;
                }
            }
        }

        for (name, range) in model.field_ranges() {
            let Some(value) = sample.field_value(name).and_then(|value| value.as_numeric()) else {
                continue;
            };
            if let Some(issue) = self.check_value(Key::Field(name.clone()), value, range) {
                report.issues.push(issue);
                if self.report_mode == ReportMode::FirstViolation {
                    return report;
                }
            }
        }

        report
    }

    /// Validates every sample independently; one report per sample, in input order.
    pub fn validate_batch(&self, model: &IprModel, samples: &[Record]) -> Vec<ValidationReport> {
        #[cfg(feature = "rayon")]
        {
            use rayon::prelude::*;
            samples
                .par_iter()
                .map(|sample| self.validate(model, sample))
                .collect()
        }

        #[cfg(not(feature = "rayon"))]
        {
            samples
                .iter()
                .map(|sample| self.validate(model, sample))
                .collect()
        }
    }

    fn check_value(
        &self,
        key: Key,
        value: f64,
        range: &InterPercentileRange,
    ) -> Option<ValidationIssue> {
        if range.accepts(value, self.tolerance_factor) {
            return None;
        }
        let (lower_bound, upper_bound) = range.bounds(self.tolerance_factor);
        Some(ValidationIssue::OutOfRange(RangeViolation {
            key,
            value,
            lower_bound,
            upper_bound,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::{IssueCategory, ValidationIssue, Validator};
    use crate::config::ReportMode;
    use crate::model::{InterPercentileRange, IprModel};
    use crate::synth::SynthesizedRanges;
    use ipr_core::{Key, Record, SampleTypeFilter, TrainingDiagnostics, WaveNumber};

    fn model(filter: &str) -> IprModel {
        IprModel::new(
            SampleTypeFilter::new(filter),
            SynthesizedRanges {
                amplitudes: vec![
                    (WaveNumber::new(400.0), InterPercentileRange::new(1.0, 9.0)),
                    (WaveNumber::new(410.0), InterPercentileRange::new(0.0, 1.0)),
                ],
                fields: vec![("moisture".to_string(), InterPercentileRange::new(10.0, 12.0))],
            },
            TrainingDiagnostics::default(),
        )
        .expect("valid model")
    }

    fn fail_fast() -> Validator {
        Validator::new(3.0, ReportMode::FirstViolation).expect("valid factor")
    }

    fn exhaustive() -> Validator {
        Validator::new(3.0, ReportMode::AllViolations).expect("valid factor")
    }

    #[test]
    fn clean_sample_has_no_issues() {
        let sample =
            Record::from_points(1, &[400.0, 410.0], &[5.0, 0.5]).with_field("moisture", 11.0);
        let report = fail_fast().validate(&model("*"), &sample);
        assert!(report.is_clean());
        assert_eq!(report.sample_id, 1);
    }

    #[test]
    fn upper_bound_is_inclusive() {
        let at_bound = Record::from_points(2, &[400.0, 410.0], &[33.0, 0.5]);
        assert!(fail_fast().validate(&model("*"), &at_bound).is_clean());

        let above = Record::from_points(3, &[400.0, 410.0], &[34.0, 0.5]);
        let report = fail_fast().validate(&model("*"), &above);
        let violation = report.violations().next().expect("one violation");
        assert_eq!(violation.key, Key::WaveNumber(WaveNumber::new(400.0)));
        assert_eq!(violation.value, 34.0);
        assert_eq!((violation.lower_bound, violation.upper_bound), (-23.0, 33.0));
    }

    #[test]
    fn count_mismatch_short_circuits_every_other_check() {
        let sample = Record::from_points(4, &[400.0], &[1_000.0]).with_sample_type("barley");
        let report = exhaustive().validate(&model("wheat"), &sample);
        assert_eq!(
            report.issues,
            vec![ValidationIssue::AmplitudeCountMismatch {
                expected: 2,
                actual: 1
            }]
        );
        assert_eq!(report.issues[0].category(), IssueCategory::DataShape);
    }

    #[test]
    fn sample_type_mismatch_short_circuits_range_checks() {
        let sample =
            Record::from_points(5, &[400.0, 410.0], &[1_000.0, 0.5]).with_sample_type("barley");
        let report = exhaustive().validate(&model("wheat*"), &sample);
        assert_eq!(
            report.issues,
            vec![ValidationIssue::SampleTypeMismatch {
                filter: "wheat*".to_string(),
                actual: "barley".to_string()
            }]
        );

        let untyped = Record::from_points(6, &[400.0, 410.0], &[5.0, 0.5]);
        assert!(fail_fast().validate(&model("wheat*"), &untyped).is_clean());
    }

    #[test]
    fn missing_amplitude_is_a_data_shape_issue() {
        let sample = Record::from_points(7, &[400.0, 420.0], &[5.0, 0.5]);
        let report = fail_fast().validate(&model("*"), &sample);
        assert_eq!(
            report.issues,
            vec![ValidationIssue::MissingAmplitude {
                wave_number: WaveNumber::new(410.0)
            }]
        );
        assert!(report.has_data_shape_issue());
        assert_eq!(report.violations().count(), 0);
    }

    #[test]
    fn absent_or_non_numeric_fields_are_skipped() {
        let absent = Record::from_points(8, &[400.0, 410.0], &[5.0, 0.5]);
        assert!(fail_fast().validate(&model("*"), &absent).is_clean());

        let textual = absent.clone().with_field("moisture", "high");
        assert!(fail_fast().validate(&model("*"), &textual).is_clean());
    }

    #[test]
    fn all_violations_mode_keeps_fail_fast_ordering() {
        let sample = Record::from_points(9, &[410.0, 400.0], &[50.0, -100.0])
            .with_field("moisture", 100.0);
        let first = fail_fast().validate(&model("*"), &sample);
        let all = exhaustive().validate(&model("*"), &sample);

        let keys: Vec<Key> = all.violations().map(|v| v.key.clone()).collect();
        assert_eq!(
            keys,
            vec![
                Key::WaveNumber(WaveNumber::new(400.0)),
                Key::WaveNumber(WaveNumber::new(410.0)),
                Key::Field("moisture".to_string()),
            ]
        );
        assert_eq!(first.issues.len(), 1);
        assert_eq!(first.first_issue(), all.first_issue());
    }

    #[test]
    fn nan_sample_value_is_a_violation() {
        let sample = Record::from_points(10, &[400.0, 410.0], &[f64::NAN, 0.5]);
        let report = fail_fast().validate(&model("*"), &sample);
        assert_eq!(report.violations().count(), 1);
    }

    #[test]
    fn batch_returns_one_report_per_sample_in_order() {
        let samples = vec![
            Record::from_points(20, &[400.0, 410.0], &[5.0, 0.5]),
            Record::from_points(21, &[400.0], &[5.0]),
            Record::from_points(22, &[400.0, 410.0], &[500.0, 0.5]),
        ];
        let reports = fail_fast().validate_batch(&model("*"), &samples);
        let ids: Vec<u64> = reports.iter().map(|r| r.sample_id).collect();
        assert_eq!(ids, vec![20, 21, 22]);
        assert!(reports[0].is_clean());
        assert!(reports[1].has_data_shape_issue());
        assert_eq!(reports[2].violations().count(), 1);
    }

    #[test]
    fn negative_factor_is_rejected() {
        let err = Validator::new(-1.0, ReportMode::FirstViolation).expect_err("negative factor");
        assert!(err.is_configuration());
    }
}
