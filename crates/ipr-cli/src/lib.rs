// SPDX-License-Identifier: MIT OR Apache-2.0

#![forbid(unsafe_code)]

use ipr_core::{ExecutionContext, InMemoryRecordSource, IprError, Record};
use ipr_engine::{IprChecker, IprConfig, IprModel, TrainableChecker, ValidationReport, Validator};
use serde::Serialize;

/// Parses a JSON array of records.
pub fn parse_records_json(raw: &str) -> Result<Vec<Record>, IprError> {
    serde_json::from_str(raw)
        .map_err(|err| IprError::invalid_input(format!("invalid records JSON: {err}")))
}

/// Parses a (possibly partial) JSON checker configuration; missing fields take defaults.
pub fn parse_config_json(raw: &str) -> Result<IprConfig, IprError> {
    let config: IprConfig = serde_json::from_str(raw)
        .map_err(|err| IprError::invalid_input(format!("invalid config JSON: {err}")))?;
    config.validate()?;
    Ok(config)
}

/// Trains a model over an in-memory population.
pub fn train_model(records: Vec<Record>, config: IprConfig) -> Result<IprModel, IprError> {
    let checker = IprChecker::new(config)?;
    let source = InMemoryRecordSource::new(records)?;
    checker.train(&source, &ExecutionContext::new())
}

/// Batch outcome printed by `ipr validate`.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ValidationSummary {
    pub samples: usize,
    pub clean: usize,
    pub with_issues: usize,
    pub reports: Vec<ValidationReport>,
}

impl ValidationSummary {
    pub fn all_clean(&self) -> bool {
        self.with_issues == 0
    }
}

pub fn validate_samples(
    model: &IprModel,
    samples: &[Record],
    validator: &Validator,
) -> ValidationSummary {
    let reports = validator.validate_batch(model, samples);
    let clean = reports.iter().filter(|report| report.is_clean()).count();
    ValidationSummary {
        samples: reports.len(),
        clean,
        with_issues: reports.len() - clean,
        reports,
    }
}

pub fn crate_name() -> &'static str {
    let _ = (
        ipr_core::crate_name(),
        ipr_engine::crate_name(),
        ipr_lifecycle::crate_name(),
    );
    "ipr-cli"
}
