// SPDX-License-Identifier: MIT OR Apache-2.0

#![forbid(unsafe_code)]

use crate::chunk::ChunkAggregator;
use crate::config::IprConfig;
use crate::model::IprModel;
use crate::synth::RangeSynthesizer;
use crate::validate::{ValidationReport, Validator};
use ipr_core::{ExecutionContext, IprError, Record, RecordSource, TrainingDiagnostics};
use std::time::Instant;
use tracing::info;

/// Capability of a checker that is trained once and applied many times.
///
/// Implementations are selected at configuration time; the lifecycle that
/// hosts them only sees this contract.
pub trait TrainableChecker: Send + Sync {
    type Model: Send + Sync + 'static;
    type Report: Send;

    /// Builds a fresh model from the population this checker is configured for.
    fn train(
        &self,
        source: &dyn RecordSource,
        ctx: &ExecutionContext<'_>,
    ) -> Result<Self::Model, IprError>;

    fn check(&self, model: &Self::Model, sample: &Record) -> Self::Report;

    /// True when a model trained under `previous` no longer fits `self`.
    fn requires_retrain(&self, previous: &Self) -> bool;
}

/// Inter-percentile-range checker.
#[derive(Clone, Debug, PartialEq)]
pub struct IprChecker {
    config: IprConfig,
    validator: Validator,
}

impl IprChecker {
    pub fn new(config: IprConfig) -> Result<Self, IprError> {
        config.validate()?;
        let validator = Validator::from_config(&config)?;
        Ok(Self { config, validator })
    }

    pub fn config(&self) -> &IprConfig {
        &self.config
    }

    pub fn validator(&self) -> &Validator {
        &self.validator
    }
}

impl TrainableChecker for IprChecker {
    type Model = IprModel;
    type Report = ValidationReport;

    fn train(
        &self,
        source: &dyn RecordSource,
        ctx: &ExecutionContext<'_>,
    ) -> Result<IprModel, IprError> {
        let started_at = Instant::now();
        let filter = &self.config.population_filter;
        let ids = source.ids_matching(filter)?;
        if ids.is_empty() {
            return Err(IprError::configuration(format!(
                "no training records match population filter '{filter}'"
            )));
        }

        let aggregator = ChunkAggregator::from_config(&self.config)?;
        let aggregated = aggregator.aggregate(&ids, source, ctx)?;
        ctx.check_cancelled()?;

        let ranges = RangeSynthesizer::synthesize(&aggregated.chunks, &aggregated.key_order);
        if ranges.key_count() == 0 {
            return Err(IprError::configuration(format!(
                "training population of {} records has no finite numeric samples",
                ids.len()
            )));
        }

        let diagnostics = TrainingDiagnostics {
            population_size: aggregated.plan.population_size,
            chunk_size: aggregated.plan.chunk_size,
            chunks_used: aggregated.chunks.len(),
            records_used: aggregated.plan.records_used(),
            records_discarded: aggregated.plan.discarded_records,
            non_finite_samples_skipped: aggregated.non_finite_samples_skipped,
            low_percentile: self.config.low_percentile,
            high_percentile: self.config.high_percentile,
            runtime_ms: Some(started_at.elapsed().as_millis().min(u128::from(u64::MAX)) as u64),
            warnings: aggregated.warnings,
            ..TrainingDiagnostics::default()
        };

        info!(
            population = diagnostics.population_size,
            chunks = diagnostics.chunks_used,
            amplitude_keys = ranges.amplitudes.len(),
            field_keys = ranges.fields.len(),
            "trained inter-percentile-range model"
        );

        IprModel::new(filter.clone(), ranges, diagnostics)
    }

    fn check(&self, model: &IprModel, sample: &Record) -> ValidationReport {
        self.validator.validate(model, sample)
    }

    fn requires_retrain(&self, previous: &Self) -> bool {
        self.config.training_differs(&previous.config)
    }
}
