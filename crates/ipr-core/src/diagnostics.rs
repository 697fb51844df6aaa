// SPDX-License-Identifier: MIT OR Apache-2.0

#![forbid(unsafe_code)]

/// Diagnostics schema version for training-run metadata.
pub const DIAGNOSTICS_SCHEMA_VERSION: u32 = 1;

/// Structured diagnostics captured from one training pass.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Clone, Debug, PartialEq)]
pub struct TrainingDiagnostics {
    pub schema_version: u32,
    pub engine_version: Option<String>,
    pub population_size: usize,
    pub chunk_size: usize,
    pub chunks_used: usize,
    pub records_used: usize,
    pub records_discarded: usize,
    pub non_finite_samples_skipped: usize,
    pub low_percentile: f64,
    pub high_percentile: f64,
    pub runtime_ms: Option<u64>,
    pub warnings: Vec<String>,
}

impl Default for TrainingDiagnostics {
    fn default() -> Self {
        Self {
            schema_version: DIAGNOSTICS_SCHEMA_VERSION,
            engine_version: Some(env!("CARGO_PKG_VERSION").to_string()),
            population_size: 0,
            chunk_size: 0,
            chunks_used: 0,
            records_used: 0,
            records_discarded: 0,
            non_finite_samples_skipped: 0,
            low_percentile: 0.0,
            high_percentile: 0.0,
            runtime_ms: None,
            warnings: vec![],
        }
    }
}
