// SPDX-License-Identifier: MIT OR Apache-2.0

#![forbid(unsafe_code)]

//! Chunked training of inter-percentile ranges and validation of spectra
//! against them.

pub mod checker;
pub mod chunk;
pub mod config;
pub mod model;
pub mod percentile;
pub mod synth;
pub mod validate;

pub use checker::{IprChecker, TrainableChecker};
pub use chunk::{
    AggregatedChunks, ChunkAggregator, ChunkPercentilePair, ChunkPercentiles, ChunkPlan, KeyOrder,
    plan_chunks,
};
pub use config::{
    DEFAULT_CHUNK_SIZE, DEFAULT_HIGH_PERCENTILE, DEFAULT_LOW_PERCENTILE, DEFAULT_TOLERANCE_FACTOR,
    IprConfig, ReportMode,
};
pub use model::{IPR_MODEL_ID, IPR_MODEL_SCHEMA_VERSION, InterPercentileRange, IprModel};
pub use percentile::{PercentileAccumulator, median, percentile_of_sorted};
pub use synth::{RangeSynthesizer, SynthesizedRanges};
pub use validate::{IssueCategory, RangeViolation, ValidationIssue, ValidationReport, Validator};

pub fn crate_name() -> &'static str {
    "ipr-engine"
}
