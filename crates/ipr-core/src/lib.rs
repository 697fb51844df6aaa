// SPDX-License-Identifier: MIT OR Apache-2.0

#![forbid(unsafe_code)]

//! Shared types for training and checking inter-percentile ranges over
//! spectral records.

pub mod control;
pub mod diagnostics;
pub mod error;
pub mod execution_context;
pub mod key;
pub mod observability;
pub mod record;
pub mod source;

pub use control::CancelToken;
pub use diagnostics::{DIAGNOSTICS_SCHEMA_VERSION, TrainingDiagnostics};
pub use error::IprError;
pub use execution_context::ExecutionContext;
pub use key::{FieldKind, FieldValue, Key, WaveNumber};
pub use observability::{ProgressSink, TelemetrySink};
pub use record::{Record, RecordId, SampleTypeFilter};
pub use source::{InMemoryRecordSource, RecordSource};

pub fn crate_name() -> &'static str {
    "ipr-core"
}
