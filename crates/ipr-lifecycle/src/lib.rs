// SPDX-License-Identifier: MIT OR Apache-2.0

#![forbid(unsafe_code)]

//! Model lifecycle for trainable checkers: resolution from file, upstream,
//! run storage or fresh training, with invalidation and optional offload.

pub mod lifecycle;
pub mod persistence;
pub mod storage;
pub mod upstream;
pub mod worker;

pub use lifecycle::{
    LifecycleConfig, LifecycleState, ModelLifecycle, ModelOrigin, ResolutionStrategy,
};
pub use persistence::{
    ModelEnvelope, PayloadCodec, PersistableModel, decode_model_envelope, encode_model_envelope,
    load_model_from_envelope, load_model_from_file, save_model_to_envelope, save_model_to_file,
    validate_model_schema_version,
};
pub use storage::RunStorage;
pub use upstream::{FixedModelProducer, ModelProducer};
#[cfg(feature = "rayon")]
pub use worker::RayonWorkerPool;
pub use worker::{JobHandle, Task, ThreadWorkerPool, TrainingJob, WorkerPool, submit};

pub fn crate_name() -> &'static str {
    "ipr-lifecycle"
}
