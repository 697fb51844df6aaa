// SPDX-License-Identifier: MIT OR Apache-2.0

#![forbid(unsafe_code)]

use ipr_core::{CancelToken, ExecutionContext, IprError, ProgressSink, RecordSource};
use ipr_engine::TrainableChecker;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc;
use std::thread;
use tracing::debug;

/// Unit of work handed to a pool.
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// Executes tasks off the calling thread.
pub trait WorkerPool: Send + Sync {
    fn execute(&self, task: Task) -> Result<(), IprError>;
}

/// Spawns one named OS thread per task.
#[derive(Debug)]
pub struct ThreadWorkerPool {
    name_prefix: String,
    next_id: AtomicU64,
}

impl ThreadWorkerPool {
    pub fn new(name_prefix: impl Into<String>) -> Self {
        Self {
            name_prefix: name_prefix.into(),
            next_id: AtomicU64::new(0),
        }
    }
}

impl Default for ThreadWorkerPool {
    fn default() -> Self {
        Self::new("ipr-train")
    }
}

impl WorkerPool for ThreadWorkerPool {
    fn execute(&self, task: Task) -> Result<(), IprError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let name = format!("{}-{id}", self.name_prefix);
        thread::Builder::new()
            .name(name.clone())
            .spawn(task)
            .map(drop)
            .map_err(|err| {
                IprError::resource_limit(format!("failed spawning worker thread '{name}': {err}"))
            })
    }
}

/// Runs tasks on a rayon pool: a dedicated one, or the global pool.
#[cfg(feature = "rayon")]
#[derive(Debug, Default)]
pub struct RayonWorkerPool {
    pool: Option<Arc<rayon::ThreadPool>>,
}

#[cfg(feature = "rayon")]
impl RayonWorkerPool {
    pub fn global() -> Self {
        Self { pool: None }
    }

    pub fn with_threads(num_threads: usize) -> Result<Self, IprError> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(num_threads)
            .thread_name(|idx| format!("ipr-rayon-{idx}"))
            .build()
            .map_err(|err| {
                IprError::resource_limit(format!("failed building rayon pool: {err}"))
            })?;
        Ok(Self {
            pool: Some(Arc::new(pool)),
        })
    }
}

#[cfg(feature = "rayon")]
impl WorkerPool for RayonWorkerPool {
    fn execute(&self, task: Task) -> Result<(), IprError> {
        match &self.pool {
            Some(pool) => pool.spawn(task),
            None => rayon::spawn(task),
        }
        Ok(())
    }
}

/// One training pass of `checker` over `source`, stoppable at chunk boundaries.
pub struct TrainingJob<C: TrainableChecker> {
    checker: Arc<C>,
    source: Arc<dyn RecordSource>,
    cancel: CancelToken,
    progress: Option<Arc<dyn ProgressSink>>,
}

impl<C: TrainableChecker> TrainingJob<C> {
    pub fn new(checker: Arc<C>, source: Arc<dyn RecordSource>, cancel: CancelToken) -> Self {
        Self {
            checker,
            source,
            cancel,
            progress: None,
        }
    }

    pub fn with_progress_sink(mut self, progress: Option<Arc<dyn ProgressSink>>) -> Self {
        self.progress = progress;
        self
    }

    pub fn run(&self) -> Result<C::Model, IprError> {
        let mut ctx = ExecutionContext::new().with_cancel(&self.cancel);
        if let Some(progress) = &self.progress {
            ctx = ctx.with_progress_sink(progress.as_ref());
        }
        self.checker.train(self.source.as_ref(), &ctx)
    }

    pub fn request_stop(&self) {
        self.cancel.cancel();
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }
}

impl<C: TrainableChecker> std::fmt::Debug for TrainingJob<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrainingJob")
            .field("cancelled", &self.cancel.is_cancelled())
            .field("has_progress", &self.progress.is_some())
            .finish()
    }
}

/// Result handle of a submitted training job.
#[derive(Debug)]
pub struct JobHandle<M> {
    receiver: mpsc::Receiver<Result<M, IprError>>,
    cancel: CancelToken,
}

impl<M> JobHandle<M> {
    /// Blocks until the job reports. A job that dies without reporting
    /// (for example a panic on the worker) surfaces as a resource error.
    pub fn wait(self) -> Result<M, IprError> {
        self.receiver.recv().map_err(|_| {
            IprError::resource_limit("training job ended without reporting a result")
        })?
    }

    pub fn request_stop(&self) {
        self.cancel.cancel();
    }
}

/// Hands `job` to `pool` and returns a handle for its result.
pub fn submit<C>(
    pool: &dyn WorkerPool,
    job: TrainingJob<C>,
) -> Result<JobHandle<C::Model>, IprError>
where
    C: TrainableChecker + 'static,
{
    let (sender, receiver) = mpsc::channel();
    let cancel = job.cancel_token();
    pool.execute(Box::new(move || {
        let result = job.run();
        if sender.send(result).is_err() {
            debug!("training job finished after its handle was dropped");
        }
    }))?;
    Ok(JobHandle { receiver, cancel })
}

#[cfg(test)]
mod tests {
    use super::{ThreadWorkerPool, TrainingJob, WorkerPool, submit};
    use ipr_core::{CancelToken, InMemoryRecordSource, Record, RecordSource};
    use ipr_engine::{IprChecker, IprConfig};
    use std::sync::Arc;
    use std::sync::mpsc;

    fn source() -> Arc<dyn RecordSource> {
        let records = (0..40u64)
            .map(|id| Record::from_points(id, &[400.0], &[id as f64]))
            .collect();
        Arc::new(InMemoryRecordSource::new(records).expect("ids are unique"))
    }

    fn checker() -> Arc<IprChecker> {
        Arc::new(
            IprChecker::new(IprConfig {
                chunk_size: 10,
                ..IprConfig::default()
            })
            .expect("valid config"),
        )
    }

    #[test]
    fn thread_pool_runs_tasks_off_the_calling_thread() {
        let pool = ThreadWorkerPool::new("ipr-test");
        let (sender, receiver) = mpsc::channel();
        pool.execute(Box::new(move || {
            let name = std::thread::current().name().map(str::to_string);
            sender.send(name).expect("receiver alive");
        }))
        .expect("spawn succeeds");
        let name = receiver.recv().expect("task ran").expect("thread is named");
        assert!(name.starts_with("ipr-test-"));
    }

    #[test]
    fn offloaded_job_matches_local_run() {
        let job = TrainingJob::new(checker(), source(), CancelToken::new());
        let local = job.run().expect("local training succeeds");

        let pool = ThreadWorkerPool::default();
        let offloaded = submit(
            &pool,
            TrainingJob::new(checker(), source(), CancelToken::new()),
        )
        .expect("submit succeeds")
        .wait()
        .expect("offloaded training succeeds");

        assert_eq!(offloaded.amplitude_ranges(), local.amplitude_ranges());
        assert_eq!(offloaded.diagnostics().chunks_used, 4);
    }

    #[test]
    fn stop_requested_before_run_cancels_the_job() {
        let job = TrainingJob::new(checker(), source(), CancelToken::new());
        job.request_stop();
        let err = job.run().expect_err("stopped job must not train");
        assert!(err.is_cancelled());

        let pool = ThreadWorkerPool::default();
        let cancel = CancelToken::new();
        cancel.cancel();
        let handle = submit(&pool, TrainingJob::new(checker(), source(), cancel))
            .expect("submit succeeds");
        let err = handle.wait().expect_err("cancelled job reports cancellation");
        assert_eq!(err.to_string(), "cancelled");
    }

    #[test]
    fn dropped_task_surfaces_as_resource_error() {
        struct DroppingPool;
        impl WorkerPool for DroppingPool {
            fn execute(&self, task: super::Task) -> Result<(), ipr_core::IprError> {
                drop(task);
                Ok(())
            }
        }
        let handle = submit(
            &DroppingPool,
            TrainingJob::new(checker(), source(), CancelToken::new()),
        )
        .expect("submit succeeds");
        let err = handle.wait().expect_err("dropped job never reports");
        assert!(err.to_string().contains("without reporting"));
    }

    #[cfg(feature = "rayon")]
    #[test]
    fn rayon_pool_runs_training_jobs() {
        let pool = super::RayonWorkerPool::with_threads(2).expect("pool builds");
        let model = submit(
            &pool,
            TrainingJob::new(checker(), source(), CancelToken::new()),
        )
        .expect("submit succeeds")
        .wait()
        .expect("training succeeds");
        assert_eq!(model.amplitude_key_count(), 1);
    }
}
