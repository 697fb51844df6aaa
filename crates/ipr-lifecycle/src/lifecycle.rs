// SPDX-License-Identifier: MIT OR Apache-2.0

#![forbid(unsafe_code)]

use crate::persistence::{PersistableModel, load_model_from_file};
use crate::storage::RunStorage;
use crate::upstream::ModelProducer;
use crate::worker::{TrainingJob, WorkerPool, submit};
use ipr_core::{CancelToken, IprError, ProgressSink, Record, RecordSource};
use ipr_engine::TrainableChecker;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock, RwLockWriteGuard};
use tracing::{debug, info, warn};

/// Where a lifecycle currently stands with respect to its model.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    Unresolved,
    Resolving,
    Ready,
    Stale,
    /// Resolution failed; stays failed until the configuration is replaced.
    Failed,
    /// Stopped by the host; terminal.
    Cancelled,
}

/// Which source a model may be resolved from.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionStrategy {
    /// File, then upstream, then storage, then fresh training.
    #[default]
    Auto,
    File,
    Upstream,
    Storage,
}

/// Source a published model came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelOrigin {
    File,
    Upstream,
    Storage,
    Trained,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LifecycleConfig {
    pub strategy: ResolutionStrategy,
    pub model_file: Option<PathBuf>,
    pub storage_slot: Option<String>,
    pub monitored_variable: Option<String>,
    /// Put freshly trained models into `storage_slot` for other lifecycles of the run.
    pub publish_to_storage: bool,
}

impl LifecycleConfig {
    pub fn validate(&self) -> Result<(), IprError> {
        if self.strategy == ResolutionStrategy::File && self.model_file.is_none() {
            return Err(IprError::configuration(
                "resolution strategy 'file' requires model_file",
            ));
        }
        if self.strategy == ResolutionStrategy::Storage && self.storage_slot.is_none() {
            return Err(IprError::configuration(
                "resolution strategy 'storage' requires storage_slot",
            ));
        }
        if self.publish_to_storage && self.storage_slot.is_none() {
            return Err(IprError::configuration(
                "publish_to_storage requires storage_slot",
            ));
        }
        if let Some(slot) = &self.storage_slot {
            if slot.trim().is_empty() {
                return Err(IprError::configuration("storage_slot must be non-empty"));
            }
        }
        if let Some(name) = &self.monitored_variable {
            if name.trim().is_empty() {
                return Err(IprError::configuration(
                    "monitored_variable must be non-empty",
                ));
            }
        }
        Ok(())
    }
}

struct Settings<C> {
    checker: Arc<C>,
    config: LifecycleConfig,
}

struct Snapshot<C: TrainableChecker> {
    state: LifecycleState,
    model: Option<Arc<C::Model>>,
    /// Checker the published model is validated with; swapped with it.
    checker: Option<Arc<C>>,
    origin: Option<ModelOrigin>,
    failure: Option<IprError>,
}

/// Resolves, caches and invalidates the model of one trainable checker.
///
/// Models are built into fresh instances and published by swapping an `Arc`
/// under the snapshot lock, so callers holding a model always see a complete
/// one. Only one resolution runs at a time per lifecycle; validation callers
/// arriving meanwhile block until it finishes.
pub struct ModelLifecycle<C: TrainableChecker> {
    settings: RwLock<Settings<C>>,
    generation: AtomicU64,
    snapshot: RwLock<Snapshot<C>>,
    resolve_lock: Mutex<()>,
    last_monitored_value: Mutex<Option<String>>,
    in_flight: Mutex<Option<CancelToken>>,
    stopped: AtomicBool,
    source: Option<Arc<dyn RecordSource>>,
    upstream: Option<Arc<dyn ModelProducer<C::Model>>>,
    storage: Option<Arc<RunStorage<C::Model>>>,
    worker_pool: Option<Arc<dyn WorkerPool>>,
    progress: Option<Arc<dyn ProgressSink>>,
}

fn poisoned(what: &str) -> IprError {
    IprError::resource_limit(format!("{what} lock poisoned"))
}

impl<C> ModelLifecycle<C>
where
    C: TrainableChecker + 'static,
    C::Model: PersistableModel,
{
    pub fn new(checker: C, config: LifecycleConfig) -> Result<Self, IprError> {
        config.validate()?;
        Ok(Self {
            settings: RwLock::new(Settings {
                checker: Arc::new(checker),
                config,
            }),
            generation: AtomicU64::new(0),
            snapshot: RwLock::new(Snapshot {
                state: LifecycleState::Unresolved,
                model: None,
                checker: None,
                origin: None,
                failure: None,
            }),
            resolve_lock: Mutex::new(()),
            last_monitored_value: Mutex::new(None),
            in_flight: Mutex::new(None),
            stopped: AtomicBool::new(false),
            source: None,
            upstream: None,
            storage: None,
            worker_pool: None,
            progress: None,
        })
    }

    pub fn with_record_source(mut self, source: Arc<dyn RecordSource>) -> Self {
        self.source = Some(source);
        self
    }

    pub fn with_upstream(mut self, upstream: Arc<dyn ModelProducer<C::Model>>) -> Self {
        self.upstream = Some(upstream);
        self
    }

    pub fn with_storage(mut self, storage: Arc<RunStorage<C::Model>>) -> Self {
        self.storage = Some(storage);
        self
    }

    /// Offloads fresh training to `pool`; the caller still blocks on the result.
    pub fn with_worker_pool(mut self, pool: Arc<dyn WorkerPool>) -> Self {
        self.worker_pool = Some(pool);
        self
    }

    pub fn with_progress_sink(mut self, progress: Arc<dyn ProgressSink>) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn state(&self) -> LifecycleState {
        match self.snapshot.read() {
            Ok(snapshot) => snapshot.state,
            Err(poisoned) => poisoned.into_inner().state,
        }
    }

    pub fn origin(&self) -> Option<ModelOrigin> {
        match self.snapshot.read() {
            Ok(snapshot) => snapshot.origin,
            Err(poisoned) => poisoned.into_inner().origin,
        }
    }

    pub fn config(&self) -> Result<LifecycleConfig, IprError> {
        Ok(self
            .settings
            .read()
            .map_err(|_| poisoned("settings"))?
            .config
            .clone())
    }

    pub fn checker(&self) -> Result<Arc<C>, IprError> {
        Ok(Arc::clone(
            &self.settings.read().map_err(|_| poisoned("settings"))?.checker,
        ))
    }

    /// The published model when ready, without triggering resolution.
    pub fn current_model(&self) -> Option<Arc<C::Model>> {
        let snapshot = self.snapshot.read().ok()?;
        match snapshot.state {
            LifecycleState::Ready => snapshot.model.clone(),
            _ => None,
        }
    }

    /// Returns the ready model, resolving it first when unresolved or stale.
    pub fn model(&self) -> Result<Arc<C::Model>, IprError> {
        self.ready().map(|(model, _)| model)
    }

    /// Checks `sample` against the current model, resolving it first if needed.
    pub fn validate(&self, sample: &Record) -> Result<C::Report, IprError> {
        let (model, checker) = self.ready()?;
        Ok(checker.check(&model, sample))
    }

    /// The ready model and the checker published with it, read together.
    fn ready(&self) -> Result<(Arc<C::Model>, Arc<C>), IprError> {
        if let Some(outcome) = self.settled_outcome()? {
            return outcome;
        }

        let _resolving = self.resolve_lock.lock().map_err(|_| poisoned("resolve"))?;
        if let Some(outcome) = self.settled_outcome()? {
            return outcome;
        }

        let (checker, config, generation) = {
            let settings = self.settings.read().map_err(|_| poisoned("settings"))?;
            (
                Arc::clone(&settings.checker),
                settings.config.clone(),
                self.generation.load(Ordering::SeqCst),
            )
        };
        if self.stopped.load(Ordering::SeqCst) {
            return self.finish(Err(IprError::cancelled()), &checker, generation);
        }
        self.snapshot_mut()?.state = LifecycleState::Resolving;

        let resolved = self.resolve(&checker, &config);
        self.finish(resolved, &checker, generation)
    }

    /// Replaces the checker. A retraining-relevant change, or any change while
    /// failed, sends the lifecycle back through resolution.
    pub fn set_checker(&self, checker: C) -> Result<(), IprError> {
        let mut settings = self.settings.write().map_err(|_| poisoned("settings"))?;
        let checker = Arc::new(checker);
        let retrain = checker.requires_retrain(&settings.checker);
        settings.checker = Arc::clone(&checker);
        if retrain {
            drop(settings);
            return self.invalidate("training configuration changed");
        }

        // Lock order is settings, then snapshot.
        let mut snapshot = self.snapshot_mut()?;
        if snapshot.model.is_some() {
            snapshot.checker = Some(checker);
        }
        if snapshot.state == LifecycleState::Failed {
            snapshot.state = LifecycleState::Unresolved;
            snapshot.failure = None;
        }
        Ok(())
    }

    pub fn set_config(&self, config: LifecycleConfig) -> Result<(), IprError> {
        config.validate()?;
        let mut settings = self.settings.write().map_err(|_| poisoned("settings"))?;
        if settings.config == config {
            return Ok(());
        }
        let monitored_changed = settings.config.monitored_variable != config.monitored_variable;
        settings.config = config;
        drop(settings);
        if monitored_changed {
            *self
                .last_monitored_value
                .lock()
                .map_err(|_| poisoned("monitored variable"))? = None;
        }
        self.invalidate("resolution configuration changed")
    }

    /// Reports the current value of an external variable. Returns true when it
    /// is the monitored one and its change made the model stale. The first
    /// value seen is recorded as the baseline.
    pub fn notify_variable(&self, name: &str, value: &str) -> Result<bool, IprError> {
        let monitored = self
            .settings
            .read()
            .map_err(|_| poisoned("settings"))?
            .config
            .monitored_variable
            .clone();
        if monitored.as_deref() != Some(name) {
            return Ok(false);
        }

        let mut last = self
            .last_monitored_value
            .lock()
            .map_err(|_| poisoned("monitored variable"))?;
        let changed = last.as_deref().is_some_and(|previous| previous != value);
        *last = Some(value.to_string());
        drop(last);

        if changed {
            debug!(variable = name, "monitored variable changed");
            self.invalidate("monitored variable changed")?;
        }
        Ok(changed)
    }

    /// Stops the lifecycle. An in-flight training job is asked to stop at its
    /// next chunk boundary and the resolution ends as cancelled.
    pub fn stop(&self) -> Result<(), IprError> {
        self.stopped.store(true, Ordering::SeqCst);
        if let Some(cancel) = self.in_flight()?.as_ref() {
            cancel.cancel();
        }
        let mut snapshot = self.snapshot_mut()?;
        if snapshot.state != LifecycleState::Resolving {
            snapshot.state = LifecycleState::Cancelled;
            snapshot.model = None;
            snapshot.checker = None;
            snapshot.origin = None;
        }
        Ok(())
    }

    fn snapshot_mut(&self) -> Result<RwLockWriteGuard<'_, Snapshot<C>>, IprError> {
        self.snapshot.write().map_err(|_| poisoned("snapshot"))
    }

    fn in_flight(&self) -> Result<MutexGuard<'_, Option<CancelToken>>, IprError> {
        self.in_flight.lock().map_err(|_| poisoned("in-flight job"))
    }

    #[allow(clippy::type_complexity)]
    fn settled_outcome(
        &self,
    ) -> Result<Option<Result<(Arc<C::Model>, Arc<C>), IprError>>, IprError> {
        let snapshot = self.snapshot.read().map_err(|_| poisoned("snapshot"))?;
        Ok(match snapshot.state {
            LifecycleState::Ready => Some(match (&snapshot.model, &snapshot.checker) {
                (Some(model), Some(checker)) => Ok((Arc::clone(model), Arc::clone(checker))),
                _ => Err(IprError::resource_limit("ready lifecycle has no model")),
            }),
            LifecycleState::Failed => Some(Err(snapshot
                .failure
                .clone()
                .unwrap_or_else(|| IprError::configuration("model resolution failed")))),
            LifecycleState::Cancelled => Some(Err(IprError::cancelled())),
            LifecycleState::Unresolved | LifecycleState::Resolving | LifecycleState::Stale => None,
        })
    }

    fn invalidate(&self, reason: &str) -> Result<(), IprError> {
        self.generation.fetch_add(1, Ordering::SeqCst);
        let mut snapshot = self.snapshot_mut()?;
        match snapshot.state {
            LifecycleState::Ready => {
                debug!(reason, "model marked stale");
                snapshot.state = LifecycleState::Stale;
            }
            LifecycleState::Failed => {
                snapshot.state = LifecycleState::Unresolved;
                snapshot.failure = None;
            }
            _ => {}
        }
        Ok(())
    }

    fn finish(
        &self,
        resolved: Result<(Arc<C::Model>, ModelOrigin), IprError>,
        resolving: &Arc<C>,
        generation: u64,
    ) -> Result<(Arc<C::Model>, Arc<C>), IprError> {
        // Held across the publish so `set_checker` cannot slip in between.
        let settings = self.settings.read().map_err(|_| poisoned("settings"))?;
        let mut snapshot = self.snapshot_mut()?;
        if self.stopped.load(Ordering::SeqCst) {
            snapshot.state = LifecycleState::Cancelled;
            snapshot.model = None;
            snapshot.checker = None;
            snapshot.origin = None;
            return Err(IprError::cancelled());
        }

        match resolved {
            Ok((model, origin)) => {
                snapshot.state = if self.generation.load(Ordering::SeqCst) == generation {
                    LifecycleState::Ready
                } else {
                    LifecycleState::Stale
                };
                // A validation-only change made during resolution still applies.
                let checker = if settings.checker.requires_retrain(resolving) {
                    Arc::clone(resolving)
                } else {
                    Arc::clone(&settings.checker)
                };
                snapshot.model = Some(Arc::clone(&model));
                snapshot.checker = Some(Arc::clone(&checker));
                snapshot.origin = Some(origin);
                snapshot.failure = None;
                Ok((model, checker))
            }
            Err(err) if err.is_cancelled() => {
                snapshot.state = LifecycleState::Cancelled;
                snapshot.model = None;
                snapshot.checker = None;
                snapshot.origin = None;
                Err(err)
            }
            Err(err) => {
                warn!(error = %err, "model resolution failed");
                snapshot.state = LifecycleState::Failed;
                snapshot.model = None;
                snapshot.checker = None;
                snapshot.origin = None;
                snapshot.failure = Some(err.clone());
                Err(err)
            }
        }
    }

    fn resolve(
        &self,
        checker: &Arc<C>,
        config: &LifecycleConfig,
    ) -> Result<(Arc<C::Model>, ModelOrigin), IprError> {
        let resolved = match config.strategy {
            ResolutionStrategy::Auto => self.resolve_auto(checker, config)?,
            ResolutionStrategy::File => {
                let path = config.model_file.as_ref().ok_or_else(|| {
                    IprError::configuration("resolution strategy 'file' requires model_file")
                })?;
                if !path.exists() {
                    return Err(IprError::configuration(format!(
                        "model file '{}' does not exist",
                        path.display()
                    )));
                }
                (Arc::new(load_model_from_file(path)?), ModelOrigin::File)
            }
            ResolutionStrategy::Upstream => {
                let upstream = self.upstream.as_ref().ok_or_else(|| {
                    IprError::configuration("resolution strategy 'upstream' requires a producer")
                })?;
                let model = upstream.produce()?.ok_or_else(|| {
                    IprError::configuration("upstream producer did not provide a model")
                })?;
                (model, ModelOrigin::Upstream)
            }
            ResolutionStrategy::Storage => {
                let slot = config.storage_slot.as_deref().ok_or_else(|| {
                    IprError::configuration("resolution strategy 'storage' requires storage_slot")
                })?;
                let storage = self.storage.as_ref().ok_or_else(|| {
                    IprError::configuration("resolution strategy 'storage' requires run storage")
                })?;
                let model = storage.get(slot)?.ok_or_else(|| {
                    IprError::configuration(format!("storage slot '{slot}' is empty"))
                })?;
                (model, ModelOrigin::Storage)
            }
        };
        info!(origin = ?resolved.1, "model resolved");
        Ok(resolved)
    }

    fn resolve_auto(
        &self,
        checker: &Arc<C>,
        config: &LifecycleConfig,
    ) -> Result<(Arc<C::Model>, ModelOrigin), IprError> {
        if let Some(path) = config.model_file.as_ref().filter(|path| path.exists()) {
            return Ok((Arc::new(load_model_from_file(path)?), ModelOrigin::File));
        }
        if let Some(upstream) = &self.upstream {
            if let Some(model) = upstream.produce()? {
                return Ok((model, ModelOrigin::Upstream));
            }
        }
        if let (Some(storage), Some(slot)) = (&self.storage, config.storage_slot.as_deref()) {
            if let Some(model) = storage.get(slot)? {
                return Ok((model, ModelOrigin::Storage));
            }
        }
        Ok((self.train(checker, config)?, ModelOrigin::Trained))
    }

    fn train(&self, checker: &Arc<C>, config: &LifecycleConfig) -> Result<Arc<C::Model>, IprError> {
        let source = self.source.clone().ok_or_else(|| {
            IprError::configuration("no resolvable model source and no training population")
        })?;

        let cancel = CancelToken::new();
        *self.in_flight()? = Some(cancel.clone());
        if self.stopped.load(Ordering::SeqCst) {
            cancel.cancel();
        }

        let job = TrainingJob::new(Arc::clone(checker), source, cancel)
            .with_progress_sink(self.progress.clone());
        let trained = match &self.worker_pool {
            Some(pool) => submit(pool.as_ref(), job).and_then(|handle| handle.wait()),
            None => job.run(),
        };
        *self.in_flight()? = None;

        let model = Arc::new(trained?);
        if config.publish_to_storage {
            if let (Some(storage), Some(slot)) = (&self.storage, config.storage_slot.as_deref()) {
                storage.put(slot, Arc::clone(&model))?;
                debug!(slot, "published trained model to run storage");
            }
        }
        Ok(model)
    }
}

impl<C: TrainableChecker> std::fmt::Debug for ModelLifecycle<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = match self.snapshot.read() {
            Ok(snapshot) => snapshot.state,
            Err(poisoned) => poisoned.into_inner().state,
        };
        f.debug_struct("ModelLifecycle")
            .field("state", &state)
            .field("stopped", &self.stopped.load(Ordering::SeqCst))
            .field("has_source", &self.source.is_some())
            .field("has_upstream", &self.upstream.is_some())
            .field("has_storage", &self.storage.is_some())
            .field("has_worker_pool", &self.worker_pool.is_some())
            .finish()
    }
}
