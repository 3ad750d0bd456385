//! Hot reload of the active pipeline
//!
//! The transform stage runs every frame under a read lock on
//! [`ActivePipeline`]. A reload builds a complete new executor off to the
//! side, swaps it in under the write lock, and only releases the previous
//! executor after a grace period.

use log::{debug, error, info, warn};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::sync::{OwnedRwLockReadGuard, RwLock, mpsc};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::config::{AppConfig, ReloadConfig};
use crate::error::ConfigError;
use crate::pipeline::executor::PipelineExecutor;
use crate::pipeline::state::ReloadState;
use crate::processor::{PipelineDefinition, StepRegistry, build_pipeline};

/// Shared reference to the executor the transform stage uses
#[derive(Clone)]
pub struct ActivePipeline {
    inner: Arc<RwLock<Arc<PipelineExecutor>>>,
}

impl ActivePipeline {
    pub fn new(executor: PipelineExecutor) -> Self {
        Self {
            inner: Arc::new(RwLock::new(Arc::new(executor))),
        }
    }

    /// Hold the current executor for the duration of one run.
    ///
    /// The guard is owned so it can travel to a blocking thread with the
    /// frame. A swap waits until every outstanding guard is dropped.
    pub async fn read(&self) -> OwnedRwLockReadGuard<Arc<PipelineExecutor>> {
        Arc::clone(&self.inner).read_owned().await
    }

    pub async fn current(&self) -> Arc<PipelineExecutor> {
        self.inner.read().await.clone()
    }

    pub async fn generation(&self) -> u64 {
        self.inner.read().await.generation()
    }

    /// Install `next` and hand back the executor it replaced
    pub async fn swap(&self, next: PipelineExecutor) -> Arc<PipelineExecutor> {
        let next = Arc::new(next);
        let mut guard = self.inner.write().await;
        std::mem::replace(&mut *guard, next)
    }

    /// Release the current executor at shutdown
    pub async fn shutdown(&self) {
        self.inner.read().await.release();
    }
}

/// Release `old` once `grace` has passed
pub fn schedule_release(old: Arc<PipelineExecutor>, grace: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        tokio::time::sleep(grace).await;
        if Arc::strong_count(&old) > 1 {
            warn!(
                "Pipeline generation {} still referenced after grace period",
                old.generation()
            );
        }
        old.release();
    })
}

#[derive(Debug, Clone, Copy)]
pub struct ReloadSettings {
    /// Signals closer together than this are ignored
    pub debounce: Duration,
    /// Delay before the replaced executor is released
    pub grace: Duration,
    /// Config file polling period
    pub poll: Duration,
}

impl From<&ReloadConfig> for ReloadSettings {
    fn from(config: &ReloadConfig) -> Self {
        Self {
            debounce: Duration::from_millis(config.debounce_ms),
            grace: Duration::from_millis(config.grace_ms),
            poll: Duration::from_millis(config.poll_ms.max(1)),
        }
    }
}

impl Default for ReloadSettings {
    fn default() -> Self {
        Self::from(&ReloadConfig::default())
    }
}

#[derive(Debug)]
pub enum ReloadOutcome {
    /// The signal arrived inside the debounce window
    Debounced,
    /// A new executor is active
    Swapped { generation: u64 },
    /// The configuration was refused and nothing changed
    Rejected(ConfigError),
}

/// Rebuilds the pipeline whenever the configuration file changes
pub struct ReloadController {
    config_path: PathBuf,
    registry: &'static StepRegistry,
    active: ActivePipeline,
    settings: ReloadSettings,
    state: ReloadState,
    last_accepted: Option<Instant>,
    releases: Vec<JoinHandle<()>>,
}

impl ReloadController {
    pub fn new(
        config_path: impl Into<PathBuf>,
        registry: &'static StepRegistry,
        active: ActivePipeline,
        settings: ReloadSettings,
    ) -> Self {
        Self {
            config_path: config_path.into(),
            registry,
            active,
            settings,
            state: ReloadState::Idle,
            last_accepted: None,
            releases: Vec::new(),
        }
    }

    pub fn state(&self) -> ReloadState {
        self.state
    }

    fn transition(&mut self, next: ReloadState) {
        if !self.state.can_transition_to(&next) {
            warn!("Reload: unexpected transition {} -> {}", self.state, next);
        }
        debug!("Reload: {} -> {}", self.state, next);
        self.state = next;
    }

    async fn build(&self) -> Result<PipelineDefinition, ConfigError> {
        let config = AppConfig::load_async(&self.config_path).await?;
        build_pipeline(&config.pipeline, self.registry)
    }

    /// React to one change signal.
    ///
    /// The old executor stays active unless the whole new pipeline builds and
    /// validates.
    pub async fn handle_change(&mut self) -> ReloadOutcome {
        let now = Instant::now();
        if let Some(last) = self.last_accepted {
            if now.duration_since(last) < self.settings.debounce {
                debug!("Reload: change signal debounced");
                return ReloadOutcome::Debounced;
            }
        }
        self.last_accepted = Some(now);

        self.transition(ReloadState::ChangeDetected);
        info!("Reload: change detected in {}", self.config_path.display());
        self.transition(ReloadState::Validating);

        let outcome = match self.build().await {
            Ok(definition) => {
                let generation = self.active.generation().await + 1;
                let steps = definition.step_names();
                let old = self
                    .active
                    .swap(PipelineExecutor::with_generation(definition, generation))
                    .await;
                self.transition(ReloadState::Swapped);
                info!(
                    "Reload: pipeline generation {} active with steps {:?}",
                    generation, steps
                );

                self.releases.retain(|handle| !handle.is_finished());
                self.releases
                    .push(schedule_release(old, self.settings.grace));
                ReloadOutcome::Swapped { generation }
            }
            Err(err) => {
                self.transition(ReloadState::Rejected);
                error!("Reload rejected, keeping the running pipeline: {err}");
                ReloadOutcome::Rejected(err)
            }
        };

        self.transition(ReloadState::Idle);
        outcome
    }

    /// Wait for every scheduled release to complete
    pub async fn drain_releases(&mut self) {
        for handle in self.releases.drain(..) {
            if let Err(e) = handle.await {
                error!("Reload: deferred release failed: {e}");
            }
        }
    }

    /// Process change signals until the channel closes or `cancel` fires
    pub async fn run(mut self, mut changes: mpsc::Receiver<()>, cancel: CancellationToken) {
        info!("ReloadController: watching {}", self.config_path.display());
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                change = changes.recv() => match change {
                    Some(()) => {
                        self.handle_change().await;
                    }
                    None => break,
                },
            }
        }
        self.drain_releases().await;
        info!("ReloadController: stopped");
    }
}

type Fingerprint = Option<(Option<SystemTime>, u64)>;

async fn fingerprint(path: &Path) -> Fingerprint {
    let metadata = tokio::fs::metadata(path).await.ok()?;
    Some((metadata.modified().ok(), metadata.len()))
}

/// Polls the configuration file and signals when it changes
pub struct ConfigWatcher {
    path: PathBuf,
    poll: Duration,
}

impl ConfigWatcher {
    pub fn new(path: impl Into<PathBuf>, poll: Duration) -> Self {
        Self {
            path: path.into(),
            poll,
        }
    }

    /// Start polling. Signals are coalesced: at most one is ever pending.
    pub fn spawn(self, cancel: CancellationToken) -> (mpsc::Receiver<()>, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(1);
        let handle = tokio::spawn(async move {
            let mut last = fingerprint(&self.path).await;
            let mut ticker = tokio::time::interval(self.poll);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        let current = fingerprint(&self.path).await;
                        if current == last {
                            continue;
                        }
                        last = current;
                        if current.is_none() {
                            debug!("ConfigWatcher: {} disappeared", self.path.display());
                            continue;
                        }
                        match tx.try_send(()) {
                            Ok(()) | Err(mpsc::error::TrySendError::Full(())) => {}
                            Err(mpsc::error::TrySendError::Closed(())) => break,
                        }
                    }
                }
            }
            debug!("ConfigWatcher: stopped");
        });
        (rx, handle)
    }
}
