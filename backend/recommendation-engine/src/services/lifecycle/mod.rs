//! Model lifecycle: train, persist, load and atomically activate snapshots.
//!
//! State machine:
//! `Untrained -> Training -> Trained`, `Trained -> Training` on retrain,
//! `Training -> Failed` on error followed by fallback to the last good
//! snapshot (in memory, then active file, then backup), else `Untrained`.
//!
//! Readers clone the active `Arc<ModelSnapshot>` under a read lock held only
//! for the clone; activation replaces it under the write lock. That swap is
//! the only synchronization point between training and serving.

mod builder;
mod snapshot;
mod store;

pub use builder::SnapshotBuilder;
pub use snapshot::{ModelSnapshot, SnapshotSize, SNAPSHOT_FORMAT_VERSION};
pub use store::{LoadOutcome, SnapshotStore};

use crate::config::LifecycleConfig;
use crate::data_source::DataSource;
use crate::error::{EngineError, Result};
use crate::models::{CatalogItem, Interaction};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Mutex;
use tracing::{error, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ModelState {
    Untrained,
    Training,
    Trained,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelStatus {
    pub state: ModelState,
    pub version: Option<u64>,
    pub last_trained_at: Option<DateTime<Utc>>,
    pub snapshot_size: Option<SnapshotSize>,
    pub last_error: Option<String>,
    pub last_failed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum TrainingOutcome {
    Trained { version: u64, duration_ms: u64 },
    /// Another training pass was in progress; nothing was done
    AlreadyRunning,
    Failed { error: String },
}

impl TrainingOutcome {
    pub fn is_trained(&self) -> bool {
        matches!(self, TrainingOutcome::Trained { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BootstrapOutcome {
    Loaded { version: u64, from_backup: bool },
    Trained(TrainingOutcome),
}

#[derive(Debug)]
struct StateCell {
    state: ModelState,
    last_error: Option<String>,
    last_failed_at: Option<DateTime<Utc>>,
}

pub struct ModelLifecycle {
    source: Arc<dyn DataSource>,
    builder: SnapshotBuilder,
    store: SnapshotStore,
    retrain_threshold: chrono::Duration,
    active: RwLock<Option<Arc<ModelSnapshot>>>,
    state: RwLock<StateCell>,
    training: Mutex<()>,
    next_version: AtomicU64,
}

impl ModelLifecycle {
    pub fn new(
        config: &LifecycleConfig,
        source: Arc<dyn DataSource>,
        builder: SnapshotBuilder,
    ) -> Self {
        Self {
            source,
            builder,
            store: SnapshotStore::new(config.model_dir.clone()),
            retrain_threshold: chrono::Duration::days(config.retrain_threshold_days),
            active: RwLock::new(None),
            state: RwLock::new(StateCell {
                state: ModelState::Untrained,
                last_error: None,
                last_failed_at: None,
            }),
            training: Mutex::new(()),
            next_version: AtomicU64::new(1),
        }
    }

    pub fn builder(&self) -> &SnapshotBuilder {
        &self.builder
    }

    pub fn store(&self) -> &SnapshotStore {
        &self.store
    }

    /// Snapshot serving reads right now
    pub fn current(&self) -> Option<Arc<ModelSnapshot>> {
        self.active.read().clone()
    }

    pub fn state(&self) -> ModelState {
        self.state.read().state
    }

    pub fn status(&self) -> ModelStatus {
        let current = self.current();
        let cell = self.state.read();
        ModelStatus {
            state: cell.state,
            version: current.as_ref().map(|s| s.version),
            last_trained_at: current.as_ref().map(|s| s.trained_at),
            snapshot_size: current.as_ref().map(|s| s.size()),
            last_error: cell.last_error.clone(),
            last_failed_at: cell.last_failed_at,
        }
    }

    /// Build a snapshot from the data source without activating it
    pub async fn train(&self) -> Result<ModelSnapshot> {
        let interactions = self.source.get_interactions(None).await?;
        let catalog = self.source.get_item_catalog().await?;
        let version = self.next_version.fetch_add(1, Ordering::SeqCst);
        self.builder.build(interactions, catalog, version).await
    }

    /// Write a snapshot to disk, rotating the previous one to backup
    pub async fn persist(&self, snapshot: Arc<ModelSnapshot>) -> Result<()> {
        let store = self.store.clone();
        tokio::task::spawn_blocking(move || store.persist(&snapshot)).await??;
        Ok(())
    }

    pub async fn load(&self, path: &Path) -> LoadOutcome {
        let store = self.store.clone();
        let path = path.to_path_buf();
        match tokio::task::spawn_blocking(move || store.load(&path)).await {
            Ok(outcome) => outcome,
            Err(e) => LoadOutcome::Corrupt(format!("load task failed: {}", e)),
        }
    }

    /// Atomically make `snapshot` the one serving reads. Requests holding the
    /// previous snapshot finish against it.
    pub fn activate(&self, snapshot: Arc<ModelSnapshot>) {
        self.next_version
            .fetch_max(snapshot.version + 1, Ordering::SeqCst);
        let version = snapshot.version;
        *self.active.write() = Some(snapshot);
        self.state.write().state = ModelState::Trained;
        info!(version, "Snapshot activated");
    }

    /// Full training pass: build, persist, activate. At most one runs at a
    /// time; a concurrent call returns `AlreadyRunning` immediately.
    pub async fn retrain(&self) -> TrainingOutcome {
        let Ok(_guard) = self.training.try_lock() else {
            info!("Training already in progress, skipping");
            return TrainingOutcome::AlreadyRunning;
        };

        let run_id = Uuid::new_v4();
        let started = Instant::now();
        self.state.write().state = ModelState::Training;
        info!(%run_id, "Training started");

        match self.train().await {
            Ok(snapshot) => {
                let snapshot = Arc::new(snapshot);
                if let Err(e) = self.persist(Arc::clone(&snapshot)).await {
                    // The in-memory model is still good; serve it
                    warn!(%run_id, error = %e, "Snapshot could not be persisted");
                }
                let version = snapshot.version;
                self.activate(snapshot);
                self.state.write().last_error = None;

                let duration_ms = started.elapsed().as_millis() as u64;
                info!(%run_id, version, duration_ms, "Training completed");
                TrainingOutcome::Trained {
                    version,
                    duration_ms,
                }
            }
            Err(e) => {
                error!(%run_id, error = %e, "Training failed");
                {
                    let mut cell = self.state.write();
                    cell.state = ModelState::Failed;
                    cell.last_error = Some(e.to_string());
                    cell.last_failed_at = Some(Utc::now());
                }
                self.fall_back().await;
                TrainingOutcome::Failed {
                    error: e.to_string(),
                }
            }
        }
    }

    /// After a failed pass: keep serving the in-memory snapshot, else restore
    /// the newest persisted one, else go back to `Untrained`.
    async fn fall_back(&self) {
        if let Some(current) = self.current() {
            info!(version = current.version, "Keeping previous snapshot after failure");
            self.state.write().state = ModelState::Trained;
            return;
        }

        if let Some((snapshot, from_backup)) = self.load_persisted().await {
            info!(version = snapshot.version, from_backup, "Restored persisted snapshot after failure");
            self.activate(Arc::new(snapshot));
            return;
        }

        warn!("No snapshot to fall back to");
        self.state.write().state = ModelState::Untrained;
    }

    /// Active file first, backup second
    async fn load_persisted(&self) -> Option<(ModelSnapshot, bool)> {
        for (path, from_backup) in [(self.store.active_path(), false), (self.store.backup_path(), true)] {
            match self.load(&path).await {
                LoadOutcome::Loaded(snapshot) => return Some((*snapshot, from_backup)),
                LoadOutcome::Missing => {}
                LoadOutcome::Corrupt(reason) => {
                    warn!(path = %path.display(), reason = %reason, "Ignoring unusable snapshot");
                }
            }
        }
        None
    }

    /// Startup: activate the newest usable persisted snapshot, retraining when
    /// there is none or it is older than the retrain threshold.
    pub async fn bootstrap(&self) -> BootstrapOutcome {
        match self.load_persisted().await {
            Some((snapshot, from_backup)) => {
                let version = snapshot.version;
                let stale = snapshot.age(Utc::now()) > self.retrain_threshold;
                self.activate(Arc::new(snapshot));

                if stale {
                    info!(version, "Persisted snapshot is stale, retraining");
                    BootstrapOutcome::Trained(self.retrain().await)
                } else {
                    BootstrapOutcome::Loaded {
                        version,
                        from_backup,
                    }
                }
            }
            None => {
                info!("No persisted snapshot, training from scratch");
                BootstrapOutcome::Trained(self.retrain().await)
            }
        }
    }

    /// Fetch the full interaction history and catalog, for offline evaluation
    pub async fn training_data(&self) -> Result<(Vec<Interaction>, Vec<CatalogItem>)> {
        let interactions = self.source.get_interactions(None).await?;
        let catalog = self.source.get_item_catalog().await?;
        if catalog.is_empty() {
            return Err(EngineError::InsufficientData {
                interactions: interactions.len(),
                required: 1,
                catalog_size: 0,
            });
        }
        Ok((interactions, catalog))
    }
}
