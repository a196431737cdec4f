//! The projection builder: the only writer of read-model state.

use std::collections::BTreeMap;
use std::sync::Arc;

use event_store::{EventEnvelope, EventStore};
use futures_util::FutureExt;
use tokio_util::sync::CancellationToken;

use crate::checkpoint::{Checkpoint, CheckpointStore, InMemoryCheckpointStore};
use crate::projection::Projection;
use crate::read_model::{ApplyStatus, BatchMode, BatchStats, ModelSlot, ReadModel, Slot};
use crate::{ProjectionError, Result};

/// Tuning for batch runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProjectionBuilderConfig {
    /// Applied events between commits during rebuild and catch-up.
    pub checkpoint_interval: usize,
}

impl Default for ProjectionBuilderConfig {
    fn default() -> Self {
        Self {
            checkpoint_interval: 100,
        }
    }
}

/// Per read model outcome of one [`ProjectionBuilder::apply`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ApplyReport {
    pub outcomes: Vec<(&'static str, ApplyStatus)>,
}

impl ApplyReport {
    pub fn status(&self, read_model: &str) -> Option<&ApplyStatus> {
        self.outcomes
            .iter()
            .find(|(name, _)| *name == read_model)
            .map(|(_, status)| status)
    }

    pub fn failures(&self) -> impl Iterator<Item = (&'static str, &str)> {
        self.outcomes.iter().filter_map(|(name, status)| match status {
            ApplyStatus::Failed(reason) => Some((*name, reason.as_str())),
            _ => None,
        })
    }

    pub fn is_clean(&self) -> bool {
        self.failures().next().is_none()
    }
}

/// How a rebuild ended. Both variants leave the progress made so far
/// committed and checkpointed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RebuildOutcome {
    Completed(BatchStats),

    /// Stopped by its cancellation token. `incremental_update` picks up
    /// where it left off.
    Cancelled(BatchStats),
}

impl RebuildOutcome {
    pub fn stats(&self) -> BatchStats {
        match self {
            RebuildOutcome::Completed(stats) | RebuildOutcome::Cancelled(stats) => *stats,
        }
    }

    pub fn is_completed(&self) -> bool {
        matches!(self, RebuildOutcome::Completed(_))
    }
}

/// Folds the event log into registered read models.
///
/// Each read model is updated independently: a projection that fails on an
/// event is reported and left where it was, while its siblings carry on.
/// Per-aggregate order is enforced through each model's watermark, so events
/// may be redelivered freely.
pub struct ProjectionBuilder<S: EventStore> {
    store: S,
    checkpoints: Arc<dyn CheckpointStore>,
    config: ProjectionBuilderConfig,
    models: BTreeMap<&'static str, Arc<dyn ModelSlot>>,
}

impl<S: EventStore> ProjectionBuilder<S> {
    /// Creates a builder with in-memory checkpoints and the default config.
    pub fn new(store: S) -> Self {
        Self {
            store,
            checkpoints: Arc::new(InMemoryCheckpointStore::new()),
            config: ProjectionBuilderConfig::default(),
            models: BTreeMap::new(),
        }
    }

    pub fn with_checkpoint_store(mut self, checkpoints: Arc<dyn CheckpointStore>) -> Self {
        self.checkpoints = checkpoints;
        self
    }

    pub fn with_config(mut self, config: ProjectionBuilderConfig) -> Self {
        self.config = config;
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Registers a read model and returns a typed handle to it.
    ///
    /// Read-model state starts empty, so any checkpoint left by an earlier
    /// process is cleared to match it.
    pub async fn register<P: Projection>(&mut self, projection: P) -> Result<ReadModel<P>> {
        let name = projection.name();
        if self.models.contains_key(name) {
            return Err(ProjectionError::DuplicateReadModel(name));
        }

        if let Some(stale) = self.checkpoints.load(name).await? {
            tracing::info!(
                read_model = name,
                events_applied = stale.events_applied,
                "discarding checkpoint of a previous run"
            );
        }
        self.checkpoints.save(&Checkpoint::new(name)).await?;

        let slot = Arc::new(Slot::new(projection));
        self.models
            .insert(name, Arc::clone(&slot) as Arc<dyn ModelSlot>);
        tracing::debug!(read_model = name, "registered read model");
        Ok(ReadModel::new(slot))
    }

    pub fn read_model_names(&self) -> Vec<&'static str> {
        self.models.keys().copied().collect()
    }

    /// Applies one committed event to every read model.
    #[tracing::instrument(
        skip(self, event),
        fields(aggregate_id = %event.aggregate_id, version = %event.version)
    )]
    pub async fn apply(&self, event: &EventEnvelope) -> ApplyReport {
        let mut report = ApplyReport::default();

        for (name, model) in &self.models {
            let (status, checkpoint) = model.apply(event).await;
            match &status {
                ApplyStatus::Applied => {
                    metrics::counter!("projections_events_applied_total", "read_model" => *name)
                        .increment(1);
                    // The state is committed either way; a lagging checkpoint
                    // only means the event is skipped when delivered again.
                    if let Err(e) = self.checkpoints.save(&checkpoint).await {
                        tracing::warn!(read_model = name, error = %e, "checkpoint not saved");
                        metrics::counter!("projections_failures_total", "read_model" => *name)
                            .increment(1);
                    }
                }
                ApplyStatus::Failed(reason) => {
                    tracing::warn!(read_model = name, %reason, "projection failed on event");
                    metrics::counter!("projections_failures_total", "read_model" => *name)
                        .increment(1);
                }
                ApplyStatus::Deferred => {
                    tracing::debug!(read_model = name, "event deferred until its predecessor")
                }
                ApplyStatus::Skipped => {}
            }
            report.outcomes.push((*name, status));
        }

        report
    }

    /// Applies a committed batch in order.
    pub async fn apply_all<'a>(
        &self,
        events: impl IntoIterator<Item = &'a EventEnvelope>,
    ) -> Vec<ApplyReport> {
        let mut reports = Vec::new();
        for event in events {
            reports.push(self.apply(event).await);
        }
        reports
    }

    /// Discards the named read model and refolds the entire log.
    ///
    /// `cancel` is checked between events. Progress is committed every
    /// `checkpoint_interval` applied events and when the rebuild stops.
    #[tracing::instrument(skip(self, cancel))]
    pub async fn rebuild(&self, name: &str, cancel: &CancellationToken) -> Result<RebuildOutcome> {
        let model = self.model(name)?;
        let events = self.store.stream_all().await?;
        let should_stop = || cancel.is_cancelled();

        let (stats, completed) = model
            .run_batch(
                BatchMode::Reset,
                events,
                None,
                self.config.checkpoint_interval,
                &should_stop,
                &self.checkpoint_writer(),
            )
            .await?;

        let outcome = if completed {
            RebuildOutcome::Completed(stats)
        } else {
            RebuildOutcome::Cancelled(stats)
        };
        let label = if completed { "completed" } else { "cancelled" };
        metrics::counter!(
            "projections_rebuilds_total",
            "read_model" => model.name(),
            "outcome" => label
        )
        .increment(1);
        tracing::info!(
            read_model = model.name(),
            applied = stats.applied,
            failed = stats.failed,
            outcome = label,
            "rebuild finished"
        );

        Ok(outcome)
    }

    /// Brings the named read model up to date from its stored checkpoint.
    #[tracing::instrument(skip(self))]
    pub async fn incremental_update(&self, name: &str) -> Result<BatchStats> {
        let model = self.model(name)?;
        self.catch_up(model).await
    }

    pub async fn incremental_update_all(&self) -> Result<BTreeMap<&'static str, BatchStats>> {
        let mut all = BTreeMap::new();
        for (name, model) in &self.models {
            all.insert(*name, self.catch_up(model).await?);
        }
        Ok(all)
    }

    /// Looks up `key` in the named read model.
    pub async fn query(&self, name: &str, key: &str) -> Result<Option<serde_json::Value>> {
        Ok(self.model(name)?.query(key).await)
    }

    /// The checkpoint last written for the named read model.
    pub async fn checkpoint(&self, name: &str) -> Result<Option<Checkpoint>> {
        let model = self.model(name)?;
        self.checkpoints.load(model.name()).await
    }

    async fn catch_up(&self, model: &Arc<dyn ModelSlot>) -> Result<BatchStats> {
        let from = self
            .checkpoints
            .load(model.name())
            .await?
            .unwrap_or_else(|| Checkpoint::new(model.name()));
        let events = self.store.stream_all().await?;

        let (stats, _) = model
            .run_batch(
                BatchMode::Resume,
                events,
                Some(from),
                self.config.checkpoint_interval,
                &|| false,
                &self.checkpoint_writer(),
            )
            .await?;

        metrics::counter!("projections_events_applied_total", "read_model" => model.name())
            .increment(stats.applied);
        if stats.failed > 0 {
            metrics::counter!("projections_failures_total", "read_model" => model.name())
                .increment(stats.failed);
        }
        tracing::debug!(
            read_model = model.name(),
            applied = stats.applied,
            skipped = stats.skipped,
            deferred = stats.deferred,
            failed = stats.failed,
            "incremental update finished"
        );
        Ok(stats)
    }

    fn model(&self, name: &str) -> Result<&Arc<dyn ModelSlot>> {
        self.models
            .get(name)
            .ok_or_else(|| ProjectionError::UnknownReadModel(name.to_string()))
    }

    fn checkpoint_writer(
        &self,
    ) -> impl Fn(Checkpoint) -> futures_util::future::BoxFuture<'static, Result<()>> + Send + Sync
    {
        let checkpoints = Arc::clone(&self.checkpoints);
        move |checkpoint| {
            let checkpoints = Arc::clone(&checkpoints);
            async move { checkpoints.save(&checkpoint).await }.boxed()
        }
    }
}
