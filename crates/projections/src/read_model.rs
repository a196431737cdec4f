//! Materialized read-model state and the handles that expose it.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use common::AggregateId;
use event_store::{EventEnvelope, Version};
use tokio::sync::{Mutex, RwLock};

use crate::checkpoint::Checkpoint;
use crate::projection::Projection;
use crate::{ProjectionError, Result};

/// One committed state of a read model together with its watermark.
#[derive(Debug, Clone)]
pub struct Materialized<S> {
    state: S,
    watermarks: HashMap<AggregateId, Version>,
    events_applied: u64,
}

impl<S> Materialized<S> {
    pub(crate) fn new(state: S) -> Self {
        Self {
            state,
            watermarks: HashMap::new(),
            events_applied: 0,
        }
    }

    pub fn state(&self) -> &S {
        &self.state
    }

    /// Last version folded in for `aggregate_id`, 0 when none.
    pub fn watermark(&self, aggregate_id: AggregateId) -> Version {
        self.watermarks
            .get(&aggregate_id)
            .copied()
            .unwrap_or_default()
    }

    pub fn events_applied(&self) -> u64 {
        self.events_applied
    }

    pub(crate) fn to_checkpoint(&self, read_model: &str) -> Checkpoint {
        Checkpoint {
            read_model: read_model.to_string(),
            positions: self.watermarks.clone(),
            events_applied: self.events_applied,
            updated_at: Utc::now(),
        }
    }
}

/// What happened to one event in one read model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApplyStatus {
    Applied,

    /// At or below the watermark: already folded in.
    Skipped,

    /// Above watermark + 1: an earlier event of the aggregate is missing.
    Deferred,

    /// The projection refused the event. State and checkpoint did not move.
    Failed(String),
}

/// Typed, read-only handle to a registered read model.
pub struct ReadModel<P: Projection> {
    slot: Arc<Slot<P>>,
}

impl<P: Projection> Clone for ReadModel<P> {
    fn clone(&self) -> Self {
        Self {
            slot: Arc::clone(&self.slot),
        }
    }
}

impl<P: Projection> std::fmt::Debug for ReadModel<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReadModel")
            .field("name", &self.name())
            .finish_non_exhaustive()
    }
}

impl<P: Projection> ReadModel<P> {
    pub(crate) fn new(slot: Arc<Slot<P>>) -> Self {
        Self { slot }
    }

    pub fn name(&self) -> &'static str {
        self.slot.projection.name()
    }

    /// The latest committed state. Later commits do not affect it.
    pub async fn current(&self) -> Arc<Materialized<P::State>> {
        self.slot.committed().await
    }

    pub async fn query(&self, key: &str) -> Option<serde_json::Value> {
        let current = self.current().await;
        self.slot.projection.query(current.state(), key)
    }
}

/// Storage for one read model: a single-writer gate plus the committed state
/// that readers clone an `Arc` of.
pub(crate) struct Slot<P: Projection> {
    pub(crate) projection: P,
    writer: Mutex<()>,
    committed: RwLock<Arc<Materialized<P::State>>>,
}

impl<P: Projection> Slot<P> {
    pub(crate) fn new(projection: P) -> Self {
        let initial = Materialized::new(projection.initial_state());
        Self {
            projection,
            writer: Mutex::new(()),
            committed: RwLock::new(Arc::new(initial)),
        }
    }

    async fn committed(&self) -> Arc<Materialized<P::State>> {
        Arc::clone(&*self.committed.read().await)
    }

    async fn commit(&self, next: Materialized<P::State>) {
        *self.committed.write().await = Arc::new(next);
    }

    /// Folds one event into a working copy. Leaves `working` untouched on
    /// anything but `Applied`.
    fn fold(&self, working: &mut Materialized<P::State>, event: &EventEnvelope) -> ApplyStatus {
        let watermark = working.watermark(event.aggregate_id);
        if event.version <= watermark {
            return ApplyStatus::Skipped;
        }
        if event.version > watermark.next() {
            return ApplyStatus::Deferred;
        }

        if self.projection.interested_in(event)
            && let Err(e) = self.projection.apply(&mut working.state, event)
        {
            return ApplyStatus::Failed(e.to_string());
        }

        working.watermarks.insert(event.aggregate_id, event.version);
        working.events_applied += 1;
        ApplyStatus::Applied
    }
}

/// Counts from one batch run over the log.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchStats {
    pub applied: u64,
    pub skipped: u64,
    pub deferred: u64,
    pub failed: u64,
}

impl BatchStats {
    fn record(&mut self, status: &ApplyStatus) {
        match status {
            ApplyStatus::Applied => self.applied += 1,
            ApplyStatus::Skipped => self.skipped += 1,
            ApplyStatus::Deferred => self.deferred += 1,
            ApplyStatus::Failed(_) => self.failed += 1,
        }
    }
}

/// How a batch run should treat the existing state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BatchMode {
    /// Continue from the committed state.
    Resume,

    /// Throw the committed state away first.
    Reset,
}

/// Type-erased face of a [`Slot`], so the builder can hold read models of
/// different state types side by side.
#[async_trait]
pub(crate) trait ModelSlot: Send + Sync {
    fn name(&self) -> &'static str;

    /// Applies and commits one event.
    async fn apply(&self, event: &EventEnvelope) -> (ApplyStatus, Checkpoint);

    /// Runs a batch over `events` under the writer gate.
    ///
    /// `commit_every` bounds how many applied events may sit uncommitted;
    /// `on_commit` is called with the checkpoint after every commit and its
    /// error aborts the batch. Returns `false` in the second position when
    /// `should_stop` ended the batch early.
    async fn run_batch(
        &self,
        mode: BatchMode,
        events: event_store::EventStream,
        skip: Option<Checkpoint>,
        commit_every: usize,
        should_stop: &(dyn Fn() -> bool + Send + Sync),
        on_commit: &(dyn Fn(Checkpoint) -> futures_util::future::BoxFuture<'static, Result<()>>
              + Send
              + Sync),
    ) -> Result<(BatchStats, bool)>;

    async fn query(&self, key: &str) -> Option<serde_json::Value>;

    async fn checkpoint(&self) -> Checkpoint;
}

#[async_trait]
impl<P: Projection> ModelSlot for Slot<P> {
    fn name(&self) -> &'static str {
        self.projection.name()
    }

    async fn apply(&self, event: &EventEnvelope) -> (ApplyStatus, Checkpoint) {
        let _writer = self.writer.lock().await;
        let current = self.committed().await;

        // Probe the watermark before paying for a clone of the state.
        let watermark = current.watermark(event.aggregate_id);
        if event.version <= watermark {
            return (ApplyStatus::Skipped, current.to_checkpoint(self.name()));
        }
        if event.version > watermark.next() {
            return (ApplyStatus::Deferred, current.to_checkpoint(self.name()));
        }

        let mut working = (*current).clone();
        let status = self.fold(&mut working, event);
        if status == ApplyStatus::Applied {
            let checkpoint = working.to_checkpoint(self.name());
            self.commit(working).await;
            (status, checkpoint)
        } else {
            (status, current.to_checkpoint(self.name()))
        }
    }

    async fn run_batch(
        &self,
        mode: BatchMode,
        mut events: event_store::EventStream,
        skip: Option<Checkpoint>,
        commit_every: usize,
        should_stop: &(dyn Fn() -> bool + Send + Sync),
        on_commit: &(dyn Fn(Checkpoint) -> futures_util::future::BoxFuture<'static, Result<()>>
              + Send
              + Sync),
    ) -> Result<(BatchStats, bool)> {
        use futures_util::TryStreamExt;

        let _writer = self.writer.lock().await;
        let mut working = match mode {
            BatchMode::Resume => (*self.committed().await).clone(),
            BatchMode::Reset => {
                let fresh = Materialized::new(self.projection.initial_state());
                self.commit(fresh.clone()).await;
                on_commit(fresh.to_checkpoint(self.name())).await?;
                fresh
            }
        };

        let commit_every = commit_every.max(1);
        let mut stats = BatchStats::default();
        let mut pending = 0usize;
        let mut completed = true;

        loop {
            if should_stop() {
                completed = false;
                break;
            }
            let event = match events.try_next().await {
                Ok(Some(event)) => event,
                Ok(None) => break,
                Err(e) => {
                    // Keep what was folded so far; it is consistent per event.
                    self.commit(working.clone()).await;
                    on_commit(working.to_checkpoint(self.name())).await?;
                    return Err(ProjectionError::EventStore(e));
                }
            };

            if let Some(from) = &skip
                && from.covers(&event)
            {
                stats.skipped += 1;
                continue;
            }

            let status = self.fold(&mut working, &event);
            if let ApplyStatus::Failed(reason) = &status {
                tracing::warn!(
                    read_model = self.name(),
                    aggregate_id = %event.aggregate_id,
                    version = %event.version,
                    %reason,
                    "projection failed on event"
                );
            }
            stats.record(&status);

            if status == ApplyStatus::Applied {
                pending += 1;
                if pending >= commit_every {
                    self.commit(working.clone()).await;
                    on_commit(working.to_checkpoint(self.name())).await?;
                    pending = 0;
                }
            }
        }

        let checkpoint = working.to_checkpoint(self.name());
        self.commit(working).await;
        on_commit(checkpoint).await?;
        Ok((stats, completed))
    }

    async fn query(&self, key: &str) -> Option<serde_json::Value> {
        let current = self.committed().await;
        self.projection.query(current.state(), key)
    }

    async fn checkpoint(&self) -> Checkpoint {
        self.committed().await.to_checkpoint(self.name())
    }
}
