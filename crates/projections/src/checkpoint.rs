//! Read-model checkpoints and where they are kept.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::AggregateId;
use event_store::{EventEnvelope, Version};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::Result;

/// How far a read model has been brought up to date.
///
/// Written only after the read-model state it describes has been committed,
/// so it may lag the state but never lead it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub read_model: String,

    /// Last applied version per aggregate.
    pub positions: HashMap<AggregateId, Version>,

    pub events_applied: u64,
    pub updated_at: DateTime<Utc>,
}

impl Checkpoint {
    pub fn new(read_model: impl Into<String>) -> Self {
        Self {
            read_model: read_model.into(),
            positions: HashMap::new(),
            events_applied: 0,
            updated_at: Utc::now(),
        }
    }

    /// Last version applied for `aggregate_id`, 0 when none.
    pub fn position(&self, aggregate_id: AggregateId) -> Version {
        self.positions
            .get(&aggregate_id)
            .copied()
            .unwrap_or_default()
    }

    /// Whether `event` is already covered by this checkpoint.
    pub fn covers(&self, event: &EventEnvelope) -> bool {
        event.version <= self.position(event.aggregate_id)
    }
}

/// Durable home for checkpoints, one per read model.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    async fn load(&self, read_model: &str) -> Result<Option<Checkpoint>>;

    /// Replaces the checkpoint stored for `checkpoint.read_model`.
    async fn save(&self, checkpoint: &Checkpoint) -> Result<()>;

    async fn clear(&self, read_model: &str) -> Result<()>;
}

/// Keeps checkpoints in process memory.
#[derive(Debug, Clone, Default)]
pub struct InMemoryCheckpointStore {
    checkpoints: Arc<RwLock<HashMap<String, Checkpoint>>>,
}

impl InMemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CheckpointStore for InMemoryCheckpointStore {
    async fn load(&self, read_model: &str) -> Result<Option<Checkpoint>> {
        Ok(self.checkpoints.read().await.get(read_model).cloned())
    }

    async fn save(&self, checkpoint: &Checkpoint) -> Result<()> {
        self.checkpoints
            .write()
            .await
            .insert(checkpoint.read_model.clone(), checkpoint.clone());
        Ok(())
    }

    async fn clear(&self, read_model: &str) -> Result<()> {
        self.checkpoints.write().await.remove(read_model);
        Ok(())
    }
}
