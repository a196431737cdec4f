//! Command handling: load, decide, append.

use std::marker::PhantomData;
use std::time::Duration;

use chrono::{DateTime, Utc};
use common::AggregateId;
use event_store::{EventEnvelope, EventStore, EventStoreError, Snapshot, Version};

use crate::aggregate::{Aggregate, SnapshotCapable};
use crate::error::DomainError;
use crate::replay::{encode_events, replay, restore_snapshot};

/// Outcome of a successfully handled command.
#[derive(Debug)]
pub struct CommandResult<A: Aggregate> {
    /// The aggregate with the new events applied.
    pub aggregate: A,

    /// Events the command decided on.
    pub events: Vec<A::Event>,

    /// The same events as committed by the store, with their versions.
    pub committed: Vec<EventEnvelope>,

    pub new_version: Version,
}

/// A request to change one aggregate.
pub trait Command: Send + Sync {
    type Aggregate: Aggregate;

    fn aggregate_id(&self) -> AggregateId;
}

/// How often to reload and retry after a concurrency conflict.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first. Always at least 1.
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            ..Self::default()
        }
    }

    /// A single attempt; conflicts go straight back to the caller.
    pub fn no_retry() -> Self {
        Self::new(1)
    }

    /// Delay before attempt `attempt + 1`, doubling from `initial_backoff`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.initial_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(10),
            max_backoff: Duration::from_millis(200),
        }
    }
}

/// Runs commands against aggregates stored in `S`.
///
/// Each call loads the aggregate (from its latest snapshot when one exists),
/// lets the caller decide on events, and appends them with the version the
/// aggregate was loaded at. A concurrent writer therefore surfaces as a
/// `ConcurrencyConflict` instead of a lost update.
pub struct CommandHandler<S, A>
where
    S: EventStore,
    A: SnapshotCapable,
{
    store: S,
    retry: RetryPolicy,
    snapshots: bool,
    _phantom: PhantomData<A>,
}

impl<S, A> CommandHandler<S, A>
where
    S: EventStore,
    A: SnapshotCapable,
{
    pub fn new(store: S) -> Self {
        Self {
            store,
            retry: RetryPolicy::default(),
            snapshots: true,
            _phantom: PhantomData,
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Disables both reading and writing snapshots.
    pub fn without_snapshots(mut self) -> Self {
        self.snapshots = false;
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry
    }

    /// Loads the current state of an aggregate.
    ///
    /// A missing aggregate comes back as `A::default()` at version 0. An
    /// unreadable snapshot is ignored in favour of a full replay.
    pub async fn load(&self, aggregate_id: AggregateId) -> Result<A, DomainError> {
        let start = match self.latest_snapshot(aggregate_id).await? {
            Some(aggregate) => aggregate,
            None => A::default(),
        };
        let tail = self.store.load(aggregate_id, start.version()).await?;
        replay(start, aggregate_id, tail).await
    }

    /// Like [`load`](Self::load) but `None` when the aggregate was never created.
    pub async fn load_existing(&self, aggregate_id: AggregateId) -> Result<Option<A>, DomainError> {
        let aggregate = self.load(aggregate_id).await?;
        Ok(aggregate.id().is_some().then_some(aggregate))
    }

    /// Rebuilds the aggregate as it was at `as_of`.
    ///
    /// Always a full replay; snapshots only describe the present.
    pub async fn load_as_of(
        &self,
        aggregate_id: AggregateId,
        as_of: DateTime<Utc>,
    ) -> Result<A, DomainError> {
        let events = self.store.load_by_timestamp(aggregate_id, as_of).await?;
        replay(A::default(), aggregate_id, events).await
    }

    /// Handles a command once.
    ///
    /// `decide` sees the loaded state and returns the events to record. A
    /// rejection becomes `BusinessRuleViolation` and nothing is written. An
    /// empty event list is a successful no-op.
    #[tracing::instrument(skip(self, decide), fields(aggregate_type = A::aggregate_type()))]
    pub async fn execute<F>(
        &self,
        aggregate_id: AggregateId,
        decide: F,
    ) -> Result<CommandResult<A>, DomainError>
    where
        F: FnOnce(&A) -> Result<Vec<A::Event>, A::Error>,
    {
        let aggregate = self.load(aggregate_id).await?;
        self.decide_and_commit(aggregate_id, aggregate, decide).await
    }

    /// Like [`execute`](Self::execute), but only when the aggregate is still
    /// at `expected_version`. Otherwise the call is a concurrency conflict
    /// and `decide` never runs.
    #[tracing::instrument(skip(self, decide), fields(aggregate_type = A::aggregate_type()))]
    pub async fn execute_at<F>(
        &self,
        aggregate_id: AggregateId,
        expected_version: Version,
        decide: F,
    ) -> Result<CommandResult<A>, DomainError>
    where
        F: FnOnce(&A) -> Result<Vec<A::Event>, A::Error>,
    {
        let aggregate = self.load(aggregate_id).await?;
        if aggregate.version() != expected_version {
            return Err(EventStoreError::ConcurrencyConflict {
                aggregate_id,
                expected: expected_version,
                actual: aggregate.version(),
            }
            .into());
        }
        self.decide_and_commit(aggregate_id, aggregate, decide).await
    }

    async fn decide_and_commit<F>(
        &self,
        aggregate_id: AggregateId,
        mut aggregate: A,
        decide: F,
    ) -> Result<CommandResult<A>, DomainError>
    where
        F: FnOnce(&A) -> Result<Vec<A::Event>, A::Error>,
    {
        let loaded_version = aggregate.version();

        let events = match decide(&aggregate) {
            Ok(events) => events,
            Err(rule) => {
                metrics::counter!("domain_commands_total", "outcome" => "rejected").increment(1);
                return Err(DomainError::rule_violation(rule));
            }
        };

        if events.is_empty() {
            return Ok(CommandResult {
                aggregate,
                events,
                committed: Vec::new(),
                new_version: loaded_version,
            });
        }

        let committed = self
            .store
            .append(aggregate_id, loaded_version, encode_events::<A>(&events)?)
            .await?;

        for event in &events {
            aggregate.apply(event);
        }
        let new_version = committed.last().map_or(loaded_version, |e| e.version);
        aggregate.set_version(new_version);

        metrics::counter!("domain_commands_total", "outcome" => "committed").increment(1);

        if self.snapshots && A::crossed_snapshot_boundary(loaded_version, new_version) {
            self.save_snapshot(aggregate_id, &aggregate).await;
        }

        Ok(CommandResult {
            aggregate,
            events,
            committed,
            new_version,
        })
    }

    /// Handles a command, reloading and deciding again after each conflict.
    ///
    /// Gives up after `RetryPolicy::max_attempts` and returns the last
    /// conflict. Any other error is returned immediately.
    pub async fn execute_with_retry<F>(
        &self,
        aggregate_id: AggregateId,
        decide: F,
    ) -> Result<CommandResult<A>, DomainError>
    where
        F: Fn(&A) -> Result<Vec<A::Event>, A::Error>,
    {
        let mut attempt = 1;
        loop {
            match self.execute(aggregate_id, &decide).await {
                Err(e) if e.is_concurrency_conflict() && attempt < self.retry.max_attempts => {
                    let delay = self.retry.backoff(attempt);
                    tracing::warn!(
                        %aggregate_id,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "concurrency conflict, retrying command"
                    );
                    metrics::counter!("domain_command_retries_total").increment(1);
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                result => return result,
            }
        }
    }

    async fn latest_snapshot(&self, aggregate_id: AggregateId) -> Result<Option<A>, DomainError> {
        if !self.snapshots {
            return Ok(None);
        }
        let Some(snapshot) = self.store.load_latest_snapshot(aggregate_id).await? else {
            return Ok(None);
        };
        match restore_snapshot::<A>(snapshot) {
            Ok(aggregate) => Ok(Some(aggregate)),
            Err(e) => {
                tracing::warn!(%aggregate_id, error = %e, "ignoring unreadable snapshot");
                Ok(None)
            }
        }
    }

    // Snapshots are a cache: the events are already committed, so a failed
    // write is logged rather than failing the command.
    async fn save_snapshot(&self, aggregate_id: AggregateId, aggregate: &A) {
        let snapshot = match Snapshot::from_state(
            aggregate_id,
            A::aggregate_type(),
            aggregate.version(),
            aggregate,
        ) {
            Ok(snapshot) => snapshot,
            Err(e) => {
                tracing::warn!(%aggregate_id, error = %e, "could not serialize snapshot");
                return;
            }
        };
        if let Err(e) = self.store.save_snapshot(snapshot).await {
            tracing::warn!(%aggregate_id, error = %e, "could not save snapshot");
        }
    }
}
