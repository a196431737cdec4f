//! Reconstructing aggregates from their event streams.
//!
//! Replay is a strict fold: every envelope is checked against the aggregate
//! being rebuilt before it is applied, and the first bad envelope aborts the
//! whole reconstruction. Nothing here reads the clock or generates ids.

use common::AggregateId;
use event_store::{EventEnvelope, EventStream, NewEvent, Snapshot};
use futures_util::TryStreamExt;

use crate::aggregate::{Aggregate, DomainEvent, SnapshotCapable};
use crate::error::DomainError;

/// Decodes an envelope's payload into the aggregate's event enum.
///
/// Fails with `Validation` for tags outside the enum, for a payload tag that
/// disagrees with the envelope, and for schema versions newer than the code.
pub fn decode_event<E: DomainEvent>(envelope: &EventEnvelope) -> Result<E, DomainError> {
    if !E::known_event_types().contains(&envelope.event_type.as_str()) {
        return Err(DomainError::Validation(format!(
            "unknown event type {} at version {}",
            envelope.event_type, envelope.version
        )));
    }
    if envelope.schema_version > E::SCHEMA_VERSION {
        return Err(DomainError::Validation(format!(
            "{} at version {} has schema version {}, newest supported is {}",
            envelope.event_type,
            envelope.version,
            envelope.schema_version,
            E::SCHEMA_VERSION
        )));
    }

    let tag = envelope.payload.get("type").and_then(|t| t.as_str());
    if tag != Some(envelope.event_type.as_str()) {
        return Err(DomainError::Validation(format!(
            "payload tag {tag:?} does not match event type {}",
            envelope.event_type
        )));
    }

    envelope.decode().map_err(|e| {
        DomainError::Validation(format!(
            "malformed {} payload at version {}: {e}",
            envelope.event_type, envelope.version
        ))
    })
}

/// Applies one committed envelope to `aggregate`.
pub fn apply_envelope<A: Aggregate>(
    aggregate: &mut A,
    aggregate_id: AggregateId,
    envelope: &EventEnvelope,
) -> Result<(), DomainError> {
    if envelope.aggregate_id != aggregate_id {
        return Err(DomainError::Validation(format!(
            "event {} belongs to aggregate {}, not {aggregate_id}",
            envelope.event_id, envelope.aggregate_id
        )));
    }
    if envelope.aggregate_type != A::aggregate_type() {
        return Err(DomainError::Validation(format!(
            "event {} belongs to a {}, not a {}",
            envelope.event_id,
            envelope.aggregate_type,
            A::aggregate_type()
        )));
    }
    let expected = aggregate.version().next();
    if envelope.version != expected {
        return Err(DomainError::Validation(format!(
            "aggregate {aggregate_id} expected version {expected}, got {}",
            envelope.version
        )));
    }

    let event: A::Event = decode_event(envelope)?;
    aggregate.apply(&event);
    aggregate.set_version(envelope.version);
    Ok(())
}

/// Folds a complete stream, starting from the empty aggregate.
pub fn reconstruct<A: Aggregate>(
    aggregate_id: AggregateId,
    events: impl IntoIterator<Item = EventEnvelope>,
) -> Result<A, DomainError> {
    let mut aggregate = A::default();
    for envelope in events {
        apply_envelope(&mut aggregate, aggregate_id, &envelope)?;
    }
    Ok(aggregate)
}

/// Restores the snapshot state and folds the events recorded after it.
pub fn reconstruct_from_snapshot<A: SnapshotCapable>(
    snapshot: Snapshot,
    remaining: impl IntoIterator<Item = EventEnvelope>,
) -> Result<A, DomainError> {
    let aggregate_id = snapshot.aggregate_id;
    let mut aggregate = restore_snapshot::<A>(snapshot)?;
    for envelope in remaining {
        apply_envelope(&mut aggregate, aggregate_id, &envelope)?;
    }
    Ok(aggregate)
}

/// Folds a store stream onto `aggregate`, pulling one event at a time.
pub async fn replay<A: Aggregate>(
    mut aggregate: A,
    aggregate_id: AggregateId,
    mut events: EventStream,
) -> Result<A, DomainError> {
    while let Some(envelope) = events.try_next().await? {
        apply_envelope(&mut aggregate, aggregate_id, &envelope)?;
    }
    Ok(aggregate)
}

pub(crate) fn restore_snapshot<A: SnapshotCapable>(snapshot: Snapshot) -> Result<A, DomainError> {
    if snapshot.aggregate_type != A::aggregate_type() {
        return Err(DomainError::Validation(format!(
            "snapshot of a {} cannot restore a {}",
            snapshot.aggregate_type,
            A::aggregate_type()
        )));
    }
    let version = snapshot.version;
    let mut aggregate: A = snapshot.into_state()?;
    aggregate.set_version(version);
    Ok(aggregate)
}

/// Turns decided events into uncommitted store events.
///
/// Each event keeps the timestamp it was decided at.
pub fn encode_events<A: Aggregate>(events: &[A::Event]) -> Result<Vec<NewEvent>, DomainError> {
    events
        .iter()
        .map(|event| -> Result<NewEvent, DomainError> {
            Ok(NewEvent::new(
                event.event_type(),
                A::aggregate_type(),
                serde_json::to_value(event)?,
            )
            .with_timestamp(event.occurred_at())
            .with_schema_version(<A::Event as DomainEvent>::SCHEMA_VERSION))
        })
        .collect()
}
