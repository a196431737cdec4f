//! Core projection trait.

use std::fmt;

use event_store::EventEnvelope;
use serde::Serialize;

use crate::{ProjectionError, Result};

/// A pure fold from committed events into read-model state.
///
/// `apply` must be deterministic and must leave `state` untouched when it
/// returns an error. The builder owns the state; a projection never stores
/// any of its own.
pub trait Projection: Send + Sync + 'static {
    type State: Clone + Send + Sync + 'static;

    fn name(&self) -> &'static str;

    /// State before any event has been applied.
    fn initial_state(&self) -> Self::State;

    /// Whether this projection wants `event` at all. Skipped events still
    /// advance the read model's watermark.
    fn interested_in(&self, _event: &EventEnvelope) -> bool {
        true
    }

    fn apply(&self, state: &mut Self::State, event: &EventEnvelope) -> Result<()>;

    /// Looks up one entry by its string key, rendered as JSON.
    fn query(&self, state: &Self::State, key: &str) -> Option<serde_json::Value>;
}

/// A projection built from a `(state, event) -> next state` function.
///
/// Queries treat the serialized state as a JSON object and return the member
/// named by the key.
pub struct FnProjection<S, F> {
    name: &'static str,
    initial: S,
    fold: F,
}

impl<S, F> FnProjection<S, F>
where
    S: Clone + Serialize + Send + Sync + 'static,
    F: Fn(&S, &EventEnvelope) -> Result<S> + Send + Sync + 'static,
{
    pub fn new(name: &'static str, initial: S, fold: F) -> Self {
        Self {
            name,
            initial,
            fold,
        }
    }
}

impl<S, F> fmt::Debug for FnProjection<S, F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnProjection")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

impl<S, F> Projection for FnProjection<S, F>
where
    S: Clone + Serialize + Send + Sync + 'static,
    F: Fn(&S, &EventEnvelope) -> Result<S> + Send + Sync + 'static,
{
    type State = S;

    fn name(&self) -> &'static str {
        self.name
    }

    fn initial_state(&self) -> S {
        self.initial.clone()
    }

    fn apply(&self, state: &mut S, event: &EventEnvelope) -> Result<()> {
        *state = (self.fold)(state, event)?;
        Ok(())
    }

    fn query(&self, state: &S, key: &str) -> Option<serde_json::Value> {
        match serde_json::to_value(state) {
            Ok(serde_json::Value::Object(mut map)) => map.remove(key),
            Ok(_) => None,
            Err(e) => {
                tracing::warn!(read_model = self.name, error = %e, "state is not serializable");
                None
            }
        }
    }
}

/// Shorthand for rejecting an event from inside a projection.
pub fn reject(reason: impl Into<String>) -> ProjectionError {
    ProjectionError::Projection(reason.into())
}
