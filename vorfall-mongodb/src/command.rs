//! Command handling.
//!
//! [`handle_command`] is the read-side counterpart of the append protocol:
//! it folds one or more declared streams into aggregate states, hands them
//! to a user function together with the command, and persists whatever
//! events the function emits via
//! [`EventStore::append_or_create_stream`].
//!
//! Declaring a stream is an aggregation request, not a write allow-list: a
//! handler may emit events for streams it never declared, and the append
//! protocol will accept them.

use std::future::Future;

use serde_json::Value;
use vorfall_core::{
    event::DomainEvent,
    projection::{EvolveFn, InitialStateFn},
    subject::StreamSubject,
};

use crate::{AppendResult, Error, EventStore};

/// A stream to fold into state before the command handler runs.
///
/// States are dynamically typed (`serde_json::Value`) so a single command
/// can aggregate streams of different shapes.
#[derive(Clone)]
pub struct StreamStateSpec {
    pub(crate) stream_subject: StreamSubject,
    pub(crate) initial_state: InitialStateFn,
    pub(crate) evolve: EvolveFn,
}

impl StreamStateSpec {
    /// Declare a stream together with its fold.
    pub fn new(
        stream_subject: StreamSubject,
        initial_state: impl Fn() -> Value + Send + Sync + 'static,
        evolve: impl Fn(Value, &DomainEvent) -> Value + Send + Sync + 'static,
    ) -> Self {
        Self {
            stream_subject,
            initial_state: std::sync::Arc::new(initial_state),
            evolve: std::sync::Arc::new(evolve),
        }
    }

    /// The declared stream.
    #[must_use]
    pub fn stream_subject(&self) -> &StreamSubject {
        &self.stream_subject
    }
}

impl std::fmt::Debug for StreamStateSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamStateSpec")
            .field("stream_subject", &self.stream_subject)
            .finish_non_exhaustive()
    }
}

/// The aggregated states handed to a command handler, in declaration order.
#[derive(Debug, Clone, Default)]
pub struct AggregatedStates {
    entries: Vec<(StreamSubject, Value)>,
}

impl AggregatedStates {
    /// Look up the state folded for a declared stream.
    #[must_use]
    pub fn get(&self, stream_subject: &str) -> Option<&Value> {
        self.entries
            .iter()
            .find(|(subject, _)| subject.as_str() == stream_subject)
            .map(|(_, state)| state)
    }

    /// Iterate over `(stream subject, state)` pairs in declaration order.
    pub fn iter(&self) -> impl Iterator<Item = (&StreamSubject, &Value)> {
        self.entries.iter().map(|(subject, state)| (subject, state))
    }

    /// Number of aggregated streams.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no streams were declared.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// A command handler's result, normalized to a sequence at the boundary.
#[derive(Debug, Clone)]
pub enum CommandEvents {
    /// A single event.
    One(DomainEvent),
    /// A sequence of events, persisted in order.
    Many(Vec<DomainEvent>),
}

impl CommandEvents {
    fn into_vec(self) -> Vec<DomainEvent> {
        match self {
            Self::One(event) => vec![event],
            Self::Many(events) => events,
        }
    }
}

impl From<DomainEvent> for CommandEvents {
    fn from(event: DomainEvent) -> Self {
        Self::One(event)
    }
}

impl From<Vec<DomainEvent>> for CommandEvents {
    fn from(events: Vec<DomainEvent>) -> Self {
        Self::Many(events)
    }
}

/// Fold the declared streams, invoke the handler, append the result.
///
/// Streams are aggregated sequentially in declaration order, so handler
/// logic can assume a consistent dependency order; each stream is read
/// independently (no cross-stream read consistency).
///
/// # Errors
///
/// Returns [`Error::CommandHandler`] if the handler rejects the command,
/// and otherwise whatever [`EventStore::append_or_create_stream`] reports;
/// in particular, an empty result sequence surfaces as the append's
/// empty-batch error.
pub async fn handle_command<C, F, Fut, E>(
    store: &EventStore,
    streams: Vec<StreamStateSpec>,
    command: C,
    handler: F,
) -> Result<AppendResult, Error>
where
    F: FnOnce(C, AggregatedStates) -> Fut,
    Fut: Future<Output = Result<E, Box<dyn std::error::Error + Send + Sync>>>,
    E: Into<CommandEvents>,
{
    let mut entries = Vec::with_capacity(streams.len());
    for spec in &streams {
        let state = store
            .aggregate_stream(
                &spec.stream_subject,
                || (spec.initial_state)(),
                |state, event| (spec.evolve)(state, event),
            )
            .await?;
        entries.push((spec.stream_subject.clone(), state));
    }
    let states = AggregatedStates { entries };

    let events = handler(command, states)
        .await
        .map_err(Error::CommandHandler)?
        .into()
        .into_vec();
    tracing::debug!(events = events.len(), "command handler produced events");

    store.append_or_create_stream(events).await
}

#[cfg(test)]
mod tests {
    use vorfall_core::subject::Subject;

    use super::*;

    fn event(subject: &str) -> DomainEvent {
        DomainEvent::new("test.event", Subject::parse(subject).unwrap())
    }

    #[test]
    fn scalar_results_normalize_to_a_singleton_sequence() {
        let events = CommandEvents::from(event("user/1/created")).into_vec();
        assert_eq!(events.len(), 1);
    }

    #[test]
    fn sequences_pass_through_in_order() {
        let batch = vec![event("user/1/created"), event("user/1/updated")];
        let ids: Vec<_> = batch.iter().map(|e| e.id).collect();
        let events = CommandEvents::from(batch).into_vec();
        assert_eq!(events.iter().map(|e| e.id).collect::<Vec<_>>(), ids);
    }

    #[test]
    fn aggregated_states_lookup_by_stream_subject() {
        let states = AggregatedStates {
            entries: vec![(
                StreamSubject::parse("user/1").unwrap(),
                serde_json::json!({ "count": 1 }),
            )],
        };
        assert_eq!(states.len(), 1);
        assert_eq!(states.get("user/1"), Some(&serde_json::json!({ "count": 1 })));
        assert!(states.get("user/2").is_none());
    }
}
