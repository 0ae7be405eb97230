//! Read-model definitions and dispatch.
//!
//! A projection is a pure fold over a declared set of event types. The store
//! captures a read-only [`ProjectionRegistry`] at construction and, for each
//! append, recomputes exactly the projections whose `can_handle` set
//! intersects the batch, inside the same transaction as the event write.
//!
//! State is dynamically typed (`serde_json::Value`): the store treats it as
//! opaque and persists it under the projection's slot in the stream document.

use std::{
    collections::{BTreeSet, HashMap},
    fmt,
    sync::Arc,
};

use serde_json::Value;

use crate::event::DomainEvent;

/// Produces the initial state for a projection with no prior slot.
pub type InitialStateFn = Arc<dyn Fn() -> Value + Send + Sync>;

/// The fold step: `(state, event) -> state`.
///
/// Must be pure and side-effect free; the store calls it inside a
/// transaction.
pub type EvolveFn = Arc<dyn Fn(Value, &DomainEvent) -> Value + Send + Sync>;

/// A named projection over an explicit set of event types.
///
/// The event-type set is plain data rather than a predicate closure, so
/// definitions are trivially testable and the registry can flatten them into
/// an `event type -> definitions` map for dispatch.
#[derive(Clone)]
pub struct ProjectionDefinition {
    name: String,
    event_types: BTreeSet<String>,
    initial_state: InitialStateFn,
    evolve: EvolveFn,
}

impl ProjectionDefinition {
    /// Define a projection.
    ///
    /// `event_types` is the `can_handle` set; `initial_state` seeds the fold
    /// when no slot exists yet (it may return `Value::Null`).
    pub fn new<I>(
        name: impl Into<String>,
        event_types: I,
        initial_state: impl Fn() -> Value + Send + Sync + 'static,
        evolve: impl Fn(Value, &DomainEvent) -> Value + Send + Sync + 'static,
    ) -> Self
    where
        I: IntoIterator,
        I::Item: Into<String>,
    {
        Self {
            name: name.into(),
            event_types: event_types.into_iter().map(Into::into).collect(),
            initial_state: Arc::new(initial_state),
            evolve: Arc::new(evolve),
        }
    }

    /// The projection's name, which doubles as its slot key in stream
    /// documents.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Iterate over the event types this projection handles.
    pub fn event_types(&self) -> impl Iterator<Item = &str> {
        self.event_types.iter().map(String::as_str)
    }

    /// Whether this projection handles the given event type.
    #[must_use]
    pub fn can_handle(&self, event_type: &str) -> bool {
        self.event_types.contains(event_type)
    }

    /// The initial state for a stream without a prior slot.
    #[must_use]
    pub fn initial_state(&self) -> Value {
        (self.initial_state)()
    }

    /// Apply a single event to the state.
    #[must_use]
    pub fn evolve(&self, state: Value, event: &DomainEvent) -> Value {
        (self.evolve)(state, event)
    }

    /// Fold the applicable events of a batch into the state.
    ///
    /// Events whose type is outside the `can_handle` set are skipped.
    #[must_use]
    pub fn fold<'a>(
        &self,
        state: Value,
        events: impl IntoIterator<Item = &'a DomainEvent>,
    ) -> Value {
        events
            .into_iter()
            .filter(|event| self.can_handle(&event.kind))
            .fold(state, |state, event| self.evolve(state, event))
    }
}

impl fmt::Debug for ProjectionDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProjectionDefinition")
            .field("name", &self.name)
            .field("event_types", &self.event_types)
            .finish_non_exhaustive()
    }
}

/// A read-only list of projection definitions, indexed by event type.
#[derive(Debug, Clone, Default)]
pub struct ProjectionRegistry {
    definitions: Vec<ProjectionDefinition>,
    by_event_type: HashMap<String, Vec<usize>>,
}

impl ProjectionRegistry {
    /// Capture the definitions, preserving registration order.
    #[must_use]
    pub fn new(definitions: Vec<ProjectionDefinition>) -> Self {
        let mut by_event_type: HashMap<String, Vec<usize>> = HashMap::new();
        for (index, definition) in definitions.iter().enumerate() {
            for event_type in definition.event_types() {
                by_event_type
                    .entry(event_type.to_owned())
                    .or_default()
                    .push(index);
            }
        }
        Self {
            definitions,
            by_event_type,
        }
    }

    /// Whether the registry holds no definitions.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }

    /// Number of registered definitions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    /// Iterate over all definitions in registration order.
    pub fn iter(&self) -> impl Iterator<Item = &ProjectionDefinition> {
        self.definitions.iter()
    }

    /// The definitions applicable to a batch containing the given event
    /// types, deduplicated, in registration order.
    pub fn select_for<'a, 'b>(
        &'a self,
        event_types: impl IntoIterator<Item = &'b str>,
    ) -> Vec<&'a ProjectionDefinition> {
        let mut selected: BTreeSet<usize> = BTreeSet::new();
        for event_type in event_types {
            if let Some(indices) = self.by_event_type.get(event_type) {
                selected.extend(indices);
            }
        }
        selected
            .into_iter()
            .map(|index| &self.definitions[index])
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::subject::Subject;

    fn counter(name: &str, event_types: &[&str]) -> ProjectionDefinition {
        let types: Vec<String> = event_types.iter().map(ToString::to_string).collect();
        ProjectionDefinition::new(
            name,
            types,
            || json!({ "count": 0 }),
            |state, _event| json!({ "count": state["count"].as_i64().unwrap_or(0) + 1 }),
        )
    }

    fn event(kind: &str) -> DomainEvent {
        DomainEvent::new(kind, Subject::parse("user/1/test").unwrap())
    }

    #[test]
    fn fold_skips_unhandled_event_types() {
        let projection = counter("UserCount", &["user.created"]);
        let events = vec![event("user.created"), event("user.deleted"), event("user.created")];

        let state = projection.fold(projection.initial_state(), &events);
        assert_eq!(state, json!({ "count": 2 }));
    }

    #[test]
    fn select_for_returns_applicable_definitions_in_registration_order() {
        let registry = ProjectionRegistry::new(vec![
            counter("A", &["user.created", "user.deleted"]),
            counter("B", &["order.placed"]),
            counter("C", &["user.deleted"]),
        ]);

        let selected = registry.select_for(["user.deleted", "user.created"]);
        let names: Vec<&str> = selected.iter().map(|d| d.name()).collect();
        assert_eq!(names, ["A", "C"]);
    }

    #[test]
    fn select_for_deduplicates_definitions_handling_multiple_types() {
        let registry = ProjectionRegistry::new(vec![counter("A", &["x", "y"])]);
        assert_eq!(registry.select_for(["x", "y"]).len(), 1);
    }

    #[test]
    fn select_for_unknown_types_is_empty() {
        let registry = ProjectionRegistry::new(vec![counter("A", &["x"])]);
        assert!(registry.select_for(["z"]).is_empty());
        assert_eq!(registry.len(), 1);
        assert!(!registry.is_empty());
    }
}
