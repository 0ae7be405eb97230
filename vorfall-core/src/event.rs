//! The CloudEvents envelope and batch helpers.
//!
//! A [`DomainEvent`] wraps a typed payload in the well-known CloudEvents 1.0
//! attributes. Events are immutable facts: once created they are appended,
//! never rewritten. Batch helpers group events by their stream subject ahead
//! of a multi-stream append and guard the single-stream fast path.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

use crate::subject::{InvalidSubjectFormat, StreamSubject, Subject};

/// Default `source` attribute for events created by this library.
pub const DEFAULT_SOURCE: &str = "vorfall.eventsourcing.system";

/// CloudEvents `specversion` emitted by this library.
pub const SPEC_VERSION: &str = "1.0";

/// Default `datacontenttype`: payloads are JSON.
pub const DATA_CONTENT_TYPE: &str = "application/json";

/// An immutable domain event in a CloudEvents 1.0 envelope.
///
/// [`DomainEvent::new`] fills every attribute with its default; the
/// builder-style setters override them, so an event read back from storage
/// can be rewrapped without losing its identity:
///
/// ```
/// use vorfall_core::{event::DomainEvent, subject::Subject};
///
/// let original = DomainEvent::new("user.created", Subject::parse("user/1/created")?);
/// let rewrapped = DomainEvent::new(original.kind.clone(), original.subject.clone())
///     .id(original.id)
///     .date(original.date);
/// assert_eq!(original.id, rewrapped.id);
/// assert_eq!(original.date, rewrapped.date);
/// # Ok::<(), vorfall_core::subject::InvalidSubjectFormat>(())
/// ```
///
/// Unknown envelope attributes survive a read-modify-write cycle via the
/// flattened `extra` map.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DomainEvent {
    /// Unique event identity, defaulted to a v4 UUID.
    pub id: Uuid,
    /// Producer identifier.
    pub source: String,
    /// CloudEvents specification version, `"1.0"`.
    pub specversion: String,
    /// Event-type tag, e.g. `"user.created"`.
    #[serde(rename = "type")]
    pub kind: String,
    /// The event subject; its leading two segments name the stream.
    pub subject: Subject,
    /// Payload content type, `"application/json"`.
    pub datacontenttype: String,
    /// Event time.
    pub date: DateTime<Utc>,
    /// Payload. May be absent, but never `null`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    /// Optional caller-supplied metadata.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
    /// Unrecognized envelope attributes, round-tripped verbatim.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

impl DomainEvent {
    /// Create an event with defaulted identity, time, and envelope fields.
    #[must_use]
    pub fn new(kind: impl Into<String>, subject: Subject) -> Self {
        Self {
            id: Uuid::new_v4(),
            source: DEFAULT_SOURCE.to_owned(),
            specversion: SPEC_VERSION.to_owned(),
            kind: kind.into(),
            subject,
            datacontenttype: DATA_CONTENT_TYPE.to_owned(),
            date: Utc::now(),
            data: None,
            metadata: None,
            extra: serde_json::Map::new(),
        }
    }

    /// Attach a payload.
    #[must_use]
    pub fn data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    /// Attach metadata.
    #[must_use]
    pub fn metadata(mut self, metadata: Value) -> Self {
        self.metadata = Some(metadata);
        self
    }

    /// Override the generated event id.
    #[must_use]
    pub fn id(mut self, id: Uuid) -> Self {
        self.id = id;
        self
    }

    /// Override the event time.
    #[must_use]
    pub fn date(mut self, date: DateTime<Utc>) -> Self {
        self.date = date;
        self
    }

    /// Override the producer identifier.
    #[must_use]
    pub fn source(mut self, source: impl Into<String>) -> Self {
        self.source = source.into();
        self
    }

    /// The stream subject this event belongs to.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidSubjectFormat`] if the subject has fewer than two
    /// segments (only possible for leniently parsed legacy subjects).
    pub fn stream_subject(&self) -> Result<StreamSubject, InvalidSubjectFormat> {
        self.subject.stream_subject()
    }
}

/// A batch-level precondition failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BatchError {
    /// The operation was invoked with no events.
    #[error("event batch is empty")]
    Empty,
    /// A single-stream batch contained events for more than one stream.
    #[error("events span multiple stream subjects: expected `{expected}`, found `{found}`")]
    MixedStreamSubjects {
        /// Stream subject of the first event in the batch.
        expected: StreamSubject,
        /// The first differing stream subject encountered.
        found: StreamSubject,
    },
    /// An event subject could not be reduced to a stream subject.
    #[error(transparent)]
    Subject(#[from] InvalidSubjectFormat),
}

/// The single stream subject shared by every event in the batch.
///
/// This is the guard behind single-stream appends: the caller promises the
/// batch targets one stream, and a violated promise is an error rather than
/// a `false`.
///
/// # Errors
///
/// Returns [`BatchError::Empty`] for an empty batch,
/// [`BatchError::Subject`] if any event subject has fewer than two
/// segments, and [`BatchError::MixedStreamSubjects`] if the events span
/// more than one stream.
pub fn single_stream_subject(events: &[DomainEvent]) -> Result<StreamSubject, BatchError> {
    let Some((first, rest)) = events.split_first() else {
        return Err(BatchError::Empty);
    };
    let expected = first.stream_subject()?;
    for event in rest {
        let found = event.stream_subject()?;
        if found != expected {
            return Err(BatchError::MixedStreamSubjects { expected, found });
        }
    }
    Ok(expected)
}

/// Check that every event in the batch targets the same stream.
///
/// Used as a precondition guard when callers promise single-stream behavior.
///
/// # Errors
///
/// Returns [`BatchError::Empty`] for an empty batch and
/// [`BatchError::Subject`] if any event subject has fewer than two segments.
pub fn events_have_same_stream_subject(events: &[DomainEvent]) -> Result<bool, BatchError> {
    match single_stream_subject(events) {
        Ok(_) => Ok(true),
        Err(BatchError::MixedStreamSubjects { .. }) => Ok(false),
        Err(error) => Err(error),
    }
}

/// Partition events into per-stream buckets.
///
/// Bucket order is the first-appearance order of stream subjects in the
/// input; within a bucket, caller order is preserved. This makes
/// multi-stream writes deterministic.
///
/// # Errors
///
/// Returns [`BatchError::Empty`] for an empty batch and
/// [`BatchError::Subject`] if any event subject has fewer than two segments.
pub fn group_by_stream_subject(
    events: Vec<DomainEvent>,
) -> Result<Vec<(StreamSubject, Vec<DomainEvent>)>, BatchError> {
    if events.is_empty() {
        return Err(BatchError::Empty);
    }

    let mut buckets: Vec<(StreamSubject, Vec<DomainEvent>)> = Vec::new();
    for event in events {
        let stream_subject = event.stream_subject()?;
        match buckets.iter_mut().find(|(s, _)| *s == stream_subject) {
            Some((_, bucket)) => bucket.push(event),
            None => buckets.push((stream_subject, vec![event])),
        }
    }
    Ok(buckets)
}
