//! The stream store: whole-stream reads and the transactional append
//! protocol.
//!
//! Every stream lives in a single document keyed by its two-segment stream
//! subject, in the collection named by the subject's first segment. An
//! append upserts the document (`$setOnInsert` for identity, `$push $each`
//! for the events) and recomputes the affected projection slots under the
//! same session and transaction, so a batch spanning several streams is
//! observable either completely or not at all.

use std::fmt;

use mongodb::{
    Client, ClientSession, Collection, Database,
    bson::{self, DateTime, Document, doc},
    options::ReturnDocument,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use vorfall_core::{
    event::{self, DomainEvent},
    projection::ProjectionRegistry,
    subject::{StreamSubject, Subject},
};

use crate::{Error, StoreConfig};

/// Bookkeeping timestamps of a stream document.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamMetadata {
    /// Wall time of the first write; set on insert only.
    pub created_at: DateTime,
    /// Wall time of the most recent append.
    pub updated_at: DateTime,
}

/// One stream of events, stored as a single document.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamDocument {
    /// Opaque identity, set at creation and never changed.
    pub stream_id: Uuid,
    /// Two-segment stream subject; the primary lookup key.
    pub stream_subject: StreamSubject,
    /// Append-only event sequence in insertion order.
    pub events: Vec<DomainEvent>,
    /// Creation and last-append timestamps.
    pub metadata: StreamMetadata,
    /// Projection name to current state; present only once an applicable
    /// event has been appended.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub projections: Option<Document>,
}

/// Result of [`EventStore::read_stream`].
#[derive(Debug, Clone, Default)]
pub struct ReadStreamResult {
    /// The stream's events in stored order; empty if the stream does not
    /// exist.
    pub events: Vec<DomainEvent>,
    /// Whether a stream document was found.
    pub stream_exists: bool,
}

/// Result of [`EventStore::append_or_create_stream`].
#[derive(Debug, Clone)]
pub struct AppendResult {
    /// The stream documents after the append, one per touched stream, in
    /// first-appearance order of the batch.
    pub streams: Vec<StreamDocument>,
    /// Number of events written, summed across streams.
    pub total_events_appended: usize,
    /// Distinct stream subjects of the batch, in first-appearance order.
    pub stream_subjects: Vec<StreamSubject>,
}

/// A projection-aware event store over one logical MongoDB database.
///
/// The store holds one client; sessions are short-lived (one per append).
/// The projection registry is captured at construction and never mutated.
#[derive(Clone)]
pub struct EventStore {
    client: Client,
    pub(crate) database: Database,
    projections: ProjectionRegistry,
}

impl EventStore {
    /// Connect to the backend and capture the projection registry.
    ///
    /// The deployment is pinged before the store is handed out; connection
    /// attempts are retried up to `config.max_retries` times with linear
    /// backoff.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Storage`] with the final driver error once the
    /// attempt limit is exhausted.
    pub async fn connect(config: StoreConfig) -> Result<Self, Error> {
        let client = connect_with_retry(&config).await?;
        let database = client.database(&config.database_name);
        Ok(Self {
            client,
            database,
            projections: ProjectionRegistry::new(config.projections),
        })
    }

    /// The underlying database handle.
    #[must_use]
    pub fn database(&self) -> &Database {
        &self.database
    }

    /// The registry captured at construction.
    #[must_use]
    pub fn projections(&self) -> &ProjectionRegistry {
        &self.projections
    }

    /// Handle for the collection backing the given subject, named after its
    /// first segment. Pure computation.
    #[must_use]
    pub fn collection_for(&self, subject: &Subject) -> Collection<StreamDocument> {
        self.database.collection(subject.collection())
    }

    pub(crate) fn stream_collection(&self, stream_subject: &StreamSubject) -> Collection<StreamDocument> {
        self.database.collection(stream_subject.collection())
    }

    pub(crate) async fn find_stream_document(
        &self,
        stream_subject: &StreamSubject,
    ) -> Result<Option<StreamDocument>, Error> {
        Ok(self
            .stream_collection(stream_subject)
            .find_one(doc! { "streamSubject": stream_subject.as_str() })
            .await?)
    }

    /// Read a whole stream in stored order.
    ///
    /// `subject` is normalized to its stream subject first, so any event
    /// subject of the stream works as a lookup key.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Subject`] if `subject` has fewer than two segments,
    /// or [`Error::Storage`] on driver failures.
    #[tracing::instrument(skip(self), fields(subject = %subject))]
    pub async fn read_stream(&self, subject: &Subject) -> Result<ReadStreamResult, Error> {
        let stream_subject = subject.stream_subject()?;
        match self.find_stream_document(&stream_subject).await? {
            Some(document) => Ok(ReadStreamResult {
                events: document.events,
                stream_exists: true,
            }),
            None => Ok(ReadStreamResult::default()),
        }
    }

    /// Fold a whole stream into aggregate state.
    ///
    /// If the stream does not exist, returns `initial_state()` unchanged.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Storage`] on driver failures.
    pub async fn aggregate_stream<S>(
        &self,
        stream_subject: &StreamSubject,
        initial_state: impl FnOnce() -> S,
        mut evolve: impl FnMut(S, &DomainEvent) -> S,
    ) -> Result<S, Error> {
        let document = self.find_stream_document(stream_subject).await?;
        let mut state = initial_state();
        if let Some(document) = document {
            for event in &document.events {
                state = evolve(state, event);
            }
        }
        Ok(state)
    }

    /// Atomically append a batch of events, creating streams as needed.
    ///
    /// Events are grouped by stream subject (first-appearance order,
    /// caller order within each group) and every group is appended inside
    /// one transaction, together with the recomputation of every affected
    /// projection slot. Appends are not idempotent; deduplication is a
    /// caller concern.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Batch`] for an empty batch and [`Error::Subject`] if
    /// an event subject cannot name a stream, both before any I/O, and
    /// [`Error::Storage`] if the transaction fails; on failure nothing is
    /// written.
    #[tracing::instrument(skip(self, events), fields(events_len = events.len()))]
    pub async fn append_or_create_stream(
        &self,
        events: Vec<DomainEvent>,
    ) -> Result<AppendResult, Error> {
        let total_events_appended = events.len();
        let groups = event::group_by_stream_subject(events)?;
        self.append_grouped(groups, total_events_appended).await
    }

    /// Atomically append a batch that the caller promises targets a single
    /// stream.
    ///
    /// The promise is checked before any I/O; the shortcut then skips the
    /// grouping pass but otherwise follows the same transactional path as
    /// [`EventStore::append_or_create_stream`], since a single-stream append
    /// still does two writes (events and projections) that must be atomic.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Batch`] for an empty batch or one spanning more than
    /// one stream, [`Error::Subject`] if an event subject cannot name a
    /// stream, and [`Error::Storage`] if the transaction fails.
    #[tracing::instrument(skip(self, events), fields(events_len = events.len()))]
    pub async fn append_to_stream(&self, events: Vec<DomainEvent>) -> Result<AppendResult, Error> {
        let total_events_appended = events.len();
        let stream_subject = event::single_stream_subject(&events)?;
        self.append_grouped(vec![(stream_subject, events)], total_events_appended)
            .await
    }

    /// Shared tail of the append entry points: one transaction over the
    /// prepared buckets.
    async fn append_grouped(
        &self,
        groups: Vec<(StreamSubject, Vec<DomainEvent>)>,
        total_events_appended: usize,
    ) -> Result<AppendResult, Error> {
        let stream_subjects: Vec<StreamSubject> =
            groups.iter().map(|(subject, _)| subject.clone()).collect();

        let mut session = self.client.start_session().await?;
        session.start_transaction().await?;

        match self.append_groups(&mut session, &groups).await {
            Ok(streams) => {
                session.commit_transaction().await?;
                tracing::info!(
                    streams = streams.len(),
                    total_events_appended,
                    "append committed"
                );
                Ok(AppendResult {
                    streams,
                    total_events_appended,
                    stream_subjects,
                })
            }
            Err(error) => {
                if let Err(abort_error) = session.abort_transaction().await {
                    tracing::warn!(error = %abort_error, "failed to abort append transaction");
                }
                Err(error)
            }
        }
    }

    async fn append_groups(
        &self,
        session: &mut ClientSession,
        groups: &[(StreamSubject, Vec<DomainEvent>)],
    ) -> Result<Vec<StreamDocument>, Error> {
        let mut streams = Vec::with_capacity(groups.len());
        for (stream_subject, events) in groups {
            streams.push(self.append_bucket(session, stream_subject, events).await?);
        }
        Ok(streams)
    }

    /// Upsert one stream document and recompute its projection slots, all
    /// under the caller's session.
    async fn append_bucket(
        &self,
        session: &mut ClientSession,
        stream_subject: &StreamSubject,
        events: &[DomainEvent],
    ) -> Result<StreamDocument, Error> {
        let collection = self.stream_collection(stream_subject);
        let now = DateTime::now();
        let events_bson = events
            .iter()
            .map(bson::to_bson)
            .collect::<Result<Vec<_>, _>>()?;

        let update = doc! {
            "$setOnInsert": {
                "streamId": Uuid::new_v4().to_string(),
                "streamSubject": stream_subject.as_str(),
                "metadata.createdAt": now,
            },
            "$set": { "metadata.updatedAt": now },
            "$push": { "events": { "$each": events_bson } },
        };

        let after = collection
            .find_one_and_update(doc! { "streamSubject": stream_subject.as_str() }, update)
            .upsert(true)
            .return_document(ReturnDocument::After)
            .session(&mut *session)
            .await?
            .ok_or_else(|| Error::UpsertUnexpectedlyMissing {
                stream_subject: stream_subject.clone(),
            })?;
        tracing::debug!(
            stream_subject = %stream_subject,
            events = events.len(),
            "stream document upserted"
        );

        let applicable = self
            .projections
            .select_for(events.iter().map(|event| event.kind.as_str()));
        if applicable.is_empty() {
            return Ok(after);
        }

        let mut slot_updates = Document::new();
        for definition in applicable {
            let prior = after
                .projections
                .as_ref()
                .and_then(|slots| slots.get(definition.name()));
            // A slot holding null is prior state, not absence; only a
            // missing key falls back to the initial state.
            let state = match prior {
                Some(slot) => definition.fold(slot.clone().into_relaxed_extjson(), events),
                None => definition.fold(definition.initial_state(), events),
            };
            slot_updates.insert(
                format!("projections.{}", definition.name()),
                bson::to_bson(&state)?,
            );
        }
        tracing::debug!(
            stream_subject = %stream_subject,
            projections = slot_updates.len(),
            "projection slots recomputed"
        );

        collection
            .find_one_and_update(
                doc! { "streamSubject": stream_subject.as_str() },
                doc! { "$set": slot_updates },
            )
            .return_document(ReturnDocument::After)
            .session(session)
            .await?
            .ok_or_else(|| Error::UpsertUnexpectedlyMissing {
                stream_subject: stream_subject.clone(),
            })
    }
}

impl fmt::Debug for EventStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventStore")
            .field("database", &self.database.name())
            .field("projections", &self.projections.len())
            .finish_non_exhaustive()
    }
}

async fn connect_with_retry(config: &StoreConfig) -> Result<Client, Error> {
    let mut attempt = 0u32;
    loop {
        attempt += 1;
        match try_connect(&config.connection_string).await {
            Ok(client) => return Ok(client),
            Err(error) if attempt < config.max_retries => {
                let delay = config.retry_delay * attempt;
                tracing::warn!(%error, attempt, ?delay, "connection attempt failed, retrying");
                tokio::time::sleep(delay).await;
            }
            Err(error) => return Err(error.into()),
        }
    }
}

async fn try_connect(connection_string: &str) -> Result<Client, mongodb::error::Error> {
    let client = Client::with_uri_str(connection_string).await?;
    client
        .database("admin")
        .run_command(doc! { "ping": 1 })
        .await?;
    Ok(client)
}
