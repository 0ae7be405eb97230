//! Querying materialized projections.
//!
//! Filters are authored against the projection's logical schema and rewritten
//! onto the `projections.<name>` slot (see [`crate::filter`]) before they hit
//! the database. Multi-document queries return the slot values themselves,
//! not the surrounding stream documents.

use futures::TryStreamExt;
use mongodb::bson::{Bson, Document, doc};
use serde_json::Value;
use vorfall_core::subject::StreamSubject;

use crate::{
    Error, EventStore, StreamDocument,
    filter::{nest_filter, nest_sort},
};

/// A query against one named projection.
#[derive(Debug, Clone)]
pub struct ProjectionQuery {
    /// The projection whose slot is queried.
    pub projection_name: String,
    /// Optional filter over the projection's logical schema.
    pub filter: Option<Document>,
    /// For [`EventStore::find_one_projection`]: drop the stream-subject
    /// condition and match any stream of the collection.
    pub match_all: bool,
}

impl ProjectionQuery {
    /// Query the named projection without a filter.
    #[must_use]
    pub fn new(projection_name: impl Into<String>) -> Self {
        Self {
            projection_name: projection_name.into(),
            filter: None,
            match_all: false,
        }
    }

    /// Restrict to states matching `filter` (logical schema; rewritten onto
    /// the slot before querying).
    #[must_use]
    pub fn filter(mut self, filter: Document) -> Self {
        self.filter = Some(filter);
        self
    }

    /// Match any stream of the collection instead of one stream subject.
    #[must_use]
    pub const fn match_all(mut self) -> Self {
        self.match_all = true;
        self
    }

    /// The slot path for this projection, `projections.<name>`.
    fn slot(&self) -> String {
        format!("projections.{}", self.projection_name)
    }

    /// Existence-plus-filter document over the slot.
    fn to_document(&self) -> Document {
        let slot = self.slot();
        let mut filter = doc! { &slot: { "$exists": true } };
        if let Some(user_filter) = &self.filter {
            filter.extend(nest_filter(user_filter, &slot));
        }
        filter
    }
}

/// Pagination and ordering for [`EventStore::find_projections`].
#[derive(Debug, Clone, Default)]
pub struct FindProjectionsOptions {
    /// Number of matching documents to skip.
    pub skip: Option<u64>,
    /// Maximum number of results.
    pub limit: Option<i64>,
    /// Sort specification over the projection's logical schema.
    pub sort: Option<Document>,
}

impl FindProjectionsOptions {
    /// Skip the first `skip` matches.
    #[must_use]
    pub const fn skip(mut self, skip: u64) -> Self {
        self.skip = Some(skip);
        self
    }

    /// Return at most `limit` results.
    #[must_use]
    pub const fn limit(mut self, limit: i64) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Order results by the given logical-schema keys.
    #[must_use]
    pub fn sort(mut self, sort: Document) -> Self {
        self.sort = Some(sort);
        self
    }
}

impl EventStore {
    /// Find the stream document holding a matching projection state.
    ///
    /// The filter requires the stream subject (unless
    /// [`ProjectionQuery::match_all`] is set), existence of the projection
    /// slot, and the optional user filter rewritten under the slot.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Storage`] on driver failures.
    #[tracing::instrument(skip(self, query), fields(stream_subject = %stream_subject, projection = %query.projection_name))]
    pub async fn find_one_projection(
        &self,
        stream_subject: &StreamSubject,
        query: &ProjectionQuery,
    ) -> Result<Option<StreamDocument>, Error> {
        let mut filter = Document::new();
        if !query.match_all {
            filter.insert("streamSubject", stream_subject.as_str());
        }
        filter.extend(query.to_document());

        Ok(self
            .stream_collection(stream_subject)
            .find_one(filter)
            .await?)
    }

    /// Find matching projection states across all streams of an entity.
    ///
    /// Returns the slot values (not the stream documents) with `null` slots
    /// filtered out, after applying pagination and the sort specification
    /// (rewritten onto the slot like the filter).
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidEntity`] if `entity` contains `/`, or
    /// [`Error::Storage`] on driver failures.
    #[tracing::instrument(skip(self, query, options), fields(projection = %query.projection_name))]
    pub async fn find_projections(
        &self,
        entity: &str,
        query: &ProjectionQuery,
        options: &FindProjectionsOptions,
    ) -> Result<Vec<Value>, Error> {
        let collection = self.entity_collection(entity)?;
        let slot = query.slot();

        let mut find = collection
            .find(query.to_document())
            .projection(doc! { &slot: 1, "_id": 0 });
        if let Some(skip) = options.skip {
            find = find.skip(skip);
        }
        if let Some(limit) = options.limit {
            find = find.limit(limit);
        }
        if let Some(sort) = &options.sort {
            find = find.sort(nest_sort(sort, &slot));
        }

        let mut cursor = find.await?;
        let mut states = Vec::new();
        while let Some(document) = cursor.try_next().await? {
            let slot_value = document
                .get_document("projections")
                .ok()
                .and_then(|slots| slots.get(&query.projection_name));
            match slot_value {
                Some(Bson::Null) | None => {}
                Some(state) => states.push(state.clone().into_relaxed_extjson()),
            }
        }
        tracing::debug!(results = states.len(), "projection query finished");
        Ok(states)
    }

    /// Count matching projection states across all streams of an entity.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidEntity`] if `entity` contains `/`, or
    /// [`Error::Storage`] on driver failures.
    #[tracing::instrument(skip(self, query), fields(projection = %query.projection_name))]
    pub async fn count_projections(
        &self,
        entity: &str,
        query: &ProjectionQuery,
    ) -> Result<u64, Error> {
        let collection = self.entity_collection(entity)?;
        Ok(collection.count_documents(query.to_document()).await?)
    }

    /// Resolve the collection for a bare entity name.
    fn entity_collection(&self, entity: &str) -> Result<mongodb::Collection<Document>, Error> {
        if entity.contains('/') {
            return Err(Error::InvalidEntity {
                entity: entity.to_owned(),
            });
        }
        Ok(self.database.collection(entity))
    }
}
