use vorfall_core::{
    event::BatchError,
    subject::{InvalidSubjectFormat, StreamSubject},
};

/// Error type for MongoDB event store operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Malformed subject or wrong-arity stream subject.
    #[error(transparent)]
    Subject(#[from] InvalidSubjectFormat),
    /// Empty or mixed-stream event batch.
    #[error(transparent)]
    Batch(#[from] BatchError),
    /// `find_projections` received an entity containing `/`.
    #[error("invalid entity `{entity}`: entity names must not contain `/`")]
    InvalidEntity {
        /// The rejected entity value.
        entity: String,
    },
    /// A command handler returned something that is neither an event nor a
    /// sequence of events.
    ///
    /// The typed [`CommandEvents`](crate::CommandEvents) boundary makes this
    /// unrepresentable in safe code; the variant remains part of the error
    /// contract. An empty sequence is a valid result and surfaces as
    /// [`BatchError::Empty`] from the append instead.
    #[error("command handler returned neither an event nor a sequence of events")]
    InvalidHandlerResult,
    /// A command handler rejected the command.
    #[error("command handler failed: {0}")]
    CommandHandler(#[source] Box<dyn std::error::Error + Send + Sync>),
    /// Any failure from the backend: connection, transaction abort, write
    /// conflict. Wraps the driver error; not recovered locally.
    #[error("storage error: {0}")]
    Storage(#[from] mongodb::error::Error),
    /// An upsert returned no document despite `upsert: true`; indicates a
    /// precondition or driver bug.
    #[error("upsert returned no document for stream `{stream_subject}`")]
    UpsertUnexpectedlyMissing {
        /// The stream whose upsert misbehaved.
        stream_subject: StreamSubject,
    },
    /// Projection state could not be converted to BSON before writing.
    #[error("serialization error: {0}")]
    Serialization(#[from] mongodb::bson::ser::Error),
    /// Stored state could not be converted back from BSON while reading.
    #[error("deserialization error: {0}")]
    Deserialization(#[from] mongodb::bson::de::Error),
}
