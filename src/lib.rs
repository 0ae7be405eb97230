#![doc = include_str!("../README.md")]

pub use vorfall_core::{
    event,
    event::{DomainEvent, group_by_stream_subject, single_stream_subject},
    projection,
    projection::{ProjectionDefinition, ProjectionRegistry},
    subject,
    subject::{StreamSubject, Subject},
};

#[cfg(feature = "mongodb")]
#[cfg_attr(docsrs, doc(cfg(feature = "mongodb")))]
pub mod store {
    pub use vorfall_mongodb::{
        AggregatedStates, AppendResult, CommandEvents, Error, EventStore, FindProjectionsOptions,
        ProjectionQuery, ReadStreamResult, StoreConfig, StreamDocument, StreamMetadata,
        StreamStateSpec,
        filter::{nest_filter, nest_sort},
        handle_command,
    };
}
