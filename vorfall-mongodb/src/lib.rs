//! MongoDB-backed event store for the Vorfall event-sourcing library.
//!
//! Each event stream is one document; appends are transactional and
//! recompute the affected read-model projections in the same transaction.
//! This crate provides:
//!
//! - [`EventStore`] - stream reads, aggregation, and the append protocol
//! - [`StoreConfig`] - connection and projection configuration
//! - [`handle_command`] - the command orchestrator
//! - [`filter`] - rewriting projection queries onto their storage slot
//! - Projection queries ([`EventStore::find_one_projection`],
//!   [`EventStore::find_projections`], [`EventStore::count_projections`])
//!
//! Most users should depend on the `vorfall` crate, which re-exports these
//! types together with the storage-agnostic core.
//!
//! # Concurrency
//!
//! The store issues no background work; every operation is a plain future
//! that suspends only on driver I/O. Sessions are short-lived (one per
//! append). Concurrent appends to the same stream serialize under the
//! server's transaction isolation; no optimistic version is checked, so the
//! ordering tail is last-commit-wins.

mod command;
mod config;
mod error;
pub mod filter;
mod query;
mod store;

pub use command::{AggregatedStates, CommandEvents, StreamStateSpec, handle_command};
pub use config::StoreConfig;
pub use error::Error;
pub use query::{FindProjectionsOptions, ProjectionQuery};
pub use store::{AppendResult, EventStore, ReadStreamResult, StreamDocument, StreamMetadata};
