//! Storage-agnostic primitives for the Vorfall event-sourcing library.
//!
//! This crate provides the foundational types for event sourcing over
//! hierarchical subjects:
//!
//! - [`subject`] - The subject grammar ([`Subject`], [`StreamSubject`])
//! - [`event`] - The CloudEvents envelope ([`DomainEvent`]) and batch helpers
//! - [`projection`] - Read-model definitions and dispatch
//!   ([`ProjectionDefinition`], [`ProjectionRegistry`])
//!
//! Everything here is CPU-only; persistence lives in the backend crates.
//! Most users should depend on the `vorfall` crate, which re-exports these
//! types together with the MongoDB-backed store.
//!
//! [`Subject`]: subject::Subject
//! [`StreamSubject`]: subject::StreamSubject
//! [`DomainEvent`]: event::DomainEvent
//! [`ProjectionDefinition`]: projection::ProjectionDefinition
//! [`ProjectionRegistry`]: projection::ProjectionRegistry

pub mod event;
pub mod projection;
pub mod subject;
