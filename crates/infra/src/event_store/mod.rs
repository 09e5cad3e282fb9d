//! Append-only, tenant-scoped event storage.
//!
//! The in-memory store backs tests and dev runs; the Postgres store (feature
//! `postgres`) is the durable backend.

pub mod in_memory;
#[cfg(feature = "postgres")]
pub mod postgres;
pub mod r#trait;

pub use in_memory::InMemoryEventStore;
#[cfg(feature = "postgres")]
pub use postgres::PostgresEventStore;
pub use r#trait::{EventStore, EventStoreError, StoredEvent, UncommittedEvent};
