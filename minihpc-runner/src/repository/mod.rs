//! Repository layer
//!
//! Repositories abstract durable storage of job records. The scheduler only
//! depends on the [`JobStore`] trait so tests can substitute an in-memory
//! store.

mod jobs;

pub use jobs::{JobStore, StoreError};

pub use jobs::SqliteJobStore;
