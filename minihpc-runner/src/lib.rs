//! minihpc Runner
//!
//! Queues containerized jobs and executes them one at a time.
//!
//! Architecture:
//! - Configuration: settings from environment or defaults
//! - Repository: durable job records in SQLite
//! - Runtime: container lifecycle through a docker-compatible CLI
//! - Scheduler: FIFO queue and the per-job execution protocol
//!
//! A job moves `Pending -> Running -> Complete | Failed`; each transition is
//! persisted before the scheduler moves on.

pub mod config;
pub mod db;
pub mod repository;
pub mod runtime;
pub mod scheduler;

pub use config::Config;
pub use repository::{JobStore, SqliteJobStore, StoreError};
pub use runtime::{CliRuntime, ContainerRuntime, RuntimeError};
pub use scheduler::{EnqueueError, RunOutcome, Scheduler, Timeouts};
