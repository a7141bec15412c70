//! Scheduler layer
//!
//! Holds the pending queue and drives each job through the container
//! runtime, recording every status change in the job store.

mod engine;
pub mod queue;

#[cfg(test)]
mod testing;

pub use engine::{EnqueueError, RunOutcome, Scheduler, Step, StepFailure, Timeouts};
pub use queue::JobQueue;
