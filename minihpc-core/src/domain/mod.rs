//! Core domain types
//!
//! These types are shared between the scheduler (for execution) and the job
//! store (for persistence).

pub mod job;
