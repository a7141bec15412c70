//! Data Transfer Objects
//!
//! Lightweight requests handed from the CLI to the scheduler.

pub mod job;
