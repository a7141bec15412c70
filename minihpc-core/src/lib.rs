//! minihpc Core
//!
//! Core types shared by the minihpc scheduler and CLI.
//!
//! This crate contains:
//! - Domain types: the job record and its status state machine
//! - DTOs: requests accepted from the presentation layer

pub mod domain;
pub mod dto;

pub use domain::job::{Job, JobStatus};
pub use dto::job::CreateJob;
