//! Job domain types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

use crate::dto::job::CreateJob;

/// Unit of schedulable work
///
/// Structure shared between the scheduler (mutates) and the job store (persists).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    pub name: String,
    pub command: String,
    pub status: JobStatus,
    /// Whole cores
    pub cpu: u32,
    /// Hard memory ceiling in bytes
    pub memory: u64,
    pub image: String,
    /// Combined stdout/stderr, filled in when the job completes
    pub log: String,
    pub error: Option<String>,
    pub exit_code: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Job lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Running,
    Complete,
    Failed,
}

/// Rejected status change
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("job {id}: invalid transition {from} -> {to}")]
pub struct InvalidTransition {
    pub id: Uuid,
    pub from: JobStatus,
    pub to: JobStatus,
}

/// Unknown status string read back from storage
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown job status '{0}'")]
pub struct UnknownStatus(pub String);

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Complete => "complete",
            JobStatus::Failed => "failed",
        }
    }

    /// `Complete` and `Failed` accept no further transitions
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Complete | JobStatus::Failed)
    }

    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        matches!(
            (self, next),
            (JobStatus::Pending, JobStatus::Running)
                | (JobStatus::Running, JobStatus::Complete)
                | (JobStatus::Running, JobStatus::Failed)
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(JobStatus::Pending),
            "running" => Ok(JobStatus::Running),
            "complete" => Ok(JobStatus::Complete),
            "failed" => Ok(JobStatus::Failed),
            other => Err(UnknownStatus(other.to_string())),
        }
    }
}

impl Job {
    /// Creates a pending job from a request
    ///
    /// The request is expected to be validated already; see [`CreateJob::validate`].
    pub fn new(req: CreateJob) -> Self {
        let id = Uuid::new_v4();
        let name = req
            .name
            .filter(|n| !n.trim().is_empty())
            .unwrap_or_else(|| default_name(&id));

        Self {
            id,
            name,
            command: req.command,
            status: JobStatus::Pending,
            cpu: req.cpu,
            memory: req.memory,
            image: req.image,
            log: String::new(),
            error: None,
            exit_code: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        }
    }

    /// Pending -> Running
    pub fn mark_running(&mut self) -> Result<(), InvalidTransition> {
        self.transition(JobStatus::Running)?;
        self.started_at = Some(Utc::now());
        Ok(())
    }

    /// Running -> Complete, recording the captured output
    pub fn mark_complete(
        &mut self,
        log: String,
        exit_code: Option<i64>,
    ) -> Result<(), InvalidTransition> {
        self.transition(JobStatus::Complete)?;
        self.log = log;
        self.exit_code = exit_code;
        self.completed_at = Some(Utc::now());
        Ok(())
    }

    /// Running -> Failed. The log is left untouched.
    pub fn mark_failed(&mut self, reason: impl Into<String>) -> Result<(), InvalidTransition> {
        self.transition(JobStatus::Failed)?;
        self.error = Some(reason.into());
        self.completed_at = Some(Utc::now());
        Ok(())
    }

    fn transition(&mut self, next: JobStatus) -> Result<(), InvalidTransition> {
        if !self.status.can_transition_to(next) {
            return Err(InvalidTransition {
                id: self.id,
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        Ok(())
    }
}

fn default_name(id: &Uuid) -> String {
    format!("job-{}", &id.simple().to_string()[..8])
}
