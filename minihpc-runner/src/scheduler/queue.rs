use std::collections::VecDeque;

use minihpc_core::domain::job::Job;
use uuid::Uuid;

/// Pending jobs in arrival order
#[derive(Debug, Default)]
pub struct JobQueue {
    jobs: VecDeque<Job>,
}

impl JobQueue {
    /// Add a job at the tail
    pub fn append(&mut self, job: Job) {
        self.jobs.push_back(job);
    }

    /// Remove and return the oldest job
    pub fn pop_front(&mut self) -> Option<Job> {
        self.jobs.pop_front()
    }

    /// Remove and return the job with `id`, wherever it sits.
    /// The remaining jobs keep their relative order.
    pub fn pop_by_id(&mut self, id: &Uuid) -> Option<Job> {
        let pos = self.jobs.iter().position(|j| j.id == *id)?;
        self.jobs.remove(pos)
    }

    /// Current contents, head first
    pub fn snapshot(&self) -> Vec<Job> {
        self.jobs.iter().cloned().collect()
    }

    /// Whether a job with `id` is waiting
    pub fn contains(&self, id: &Uuid) -> bool {
        self.jobs.iter().any(|j| j.id == *id)
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }
}

impl FromIterator<Job> for JobQueue {
    fn from_iter<I: IntoIterator<Item = Job>>(iter: I) -> Self {
        Self {
            jobs: iter.into_iter().collect(),
        }
    }
}
