//! In-memory store and scripted runtime for scheduler tests

use async_trait::async_trait;
use minihpc_core::domain::job::{Job, JobStatus};
use minihpc_core::dto::job::CreateJob;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::repository::{JobStore, StoreError};
use crate::runtime::{ContainerId, ContainerRuntime, ContainerSpec, OutputStream, RuntimeError};

pub fn job(image: &str, command: &str) -> Job {
    Job::new(CreateJob {
        name: None,
        image: image.to_string(),
        command: command.to_string(),
        cpu: 1,
        memory: 1024 * 1024,
    })
}

/// Store that keeps rows in a Vec and records every successful write
#[derive(Default)]
pub struct FakeStore {
    jobs: Mutex<Vec<Job>>,
    writes: Mutex<Vec<(Uuid, JobStatus)>>,
    fail_inserts: AtomicBool,
    fail_updates: AtomicBool,
    fail_load: AtomicBool,
}

impl FakeStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_jobs(jobs: Vec<Job>) -> Self {
        let store = Self::new();
        *store.jobs.lock().unwrap() = jobs;
        store
    }

    pub fn fail_inserts(&self) {
        self.fail_inserts.store(true, Ordering::SeqCst);
    }

    pub fn fail_updates(&self) {
        self.fail_updates.store(true, Ordering::SeqCst);
    }

    pub fn fail_load(&self) {
        self.fail_load.store(true, Ordering::SeqCst);
    }

    pub fn jobs(&self) -> Vec<Job> {
        self.jobs.lock().unwrap().clone()
    }

    pub fn get(&self, id: Uuid) -> Option<Job> {
        self.jobs.lock().unwrap().iter().find(|j| j.id == id).cloned()
    }

    pub fn writes(&self) -> Vec<(Uuid, JobStatus)> {
        self.writes.lock().unwrap().clone()
    }

    /// Statuses written for one job, in order
    pub fn statuses(&self, id: Uuid) -> Vec<JobStatus> {
        self.writes()
            .into_iter()
            .filter(|(job_id, _)| *job_id == id)
            .map(|(_, status)| status)
            .collect()
    }
}

#[async_trait]
impl JobStore for FakeStore {
    async fn insert(&self, job: &Job) -> Result<(), StoreError> {
        if self.fail_inserts.load(Ordering::SeqCst) {
            return Err(StoreError::Database(sqlx::Error::PoolClosed));
        }
        let mut jobs = self.jobs.lock().unwrap();
        if jobs.iter().any(|j| j.id == job.id) {
            return Err(StoreError::Duplicate(job.id));
        }
        jobs.push(job.clone());
        self.writes.lock().unwrap().push((job.id, job.status));
        Ok(())
    }

    async fn update(&self, job: &Job) -> Result<(), StoreError> {
        if self.fail_updates.load(Ordering::SeqCst) {
            return Err(StoreError::Database(sqlx::Error::PoolClosed));
        }
        let mut jobs = self.jobs.lock().unwrap();
        let slot = jobs
            .iter_mut()
            .find(|j| j.id == job.id)
            .ok_or(StoreError::NotFound(job.id))?;
        *slot = job.clone();
        self.writes.lock().unwrap().push((job.id, job.status));
        Ok(())
    }

    async fn load_all(&self) -> Result<Vec<Job>, StoreError> {
        if self.fail_load.load(Ordering::SeqCst) {
            return Err(StoreError::Database(sqlx::Error::PoolClosed));
        }
        Ok(self.jobs())
    }
}

/// Runtime that succeeds unless told to fail at a named operation
pub struct FakeRuntime {
    calls: Mutex<Vec<&'static str>>,
    created: Mutex<Vec<ContainerSpec>>,
    fail_at: Option<&'static str>,
    pull_stream_error: bool,
    hang_wait: bool,
    exit_code: i64,
    logs: Vec<String>,
}

impl FakeRuntime {
    pub fn new() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            created: Mutex::new(Vec::new()),
            fail_at: None,
            pull_stream_error: false,
            hang_wait: false,
            exit_code: 0,
            logs: Vec::new(),
        }
    }

    pub fn failing_at(mut self, op: &'static str) -> Self {
        self.fail_at = Some(op);
        self
    }

    /// Pull starts fine but the progress stream ends with an error
    pub fn failing_pull_stream(mut self) -> Self {
        self.pull_stream_error = true;
        self
    }

    pub fn hanging_wait(mut self) -> Self {
        self.hang_wait = true;
        self
    }

    pub fn with_exit_code(mut self, code: i64) -> Self {
        self.exit_code = code;
        self
    }

    pub fn with_logs(mut self, chunks: &[&str]) -> Self {
        self.logs = chunks.iter().map(|c| c.to_string()).collect();
        self
    }

    pub fn calls(&self) -> Vec<&'static str> {
        self.calls.lock().unwrap().clone()
    }

    pub fn created(&self) -> Vec<ContainerSpec> {
        self.created.lock().unwrap().clone()
    }

    fn record(&self, op: &'static str) -> Result<(), RuntimeError> {
        self.calls.lock().unwrap().push(op);
        if self.fail_at == Some(op) {
            return Err(RuntimeError::CommandFailed {
                op,
                code: Some(125),
                stderr: format!("{} refused", op),
            });
        }
        Ok(())
    }
}

fn stream(items: Vec<Result<String, RuntimeError>>) -> OutputStream {
    let (tx, rx) = mpsc::channel(items.len().max(1));
    for item in items {
        tx.try_send(item).unwrap();
    }
    rx
}

#[async_trait]
impl ContainerRuntime for FakeRuntime {
    async fn pull_image(&self, image: &str) -> Result<OutputStream, RuntimeError> {
        self.record("pull")?;
        let mut items = vec![Ok(format!("Trying to pull {}...\n", image))];
        if self.pull_stream_error {
            items.push(Err(RuntimeError::CommandFailed {
                op: "pull",
                code: Some(125),
                stderr: "manifest unknown".to_string(),
            }));
        } else {
            items.push(Ok("Writing manifest to image destination\n".to_string()));
        }
        Ok(stream(items))
    }

    async fn create_container(&self, spec: &ContainerSpec) -> Result<ContainerId, RuntimeError> {
        self.record("create")?;
        let mut created = self.created.lock().unwrap();
        created.push(spec.clone());
        Ok(ContainerId(format!("ctr-{}", created.len())))
    }

    async fn start_container(&self, _id: &ContainerId) -> Result<(), RuntimeError> {
        self.record("start")
    }

    async fn wait_for_exit(&self, _id: &ContainerId) -> Result<i64, RuntimeError> {
        self.record("wait")?;
        if self.hang_wait {
            std::future::pending::<()>().await;
        }
        Ok(self.exit_code)
    }

    async fn fetch_logs(&self, _id: &ContainerId) -> Result<OutputStream, RuntimeError> {
        self.record("logs")?;
        Ok(stream(self.logs.iter().cloned().map(Ok).collect()))
    }

    async fn remove_container(&self, _id: &ContainerId) -> Result<(), RuntimeError> {
        self.record("remove")
    }
}
