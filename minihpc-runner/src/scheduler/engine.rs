//! Job scheduler
//!
//! Owns the pending queue and runs one job at a time to a terminal state.
//! Every status change is written to the job store before the next step runs.

use minihpc_core::domain::job::{Job, JobStatus};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::repository::{JobStore, StoreError};
use crate::runtime::{ContainerId, ContainerRuntime, ContainerSpec, OutputStream, RuntimeError};
use crate::scheduler::queue::JobQueue;

/// Deadlines applied to runtime calls
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    /// Pull (including draining progress), create, start, logs and remove
    pub call: Duration,
    /// Waiting for the container to exit
    pub job: Duration,
}

impl From<&Config> for Timeouts {
    fn from(config: &Config) -> Self {
        Self {
            call: config.call_timeout,
            job: config.job_timeout,
        }
    }
}

/// Result of a `run_*` request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// The queue had nothing to run
    Empty,
    /// No pending job has this ID
    NotFound(Uuid),
    /// The job was executed and reached a terminal status
    Finished { id: Uuid, status: JobStatus },
}

#[derive(Debug, Error)]
pub enum EnqueueError {
    #[error("job {0} is already queued")]
    AlreadyQueued(Uuid),

    #[error("job {id} is {status}, only pending jobs can be queued")]
    NotPending { id: Uuid, status: JobStatus },

    /// The job is queued in memory but has no durable record
    #[error("job {id} queued but not persisted: {source}")]
    Persist {
        id: Uuid,
        #[source]
        source: StoreError,
    },
}

/// Execution step that can fail a job
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Pull,
    Create,
    Start,
    Wait,
    Logs,
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Step::Pull => "pull image",
            Step::Create => "create container",
            Step::Start => "start container",
            Step::Wait => "wait for container",
            Step::Logs => "read container logs",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Error)]
#[error("{step} failed: {source}")]
pub struct StepFailure {
    pub step: Step,
    #[source]
    pub source: RuntimeError,
    /// Container created before the failing step, still to be removed
    pub container: Option<ContainerId>,
}

/// Output of a successful container run
struct Execution {
    container: ContainerId,
    log: String,
    exit_code: i64,
}

pub struct Scheduler {
    queue: JobQueue,
    store: Arc<dyn JobStore>,
    runtime: Arc<dyn ContainerRuntime>,
    timeouts: Timeouts,
}

impl Scheduler {
    /// Builds a scheduler and rehydrates the queue from the store.
    ///
    /// Only `Pending` records are queued. Records left `Running` by an
    /// interrupted process are reported and left alone.
    pub async fn new(
        store: Arc<dyn JobStore>,
        runtime: Arc<dyn ContainerRuntime>,
        timeouts: Timeouts,
    ) -> Result<Self, StoreError> {
        let queue: JobQueue = store
            .load_all()
            .await?
            .into_iter()
            .filter(|job| match job.status {
                JobStatus::Pending => true,
                JobStatus::Running => {
                    warn!(
                        job_id = %job.id,
                        "Job was interrupted while running and will not be retried"
                    );
                    false
                }
                JobStatus::Complete | JobStatus::Failed => false,
            })
            .collect();

        info!("Loaded {} pending job(s)", queue.len());

        Ok(Self {
            queue,
            store,
            runtime,
            timeouts,
        })
    }

    /// Queues a pending job and persists it.
    ///
    /// On [`EnqueueError::Persist`] the job is still queued for the lifetime of
    /// this scheduler.
    pub async fn add_job(&mut self, job: Job) -> Result<(), EnqueueError> {
        if job.status != JobStatus::Pending {
            return Err(EnqueueError::NotPending {
                id: job.id,
                status: job.status,
            });
        }
        if self.queue.contains(&job.id) {
            return Err(EnqueueError::AlreadyQueued(job.id));
        }

        let id = job.id;
        let persisted = self.store.insert(&job).await;
        self.queue.append(job);

        match persisted {
            Ok(()) => {
                info!(job_id = %id, "Job queued");
                Ok(())
            }
            Err(source) => {
                warn!(job_id = %id, "Job queued but could not be persisted: {}", source);
                Err(EnqueueError::Persist { id, source })
            }
        }
    }

    /// Pending jobs, oldest first
    pub fn list_pending(&self) -> Vec<Job> {
        self.queue.snapshot()
    }

    /// Runs the oldest pending job
    pub async fn run_next(&mut self, cancel: &CancellationToken) -> RunOutcome {
        match self.queue.pop_front() {
            Some(job) => self.execute(job, cancel).await,
            None => {
                info!("No jobs to run");
                RunOutcome::Empty
            }
        }
    }

    /// Runs a specific pending job, leaving the rest of the queue in order
    pub async fn run_by_id(&mut self, id: Uuid, cancel: &CancellationToken) -> RunOutcome {
        match self.queue.pop_by_id(&id) {
            Some(job) => self.execute(job, cancel).await,
            None => {
                info!(job_id = %id, "Job not found in queue");
                RunOutcome::NotFound(id)
            }
        }
    }

    async fn execute(&self, mut job: Job, cancel: &CancellationToken) -> RunOutcome {
        let id = job.id;
        info!(job_id = %id, image = %job.image, command = %job.command, "Running job");

        if let Err(e) = job.mark_running() {
            error!("{}", e);
            return RunOutcome::Finished {
                id,
                status: job.status,
            };
        }
        self.persist(&job).await;

        match self.run_container(&job, cancel).await {
            Ok(execution) => {
                let Execution {
                    container,
                    log,
                    exit_code,
                } = execution;

                if let Err(e) = job.mark_complete(log, Some(exit_code)) {
                    error!("{}", e);
                }
                self.persist(&job).await;
                info!(job_id = %id, exit_code, "Job complete");

                self.remove(id, &container).await;
            }
            Err(failure) => {
                error!(job_id = %id, "Job failed: {}", failure);
                if let Err(e) = job.mark_failed(failure.to_string()) {
                    error!("{}", e);
                }
                self.persist(&job).await;

                if let Some(container) = &failure.container {
                    self.remove(id, container).await;
                }
            }
        }

        RunOutcome::Finished {
            id,
            status: job.status,
        }
    }

    /// Pull, create, start, wait and read logs, stopping at the first failure
    async fn run_container(
        &self,
        job: &Job,
        cancel: &CancellationToken,
    ) -> Result<Execution, StepFailure> {
        let call = self.timeouts.call;

        guarded("pull", call, cancel, async {
            let progress = self.runtime.pull_image(&job.image).await?;
            drain(progress, |line| {
                debug!(job_id = %job.id, "pull: {}", line.trim_end())
            })
            .await
        })
        .await
        .map_err(failed_at(Step::Pull, None))?;

        let spec = ContainerSpec::new(&job.image, &job.command, job.cpu, job.memory);
        let container = guarded("create", call, cancel, self.runtime.create_container(&spec))
            .await
            .map_err(failed_at(Step::Create, None))?;

        guarded("start", call, cancel, self.runtime.start_container(&container))
            .await
            .map_err(failed_at(Step::Start, Some(&container)))?;

        let exit_code = guarded(
            "wait",
            self.timeouts.job,
            cancel,
            self.runtime.wait_for_exit(&container),
        )
        .await
        .map_err(failed_at(Step::Wait, Some(&container)))?;
        debug!(job_id = %job.id, exit_code, "Container exited");

        let log = guarded("logs", call, cancel, async {
            let stream = self.runtime.fetch_logs(&container).await?;
            let mut log = String::new();
            drain(stream, |chunk| log.push_str(&chunk)).await?;
            Ok::<_, RuntimeError>(log)
        })
        .await
        .map_err(failed_at(Step::Logs, Some(&container)))?;

        Ok(Execution {
            container,
            log,
            exit_code,
        })
    }

    /// Force-removes a container, stopping it if still running.
    ///
    /// Only the deadline applies; cleanup still happens after cancellation.
    async fn remove(&self, id: Uuid, container: &ContainerId) {
        let removal = with_deadline(
            "remove",
            self.timeouts.call,
            self.runtime.remove_container(container),
        )
        .await;
        if let Err(e) = removal {
            warn!(job_id = %id, container = %container, "Failed to remove container: {}", e);
        }
    }

    async fn persist(&self, job: &Job) {
        if let Err(e) = self.store.update(job).await {
            error!(job_id = %job.id, status = %job.status, "Failed to persist job: {}", e);
        }
    }
}

fn failed_at(
    step: Step,
    container: Option<&ContainerId>,
) -> impl FnOnce(RuntimeError) -> StepFailure {
    let container = container.cloned();
    move |source| StepFailure {
        step,
        source,
        container,
    }
}

/// Reads a stream to its end, surfacing the first error item
async fn drain(
    mut stream: OutputStream,
    mut sink: impl FnMut(String),
) -> Result<(), RuntimeError> {
    while let Some(item) = stream.recv().await {
        sink(item?);
    }
    Ok(())
}

async fn with_deadline<T, F>(op: &'static str, limit: Duration, fut: F) -> Result<T, RuntimeError>
where
    F: Future<Output = Result<T, RuntimeError>>,
{
    tokio::time::timeout(limit, fut)
        .await
        .unwrap_or(Err(RuntimeError::TimedOut { op, after: limit }))
}

async fn guarded<T, F>(
    op: &'static str,
    limit: Duration,
    cancel: &CancellationToken,
    fut: F,
) -> Result<T, RuntimeError>
where
    F: Future<Output = Result<T, RuntimeError>>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(RuntimeError::Cancelled { op }),
        res = with_deadline(op, limit, fut) => res,
    }
}
