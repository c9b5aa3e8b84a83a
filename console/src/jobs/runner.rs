//! Background job runner.
//!
//! Every submitted procedure gets a job id and a [`JobLog`], then runs on the
//! tokio runtime once it holds one of the pool's worker permits. A job keeps
//! its permit until the procedure returns; hosts inside a procedure are
//! driven sequentially by the procedure itself.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use console_api::{JobState, JobStatusResponse, ProcedureRequest, Severity};
use futures::FutureExt;
use tokio::sync::{RwLock, Semaphore};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::errors::ConsoleError;
use crate::jobs::fsm::JobEvent;
use crate::jobs::log::{JobLog, ProgressSink};

/// Runs a procedure against a progress sink
#[async_trait]
pub trait ProcedureExecutor: Send + Sync {
    /// `Ok(false)` is a logged abort, `Err` an infrastructure fault
    async fn execute(
        &self,
        request: &ProcedureRequest,
        sink: &dyn ProgressSink,
    ) -> Result<bool, ConsoleError>;
}

/// Finished jobs kept unless configured otherwise
pub const DEFAULT_RETAINED_JOBS: usize = 200;

/// Job runner with a fixed-size worker pool
pub struct JobRunner {
    executor: Arc<dyn ProcedureExecutor>,
    workers: usize,
    retained: usize,
    permits: Arc<Semaphore>,
    jobs: RwLock<HashMap<Uuid, JobLog>>,
    closing: AtomicBool,
}

impl JobRunner {
    pub fn new(executor: Arc<dyn ProcedureExecutor>, workers: usize) -> Self {
        let workers = workers.max(1);
        Self {
            executor,
            workers,
            retained: DEFAULT_RETAINED_JOBS,
            permits: Arc::new(Semaphore::new(workers)),
            jobs: RwLock::new(HashMap::new()),
            closing: AtomicBool::new(false),
        }
    }

    /// Keep at most `retained` finished jobs
    pub fn with_retention(mut self, retained: usize) -> Self {
        self.retained = retained;
        self
    }

    /// Record the job as queued and spawn it, returning its id
    pub async fn submit(&self, request: ProcedureRequest) -> Result<Uuid, ConsoleError> {
        if self.closing.load(Ordering::SeqCst) {
            return Err(ConsoleError::JobError(
                "job runner is shutting down".to_string(),
            ));
        }

        let job_id = Uuid::new_v4();
        let log = JobLog::new(job_id, request.name());
        {
            let mut jobs = self.jobs.write().await;
            evict_finished(&mut jobs, self.retained);
            jobs.insert(job_id, log.clone());
        }
        info!(%job_id, "Queued {}", request.name());

        let executor = self.executor.clone();
        let permits = self.permits.clone();
        tokio::spawn(async move {
            let _permit = match permits.acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => {
                    let _ = log.transition(JobEvent::Fail("worker pool closed".to_string()));
                    return;
                }
            };
            let run = AssertUnwindSafe(run_job(executor.as_ref(), &request, &log));
            if run.catch_unwind().await.is_err() {
                let message = format!("{} panicked", request.name());
                log.log(None, Severity::Error, &message);
                if let Err(e) = log.transition(JobEvent::Fail(message)) {
                    error!(%job_id, "{}", e);
                }
            }
        });

        Ok(job_id)
    }

    pub async fn status(&self, job_id: Uuid) -> Option<JobStatusResponse> {
        self.jobs.read().await.get(&job_id).map(JobLog::status)
    }

    pub async fn log(&self, job_id: Uuid) -> Option<JobLog> {
        self.jobs.read().await.get(&job_id).cloned()
    }

    /// Wait until `job_id` reaches a terminal state
    pub async fn wait(&self, job_id: Uuid, poll: Duration) -> Option<JobStatusResponse> {
        let log = self.log(job_id).await?;
        while !log.state().is_terminal() {
            tokio::time::sleep(poll).await;
        }
        Some(log.status())
    }

    pub async fn active_jobs(&self) -> usize {
        self.jobs
            .read()
            .await
            .values()
            .filter(|log| !log.state().is_terminal())
            .count()
    }

    /// Refuse new jobs and wait for running ones, up to `timeout`
    pub async fn shutdown(&self, timeout: Duration) -> Result<(), ConsoleError> {
        self.closing.store(true, Ordering::SeqCst);
        let drain = self.permits.acquire_many(self.workers as u32);
        match tokio::time::timeout(timeout, drain).await {
            Ok(Ok(_all)) => {
                self.permits.close();
                info!("Job runner drained");
                Ok(())
            }
            Ok(Err(e)) => Err(ConsoleError::ShutdownError(e.to_string())),
            Err(_) => {
                self.permits.close();
                let active = self.active_jobs().await;
                warn!("{} job(s) still running after {:?}", active, timeout);
                Err(ConsoleError::ShutdownError(format!(
                    "{} job(s) still running",
                    active
                )))
            }
        }
    }
}

/// Drop the oldest finished jobs until at most `retained` remain
fn evict_finished(jobs: &mut HashMap<Uuid, JobLog>, retained: usize) {
    let mut finished: Vec<(Uuid, _)> = jobs
        .iter()
        .filter_map(|(id, log)| log.finished_at().map(|at| (*id, at)))
        .collect();
    if finished.len() <= retained {
        return;
    }
    finished.sort_by_key(|(_, at)| *at);
    let excess = finished.len() - retained;
    for (id, _) in finished.into_iter().take(excess) {
        jobs.remove(&id);
    }
    debug!("Evicted {} finished job(s)", excess);
}

async fn run_job(executor: &dyn ProcedureExecutor, request: &ProcedureRequest, log: &JobLog) {
    let job_id = log.job_id();
    if let Err(e) = log.transition(JobEvent::Start) {
        error!(%job_id, "{}", e);
        return;
    }
    info!(%job_id, "Running {}", request.name());

    let event = match executor.execute(request, log).await {
        Ok(true) => JobEvent::Succeed,
        Ok(false) => JobEvent::Fail(format!("{} aborted", request.name())),
        Err(e) => {
            log.log(None, Severity::Error, &e.to_string());
            JobEvent::Fail(e.to_string())
        }
    };

    match log.transition(event) {
        Ok(JobState::Succeeded) => info!(%job_id, "{} succeeded", request.name()),
        Ok(state) => warn!(%job_id, "{} finished as {:?}", request.name(), state),
        Err(e) => error!(%job_id, "{}", e),
    }
}
