//! Per-job progress log

use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use console_api::{JobLogEntry, JobState, JobStatusResponse, Severity};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::jobs::fsm::{JobEvent, JobFsm};

/// Append-only progress log of one running procedure
pub trait ProgressSink: Send + Sync {
    /// Append an entry, optionally attributed to a host
    fn log(&self, host_id: Option<u64>, severity: Severity, message: &str);

    /// Move the stage marker polled by the UI
    fn set_step(&self, step: u32);
}

/// Entries logged on behalf of one host
#[derive(Clone, Copy)]
pub struct HostLog<'a> {
    sink: &'a dyn ProgressSink,
    host_id: Option<u64>,
}

impl<'a> HostLog<'a> {
    pub fn new(sink: &'a dyn ProgressSink, host_id: u64) -> Self {
        Self {
            sink,
            host_id: Some(host_id),
        }
    }

    /// Entries not tied to any host
    pub fn global(sink: &'a dyn ProgressSink) -> Self {
        Self {
            sink,
            host_id: None,
        }
    }

    pub fn debug(&self, message: impl AsRef<str>) {
        self.sink.log(self.host_id, Severity::Debug, message.as_ref());
    }

    pub fn info(&self, message: impl AsRef<str>) {
        self.sink.log(self.host_id, Severity::Info, message.as_ref());
    }

    pub fn success(&self, message: impl AsRef<str>) {
        self.sink.log(self.host_id, Severity::Success, message.as_ref());
    }

    pub fn warning(&self, message: impl AsRef<str>) {
        self.sink.log(self.host_id, Severity::Warning, message.as_ref());
    }

    pub fn error(&self, message: impl AsRef<str>) {
        self.sink.log(self.host_id, Severity::Error, message.as_ref());
    }

    pub fn fail(&self, message: impl AsRef<str>) {
        self.sink.log(self.host_id, Severity::Fail, message.as_ref());
    }
}

/// Everything known about a job
#[derive(Debug)]
pub struct JobRecord {
    pub job_id: Uuid,
    pub procedure: String,
    pub fsm: JobFsm,
    pub step: u32,
    pub created_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub entries: Vec<JobLogEntry>,
}

impl JobRecord {
    pub fn new(job_id: Uuid, procedure: impl Into<String>) -> Self {
        Self {
            job_id,
            procedure: procedure.into(),
            fsm: JobFsm::new(),
            step: 0,
            created_at: Utc::now(),
            finished_at: None,
            entries: Vec::new(),
        }
    }

    pub fn to_status(&self) -> JobStatusResponse {
        JobStatusResponse {
            job_id: self.job_id,
            procedure: self.procedure.clone(),
            state: self.fsm.state(),
            step: self.step,
            created_at: self.created_at,
            finished_at: self.finished_at,
            error: self.fsm.error().map(str::to_string),
            entries: self.entries.clone(),
        }
    }
}

/// Shared handle to a job's record; the job runner writes, the API reads
#[derive(Debug, Clone)]
pub struct JobLog {
    record: Arc<Mutex<JobRecord>>,
}

impl JobLog {
    pub fn new(job_id: Uuid, procedure: impl Into<String>) -> Self {
        Self {
            record: Arc::new(Mutex::new(JobRecord::new(job_id, procedure))),
        }
    }

    fn lock(&self) -> MutexGuard<'_, JobRecord> {
        // a panicking writer leaves the record readable
        self.record.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn job_id(&self) -> Uuid {
        self.lock().job_id
    }

    pub fn state(&self) -> JobState {
        self.lock().fsm.state()
    }

    pub fn status(&self) -> JobStatusResponse {
        self.lock().to_status()
    }

    pub fn entries(&self) -> Vec<JobLogEntry> {
        self.lock().entries.clone()
    }

    pub fn step(&self) -> u32 {
        self.lock().step
    }

    pub fn finished_at(&self) -> Option<DateTime<Utc>> {
        self.lock().finished_at
    }

    /// Apply a lifecycle event, stamping the finish time on terminal states
    pub fn transition(&self, event: JobEvent) -> Result<JobState, String> {
        let mut record = self.lock();
        record.fsm.process(event)?;
        let state = record.fsm.state();
        if state.is_terminal() {
            record.finished_at = Some(Utc::now());
        }
        Ok(state)
    }
}

impl ProgressSink for JobLog {
    fn log(&self, host_id: Option<u64>, severity: Severity, message: &str) {
        let mut record = self.lock();
        let job_id = record.job_id;
        let host = host_id.map(|h| h.to_string()).unwrap_or_default();

        match severity {
            Severity::Debug => debug!(%job_id, %host, "{}", message),
            Severity::Info | Severity::Success => info!(%job_id, %host, "{}", message),
            Severity::Warning => warn!(%job_id, %host, "{}", message),
            Severity::Error | Severity::Fail => error!(%job_id, %host, "{}", message),
        }

        record.entries.push(JobLogEntry {
            timestamp: Utc::now(),
            host_id,
            severity,
            message: message.to_string(),
        });
    }

    fn set_step(&self, step: u32) {
        let mut record = self.lock();
        debug!(job_id = %record.job_id, "step {}", step);
        record.step = step;
    }
}
