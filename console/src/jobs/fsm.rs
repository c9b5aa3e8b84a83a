//! Finite state machine for a job's lifecycle

use console_api::JobState;

/// Job lifecycle event
#[derive(Debug, Clone)]
pub enum JobEvent {
    /// A worker picked the job up
    Start,

    /// The procedure returned success
    Succeed,

    /// The procedure aborted or raised
    Fail(String),
}

/// Job FSM
#[derive(Debug, Clone)]
pub struct JobFsm {
    state: JobState,
    error: Option<String>,
}

impl JobFsm {
    /// Create a new FSM in queued state
    pub fn new() -> Self {
        Self {
            state: JobState::Queued,
            error: None,
        }
    }

    pub fn state(&self) -> JobState {
        self.state
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// Process an event and transition state
    pub fn process(&mut self, event: JobEvent) -> Result<(), String> {
        let new_state = match (&self.state, &event) {
            (JobState::Queued, JobEvent::Start) => JobState::Running,

            (JobState::Running, JobEvent::Succeed) => JobState::Succeeded,
            (JobState::Running, JobEvent::Fail(err)) => {
                self.error = Some(err.clone());
                JobState::Failed
            }

            // a job that never got a worker (runtime shutting down)
            (JobState::Queued, JobEvent::Fail(err)) => {
                self.error = Some(err.clone());
                JobState::Failed
            }

            (state, event) => {
                return Err(format!("Invalid transition: {:?} -> {:?}", state, event));
            }
        };

        self.state = new_state;
        Ok(())
    }
}

impl Default for JobFsm {
    fn default() -> Self {
        Self::new()
    }
}
