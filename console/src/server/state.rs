//! Server state

use std::sync::Arc;

use crate::jobs::runner::JobRunner;
use crate::orchestrator::Orchestrator;

/// Server state shared across handlers
pub struct ServerState {
    pub runner: Arc<JobRunner>,
    pub orchestrator: Arc<Orchestrator>,
}

impl ServerState {
    pub fn new(runner: Arc<JobRunner>, orchestrator: Arc<Orchestrator>) -> Self {
        Self {
            runner,
            orchestrator,
        }
    }
}
