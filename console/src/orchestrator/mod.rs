//! Provisioning procedures driven across the managed fleet

pub mod cache;
pub mod collect;
pub mod context;
pub mod filebeat;
pub mod logship;
pub mod redis_conf;
pub mod replication;
pub mod status;
pub mod templates;
pub mod tunnel;

pub use context::{Orchestrator, OrchestratorOptions};
