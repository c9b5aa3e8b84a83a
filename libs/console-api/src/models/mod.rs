//! API models

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A provisioning procedure and its arguments, as submitted to the job runner
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "procedure", content = "args", rename_all = "snake_case")]
pub enum ProcedureRequest {
    /// Provision cache hosts, then wire consumers to them
    InstallCacheCluster {
        #[serde(default)]
        servers: Vec<u64>,
        #[serde(default)]
        cache_servers: Vec<u64>,
    },

    /// Disable the cache fleet and revert consumers
    UninstallCacheCluster {
        #[serde(default)]
        servers: Vec<u64>,
        #[serde(default)]
        cache_servers: Vec<u64>,
    },

    /// Install and configure the log shipping agent on every server
    SetupLogShipping {
        #[serde(default)]
        force_reinstall: bool,
    },

    /// Remove the log shipping agent from every server
    RemoveLogShipping,

    /// Pull shipped logs from one server into the time-series sink
    CollectLogs {
        server_id: u64,
        #[serde(default)]
        remote_log_path: Option<String>,
    },

    /// Add a server to the replication topology
    DeployReplicationConfig { server_id: u64 },

    /// Take a server out of the replication topology
    RemoveReplicationDeployment { server_id: u64 },
}

impl ProcedureRequest {
    /// Stable procedure name, used in job listings and logs
    pub fn name(&self) -> &'static str {
        match self {
            ProcedureRequest::InstallCacheCluster { .. } => "install_cache_cluster",
            ProcedureRequest::UninstallCacheCluster { .. } => "uninstall_cache_cluster",
            ProcedureRequest::SetupLogShipping { .. } => "setup_log_shipping",
            ProcedureRequest::RemoveLogShipping => "remove_log_shipping",
            ProcedureRequest::CollectLogs { .. } => "collect_logs",
            ProcedureRequest::DeployReplicationConfig { .. } => "deploy_replication_config",
            ProcedureRequest::RemoveReplicationDeployment { .. } => {
                "remove_replication_deployment"
            }
        }
    }
}

/// Job submission response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitJobResponse {
    pub job_id: Uuid,
    pub procedure: String,
}

/// Job lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Queued,
    Running,
    Succeeded,
    Failed,
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Succeeded | JobState::Failed)
    }
}

/// Severity of a job log entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Debug,
    Info,
    Success,
    Warning,
    Error,
    Fail,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Debug => "debug",
            Severity::Info => "info",
            Severity::Success => "success",
            Severity::Warning => "warning",
            Severity::Error => "error",
            Severity::Fail => "fail",
        }
    }
}

/// One entry of a job's progress log
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobLogEntry {
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host_id: Option<u64>,
    pub severity: Severity,
    pub message: String,
}

/// Job status polled by the UI
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobStatusResponse {
    pub job_id: Uuid,
    pub procedure: String,
    pub state: JobState,
    pub step: u32,
    pub created_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
    pub entries: Vec<JobLogEntry>,
}

/// Managed server summary
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSummary {
    pub id: u64,
    pub hostname: String,
    pub ip: String,
    pub os: Option<String>,
    pub primary: bool,
    pub mmr: bool,
    pub filebeat: bool,
    pub installed: bool,
}

/// Cache server summary
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheServerSummary {
    pub id: u64,
    pub hostname: String,
    pub ip: String,
    pub install_redis: bool,
    pub stunnel_port: u16,
    pub primary: bool,
    pub installed: bool,
}

/// Create or update a cache server
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheServerRequest {
    #[serde(default)]
    pub id: Option<u64>,
    pub hostname: String,
    pub ip: String,
    #[serde(default = "default_true")]
    pub install_redis: bool,
    #[serde(default)]
    pub redis_password: Option<String>,
    #[serde(default)]
    pub stunnel_port: Option<u16>,
    #[serde(default)]
    pub primary: Option<bool>,
}

fn default_true() -> bool {
    true
}

/// Reachability of the cache engine and tunnel, keyed by host address
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CacheStatusResponse {
    pub redis: BTreeMap<String, bool>,
    pub stunnel: BTreeMap<String, bool>,
}

/// Health check response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub service: String,
    pub version: String,
}

/// Version response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VersionResponse {
    pub version: String,
    pub git_hash: String,
    pub build_time: String,
}

/// Error body returned by non-2xx responses
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub message: String,
}
