//! Settings file management

use serde::{Deserialize, Serialize};

use crate::logs::LogLevel;

/// Console settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Log level
    #[serde(default)]
    pub log_level: LogLevel,

    /// Emit process logs as JSON
    #[serde(default)]
    pub log_json: bool,

    /// Also write process logs to the layout's log directory
    #[serde(default)]
    pub log_to_file: bool,

    /// Local HTTP API
    #[serde(default)]
    pub server: ServerSettings,

    /// Number of jobs allowed to run at once
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Finished jobs kept for status queries; older ones are evicted first
    #[serde(default = "default_retained_jobs")]
    pub retained_jobs: usize,

    /// Remote execution over ssh
    #[serde(default)]
    pub ssh: SshSettings,

    /// Directory-service client tools
    #[serde(default)]
    pub directory: DirectorySettings,

    /// Time-series sink for collected logs
    #[serde(default)]
    pub influxdb: InfluxSettings,

    /// Periodic log collection
    #[serde(default)]
    pub collector: CollectorSettings,

    /// Log shipping rollout behaviour
    #[serde(default)]
    pub log_shipping: LogShippingSettings,

    /// Grace period for in-flight work at shutdown, in seconds
    #[serde(default = "default_shutdown_delay")]
    pub max_shutdown_delay_secs: u64,
}

fn default_true() -> bool {
    true
}

fn default_workers() -> usize {
    4
}

fn default_retained_jobs() -> usize {
    200
}

fn default_shutdown_delay() -> u64 {
    30
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            log_level: LogLevel::Info,
            log_json: false,
            log_to_file: false,
            server: ServerSettings::default(),
            workers: default_workers(),
            retained_jobs: default_retained_jobs(),
            ssh: SshSettings::default(),
            directory: DirectorySettings::default(),
            influxdb: InfluxSettings::default(),
            collector: CollectorSettings::default(),
            log_shipping: LogShippingSettings::default(),
            max_shutdown_delay_secs: default_shutdown_delay(),
        }
    }
}

/// HTTP API bind address
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSettings {
    #[serde(default = "default_server_host")]
    pub host: String,

    #[serde(default = "default_server_port")]
    pub port: u16,
}

fn default_server_host() -> String {
    "127.0.0.1".to_string()
}

fn default_server_port() -> u16 {
    5000
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: default_server_host(),
            port: default_server_port(),
        }
    }
}

/// SSH client settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SshSettings {
    /// Path to the ssh binary
    #[serde(default = "default_ssh_binary")]
    pub binary: String,

    /// Remote login user
    #[serde(default = "default_ssh_user")]
    pub user: String,

    #[serde(default = "default_ssh_port")]
    pub port: u16,

    /// Private key; the ssh agent/config is used when absent
    #[serde(default)]
    pub identity_file: Option<String>,

    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// Refuse hosts whose key is not already known
    #[serde(default)]
    pub strict_host_key_checking: bool,

    /// Directory for connection multiplexing sockets
    #[serde(default = "default_control_dir")]
    pub control_dir: String,
}

fn default_ssh_binary() -> String {
    "ssh".to_string()
}

fn default_ssh_user() -> String {
    "root".to_string()
}

fn default_ssh_port() -> u16 {
    22
}

fn default_connect_timeout() -> u64 {
    10
}

fn default_control_dir() -> String {
    "/tmp".to_string()
}

impl Default for SshSettings {
    fn default() -> Self {
        Self {
            binary: default_ssh_binary(),
            user: default_ssh_user(),
            port: default_ssh_port(),
            identity_file: None,
            connect_timeout_secs: default_connect_timeout(),
            strict_host_key_checking: false,
            control_dir: default_control_dir(),
        }
    }
}

/// OpenLDAP client tool settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DirectorySettings {
    #[serde(default = "default_ldapsearch")]
    pub ldapsearch: String,

    #[serde(default = "default_ldapmodify")]
    pub ldapmodify: String,

    /// Port of the directory's ldaps listener
    #[serde(default = "default_ldaps_port")]
    pub port: u16,

    /// Accept self-signed directory certificates
    #[serde(default = "default_true")]
    pub allow_self_signed: bool,
}

fn default_ldapsearch() -> String {
    "ldapsearch".to_string()
}

fn default_ldapmodify() -> String {
    "ldapmodify".to_string()
}

fn default_ldaps_port() -> u16 {
    1636
}

impl Default for DirectorySettings {
    fn default() -> Self {
        Self {
            ldapsearch: default_ldapsearch(),
            ldapmodify: default_ldapmodify(),
            port: default_ldaps_port(),
            allow_self_signed: true,
        }
    }
}

/// InfluxDB settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InfluxSettings {
    #[serde(default = "default_influx_url")]
    pub url: String,

    #[serde(default = "default_influx_db")]
    pub database: String,
}

fn default_influx_url() -> String {
    "http://localhost:8086".to_string()
}

fn default_influx_db() -> String {
    "gluu_logs".to_string()
}

impl Default for InfluxSettings {
    fn default() -> Self {
        Self {
            url: default_influx_url(),
            database: default_influx_db(),
        }
    }
}

/// Log collector worker settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectorSettings {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default = "default_collect_interval")]
    pub interval_secs: u64,

    /// File the shipping agent writes collected logs to
    #[serde(default = "default_remote_log_path")]
    pub remote_log_path: String,
}

fn default_collect_interval() -> u64 {
    60
}

pub fn default_remote_log_path() -> String {
    "/tmp/gluu-filebeat".to_string()
}

impl Default for CollectorSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            interval_secs: default_collect_interval(),
            remote_log_path: default_remote_log_path(),
        }
    }
}

/// What setup does when offline mode finds a host without the shipping agent
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OfflineMissingAgent {
    /// Stop the whole rollout at the first such host
    #[default]
    AbortRun,
    /// Report the host and carry on with the rest
    SkipHost,
}

/// Log shipping settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LogShippingSettings {
    #[serde(default)]
    pub offline_missing_agent: OfflineMissingAgent,
}
