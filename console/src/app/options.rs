//! Application configuration options

use std::time::Duration;

use crate::orchestrator::OrchestratorOptions;
use crate::storage::layout::StorageLayout;
use crate::storage::settings::{DirectorySettings, InfluxSettings, Settings, SshSettings};
use crate::workers::collector;

/// Main application options
#[derive(Debug, Clone)]
pub struct AppOptions {
    /// Lifecycle configuration
    pub lifecycle: LifecycleOptions,

    /// Storage configuration
    pub storage: StorageOptions,

    /// Enable local HTTP server
    pub enable_socket_server: bool,

    /// Server configuration
    pub server: ServerOptions,

    /// Enable the periodic log collector
    pub enable_collector: bool,

    /// Log collector worker options
    pub collector: collector::Options,

    /// Jobs allowed to run at once
    pub workers: usize,

    /// Finished jobs kept in memory
    pub retained_jobs: usize,

    pub ssh: SshSettings,
    pub directory: DirectorySettings,
    pub influxdb: InfluxSettings,
    pub orchestrator: OrchestratorOptions,
}

impl Default for AppOptions {
    fn default() -> Self {
        Self {
            lifecycle: LifecycleOptions::default(),
            storage: StorageOptions::default(),
            enable_socket_server: true,
            server: ServerOptions::default(),
            enable_collector: false,
            collector: collector::Options::default(),
            workers: 4,
            retained_jobs: 200,
            ssh: SshSettings::default(),
            directory: DirectorySettings::default(),
            influxdb: InfluxSettings::default(),
            orchestrator: OrchestratorOptions::default(),
        }
    }
}

impl AppOptions {
    pub fn from_settings(layout: StorageLayout, settings: &Settings) -> Self {
        Self {
            lifecycle: LifecycleOptions {
                max_shutdown_delay: Duration::from_secs(settings.max_shutdown_delay_secs),
            },
            storage: StorageOptions { layout },
            enable_socket_server: true,
            server: ServerOptions {
                host: settings.server.host.clone(),
                port: settings.server.port,
            },
            enable_collector: settings.collector.enabled,
            collector: collector::Options::from_settings(&settings.collector),
            workers: settings.workers.max(1),
            retained_jobs: settings.retained_jobs,
            ssh: settings.ssh.clone(),
            directory: settings.directory.clone(),
            influxdb: settings.influxdb.clone(),
            orchestrator: OrchestratorOptions::from_settings(settings),
        }
    }
}

/// Lifecycle options for the console
#[derive(Debug, Clone)]
pub struct LifecycleOptions {
    /// Maximum delay for graceful shutdown, running jobs included
    pub max_shutdown_delay: Duration,
}

impl Default for LifecycleOptions {
    fn default() -> Self {
        Self {
            max_shutdown_delay: Duration::from_secs(30),
        }
    }
}

/// Storage configuration options
#[derive(Debug, Clone, Default)]
pub struct StorageOptions {
    /// Storage layout paths
    pub layout: StorageLayout,
}

/// Local HTTP server options
#[derive(Debug, Clone)]
pub struct ServerOptions {
    /// Host to bind to
    pub host: String,

    /// Port to listen on
    pub port: u16,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 5000,
        }
    }
}
