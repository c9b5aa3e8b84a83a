//! The orchestrator and the collaborators it drives

use std::sync::Arc;

use async_trait::async_trait;
use console_api::ProcedureRequest;

use crate::directory::DirectoryService;
use crate::errors::ConsoleError;
use crate::jobs::log::{HostLog, ProgressSink};
use crate::jobs::runner::ProcedureExecutor;
use crate::models::fleet::FleetSettings;
use crate::models::server::{CacheServer, Server};
use crate::orchestrator::templates::Templates;
use crate::remote::channel::{Connector, HostTarget};
use crate::remote::session::HostSession;
use crate::sink::PointSink;
use crate::storage::settings::{default_remote_log_path, OfflineMissingAgent, Settings};
use crate::storage::store::ConfigStore;

/// Orchestrator knobs taken from the console settings
#[derive(Debug, Clone)]
pub struct OrchestratorOptions {
    /// Port of the directory servers' ldaps listener
    pub directory_port: u16,

    /// Offline log-shipping behaviour for hosts missing the agent
    pub offline_missing_agent: OfflineMissingAgent,

    /// File the log shipping agent writes to
    pub remote_log_path: String,
}

impl Default for OrchestratorOptions {
    fn default() -> Self {
        Self {
            directory_port: 1636,
            offline_missing_agent: OfflineMissingAgent::default(),
            remote_log_path: default_remote_log_path(),
        }
    }
}

impl OrchestratorOptions {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            directory_port: settings.directory.port,
            offline_missing_agent: settings.log_shipping.offline_missing_agent,
            remote_log_path: settings.collector.remote_log_path.clone(),
        }
    }
}

/// Library of provisioning procedures
pub struct Orchestrator {
    pub(crate) store: Arc<dyn ConfigStore>,
    pub(crate) connector: Arc<dyn Connector>,
    pub(crate) directory: Arc<dyn DirectoryService>,
    pub(crate) points: Arc<dyn PointSink>,
    pub(crate) templates: Templates,
    pub(crate) options: OrchestratorOptions,
}

impl Orchestrator {
    pub fn new(
        store: Arc<dyn ConfigStore>,
        connector: Arc<dyn Connector>,
        directory: Arc<dyn DirectoryService>,
        points: Arc<dyn PointSink>,
        templates: Templates,
        options: OrchestratorOptions,
    ) -> Self {
        Self {
            store,
            connector,
            directory,
            points,
            templates,
            options,
        }
    }

    pub fn store(&self) -> &Arc<dyn ConfigStore> {
        &self.store
    }

    pub fn options(&self) -> &OrchestratorOptions {
        &self.options
    }

    pub(crate) async fn open_server(&self, server: &Server) -> Result<HostSession, ConsoleError> {
        HostSession::open(
            self.connector.as_ref(),
            &HostTarget::new(&server.hostname, &server.ip),
            server.os_family(),
        )
        .await
    }

    pub(crate) async fn open_cache(&self, cache: &CacheServer) -> Result<HostSession, ConsoleError> {
        HostSession::open(
            self.connector.as_ref(),
            &HostTarget::new(&cache.hostname, &cache.ip),
            cache.os_family(),
        )
        .await
    }
}

/// The opened session, or `None` after logging the failure as an error entry
pub(crate) fn session_or_log(
    log: &HostLog<'_>,
    opened: Result<HostSession, ConsoleError>,
) -> Option<HostSession> {
    match opened {
        Ok(session) => Some(session),
        Err(e) => {
            log.error(format!("SSH connection to server failed: {}", e));
            None
        }
    }
}

#[async_trait]
impl ProcedureExecutor for Orchestrator {
    async fn execute(
        &self,
        request: &ProcedureRequest,
        sink: &dyn ProgressSink,
    ) -> Result<bool, ConsoleError> {
        match request {
            ProcedureRequest::InstallCacheCluster {
                servers,
                cache_servers,
            } => self.install_cache_cluster(servers, cache_servers, sink).await,
            ProcedureRequest::UninstallCacheCluster {
                servers,
                cache_servers,
            } => self.uninstall_cache_cluster(servers, cache_servers, sink).await,
            ProcedureRequest::SetupLogShipping { force_reinstall } => {
                self.setup_log_shipping(*force_reinstall, sink).await
            }
            ProcedureRequest::RemoveLogShipping => self.remove_log_shipping(sink).await,
            ProcedureRequest::CollectLogs {
                server_id,
                remote_log_path,
            } => {
                let path = remote_log_path
                    .clone()
                    .unwrap_or_else(|| self.options.remote_log_path.clone());
                let written = self.collect_logs(*server_id, &path).await?;
                HostLog::new(sink, *server_id).info(format!("{} log records written", written));
                Ok(true)
            }
            ProcedureRequest::DeployReplicationConfig { server_id } => {
                self.deploy_replication_config(*server_id, sink).await
            }
            ProcedureRequest::RemoveReplicationDeployment { server_id } => {
                self.remove_replication_deployment(*server_id, sink).await
            }
        }
    }
}

/// A package identified by the binaries it installs
pub(crate) struct Package<'a> {
    pub label: &'a str,
    pub name: &'a str,
    pub binaries: &'a [&'a str],
}

/// Install `package` unless present, honouring offline mode.
///
/// `false` after logging an error when the package is missing offline or
/// still missing after the install.
pub(crate) async fn ensure_package(
    session: &HostSession,
    settings: &FleetSettings,
    package: &Package<'_>,
    log: &HostLog<'_>,
) -> Result<bool, ConsoleError> {
    if session.any_exists(package.binaries).await? {
        log.debug(format!("{} already installed", package.label));
        return Ok(true);
    }

    if settings.offline {
        log.error(format!(
            "{0} was not installed. Please install {0} and retry.",
            package.label
        ));
        return Ok(false);
    }

    log.info(format!("Installing {}", package.label));
    let output = session.install_package(package.name).await?;

    if !session.any_exists(package.binaries).await? {
        log.error(format!(
            "{} installation failed: {}",
            package.label,
            output.stderr.trim()
        ));
        return Ok(false);
    }
    log.success(format!("{} install successful", package.label));
    Ok(true)
}
