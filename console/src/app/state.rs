//! Application state management

use std::sync::Arc;

use tracing::info;

use crate::app::options::AppOptions;
use crate::directory::openldap::OpenLdapTools;
use crate::errors::ConsoleError;
use crate::jobs::runner::JobRunner;
use crate::orchestrator::templates::Templates;
use crate::orchestrator::Orchestrator;
use crate::remote::ssh::SshConnector;
use crate::sink::influx::InfluxSink;
use crate::storage::store::{ConfigStore, FileConfigStore};

/// Main application state
pub struct AppState {
    /// Server, cache server and fleet settings records
    pub store: Arc<dyn ConfigStore>,

    /// Provisioning procedures
    pub orchestrator: Arc<Orchestrator>,

    /// Background job runner
    pub runner: Arc<JobRunner>,
}

impl AppState {
    /// Initialize application state
    pub async fn init(options: &AppOptions) -> Result<Self, ConsoleError> {
        info!("Initializing application state...");

        let layout = &options.storage.layout;
        layout.setup().await?;

        let store: Arc<dyn ConfigStore> = Arc::new(FileConfigStore::new(layout.store_file()));
        // fail early on an unreadable or invalid store
        let records = store.read().await?;
        info!(
            "Loaded {} servers and {} cache servers",
            records.servers.len(),
            records.cache_servers.len()
        );

        let orchestrator = Arc::new(Orchestrator::new(
            store.clone(),
            Arc::new(SshConnector::new(options.ssh.clone())),
            Arc::new(OpenLdapTools::new(options.directory.clone())),
            Arc::new(InfluxSink::new(&options.influxdb)?),
            Templates::with_overrides(layout.templates_dir()),
            options.orchestrator.clone(),
        ));

        let runner = Arc::new(
            JobRunner::new(orchestrator.clone(), options.workers)
                .with_retention(options.retained_jobs),
        );

        Ok(Self {
            store,
            orchestrator,
            runner,
        })
    }
}
