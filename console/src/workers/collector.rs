//! Periodic log collection from servers with log shipping enabled

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use tracing::{debug, error, info};

use crate::orchestrator::Orchestrator;
use crate::storage::settings::{default_remote_log_path, CollectorSettings};

/// Collector worker options
#[derive(Debug, Clone)]
pub struct Options {
    /// Collection interval
    pub interval: Duration,

    /// Initial delay before the first round
    pub initial_delay: Duration,

    /// File the shipping agent writes to on each server
    pub remote_log_path: String,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60),
            initial_delay: Duration::from_secs(5),
            remote_log_path: default_remote_log_path(),
        }
    }
}

impl Options {
    pub fn from_settings(settings: &CollectorSettings) -> Self {
        Self {
            interval: Duration::from_secs(settings.interval_secs.max(1)),
            remote_log_path: settings.remote_log_path.clone(),
            ..Default::default()
        }
    }
}

/// One collection round; returns the number of records written
pub async fn collect_round(options: &Options, orchestrator: &Orchestrator) -> usize {
    let servers = match orchestrator.store().servers().await {
        Ok(servers) => servers,
        Err(e) => {
            error!("Unable to read servers: {}", e);
            return 0;
        }
    };

    let mut written = 0;
    for server in servers.iter().filter(|s| s.filebeat) {
        match orchestrator
            .collect_logs(server.id, &options.remote_log_path)
            .await
        {
            Ok(n) => {
                debug!(host = %server.hostname, "{} log records written", n);
                written += n;
            }
            Err(e) => {
                error!(host = %server.hostname, "Log collection failed: {}", e);
            }
        }
    }
    written
}

/// Run the collector worker
pub async fn run<S, F>(
    options: &Options,
    orchestrator: &Orchestrator,
    sleep_fn: S,
    mut shutdown_signal: Pin<Box<dyn Future<Output = ()> + Send>>,
) where
    S: Fn(Duration) -> F,
    F: Future<Output = ()>,
{
    info!("Log collector worker starting...");

    sleep_fn(options.initial_delay).await;

    loop {
        tokio::select! {
            _ = &mut shutdown_signal => {
                info!("Log collector worker shutting down...");
                return;
            }
            _ = sleep_fn(options.interval) => {}
        }

        let written = collect_round(options, orchestrator).await;
        debug!("Collection round finished, {} records written", written);
    }
}
