//! Reachability of the cache engine and tunnel across the fleet

use console_api::CacheStatusResponse;
use futures::future::join_all;
use tracing::debug;

use crate::errors::ConsoleError;
use crate::models::fleet::FleetContext;
use crate::orchestrator::context::Orchestrator;
use crate::orchestrator::tunnel::CACHE_PORT;
use crate::remote::session::HostSession;

const PROBE_TIMEOUT_SECS: u64 = 3;

/// Remote one-liner that exits 0 when `host:port` accepts a TCP connection
pub fn probe_command(host: &str, port: u16) -> String {
    format!(
        "timeout {} bash -c 'exec 3<>/dev/tcp/{}/{}'",
        PROBE_TIMEOUT_SECS, host, port
    )
}

async fn probe(session: &HostSession, host: &str, port: u16) -> bool {
    match session.run(&probe_command(host, port)).await {
        Ok(output) => output.success(),
        Err(e) => {
            debug!("probe {}:{} failed: {}", host, port, e);
            false
        }
    }
}

impl Orchestrator {
    /// Probe every server and cache server, keyed by address.
    ///
    /// Cache hosts report the engine and their tunnel listener; consumers
    /// report their local tunnel client under `stunnel`. Hosts are probed
    /// concurrently.
    pub async fn cache_status(&self) -> Result<CacheStatusResponse, ConsoleError> {
        let records = self.store.read().await?;
        let ctx = FleetContext::resolve(records.settings.clone(), &records.cache_servers);
        let tunnel_port = ctx.primary_cache.as_ref().map(|p| p.stunnel_port);

        let caches = join_all(records.cache_servers.iter().map(|cache| async move {
            let probed = match self.open_cache(cache).await {
                Ok(session) => {
                    let redis = probe(&session, "localhost", CACHE_PORT).await;
                    let stunnel = match tunnel_port {
                        Some(port) => probe(&session, &cache.ip, port).await,
                        None => false,
                    };
                    session.close().await?;
                    (redis, stunnel)
                }
                Err(e) => {
                    debug!("{} unreachable: {}", cache.hostname, e);
                    (false, false)
                }
            };
            Ok::<_, ConsoleError>((cache.ip.clone(), probed))
        }))
        .await;

        let servers = join_all(records.servers.iter().map(|server| async move {
            let probed = match self.open_server(server).await {
                Ok(session) => {
                    let up = tunnel_port.is_some()
                        && probe(&session, "localhost", CACHE_PORT).await;
                    session.close().await?;
                    Some(up)
                }
                Err(e) => {
                    debug!("{} unreachable: {}", server.hostname, e);
                    None
                }
            };
            Ok::<_, ConsoleError>((server.ip.clone(), probed))
        }))
        .await;

        let mut status = CacheStatusResponse::default();
        for result in caches {
            let (ip, (redis, stunnel)) = result?;
            status.redis.insert(ip.clone(), redis);
            status.stunnel.insert(ip, stunnel);
        }
        for result in servers {
            match result? {
                (ip, Some(up)) => {
                    status.stunnel.insert(ip, up);
                }
                (ip, None) => {
                    status.redis.insert(ip.clone(), false);
                    status.stunnel.insert(ip, false);
                }
            }
        }
        Ok(status)
    }
}
