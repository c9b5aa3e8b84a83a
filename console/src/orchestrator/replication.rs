//! Multi-master replication topology changes

use tracing::warn;

use crate::directory::{
    ldaps_uri, replica_id, ReplicationProvider, CONFIG_DN, DIRECTORY_MANAGER_DN,
};
use crate::errors::ConsoleError;
use crate::jobs::log::{HostLog, ProgressSink};
use crate::models::server::Server;
use crate::orchestrator::context::Orchestrator;

impl Orchestrator {
    /// Refuse to take `server_id` out of the topology while another
    /// replicating server still pulls from it.
    ///
    /// Servers that cannot be reached are reported in the returned notices
    /// and do not block the removal.
    pub async fn check_removal(&self, server_id: u64) -> Result<Vec<String>, ConsoleError> {
        let servers = self.store.servers().await?;
        let target = servers
            .iter()
            .find(|s| s.id == server_id)
            .ok_or_else(|| ConsoleError::NotFound(format!("server {}", server_id)))?;

        let mut notices = Vec::new();
        for other in servers.iter().filter(|s| s.mmr && s.id != server_id) {
            let uri = ldaps_uri(&other.hostname, self.options.directory_port);
            let conn = match self
                .directory
                .connect(&uri, CONFIG_DN, &other.ldap_password)
                .await
            {
                Ok(conn) => conn,
                Err(e) => {
                    let notice = format!(
                        "Connection to LDAPserver {} at port {} was failed: {}",
                        other.hostname, self.options.directory_port, e
                    );
                    warn!("{}", notice);
                    notices.push(notice);
                    continue;
                }
            };

            let providers = match conn.replication_providers().await {
                Ok(providers) => providers,
                Err(e) => {
                    let notice = format!("Reading providers of {} failed: {}", other.hostname, e);
                    warn!("{}", notice);
                    notices.push(notice);
                    continue;
                }
            };

            if providers.iter().any(|p| target.is_named(p)) {
                return Err(ConsoleError::TopologyError(format!(
                    "This server is a provider for Ldap Server {}. \
                     Please first remove this server as provider.",
                    other.hostname
                )));
            }
        }
        Ok(notices)
    }

    /// Make every other replicating server an upstream provider of `server_id`
    pub async fn deploy_replication_config(
        &self,
        server_id: u64,
        sink: &dyn ProgressSink,
    ) -> Result<bool, ConsoleError> {
        let servers = self.store.servers().await?;
        let target = find(&servers, server_id)?;
        let log = HostLog::new(sink, server_id);

        let uri = ldaps_uri(&target.hostname, self.options.directory_port);
        let conn = match self
            .directory
            .connect(&uri, CONFIG_DN, &target.ldap_password)
            .await
        {
            Ok(conn) => conn,
            Err(e) => {
                log.error(format!("Couldn't connect to LDAP. Error: {}", e));
                return Ok(false);
            }
        };

        let existing = match conn.replication_providers().await {
            Ok(providers) => providers,
            Err(e) => {
                log.warning(format!("Reading current providers failed: {}", e));
                Vec::new()
            }
        };

        let mut peers: Vec<&Server> = servers
            .iter()
            .filter(|s| s.mmr && s.id != server_id)
            .collect();
        peers.sort_by_key(|s| s.id);

        for peer in peers {
            if existing.iter().any(|p| peer.is_named(p)) {
                log.debug(format!("{} is already a provider", peer.hostname));
                continue;
            }
            let rid = match replica_id(peer.id) {
                Ok(rid) => rid,
                Err(e) => {
                    log.fail(format!("Skipping provider {}: {}", peer.hostname, e));
                    continue;
                }
            };
            let provider = ReplicationProvider {
                rid,
                uri: ldaps_uri(&peer.hostname, self.options.directory_port),
                bind_dn: DIRECTORY_MANAGER_DN.to_string(),
                credentials: peer.ldap_password.clone(),
            };

            log.info(format!("Adding {} as provider", peer.hostname));
            match conn.add_replication_provider(&provider).await {
                Ok(true) => log.success(format!("{} added as provider", peer.hostname)),
                Ok(false) => log.fail(format!("Adding provider {} failed", peer.hostname)),
                Err(e) => log.fail(format!("Adding provider {} failed: {}", peer.hostname, e)),
            }
        }

        self.store
            .edit_server(server_id, Box::new(|s| s.mmr = true))
            .await?;
        Ok(true)
    }

    /// Drop all upstream providers of `server_id` and leave the topology
    pub async fn remove_replication_deployment(
        &self,
        server_id: u64,
        sink: &dyn ProgressSink,
    ) -> Result<bool, ConsoleError> {
        let servers = self.store.servers().await?;
        let target = find(&servers, server_id)?;
        let log = HostLog::new(sink, server_id);

        let uri = ldaps_uri(&target.hostname, self.options.directory_port);
        let conn = match self
            .directory
            .connect(&uri, CONFIG_DN, &target.ldap_password)
            .await
        {
            Ok(conn) => conn,
            Err(e) => {
                log.error(format!("Couldn't connect to LDAP. Error: {}", e));
                return Ok(false);
            }
        };

        log.info("Removing replication providers");
        match conn.remove_replication_providers().await {
            Ok(true) => log.success("Replication providers removed"),
            Ok(false) => {
                log.error("Removing replication providers failed");
                return Ok(false);
            }
            Err(e) => {
                log.error(format!("Removing replication providers failed: {}", e));
                return Ok(false);
            }
        }

        self.store
            .edit_server(server_id, Box::new(|s| s.mmr = false))
            .await?;
        Ok(true)
    }
}

fn find(servers: &[Server], id: u64) -> Result<&Server, ConsoleError> {
    servers
        .iter()
        .find(|s| s.id == id)
        .ok_or_else(|| ConsoleError::NotFound(format!("server {}", id)))
}
