//! Cache cluster install and uninstall.
//!
//! Both procedures run in two phases. Phase 1 walks the cache hosts, phase 2
//! the consumer hosts, each strictly in the order given. Phase 2 never starts
//! unless every cache host made it through phase 1, because consumers need
//! the primary's certificate and a listening tunnel to connect to.

use secrecy::{ExposeSecret, SecretString};

use crate::directory::{ldaps_uri, DIRECTORY_MANAGER_DN};
use crate::errors::ConsoleError;
use crate::jobs::log::{HostLog, ProgressSink};
use crate::models::fleet::FleetContext;
use crate::models::server::{CacheServer, Server};
use crate::orchestrator::context::{ensure_package, session_or_log, Orchestrator, Package};
use crate::orchestrator::redis_conf::rewrite_requirepass;
use crate::orchestrator::tunnel::{
    CertificateBundle, TunnelSide, CACHE_PORT, STUNNEL_CONF, STUNNEL_PEM,
};
use crate::remote::session::HostSession;
use crate::storage::store::Records;
use crate::utils::sha256_hash;

const REDIS_BINARY: &str = "/usr/bin/redis-server";

/// Stage marker after the cache hosts are done
pub const STEP_CACHE_HOSTS_DONE: u32 = 2;
/// Stage marker after the consumers are done
pub const STEP_CONSUMERS_DONE: u32 = 3;

/// Look up records by id, keeping the requested order
fn select<T: Clone>(
    records: &[T],
    ids: &[u64],
    id_of: impl Fn(&T) -> u64,
    what: &str,
) -> Result<Vec<T>, ConsoleError> {
    ids.iter()
        .map(|id| {
            records
                .iter()
                .find(|r| id_of(r) == *id)
                .cloned()
                .ok_or_else(|| ConsoleError::NotFound(format!("{} {}", what, id)))
        })
        .collect()
}

fn selection(
    records: &Records,
    server_ids: &[u64],
    cache_ids: &[u64],
) -> Result<(Vec<Server>, Vec<CacheServer>), ConsoleError> {
    Ok((
        select(&records.servers, server_ids, |s| s.id, "server")?,
        select(&records.cache_servers, cache_ids, |c| c.id, "cache server")?,
    ))
}

impl Orchestrator {
    /// Provision the cache hosts, then wire the consumers to them
    pub async fn install_cache_cluster(
        &self,
        server_ids: &[u64],
        cache_ids: &[u64],
        sink: &dyn ProgressSink,
    ) -> Result<bool, ConsoleError> {
        let records = self.store.read().await?;
        let ctx = FleetContext::resolve(records.settings.clone(), &records.cache_servers);
        let (servers, cache_servers) = selection(&records, server_ids, cache_ids)?;

        let Some(primary) = ctx.primary_cache.clone() else {
            HostLog::global(sink).error("No cache server is registered");
            return Ok(false);
        };

        let mut bundle: Option<CertificateBundle> = None;

        for cache in &cache_servers {
            let log = HostLog::new(sink, cache.id);
            let Some(session) = session_or_log(&log, self.open_cache(cache).await) else {
                return Ok(false);
            };
            let is_primary = ctx.is_primary_cache(cache);

            if !self.provision_cache_host(&session, &ctx, &primary, cache, &mut bundle, &log).await? {
                return Ok(false);
            }

            self.store
                .edit_cache_server(cache.id, Box::new(|c| c.installed = true))
                .await?;

            if is_primary {
                log.info("Retrieving server certificate");
                match session.get_file(STUNNEL_PEM).await? {
                    Some(pem) if !pem.trim().is_empty() => {
                        log.debug(format!(
                            "Server certificate sha256 {}",
                            sha256_hash(pem.as_bytes())
                        ));
                        bundle = Some(CertificateBundle::new(pem));
                    }
                    _ => {
                        log.error("Can't retrieve server certificate from primary cache server");
                        return Ok(false);
                    }
                }
            }
            session.close().await?;
        }

        sink.set_step(STEP_CACHE_HOSTS_DONE);

        for server in &servers {
            let log = HostLog::new(sink, server.id);
            let Some(session) = session_or_log(&log, self.open_server(server).await) else {
                return Ok(false);
            };

            if !self
                .install_tunnel(
                    &session,
                    &ctx.settings,
                    &primary,
                    TunnelSide::Client,
                    &mut bundle,
                    &log,
                )
                .await?
            {
                return Ok(false);
            }

            self.store
                .edit_server(server.id, Box::new(|s| s.installed = true))
                .await?;

            if server.primary {
                self.point_directory_at_cache(server, &primary.redis_password, &log)
                    .await;
            }

            self.restart_gluu(&session, &ctx, &log).await?;
            session.close().await?;
        }

        self.store.set_use_ldap_cache(false).await?;

        sink.set_step(STEP_CONSUMERS_DONE);
        Ok(true)
    }

    /// Phase 1 for one cache host: engine, password, tunnel
    async fn provision_cache_host(
        &self,
        session: &HostSession,
        ctx: &FleetContext,
        primary: &CacheServer,
        cache: &CacheServer,
        bundle: &mut Option<CertificateBundle>,
        log: &HostLog<'_>,
    ) -> Result<bool, ConsoleError> {
        let os = session.os();
        let redis = Package {
            label: "Redis Server",
            name: os.redis_package(),
            binaries: &[REDIS_BINARY],
        };
        if !ensure_package(session, &ctx.settings, &redis, log).await? {
            return Ok(false);
        }

        log.info("Setting Redis password");
        let config_path = os.redis_config_path();
        match session.get_file(config_path).await? {
            Some(current) => match rewrite_requirepass(&current, cache.redis_password()) {
                Some(updated) => session.put_file(config_path, &updated).await?,
                None => log.debug("Redis password unchanged"),
            },
            None => log.debug(format!("{} not found, password left as is", config_path)),
        }

        let service = os.redis_package();
        session.enable_service(service).await?;
        let restart = session.restart_service(service).await?;
        if !restart.success() {
            log.warning(format!("Restarting {}: {}", service, restart.stderr.trim()));
        }

        let side = TunnelSide::Cache {
            listen_ip: &cache.ip,
            is_primary: ctx.is_primary_cache(cache),
        };
        self.install_tunnel(session, &ctx.settings, primary, side, bundle, log)
            .await
    }

    /// Disable the cache fleet's services and revert the consumers
    pub async fn uninstall_cache_cluster(
        &self,
        server_ids: &[u64],
        cache_ids: &[u64],
        sink: &dyn ProgressSink,
    ) -> Result<bool, ConsoleError> {
        let records = self.store.read().await?;
        let ctx = FleetContext::resolve(records.settings.clone(), &records.cache_servers);
        let (servers, cache_servers) = selection(&records, server_ids, cache_ids)?;

        for cache in &cache_servers {
            let log = HostLog::new(sink, cache.id);
            let Some(session) = session_or_log(&log, self.open_cache(cache).await) else {
                return Ok(false);
            };
            let os = session.os();

            if session.exists(REDIS_BINARY).await? {
                log.info("Disabling Redis Server");
                session.disable_service(os.redis_package()).await?;
                log.info("Stopping Redis Server");
                session.stop_service(os.redis_package()).await?;
            } else {
                log.info("Redis Server was not installed.");
            }
            stop_tunnel(&session, &log).await?;

            self.store
                .edit_cache_server(cache.id, Box::new(|c| c.installed = false))
                .await?;
            session.close().await?;
        }

        sink.set_step(STEP_CACHE_HOSTS_DONE);

        let secret = ctx
            .primary_cache
            .as_ref()
            .map(|p| p.redis_password.clone())
            .unwrap_or_else(|| SecretString::from(String::new()));

        for server in &servers {
            let log = HostLog::new(sink, server.id);
            let Some(session) = session_or_log(&log, self.open_server(server).await) else {
                return Ok(false);
            };

            stop_tunnel(&session, &log).await?;

            if server.primary {
                self.point_directory_at_cache(server, &secret, &log).await;
            }

            self.store
                .edit_server(server.id, Box::new(|s| s.installed = false))
                .await?;

            self.restart_gluu(&session, &ctx, &log).await?;
            session.close().await?;
        }

        self.store.set_use_ldap_cache(true).await?;

        sink.set_step(STEP_CONSUMERS_DONE);
        Ok(true)
    }

    /// Rewrite the directory's cache backend to the local tunnel endpoint.
    /// Failures are logged and do not stop the run.
    async fn point_directory_at_cache(
        &self,
        server: &Server,
        secret: &SecretString,
        log: &HostLog<'_>,
    ) {
        log.debug("Updating oxCacheConfiguration ...");
        let uri = ldaps_uri(&server.hostname, self.options.directory_port);
        let conn = match self
            .directory
            .connect(&uri, DIRECTORY_MANAGER_DN, &server.ldap_password)
            .await
        {
            Ok(conn) => conn,
            Err(e) => {
                log.error(format!("Couldn't connect to LDAP. Error: {}", e));
                log.debug("Make sure your LDAP server is listening to connections from outside");
                return;
            }
        };

        let servers = format!("localhost:{}", CACHE_PORT);
        match conn
            .change_cache_backend("REDIS", &servers, secret.expose_secret())
            .await
        {
            Ok(true) => log.success("oxCacheConfiguration updated"),
            Ok(false) => log.fail("oxCacheConfiguration update failed"),
            Err(e) => log.fail(format!("oxCacheConfiguration update failed: {}", e)),
        }
    }

    async fn restart_gluu(
        &self,
        session: &HostSession,
        ctx: &FleetContext,
        log: &HostLog<'_>,
    ) -> Result<(), ConsoleError> {
        log.info("Restarting Gluu Server");
        let output = session.run(&ctx.settings.restart_command()).await?;
        if !output.success() {
            log.warning(format!(
                "Gluu Server restart exited with {}: {}",
                output.exit_code,
                output.stderr.trim()
            ));
        }
        Ok(())
    }
}

/// Disable and stop the tunnel if it was ever configured
async fn stop_tunnel(session: &HostSession, log: &HostLog<'_>) -> Result<(), ConsoleError> {
    let service = session.os().stunnel_package();
    if session.exists(STUNNEL_CONF).await? {
        log.info("Disabling Stunnel");
        session.disable_service(service).await?;
        log.info("Stopping Stunnel");
        session.stop_service(service).await?;
    } else {
        log.info("Stunnel not installed.");
    }
    Ok(())
}
