//! Encrypted tunnel (stunnel) between cache consumers and the primary cache host.
//!
//! The primary cache host owns the certificate. Its tunnel step generates the
//! key pair once; every other host receives the combined PEM through an
//! in-memory [`CertificateBundle`] handed along within the same run.

use secrecy::{ExposeSecret, SecretString};

use crate::errors::ConsoleError;
use crate::jobs::log::HostLog;
use crate::models::fleet::FleetSettings;
use crate::models::server::{CacheServer, OsFamily};
use crate::orchestrator::context::{ensure_package, session_or_log, Orchestrator, Package};
use crate::orchestrator::templates::STUNNEL_UNIT;
use crate::remote::session::HostSession;

pub const STUNNEL_CONF: &str = "/etc/stunnel/stunnel.conf";
pub const STUNNEL_PEM: &str = "/etc/stunnel/redis-server.pem";
const STUNNEL_KEY: &str = "/etc/stunnel/redis-server.key";
const STUNNEL_CRT: &str = "/etc/stunnel/redis-server.crt";
const STUNNEL_BINARIES: &[&str] = &["/usr/bin/stunnel", "/bin/stunnel"];
const STUNNEL_UNIT_PATH: &str = "/lib/systemd/system/stunnel.service";

/// Port the cache engine listens on, and the local tunnel endpoint on consumers
pub const CACHE_PORT: u16 = 6379;

/// The primary's combined key and certificate
#[derive(Debug, Clone)]
pub struct CertificateBundle {
    pem: SecretString,
}

impl CertificateBundle {
    pub fn new(pem: String) -> Self {
        Self {
            pem: SecretString::from(pem),
        }
    }

    pub fn pem(&self) -> &str {
        self.pem.expose_secret()
    }
}

/// Which end of the tunnel a host runs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TunnelSide<'a> {
    /// Cache host: accept on its own address, forward to the local engine
    Cache { listen_ip: &'a str, is_primary: bool },
    /// Consumer: accept locally, forward to the primary cache host
    Client,
}

/// Contents of the stunnel config for `side`
pub fn render_tunnel_config(side: TunnelSide<'_>, primary: &CacheServer) -> String {
    let mut conf = format!("pid = /run/stunnel-redis.pid\ncert = {}\n", STUNNEL_PEM);
    match side {
        TunnelSide::Cache { listen_ip, .. } => {
            conf.push_str(&format!(
                "[redis-server]\naccept = {}:{}\nconnect = 127.0.0.1:{}\n",
                listen_ip, primary.stunnel_port, CACHE_PORT
            ));
        }
        TunnelSide::Client => {
            conf.push_str(&format!(
                "[redis-client]\nclient = yes\naccept = 127.0.0.1:{}\nconnect = {}:{}\n",
                CACHE_PORT, primary.ip, primary.stunnel_port
            ));
        }
    }
    conf
}

impl Orchestrator {
    /// Read the certificate off the primary cache host
    pub(crate) async fn fetch_certificate(
        &self,
        primary: &CacheServer,
        log: &HostLog<'_>,
    ) -> Result<Option<CertificateBundle>, ConsoleError> {
        log.info(format!("Retrieving server certificate from {}", primary.hostname));
        let Some(session) = session_or_log(log, self.open_cache(primary).await) else {
            return Ok(None);
        };
        let pem = session.get_file(STUNNEL_PEM).await?;
        session.close().await?;

        match pem {
            Some(pem) if !pem.trim().is_empty() => Ok(Some(CertificateBundle::new(pem))),
            _ => {
                log.error(format!(
                    "Can't retrieve server certificate from primary cache server {}",
                    primary.hostname
                ));
                Ok(None)
            }
        }
    }

    /// Install and configure stunnel on one host.
    ///
    /// On the primary cache host the certificate is generated when absent.
    /// Other hosts get `bundle`, which is fetched from the primary first when
    /// this run has not produced it yet.
    pub(crate) async fn install_tunnel(
        &self,
        session: &HostSession,
        settings: &FleetSettings,
        primary: &CacheServer,
        side: TunnelSide<'_>,
        bundle: &mut Option<CertificateBundle>,
        log: &HostLog<'_>,
    ) -> Result<bool, ConsoleError> {
        let os = session.os();
        let package = Package {
            label: "Stunnel",
            name: os.stunnel_package(),
            binaries: STUNNEL_BINARIES,
        };
        if !ensure_package(session, settings, &package, log).await? {
            return Ok(false);
        }

        match os {
            OsFamily::RedHat => {
                log.info("Uploading systemd file");
                let unit = self.templates.load(STUNNEL_UNIT).await?;
                session.put_file(STUNNEL_UNIT_PATH, &unit).await?;
                session.run("mkdir -p /var/log/stunnel4").await?;
            }
            OsFamily::Debian => {
                log.debug("Enabling stunnel");
                session
                    .run("sed -i 's/ENABLED=0/ENABLED=1/g' /etc/default/stunnel4")
                    .await?;
            }
        }

        let is_primary = matches!(side, TunnelSide::Cache { is_primary: true, .. });
        if is_primary {
            if !self.ensure_certificate(session, log).await? {
                return Ok(false);
            }
        } else {
            if bundle.is_none() {
                *bundle = self.fetch_certificate(primary, log).await?;
            }
            let Some(cert) = bundle.as_ref() else {
                return Ok(false);
            };
            if session.get_file(STUNNEL_PEM).await?.as_deref() == Some(cert.pem()) {
                log.debug("Server certificate up to date");
            } else {
                log.info("Uploading server certificate");
                session.put_file(STUNNEL_PEM, cert.pem()).await?;
            }
            session.run_checked(&format!("chmod 600 {}", STUNNEL_PEM)).await?;
        }

        log.info("Writing redis stunnel configurations");
        session
            .put_file(STUNNEL_CONF, &render_tunnel_config(side, primary))
            .await?;

        if os == OsFamily::RedHat {
            session.run("systemctl daemon-reload").await?;
        }

        let service = os.stunnel_package();
        session.enable_service(service).await?;
        let restart = session.restart_service(service).await?;
        if !restart.success() {
            log.warning(format!("Restarting {}: {}", service, restart.stderr.trim()));
        }
        Ok(true)
    }

    /// Generate the self-signed tunnel certificate unless it already exists
    async fn ensure_certificate(
        &self,
        session: &HostSession,
        log: &HostLog<'_>,
    ) -> Result<bool, ConsoleError> {
        if session.exists(STUNNEL_PEM).await? {
            log.debug("Server certificate exists");
            return Ok(true);
        }

        log.info("Creating SSL certificate for stunnel");
        let generate = session
            .run(&format!(
                "openssl req -x509 -nodes -days 3650 -newkey rsa:2048 -batch \
                 -keyout {} -out {}",
                STUNNEL_KEY, STUNNEL_CRT
            ))
            .await?;
        if !generate.success() {
            log.error(format!(
                "Generating certificate failed: {}",
                generate.stderr.trim()
            ));
            return Ok(false);
        }

        session
            .run_checked(&format!(
                "cat {} {} > {}",
                STUNNEL_KEY, STUNNEL_CRT, STUNNEL_PEM
            ))
            .await?;
        session
            .run_checked(&format!("chmod 600 {} {}", STUNNEL_KEY, STUNNEL_PEM))
            .await?;
        Ok(true)
    }
}
