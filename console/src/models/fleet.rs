//! Fleet-wide settings and the per-run fleet context

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::models::server::CacheServer;

/// Fleet-wide configuration singleton
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FleetSettings {
    /// No network package installs; prerequisites must be pre-staged
    #[serde(default)]
    pub offline: bool,

    /// Directory servers use their built-in cache instead of the cache fleet
    #[serde(default = "default_true")]
    pub use_ldap_cache: bool,

    /// Version of the managed application platform
    #[serde(default = "default_gluu_version")]
    pub gluu_version: String,
}

fn default_true() -> bool {
    true
}

fn default_gluu_version() -> String {
    "4.2.0".to_string()
}

impl Default for FleetSettings {
    fn default() -> Self {
        Self {
            offline: false,
            use_ldap_cache: true,
            gluu_version: default_gluu_version(),
        }
    }
}

impl FleetSettings {
    /// Major platform version, 0 when unparsable
    pub fn major_version(&self) -> u32 {
        self.gluu_version
            .split('.')
            .next()
            .and_then(|m| m.trim().parse().ok())
            .unwrap_or(0)
    }

    /// Root of the isolated container the platform runs in
    pub fn container_path(&self) -> String {
        if self.major_version() >= 4 {
            "/opt/gluu-server".to_string()
        } else {
            format!("/opt/gluu-server-{}", self.gluu_version)
        }
    }

    /// Shell command restarting the platform's service stack
    pub fn restart_command(&self) -> String {
        if self.major_version() >= 4 {
            "/sbin/gluu-serverd restart".to_string()
        } else {
            format!("service gluu-server-{} restart", self.gluu_version)
        }
    }
}

/// Configuration a procedure reads once at start and threads through its steps
#[derive(Debug, Clone)]
pub struct FleetContext {
    pub settings: FleetSettings,
    pub primary_cache: Option<CacheServer>,
}

impl FleetContext {
    /// Build the context, electing the primary cache host.
    ///
    /// The first primary-flagged record (by id) wins; with no flagged record
    /// the lowest id is used.
    pub fn resolve(settings: FleetSettings, cache_servers: &[CacheServer]) -> Self {
        let mut sorted: Vec<&CacheServer> = cache_servers.iter().collect();
        sorted.sort_by_key(|c| c.id);

        let flagged: Vec<&CacheServer> = sorted.iter().copied().filter(|c| c.primary).collect();
        if flagged.len() > 1 {
            warn!(
                "{} cache servers are flagged primary, using {} ({})",
                flagged.len(),
                flagged[0].hostname,
                flagged[0].ip
            );
        }

        let primary_cache = flagged
            .first()
            .copied()
            .or_else(|| sorted.first().copied())
            .cloned();

        Self {
            settings,
            primary_cache,
        }
    }

    pub fn is_primary_cache(&self, cache_server: &CacheServer) -> bool {
        self.primary_cache
            .as_ref()
            .map(|p| p.id == cache_server.id)
            .unwrap_or(false)
    }
}
