//! Managed host records

use std::net::IpAddr;

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

use crate::errors::ConsoleError;
use crate::models::secret;

/// Operating-system family of a managed host
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OsFamily {
    /// Debian, Ubuntu (deb packages)
    Debian,
    /// CentOS, RHEL, Fedora (rpm packages)
    RedHat,
}

impl OsFamily {
    /// Classify a human-readable OS name such as "Ubuntu 18" or "CentOS 7"
    pub fn from_os_name(name: &str) -> Option<OsFamily> {
        let name = name.to_lowercase();
        if name.contains("ubuntu") || name.contains("debian") {
            Some(OsFamily::Debian)
        } else if ["centos", "rhel", "red hat", "redhat", "fedora", "rocky", "alma"]
            .iter()
            .any(|n| name.contains(n))
        {
            Some(OsFamily::RedHat)
        } else {
            None
        }
    }

    pub fn redis_package(&self) -> &'static str {
        match self {
            OsFamily::Debian => "redis-server",
            OsFamily::RedHat => "redis",
        }
    }

    pub fn redis_config_path(&self) -> &'static str {
        match self {
            OsFamily::Debian => "/etc/redis/redis.conf",
            OsFamily::RedHat => "/etc/redis.conf",
        }
    }

    /// Package name of the tunnel; the service carries the same name
    pub fn stunnel_package(&self) -> &'static str {
        match self {
            OsFamily::Debian => "stunnel4",
            OsFamily::RedHat => "stunnel",
        }
    }
}

/// Optional application subsystems whose logs get shipped
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Components {
    /// Federation proxy
    #[serde(default)]
    pub passport: bool,

    /// SAML identity provider
    #[serde(default)]
    pub shibboleth: bool,
}

/// A managed application host
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Server {
    pub id: u64,
    pub hostname: String,
    pub ip: String,

    /// Human-readable OS name; detected remotely when absent
    #[serde(default)]
    pub os: Option<String>,

    /// Directory manager password of the host's LDAP server
    #[serde(default = "secret::empty", with = "secret")]
    pub ldap_password: SecretString,

    /// The host whose directory is pointed at the cache fleet
    #[serde(default)]
    pub primary: bool,

    /// Takes part in multi-master replication
    #[serde(default)]
    pub mmr: bool,

    /// Log shipping agent configured
    #[serde(default)]
    pub filebeat: bool,

    /// Cache tunnel client installed
    #[serde(default)]
    pub installed: bool,

    #[serde(default)]
    pub components: Components,
}

impl Server {
    pub fn os_family(&self) -> Option<OsFamily> {
        self.os.as_deref().and_then(OsFamily::from_os_name)
    }

    pub fn validate(&self) -> Result<(), ConsoleError> {
        validate_address(&format!("server {}", self.id), &self.hostname, &self.ip)
    }

    /// Whether `name` refers to this host by hostname or address
    pub fn is_named(&self, name: &str) -> bool {
        name.eq_ignore_ascii_case(&self.hostname) || name == self.ip
    }
}

/// A host running (or fronting) the shared cache engine
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheServer {
    pub id: u64,
    pub hostname: String,
    pub ip: String,

    #[serde(default)]
    pub os: Option<String>,

    /// Install the cache engine on this host
    #[serde(default = "default_true")]
    pub install_redis: bool,

    /// Cache authentication secret; empty disables authentication
    #[serde(default = "secret::empty", with = "secret")]
    pub redis_password: SecretString,

    /// Port of the encrypted tunnel listener
    #[serde(default = "default_stunnel_port")]
    pub stunnel_port: u16,

    /// Certificate authority and connection target of the fleet
    #[serde(default)]
    pub primary: bool,

    #[serde(default)]
    pub installed: bool,
}

pub const DEFAULT_STUNNEL_PORT: u16 = 16379;

fn default_true() -> bool {
    true
}

fn default_stunnel_port() -> u16 {
    DEFAULT_STUNNEL_PORT
}

impl CacheServer {
    pub fn os_family(&self) -> Option<OsFamily> {
        self.os.as_deref().and_then(OsFamily::from_os_name)
    }

    pub fn redis_password(&self) -> &str {
        self.redis_password.expose_secret()
    }

    pub fn validate(&self) -> Result<(), ConsoleError> {
        validate_address(&format!("cache server {}", self.id), &self.hostname, &self.ip)?;
        if self.stunnel_port == 0 {
            return Err(ConsoleError::ValidationError(format!(
                "cache server {}: tunnel port must be non-zero",
                self.id
            )));
        }
        Ok(())
    }
}

fn validate_address(what: &str, hostname: &str, ip: &str) -> Result<(), ConsoleError> {
    if hostname.trim().is_empty() {
        return Err(ConsoleError::ValidationError(format!(
            "{}: hostname is empty",
            what
        )));
    }
    ip.parse::<IpAddr>().map_err(|e| {
        ConsoleError::ValidationError(format!("{}: invalid ip {:?}: {}", what, ip, e))
    })?;
    Ok(())
}
