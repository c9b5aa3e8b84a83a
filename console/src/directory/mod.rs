//! Directory-service adapter: the narrow set of LDAP mutations the
//! orchestrator needs

pub mod ldif;
pub mod openldap;

use async_trait::async_trait;
use secrecy::SecretString;

use crate::errors::ConsoleError;

/// Bind DN for the application data tree
pub const DIRECTORY_MANAGER_DN: &str = "cn=directory manager";

/// Bind DN for the server configuration tree
pub const CONFIG_DN: &str = "cn=config";

/// Largest replica id a syncrepl directive accepts
pub const MAX_REPLICA_ID: u64 = 999;

/// Replica id for a provider, taken from its server id
pub fn replica_id(server_id: u64) -> Result<u32, ConsoleError> {
    if server_id > MAX_REPLICA_ID {
        return Err(ConsoleError::ValidationError(format!(
            "server id {} is above the largest replica id {}",
            server_id, MAX_REPLICA_ID
        )));
    }
    Ok(server_id as u32)
}

/// ldaps URI of a directory server
pub fn ldaps_uri(hostname: &str, port: u16) -> String {
    format!("ldaps://{}:{}", hostname, port)
}

/// Opens authenticated directory connections
#[async_trait]
pub trait DirectoryService: Send + Sync {
    async fn connect(
        &self,
        uri: &str,
        bind_dn: &str,
        password: &SecretString,
    ) -> Result<Box<dyn DirectoryConnection>, ConsoleError>;
}

/// An upstream replication source to add to a server
#[derive(Debug, Clone)]
pub struct ReplicationProvider {
    /// Replica id, unique per consumer
    pub rid: u32,
    pub uri: String,
    pub bind_dn: String,
    pub credentials: SecretString,
}

/// A bound directory connection
#[async_trait]
pub trait DirectoryConnection: Send + Sync {
    /// Point the application cache at `servers`; `false` when the entry is
    /// missing or the directory rejected the change
    async fn change_cache_backend(
        &self,
        kind: &str,
        servers: &str,
        secret: &str,
    ) -> Result<bool, ConsoleError>;

    /// Hostnames this server replicates from
    async fn replication_providers(&self) -> Result<Vec<String>, ConsoleError>;

    async fn add_replication_provider(
        &self,
        provider: &ReplicationProvider,
    ) -> Result<bool, ConsoleError>;

    /// Drop every upstream provider of this server
    async fn remove_replication_providers(&self) -> Result<bool, ConsoleError>;
}
