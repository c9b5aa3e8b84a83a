//! Record store for servers, cache servers and fleet settings.
//!
//! The store is a keyed collection of typed records. Every read goes through
//! [`Records::validate`], so a hand-edited or corrupted store is rejected at
//! load time instead of halfway through a rollout.

use std::collections::HashSet;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::debug;

use crate::errors::ConsoleError;
use crate::filesys::file::File;
use crate::models::fleet::{FleetContext, FleetSettings};
use crate::models::server::{CacheServer, Server};

/// The full contents of the store
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Records {
    #[serde(default)]
    pub servers: Vec<Server>,

    #[serde(default)]
    pub cache_servers: Vec<CacheServer>,

    #[serde(default)]
    pub settings: FleetSettings,
}

impl Records {
    pub fn validate(&self) -> Result<(), ConsoleError> {
        let mut ids = HashSet::new();
        for server in &self.servers {
            server.validate()?;
            if !ids.insert(server.id) {
                return Err(ConsoleError::ValidationError(format!(
                    "duplicate server id {}",
                    server.id
                )));
            }
        }

        let mut ids = HashSet::new();
        for cache_server in &self.cache_servers {
            cache_server.validate()?;
            if !ids.insert(cache_server.id) {
                return Err(ConsoleError::ValidationError(format!(
                    "duplicate cache server id {}",
                    cache_server.id
                )));
            }
        }
        Ok(())
    }

    fn upsert_server(&mut self, server: Server) {
        match self.servers.iter_mut().find(|s| s.id == server.id) {
            Some(existing) => *existing = server,
            None => self.servers.push(server),
        }
    }

    fn upsert_cache_server(&mut self, cache_server: CacheServer) {
        match self
            .cache_servers
            .iter_mut()
            .find(|c| c.id == cache_server.id)
        {
            Some(existing) => *existing = cache_server,
            None => self.cache_servers.push(cache_server),
        }
    }

    fn server_mut(&mut self, id: u64) -> Result<&mut Server, ConsoleError> {
        self.servers
            .iter_mut()
            .find(|s| s.id == id)
            .ok_or_else(|| ConsoleError::NotFound(format!("server {}", id)))
    }

    fn cache_server_mut(&mut self, id: u64) -> Result<&mut CacheServer, ConsoleError> {
        self.cache_servers
            .iter_mut()
            .find(|c| c.id == id)
            .ok_or_else(|| ConsoleError::NotFound(format!("cache server {}", id)))
    }
}

/// A mutation applied to the records under the store's write lock
pub type RecordsUpdate = Box<dyn FnOnce(&mut Records) -> Result<(), ConsoleError> + Send>;

/// An edit of one server record, applied to the stored copy
pub type ServerEdit = Box<dyn FnOnce(&mut Server) + Send>;

/// An edit of one cache server record, applied to the stored copy
pub type CacheServerEdit = Box<dyn FnOnce(&mut CacheServer) + Send>;

/// Keyed configuration store
#[async_trait]
pub trait ConfigStore: Send + Sync {
    /// Read a validated snapshot of every record
    async fn read(&self) -> Result<Records, ConsoleError>;

    /// Apply `update` atomically and persist the result
    async fn update(&self, update: RecordsUpdate) -> Result<(), ConsoleError>;

    async fn servers(&self) -> Result<Vec<Server>, ConsoleError> {
        Ok(self.read().await?.servers)
    }

    async fn server(&self, id: u64) -> Result<Server, ConsoleError> {
        self.read()
            .await?
            .servers
            .into_iter()
            .find(|s| s.id == id)
            .ok_or_else(|| ConsoleError::NotFound(format!("server {}", id)))
    }

    async fn save_server(&self, server: &Server) -> Result<(), ConsoleError> {
        server.validate()?;
        let server = server.clone();
        self.update(Box::new(move |records| {
            records.upsert_server(server);
            Ok(())
        }))
        .await
    }

    /// Edit the stored server in place, leaving every other field as stored
    async fn edit_server(&self, id: u64, edit: ServerEdit) -> Result<(), ConsoleError> {
        self.update(Box::new(move |records| {
            edit(records.server_mut(id)?);
            Ok(())
        }))
        .await
    }

    async fn cache_servers(&self) -> Result<Vec<CacheServer>, ConsoleError> {
        Ok(self.read().await?.cache_servers)
    }

    async fn cache_server(&self, id: u64) -> Result<CacheServer, ConsoleError> {
        self.read()
            .await?
            .cache_servers
            .into_iter()
            .find(|c| c.id == id)
            .ok_or_else(|| ConsoleError::NotFound(format!("cache server {}", id)))
    }

    async fn save_cache_server(&self, cache_server: &CacheServer) -> Result<(), ConsoleError> {
        cache_server.validate()?;
        let cache_server = cache_server.clone();
        self.update(Box::new(move |records| {
            if cache_server.primary {
                for other in records.cache_servers.iter_mut() {
                    other.primary = false;
                }
            }
            records.upsert_cache_server(cache_server);
            Ok(())
        }))
        .await
    }

    async fn edit_cache_server(&self, id: u64, edit: CacheServerEdit) -> Result<(), ConsoleError> {
        self.update(Box::new(move |records| {
            edit(records.cache_server_mut(id)?);
            Ok(())
        }))
        .await
    }

    async fn fleet_settings(&self) -> Result<FleetSettings, ConsoleError> {
        Ok(self.read().await?.settings)
    }

    async fn save_fleet_settings(&self, settings: &FleetSettings) -> Result<(), ConsoleError> {
        let settings = settings.clone();
        self.update(Box::new(move |records| {
            records.settings = settings;
            Ok(())
        }))
        .await
    }

    async fn set_use_ldap_cache(&self, enabled: bool) -> Result<(), ConsoleError> {
        self.update(Box::new(move |records| {
            records.settings.use_ldap_cache = enabled;
            Ok(())
        }))
        .await
    }

    /// Settings and the elected primary cache host, read in one snapshot
    async fn fleet_context(&self) -> Result<FleetContext, ConsoleError> {
        let records = self.read().await?;
        Ok(FleetContext::resolve(records.settings, &records.cache_servers))
    }
}

/// Store persisted as one JSON document on disk
pub struct FileConfigStore {
    file: File,
    lock: Mutex<()>,
}

impl FileConfigStore {
    pub fn new(file: File) -> Self {
        Self {
            file,
            lock: Mutex::new(()),
        }
    }

    async fn read_unlocked(&self) -> Result<Records, ConsoleError> {
        let records: Records = match self.file.read_string_opt().await? {
            Some(contents) if !contents.trim().is_empty() => serde_json::from_str(&contents)
                .map_err(|e| {
                    ConsoleError::StorageError(format!(
                        "unable to parse {}: {}",
                        self.file.path().display(),
                        e
                    ))
                })?,
            _ => Records::default(),
        };
        records.validate()?;
        Ok(records)
    }
}

#[async_trait]
impl ConfigStore for FileConfigStore {
    async fn read(&self) -> Result<Records, ConsoleError> {
        let _guard = self.lock.lock().await;
        self.read_unlocked().await
    }

    async fn update(&self, update: RecordsUpdate) -> Result<(), ConsoleError> {
        let _guard = self.lock.lock().await;
        let mut records = self.read_unlocked().await?;
        update(&mut records)?;
        records.validate()?;

        debug!("Writing record store {}", self.file.path().display());
        self.file.write_json_atomic(&records).await?;
        // records carry host secrets
        self.file.set_permissions_600().await?;
        Ok(())
    }
}

/// Store held in memory only
#[derive(Default)]
pub struct MemoryConfigStore {
    records: Mutex<Records>,
}

impl MemoryConfigStore {
    pub fn new(records: Records) -> Self {
        Self {
            records: Mutex::new(records),
        }
    }
}

#[async_trait]
impl ConfigStore for MemoryConfigStore {
    async fn read(&self) -> Result<Records, ConsoleError> {
        let records = self.records.lock().await.clone();
        records.validate()?;
        Ok(records)
    }

    async fn update(&self, update: RecordsUpdate) -> Result<(), ConsoleError> {
        let mut records = self.records.lock().await;
        let mut next = records.clone();
        update(&mut next)?;
        next.validate()?;
        *records = next;
        Ok(())
    }
}
