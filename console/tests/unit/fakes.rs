//! Scripted collaborators shared by the integration tests

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use console_api::Severity;
use secrecy::SecretString;
use serde_json::json;

use clusterctl::directory::{DirectoryConnection, DirectoryService, ReplicationProvider};
use clusterctl::errors::ConsoleError;
use clusterctl::jobs::log::ProgressSink;
use clusterctl::models::server::{CacheServer, Server};
use clusterctl::orchestrator::templates::Templates;
use clusterctl::orchestrator::{Orchestrator, OrchestratorOptions};
use clusterctl::remote::channel::{CommandOutput, Connector, HostTarget, RemoteChannel};
use clusterctl::sink::{LogCursor, LogPoint, PointSink};
use clusterctl::storage::store::{ConfigStore, MemoryConfigStore, Records};

/// Everything the fakes observe and script
#[derive(Default)]
pub struct World {
    /// Ordered trace of connections, file reads, directory calls and steps
    pub events: Vec<String>,
    /// Remote filesystems, by host address
    pub files: HashMap<String, BTreeMap<String, String>>,
    /// Commands run, as (address, command)
    pub commands: Vec<(String, String)>,
    pub unreachable: HashSet<String>,
    /// Output of the log agent, by host address
    pub agent_output: HashMap<String, String>,
    /// Upstream providers, by directory hostname
    pub providers: HashMap<String, Vec<String>>,
    pub directory_down: HashSet<String>,
    /// (hostname, kind, servers, secret) of each cache backend change
    pub cache_backend_calls: Vec<(String, String, String, String)>,
    pub cursor: Option<LogCursor>,
    pub written_batches: Vec<usize>,
    pub log: Vec<(Option<u64>, Severity, String)>,
    pub steps: Vec<u32>,
    /// Store edits made by someone else when a host is connected, by address
    pub on_connect: HashMap<String, StoreEdit>,
}

pub type StoreEdit = Box<dyn FnOnce(&mut Records) + Send>;

impl World {
    pub fn file(&self, ip: &str, path: &str) -> Option<String> {
        self.files.get(ip).and_then(|f| f.get(path)).cloned()
    }

    pub fn put(&mut self, ip: &str, path: &str, contents: &str) {
        self.files
            .entry(ip.to_string())
            .or_default()
            .insert(path.to_string(), contents.to_string());
    }

    pub fn commands_on(&self, ip: &str) -> Vec<String> {
        self.commands
            .iter()
            .filter(|(host, _)| host == ip)
            .map(|(_, c)| c.clone())
            .collect()
    }

    pub fn any_command(&self, needle: &str) -> bool {
        self.commands.iter().any(|(_, c)| c.contains(needle))
    }

    /// Position of the first event starting with `prefix`
    pub fn position(&self, prefix: &str) -> Option<usize> {
        self.events.iter().position(|e| e.starts_with(prefix))
    }

    pub fn entries(&self, severity: Severity) -> Vec<(Option<u64>, String)> {
        self.log
            .iter()
            .filter(|(_, s, _)| *s == severity)
            .map(|(h, _, m)| (*h, m.clone()))
            .collect()
    }
}

pub type Shared = Arc<Mutex<World>>;

pub fn lock(world: &Shared) -> MutexGuard<'_, World> {
    world.lock().unwrap()
}

fn binary_for(package: &str) -> Option<&'static str> {
    match package {
        "redis-server" | "redis" => Some("/usr/bin/redis-server"),
        "stunnel4" | "stunnel" => Some("/usr/bin/stunnel"),
        "filebeat" => Some("/usr/bin/filebeat"),
        _ => None,
    }
}

pub struct FakeChannel {
    world: Shared,
    ip: String,
}

#[async_trait]
impl RemoteChannel for FakeChannel {
    async fn run(&self, command: &str) -> Result<CommandOutput, ConsoleError> {
        let mut world = lock(&self.world);
        world.commands.push((self.ip.clone(), command.to_string()));
        let mut stdout = String::new();

        if command.contains("apt-get install -y ") || command.contains("yum install -y ") {
            let package = command.split_whitespace().last().unwrap_or_default();
            if let Some(binary) = binary_for(package) {
                world.put(&self.ip, binary, "");
            }
        } else if command.starts_with("openssl req") {
            world.put(&self.ip, "/etc/stunnel/redis-server.key", &format!("KEY-{}\n", self.ip));
            world.put(&self.ip, "/etc/stunnel/redis-server.crt", &format!("CRT-{}\n", self.ip));
        } else if let Some(rest) = command.strip_prefix("cat ") {
            if let Some((sources, target)) = rest.split_once(" > ") {
                let joined: String = sources
                    .split_whitespace()
                    .filter_map(|s| world.file(&self.ip, s))
                    .collect();
                world.put(&self.ip, target.trim(), &joined);
            }
        } else if command.contains("getfilebeatlog.py") {
            stdout = world.agent_output.get(&self.ip).cloned().unwrap_or_default();
        }

        Ok(CommandOutput {
            exit_code: 0,
            stdout,
            stderr: String::new(),
        })
    }

    async fn exists(&self, path: &str) -> Result<bool, ConsoleError> {
        Ok(lock(&self.world).file(&self.ip, path).is_some())
    }

    async fn put_file(&self, path: &str, contents: &str) -> Result<(), ConsoleError> {
        let mut world = lock(&self.world);
        world.events.push(format!("put {} {}", self.ip, path));
        world.put(&self.ip, path, contents);
        Ok(())
    }

    async fn get_file(&self, path: &str) -> Result<Option<String>, ConsoleError> {
        let mut world = lock(&self.world);
        world.events.push(format!("get {} {}", self.ip, path));
        Ok(world.file(&self.ip, path))
    }
}

pub struct FakeConnector {
    world: Shared,
    store: Arc<MemoryConfigStore>,
}

#[async_trait]
impl Connector for FakeConnector {
    async fn connect(&self, target: &HostTarget) -> Result<Box<dyn RemoteChannel>, ConsoleError> {
        let edit = {
            let mut world = lock(&self.world);
            world.events.push(format!("connect {}", target.ip));
            if world.unreachable.contains(&target.ip) {
                return Err(ConsoleError::ConnectionError(format!(
                    "{}: connection refused",
                    target.ip
                )));
            }
            world.on_connect.remove(&target.ip)
        };
        if let Some(edit) = edit {
            self.store
                .update(Box::new(move |records| {
                    edit(records);
                    Ok(())
                }))
                .await?;
        }
        Ok(Box::new(FakeChannel {
            world: self.world.clone(),
            ip: target.ip.clone(),
        }))
    }
}

fn uri_host(uri: &str) -> String {
    let rest = uri.trim_start_matches("ldaps://");
    rest.split(':').next().unwrap_or(rest).to_string()
}

pub struct FakeDirectory {
    world: Shared,
}

#[async_trait]
impl DirectoryService for FakeDirectory {
    async fn connect(
        &self,
        uri: &str,
        bind_dn: &str,
        _password: &SecretString,
    ) -> Result<Box<dyn DirectoryConnection>, ConsoleError> {
        let host = uri_host(uri);
        let mut world = lock(&self.world);
        world.events.push(format!("bind {} {}", host, bind_dn));
        if world.directory_down.contains(&host) {
            return Err(ConsoleError::DirectoryError(format!("{}: can't contact", host)));
        }
        Ok(Box::new(FakeConnection {
            world: self.world.clone(),
            host,
        }))
    }
}

pub struct FakeConnection {
    world: Shared,
    host: String,
}

#[async_trait]
impl DirectoryConnection for FakeConnection {
    async fn change_cache_backend(
        &self,
        kind: &str,
        servers: &str,
        secret: &str,
    ) -> Result<bool, ConsoleError> {
        let mut world = lock(&self.world);
        world
            .events
            .push(format!("cache_backend {} {}", self.host, servers));
        world.cache_backend_calls.push((
            self.host.clone(),
            kind.to_string(),
            servers.to_string(),
            secret.to_string(),
        ));
        Ok(true)
    }

    async fn replication_providers(&self) -> Result<Vec<String>, ConsoleError> {
        Ok(lock(&self.world)
            .providers
            .get(&self.host)
            .cloned()
            .unwrap_or_default())
    }

    async fn add_replication_provider(
        &self,
        provider: &ReplicationProvider,
    ) -> Result<bool, ConsoleError> {
        let mut world = lock(&self.world);
        world
            .events
            .push(format!("add_provider {} rid={}", self.host, provider.rid));
        let upstream = uri_host(&provider.uri);
        world
            .providers
            .entry(self.host.clone())
            .or_default()
            .push(upstream);
        Ok(true)
    }

    async fn remove_replication_providers(&self) -> Result<bool, ConsoleError> {
        let mut world = lock(&self.world);
        world.events.push(format!("remove_providers {}", self.host));
        world.providers.remove(&self.host);
        Ok(true)
    }
}

pub struct FakePoints {
    world: Shared,
}

#[async_trait]
impl PointSink for FakePoints {
    async fn latest_cursor(&self, _hostname: &str) -> Result<Option<LogCursor>, ConsoleError> {
        Ok(lock(&self.world).cursor.clone())
    }

    async fn write_points(&self, points: &[LogPoint]) -> Result<usize, ConsoleError> {
        lock(&self.world).written_batches.push(points.len());
        Ok(points.len())
    }
}

/// Progress sink recording into the world's trace
pub struct RecordingSink {
    world: Shared,
}

impl RecordingSink {
    pub fn new(world: &Shared) -> Self {
        Self {
            world: world.clone(),
        }
    }
}

impl ProgressSink for RecordingSink {
    fn log(&self, host_id: Option<u64>, severity: Severity, message: &str) {
        lock(&self.world)
            .log
            .push((host_id, severity, message.to_string()));
    }

    fn set_step(&self, step: u32) {
        let mut world = lock(&self.world);
        world.events.push(format!("step {}", step));
        world.steps.push(step);
    }
}

/// A fleet of fakes around `records`
pub struct Fleet {
    pub world: Shared,
    pub store: Arc<MemoryConfigStore>,
    pub orchestrator: Arc<Orchestrator>,
}

impl Fleet {
    pub fn new(records: Records) -> Self {
        Self::with_options(records, OrchestratorOptions::default())
    }

    pub fn with_options(records: Records, options: OrchestratorOptions) -> Self {
        let world: Shared = Arc::new(Mutex::new(World::default()));
        let store = Arc::new(MemoryConfigStore::new(records));
        let orchestrator = Arc::new(Orchestrator::new(
            store.clone(),
            Arc::new(FakeConnector {
                world: world.clone(),
                store: store.clone(),
            }),
            Arc::new(FakeDirectory {
                world: world.clone(),
            }),
            Arc::new(FakePoints {
                world: world.clone(),
            }),
            Templates::builtin(),
            options,
        ));
        Self {
            world,
            store,
            orchestrator,
        }
    }

    pub fn sink(&self) -> RecordingSink {
        RecordingSink::new(&self.world)
    }

    pub fn world(&self) -> MutexGuard<'_, World> {
        lock(&self.world)
    }
}

pub fn server(id: u64, hostname: &str, ip: &str, primary: bool) -> Server {
    serde_json::from_value(json!({
        "id": id,
        "hostname": hostname,
        "ip": ip,
        "os": "Ubuntu 18",
        "ldap_password": format!("ldap-{}", id),
        "primary": primary,
    }))
    .unwrap()
}

pub fn cache_server(id: u64, hostname: &str, ip: &str, primary: bool, secret: &str) -> CacheServer {
    serde_json::from_value(json!({
        "id": id,
        "hostname": hostname,
        "ip": ip,
        "os": "Ubuntu 18",
        "redis_password": secret,
        "primary": primary,
    }))
    .unwrap()
}
