//! Directory adapter driving the OpenLDAP client tools

use std::process::Stdio;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde_json::{json, Value};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::directory::ldif::{self, LdifEntry, Modification};
use crate::directory::{DirectoryConnection, DirectoryService, ReplicationProvider};
use crate::errors::ConsoleError;
use crate::filesys::file::File;
use crate::storage::settings::DirectorySettings;

/// ldapsearch exit status for a missing search base
const LDAP_NO_SUCH_OBJECT: i32 = 32;

const APP_BASE: &str = "o=gluu";
const CACHE_ATTR: &str = "oxCacheConfiguration";
const SYNCREPL_ATTR: &str = "olcSyncrepl";
const MIRROR_MODE_ATTR: &str = "olcMirrorMode";

/// Connects through `ldapsearch`/`ldapmodify`
#[derive(Debug, Clone)]
pub struct OpenLdapTools {
    settings: DirectorySettings,
}

impl OpenLdapTools {
    pub fn new(settings: DirectorySettings) -> Self {
        Self { settings }
    }
}

#[async_trait]
impl DirectoryService for OpenLdapTools {
    async fn connect(
        &self,
        uri: &str,
        bind_dn: &str,
        password: &SecretString,
    ) -> Result<Box<dyn DirectoryConnection>, ConsoleError> {
        let conn = OpenLdapConnection {
            settings: self.settings.clone(),
            uri: uri.to_string(),
            bind_dn: bind_dn.to_string(),
            password: password.clone(),
        };
        // a root DSE read proves the bind works
        conn.search("", "base", "(objectClass=*)", &["1.1"]).await?;
        debug!("Bound to {} as {}", uri, bind_dn);
        Ok(Box::new(conn))
    }
}

struct OpenLdapConnection {
    settings: DirectorySettings,
    uri: String,
    bind_dn: String,
    password: SecretString,
}

struct ToolOutput {
    exit_code: i32,
    stdout: String,
    stderr: String,
}

impl OpenLdapConnection {
    /// Run a client tool, feeding the bind password on stdin
    async fn tool(&self, binary: &str, args: &[&str]) -> Result<ToolOutput, ConsoleError> {
        let mut cmd = Command::new(binary);
        cmd.arg("-H")
            .arg(&self.uri)
            .arg("-x")
            .arg("-D")
            .arg(&self.bind_dn)
            .arg("-y")
            .arg("/dev/stdin")
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if self.settings.allow_self_signed {
            cmd.env("LDAPTLS_REQCERT", "never");
        }

        let mut child = cmd.spawn().map_err(|e| {
            ConsoleError::DirectoryError(format!("failed to run {}: {}", binary, e))
        })?;
        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(self.password.expose_secret().as_bytes())
                .await?;
            stdin.shutdown().await?;
        }

        let output = child.wait_with_output().await?;
        Ok(ToolOutput {
            exit_code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }

    async fn search(
        &self,
        base: &str,
        scope: &str,
        filter: &str,
        attrs: &[&str],
    ) -> Result<Vec<LdifEntry>, ConsoleError> {
        let mut args = vec!["-LLL", "-o", "ldif-wrap=no", "-b", base, "-s", scope, filter];
        args.extend_from_slice(attrs);

        let output = self.tool(&self.settings.ldapsearch, &args).await?;
        match output.exit_code {
            0 => ldif::parse(&output.stdout),
            LDAP_NO_SUCH_OBJECT => Ok(Vec::new()),
            code => Err(ConsoleError::DirectoryError(format!(
                "{}: search of {:?} failed ({}): {}",
                self.uri,
                base,
                code,
                output.stderr.trim()
            ))),
        }
    }

    /// Apply a modify record, `false` when the directory rejects it
    async fn modify(&self, dn: &str, modifications: &[Modification]) -> Result<bool, ConsoleError> {
        let record = ldif::modify_record(dn, modifications);
        let file = File::new(std::env::temp_dir().join(format!("clusterctl-{}.ldif", Uuid::new_v4())));
        file.write_string("").await?;
        file.set_permissions_600().await?;
        file.write_string(&record).await?;

        let path = file.path().to_string_lossy().into_owned();
        let result = self.tool(&self.settings.ldapmodify, &["-f", &path]).await;
        let _ = tokio::fs::remove_file(file.path()).await;
        let output = result?;

        if output.exit_code != 0 {
            warn!(
                "{}: modify of {} rejected ({}): {}",
                self.uri,
                dn,
                output.exit_code,
                output.stderr.trim()
            );
            return Ok(false);
        }
        Ok(true)
    }

    /// The database holding the application tree
    async fn app_database(&self) -> Result<Option<LdifEntry>, ConsoleError> {
        let filter = format!("(olcSuffix={})", APP_BASE);
        let entries = self
            .search("cn=config", "one", &filter, &[SYNCREPL_ATTR])
            .await?;
        Ok(entries.into_iter().next())
    }
}

#[async_trait]
impl DirectoryConnection for OpenLdapConnection {
    async fn change_cache_backend(
        &self,
        kind: &str,
        servers: &str,
        secret: &str,
    ) -> Result<bool, ConsoleError> {
        let entries = self
            .search(APP_BASE, "sub", "(objectClass=gluuConfiguration)", &[CACHE_ATTR])
            .await?;
        let Some(entry) = entries.into_iter().next() else {
            warn!("{}: no configuration entry under {}", self.uri, APP_BASE);
            return Ok(false);
        };

        let mut config: Value = match entry.first(CACHE_ATTR) {
            Some(raw) => serde_json::from_str(raw)?,
            None => json!({}),
        };
        apply_cache_backend(&mut config, kind, servers, secret);

        self.modify(
            &entry.dn,
            &[Modification::Replace(
                CACHE_ATTR.to_string(),
                vec![serde_json::to_string(&config)?],
            )],
        )
        .await
    }

    async fn replication_providers(&self) -> Result<Vec<String>, ConsoleError> {
        let entries = self
            .search("cn=config", "sub", "(olcSyncrepl=*)", &[SYNCREPL_ATTR])
            .await?;
        Ok(entries
            .iter()
            .flat_map(|e| e.values(SYNCREPL_ATTR))
            .filter_map(|v| provider_host(v))
            .collect())
    }

    async fn add_replication_provider(
        &self,
        provider: &ReplicationProvider,
    ) -> Result<bool, ConsoleError> {
        let Some(database) = self.app_database().await? else {
            return Ok(false);
        };
        if database
            .values(SYNCREPL_ATTR)
            .iter()
            .any(|v| v.contains(&format!("provider={}", provider.uri)))
        {
            debug!("{}: {} already a provider", self.uri, provider.uri);
            return Ok(true);
        }

        self.modify(
            &database.dn,
            &[
                Modification::Add(SYNCREPL_ATTR.to_string(), vec![syncrepl_value(provider)]),
                Modification::Replace(MIRROR_MODE_ATTR.to_string(), vec!["TRUE".to_string()]),
            ],
        )
        .await
    }

    async fn remove_replication_providers(&self) -> Result<bool, ConsoleError> {
        let Some(database) = self.app_database().await? else {
            return Ok(false);
        };
        if database.values(SYNCREPL_ATTR).is_empty() {
            return Ok(true);
        }

        self.modify(
            &database.dn,
            &[
                Modification::Delete(SYNCREPL_ATTR.to_string()),
                Modification::Replace(MIRROR_MODE_ATTR.to_string(), vec!["FALSE".to_string()]),
            ],
        )
        .await
    }
}

/// Point a cache configuration document at a standalone redis endpoint
pub fn apply_cache_backend(config: &mut Value, kind: &str, servers: &str, secret: &str) {
    if !config.is_object() {
        *config = json!({});
    }
    config["cacheProviderType"] = json!(kind);

    if !config["redisConfiguration"].is_object() {
        config["redisConfiguration"] = json!({});
    }
    let redis = &mut config["redisConfiguration"];
    redis["servers"] = json!(servers);
    redis["redisProviderType"] = json!("STANDALONE");
    if !secret.is_empty() {
        redis["password"] = json!(secret);
    }
}

/// Host part of the `provider=` URI in an olcSyncrepl value
pub fn provider_host(syncrepl: &str) -> Option<String> {
    let uri = syncrepl
        .split_whitespace()
        .find_map(|token| token.strip_prefix("provider="))?
        .trim_matches('"');
    let rest = uri.split_once("://").map(|(_, r)| r).unwrap_or(uri);
    let host = rest.split([':', '/']).next()?;
    if host.is_empty() {
        None
    } else {
        Some(host.to_string())
    }
}

fn syncrepl_value(provider: &ReplicationProvider) -> String {
    format!(
        "rid={:03} provider={} bindmethod=simple binddn=\"{}\" credentials=\"{}\" \
         searchbase=\"{}\" filter=\"(objectclass=*)\" scope=sub schemachecking=off \
         type=refreshAndPersist retry=\"60 +\" tls_reqcert=never",
        provider.rid,
        provider.uri,
        provider.bind_dn,
        provider.credentials.expose_secret(),
        APP_BASE
    )
}
