//! Package and service management on top of a [`RemoteChannel`]

use tracing::debug;

use crate::errors::ConsoleError;
use crate::models::server::OsFamily;
use crate::remote::channel::{CommandOutput, Connector, HostTarget, RemoteChannel};
use crate::utils::shell_quote;

/// A connected host together with its OS family
pub struct HostSession {
    channel: Box<dyn RemoteChannel>,
    os: OsFamily,
}

impl HostSession {
    pub fn new(channel: Box<dyn RemoteChannel>, os: OsFamily) -> Self {
        Self { channel, os }
    }

    /// Connect to `target`, detecting the OS family remotely unless `os` is given
    pub async fn open(
        connector: &dyn Connector,
        target: &HostTarget,
        os: Option<OsFamily>,
    ) -> Result<Self, ConsoleError> {
        let channel = connector.connect(target).await?;
        let os = match os {
            Some(os) => os,
            None => detect_os(channel.as_ref()).await?,
        };
        debug!("{} is a {:?} host", target.hostname, os);
        Ok(Self::new(channel, os))
    }

    pub fn os(&self) -> OsFamily {
        self.os
    }

    pub async fn run(&self, command: &str) -> Result<CommandOutput, ConsoleError> {
        self.channel.run(command).await
    }

    /// Run `command`, failing on a non-zero exit status
    pub async fn run_checked(&self, command: &str) -> Result<CommandOutput, ConsoleError> {
        let output = self.channel.run(command).await?;
        if !output.success() {
            return Err(ConsoleError::RemoteError(format!(
                "`{}` exited with {}: {}",
                command,
                output.exit_code,
                output.stderr.trim()
            )));
        }
        Ok(output)
    }

    pub async fn exists(&self, path: &str) -> Result<bool, ConsoleError> {
        self.channel.exists(path).await
    }

    /// Whether any of `paths` exists
    pub async fn any_exists(&self, paths: &[&str]) -> Result<bool, ConsoleError> {
        for path in paths {
            if self.channel.exists(path).await? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    pub async fn put_file(&self, path: &str, contents: &str) -> Result<(), ConsoleError> {
        self.channel.put_file(path, contents).await
    }

    pub async fn get_file(&self, path: &str) -> Result<Option<String>, ConsoleError> {
        self.channel.get_file(path).await
    }

    pub async fn install_package(&self, name: &str) -> Result<CommandOutput, ConsoleError> {
        let name = shell_quote(name);
        let command = match self.os {
            OsFamily::Debian => format!(
                "DEBIAN_FRONTEND=noninteractive apt-get update -q && \
                 DEBIAN_FRONTEND=noninteractive apt-get install -y {}",
                name
            ),
            OsFamily::RedHat => format!("yum install -y {}", name),
        };
        self.channel.run(&command).await
    }

    pub async fn remove_package(&self, name: &str) -> Result<CommandOutput, ConsoleError> {
        let name = shell_quote(name);
        let command = match self.os {
            OsFamily::Debian => format!("DEBIAN_FRONTEND=noninteractive apt-get remove -y {}", name),
            OsFamily::RedHat => format!("yum remove -y {}", name),
        };
        self.channel.run(&command).await
    }

    async fn systemctl(&self, action: &str, service: &str) -> Result<CommandOutput, ConsoleError> {
        self.channel
            .run(&format!("systemctl {} {}", action, shell_quote(service)))
            .await
    }

    pub async fn enable_service(&self, service: &str) -> Result<CommandOutput, ConsoleError> {
        self.systemctl("enable", service).await
    }

    pub async fn disable_service(&self, service: &str) -> Result<CommandOutput, ConsoleError> {
        self.systemctl("disable", service).await
    }

    pub async fn start_service(&self, service: &str) -> Result<CommandOutput, ConsoleError> {
        self.systemctl("start", service).await
    }

    pub async fn stop_service(&self, service: &str) -> Result<CommandOutput, ConsoleError> {
        self.systemctl("stop", service).await
    }

    pub async fn restart_service(&self, service: &str) -> Result<CommandOutput, ConsoleError> {
        self.systemctl("restart", service).await
    }

    pub async fn close(&self) -> Result<(), ConsoleError> {
        self.channel.close().await
    }
}

/// Classify a host by its release marker files
pub async fn detect_os(channel: &dyn RemoteChannel) -> Result<OsFamily, ConsoleError> {
    if channel.exists("/etc/debian_version").await? {
        return Ok(OsFamily::Debian);
    }
    if channel.exists("/etc/redhat-release").await? {
        return Ok(OsFamily::RedHat);
    }
    Err(ConsoleError::RemoteError(
        "unable to determine the OS family of the host".to_string(),
    ))
}
