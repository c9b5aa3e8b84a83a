//! Remote channel over the system ssh client

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

use crate::errors::ConsoleError;
use crate::remote::channel::{CommandOutput, Connector, HostTarget, RemoteChannel};
use crate::storage::settings::SshSettings;
use crate::utils::shell_quote;

/// ssh exits with this status when the connection itself failed
const SSH_CONNECTION_FAILURE: i32 = 255;

/// Opens [`SshChannel`]s with the configured client options
#[derive(Debug, Clone)]
pub struct SshConnector {
    settings: SshSettings,
}

impl SshConnector {
    pub fn new(settings: SshSettings) -> Self {
        Self { settings }
    }

    fn base_args(&self, target: &HostTarget) -> Vec<String> {
        let s = &self.settings;
        let mut args = vec![
            "-o".to_string(),
            "BatchMode=yes".to_string(),
            "-o".to_string(),
            format!("ConnectTimeout={}", s.connect_timeout_secs),
            "-o".to_string(),
            format!(
                "StrictHostKeyChecking={}",
                if s.strict_host_key_checking { "yes" } else { "no" }
            ),
            "-o".to_string(),
            "ControlMaster=auto".to_string(),
            "-o".to_string(),
            format!("ControlPath={}/clusterctl-%C", s.control_dir.trim_end_matches('/')),
            "-o".to_string(),
            "ControlPersist=60".to_string(),
            "-p".to_string(),
            s.port.to_string(),
        ];
        if let Some(identity) = &s.identity_file {
            args.push("-i".to_string());
            args.push(identity.clone());
        }
        args.push(format!("{}@{}", s.user, target.ip));
        args
    }
}

#[async_trait]
impl Connector for SshConnector {
    async fn connect(&self, target: &HostTarget) -> Result<Box<dyn RemoteChannel>, ConsoleError> {
        let channel = SshChannel {
            binary: self.settings.binary.clone(),
            args: self.base_args(target),
            label: format!("{} ({})", target.hostname, target.ip),
            timeout: Duration::from_secs(self.settings.connect_timeout_secs + 5),
        };

        debug!("Opening ssh connection to {}", channel.label);
        let probe = tokio::time::timeout(channel.timeout, channel.run("true"))
            .await
            .map_err(|_| {
                ConsoleError::ConnectionError(format!("{}: connection timed out", channel.label))
            })??;

        if !probe.success() {
            return Err(ConsoleError::ConnectionError(format!(
                "{}: {}",
                channel.label,
                probe.stderr.trim()
            )));
        }

        Ok(Box::new(channel))
    }
}

/// A channel backed by a multiplexed ssh connection
pub struct SshChannel {
    binary: String,
    args: Vec<String>,
    label: String,
    timeout: Duration,
}

impl SshChannel {
    fn command(&self, remote_command: &str) -> Command {
        let mut cmd = Command::new(&self.binary);
        cmd.args(&self.args)
            .arg("--")
            .arg(remote_command)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }
}

fn to_output(output: std::process::Output) -> CommandOutput {
    CommandOutput {
        exit_code: output.status.code().unwrap_or(-1),
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
    }
}

#[async_trait]
impl RemoteChannel for SshChannel {
    async fn run(&self, command: &str) -> Result<CommandOutput, ConsoleError> {
        debug!("[{}] $ {}", self.label, command);
        let output = self
            .command(command)
            .output()
            .await
            .map_err(|e| ConsoleError::RemoteError(format!("failed to run ssh: {}", e)))?;
        let output = to_output(output);

        if output.exit_code == SSH_CONNECTION_FAILURE && output.stdout.is_empty() {
            return Err(ConsoleError::ConnectionError(format!(
                "{}: {}",
                self.label,
                output.stderr.trim()
            )));
        }
        Ok(output)
    }

    async fn exists(&self, path: &str) -> Result<bool, ConsoleError> {
        let output = self.run(&format!("test -e {}", shell_quote(path))).await?;
        Ok(output.success())
    }

    async fn put_file(&self, path: &str, contents: &str) -> Result<(), ConsoleError> {
        debug!("[{}] writing {} ({} bytes)", self.label, path, contents.len());
        let mut child = self
            .command(&format!("cat > {}", shell_quote(path)))
            .stdin(Stdio::piped())
            .spawn()
            .map_err(|e| ConsoleError::RemoteError(format!("failed to run ssh: {}", e)))?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(contents.as_bytes()).await?;
            stdin.shutdown().await?;
        }

        let output = to_output(child.wait_with_output().await?);
        if !output.success() {
            return Err(ConsoleError::RemoteError(format!(
                "{}: unable to write {}: {}",
                self.label,
                path,
                output.stderr.trim()
            )));
        }
        Ok(())
    }

    async fn get_file(&self, path: &str) -> Result<Option<String>, ConsoleError> {
        let quoted = shell_quote(path);
        let output = self
            .run(&format!("if [ -f {0} ]; then cat {0}; else exit 3; fi", quoted))
            .await?;
        match output.exit_code {
            0 => Ok(Some(output.stdout)),
            3 => Ok(None),
            _ => Err(ConsoleError::RemoteError(format!(
                "{}: unable to read {}: {}",
                self.label,
                path,
                output.stderr.trim()
            ))),
        }
    }

    async fn close(&self) -> Result<(), ConsoleError> {
        let _ = Command::new(&self.binary)
            .args(["-O", "exit"])
            .args(&self.args)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await;
        Ok(())
    }
}
