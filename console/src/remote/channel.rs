//! Remote execution channel

use std::path::Path;

use async_trait::async_trait;

use crate::errors::ConsoleError;
use crate::filesys::file::File;

/// Result of a command run on a remote host
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Address of a host to connect to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostTarget {
    pub hostname: String,
    pub ip: String,
}

impl HostTarget {
    pub fn new(hostname: impl Into<String>, ip: impl Into<String>) -> Self {
        Self {
            hostname: hostname.into(),
            ip: ip.into(),
        }
    }
}

/// An open connection to one host
#[async_trait]
pub trait RemoteChannel: Send + Sync {
    /// Run a shell command on the host
    async fn run(&self, command: &str) -> Result<CommandOutput, ConsoleError>;

    /// Whether `path` exists on the host
    async fn exists(&self, path: &str) -> Result<bool, ConsoleError>;

    /// Write `contents` to `path`, replacing any existing file
    async fn put_file(&self, path: &str, contents: &str) -> Result<(), ConsoleError>;

    /// Read `path`, `None` when it does not exist
    async fn get_file(&self, path: &str) -> Result<Option<String>, ConsoleError>;

    /// Copy a local file to `remote`
    async fn upload_file(&self, local: &Path, remote: &str) -> Result<(), ConsoleError> {
        let contents = tokio::fs::read_to_string(local).await?;
        self.put_file(remote, &contents).await
    }

    /// Copy `remote` to a local file, `false` when the remote file does not exist
    async fn download_file(&self, remote: &str, local: &Path) -> Result<bool, ConsoleError> {
        match self.get_file(remote).await? {
            Some(contents) => {
                File::new(local).write_atomic(contents.as_bytes()).await?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Release the connection
    async fn close(&self) -> Result<(), ConsoleError> {
        Ok(())
    }
}

/// Opens channels to hosts
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, target: &HostTarget) -> Result<Box<dyn RemoteChannel>, ConsoleError>;
}
