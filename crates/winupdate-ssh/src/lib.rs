//! `winupdate-ssh`: a [`Transport`] over the OpenSSH client binaries.
//!
//! Commands run through `ssh`, files are copied with `scp`. Both are spawned
//! as subprocesses with `BatchMode=yes`, so authentication must already work
//! without a prompt (key in `--identity` or an agent).

mod process;

use std::io::Write;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tempfile::NamedTempFile;
use tokio::process::Command;
use tracing::debug;
use winupdate_core::{RemoteInvocation, Transport, TransportError};

/// `ssh` exits 255 when the connection itself failed.
pub const SSH_CONNECTION_FAILURE: i32 = 255;

pub const DEFAULT_PORT: u16 = 22;

// ─── SshTarget ────────────────────────────────────────────────────────────

/// Where and how to connect.
#[derive(Debug, Clone)]
pub struct SshTarget {
    pub host: String,
    pub user: Option<String>,
    pub port: u16,
    pub identity: Option<PathBuf>,
    /// Extra `-o key=value` client options.
    pub options: Vec<String>,
    pub ssh_program: PathBuf,
    pub scp_program: PathBuf,
}

impl SshTarget {
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            user: None,
            port: DEFAULT_PORT,
            identity: None,
            options: Vec::new(),
            ssh_program: PathBuf::from("ssh"),
            scp_program: PathBuf::from("scp"),
        }
    }

    /// `user@host`, or just `host` when no user is set.
    pub fn destination(&self) -> String {
        match &self.user {
            Some(user) => format!("{user}@{}", self.host),
            None => self.host.clone(),
        }
    }

    fn common_args(&self, cmd: &mut Command) {
        cmd.arg("-o").arg("BatchMode=yes");
        for opt in &self.options {
            cmd.arg("-o").arg(opt);
        }
        if let Some(identity) = &self.identity {
            cmd.arg("-i").arg(identity);
        }
    }

    fn ssh_command(&self, remote_command: &str) -> Command {
        let mut cmd = Command::new(&self.ssh_program);
        self.common_args(&mut cmd);
        cmd.arg("-p")
            .arg(self.port.to_string())
            .arg(self.destination())
            .arg(remote_command);
        cmd
    }

    fn scp_command(&self, local: &Path, remote_path: &str) -> Command {
        let mut cmd = Command::new(&self.scp_program);
        cmd.arg("-q");
        self.common_args(&mut cmd);
        cmd.arg("-P")
            .arg(self.port.to_string())
            .arg(local)
            .arg(format!("{}:{remote_path}", self.destination()));
        cmd
    }
}

// ─── SshTransport ─────────────────────────────────────────────────────────

pub struct SshTransport {
    target: SshTarget,
}

impl SshTransport {
    pub fn new(target: SshTarget) -> Self {
        Self { target }
    }
}

#[async_trait]
impl Transport for SshTransport {
    async fn upload(&self, path: &str, contents: &[u8]) -> Result<(), TransportError> {
        let mut local = NamedTempFile::new()?;
        local.write_all(contents)?;
        local.flush()?;

        debug!(path, host = %self.target.host, "scp");
        let exit = process::run(self.target.scp_command(local.path(), path)).await?;
        match exit.code {
            Some(0) => Ok(()),
            _ => Err(TransportError::Upload {
                path: path.to_string(),
                message: exit.describe("scp"),
            }),
        }
    }

    async fn run(&self, invocation: &RemoteInvocation) -> Result<i32, TransportError> {
        debug!(command = invocation.command(), host = %self.target.host, "ssh");
        let exit = process::run(self.target.ssh_command(invocation.command())).await?;
        match exit.code {
            Some(SSH_CONNECTION_FAILURE) => Err(TransportError::Connection(exit.describe("ssh"))),
            Some(code) => Ok(code),
            None => Err(TransportError::Process(exit.describe("ssh"))),
        }
    }
}
