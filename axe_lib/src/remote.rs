use std::path::Path;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

use crate::error::{AxeError, Result};

/// outcome of one command on one host
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HostOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: Option<i32>,
}

impl HostOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }

    /// stdout with surrounding whitespace removed
    pub fn trimmed(&self) -> &str {
        self.stdout.trim()
    }
}

impl From<std::process::Output> for HostOutput {
    fn from(output: std::process::Output) -> Self {
        Self {
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            exit_code: output.status.code(),
        }
    }
}

/// Remote-execution capability: run a shell script on a host, or copy a
/// local file to it. Injected into every component that touches the cluster
/// so the backend can be substituted.
#[async_trait]
pub trait RemoteShell: Send + Sync {
    async fn run(&self, host: &str, script: &str) -> Result<HostOutput>;

    async fn copy(&self, host: &str, local: &Path, remote: &str) -> Result<HostOutput>;
}

/// ssh/scp backed implementation
pub struct OpenSsh {
    _private: (),
}

impl OpenSsh {
    /// probes the local machine for ssh and scp
    pub async fn detect() -> Result<Self> {
        which("ssh").await?;
        which("scp").await?;
        Ok(Self { _private: () })
    }
}

async fn which(tool: &'static str) -> Result<()> {
    let status = Command::new("which")
        .arg(tool)
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await?;
    if status.success() {
        Ok(())
    } else {
        Err(AxeError::MissingTool(tool))
    }
}

#[async_trait]
impl RemoteShell for OpenSsh {
    async fn run(&self, host: &str, script: &str) -> Result<HostOutput> {
        debug!("ssh {} {:?}", host, script);
        let output = Command::new("ssh").arg(host).arg(script).output().await?;
        Ok(HostOutput::from(output))
    }

    async fn copy(&self, host: &str, local: &Path, remote: &str) -> Result<HostOutput> {
        let target = format!("{}:{}", host, remote);
        debug!("scp -q {} {}", local.display(), target);
        let output = Command::new("scp")
            .arg("-q")
            .arg(local)
            .arg(target)
            .output()
            .await?;
        Ok(HostOutput::from(output))
    }
}
