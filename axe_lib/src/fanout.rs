use std::collections::HashMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::timeout;

use crate::error::{AxeError, Result};
use crate::remote::{HostOutput, RemoteShell};

/// bound applied to liveness-probe batches (staging and launch run unbounded)
pub const PROBE_TIMEOUT: Duration = Duration::from_secs(10);

/// Run one script on every host concurrently. Outcomes are independent per
/// host: a failure or timeout on one host never aborts the others, and there
/// is no retry.
pub async fn run_all(
    shell: &Arc<dyn RemoteShell>,
    hosts: &[String],
    script: &str,
    bound: Option<Duration>,
) -> HashMap<String, Result<HostOutput>> {
    let mut handles = Vec::with_capacity(hosts.len());
    for host in hosts {
        let shell = Arc::clone(shell);
        let task_host = host.clone();
        let script = script.to_string();
        let handle = tokio::spawn(async move {
            bounded(shell.run(&task_host, &script), &task_host, bound).await
        });
        handles.push((host.clone(), handle));
    }
    collect(handles).await
}

/// copy one local file to every host concurrently, unbounded
pub async fn copy_all(
    shell: &Arc<dyn RemoteShell>,
    hosts: &[String],
    local: &Path,
    remote: &str,
) -> HashMap<String, Result<HostOutput>> {
    let mut handles = Vec::with_capacity(hosts.len());
    for host in hosts {
        let shell = Arc::clone(shell);
        let task_host = host.clone();
        let local: PathBuf = local.to_path_buf();
        let remote = remote.to_string();
        let handle =
            tokio::spawn(async move { shell.copy(&task_host, &local, &remote).await });
        handles.push((host.clone(), handle));
    }
    collect(handles).await
}

async fn bounded(
    fut: impl Future<Output = Result<HostOutput>>,
    host: &str,
    bound: Option<Duration>,
) -> Result<HostOutput> {
    match bound {
        Some(limit) => match timeout(limit, fut).await {
            Ok(result) => result,
            Err(_) => Err(AxeError::Timeout {
                host: host.to_string(),
            }),
        },
        None => fut.await,
    }
}

async fn collect(
    handles: Vec<(String, JoinHandle<Result<HostOutput>>)>,
) -> HashMap<String, Result<HostOutput>> {
    let mut outcomes = HashMap::new();
    for (host, handle) in handles {
        let outcome = match handle.await {
            Ok(result) => result,
            Err(err) => Err(AxeError::Internal(err.to_string())),
        };
        outcomes.insert(host, outcome);
    }
    outcomes
}
