use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use axe_data::{ClusterConfig, JobConfig};

use crate::error::Result;
use crate::fanout::{self, PROBE_TIMEOUT};
use crate::remote::{HostOutput, RemoteShell};
use crate::script;
use crate::util;

/// states a job process embeds in its own command line once it is done;
/// such entries are finished, not live
const TERMINAL_STATES: [&str; 2] = ["SUCCESS", "FAILURE"];

/// Read-only diagnostics: which workers are alive, and which job manager /
/// job process instances of a job still show up in the process tables.
pub struct StatusProbe {
    shell: Arc<dyn RemoteShell>,
    cluster: ClusterConfig,
}

impl StatusProbe {
    pub fn new(shell: Arc<dyn RemoteShell>, cluster: ClusterConfig) -> Self {
        Self { shell, cluster }
    }

    /// one line per worker host telling whether its marker pid is alive
    pub async fn check_workers(&self) -> Vec<String> {
        let probe = format!(
            "pid=$(cat {}/Worker.*.pid 2> /dev/null) && kill -0 $pid 2> /dev/null \
             && echo 'Worker is running' || echo 'Worker is not running'",
            self.cluster.worker_husky_scratch_dir
        );
        let outputs = fanout::run_all(
            &self.shell,
            &self.cluster.workers,
            &probe,
            Some(PROBE_TIMEOUT),
        )
        .await;
        collect_lines(outputs)
    }

    /// live job processes of one job across the workers
    pub async fn list_job_processes(&self, job_id: u64) -> Vec<String> {
        let pattern = format!(r"JP-[0-9.]*\.{} ", job_id);
        self.grep_process_tables(&pattern).await
    }

    /// live job managers, optionally narrowed to one job
    pub async fn list_job_managers(&self, job: &JobConfig, job_id: Option<u64>) -> Vec<String> {
        let name = executable_name(&job.job_manager);
        let pattern = match job_id {
            Some(id) => format!(r"{}-[0-9.]*\.{} ", name, id),
            None => format!(r"{}[^\s]* ", name),
        };
        self.grep_process_tables(&pattern).await
    }

    async fn grep_process_tables(&self, pattern: &str) -> Vec<String> {
        let probe = format!(
            "ps x -o pid,command | grep -E {} -o | grep -v grep",
            script::quote(pattern)
        );
        let outputs = fanout::run_all(
            &self.shell,
            &self.cluster.workers,
            &probe,
            Some(PROBE_TIMEOUT),
        )
        .await;
        collect_lines(outputs)
    }
}

/// prefix each stdout line with its host, drop finished entries, and order
/// the result version-aware so numeric ids sort numerically
fn collect_lines(outputs: HashMap<String, Result<HostOutput>>) -> Vec<String> {
    let mut lines = Vec::new();
    for (host, result) in outputs {
        match result {
            Ok(output) => {
                for line in output.stdout.lines() {
                    let line = line.trim_end();
                    if line.is_empty() || is_terminal(line) {
                        continue;
                    }
                    lines.push(format!("{}: {}", host, line));
                }
            }
            Err(err) => lines.push(format!("{}: {}", host, err)),
        }
    }
    lines.sort_by(|a, b| util::version_cmp(a, b));
    lines
}

fn is_terminal(line: &str) -> bool {
    TERMINAL_STATES.iter().any(|marker| line.contains(marker))
}

fn executable_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default()
}
