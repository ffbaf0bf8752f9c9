use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::sleep;
use tracing::{info, instrument, warn};

use crate::error::Result;
use crate::fanout::{self, PROBE_TIMEOUT};
use crate::remote::{HostOutput, RemoteShell};
use crate::script::{self, Script, CLAIM_LOST};

/// one process kind managed on remote hosts
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProcessKind {
    Master,
    Worker,
    Scheduler,
}

impl ProcessKind {
    pub fn name(self) -> &'static str {
        match self {
            ProcessKind::Master => "Master",
            ProcessKind::Worker => "Worker",
            ProcessKind::Scheduler => "Scheduler",
        }
    }

    /// marker file name as the launched host itself writes it; the worker
    /// suffix is resolved remotely so hosts staged from a shared filesystem
    /// cannot collide
    fn marker(self) -> &'static str {
        match self {
            ProcessKind::Master => "Master.pid",
            ProcessKind::Worker => "Worker.$(hostname).pid",
            ProcessKind::Scheduler => "Scheduler.pid",
        }
    }

    /// glob matching this kind's marker when reading it back
    fn marker_glob(self) -> &'static str {
        match self {
            ProcessKind::Master => "Master.pid",
            ProcessKind::Worker => "Worker.*.pid",
            ProcessKind::Scheduler => "Scheduler.pid",
        }
    }

    /// termination command for a recorded pid
    fn stop_signal(self, pid: &str) -> String {
        match self {
            // workers fork job processes; take down the child tree too
            ProcessKind::Worker => format!("pkill -P {0}; kill -9 {0}", pid),
            _ => format!("kill {}", pid),
        }
    }

    /// cleanup after a confirmed termination
    fn cleanup(self, scratch: &str) -> String {
        match self {
            // the scheduler shares the master scratch dir; remove only its marker
            ProcessKind::Scheduler => {
                format!("rm -f {}/Scheduler.pid", script::quote(scratch))
            }
            _ => format!("rm -rf {}", script::quote(scratch)),
        }
    }

    fn stdout_log(self) -> &'static str {
        match self {
            ProcessKind::Master => "stdout",
            ProcessKind::Worker => "stdout.$(hostname)",
            ProcessKind::Scheduler => "Scheduler.stdout",
        }
    }

    fn stderr_log(self) -> &'static str {
        match self {
            ProcessKind::Master => "stderr",
            ProcessKind::Worker => "stderr.$(hostname)",
            ProcessKind::Scheduler => "Scheduler.stderr",
        }
    }
}

/// what a marker claim means once the process table has been consulted
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Liveness {
    /// the recorded pid responds to signal 0
    Running { pid: String },
    /// the marker exists but the recorded pid is gone
    Stale { pid: String },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StartOutcome {
    AlreadyRunning { pid: String },
    /// marker present, process dead; an explicit stop clears it
    StaleMarker { pid: String },
    Started,
    Failed { msg: String },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StopOutcome {
    NotRunning,
    Stopped,
    /// the process survived the signal; marker and scratch dir are kept
    StillRunning { pid: String },
    Failed { msg: String },
}

/// everything needed to launch one process kind in its scratch dir
#[derive(Clone, Debug)]
pub struct LaunchSpec {
    pub kind: ProcessKind,
    /// command executed after cd into the scratch dir
    pub exe: String,
    pub flags: Vec<String>,
    pub scratch: String,
}

impl LaunchSpec {
    fn script(&self) -> String {
        let cmdline = script::exec(&self.exe, &self.flags);
        let launch = script::detached(
            &cmdline,
            self.kind.stdout_log(),
            self.kind.stderr_log(),
            self.kind.marker(),
        );
        Script::start(format!("cd {}", script::quote(&self.scratch)))
            .and(launch)
            .render()
    }
}

/// first whitespace-separated token of a marker, if it is a plain pid
pub fn recorded_pid(content: &str) -> Option<String> {
    let token = content.split_whitespace().next()?;
    if token.bytes().all(|b| b.is_ascii_digit()) {
        Some(token.to_string())
    } else {
        None
    }
}

/// Starts and stops one process kind on remote hosts, with the marker file
/// as the persisted liveness record.
#[derive(Clone)]
pub struct Launcher {
    shell: Arc<dyn RemoteShell>,
    poll_attempts: u32,
    poll_interval: Duration,
}

impl Launcher {
    pub fn new(shell: Arc<dyn RemoteShell>) -> Self {
        Self {
            shell,
            poll_attempts: 5,
            poll_interval: Duration::from_millis(500),
        }
    }

    /// tune the stop confirmation poll
    pub fn with_poll(mut self, attempts: u32, interval: Duration) -> Self {
        self.poll_attempts = attempts;
        self.poll_interval = interval;
        self
    }

    /// Read this kind's marker on every host; trimmed content, empty when
    /// absent. The start path creates the scratch dir as a side effect.
    pub async fn read_markers(
        &self,
        hosts: &[String],
        kind: ProcessKind,
        scratch: &str,
        create_dir: bool,
    ) -> HashMap<String, Result<String>> {
        let dir = script::quote(scratch);
        let enter = if create_dir {
            Script::start(format!("mkdir -p {}", dir)).and(format!("cd {}", dir))
        } else {
            Script::start(format!("cd {} 2> /dev/null", dir))
        };
        let probe = enter
            .and(format!("cat {} 2> /dev/null", kind.marker_glob()))
            .render();
        let outputs = fanout::run_all(&self.shell, hosts, &probe, Some(PROBE_TIMEOUT)).await;
        outputs
            .into_iter()
            .map(|(host, result)| (host, result.map(|o| o.trimmed().to_string())))
            .collect()
    }

    /// Signal-zero probe reconciling the marker claim with the process
    /// table. A probe that cannot reach the host leaves the claim standing.
    pub async fn verify(&self, host: &str, pid: &str) -> Liveness {
        if recorded_pid(pid).is_none() {
            return Liveness::Stale {
                pid: pid.to_string(),
            };
        }
        let probe = format!("kill -0 {} 2> /dev/null", pid);
        let run = self.shell.run(host, &probe);
        match tokio::time::timeout(PROBE_TIMEOUT, run).await {
            Ok(Ok(output)) if output.success() => Liveness::Running {
                pid: pid.to_string(),
            },
            Ok(Ok(_)) => Liveness::Stale {
                pid: pid.to_string(),
            },
            _ => Liveness::Running {
                pid: pid.to_string(),
            },
        }
    }

    /// copy a binary into the scratch dir of every host
    pub async fn stage(
        &self,
        hosts: &[String],
        binary: &Path,
        scratch: &str,
    ) -> HashMap<String, Result<HostOutput>> {
        fanout::copy_all(&self.shell, hosts, binary, scratch).await
    }

    /// Detached launch on every host. Callers have already read the markers
    /// and filtered out the hosts that hold one; the atomic claim inside the
    /// launch script catches the remaining races.
    #[instrument(skip(self, hosts, spec), fields(kind = spec.kind.name()))]
    pub async fn launch(
        &self,
        hosts: &[String],
        spec: &LaunchSpec,
    ) -> HashMap<String, StartOutcome> {
        let launch_script = spec.script();
        let outputs = fanout::run_all(&self.shell, hosts, &launch_script, None).await;
        let mut outcomes = HashMap::new();
        for (host, result) in outputs {
            let outcome = match result {
                Ok(output) if output.success() => {
                    info!("{} started on {}", spec.kind.name(), host);
                    StartOutcome::Started
                }
                Ok(output) if output.exit_code == Some(CLAIM_LOST) => {
                    // raced another invocation; fetch the winner's pid
                    let pid = self.read_marker_one(&host, spec.kind, &spec.scratch).await;
                    StartOutcome::AlreadyRunning { pid }
                }
                Ok(output) => StartOutcome::Failed {
                    msg: failure_text(&output),
                },
                Err(err) => StartOutcome::Failed {
                    msg: err.to_string(),
                },
            };
            outcomes.insert(host, outcome);
        }
        outcomes
    }

    async fn read_marker_one(&self, host: &str, kind: ProcessKind, scratch: &str) -> String {
        let mut markers = self
            .read_markers(&[host.to_string()], kind, scratch, false)
            .await;
        match markers.remove(host) {
            Some(Ok(content)) if !content.is_empty() => content,
            _ => "unknown".to_string(),
        }
    }

    /// Two-phase stop: signal the recorded pid, confirm it left the process
    /// table, and only then delete the marker and (per kind) the scratch
    /// dir. A surviving process keeps both intact.
    #[instrument(skip(self))]
    pub async fn stop(&self, host: &str, kind: ProcessKind, scratch: &str) -> StopOutcome {
        let mut markers = self
            .read_markers(&[host.to_string()], kind, scratch, false)
            .await;
        let content = match markers.remove(host) {
            Some(Ok(content)) => content,
            Some(Err(err)) => {
                return StopOutcome::Failed {
                    msg: err.to_string(),
                }
            }
            None => String::new(),
        };
        if content.is_empty() {
            return StopOutcome::NotRunning;
        }
        let pid = match recorded_pid(&content) {
            Some(pid) => pid,
            None => {
                return StopOutcome::Failed {
                    msg: format!("marker holds no usable pid: {:?}", content),
                }
            }
        };
        // phase one: signal; a dead pid makes this fail, which is fine
        let _ = self.shell.run(host, &kind.stop_signal(&pid)).await;
        // phase two: the pid must leave the process table before cleanup
        if !self.confirm_gone(host, &pid).await {
            warn!(
                "{} on {} (pid {}) survived the signal; keeping marker",
                kind.name(),
                host,
                pid
            );
            return StopOutcome::StillRunning { pid };
        }
        match self.shell.run(host, &kind.cleanup(scratch)).await {
            Ok(output) if output.success() => {
                info!("{} on {} stopped", kind.name(), host);
                StopOutcome::Stopped
            }
            Ok(output) => StopOutcome::Failed {
                msg: failure_text(&output),
            },
            Err(err) => StopOutcome::Failed {
                msg: err.to_string(),
            },
        }
    }

    async fn confirm_gone(&self, host: &str, pid: &str) -> bool {
        for attempt in 0..self.poll_attempts {
            if attempt > 0 {
                sleep(self.poll_interval).await;
            }
            if let Ok(output) = self.shell.run(host, &format!("ps -o pid= -p {}", pid)).await {
                if output.trimmed().is_empty() {
                    return true;
                }
            }
        }
        false
    }
}

fn failure_text(output: &HostOutput) -> String {
    let err = output.stderr.trim();
    let msg = if err.is_empty() {
        output.stdout.trim()
    } else {
        err
    };
    if msg.is_empty() {
        format!("remote command failed (exit code {:?})", output.exit_code)
    } else {
        msg.to_string()
    }
}

#[cfg(test)]
mod test {
    use std::sync::{Arc, Once};
    use std::time::Duration;

    use lazy_static::lazy_static;
    use tokio::runtime::Runtime;

    use super::{recorded_pid, LaunchSpec, Launcher, ProcessKind, StartOutcome, StopOutcome};
    use crate::remote::fake::FakeShell;
    use crate::remote::RemoteShell;

    lazy_static! {
        static ref RUNTIME: Runtime = Runtime::new().unwrap();
    }
    static INIT: Once = Once::new();

    pub fn setup() {
        INIT.call_once(|| {
            tracing_subscriber::fmt::init();
        });
    }

    fn launcher(fake: &Arc<FakeShell>) -> Launcher {
        Launcher::new(fake.clone() as Arc<dyn RemoteShell>)
            .with_poll(2, Duration::from_millis(1))
    }

    fn master_spec() -> LaunchSpec {
        LaunchSpec {
            kind: ProcessKind::Master,
            exe: "./Master".to_string(),
            flags: vec!["--master_port=14925".to_string()],
            scratch: "/data/axe/master".to_string(),
        }
    }

    #[test]
    fn test_recorded_pid_accepts_only_digits() {
        assert_eq!(Some("123".to_string()), recorded_pid(" 123\n"));
        assert_eq!(Some("7".to_string()), recorded_pid("7 99"));
        assert_eq!(None, recorded_pid("$(reboot)"));
        assert_eq!(None, recorded_pid(""));
    }

    // testing the launch script shape on a single host
    #[test]
    fn test_launch_runs_detached_with_claim() {
        setup();
        let fake = Arc::new(FakeShell::new());
        let launcher = launcher(&fake);
        RUNTIME.block_on(async {
            let outcomes = launcher
                .launch(&["m0".to_string()], &master_spec())
                .await;
            assert_eq!(Some(&StartOutcome::Started), outcomes.get("m0"));
        });
        let scripts = fake.run_scripts("m0");
        assert_eq!(1, scripts.len());
        assert!(scripts[0].starts_with("cd /data/axe/master && bash --login -c "));
        assert!(scripts[0].contains("./Master --master_port=14925 > stdout 2> stderr &"));
        assert!(scripts[0].contains("echo $! > Master.pid"));
        assert!(scripts[0].contains("set -C"));
    }

    // a lost claim race reports the winner instead of failing
    #[test]
    fn test_launch_lost_claim_reports_already_running() {
        setup();
        let fake = Arc::new(FakeShell::new());
        fake.push_exit("m0", super::CLAIM_LOST);
        fake.push_stdout("m0", "555\n");
        let launcher = launcher(&fake);
        RUNTIME.block_on(async {
            let outcomes = launcher
                .launch(&["m0".to_string()], &master_spec())
                .await;
            assert_eq!(
                Some(&StartOutcome::AlreadyRunning {
                    pid: "555".to_string()
                }),
                outcomes.get("m0")
            );
        });
    }

    // stop without a marker is a no-op: probe only, no signal, no cleanup
    #[test]
    fn test_stop_without_marker_is_noop() {
        setup();
        let fake = Arc::new(FakeShell::new());
        fake.push_stdout("m0", "");
        let launcher = launcher(&fake);
        RUNTIME.block_on(async {
            let outcome = launcher
                .stop("m0", ProcessKind::Master, "/data/axe/master")
                .await;
            assert_eq!(StopOutcome::NotRunning, outcome);
        });
        assert_eq!(1, fake.run_scripts("m0").len());
    }

    // confirmed termination removes marker and scratch dir
    #[test]
    fn test_stop_confirms_then_cleans_up() {
        setup();
        let fake = Arc::new(FakeShell::new());
        fake.push_stdout("m0", "77\n");
        fake.push_ok("m0"); // kill
        fake.push_stdout("m0", ""); // ps: pid gone
        fake.push_ok("m0"); // rm
        let launcher = launcher(&fake);
        RUNTIME.block_on(async {
            let outcome = launcher
                .stop("m0", ProcessKind::Master, "/data/axe/master")
                .await;
            assert_eq!(StopOutcome::Stopped, outcome);
        });
        let scripts = fake.run_scripts("m0");
        assert_eq!(4, scripts.len());
        assert_eq!("kill 77", scripts[1]);
        assert_eq!("ps -o pid= -p 77", scripts[2]);
        assert_eq!("rm -rf /data/axe/master", scripts[3]);
    }

    // a surviving process keeps the marker and the scratch dir
    #[test]
    fn test_stop_keeps_marker_when_process_survives() {
        setup();
        let fake = Arc::new(FakeShell::new());
        fake.push_stdout("w1", "88\n");
        fake.push_ok("w1"); // pkill/kill
        fake.push_stdout("w1", "   88"); // ps attempt 1: still there
        fake.push_stdout("w1", "   88"); // ps attempt 2: still there
        let launcher = launcher(&fake);
        RUNTIME.block_on(async {
            let outcome = launcher
                .stop("w1", ProcessKind::Worker, "/data/axe/worker")
                .await;
            assert_eq!(
                StopOutcome::StillRunning {
                    pid: "88".to_string()
                },
                outcome
            );
        });
        let scripts = fake.run_scripts("w1");
        assert!(scripts[1].contains("pkill -P 88"));
        assert!(scripts[1].contains("kill -9 88"));
        assert!(!scripts.iter().any(|s| s.starts_with("rm")));
    }

    // a malformed marker is never interpolated into a remote command
    #[test]
    fn test_stop_rejects_malformed_marker() {
        setup();
        let fake = Arc::new(FakeShell::new());
        fake.push_stdout("m0", "$(reboot)");
        let launcher = launcher(&fake);
        RUNTIME.block_on(async {
            let outcome = launcher
                .stop("m0", ProcessKind::Master, "/data/axe/master")
                .await;
            match outcome {
                StopOutcome::Failed { msg } => assert!(msg.contains("no usable pid")),
                other => panic!("expected failure, got: {:?}", other),
            }
        });
        assert_eq!(1, fake.run_scripts("m0").len());
    }

    // scheduler cleanup leaves the shared scratch dir alone
    #[test]
    fn test_scheduler_stop_removes_only_its_marker() {
        setup();
        let fake = Arc::new(FakeShell::new());
        fake.push_stdout("m0", "91");
        fake.push_ok("m0"); // kill
        fake.push_stdout("m0", ""); // ps: gone
        fake.push_ok("m0"); // rm marker
        let launcher = launcher(&fake);
        RUNTIME.block_on(async {
            let outcome = launcher
                .stop("m0", ProcessKind::Scheduler, "/data/axe/master")
                .await;
            assert_eq!(StopOutcome::Stopped, outcome);
        });
        let scripts = fake.run_scripts("m0");
        assert_eq!("rm -f /data/axe/master/Scheduler.pid", scripts[3]);
        assert!(!scripts.iter().any(|s| s.contains("rm -rf")));
    }
}
