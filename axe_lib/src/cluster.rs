use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

use tracing::{instrument, warn};

use axe_data::ClusterConfig;

use crate::launcher::{LaunchSpec, Launcher, Liveness, ProcessKind, StartOutcome, StopOutcome};
use crate::remote::RemoteShell;
use crate::util;

/// workers partitioned by their marker state
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Rollcall {
    pub already: Vec<(String, Liveness)>,
    pub pending: Vec<String>,
    pub failed: Vec<(String, String)>,
}

/// per-host outcomes of one launch batch
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct StartReport {
    pub started: Vec<String>,
    pub already: Vec<(String, Liveness)>,
    pub failed: Vec<(String, String)>,
}

/// Order-sensitive composition of launcher operations for one cluster:
/// master first, then workers, then the scheduler; stop in reverse. Each
/// step reports per-host outcomes and never aborts the rest of the batch.
/// Concurrent invocations are not serialized here; the atomic marker claim
/// is the only cross-invocation guard.
pub struct ClusterController {
    launcher: Launcher,
    config: ClusterConfig,
}

impl ClusterController {
    pub fn new(shell: Arc<dyn RemoteShell>, config: ClusterConfig) -> Self {
        Self::from_launcher(Launcher::new(shell), config)
    }

    pub fn from_launcher(launcher: Launcher, config: ClusterConfig) -> Self {
        Self { launcher, config }
    }

    /// start the master on its configured host, staging the binary first
    #[instrument(skip(self))]
    pub async fn start_master(&self) -> StartOutcome {
        let host = self.config.master_hostname.clone();
        let scratch = &self.config.master_husky_scratch_dir;
        let mut markers = self
            .launcher
            .read_markers(&[host.clone()], ProcessKind::Master, scratch, true)
            .await;
        match markers.remove(&host) {
            Some(Ok(content)) => {
                if !content.is_empty() {
                    return self.reconcile(&host, &content).await;
                }
            }
            Some(Err(err)) => {
                return StartOutcome::Failed {
                    msg: err.to_string(),
                }
            }
            None => {
                return StartOutcome::Failed {
                    msg: "host missing from probe batch".to_string(),
                }
            }
        }
        let binary = Path::new(&self.config.master_husky_bin_dir).join("Master");
        let staged = self
            .launcher
            .stage(&[host.clone()], &binary, scratch)
            .await;
        match staged.get(&host) {
            Some(Ok(output)) if !output.success() => {
                // staging trouble is only a warning; the launch surfaces its own failure
                warn!("staging Master on {} failed: {}", host, output.stderr.trim());
            }
            Some(Err(err)) => warn!("staging Master on {} failed: {}", host, err),
            _ => {}
        }
        let mut flags = self.config.master_flags();
        flags.push(format!("--log_dir={}", scratch));
        let spec = LaunchSpec {
            kind: ProcessKind::Master,
            exe: "./Master".to_string(),
            flags,
            scratch: scratch.clone(),
        };
        let mut outcomes = self.launcher.launch(&[host.clone()], &spec).await;
        outcomes.remove(&host).unwrap_or(StartOutcome::Failed {
            msg: "host missing from launch batch".to_string(),
        })
    }

    /// query all worker markers in parallel and split the set; hosts holding
    /// a marker never re-enter the staging batch, live or stale
    #[instrument(skip(self))]
    pub async fn worker_rollcall(&self) -> Rollcall {
        let markers = self
            .launcher
            .read_markers(
                &self.config.workers,
                ProcessKind::Worker,
                &self.config.worker_husky_scratch_dir,
                true,
            )
            .await;
        let mut rollcall = Rollcall::default();
        let mut seen = HashSet::new();
        for host in &self.config.workers {
            if !seen.insert(host.clone()) {
                continue;
            }
            match markers.get(host) {
                Some(Ok(content)) if !content.is_empty() => {
                    let liveness = match crate::launcher::recorded_pid(content) {
                        Some(pid) => self.launcher.verify(host, &pid).await,
                        None => Liveness::Stale {
                            pid: content.clone(),
                        },
                    };
                    rollcall.already.push((host.clone(), liveness));
                }
                Some(Ok(_)) => rollcall.pending.push(host.clone()),
                Some(Err(err)) => rollcall.failed.push((host.clone(), err.to_string())),
                None => {}
            }
        }
        rollcall
    }

    /// stage the worker binary and launch on the given hosts (the pending
    /// set of a rollcall); each host writes its own marker
    #[instrument(skip(self, hosts))]
    pub async fn launch_workers(&self, hosts: &[String]) -> StartReport {
        let mut report = StartReport::default();
        if hosts.is_empty() {
            return report;
        }
        let scratch = &self.config.worker_husky_scratch_dir;
        let binary = Path::new(&self.config.worker_husky_bin_dir).join("Worker");
        let staged = self.launcher.stage(hosts, &binary, scratch).await;
        let mut launchable = Vec::new();
        for host in hosts {
            match staged.get(host) {
                Some(Ok(output)) if output.success() => launchable.push(host.clone()),
                Some(Ok(output)) => report.failed.push((
                    host.clone(),
                    format!("staging failed: {}", output.stderr.trim()),
                )),
                Some(Err(err)) => report
                    .failed
                    .push((host.clone(), format!("staging failed: {}", err))),
                None => {}
            }
        }
        let mut flags = self.config.worker_flags();
        flags.push(format!("--log_dir={}", scratch));
        let spec = LaunchSpec {
            kind: ProcessKind::Worker,
            exe: "./Worker".to_string(),
            flags,
            scratch: scratch.clone(),
        };
        let outcomes = self.launcher.launch(&launchable, &spec).await;
        for (host, outcome) in outcomes {
            match outcome {
                StartOutcome::Started => report.started.push(host),
                StartOutcome::AlreadyRunning { pid } => {
                    report.already.push((host, Liveness::Running { pid }))
                }
                StartOutcome::StaleMarker { pid } => {
                    report.already.push((host, Liveness::Stale { pid }))
                }
                StartOutcome::Failed { msg } => report.failed.push((host, msg)),
            }
        }
        report.started.sort_by(|a, b| util::version_cmp(a, b));
        report
            .already
            .sort_by(|a, b| util::version_cmp(&a.0, &b.0));
        report.failed.sort_by(|a, b| util::version_cmp(&a.0, &b.0));
        report
    }

    /// at most one scheduler runs on the master host; the executable comes
    /// straight from the bin dir, plain or container-based
    #[instrument(skip(self))]
    pub async fn start_scheduler(&self, container: bool) -> StartOutcome {
        let host = self.config.master_hostname.clone();
        let scratch = &self.config.master_husky_scratch_dir;
        let mut markers = self
            .launcher
            .read_markers(&[host.clone()], ProcessKind::Scheduler, scratch, false)
            .await;
        match markers.remove(&host) {
            Some(Ok(content)) => {
                if !content.is_empty() {
                    return self.reconcile(&host, &content).await;
                }
            }
            Some(Err(err)) => {
                return StartOutcome::Failed {
                    msg: err.to_string(),
                }
            }
            None => {
                return StartOutcome::Failed {
                    msg: "host missing from probe batch".to_string(),
                }
            }
        }
        let exe_name = if container {
            "ContainerScheduler"
        } else {
            "Scheduler"
        };
        let exe = Path::new(&self.config.master_husky_bin_dir)
            .join(exe_name)
            .to_string_lossy()
            .into_owned();
        let mut flags = self.config.scheduler_flags();
        flags.push(format!("--log_dir={}", scratch));
        let spec = LaunchSpec {
            kind: ProcessKind::Scheduler,
            exe,
            flags,
            scratch: scratch.clone(),
        };
        let mut outcomes = self.launcher.launch(&[host.clone()], &spec).await;
        outcomes.remove(&host).unwrap_or(StartOutcome::Failed {
            msg: "host missing from launch batch".to_string(),
        })
    }

    async fn reconcile(&self, host: &str, content: &str) -> StartOutcome {
        match crate::launcher::recorded_pid(content) {
            Some(pid) => match self.launcher.verify(host, &pid).await {
                Liveness::Running { pid } => StartOutcome::AlreadyRunning { pid },
                Liveness::Stale { pid } => StartOutcome::StaleMarker { pid },
            },
            None => StartOutcome::StaleMarker {
                pid: content.to_string(),
            },
        }
    }

    pub async fn stop_master(&self) -> StopOutcome {
        self.launcher
            .stop(
                &self.config.master_hostname,
                ProcessKind::Master,
                &self.config.master_husky_scratch_dir,
            )
            .await
    }

    pub async fn stop_scheduler(&self) -> StopOutcome {
        self.launcher
            .stop(
                &self.config.master_hostname,
                ProcessKind::Scheduler,
                &self.config.master_husky_scratch_dir,
            )
            .await
    }

    /// stop every worker concurrently; outcomes stay independent per host
    #[instrument(skip(self))]
    pub async fn stop_workers(&self) -> Vec<(String, StopOutcome)> {
        let mut handles = Vec::new();
        let mut seen = HashSet::new();
        for host in &self.config.workers {
            if !seen.insert(host.clone()) {
                continue;
            }
            let launcher = self.launcher.clone();
            let scratch = self.config.worker_husky_scratch_dir.clone();
            let task_host = host.clone();
            let handle = tokio::spawn(async move {
                launcher
                    .stop(&task_host, ProcessKind::Worker, &scratch)
                    .await
            });
            handles.push((host.clone(), handle));
        }
        let mut outcomes = Vec::new();
        for (host, handle) in handles {
            let outcome = match handle.await {
                Ok(outcome) => outcome,
                Err(err) => StopOutcome::Failed {
                    msg: err.to_string(),
                },
            };
            outcomes.push((host, outcome));
        }
        outcomes.sort_by(|a, b| util::version_cmp(&a.0, &b.0));
        outcomes
    }
}

#[cfg(test)]
mod test {
    use std::sync::{Arc, Once};
    use std::time::Duration;

    use lazy_static::lazy_static;
    use tokio::runtime::Runtime;

    use super::ClusterController;
    use crate::launcher::{Launcher, Liveness, StartOutcome, StopOutcome};
    use crate::remote::fake::{Call, FakeShell};
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

    fn config() -> axe_data::ClusterConfig {
        axe_data::ClusterConfig {
            master_hostname: "m0".to_string(),
            master_port: 14925,
            client_listener_port: 14926,
            master_husky_scratch_dir: "/data/axe/master".to_string(),
            master_husky_bin_dir: "/opt/axe/bin".to_string(),
            worker_husky_scratch_dir: "/data/axe/worker".to_string(),
            worker_husky_bin_dir: "/opt/axe/bin".to_string(),
            workers: vec!["h1".to_string(), "h2".to_string()],
            hdfs_namenode: None,
            hdfs_port: None,
            advanced: std::collections::BTreeMap::new(),
        }
    }

    fn controller(fake: &Arc<FakeShell>) -> ClusterController {
        let launcher = Launcher::new(fake.clone() as Arc<dyn RemoteShell>)
            .with_poll(1, Duration::from_millis(1));
        ClusterController::from_launcher(launcher, config())
    }

    // starting twice must not spawn a second master
    #[test]
    fn test_start_master_is_idempotent() {
        setup();
        let fake = Arc::new(FakeShell::new());
        // first start: no marker, stage, launch
        fake.push_stdout("m0", "");
        fake.push_ok("m0"); // scp
        fake.push_ok("m0"); // launch
        // second start: marker present, kill -0 confirms
        fake.push_stdout("m0", "4242\n");
        fake.push_ok("m0"); // kill -0
        let controller = controller(&fake);
        RUNTIME.block_on(async {
            assert_eq!(StartOutcome::Started, controller.start_master().await);
            assert_eq!(
                StartOutcome::AlreadyRunning {
                    pid: "4242".to_string()
                },
                controller.start_master().await
            );
        });
        // exactly one copy and one launch happened
        assert_eq!(1, fake.copied_hosts().len());
        let launches = fake
            .run_scripts("m0")
            .iter()
            .filter(|s| s.contains("bash --login -c"))
            .count();
        assert_eq!(1, launches);
    }

    // a marker whose pid is dead is reported stale, not relaunched
    #[test]
    fn test_start_master_reports_stale_marker() {
        setup();
        let fake = Arc::new(FakeShell::new());
        fake.push_stdout("m0", "4242");
        fake.push_exit("m0", 1); // kill -0: no such process
        let controller = controller(&fake);
        RUNTIME.block_on(async {
            assert_eq!(
                StartOutcome::StaleMarker {
                    pid: "4242".to_string()
                },
                controller.start_master().await
            );
        });
        assert!(fake.copied_hosts().is_empty());
    }

    // h1 holds a marker, h2 does not; only h2 is staged and launched
    #[test]
    fn test_rollcall_partitions_and_stages_only_pending() {
        setup();
        let fake = Arc::new(FakeShell::new());
        fake.push_stdout("h1", "123\n");
        fake.push_ok("h1"); // kill -0 for h1
        fake.push_stdout("h2", "");
        fake.push_ok("h2"); // scp
        fake.push_ok("h2"); // launch
        let controller = controller(&fake);
        RUNTIME.block_on(async {
            let rollcall = controller.worker_rollcall().await;
            assert_eq!(
                vec![(
                    "h1".to_string(),
                    Liveness::Running {
                        pid: "123".to_string()
                    }
                )],
                rollcall.already
            );
            assert_eq!(vec!["h2".to_string()], rollcall.pending);
            assert!(rollcall.failed.is_empty());

            let report = controller.launch_workers(&rollcall.pending).await;
            assert_eq!(vec!["h2".to_string()], report.started);
            assert!(report.failed.is_empty());
        });
        // the binary is never copied to a host that already holds a marker
        assert_eq!(vec!["h2".to_string()], fake.copied_hosts());
        let launch = fake
            .run_scripts("h2")
            .into_iter()
            .find(|s| s.contains("bash --login -c"))
            .unwrap();
        assert!(launch.contains("echo $! > Worker.$(hostname).pid"));
        assert!(launch.contains("> stdout.$(hostname) 2> stderr.$(hostname)"));
        assert!(launch.contains("--master_hostname=m0"));
    }

    // an unreachable worker lands in failed; the rest proceed
    #[test]
    fn test_rollcall_tolerates_unreachable_host() {
        setup();
        let fake = Arc::new(FakeShell::new());
        fake.push(
            "h1",
            crate::remote::fake::Reply::Unreachable,
        );
        fake.push_stdout("h2", "");
        let controller = controller(&fake);
        RUNTIME.block_on(async {
            let rollcall = controller.worker_rollcall().await;
            assert_eq!(1, rollcall.failed.len());
            assert_eq!("h1", rollcall.failed[0].0);
            assert_eq!(vec!["h2".to_string()], rollcall.pending);
        });
    }

    // stop with no scheduler marker performs no remote signal
    #[test]
    fn test_stop_scheduler_without_marker_is_noop() {
        setup();
        let fake = Arc::new(FakeShell::new());
        fake.push_stdout("m0", "");
        let controller = controller(&fake);
        RUNTIME.block_on(async {
            assert_eq!(StopOutcome::NotRunning, controller.stop_scheduler().await);
        });
        let scripts = fake.run_scripts("m0");
        assert_eq!(1, scripts.len());
        assert!(scripts[0].contains("cat Scheduler.pid"));
        assert!(!scripts[0].contains("kill"));
    }

    // scheduler honors the container variant
    #[test]
    fn test_start_scheduler_container_variant() {
        setup();
        let fake = Arc::new(FakeShell::new());
        fake.push_stdout("m0", ""); // no marker
        fake.push_ok("m0"); // launch
        let controller = controller(&fake);
        RUNTIME.block_on(async {
            assert_eq!(
                StartOutcome::Started,
                controller.start_scheduler(true).await
            );
        });
        let scripts = fake.run_scripts("m0");
        let launch = scripts
            .iter()
            .find(|s| s.contains("bash --login -c"))
            .unwrap();
        assert!(launch.contains("/opt/axe/bin/ContainerScheduler"));
        assert!(launch.contains("echo $! > Scheduler.pid"));
        // no staging for the scheduler
        assert!(fake.copied_hosts().is_empty());
        assert!(fake
            .calls()
            .iter()
            .all(|c| matches!(c, Call::Run { .. })));
    }

    // every worker is stopped independently
    #[test]
    fn test_stop_workers_reports_per_host() {
        setup();
        let fake = Arc::new(FakeShell::new());
        // h1 runs pid 10 and stops cleanly
        fake.push_stdout("h1", "10");
        fake.push_ok("h1"); // kill
        fake.push_stdout("h1", ""); // ps gone
        fake.push_ok("h1"); // rm
        // h2 has no marker
        fake.push_stdout("h2", "");
        let controller = controller(&fake);
        RUNTIME.block_on(async {
            let outcomes = controller.stop_workers().await;
            assert_eq!(
                vec![
                    ("h1".to_string(), StopOutcome::Stopped),
                    ("h2".to_string(), StopOutcome::NotRunning),
                ],
                outcomes
            );
        });
    }
}
