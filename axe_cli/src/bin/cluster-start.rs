use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use std::time::Duration;

use structopt::StructOpt;
use tokio::time::sleep;

use axe_data::ClusterConfig;
use axe_lib::cluster::ClusterController;
use axe_lib::launcher::{Liveness, StartOutcome};
use axe_lib::remote::OpenSsh;

/// Start system. Start workers in parallel.
#[derive(StructOpt, Debug)]
#[structopt(name = "cluster-start")]
struct Opt {
    /// Your config (in JSON) for running AXE.
    #[structopt(short = "C", long, default_value = "config.json", parse(from_os_str))]
    config: PathBuf,

    /// Launch container-based version.
    #[structopt(long)]
    container: bool,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();
    let opt = Opt::from_args();
    let config = match ClusterConfig::load(&opt.config) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("{}", err);
            process::exit(1);
        }
    };
    let shell = match OpenSsh::detect().await {
        Ok(shell) => Arc::new(shell),
        Err(err) => {
            eprintln!("{}", err);
            process::exit(1);
        }
    };
    let controller = ClusterController::new(shell, config);

    match controller.start_master().await {
        StartOutcome::Started => println!("Master started"),
        StartOutcome::AlreadyRunning { pid } => {
            println!("Master already started (PID: {})", pid)
        }
        StartOutcome::StaleMarker { pid } => println!(
            "Master marker found but PID {} is not alive; run cluster-stop first",
            pid
        ),
        StartOutcome::Failed { msg } => eprintln!("Master failed to start: {}", msg),
    }

    let rollcall = controller.worker_rollcall().await;
    for (host, liveness) in &rollcall.already {
        match liveness {
            Liveness::Running { pid } => {
                println!("Worker on {} already started (PID: {})", host, pid)
            }
            Liveness::Stale { pid } => println!(
                "Worker marker on {} is stale (PID: {}); run cluster-stop first",
                host, pid
            ),
        }
    }
    for (host, msg) in &rollcall.failed {
        eprintln!("cannot check Worker on {}: {}", host, msg);
    }
    if !rollcall.pending.is_empty() {
        println!("scp file to hosts: {}", rollcall.pending.join(" "));
        println!("Starting workers on hosts: {}", rollcall.pending.join(" "));
        let report = controller.launch_workers(&rollcall.pending).await;
        for host in &report.started {
            println!("Worker started on {}", host);
        }
        for (host, liveness) in &report.already {
            if let Liveness::Running { pid } = liveness {
                println!("Worker on {} already started (PID: {})", host, pid);
            }
        }
        for (host, msg) in &report.failed {
            eprintln!("Worker on {} failed to start: {}", host, msg);
        }
    }

    // the scheduler reads the worker set once at startup; give workers a
    // moment to come up
    sleep(Duration::from_secs(2)).await;

    match controller.start_scheduler(opt.container).await {
        StartOutcome::Started => println!("Scheduler started."),
        StartOutcome::AlreadyRunning { pid } => {
            println!("Scheduler already started (PID: {})", pid)
        }
        StartOutcome::StaleMarker { pid } => println!(
            "Scheduler marker found but PID {} is not alive; run scheduler-control --start 0 first",
            pid
        ),
        StartOutcome::Failed { msg } => eprintln!("Scheduler failed to start: {}", msg),
    }
}
