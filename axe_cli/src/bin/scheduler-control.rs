use std::path::PathBuf;
use std::process;
use std::sync::Arc;

use structopt::StructOpt;

use axe_data::ClusterConfig;
use axe_lib::cluster::ClusterController;
use axe_lib::launcher::{StartOutcome, StopOutcome};
use axe_lib::remote::OpenSsh;

/// Start/Stop scheduler.
#[derive(StructOpt, Debug)]
#[structopt(name = "scheduler-control")]
struct Opt {
    /// Your config (in JSON) for running AXE.
    #[structopt(short = "C", long, default_value = "config.json", parse(from_os_str))]
    config: PathBuf,

    /// Start Scheduler if 1, else stop Scheduler.
    #[structopt(long, default_value = "0")]
    start: i32,

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

    if opt.start != 0 {
        match controller.start_scheduler(opt.container).await {
            StartOutcome::Started => println!("Scheduler started."),
            StartOutcome::AlreadyRunning { pid } => {
                println!("Scheduler already started (PID: {})", pid)
            }
            StartOutcome::StaleMarker { pid } => println!(
                "Scheduler marker found but PID {} is not alive; stop it first",
                pid
            ),
            StartOutcome::Failed { msg } => eprintln!("Scheduler failed to start: {}", msg),
        }
    } else {
        match controller.stop_scheduler().await {
            StopOutcome::NotRunning => println!("Scheduler is not running"),
            StopOutcome::Stopped => println!("Scheduler stopped."),
            StopOutcome::StillRunning { pid } => {
                println!("Scheduler (PID: {}) did not exit; marker kept", pid)
            }
            StopOutcome::Failed { msg } => eprintln!("Scheduler stop failed: {}", msg),
        }
    }
}
