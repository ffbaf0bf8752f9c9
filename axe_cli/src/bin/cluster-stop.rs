use std::path::PathBuf;
use std::process;
use std::sync::Arc;

use structopt::StructOpt;

use axe_data::ClusterConfig;
use axe_lib::cluster::ClusterController;
use axe_lib::launcher::StopOutcome;
use axe_lib::remote::OpenSsh;

/// Stop the whole system: scheduler first, then master, then workers.
#[derive(StructOpt, Debug)]
#[structopt(name = "cluster-stop")]
struct Opt {
    /// Your config (in JSON) for running AXE.
    #[structopt(short = "C", long, default_value = "config.json", parse(from_os_str))]
    config: PathBuf,
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

    match controller.stop_scheduler().await {
        StopOutcome::NotRunning => println!("Scheduler is not running"),
        StopOutcome::Stopped => println!("Scheduler stopped."),
        StopOutcome::StillRunning { pid } => {
            println!("Scheduler (PID: {}) did not exit; marker kept", pid)
        }
        StopOutcome::Failed { msg } => eprintln!("Scheduler stop failed: {}", msg),
    }

    match controller.stop_master().await {
        StopOutcome::NotRunning => println!("Master is not running"),
        StopOutcome::Stopped => println!("Master stopped"),
        StopOutcome::StillRunning { pid } => {
            println!("Master (PID: {}) did not exit; marker kept", pid)
        }
        StopOutcome::Failed { msg } => eprintln!("Master stop failed: {}", msg),
    }

    for (host, outcome) in controller.stop_workers().await {
        match outcome {
            StopOutcome::NotRunning => println!("Worker on {} is not running", host),
            StopOutcome::Stopped => println!("Worker on {} stopped", host),
            StopOutcome::StillRunning { pid } => {
                println!("Worker on {} (PID: {}) did not exit; marker kept", host, pid)
            }
            StopOutcome::Failed { msg } => eprintln!("Worker stop on {} failed: {}", host, msg),
        }
    }
}
