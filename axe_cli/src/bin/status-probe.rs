use std::path::PathBuf;
use std::process;
use std::sync::Arc;

use structopt::StructOpt;

use axe_data::{ClusterConfig, JobConfig};
use axe_lib::probe::StatusProbe;
use axe_lib::remote::OpenSsh;

/// Check if workers or job processes are running
#[derive(StructOpt, Debug)]
#[structopt(name = "status-probe")]
struct Opt {
    /// Your system config (in JSON)
    #[structopt(long, default_value = "config.json", parse(from_os_str))]
    config: PathBuf,

    /// Your config (in JSON) for submitting job
    #[structopt(long, default_value = "job.json", parse(from_os_str))]
    job: PathBuf,

    /// check jms
    #[structopt(long)]
    jm: bool,

    /// Check workers
    #[structopt(short = "w", long = "check-workers", default_value = "1")]
    check_workers: i32,

    /// Check job processes
    #[structopt(short = "j", long = "job-id")]
    job_id: Option<u64>,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();
    let opt = Opt::from_args();
    let cluster = match ClusterConfig::load(&opt.config) {
        Ok(cluster) => cluster,
        Err(err) => {
            eprintln!("{}", err);
            process::exit(1);
        }
    };
    let job = match JobConfig::load(&opt.job) {
        Ok(job) => job,
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
    let probe = StatusProbe::new(shell, cluster);

    if opt.check_workers != 0 {
        for line in probe.check_workers().await {
            println!("{}", line);
        }
    }

    if let Some(job_id) = opt.job_id {
        println!("Running jps: ");
        for line in probe.list_job_processes(job_id).await {
            println!("{}", line);
        }
    }

    if opt.jm {
        if opt.job_id.is_some() {
            println!("Running jm: ");
        } else {
            println!("Running jms: ");
        }
        for line in probe.list_job_managers(&job, opt.job_id).await {
            println!("{}", line);
        }
    }
}
