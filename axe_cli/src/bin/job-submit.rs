use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use std::time::Duration;

use chrono::TimeZone;
use structopt::StructOpt;

use axe_data::{JobConfig, JobOverrides};
use axe_lib::remote::OpenSsh;
use axe_lib::submit::{check_job_files, JobSubmitter, ReportChannel};
use axe_lib::util;

/// Submit job to the system.
#[derive(StructOpt, Debug)]
#[structopt(name = "job-submit")]
struct Opt {
    /// Your job config (in JSON). Default is job.json.
    #[structopt(long, default_value = "job.json", parse(from_os_str))]
    config: PathBuf,

    /// The job config file.
    #[structopt(short = "j", long = "job-conf", parse(from_os_str))]
    job_conf: Option<PathBuf>,

    /// The binary file of the job manager executable.
    #[structopt(long = "job-manager", parse(from_os_str))]
    job_manager: Option<PathBuf>,

    /// The binary file of the job process executable.
    #[structopt(long = "job-process", parse(from_os_str))]
    job_process: Option<PathBuf>,

    /// The hostname of the master.
    #[structopt(short = "m", long = "master-host")]
    master_host: Option<String>,

    /// The client listener port on master host.
    #[structopt(short = "p", long)]
    port: Option<u16>,

    /// Master scratch dir.
    #[structopt(short = "d", long = "scratch-dir")]
    scratch_dir: Option<String>,

    /// Print config.
    #[structopt(short = "v", long)]
    verbose: bool,

    /// Report the job start time and job finish time.
    #[structopt(short = "t", long = "time")]
    time: bool,

    /// Give up on the report after this many seconds (waits forever if unset).
    #[structopt(long = "report-timeout")]
    report_timeout: Option<u64>,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();
    let opt = Opt::from_args();
    let mut config = match JobConfig::load(&opt.config) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("{}", err);
            process::exit(1);
        }
    };
    config.apply(JobOverrides {
        master_host: opt.master_host,
        port: opt.port,
        scratch_dir: opt.scratch_dir,
        job_manager: opt.job_manager,
        job_process: opt.job_process,
        config_file: opt.job_conf,
    });
    if opt.verbose {
        print_config(&config);
    }
    if let Err(err) = check_job_files(&config) {
        eprintln!("{}", err);
        process::exit(1);
    }
    let shell = match OpenSsh::detect().await {
        Ok(shell) => Arc::new(shell),
        Err(err) => {
            eprintln!("{}", err);
            process::exit(1);
        }
    };
    let submitter = JobSubmitter::new(shell);

    println!(
        "Connecting to Master at tcp://{}:{}",
        config.master_hostname, config.client_listener_port
    );
    let channel = match submitter.connect(&config).await {
        Ok(channel) => channel,
        Err(err) => {
            eprintln!("{}", err);
            process::exit(1);
        }
    };

    // bind before sending anything, or the master could reply before the
    // listener exists
    let report = if opt.time {
        match ReportChannel::bind().await {
            Ok(report) => {
                println!("Binding to local host at tcp://*:{}", report.port());
                Some(report)
            }
            Err(err) => {
                eprintln!("{}", err);
                process::exit(1);
            }
        }
    } else {
        None
    };

    let staged = match submitter.stage(&config, util::unix_seconds()).await {
        Ok(staged) => staged,
        Err(err) => {
            eprintln!("{}", err);
            process::exit(1);
        }
    };
    let message = staged.message(report.as_ref().map(|r| (r.host(), r.port())));
    if let Err(err) = channel.send(&message).await {
        eprintln!("{}", err);
        process::exit(1);
    }
    println!(
        "Submit Job {} & {} Done",
        config.job_manager.display(),
        config.job_process.display()
    );

    if let Some(report) = report {
        let limit = opt.report_timeout.map(Duration::from_secs);
        match report.await_times(limit).await {
            Ok(times) => {
                println!("Job starts at {}", to_datetime(times.start_ms));
                println!(
                    "Job finishes at {}, used {} ms",
                    to_datetime(times.finish_ms),
                    times.elapsed_ms()
                );
            }
            Err(err) => {
                eprintln!("{}", err);
                process::exit(1);
            }
        }
    }
}

fn to_datetime(ms: i64) -> String {
    match chrono::Local.timestamp_millis_opt(ms).single() {
        Some(datetime) => datetime.format("%Y-%m-%d %H:%M:%S%.6f").to_string(),
        None => format!("{} ms since epoch", ms),
    }
}

fn print_config(config: &JobConfig) {
    println!("master_hostname\t\t={}", config.master_hostname);
    println!("client_listener_port\t={}", config.client_listener_port);
    println!("master_husky_scratch_dir={}", config.master_husky_scratch_dir);
    println!("job_manager\t\t={}", config.job_manager.display());
    println!("job_process\t\t={}", config.job_process.display());
    match &config.config_file {
        Some(path) => println!("config_file\t\t={}", path.display()),
        None => println!("config_file\t\t="),
    }
}
