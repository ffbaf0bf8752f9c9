//! Job submission: stage the job files onto the master, push the
//! submission message over the wire, and optionally wait for the job's
//! start/finish report. The client moves through
//! `Connected -> [Bound] -> Sent -> [Awaiting -> Reported]`; the report
//! channel is bound before anything is sent so the master can never reply
//! into the void.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};
use tracing::{info, instrument};

use axe_data::JobConfig;

use crate::error::{AxeError, Result};
use crate::remote::RemoteShell;
use crate::util;
use crate::wire::{self, JobSubmissionMessage};

/// remote names of the staged job files
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StagedJob {
    pub job_manager: String,
    pub job_process: String,
    pub config_file: Option<String>,
}

impl StagedJob {
    pub fn message(&self, report_to: Option<(&str, u16)>) -> JobSubmissionMessage {
        JobSubmissionMessage::new(
            &self.job_manager,
            &self.job_process,
            self.config_file.as_deref(),
            report_to,
        )
    }
}

/// millisecond epoch timestamps reported back by the master
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct JobTimes {
    pub start_ms: i64,
    pub finish_ms: i64,
}

impl JobTimes {
    pub fn elapsed_ms(&self) -> i64 {
        self.finish_ms - self.start_ms
    }
}

/// every referenced job file must exist locally before any network activity
pub fn check_job_files(job: &JobConfig) -> Result<()> {
    let mut paths = vec![&job.job_manager, &job.job_process];
    if let Some(config_file) = &job.config_file {
        paths.push(config_file);
    }
    for path in paths {
        if !path.is_file() {
            return Err(AxeError::NotAFile(path.clone()));
        }
    }
    Ok(())
}

/// distinct remote name per submission time
pub fn staged_name(path: &Path, stamp: u64) -> Result<String> {
    let base = path
        .file_name()
        .ok_or_else(|| AxeError::NotAFile(path.to_path_buf()))?
        .to_string_lossy();
    Ok(format!("{}-{}", base, stamp))
}

pub struct JobSubmitter {
    shell: Arc<dyn RemoteShell>,
}

impl JobSubmitter {
    pub fn new(shell: Arc<dyn RemoteShell>) -> Self {
        Self { shell }
    }

    /// open the outbound push channel to the master's client listener
    #[instrument(skip(self, job), fields(master = %job.master_hostname))]
    pub async fn connect(&self, job: &JobConfig) -> Result<PushChannel> {
        let stream =
            TcpStream::connect((job.master_hostname.as_str(), job.client_listener_port)).await?;
        Ok(PushChannel { stream })
    }

    /// copy the job files into the master scratch dir under time-suffixed
    /// names, so repeated submissions of the same file never collide
    #[instrument(skip(self, job))]
    pub async fn stage(&self, job: &JobConfig, stamp: u64) -> Result<StagedJob> {
        check_job_files(job)?;
        let job_manager = self.stage_one(job, &job.job_manager, stamp).await?;
        let job_process = self.stage_one(job, &job.job_process, stamp).await?;
        let config_file = match &job.config_file {
            Some(path) => Some(self.stage_one(job, path, stamp).await?),
            None => None,
        };
        Ok(StagedJob {
            job_manager,
            job_process,
            config_file,
        })
    }

    async fn stage_one(&self, job: &JobConfig, local: &Path, stamp: u64) -> Result<String> {
        if !local.is_file() {
            return Err(AxeError::NotAFile(local.to_path_buf()));
        }
        let name = staged_name(local, stamp)?;
        let target = format!("{}/{}", job.master_husky_scratch_dir, name);
        let output = self.shell.copy(&job.master_hostname, local, &target).await?;
        if output.success() {
            info!("staged {} as {}", local.display(), name);
            Ok(name)
        } else {
            Err(AxeError::Staging {
                file: local.display().to_string(),
                host: job.master_hostname.clone(),
                msg: output.stderr.trim().to_string(),
            })
        }
    }
}

/// the one-directional message channel to the master (the Connected state)
pub struct PushChannel {
    stream: TcpStream,
}

impl PushChannel {
    /// send every frame in order; the channel is single-use
    pub async fn send(mut self, message: &JobSubmissionMessage) -> Result<()> {
        message.send(&mut self.stream).await
    }
}

/// Inbound listener for the start/finish report. Bound on an OS-assigned
/// port before the submission is sent; single-use.
pub struct ReportChannel {
    listener: TcpListener,
    host: String,
    port: u16,
}

impl ReportChannel {
    pub async fn bind() -> Result<Self> {
        let listener = TcpListener::bind(("0.0.0.0", 0)).await?;
        let port = listener.local_addr()?.port();
        let host = util::local_hostname().await?;
        Ok(Self {
            listener,
            host,
            port,
        })
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Wait for the two timestamp frames: start time, then finish time.
    /// Without a limit this waits as long as the master keeps the job
    /// running; with one, silence becomes an explicit error.
    pub async fn await_times(self, limit: Option<Duration>) -> Result<JobTimes> {
        match limit {
            Some(limit) => tokio::time::timeout(limit, self.receive())
                .await
                .map_err(|_| AxeError::ReportTimeout)?,
            None => self.receive().await,
        }
    }

    async fn receive(self) -> Result<JobTimes> {
        let (mut conn, _addr) = self.listener.accept().await?;
        let start_ms = wire::parse_timestamp(&wire::read_frame(&mut conn).await?)?;
        let finish_ms = wire::parse_timestamp(&wire::read_frame(&mut conn).await?)?;
        Ok(JobTimes {
            start_ms,
            finish_ms,
        })
    }
}
