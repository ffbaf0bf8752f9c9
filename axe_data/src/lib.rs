use std::{
    collections::BTreeMap,
    fs::File,
    io::BufReader,
    path::{Path, PathBuf},
};

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("cannot open {path}: {source}")]
    Open {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("cannot parse {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T, ConfigError> {
    let file = File::open(path).map_err(|source| ConfigError::Open {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_reader(BufReader::new(file)).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

/// cluster-wide deployment config, loaded once per invocation
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterConfig {
    pub master_hostname: String,
    pub master_port: u16,
    pub client_listener_port: u16,
    pub master_husky_scratch_dir: String,
    pub master_husky_bin_dir: String,
    pub worker_husky_scratch_dir: String,
    pub worker_husky_bin_dir: String,
    pub workers: Vec<String>,
    #[serde(default)]
    pub hdfs_namenode: Option<String>,
    #[serde(default)]
    pub hdfs_port: Option<u16>,
    #[serde(default)]
    pub advanced: BTreeMap<String, String>,
}

impl ClusterConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        read_json(path)
    }

    /// required flags of the Master binary, in fixed order, then advanced
    pub fn master_flags(&self) -> Vec<String> {
        let mut flags = vec![
            flag("master_husky_scratch_dir", &self.master_husky_scratch_dir),
            flag("client_listener_port", &self.client_listener_port),
            flag("master_hostname", &self.master_hostname),
            flag("master_port", &self.master_port),
        ];
        self.push_hdfs(&mut flags);
        self.push_advanced(&mut flags);
        flags
    }

    /// required flags of the Worker binary, in fixed order, then advanced
    pub fn worker_flags(&self) -> Vec<String> {
        let mut flags = vec![
            flag("master_hostname", &self.master_hostname),
            flag("master_port", &self.master_port),
            flag("worker_husky_scratch_dir", &self.worker_husky_scratch_dir),
        ];
        self.push_hdfs(&mut flags);
        self.push_advanced(&mut flags);
        flags
    }

    /// required flags of the Scheduler binary, then advanced
    pub fn scheduler_flags(&self) -> Vec<String> {
        let mut flags = vec![
            flag("master_hostname", &self.master_hostname),
            flag("master_port", &self.master_port),
        ];
        self.push_advanced(&mut flags);
        flags
    }

    fn push_hdfs(&self, flags: &mut Vec<String>) {
        if let Some(namenode) = &self.hdfs_namenode {
            flags.push(flag("hdfs_namenode", namenode));
        }
        if let Some(port) = &self.hdfs_port {
            flags.push(flag("hdfs_port", port));
        }
    }

    fn push_advanced(&self, flags: &mut Vec<String>) {
        for (key, val) in &self.advanced {
            flags.push(flag(key, val));
        }
    }
}

fn flag(key: &str, val: &dyn std::fmt::Display) -> String {
    format!("--{}={}", key, val)
}

/// job submission config plus the master endpoint it targets
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobConfig {
    pub master_hostname: String,
    pub client_listener_port: u16,
    pub master_husky_scratch_dir: String,
    pub job_manager: PathBuf,
    pub job_process: PathBuf,
    #[serde(default)]
    pub config_file: Option<PathBuf>,
}

/// caller-supplied per-field overrides for job submission
#[derive(Clone, Debug, Default)]
pub struct JobOverrides {
    pub master_host: Option<String>,
    pub port: Option<u16>,
    pub scratch_dir: Option<String>,
    pub job_manager: Option<PathBuf>,
    pub job_process: Option<PathBuf>,
    pub config_file: Option<PathBuf>,
}

impl JobConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        read_json(path)
    }

    /// overwrite config fields with user specified values
    pub fn apply(&mut self, overrides: JobOverrides) {
        if let Some(host) = overrides.master_host {
            self.master_hostname = host;
        }
        if let Some(port) = overrides.port {
            self.client_listener_port = port;
        }
        if let Some(dir) = overrides.scratch_dir {
            self.master_husky_scratch_dir = dir;
        }
        if let Some(jm) = overrides.job_manager {
            self.job_manager = jm;
        }
        if let Some(jp) = overrides.job_process {
            self.job_process = jp;
        }
        if let Some(conf) = overrides.config_file {
            self.config_file = Some(conf);
        }
    }
}
