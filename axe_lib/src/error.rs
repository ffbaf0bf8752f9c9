use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum AxeError {
    #[error("Cannot find command {0}.")]
    MissingTool(&'static str),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{} is not a file!", .0.display())]
    NotAFile(PathBuf),

    #[error("remote command on {host} timed out")]
    Timeout { host: String },

    #[error("failed to stage {file} on {host}: {msg}")]
    Staging {
        file: String,
        host: String,
        msg: String,
    },

    #[error("malformed frame: {0}")]
    Protocol(String),

    #[error("timed out waiting for the job report")]
    ReportTimeout,

    #[error("internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, AxeError>;
