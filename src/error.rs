use std::path::PathBuf;
use thiserror::Error;

use crate::sftp::SftpError;

pub type Result<T> = std::result::Result<T, SshmntError>;

#[derive(Error, Debug)]
pub enum SshmntError {
    #[error("Config error: {0}")]
    Config(String),

    #[error("SFTP error: {0}")]
    Sftp(#[from] SftpError),

    #[error("Mount error: {0}")]
    Mount(String),

    #[error("Not mounted: {0}")]
    NotMounted(PathBuf),

    #[error("Volume not found: {0}")]
    VolumeNotFound(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(String),
}

impl From<serde_json::Error> for SshmntError {
    fn from(err: serde_json::Error) -> Self {
        SshmntError::Json(err.to_string())
    }
}
