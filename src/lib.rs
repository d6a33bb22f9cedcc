pub mod cli;
pub mod config;
pub mod docker;
pub mod error;
pub mod fs;
pub mod sftp;

pub use config::SshConfig;
pub use error::{Result, SshmntError};
