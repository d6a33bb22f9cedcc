pub mod client;

pub use client::SftpClient;

use thiserror::Error;

pub type SftpResult<T> = std::result::Result<T, SftpError>;

#[derive(Error, Debug)]
pub enum SftpError {
    #[error("no such file or directory: {0}")]
    NotFound(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl SftpError {
    /// "Not exist" is a distinct condition: the translator maps it to ENOENT
    /// while every other failure surfaces as an opaque I/O error.
    pub fn is_not_found(&self) -> bool {
        matches!(self, SftpError::NotFound(_))
    }
}

/// Attributes the remote server reports for one path.
///
/// `atime` is populated from the SFTP access-time attribute when the server
/// sends one; implementations fall back to `mtime` otherwise.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RemoteStat {
    pub mode: u32,
    pub size: u64,
    pub mtime: i64,
    pub atime: i64,
    pub is_dir: bool,
}

/// One entry of a remote directory listing, in server order.
#[derive(Debug, Clone)]
pub struct RemoteDirEntry {
    pub name: String,
    pub stat: RemoteStat,
}

/// One authenticated SFTP channel. All calls may block on the network.
///
/// The production implementation is [`SftpClient`]; tests substitute an
/// in-memory tree behind the same trait.
pub trait SftpSession: Send + Sync {
    fn stat(&self, path: &str) -> SftpResult<RemoteStat>;
    fn read_dir(&self, path: &str) -> SftpResult<Vec<RemoteDirEntry>>;
    fn mkdir(&self, path: &str) -> SftpResult<()>;
    fn create(&self, path: &str) -> SftpResult<Box<dyn SftpHandle>>;
    /// `flags` are the kernel's open flags (`libc::O_*`).
    fn open(&self, path: &str, flags: i32) -> SftpResult<Box<dyn SftpHandle>>;
    fn truncate(&self, path: &str, size: u64) -> SftpResult<()>;
    fn chmod(&self, path: &str, mode: u32) -> SftpResult<()>;
    fn chown(&self, path: &str, uid: u32, gid: u32) -> SftpResult<()>;
    fn remove(&self, path: &str) -> SftpResult<()>;
    fn remove_directory(&self, path: &str) -> SftpResult<()>;
    fn rename(&self, old: &str, new: &str) -> SftpResult<()>;
    fn close(&self) -> SftpResult<()>;
}

/// An open remote file. Reads and writes happen at the handle's current
/// position; `seek` repositions it.
pub trait SftpHandle: Send {
    fn seek(&mut self, offset: u64) -> SftpResult<()>;
    fn read(&mut self, buf: &mut [u8]) -> SftpResult<usize>;
    fn write(&mut self, buf: &[u8]) -> SftpResult<usize>;
    fn close(&mut self) -> SftpResult<()>;
}
