//! Volume lifecycle controller behind the Docker plugin interface.
//!
//! Each mounted volume owns one [`MountSession`] served on its own thread;
//! the driver ref-counts mounts per mountpoint and keeps one shared SFTP
//! session for top-level create operations. A single mutex serializes every
//! operation except `path`, which is a pure computation.

use parking_lot::Mutex;
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::JoinHandle;

use crate::config::SshConfig;
use crate::error::{Result, SshmntError};
use crate::fs::MountSession;
use crate::sftp::{SftpClient, SftpSession};

/// Remote volume names may contain characters illegal in local paths, so
/// they are escaped the way a URL query component is.
const VOLUME_ESCAPE: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

#[derive(Debug, Clone)]
pub struct DriverConfig {
    /// Remote directory volumes are created under.
    pub remote_root: String,
    /// Local directory volume mountpoints are created under.
    pub local_root: PathBuf,
    /// `host:port` of the SSH server.
    pub ssh_server: String,
    pub ssh_config: SshConfig,
}

/// Produces a ready SFTP session for each new mount.
pub type SessionFactory = Box<dyn Fn() -> Result<Arc<dyn SftpSession>> + Send + Sync>;

struct Server {
    session: Arc<MountSession>,
    serve_thread: Option<JoinHandle<()>>,
    connections: u32,
}

#[derive(Default)]
struct DriverState {
    servers: HashMap<PathBuf, Server>,
    volumes: HashMap<PathBuf, String>,
}

pub struct Driver {
    config: DriverConfig,
    sftp: Arc<dyn SftpSession>,
    factory: SessionFactory,
    state: Mutex<DriverState>,
}

impl Driver {
    pub fn new(config: DriverConfig, sftp: Arc<dyn SftpSession>, factory: SessionFactory) -> Self {
        Driver {
            config,
            sftp,
            factory,
            state: Mutex::new(DriverState::default()),
        }
    }

    /// Dial the shared SFTP session and build a driver whose per-mount
    /// sessions are fresh connections to the same server.
    pub async fn connect(config: DriverConfig) -> Result<Driver> {
        let shared = SftpClient::connect(&config.ssh_config, &config.ssh_server).await?;
        let rt = tokio::runtime::Handle::current();
        let ssh_config = config.ssh_config.clone();
        let server = config.ssh_server.clone();
        let factory: SessionFactory = Box::new(move || {
            let client = rt.block_on(SftpClient::connect(&ssh_config, &server))?;
            Ok(Arc::new(client) as Arc<dyn SftpSession>)
        });
        Ok(Driver::new(config, Arc::new(shared), factory))
    }

    /// Local mountpoint for a volume name. Pure; callable without the lock.
    pub fn mountpoint(&self, name: &str) -> PathBuf {
        self.config
            .local_root
            .join(utf8_percent_encode(name, VOLUME_ESCAPE).to_string())
    }

    fn remote_path(&self, name: &str) -> String {
        Path::new(&self.config.remote_root)
            .join(name)
            .to_string_lossy()
            .into_owned()
    }

    /// Ensure the remote volume directory exists and record the volume.
    pub fn create(&self, name: &str) -> Result<()> {
        let mut state = self.state.lock();
        let remote_path = self.remote_path(name);
        tracing::debug!(name, remote_path, "create volume");

        match self.sftp.stat(&remote_path) {
            Ok(stat) if !stat.is_dir => {
                return Err(SshmntError::Config(format!(
                    "{} exists and is not a directory",
                    remote_path
                )));
            }
            Ok(_) => {}
            Err(e) if e.is_not_found() => self.sftp.mkdir(&remote_path)?,
            Err(e) => return Err(e.into()),
        }

        let mountpoint = self.mountpoint(name);
        std::fs::create_dir_all(&mountpoint)?;
        state.volumes.insert(mountpoint, name.to_string());
        Ok(())
    }

    pub fn get(&self, name: &str) -> Result<(String, PathBuf)> {
        let state = self.state.lock();
        let mountpoint = self.mountpoint(name);
        match state.volumes.get(&mountpoint) {
            Some(name) => Ok((name.clone(), mountpoint)),
            None => Err(SshmntError::VolumeNotFound(name.to_string())),
        }
    }

    pub fn list(&self) -> Vec<(String, PathBuf)> {
        let state = self.state.lock();
        state
            .volumes
            .values()
            .map(|name| (name.clone(), self.mountpoint(name)))
            .collect()
    }

    /// Mount the named volume, or bump the connection count of an already
    /// served mountpoint. Returns the local mountpoint either way.
    pub fn mount(&self, name: &str) -> Result<PathBuf> {
        let mut state = self.state.lock();
        let mountpoint = self.mountpoint(name);
        tracing::info!(name, mountpoint = %mountpoint.display(), "mounting volume");

        if let Some(server) = state.servers.get_mut(&mountpoint) {
            if server.connections > 0 {
                server.connections += 1;
                return Ok(mountpoint);
            }
        }

        match std::fs::symlink_metadata(&mountpoint) {
            Ok(meta) if !meta.is_dir() => {
                return Err(SshmntError::Config(format!(
                    "{} already exists and is not a directory",
                    mountpoint.display()
                )));
            }
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                std::fs::create_dir_all(&mountpoint)?;
                let perms = {
                    use std::os::unix::fs::PermissionsExt;
                    std::fs::Permissions::from_mode(0o755)
                };
                std::fs::set_permissions(&mountpoint, perms)?;
            }
            Err(e) => return Err(e.into()),
        }

        let session_sftp = (self.factory)()?;
        let session = Arc::new(MountSession::new(
            session_sftp,
            &mountpoint,
            self.remote_path(name),
        ));

        let serve_session = Arc::clone(&session);
        let serve_thread = std::thread::spawn(move || {
            if let Err(e) = serve_session.mount() {
                tracing::error!(
                    "serve error for {}: {}",
                    serve_session.mountpoint().display(),
                    e
                );
            }
        });

        state.servers.insert(
            mountpoint.clone(),
            Server {
                session,
                serve_thread: Some(serve_thread),
                connections: 1,
            },
        );
        Ok(mountpoint)
    }

    /// Drop one connection; the last one tears the bridge down.
    pub fn unmount(&self, name: &str) -> Result<()> {
        let mut state = self.state.lock();
        let mountpoint = self.mountpoint(name);
        tracing::info!(name, mountpoint = %mountpoint.display(), "unmounting volume");

        let server = state
            .servers
            .get_mut(&mountpoint)
            .ok_or_else(|| SshmntError::VolumeNotFound(name.to_string()))?;

        if server.connections == 1 {
            server.session.unmount()?;
        }
        server.connections = server.connections.saturating_sub(1);
        if server.connections == 0 {
            if let Some(thread) = server.serve_thread.take() {
                let _ = thread.join();
            }
        }
        Ok(())
    }

    /// Forget the volume: drop the server entry when it has at most one
    /// connection left, delete the record, and remove the local mountpoint
    /// directory. Remote data is never deleted here.
    pub fn remove(&self, name: &str) -> Result<()> {
        let mut state = self.state.lock();
        let mountpoint = self.mountpoint(name);
        tracing::debug!(name, mountpoint = %mountpoint.display(), "remove volume");

        let drop_server = state
            .servers
            .get(&mountpoint)
            .map(|s| s.connections <= 1)
            .unwrap_or(false);
        if drop_server {
            if let Some(mut server) = state.servers.remove(&mountpoint) {
                if server.connections == 0 {
                    if let Some(thread) = server.serve_thread.take() {
                        let _ = thread.join();
                    }
                }
            }
        }

        state.volumes.remove(&mountpoint);
        if let Err(e) = std::fs::remove_dir(&mountpoint) {
            tracing::debug!("could not remove {}: {}", mountpoint.display(), e);
        }
        Ok(())
    }

    pub fn capabilities(&self) -> &'static str {
        "local"
    }

    /// Unmount every served volume, collecting errors instead of stopping
    /// at the first.
    pub fn stop(&self) -> Vec<SshmntError> {
        let mut state = self.state.lock();
        tracing::debug!("stopping all servers");

        let mut errors = Vec::new();
        for server in state.servers.values_mut() {
            let mut join = server.connections == 0;
            if server.connections > 0 {
                match server.session.unmount() {
                    Ok(()) => {
                        server.connections = 0;
                        join = true;
                    }
                    Err(e) => errors.push(e),
                }
            }
            if join {
                if let Some(thread) = server.serve_thread.take() {
                    let _ = thread.join();
                }
            }
        }
        errors
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sftp::{RemoteDirEntry, RemoteStat, SftpError, SftpHandle, SftpResult};
    use parking_lot::Mutex as PlMutex;
    use std::collections::HashSet;

    #[derive(Default)]
    struct FakeSftp {
        dirs: PlMutex<HashSet<String>>,
        files: PlMutex<HashSet<String>>,
    }

    impl FakeSftp {
        fn with_dir(path: &str) -> Self {
            let fake = FakeSftp::default();
            fake.dirs.lock().insert(path.to_string());
            fake
        }

        fn with_file(path: &str) -> Self {
            let fake = FakeSftp::default();
            fake.files.lock().insert(path.to_string());
            fake
        }
    }

    impl SftpSession for FakeSftp {
        fn stat(&self, path: &str) -> SftpResult<RemoteStat> {
            if self.dirs.lock().contains(path) {
                Ok(RemoteStat {
                    is_dir: true,
                    ..Default::default()
                })
            } else if self.files.lock().contains(path) {
                Ok(RemoteStat::default())
            } else {
                Err(SftpError::NotFound(path.to_string()))
            }
        }
        fn read_dir(&self, _path: &str) -> SftpResult<Vec<RemoteDirEntry>> {
            Ok(Vec::new())
        }
        fn mkdir(&self, path: &str) -> SftpResult<()> {
            self.dirs.lock().insert(path.to_string());
            Ok(())
        }
        fn create(&self, _path: &str) -> SftpResult<Box<dyn SftpHandle>> {
            Err(SftpError::Protocol("not used".into()))
        }
        fn open(&self, _path: &str, _flags: i32) -> SftpResult<Box<dyn SftpHandle>> {
            Err(SftpError::Protocol("not used".into()))
        }
        fn truncate(&self, _path: &str, _size: u64) -> SftpResult<()> {
            Ok(())
        }
        fn chmod(&self, _path: &str, _mode: u32) -> SftpResult<()> {
            Ok(())
        }
        fn chown(&self, _path: &str, _uid: u32, _gid: u32) -> SftpResult<()> {
            Ok(())
        }
        fn remove(&self, _path: &str) -> SftpResult<()> {
            Ok(())
        }
        fn remove_directory(&self, path: &str) -> SftpResult<()> {
            self.dirs.lock().remove(path);
            Ok(())
        }
        fn rename(&self, _old: &str, _new: &str) -> SftpResult<()> {
            Ok(())
        }
        fn close(&self) -> SftpResult<()> {
            Ok(())
        }
    }

    fn test_driver(sftp: FakeSftp) -> (Driver, PathBuf) {
        let local_root = std::env::temp_dir().join(format!(
            "sshmnt-driver-test-{}-{:p}",
            std::process::id(),
            &sftp
        ));
        let config = DriverConfig {
            remote_root: "/srv/volumes".to_string(),
            local_root: local_root.clone(),
            ssh_server: "127.0.0.1:22".to_string(),
            ssh_config: SshConfig::default(),
        };
        let driver = Driver::new(
            config,
            Arc::new(sftp),
            Box::new(|| Err(SshmntError::Config("no sessions in tests".into()))),
        );
        (driver, local_root)
    }

    #[test]
    fn test_volume_name_escaping() {
        let (driver, local_root) = test_driver(FakeSftp::default());
        assert_eq!(
            driver.mountpoint("proj/2024"),
            local_root.join("proj%2F2024")
        );
        assert_eq!(driver.mountpoint("plain-name_1"), local_root.join("plain-name_1"));
    }

    #[test]
    fn test_path_has_no_side_effects() {
        let (driver, local_root) = test_driver(FakeSftp::default());
        let path = driver.mountpoint("vol1");
        assert!(!path.exists());
        assert!(driver.get("vol1").is_err());
        let _ = std::fs::remove_dir_all(local_root);
    }

    #[test]
    fn test_create_makes_missing_remote_directory() {
        let (driver, local_root) = test_driver(FakeSftp::default());
        driver.create("vol1").unwrap();

        let (name, mountpoint) = driver.get("vol1").unwrap();
        assert_eq!(name, "vol1");
        assert_eq!(mountpoint, local_root.join("vol1"));
        assert!(mountpoint.is_dir());

        let _ = std::fs::remove_dir_all(local_root);
    }

    #[test]
    fn test_create_reuses_existing_remote_directory() {
        let (driver, local_root) = test_driver(FakeSftp::with_dir("/srv/volumes/vol1"));
        driver.create("vol1").unwrap();
        assert!(driver.get("vol1").is_ok());
        let _ = std::fs::remove_dir_all(local_root);
    }

    #[test]
    fn test_create_rejects_non_directory_remote_path() {
        let (driver, local_root) = test_driver(FakeSftp::with_file("/srv/volumes/vol1"));
        match driver.create("vol1") {
            Err(SshmntError::Config(msg)) => assert!(msg.contains("not a directory")),
            other => panic!("expected Config error, got {:?}", other.map(|_| ())),
        }
        let _ = std::fs::remove_dir_all(local_root);
    }

    #[test]
    fn test_list_returns_created_volumes() {
        let (driver, local_root) = test_driver(FakeSftp::default());
        driver.create("a").unwrap();
        driver.create("b").unwrap();

        let mut names: Vec<String> = driver.list().into_iter().map(|(n, _)| n).collect();
        names.sort();
        assert_eq!(names, vec!["a", "b"]);

        let _ = std::fs::remove_dir_all(local_root);
    }

    #[test]
    fn test_remove_forgets_volume_and_mount_directory() {
        let (driver, local_root) = test_driver(FakeSftp::default());
        driver.create("vol1").unwrap();
        let mountpoint = driver.mountpoint("vol1");
        assert!(mountpoint.is_dir());

        driver.remove("vol1").unwrap();
        assert!(driver.get("vol1").is_err());
        assert!(!mountpoint.exists());

        let _ = std::fs::remove_dir_all(local_root);
    }

    #[test]
    fn test_unmount_unknown_volume() {
        let (driver, local_root) = test_driver(FakeSftp::default());
        assert!(matches!(
            driver.unmount("ghost"),
            Err(SshmntError::VolumeNotFound(_))
        ));
        let _ = std::fs::remove_dir_all(local_root);
    }

    #[test]
    fn test_capabilities_scope() {
        let (driver, local_root) = test_driver(FakeSftp::default());
        assert_eq!(driver.capabilities(), "local");
        let _ = std::fs::remove_dir_all(local_root);
    }
}
