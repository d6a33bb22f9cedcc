use fuser::MountOption;
use parking_lot::Mutex;
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::Arc;
use std::time::Duration;

use crate::error::{Result, SshmntError};
use crate::fs::{NodeTree, SshFs};
use crate::sftp::SftpSession;

/// How long `unmount` waits for the serve loop to report back after the
/// platform unmount was issued.
const UNMOUNT_WAIT: Duration = Duration::from_secs(10);

type ServeStatus = std::result::Result<(), String>;

/// One bridge connection: a translator rooted at a remote directory, served
/// at one local mountpoint until released.
pub struct MountSession {
    sftp: Arc<dyn SftpSession>,
    tree: Arc<NodeTree>,
    mountpoint: PathBuf,
    remote_root: String,
    mounted: AtomicBool,
    done_tx: Mutex<Option<Sender<ServeStatus>>>,
    done_rx: Mutex<Option<Receiver<ServeStatus>>>,
}

impl MountSession {
    pub fn new(
        sftp: Arc<dyn SftpSession>,
        mountpoint: impl Into<PathBuf>,
        remote_root: impl Into<String>,
    ) -> Self {
        let (tx, rx) = channel();
        MountSession {
            sftp,
            tree: Arc::new(NodeTree::new()),
            mountpoint: mountpoint.into(),
            remote_root: remote_root.into(),
            mounted: AtomicBool::new(false),
            done_tx: Mutex::new(Some(tx)),
            done_rx: Mutex::new(Some(rx)),
        }
    }

    pub fn mountpoint(&self) -> &Path {
        &self.mountpoint
    }

    pub fn tree(&self) -> &Arc<NodeTree> {
        &self.tree
    }

    /// Mount and serve the bridge; returns when the bridge closes.
    ///
    /// The inode counter is seeded from the mountpoint's own inode first, so
    /// mirrored inodes never collide with the mountpoint itself.
    pub fn mount(&self) -> Result<()> {
        let meta = std::fs::metadata(&self.mountpoint).map_err(|e| {
            SshmntError::Mount(format!("stat {}: {}", self.mountpoint.display(), e))
        })?;
        self.tree.seed_inodes(meta.ino());

        let fs = SshFs::new(
            Arc::clone(&self.sftp),
            Arc::clone(&self.tree),
            &self.remote_root,
            &self.mountpoint.to_string_lossy(),
        );

        let options = [
            MountOption::FSName("ssh".to_string()),
            MountOption::AllowOther,
            MountOption::DefaultPermissions,
            MountOption::Dev,
            MountOption::Async,
        ];

        tracing::info!(
            mountpoint = %self.mountpoint.display(),
            remote_root = %self.remote_root,
            "serving bridge"
        );
        self.mounted.store(true, Ordering::SeqCst);

        let result = fuser::mount2(fs, &self.mountpoint, &options)
            .map_err(|e| SshmntError::Mount(e.to_string()));

        let status = result.as_ref().map(|_| ()).map_err(|e| e.to_string());
        if let Some(tx) = self.done_tx.lock().take() {
            let _ = tx.send(status);
        }
        tracing::info!(mountpoint = %self.mountpoint.display(), "bridge closed");
        result
    }

    /// Issue the platform unmount, then wait for the serve loop to finish
    /// and surface any mount-time error it reported.
    pub fn unmount(&self) -> Result<()> {
        if !self.mounted.load(Ordering::SeqCst) {
            return Err(SshmntError::NotMounted(self.mountpoint.clone()));
        }

        let status = if cfg!(target_os = "macos") {
            Command::new("diskutil")
                .args(["unmount", "force"])
                .arg(&self.mountpoint)
                .status()
        } else {
            Command::new("umount").arg(&self.mountpoint).status()
        };

        match status {
            Ok(status) if status.success() => {}
            Ok(_) => tracing::warn!(
                "unmount command failed for {} (may already be unmounted)",
                self.mountpoint.display()
            ),
            Err(e) => tracing::warn!("could not run unmount command: {}", e),
        }

        let rx = self.done_rx.lock().take();
        if let Some(rx) = rx {
            match rx.recv_timeout(UNMOUNT_WAIT) {
                Ok(Ok(())) => Ok(()),
                Ok(Err(e)) => Err(SshmntError::Mount(e)),
                Err(_) => Err(SshmntError::Mount(format!(
                    "timed out waiting for bridge at {} to close",
                    self.mountpoint.display()
                ))),
            }
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sftp::{RemoteDirEntry, RemoteStat, SftpHandle, SftpResult, SftpSession};

    struct NullSftp;

    impl SftpSession for NullSftp {
        fn stat(&self, path: &str) -> SftpResult<RemoteStat> {
            Err(crate::sftp::SftpError::NotFound(path.to_string()))
        }
        fn read_dir(&self, _path: &str) -> SftpResult<Vec<RemoteDirEntry>> {
            Ok(Vec::new())
        }
        fn mkdir(&self, _path: &str) -> SftpResult<()> {
            Ok(())
        }
        fn create(&self, _path: &str) -> SftpResult<Box<dyn SftpHandle>> {
            Err(crate::sftp::SftpError::Protocol("unsupported".into()))
        }
        fn open(&self, _path: &str, _flags: i32) -> SftpResult<Box<dyn SftpHandle>> {
            Err(crate::sftp::SftpError::Protocol("unsupported".into()))
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
        fn remove_directory(&self, _path: &str) -> SftpResult<()> {
            Ok(())
        }
        fn rename(&self, _old: &str, _new: &str) -> SftpResult<()> {
            Ok(())
        }
        fn close(&self) -> SftpResult<()> {
            Ok(())
        }
    }

    #[test]
    fn test_unmount_before_mount_is_refused() {
        let session = MountSession::new(Arc::new(NullSftp), "/tmp/never-mounted", "/srv/data");
        match session.unmount() {
            Err(SshmntError::NotMounted(path)) => {
                assert_eq!(path, PathBuf::from("/tmp/never-mounted"));
            }
            other => panic!("expected NotMounted, got {:?}", other.map(|_| ())),
        }
    }
}
