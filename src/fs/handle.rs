use parking_lot::lock_api::ArcMutexGuard;
use parking_lot::{Mutex, RawMutex};
use std::sync::Arc;

use crate::sftp::SftpHandle;

/// One open file as the kernel sees it. The remote handle is opened lazily
/// when the first read or write arrives without one (the zero-copy open
/// path), using the flags recorded at open time.
///
/// The mutex doubles as the per-handle lock: reads and writes on a single
/// open are serialized by locking `remote`.
pub struct FileHandle {
    pub ino: u64,
    pub flags: i32,
    pub writing: bool,
    pub remote: Mutex<Option<Box<dyn SftpHandle>>>,
}

impl FileHandle {
    pub fn new(ino: u64, flags: i32, writing: bool, remote: Option<Box<dyn SftpHandle>>) -> Self {
        FileHandle {
            ino,
            flags,
            writing,
            remote: Mutex::new(remote),
        }
    }
}

/// One open directory. Holding the guard keeps the directory's handle lock
/// taken from opendir until releasedir drops this record, which enforces the
/// acquire/release pairing the bridge promises.
pub struct DirHandle {
    pub ino: u64,
    pub _guard: ArcMutexGuard<RawMutex, ()>,
}

impl DirHandle {
    pub fn acquire(ino: u64, lock: Arc<Mutex<()>>) -> Self {
        DirHandle {
            ino,
            _guard: lock.lock_arc(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dir_handle_serializes_openers() {
        let lock = Arc::new(Mutex::new(()));
        let handle = DirHandle::acquire(7, Arc::clone(&lock));
        assert!(lock.try_lock().is_none());
        drop(handle);
        assert!(lock.try_lock().is_some());
    }

    #[test]
    fn test_file_handle_starts_without_remote() {
        let handle = FileHandle::new(9, libc::O_RDONLY, false, None);
        assert!(handle.remote.lock().is_none());
        assert_eq!(handle.ino, 9);
    }
}
