use fuser::{FileAttr, FileType};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::sftp::{RemoteStat, SftpError};

/// Directories report a fixed size, like a local Linux filesystem does.
pub const DIR_SIZE: u64 = 4096;

/// Map an SFTP failure onto the errno vocabulary the kernel understands.
/// "Not exist" is the only structured case; everything else is opaque EIO.
pub fn sftp_error_to_errno(err: &SftpError) -> libc::c_int {
    if err.is_not_found() {
        libc::ENOENT
    } else {
        libc::EIO
    }
}

pub fn unix_time(secs: i64) -> SystemTime {
    if secs >= 0 {
        UNIX_EPOCH + Duration::from_secs(secs as u64)
    } else {
        UNIX_EPOCH
    }
}

/// Build kernel-facing attributes for a node from the remote stat.
pub fn stat_to_fileattr(ino: u64, stat: &RemoteStat) -> FileAttr {
    let kind = if stat.is_dir {
        FileType::Directory
    } else {
        FileType::RegularFile
    };
    let mtime = unix_time(stat.mtime);
    FileAttr {
        ino,
        size: if stat.is_dir { DIR_SIZE } else { stat.size },
        blocks: stat.size.div_ceil(512),
        atime: unix_time(stat.atime),
        mtime,
        ctime: mtime,
        crtime: mtime,
        kind,
        perm: (stat.mode & 0o7777) as u16,
        nlink: if stat.is_dir { 2 } else { 1 },
        uid: 0,
        gid: 0,
        rdev: 0,
        blksize: 4096,
        flags: 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_maps_to_enoent() {
        let err = SftpError::NotFound("/srv/data/missing".to_string());
        assert_eq!(sftp_error_to_errno(&err), libc::ENOENT);
    }

    #[test]
    fn test_other_errors_map_to_eio() {
        let err = SftpError::Protocol("server went away".to_string());
        assert_eq!(sftp_error_to_errno(&err), libc::EIO);
    }

    #[test]
    fn test_directory_attrs_report_fixed_size() {
        let stat = RemoteStat {
            mode: 0o40755,
            size: 11,
            mtime: 1_700_000_000,
            atime: 1_700_000_000,
            is_dir: true,
        };
        let attr = stat_to_fileattr(42, &stat);
        assert_eq!(attr.ino, 42);
        assert_eq!(attr.size, DIR_SIZE);
        assert_eq!(attr.kind, FileType::Directory);
        assert_eq!(attr.perm, 0o755);
    }

    #[test]
    fn test_file_attrs_carry_remote_size_and_times() {
        let stat = RemoteStat {
            mode: 0o100644,
            size: 5,
            mtime: 1_700_000_000,
            atime: 1_700_000_100,
            is_dir: false,
        };
        let attr = stat_to_fileattr(7, &stat);
        assert_eq!(attr.size, 5);
        assert_eq!(attr.kind, FileType::RegularFile);
        assert_eq!(attr.mtime, unix_time(1_700_000_000));
        assert_eq!(attr.ctime, attr.mtime);
        assert_eq!(attr.atime, unix_time(1_700_000_100));
    }
}
