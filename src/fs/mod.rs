//! The VFS-to-SFTP translator.
//!
//! [`SshFs`] binds kernel filesystem requests on directory and file nodes to
//! the node tree and one SFTP session. The `fuser::Filesystem` impl is a
//! thin dispatch layer: each callback resolves its reply from an internal
//! `do_*` operation returning `Result<_, libc::c_int>`, so the operations
//! are exercised directly by tests without a kernel mount.

pub mod convert;
pub mod debug;
pub mod handle;
pub mod mount;
pub mod node;

pub use mount::MountSession;
pub use node::{Node, NodeKind, NodeTree};

use fuser::{
    FileAttr, FileType, Filesystem, KernelConfig, ReplyAttr, ReplyCreate, ReplyData,
    ReplyDirectory, ReplyEmpty, ReplyEntry, ReplyOpen, ReplyWrite, Request, TimeOrNow,
    FUSE_ROOT_ID,
};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::ffi::OsStr;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use crate::sftp::SftpSession;
use convert::{sftp_error_to_errno, stat_to_fileattr};
use handle::{DirHandle, FileHandle};

/// Attribute-cache purge hint on write-only opens (macFUSE extension bit).
const FOPEN_PURGE_ATTR: u32 = 1 << 30;

/// How long the kernel may cache entries and attributes we reply with.
const TTL: Duration = Duration::from_secs(1);

pub struct SshFs {
    sftp: Arc<dyn SftpSession>,
    tree: Arc<NodeTree>,
    root: u64,
    file_handles: RwLock<HashMap<u64, Arc<FileHandle>>>,
    dir_handles: RwLock<HashMap<u64, DirHandle>>,
    dir_locks: Mutex<HashMap<u64, Arc<Mutex<()>>>>,
    next_fh: Mutex<u64>,
}

impl SshFs {
    /// Root a translator at `remote_root`, mirrored at `local_mountpoint`.
    pub fn new(
        sftp: Arc<dyn SftpSession>,
        tree: Arc<NodeTree>,
        remote_root: &str,
        local_mountpoint: &str,
    ) -> Self {
        let root = tree.new_root(remote_root, local_mountpoint);
        SshFs {
            sftp,
            tree,
            root,
            file_handles: RwLock::new(HashMap::new()),
            dir_handles: RwLock::new(HashMap::new()),
            dir_locks: Mutex::new(HashMap::new()),
            next_fh: Mutex::new(1),
        }
    }

    pub fn root(&self) -> u64 {
        self.root
    }

    pub fn tree(&self) -> &Arc<NodeTree> {
        &self.tree
    }

    /// The kernel addresses the mount root as `FUSE_ROOT_ID`.
    fn resolve(&self, ino: u64) -> u64 {
        if ino == FUSE_ROOT_ID {
            self.root
        } else {
            ino
        }
    }

    fn alloc_fh(&self) -> u64 {
        let mut next = self.next_fh.lock();
        let fh = *next;
        *next = next.wrapping_add(1);
        fh
    }

    fn remote_path(&self, ino: u64) -> String {
        self.tree.path(ino).to_string_lossy().into_owned()
    }

    fn child_path(&self, dir: u64, name: &str) -> String {
        self.tree
            .path(dir)
            .join(name)
            .to_string_lossy()
            .into_owned()
    }

    fn dir_lock(&self, ino: u64) -> Arc<Mutex<()>> {
        let mut locks = self.dir_locks.lock();
        Arc::clone(locks.entry(ino).or_insert_with(|| Arc::new(Mutex::new(()))))
    }

    /// Stat the node's remote path and build its kernel attributes.
    pub fn do_getattr(&self, ino: u64) -> Result<FileAttr, libc::c_int> {
        let node = self.tree.get(ino).ok_or(libc::ENOENT)?;
        let stat = self
            .sftp
            .stat(&self.remote_path(ino))
            .map_err(|e| sftp_error_to_errno(&e))?;
        Ok(stat_to_fileattr(node.inode, &stat))
    }

    /// Resolve `name` under `dir`: registry first, remote stat second. A
    /// child discovered remotely gets a node linked under `dir`, joining the
    /// parent's child list only when that list is already populated.
    pub fn do_lookup(&self, dir: u64, name: &str) -> Result<Node, libc::c_int> {
        if let Some(node) = self.tree.get_child(dir, name) {
            return Ok(node);
        }

        let path = self.child_path(dir, name);
        let stat = self.sftp.stat(&path).map_err(|e| sftp_error_to_errno(&e))?;

        let kind = if stat.is_dir {
            NodeKind::Directory
        } else {
            NodeKind::File
        };
        let ino = self.tree.new_node(dir, name, kind);
        self.tree.prepend_child(dir, ino, kind, false);
        self.tree.get(ino).ok_or(libc::ENOENT)
    }

    /// Enumerate `dir` remotely and rebuild its child lists, reusing
    /// registered child nodes and creating the rest. Returns one record per
    /// entry in server order.
    pub fn do_readdir(&self, dir: u64) -> Result<Vec<(u64, FileType, String)>, libc::c_int> {
        let entries = self
            .sftp
            .read_dir(&self.remote_path(dir))
            .map_err(|e| sftp_error_to_errno(&e))?;

        let mut dirs = Vec::new();
        let mut files = Vec::new();
        let mut out = Vec::with_capacity(entries.len());

        for entry in entries {
            let kind = if entry.stat.is_dir {
                NodeKind::Directory
            } else {
                NodeKind::File
            };
            let child = match self.tree.get_child(dir, &entry.name) {
                Some(node) => node.inode,
                None => self.tree.new_node(dir, &entry.name, kind),
            };
            match kind {
                NodeKind::Directory => {
                    dirs.push(child);
                    out.push((child, FileType::Directory, entry.name));
                }
                NodeKind::File => {
                    files.push(child);
                    out.push((child, FileType::RegularFile, entry.name));
                }
            }
        }

        self.tree.set_children(dir, dirs, files);
        Ok(out)
    }

    /// Create a remote directory and its node. An already-registered
    /// directory child is returned as-is.
    pub fn do_mkdir(
        &self,
        dir: u64,
        name: &str,
        mode: u32,
        uid: u32,
        gid: u32,
    ) -> Result<Node, libc::c_int> {
        if let Some(existing) = self.tree.get_child(dir, name) {
            if existing.is_dir() {
                return Ok(existing);
            }
            return Err(libc::EEXIST);
        }

        let ino = self.tree.new_node(dir, name, NodeKind::Directory);
        let path = self.remote_path(ino);

        self.sftp.mkdir(&path).map_err(|e| sftp_error_to_errno(&e))?;
        self.sftp
            .chmod(&path, mode)
            .map_err(|e| sftp_error_to_errno(&e))?;
        self.sftp
            .chown(&path, uid, gid)
            .map_err(|e| sftp_error_to_errno(&e))?;

        self.tree.prepend_child(dir, ino, NodeKind::Directory, true);
        self.tree.get(ino).ok_or(libc::ENOENT)
    }

    /// Create a remote file and return its node with an open handle. An
    /// existing child is returned as the opened file without touching the
    /// remote; its handle opens lazily on first read or write.
    pub fn do_create(
        &self,
        dir: u64,
        name: &str,
        mode: u32,
        uid: u32,
        gid: u32,
    ) -> Result<(Node, u64), libc::c_int> {
        if let Some(existing) = self.tree.get_child(dir, name) {
            let fh = self.alloc_fh();
            self.file_handles.write().insert(
                fh,
                Arc::new(FileHandle::new(
                    existing.inode,
                    libc::O_WRONLY,
                    false,
                    None,
                )),
            );
            return Ok((existing, fh));
        }

        let ino = self.tree.new_node(dir, name, NodeKind::File);
        let path = self.remote_path(ino);

        let remote = self
            .sftp
            .create(&path)
            .map_err(|e| sftp_error_to_errno(&e))?;
        self.sftp
            .chmod(&path, mode)
            .map_err(|e| sftp_error_to_errno(&e))?;
        self.sftp
            .chown(&path, uid, gid)
            .map_err(|e| sftp_error_to_errno(&e))?;

        self.tree.prepend_child(dir, ino, NodeKind::File, true);

        let fh = self.alloc_fh();
        self.file_handles.write().insert(
            fh,
            Arc::new(FileHandle::new(
                ino,
                libc::O_WRONLY | libc::O_CREAT,
                true,
                Some(remote),
            )),
        );

        let node = self.tree.get(ino).ok_or(libc::ENOENT)?;
        Ok((node, fh))
    }

    /// Open a file node. Append and mixed read/write opens are refused; a
    /// write-only open asks the kernel to purge its attribute cache.
    pub fn do_open(&self, ino: u64, flags: i32) -> Result<(u64, u32), libc::c_int> {
        if flags & libc::O_APPEND != 0 {
            return Err(libc::ENOTSUP);
        }
        let accmode = flags & libc::O_ACCMODE;
        if accmode == libc::O_RDWR {
            return Err(libc::ENOTSUP);
        }

        let node = self.tree.get(ino).ok_or(libc::ENOENT)?;
        let remote = self
            .sftp
            .open(&self.remote_path(node.inode), flags)
            .map_err(|e| sftp_error_to_errno(&e))?;

        let writing = accmode == libc::O_WRONLY;
        let fh = self.alloc_fh();
        self.file_handles
            .write()
            .insert(fh, Arc::new(FileHandle::new(ino, flags, writing, Some(remote))));

        Ok((fh, if writing { FOPEN_PURGE_ATTR } else { 0 }))
    }

    fn file_handle(&self, fh: u64) -> Result<Arc<FileHandle>, libc::c_int> {
        self.file_handles
            .read()
            .get(&fh)
            .cloned()
            .ok_or(libc::EBADF)
    }

    /// Positioned read on an open handle, opening the remote file lazily
    /// with the request's flags (the zero-copy open path arrives here with
    /// no remote handle attached).
    pub fn do_read(
        &self,
        fh: u64,
        offset: u64,
        size: u32,
        flags: i32,
    ) -> Result<Vec<u8>, libc::c_int> {
        let handle = self.file_handle(fh)?;
        let mut remote = handle.remote.lock();
        if remote.is_none() {
            *remote = Some(
                self.sftp
                    .open(&self.remote_path(handle.ino), flags)
                    .map_err(|e| sftp_error_to_errno(&e))?,
            );
        }
        let file = remote.as_mut().ok_or(libc::EBADF)?;

        file.seek(offset).map_err(|e| sftp_error_to_errno(&e))?;
        let mut buf = vec![0u8; size as usize];
        let n = file.read(&mut buf).map_err(|e| sftp_error_to_errno(&e))?;
        buf.truncate(n);
        Ok(buf)
    }

    /// Positioned write on an open handle; the remote file opens lazily with
    /// the handle flags combined with the request's flags.
    pub fn do_write(&self, fh: u64, offset: u64, data: &[u8], flags: i32) -> Result<u32, libc::c_int> {
        let handle = self.file_handle(fh)?;
        let mut remote = handle.remote.lock();
        if remote.is_none() {
            *remote = Some(
                self.sftp
                    .open(&self.remote_path(handle.ino), handle.flags | flags)
                    .map_err(|e| sftp_error_to_errno(&e))?,
            );
        }
        let file = remote.as_mut().ok_or(libc::EBADF)?;

        file.seek(offset).map_err(|e| sftp_error_to_errno(&e))?;
        let mut written = 0;
        while written < data.len() {
            let n = file
                .write(&data[written..])
                .map_err(|e| sftp_error_to_errno(&e))?;
            if n == 0 {
                break;
            }
            written += n;
        }
        Ok(written as u32)
    }

    /// Close the remote handle, if one was opened, and drop the handle
    /// record. A close error is surfaced but the node tree is untouched.
    pub fn do_release(&self, fh: u64) -> Result<(), libc::c_int> {
        let handle = self.file_handles.write().remove(&fh).ok_or(libc::EBADF)?;
        let mut remote = handle.remote.lock();
        if let Some(file) = remote.as_mut() {
            file.close().map_err(|e| sftp_error_to_errno(&e))?;
        }
        Ok(())
    }

    /// Setattr: a size change truncates the remote file and is reflected in
    /// the reply; every other field (and any request on a directory) is
    /// acknowledged without remote effect.
    pub fn do_setattr(&self, ino: u64, size: Option<u64>) -> Result<FileAttr, libc::c_int> {
        let node = self.tree.get(ino).ok_or(libc::ENOENT)?;
        if node.is_dir() {
            return self.do_getattr(ino);
        }
        match size {
            Some(size) => {
                self.sftp
                    .truncate(&self.remote_path(ino), size)
                    .map_err(|e| sftp_error_to_errno(&e))?;
                let mut attr = self.do_getattr(ino)?;
                attr.size = size;
                Ok(attr)
            }
            None => self.do_getattr(ino),
        }
    }

    /// Remove a child by name. Directory removal is refused from the cached
    /// child lists alone; the remote call is only issued for a directory
    /// believed empty.
    pub fn do_remove(&self, dir: u64, name: &str, as_directory: bool) -> Result<(), libc::c_int> {
        let child = self.tree.get_child(dir, name).ok_or(libc::ENOENT)?;
        let path = self.remote_path(child.inode);

        if as_directory {
            let has_dirs = child.dirs.as_ref().map(|l| !l.is_empty()).unwrap_or(false);
            let has_files = child.files.as_ref().map(|l| !l.is_empty()).unwrap_or(false);
            if has_dirs || has_files {
                return Err(libc::ENOTEMPTY);
            }
            self.sftp
                .remove_directory(&path)
                .map_err(|e| sftp_error_to_errno(&e))?;
            self.tree
                .remove_child_entry(dir, child.inode, NodeKind::Directory);
        } else {
            self.sftp
                .remove(&path)
                .map_err(|e| sftp_error_to_errno(&e))?;
            self.tree.remove_child_entry(dir, child.inode, NodeKind::File);
        }

        self.tree.remove(child.inode);
        Ok(())
    }

    /// Move a child between directories and/or names. The node keeps its
    /// inode; the tree is rekeyed first, then the remote rename is issued
    /// against the paths computed beforehand.
    pub fn do_rename(
        &self,
        old_parent: u64,
        old_name: &str,
        new_parent: u64,
        new_name: &str,
    ) -> Result<(), libc::c_int> {
        let node = self
            .tree
            .get_child(old_parent, old_name)
            .ok_or(libc::ENOENT)?;

        let old_path = self.child_path(old_parent, old_name);
        let new_path = self.child_path(new_parent, new_name);

        self.tree.rename(node.inode, new_parent, new_name);
        self.sftp
            .rename(&old_path, &new_path)
            .map_err(|e| sftp_error_to_errno(&e))?;
        Ok(())
    }

    /// Take the directory's handle lock; released when the handle is.
    pub fn do_opendir(&self, ino: u64) -> Result<u64, libc::c_int> {
        let node = self.tree.get(ino).ok_or(libc::ENOENT)?;
        if !node.is_dir() {
            return Err(libc::ENOTDIR);
        }
        let fh = self.alloc_fh();
        let handle = DirHandle::acquire(ino, self.dir_lock(ino));
        self.dir_handles.write().insert(fh, handle);
        Ok(fh)
    }

    pub fn do_releasedir(&self, fh: u64) -> Result<(), libc::c_int> {
        self.dir_handles.write().remove(&fh).ok_or(libc::EBADF)?;
        Ok(())
    }
}

impl Filesystem for SshFs {
    fn init(
        &mut self,
        _req: &Request,
        config: &mut KernelConfig,
    ) -> std::result::Result<(), libc::c_int> {
        let _ = config.add_capabilities(
            fuser::consts::FUSE_ASYNC_READ | fuser::consts::FUSE_WRITEBACK_CACHE,
        );
        tracing::info!("sshmnt filesystem initialized");
        Ok(())
    }

    fn destroy(&mut self) {
        tracing::info!("sshmnt filesystem destroyed");
    }

    fn lookup(&mut self, _req: &Request, parent: u64, name: &OsStr, reply: ReplyEntry) {
        let parent = self.resolve(parent);
        tracing::debug!("lookup(parent={}, name={:?})", parent, name);
        let Some(name) = name.to_str() else {
            reply.error(libc::EINVAL);
            return;
        };
        match self
            .do_lookup(parent, name)
            .and_then(|node| self.do_getattr(node.inode))
        {
            Ok(attr) => reply.entry(&TTL, &attr, 0),
            Err(errno) => reply.error(errno),
        }
    }

    fn getattr(&mut self, _req: &Request, ino: u64, _fh: Option<u64>, reply: ReplyAttr) {
        let resolved = self.resolve(ino);
        tracing::debug!("getattr(ino={})", resolved);
        match self.do_getattr(resolved) {
            Ok(mut attr) => {
                // The kernel expects the id it asked with (the mount root is
                // always FUSE_ROOT_ID on its side).
                attr.ino = ino;
                reply.attr(&TTL, &attr);
            }
            Err(errno) => reply.error(errno),
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn setattr(
        &mut self,
        _req: &Request,
        ino: u64,
        _mode: Option<u32>,
        _uid: Option<u32>,
        _gid: Option<u32>,
        size: Option<u64>,
        _atime: Option<TimeOrNow>,
        _mtime: Option<TimeOrNow>,
        _ctime: Option<SystemTime>,
        _fh: Option<u64>,
        _crtime: Option<SystemTime>,
        _chgtime: Option<SystemTime>,
        _bkuptime: Option<SystemTime>,
        _flags: Option<u32>,
        reply: ReplyAttr,
    ) {
        let resolved = self.resolve(ino);
        tracing::debug!("setattr(ino={}, size={:?})", resolved, size);
        match self.do_setattr(resolved, size) {
            Ok(mut attr) => {
                attr.ino = ino;
                reply.attr(&TTL, &attr);
            }
            Err(errno) => reply.error(errno),
        }
    }

    fn readdir(
        &mut self,
        _req: &Request,
        ino: u64,
        _fh: u64,
        offset: i64,
        mut reply: ReplyDirectory,
    ) {
        let dir = self.resolve(ino);
        tracing::debug!("readdir(ino={}, offset={})", dir, offset);
        let entries = match self.do_readdir(dir) {
            Ok(entries) => entries,
            Err(errno) => {
                reply.error(errno);
                return;
            }
        };

        for (idx, (child, kind, name)) in entries.into_iter().enumerate() {
            if (idx as i64) < offset {
                continue;
            }
            if reply.add(child, (idx + 1) as i64, kind, &name) {
                break;
            }
        }
        reply.ok();
    }

    fn mkdir(
        &mut self,
        req: &Request,
        parent: u64,
        name: &OsStr,
        mode: u32,
        _umask: u32,
        reply: ReplyEntry,
    ) {
        let parent = self.resolve(parent);
        tracing::debug!("mkdir(parent={}, name={:?}, mode={:#o})", parent, name, mode);
        let Some(name) = name.to_str() else {
            reply.error(libc::EINVAL);
            return;
        };
        match self
            .do_mkdir(parent, name, mode, req.uid(), req.gid())
            .and_then(|node| self.do_getattr(node.inode))
        {
            Ok(attr) => reply.entry(&TTL, &attr, 0),
            Err(errno) => reply.error(errno),
        }
    }

    fn create(
        &mut self,
        req: &Request,
        parent: u64,
        name: &OsStr,
        mode: u32,
        _umask: u32,
        _flags: i32,
        reply: ReplyCreate,
    ) {
        let parent = self.resolve(parent);
        tracing::debug!("create(parent={}, name={:?}, mode={:#o})", parent, name, mode);
        let Some(name) = name.to_str() else {
            reply.error(libc::EINVAL);
            return;
        };
        match self.do_create(parent, name, mode, req.uid(), req.gid()) {
            Ok((node, fh)) => match self.do_getattr(node.inode) {
                Ok(attr) => reply.created(&TTL, &attr, 0, fh, 0),
                Err(errno) => reply.error(errno),
            },
            Err(errno) => reply.error(errno),
        }
    }

    fn open(&mut self, _req: &Request, ino: u64, flags: i32, reply: ReplyOpen) {
        let ino = self.resolve(ino);
        tracing::debug!("open(ino={}, flags={:#x})", ino, flags);
        match self.do_open(ino, flags) {
            Ok((fh, open_flags)) => reply.opened(fh, open_flags),
            Err(errno) => reply.error(errno),
        }
    }

    fn read(
        &mut self,
        _req: &Request,
        ino: u64,
        fh: u64,
        offset: i64,
        size: u32,
        flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyData,
    ) {
        tracing::debug!("read(ino={}, fh={}, offset={}, size={})", ino, fh, offset, size);
        match self.do_read(fh, offset.max(0) as u64, size, flags) {
            Ok(data) => reply.data(&data),
            Err(errno) => reply.error(errno),
        }
    }

    fn write(
        &mut self,
        _req: &Request,
        ino: u64,
        fh: u64,
        offset: i64,
        data: &[u8],
        _write_flags: u32,
        flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyWrite,
    ) {
        tracing::debug!("write(ino={}, fh={}, offset={}, len={})", ino, fh, offset, data.len());
        match self.do_write(fh, offset.max(0) as u64, data, flags) {
            Ok(written) => reply.written(written),
            Err(errno) => reply.error(errno),
        }
    }

    fn flush(&mut self, _req: &Request, ino: u64, _fh: u64, _lock_owner: u64, reply: ReplyEmpty) {
        tracing::debug!("flush(ino={})", self.resolve(ino));
        reply.ok();
    }

    fn release(
        &mut self,
        _req: &Request,
        ino: u64,
        fh: u64,
        _flags: i32,
        _lock_owner: Option<u64>,
        _flush: bool,
        reply: ReplyEmpty,
    ) {
        tracing::debug!("release(ino={}, fh={})", ino, fh);
        match self.do_release(fh) {
            Ok(()) => reply.ok(),
            Err(errno) => reply.error(errno),
        }
    }

    fn fsync(&mut self, _req: &Request, ino: u64, _fh: u64, _datasync: bool, reply: ReplyEmpty) {
        tracing::debug!("fsync(ino={})", self.resolve(ino));
        reply.ok();
    }

    fn unlink(&mut self, _req: &Request, parent: u64, name: &OsStr, reply: ReplyEmpty) {
        let parent = self.resolve(parent);
        tracing::debug!("unlink(parent={}, name={:?})", parent, name);
        let Some(name) = name.to_str() else {
            reply.error(libc::EINVAL);
            return;
        };
        match self.do_remove(parent, name, false) {
            Ok(()) => reply.ok(),
            Err(errno) => reply.error(errno),
        }
    }

    fn rmdir(&mut self, _req: &Request, parent: u64, name: &OsStr, reply: ReplyEmpty) {
        let parent = self.resolve(parent);
        tracing::debug!("rmdir(parent={}, name={:?})", parent, name);
        let Some(name) = name.to_str() else {
            reply.error(libc::EINVAL);
            return;
        };
        match self.do_remove(parent, name, true) {
            Ok(()) => reply.ok(),
            Err(errno) => reply.error(errno),
        }
    }

    fn rename(
        &mut self,
        _req: &Request,
        parent: u64,
        name: &OsStr,
        newparent: u64,
        newname: &OsStr,
        _flags: u32,
        reply: ReplyEmpty,
    ) {
        let parent = self.resolve(parent);
        let newparent = self.resolve(newparent);
        tracing::debug!(
            "rename(parent={}, name={:?}, newparent={}, newname={:?})",
            parent,
            name,
            newparent,
            newname
        );
        let (Some(name), Some(newname)) = (name.to_str(), newname.to_str()) else {
            reply.error(libc::EINVAL);
            return;
        };
        match self.do_rename(parent, name, newparent, newname) {
            Ok(()) => reply.ok(),
            Err(errno) => reply.error(errno),
        }
    }

    // Symlinks are acknowledged but not executed: the reply names the
    // invoking directory and no remote call is made.
    fn symlink(
        &mut self,
        _req: &Request,
        parent: u64,
        link_name: &OsStr,
        target: &Path,
        reply: ReplyEntry,
    ) {
        let parent = self.resolve(parent);
        tracing::debug!("symlink(parent={}, name={:?}, target={:?})", parent, link_name, target);
        match self.do_getattr(parent) {
            Ok(attr) => reply.entry(&TTL, &attr, 0),
            Err(errno) => reply.error(errno),
        }
    }

    // Hard links get the same treatment as symlinks.
    fn link(
        &mut self,
        _req: &Request,
        ino: u64,
        newparent: u64,
        newname: &OsStr,
        reply: ReplyEntry,
    ) {
        let newparent = self.resolve(newparent);
        tracing::debug!("link(ino={}, newparent={}, newname={:?})", ino, newparent, newname);
        match self.do_getattr(newparent) {
            Ok(attr) => reply.entry(&TTL, &attr, 0),
            Err(errno) => reply.error(errno),
        }
    }

    fn opendir(&mut self, _req: &Request, ino: u64, _flags: i32, reply: ReplyOpen) {
        let ino = self.resolve(ino);
        tracing::debug!("opendir(ino={})", ino);
        match self.do_opendir(ino) {
            Ok(fh) => reply.opened(fh, 0),
            Err(errno) => reply.error(errno),
        }
    }

    fn releasedir(&mut self, _req: &Request, ino: u64, fh: u64, _flags: i32, reply: ReplyEmpty) {
        tracing::debug!("releasedir(ino={}, fh={})", ino, fh);
        match self.do_releasedir(fh) {
            Ok(()) => reply.ok(),
            Err(errno) => reply.error(errno),
        }
    }
}
