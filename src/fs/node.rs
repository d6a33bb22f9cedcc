//! In-memory mirror of the remote namespace.
//!
//! Every directory or file seen through the mount is one [`Node`] held in a
//! process-wide [`NodeTree`]. The tree keys nodes two ways: by inode, and by
//! `(parent inode, name)` so lookups can resolve children without touching
//! the remote. Parents are held by inode and resolved through the table, so
//! removing a node from the table truly detaches it.

use fxhash::hash64;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;

/// Counter base used when no seed was supplied before the first allocation.
pub const INODE_BASE: u64 = 900_000_000;

/// Bounded capacity of the reclaimed-inode queue; releases past this are
/// dropped and the counter keeps advancing.
pub const FREE_LIST_CAPACITY: usize = 1_000_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    Directory,
    File,
}

/// One directory or file in the mirrored namespace.
///
/// `dirs` and `files` are only meaningful for directories: `None` means the
/// directory has not been enumerated yet, `Some(vec![])` means it was
/// enumerated and found empty. Entries are child inodes, resolved through
/// the tree.
#[derive(Debug, Clone)]
pub struct Node {
    pub inode: u64,
    pub name: String,
    pub kind: NodeKind,
    pub is_root: bool,
    /// Parent inode; 0 for the root.
    pub parent: u64,
    /// Root only: the absolute remote path the mount is anchored at.
    pub remote_root: String,
    /// Root only: the absolute local path the bridge is mounted on.
    pub local_mountpoint: String,
    pub dirs: Option<Vec<u64>>,
    pub files: Option<Vec<u64>>,
}

impl Node {
    pub fn is_dir(&self) -> bool {
        self.kind == NodeKind::Directory
    }
}

struct InodeAllocator {
    next: u64,
    advanced: bool,
    free: VecDeque<u64>,
}

impl InodeAllocator {
    fn new() -> Self {
        InodeAllocator {
            next: INODE_BASE,
            advanced: false,
            free: VecDeque::new(),
        }
    }

    /// Re-base the counter. Has no effect once an inode has been handed out,
    /// so a late seed cannot collide with numbers already in use.
    fn seed(&mut self, seed: u64) {
        if !self.advanced {
            self.next = seed;
        }
    }

    fn next(&mut self) -> u64 {
        if let Some(ino) = self.free.pop_front() {
            return ino;
        }
        self.advanced = true;
        self.next += 1;
        self.next
    }

    fn release(&mut self, ino: u64) {
        if self.free.len() < FREE_LIST_CAPACITY {
            self.free.push_back(ino);
        }
    }
}

struct Table {
    nodes: HashMap<u64, Node>,
    /// parent inode -> 64-bit name hash -> child inode.
    children: HashMap<u64, HashMap<u64, u64>>,
}

impl Table {
    fn child_key(name: &str) -> u64 {
        hash64(name.as_bytes())
    }

    fn index_child(&mut self, parent: u64, name: &str, ino: u64) {
        self.children
            .entry(parent)
            .or_default()
            .insert(Self::child_key(name), ino);
    }

    fn unindex_child(&mut self, parent: u64, name: &str) {
        if let Some(map) = self.children.get_mut(&parent) {
            map.remove(&Self::child_key(name));
        }
    }

    fn child(&self, parent: u64, name: &str) -> Option<u64> {
        self.children
            .get(&parent)
            .and_then(|map| map.get(&Self::child_key(name)).copied())
    }
}

/// Process-wide node table plus the inode allocator feeding it.
pub struct NodeTree {
    table: RwLock<Table>,
    allocator: Mutex<InodeAllocator>,
}

impl NodeTree {
    pub fn new() -> Self {
        NodeTree {
            table: RwLock::new(Table {
                nodes: HashMap::new(),
                children: HashMap::new(),
            }),
            allocator: Mutex::new(InodeAllocator::new()),
        }
    }

    /// Seed the inode counter, normally from the local mountpoint's own inode
    /// so mirrored inodes never collide with it. No-op after first allocation.
    pub fn seed_inodes(&self, seed: u64) {
        self.allocator.lock().seed(seed);
    }

    /// Create and register the root node for a mount. The root's `name` is
    /// the basename of the remote root; the full remote root is kept
    /// verbatim for path reconstruction.
    pub fn new_root(&self, remote_root: &str, local_mountpoint: &str) -> u64 {
        let basename = std::path::Path::new(remote_root)
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| remote_root.to_string());

        let inode = self.allocator.lock().next();
        let node = Node {
            inode,
            name: basename,
            kind: NodeKind::Directory,
            is_root: true,
            parent: 0,
            remote_root: remote_root.to_string(),
            local_mountpoint: local_mountpoint.to_string(),
            dirs: None,
            files: None,
        };
        tracing::debug!(inode, remote_root, "new root node");
        self.table.write().nodes.insert(inode, node);
        inode
    }

    /// Create and register a child node under `parent`.
    pub fn new_node(&self, parent: u64, name: &str, kind: NodeKind) -> u64 {
        let inode = self.allocator.lock().next();
        let node = Node {
            inode,
            name: name.to_string(),
            kind,
            is_root: false,
            parent,
            remote_root: String::new(),
            local_mountpoint: String::new(),
            dirs: None,
            files: None,
        };
        tracing::debug!(inode, parent, name, ?kind, "new node");
        let mut table = self.table.write();
        table.index_child(parent, name, inode);
        table.nodes.insert(inode, node);
        inode
    }

    pub fn get(&self, inode: u64) -> Option<Node> {
        self.table.read().nodes.get(&inode).cloned()
    }

    pub fn get_child(&self, parent: u64, name: &str) -> Option<Node> {
        let table = self.table.read();
        table
            .child(parent, name)
            .and_then(|ino| table.nodes.get(&ino).cloned())
    }

    /// Absolute remote path: the root's remote root joined with every name
    /// on the walk from root to `inode`.
    pub fn path(&self, inode: u64) -> PathBuf {
        self.reconstruct(inode, |root| root.remote_root.clone())
    }

    /// Absolute local path under the mountpoint, same walk as [`path`].
    pub fn local_path(&self, inode: u64) -> PathBuf {
        self.reconstruct(inode, |root| root.local_mountpoint.clone())
    }

    fn reconstruct(&self, inode: u64, root_base: impl Fn(&Node) -> String) -> PathBuf {
        let table = self.table.read();
        let mut names: Vec<String> = Vec::new();
        let mut cursor = inode;
        loop {
            let Some(node) = table.nodes.get(&cursor) else {
                break;
            };
            if node.is_root {
                let mut path = PathBuf::from(root_base(node));
                for name in names.iter().rev() {
                    path.push(name.as_str());
                }
                return path;
            }
            names.push(node.name.clone());
            cursor = node.parent;
        }
        // Detached node: best effort from the collected names.
        let mut path = PathBuf::new();
        for name in names.iter().rev() {
            path.push(name.as_str());
        }
        path
    }

    /// Move `inode` under `new_parent` as `new_name`.
    ///
    /// Rekeys the child index, updates the node, and when the parent changed
    /// moves the entry between the parents' child lists: filtered out of the
    /// old list by inode, prepended to the new list (again filtering the
    /// moved inode to suppress duplicates).
    pub fn rename(&self, inode: u64, new_parent: u64, new_name: &str) {
        let mut table = self.table.write();
        let Some(node) = table.nodes.get(&inode).cloned() else {
            return;
        };
        if node.parent == new_parent && node.name == new_name {
            return;
        }

        table.unindex_child(node.parent, &node.name);
        table.index_child(new_parent, new_name, inode);

        let old_parent = node.parent;
        let kind = node.kind;
        if let Some(n) = table.nodes.get_mut(&inode) {
            n.parent = new_parent;
            n.name = new_name.to_string();
        }

        if old_parent == new_parent {
            return;
        }

        if let Some(op) = table.nodes.get_mut(&old_parent) {
            if let Some(list) = list_for_mut(op, kind) {
                list.retain(|&i| i != inode);
            }
        }
        if let Some(np) = table.nodes.get_mut(&new_parent) {
            if let Some(list) = list_for_mut(np, kind) {
                list.retain(|&i| i != inode);
                list.insert(0, inode);
            }
        }
    }

    /// Drop `inode` from both indices and return its number to the free
    /// list. The caller edits the parent's child lists; it also performed
    /// the remote call that made this node stale.
    pub fn remove(&self, inode: u64) {
        let mut table = self.table.write();
        let Some(node) = table.nodes.remove(&inode) else {
            return;
        };
        table.unindex_child(node.parent, &node.name);
        // A reused inode must not inherit a stale child index.
        table.children.remove(&inode);
        self.allocator.lock().release(inode);
        tracing::debug!(inode, name = %node.name, "node removed");
    }

    /// Prepend `child` to the matching child list of `dir`. With
    /// `materialize` the list is created when absent; otherwise an absent
    /// list (directory never enumerated) is left untouched.
    pub fn prepend_child(&self, dir: u64, child: u64, kind: NodeKind, materialize: bool) {
        let mut table = self.table.write();
        let Some(node) = table.nodes.get_mut(&dir) else {
            return;
        };
        let slot = match kind {
            NodeKind::Directory => &mut node.dirs,
            NodeKind::File => &mut node.files,
        };
        match slot {
            Some(list) => {
                list.retain(|&i| i != child);
                list.insert(0, child);
            }
            None if materialize => *slot = Some(vec![child]),
            None => {}
        }
    }

    /// Delete `child` from the matching child list of `dir`.
    pub fn remove_child_entry(&self, dir: u64, child: u64, kind: NodeKind) {
        let mut table = self.table.write();
        let Some(node) = table.nodes.get_mut(&dir) else {
            return;
        };
        if let Some(list) = list_for_mut(node, kind) {
            list.retain(|&i| i != child);
        }
    }

    /// Replace both child lists of `dir`, as rebuilt by a full enumeration.
    pub fn set_children(&self, dir: u64, dirs: Vec<u64>, files: Vec<u64>) {
        let mut table = self.table.write();
        if let Some(node) = table.nodes.get_mut(&dir) {
            node.dirs = Some(dirs);
            node.files = Some(files);
        }
    }

    pub fn len(&self) -> usize {
        self.table.read().nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Diagnostic snapshot of the whole table for the debug inspector.
    pub fn snapshot(&self) -> serde_json::Value {
        let table = self.table.read();
        let allocator = self.allocator.lock();

        let mut items = serde_json::Map::new();
        for node in table.nodes.values() {
            let record = self.node_record(&table, node);
            items.insert(node.inode.to_string(), record.clone());
            if !node.is_root {
                items.insert(format!("{}_{}", node.parent, node.name), record);
            }
        }

        serde_json::json!({
            "free_inode": format!("len:{} cap:{}", allocator.free.len(), FREE_LIST_CAPACITY),
            "count": table.nodes.len(),
            "items": serde_json::Value::Object(items),
        })
    }

    fn node_record(&self, table: &Table, node: &Node) -> serde_json::Value {
        #[derive(Serialize)]
        struct ChildRecord {
            name: String,
            inode: u64,
            parent_inode: u64,
            parent_name: String,
        }

        let child_records = |list: &Option<Vec<u64>>| -> Vec<ChildRecord> {
            list.as_deref()
                .unwrap_or(&[])
                .iter()
                .filter_map(|ino| table.nodes.get(ino))
                .map(|c| ChildRecord {
                    name: c.name.clone(),
                    inode: c.inode,
                    parent_inode: node.inode,
                    parent_name: node.name.clone(),
                })
                .collect()
        };

        let kind = if node.is_dir() {
            if node.is_root {
                "dir:root"
            } else {
                "dir"
            }
        } else {
            "file"
        };

        serde_json::json!({
            "inode": node.inode,
            "name": node.name,
            "parent": node.parent,
            "type": kind,
            "local_path": self.reconstruct_locked(table, node.inode, true),
            "remote_path": self.reconstruct_locked(table, node.inode, false),
            "files_count": node.files.as_ref().map(|l| l.len()).unwrap_or(0),
            "dirs_count": node.dirs.as_ref().map(|l| l.len()).unwrap_or(0),
            "files": serde_json::to_value(child_records(&node.files)).unwrap_or_default(),
            "dirs": serde_json::to_value(child_records(&node.dirs)).unwrap_or_default(),
        })
    }

    fn reconstruct_locked(&self, table: &Table, inode: u64, local: bool) -> String {
        let mut names: Vec<String> = Vec::new();
        let mut cursor = inode;
        while let Some(node) = table.nodes.get(&cursor) {
            if node.is_root {
                let mut path = PathBuf::from(if local {
                    node.local_mountpoint.clone()
                } else {
                    node.remote_root.clone()
                });
                for name in names.iter().rev() {
                    path.push(name.as_str());
                }
                return path.to_string_lossy().into_owned();
            }
            names.push(node.name.clone());
            cursor = node.parent;
        }
        String::new()
    }
}

impl Default for NodeTree {
    fn default() -> Self {
        Self::new()
    }
}

fn list_for_mut(node: &mut Node, kind: NodeKind) -> Option<&mut Vec<u64>> {
    match kind {
        NodeKind::Directory => node.dirs.as_mut(),
        NodeKind::File => node.files.as_mut(),
    }
}
