//! FUSE adapter: maps [`::fuser::Filesystem`] callbacks to [`ShadowFs`].

use std::ffi::OsStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime};

use bytes::Bytes;
use tracing::{debug, error, instrument, warn};

use crate::fs::{DirEntry, FileHandle, INodeType, InodeAddr, Node, NodeAttr, ShadowFs};

const BLOCK_SIZE: u32 = 4096;

/// Node known to the kernel, with the number of lookups it has not forgotten yet.
struct Tracked {
    node: Node,
    lookups: u64,
}

/// Kernel inode number to node mapping.
///
/// The root is registered under [`fuser::FUSE_ROOT_ID`] whatever identity it was minted with.
struct NodeTable {
    root_addr: InodeAddr,
    nodes: scc::HashMap<InodeAddr, Tracked>,
}

impl NodeTable {
    fn new(root: Node) -> Self {
        let root_addr = root.addr();
        let nodes = scc::HashMap::new();
        _ = nodes.insert_sync(
            fuser::FUSE_ROOT_ID,
            Tracked {
                node: root,
                lookups: 1,
            },
        );
        Self { root_addr, nodes }
    }

    fn to_kernel(&self, addr: InodeAddr) -> u64 {
        if addr == self.root_addr {
            fuser::FUSE_ROOT_ID
        } else {
            addr
        }
    }

    fn get(&self, ino: u64) -> Option<Node> {
        self.nodes.read_sync(&ino, |_, t| t.node.clone())
    }

    /// Records one more kernel reference to `node` and returns the inode number to reply with.
    fn remember(&self, node: Node) -> u64 {
        let ino = self.to_kernel(node.addr());
        match self.nodes.entry_sync(ino) {
            scc::hash_map::Entry::Occupied(mut occ) => {
                occ.get_mut().lookups += 1;
            }
            scc::hash_map::Entry::Vacant(vac) => {
                vac.insert_entry(Tracked { node, lookups: 1 });
            }
        }
        ino
    }

    fn forget(&self, ino: u64, nlookup: u64) {
        if ino == fuser::FUSE_ROOT_ID {
            return;
        }
        let removed = self.nodes.remove_if_sync(&ino, |t| {
            if t.lookups <= nlookup {
                true
            } else {
                t.lookups -= nlookup;
                false
            }
        });
        if removed.is_some() {
            debug!(ino, "dropped node");
        }
    }
}

/// Per-handle state for open files and directories.
///
/// Handles come from one counter and are never reused while the table lives.
struct HandleTable<T> {
    next: AtomicU64,
    open: scc::HashMap<FileHandle, T>,
}

impl<T: Clone> HandleTable<T> {
    fn new() -> Self {
        Self {
            next: AtomicU64::new(1),
            open: scc::HashMap::new(),
        }
    }

    fn insert(&self, value: T) -> FileHandle {
        let fh = self.next.fetch_add(1, Ordering::Relaxed);
        _ = self.open.insert_sync(fh, value);
        fh
    }

    fn get(&self, fh: FileHandle) -> Option<T> {
        self.open.read_sync(&fh, |_, v| v.clone())
    }

    fn release(&self, fh: FileHandle) -> bool {
        self.open.remove_sync(&fh).is_some()
    }
}

/// Bridges [`ShadowFs`] to the [`fuser::Filesystem`] trait.
///
/// Every request is spawned onto the tokio runtime, so slow origin-tier reads never hold up
/// unrelated requests.
pub struct FuserAdapter {
    fs: ShadowFs,
    nodes: Arc<NodeTable>,
    open_files: Arc<HandleTable<Bytes>>,
    open_dirs: Arc<HandleTable<Arc<[DirEntry]>>>,
    owner: (u32, u32),
    runtime: tokio::runtime::Handle,
}

impl FuserAdapter {
    // TODO: replace with notify_inval_entry once the origin tier can be watched; until then a short
    // TTL is the only thing bounding how stale the kernel's dentries get.
    const TTL: Duration = Duration::from_secs(1);

    /// Creates an adapter serving `fs`, with every node owned by `owner` (`(uid, gid)`).
    ///
    /// The root node is minted here, so build the adapter before any other node.
    pub fn new(fs: ShadowFs, owner: (u32, u32), runtime: tokio::runtime::Handle) -> Self {
        let root = fs.root();
        if root.addr() != fuser::FUSE_ROOT_ID {
            warn!(
                addr = root.addr(),
                "root minted after other nodes; its identity is remapped to FUSE_ROOT_ID"
            );
        }
        Self {
            fs,
            nodes: Arc::new(NodeTable::new(Node::Dir(root))),
            open_files: Arc::new(HandleTable::new()),
            open_dirs: Arc::new(HandleTable::new()),
            owner,
            runtime,
        }
    }
}

fn to_fuser_kind(itype: INodeType) -> fuser::FileType {
    match itype {
        INodeType::Directory => fuser::FileType::Directory,
        INodeType::File => fuser::FileType::RegularFile,
    }
}

fn to_fuser_attr(ino: u64, attr: NodeAttr, (uid, gid): (u32, u32)) -> fuser::FileAttr {
    let now = SystemTime::now();
    fuser::FileAttr {
        ino,
        size: attr.size,
        blocks: attr.size.div_ceil(512),
        atime: now,
        mtime: now,
        ctime: now,
        crtime: now,
        kind: to_fuser_kind(attr.itype),
        perm: attr.perms.bits(),
        nlink: if attr.itype == INodeType::Directory { 2 } else { 1 },
        uid,
        gid,
        rdev: 0,
        blksize: BLOCK_SIZE,
        flags: 0,
    }
}

/// The bytes of `data` a read at `offset` of at most `size` bytes returns.
fn slice_at(data: &Bytes, offset: i64, size: u32) -> Bytes {
    let Ok(start) = usize::try_from(offset) else {
        return Bytes::new();
    };
    if start >= data.len() {
        return Bytes::new();
    }
    let end = start.saturating_add(size as usize).min(data.len());
    data.slice(start..end)
}

/// Listing entries past `offset`, each paired with the offset that resumes after it.
fn entries_after(entries: &[DirEntry], offset: i64) -> impl Iterator<Item = (i64, &DirEntry)> {
    let skip = usize::try_from(offset).unwrap_or(0);
    entries
        .iter()
        .enumerate()
        .skip(skip)
        .map_while(|(i, entry)| Some((i64::try_from(i + 1).ok()?, entry)))
}

impl fuser::Filesystem for FuserAdapter {
    #[instrument(name = "FuserAdapter::lookup", skip(self, _req, reply))]
    fn lookup(
        &mut self,
        _req: &fuser::Request<'_>,
        parent: u64,
        name: &OsStr,
        reply: fuser::ReplyEntry,
    ) {
        let fs = self.fs.clone();
        let nodes = Arc::clone(&self.nodes);
        let owner = self.owner;
        let name = name.to_owned();
        self.runtime.spawn(async move {
            let Some(Node::Dir(dir)) = nodes.get(parent) else {
                debug!("parent is not a known directory, replying error");
                reply.error(libc::ENOENT);
                return;
            };
            match fs.lookup(&dir, &name).await {
                Ok(node) => {
                    let attr = node.attr();
                    let ino = nodes.remember(node);
                    let f_attr = to_fuser_attr(ino, attr, owner);
                    debug!(?f_attr, "replying...");
                    reply.entry(&Self::TTL, &f_attr, 0);
                }
                Err(e) => {
                    debug!(error = %e, "replying error");
                    reply.error(e.into());
                }
            }
        });
    }

    #[instrument(name = "FuserAdapter::getattr", skip(self, _req, _fh, reply))]
    fn getattr(
        &mut self,
        _req: &fuser::Request<'_>,
        ino: u64,
        _fh: Option<u64>,
        reply: fuser::ReplyAttr,
    ) {
        match self.nodes.get(ino) {
            Some(node) => {
                let attr = to_fuser_attr(ino, node.attr(), self.owner);
                debug!(?attr, "replying...");
                reply.attr(&Self::TTL, &attr);
            }
            None => {
                debug!("unknown inode, replying error");
                reply.error(libc::ENOENT);
            }
        }
    }

    #[instrument(name = "FuserAdapter::opendir", skip(self, _req, _flags, reply))]
    fn opendir(
        &mut self,
        _req: &fuser::Request<'_>,
        ino: u64,
        _flags: i32,
        reply: fuser::ReplyOpen,
    ) {
        let fs = self.fs.clone();
        let nodes = Arc::clone(&self.nodes);
        let open_dirs = Arc::clone(&self.open_dirs);
        self.runtime.spawn(async move {
            let Some(Node::Dir(dir)) = nodes.get(ino) else {
                debug!("not a known directory, replying error");
                reply.error(libc::ENOTDIR);
                return;
            };
            match fs.read_dir_all(&dir).await {
                Ok(entries) => {
                    let fh = open_dirs.insert(Arc::from(entries));
                    debug!(handle = fh, "replying...");
                    reply.opened(fh, 0);
                }
                Err(e) => {
                    error!(error = %e, "listing failed, replying error");
                    reply.error(e.into());
                }
            }
        });
    }

    #[instrument(name = "FuserAdapter::readdir", skip(self, _req, _ino, offset, reply))]
    fn readdir(
        &mut self,
        _req: &fuser::Request<'_>,
        _ino: u64,
        fh: u64,
        offset: i64,
        mut reply: fuser::ReplyDirectory,
    ) {
        let Some(entries) = self.open_dirs.get(fh) else {
            debug!("directory handle not open, replying error");
            reply.error(libc::EBADF);
            return;
        };

        for (next_offset, entry) in entries_after(&entries, offset) {
            debug!(?entry, "adding entry to reply...");
            if reply.add(entry.addr, next_offset, to_fuser_kind(entry.itype), &entry.name) {
                debug!("buffer full for now, stopping readdir");
                break;
            }
        }

        debug!("finalizing reply...");
        reply.ok();
    }

    #[instrument(name = "FuserAdapter::releasedir", skip(self, _req, _ino, _flags, reply))]
    fn releasedir(
        &mut self,
        _req: &fuser::Request<'_>,
        _ino: u64,
        fh: u64,
        _flags: i32,
        reply: fuser::ReplyEmpty,
    ) {
        if self.open_dirs.release(fh) {
            reply.ok();
        } else {
            debug!("directory handle not open, replying error");
            reply.error(libc::EBADF);
        }
    }

    #[instrument(name = "FuserAdapter::open", skip(self, _req, _flags, reply))]
    fn open(&mut self, _req: &fuser::Request<'_>, ino: u64, _flags: i32, reply: fuser::ReplyOpen) {
        let fs = self.fs.clone();
        let nodes = Arc::clone(&self.nodes);
        let open_files = Arc::clone(&self.open_files);
        self.runtime.spawn(async move {
            let Some(node) = nodes.get(ino) else {
                reply.error(libc::ENOENT);
                return;
            };
            let Some(file) = node.as_file() else {
                reply.error(libc::EISDIR);
                return;
            };
            match fs.read_all(file).await {
                Ok(content) => {
                    let fh = open_files.insert(content);
                    debug!(handle = fh, "replying...");
                    reply.opened(fh, 0);
                }
                Err(e) => {
                    error!(error = %e, "read failed, replying error");
                    reply.error(e.into());
                }
            }
        });
    }

    #[instrument(
        name = "FuserAdapter::read",
        skip(self, _req, _ino, offset, size, _flags, _lock_owner, reply)
    )]
    fn read(
        &mut self,
        _req: &fuser::Request<'_>,
        _ino: u64,
        fh: u64,
        offset: i64,
        size: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: fuser::ReplyData,
    ) {
        match self.open_files.get(fh) {
            Some(content) => {
                let data = slice_at(&content, offset, size);
                debug!(read_bytes = data.len(), "replying...");
                reply.data(&data);
            }
            None => {
                debug!("file handle not open, replying error");
                reply.error(libc::EBADF);
            }
        }
    }

    #[instrument(
        name = "FuserAdapter::release",
        skip(self, _req, _ino, _flags, _lock_owner, _flush, reply)
    )]
    fn release(
        &mut self,
        _req: &fuser::Request<'_>,
        _ino: u64,
        fh: u64,
        _flags: i32,
        _lock_owner: Option<u64>,
        _flush: bool,
        reply: fuser::ReplyEmpty,
    ) {
        if self.open_files.release(fh) {
            reply.ok();
        } else {
            debug!("file handle not open, replying error");
            reply.error(libc::EBADF);
        }
    }

    #[instrument(name = "FuserAdapter::forget", skip(self, _req))]
    fn forget(&mut self, _req: &fuser::Request<'_>, ino: u64, nlookup: u64) {
        self.nodes.forget(ino, nlookup);
    }
}
