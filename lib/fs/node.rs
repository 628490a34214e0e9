use std::ffi::{OsStr, OsString};
use std::path::{Path, PathBuf};

use crate::fs::{INodeType, InodeAddr, InodePerms, NodeAttr};

/// One directory of the shadow tree.
///
/// `path` always names a directory in the origin tier. Nodes are snapshots: nothing mutates a
/// `DirNode` after it is built.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DirNode {
    name: OsString,
    path: PathBuf,
    addr: InodeAddr,
}

impl DirNode {
    pub(crate) fn new(name: OsString, path: PathBuf, addr: InodeAddr) -> Self {
        Self { name, path, addr }
    }

    /// Leaf name of the directory. Empty for the root.
    #[must_use]
    pub fn name(&self) -> &OsStr {
        &self.name
    }

    /// Absolute path of the directory in the origin tier.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The identity assigned when this node was created.
    #[must_use]
    pub fn addr(&self) -> InodeAddr {
        self.addr
    }

    /// Projects the node onto the attributes the transport reports.
    #[must_use]
    pub fn attr(&self) -> NodeAttr {
        NodeAttr {
            addr: self.addr,
            itype: INodeType::Directory,
            perms: InodePerms::DIRECTORY,
            size: 0,
        }
    }
}

/// One resolved file of the shadow tree.
///
/// `size` is only ever set from a completed content read, and resolution does not hand out a
/// `FileNode` before that read.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FileNode {
    path: PathBuf,
    cached_path: Option<PathBuf>,
    addr: InodeAddr,
    size: u64,
}

impl FileNode {
    pub(crate) fn new(
        path: PathBuf,
        cached_path: Option<PathBuf>,
        addr: InodeAddr,
        size: u64,
    ) -> Self {
        Self {
            path,
            cached_path,
            addr,
            size,
        }
    }

    pub(crate) fn with_size(self, size: u64) -> Self {
        Self { size, ..self }
    }

    /// Absolute path of the file in the origin tier.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Cache-tier location, if the file was already cached when this node was resolved.
    #[must_use]
    pub fn cached_path(&self) -> Option<&Path> {
        self.cached_path.as_deref()
    }

    /// Whether reads prefer the cache tier.
    #[must_use]
    pub fn is_cached(&self) -> bool {
        self.cached_path.is_some()
    }

    /// The identity assigned when this node was created.
    #[must_use]
    pub fn addr(&self) -> InodeAddr {
        self.addr
    }

    /// Content length observed when the node was resolved.
    #[must_use]
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Projects the node onto the attributes the transport reports.
    #[must_use]
    pub fn attr(&self) -> NodeAttr {
        NodeAttr {
            addr: self.addr,
            itype: INodeType::File,
            perms: InodePerms::FILE,
            size: self.size,
        }
    }
}

/// Anything a lookup can resolve to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Node {
    /// A directory.
    Dir(DirNode),
    /// A regular file.
    File(FileNode),
}

impl Node {
    /// The identity of the wrapped node.
    #[must_use]
    pub fn addr(&self) -> InodeAddr {
        match self {
            Self::Dir(d) => d.addr(),
            Self::File(f) => f.addr(),
        }
    }

    /// Attributes of the wrapped node.
    #[must_use]
    pub fn attr(&self) -> NodeAttr {
        match self {
            Self::Dir(d) => d.attr(),
            Self::File(f) => f.attr(),
        }
    }

    /// Returns the directory, if this is one.
    #[must_use]
    pub fn as_dir(&self) -> Option<&DirNode> {
        match self {
            Self::Dir(d) => Some(d),
            Self::File(_) => None,
        }
    }

    /// Returns the file, if this is one.
    #[must_use]
    pub fn as_file(&self) -> Option<&FileNode> {
        match self {
            Self::Dir(_) => None,
            Self::File(f) => Some(f),
        }
    }
}

impl From<DirNode> for Node {
    fn from(dir: DirNode) -> Self {
        Self::Dir(dir)
    }
}

impl From<FileNode> for Node {
    fn from(file: FileNode) -> Self {
        Self::File(file)
    }
}
