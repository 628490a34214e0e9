//! Shadow filesystem: a read-only view of an origin tree backed by a flat cache tier.
/// Per-directory index of known child directories.
pub mod dindex;
/// FUSE adapter: maps [`::fuser::Filesystem`] callbacks to [`shadow::ShadowFs`].
pub mod fuser;
/// Process-wide inode number allocation.
pub mod ident;
/// Artificial latency applied to origin-tier reads.
pub mod latency;
/// Directory and file nodes.
pub mod node;
/// Two-tier file resolution and cache population.
pub mod resolve;
/// The transport-facing entry points.
pub mod shadow;
/// Origin and cache tier locations.
pub mod tiers;

pub use node::{DirNode, FileNode, Node};
pub use shadow::ShadowFs;

use std::ffi::OsString;

use bitflags::bitflags;

/// Type representing an inode identifier.
pub type InodeAddr = u64;

/// Type representing a file handle.
pub type FileHandle = u64;

bitflags! {
    /// Permission bits for an inode, similar to Unix file permissions.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct InodePerms: u16 {
        /// Other: execute permission.
        const OTHER_EXECUTE = 1 << 0;
        /// Other: write permission.
        const OTHER_WRITE   = 1 << 1;
        /// Other: read permission.
        const OTHER_READ    = 1 << 2;

        /// Group: execute permission.
        const GROUP_EXECUTE = 1 << 3;
        /// Group: write permission.
        const GROUP_WRITE   = 1 << 4;
        /// Group: read permission.
        const GROUP_READ    = 1 << 5;

        /// Owner: execute permission.
        const OWNER_EXECUTE = 1 << 6;
        /// Owner: write permission.
        const OWNER_WRITE   = 1 << 7;
        /// Owner: read permission.
        const OWNER_READ    = 1 << 8;

        /// Read for everyone (`0o444`).
        const ALL_READ = Self::OWNER_READ.bits()
            | Self::GROUP_READ.bits()
            | Self::OTHER_READ.bits();
        /// Read and traverse for everyone (`0o555`).
        const ALL_READ_EXECUTE = Self::ALL_READ.bits()
            | Self::OWNER_EXECUTE.bits()
            | Self::GROUP_EXECUTE.bits()
            | Self::OTHER_EXECUTE.bits();
    }
}

impl InodePerms {
    /// Mode every directory in the shadow tree is exposed with.
    pub const DIRECTORY: Self = Self::ALL_READ_EXECUTE;
    /// Mode every file in the shadow tree is exposed with.
    pub const FILE: Self = Self::ALL_READ;
}

/// The type of an inode entry in the filesystem.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum INodeType {
    /// A regular file.
    File,
    /// A directory.
    Directory,
}

/// What `Attr` reports for a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeAttr {
    /// The identity of the node.
    pub addr: InodeAddr,
    /// File or directory.
    pub itype: INodeType,
    /// Fixed read-only permissions.
    pub perms: InodePerms,
    /// Content length in bytes. Always zero for directories.
    pub size: u64,
}

/// A directory entry yielded by [`ShadowFs::read_dir_all`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DirEntry {
    /// Identity minted for this listing only.
    pub addr: InodeAddr,
    /// The name of this entry within its parent directory.
    pub name: OsString,
    /// File or directory.
    pub itype: INodeType,
}
