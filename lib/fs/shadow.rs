//! The entry points a transport drives: root, lookup, listing and reads.

use std::ffi::{OsStr, OsString};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, error, instrument, warn};

use crate::fs::dindex::ChildDirIndex;
use crate::fs::ident::IdentityAllocator;
use crate::fs::latency::{ColdReadPolicy, FixedPenalty};
use crate::fs::resolve::ResolveError;
use crate::fs::tiers::Tiers;
use crate::fs::{DirEntry, DirNode, INodeType, InodeAddr, Node};

/// Why a lookup produced no node.
#[derive(Debug, Error)]
pub enum LookupError {
    /// The name does not exist, or could not be fetched.
    #[error("no such entry: {}", .0.display())]
    NotFound(PathBuf),

    /// The name looked like a directory but could not be stat-ed as one.
    #[error("error stating dir: {} : {source}", .path.display())]
    Stat {
        /// The origin-tier path.
        path: PathBuf,
        /// The underlying failure.
        #[source]
        source: std::io::Error,
    },

    /// The name looked like a directory but the origin tier disagrees.
    #[error("was expecting a dir and didn't get one: {}", .0.display())]
    NotADirectory(PathBuf),
}

impl From<LookupError> for i32 {
    fn from(e: LookupError) -> Self {
        match e {
            LookupError::NotFound(_) => libc::ENOENT,
            LookupError::Stat { ref source, .. } => source.raw_os_error().unwrap_or(libc::EIO),
            LookupError::NotADirectory(_) => libc::EIO,
        }
    }
}

/// The origin directory itself could not be listed.
#[derive(Debug, Error)]
#[error("failed to read path dir: {} : {source}", .path.display())]
pub struct ReadDirError {
    /// The directory being listed.
    pub path: PathBuf,
    /// The underlying failure.
    #[source]
    pub source: std::io::Error,
}

impl From<ReadDirError> for i32 {
    fn from(e: ReadDirError) -> Self {
        e.source.raw_os_error().unwrap_or(libc::EIO)
    }
}

struct Inner {
    tiers: Tiers,
    ident: IdentityAllocator,
    index: ChildDirIndex,
    policy: Box<dyn ColdReadPolicy>,
    staging_seq: AtomicU64,
}

/// A read-only shadow of an origin tree with a flat cache tier.
///
/// Cloning is cheap; clones share the identity allocator, the child-directory index and the
/// tiers.
#[derive(Clone)]
pub struct ShadowFs {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for ShadowFs {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShadowFs")
            .field("tiers", &self.inner.tiers)
            .field("indexed_dirs", &self.inner.index.len())
            .finish_non_exhaustive()
    }
}

impl ShadowFs {
    /// Creates a shadow of `tiers` with the default half-second cold-read penalty.
    #[must_use]
    pub fn new(tiers: Tiers) -> Self {
        Self::with_policy(tiers, FixedPenalty::DEFAULT)
    }

    /// Creates a shadow of `tiers` whose origin-tier reads are delayed by `policy`.
    #[must_use]
    pub fn with_policy(tiers: Tiers, policy: impl ColdReadPolicy) -> Self {
        Self {
            inner: Arc::new(Inner {
                tiers,
                ident: IdentityAllocator::new(),
                index: ChildDirIndex::new(),
                policy: Box::new(policy),
                staging_seq: AtomicU64::new(0),
            }),
        }
    }

    /// Where the two tiers live.
    #[must_use]
    pub fn tiers(&self) -> &Tiers {
        &self.inner.tiers
    }

    /// The child-directory index shared by every lookup and listing.
    #[must_use]
    pub fn index(&self) -> &ChildDirIndex {
        &self.inner.index
    }

    pub(crate) fn next_addr(&self) -> InodeAddr {
        self.inner.ident.next()
    }

    pub(crate) fn next_staging_seq(&self) -> u64 {
        self.inner.staging_seq.fetch_add(1, Ordering::Relaxed)
    }

    pub(crate) fn cold_read_penalty(&self) -> Duration {
        self.inner.policy.penalty()
    }

    /// A fresh directory node bound to the origin tree root.
    #[must_use]
    pub fn root(&self) -> DirNode {
        DirNode::new(
            OsString::new(),
            self.inner.tiers.origin_root().to_path_buf(),
            self.next_addr(),
        )
    }

    /// Resolves `name` inside `dir`.
    ///
    /// Directories recorded by the last listing of `dir` are returned without touching either
    /// tier. Everything else goes through [`ShadowFs::resolve_file`].
    ///
    /// # Errors
    ///
    /// [`LookupError::NotFound`] for missing names and for files whose resolution failed for any
    /// other reason. The other variants when a name that resolved as a directory cannot be
    /// confirmed as one.
    #[instrument(name = "ShadowFs::lookup", skip(self, dir), fields(parent = ?dir.path()))]
    pub async fn lookup(&self, dir: &DirNode, name: &OsStr) -> Result<Node, LookupError> {
        if let Some(child) = self.inner.index.find(dir.path(), name) {
            debug!(addr = child.addr(), "child directory index hit");
            return Ok(Node::Dir(child));
        }

        match self.resolve_file(dir.path(), name).await {
            Ok(file) => Ok(Node::File(file)),
            Err(ResolveError::IsDirectory(path)) => self.dir_node(path, name).await.map(Node::Dir),
            Err(ResolveError::NotFound(path)) => Err(LookupError::NotFound(path)),
            Err(e) => {
                error!(error = %e, "resolution failed, reporting entry as missing");
                Err(LookupError::NotFound(Tiers::origin_path(dir.path(), name)))
            }
        }
    }

    async fn dir_node(&self, path: PathBuf, name: &OsStr) -> Result<DirNode, LookupError> {
        let meta = match tokio::fs::metadata(&path).await {
            Ok(meta) => meta,
            Err(source) => return Err(LookupError::Stat { path, source }),
        };
        if !meta.is_dir() {
            return Err(LookupError::NotADirectory(path));
        }
        Ok(DirNode::new(name.to_os_string(), path, self.next_addr()))
    }

    /// Lists `dir` straight from the origin tier and refreshes its child-directory index entry.
    ///
    /// Entries that cannot be stat-ed are skipped. Every entry gets an identity of its own, and
    /// every child directory additionally gets a separate identity for its index record.
    ///
    /// # Errors
    ///
    /// Fails only when the directory itself cannot be read. The index is left untouched then.
    #[instrument(name = "ShadowFs::read_dir_all", skip(self, dir), fields(path = ?dir.path()))]
    pub async fn read_dir_all(&self, dir: &DirNode) -> Result<Vec<DirEntry>, ReadDirError> {
        let to_err = |source| ReadDirError {
            path: dir.path().to_path_buf(),
            source,
        };
        let mut read_dir = tokio::fs::read_dir(dir.path()).await.map_err(to_err)?;

        let expected_dirs = self
            .inner
            .index
            .children(dir.path())
            .map_or(0, |c| c.len());
        let mut children = Vec::with_capacity(expected_dirs);
        let mut entries = Vec::new();

        while let Some(dir_entry) = read_dir.next_entry().await.map_err(to_err)? {
            let full_path = dir_entry.path();
            let meta = match tokio::fs::metadata(&full_path).await {
                Ok(meta) => meta,
                Err(e) => {
                    warn!(path = ?full_path, error = %e, "error stating entry, skipping");
                    continue;
                }
            };

            let name = dir_entry.file_name();
            let addr = self.next_addr();
            let itype = if meta.is_dir() {
                children.push(DirNode::new(name.clone(), full_path, self.next_addr()));
                INodeType::Directory
            } else {
                INodeType::File
            };
            entries.push(DirEntry { addr, name, itype });
        }

        debug!(
            entries = entries.len(),
            dirs = children.len(),
            "refreshing child directory index"
        );
        self.inner.index.replace(dir.path().to_path_buf(), children);
        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_maps_to_enoent() {
        let errno: i32 = LookupError::NotFound(PathBuf::from("/o/x")).into();
        assert_eq!(errno, libc::ENOENT);
    }

    #[test]
    fn not_a_directory_maps_to_eio() {
        let errno: i32 = LookupError::NotADirectory(PathBuf::from("/o/x")).into();
        assert_eq!(errno, libc::EIO);
    }

    #[test]
    fn stat_failure_keeps_os_errno() {
        let errno: i32 = LookupError::Stat {
            path: PathBuf::from("/o/x"),
            source: std::io::Error::from_raw_os_error(libc::EACCES),
        }
        .into();
        assert_eq!(errno, libc::EACCES);
    }

    #[test]
    fn listing_failure_without_os_errno_maps_to_eio() {
        let errno: i32 = ReadDirError {
            path: PathBuf::from("/o"),
            source: std::io::Error::other("boom"),
        }
        .into();
        assert_eq!(errno, libc::EIO);
    }

    #[test]
    fn root_gets_a_fresh_identity_each_time() {
        let fs = ShadowFs::new(Tiers::new("/o", "/c"));
        let a = fs.root();
        let b = fs.root();
        assert_eq!(a.path(), b.path());
        assert!(a.name().is_empty());
        assert!(b.addr() > a.addr());
    }
}
