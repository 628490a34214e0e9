//! Two-tier file resolution.
//!
//! A name is looked for in the cache tier first and the origin tier second. Whichever tier
//! answered decides whether the name is a file or a directory. Files are read in full before a
//! [`FileNode`] is handed out, and a file that came from the origin tier is copied into the cache
//! tier in the background.

use std::ffi::{OsStr, OsString};
use std::path::{Path, PathBuf};

use bytes::Bytes;
use thiserror::Error;
use tokio::io::AsyncWriteExt as _;
use tracing::{debug, error, trace};

use crate::fs::shadow::ShadowFs;
use crate::fs::tiers::Tiers;
use crate::fs::FileNode;

/// Mode of files written into the cache tier.
const CACHE_FILE_MODE: u32 = 0o664;

/// Reading the content of a file failed on every tier that was tried.
#[derive(Debug, Error)]
#[error("failed to read {}: {source}", .path.display())]
pub struct ReadError {
    /// The last path a read was attempted on.
    pub path: PathBuf,
    /// Why the read failed.
    #[source]
    pub source: std::io::Error,
}

impl From<ReadError> for i32 {
    /// The caller-facing protocol only distinguishes "exists" from "doesn't", so a file whose
    /// content cannot be fetched is reported as missing.
    fn from(_: ReadError) -> Self {
        libc::ENOENT
    }
}

/// Why a name could not be resolved to a file.
#[derive(Debug, Error)]
pub enum ResolveError {
    /// Neither tier has the name.
    #[error("no such file: {}", .0.display())]
    NotFound(PathBuf),

    /// The name exists but is a directory; the caller should build a directory node instead.
    #[error("dir cannot be read: {}", .0.display())]
    IsDirectory(PathBuf),

    /// The name exists but is neither a regular file nor a directory.
    #[error("not a regular file: {}", .0.display())]
    NotRegular(PathBuf),

    /// The origin tier could not be queried.
    #[error("unable to stat {}: {source}", .path.display())]
    Stat {
        /// The origin-tier path.
        path: PathBuf,
        /// The underlying failure.
        #[source]
        source: std::io::Error,
    },

    /// The entry was found but its content could not be read.
    #[error("error reading contents of file: {} : {:?}", .parent.display(), .name)]
    Read {
        /// Origin directory the file was looked up in.
        parent: PathBuf,
        /// Name that was looked up.
        name: OsString,
        /// The underlying failure.
        #[source]
        source: ReadError,
    },
}

impl ResolveError {
    fn from_stat(path: PathBuf, source: std::io::Error) -> Self {
        if source.kind() == std::io::ErrorKind::NotFound {
            Self::NotFound(path)
        } else {
            Self::Stat { path, source }
        }
    }
}

impl ShadowFs {
    /// Resolves `name` inside the origin directory `parent` to a file node.
    ///
    /// The returned node already knows its size. If the content came from the origin tier, a copy
    /// into the cache tier is started and not waited for.
    ///
    /// # Errors
    ///
    /// [`ResolveError::IsDirectory`] when the name is a directory, [`ResolveError::NotFound`] when
    /// neither tier has it, and the other variants for genuine I/O failures.
    pub async fn resolve_file(&self, parent: &Path, name: &OsStr) -> Result<FileNode, ResolveError> {
        let origin_path = Tiers::origin_path(parent, name);
        let cache_path = self.tiers().cache_path(name);
        let addr = self.next_addr();

        let (meta, cached_path) = match tokio::fs::metadata(&cache_path).await {
            Ok(meta) => (meta, Some(cache_path.clone())),
            Err(e) => {
                if e.kind() != std::io::ErrorKind::NotFound {
                    error!(path = ?cache_path, error = %e, "unable to stat cache-tier location");
                }
                let meta = tokio::fs::metadata(&origin_path)
                    .await
                    .map_err(|source| ResolveError::from_stat(origin_path.clone(), source))?;
                (meta, None)
            }
        };

        if meta.is_dir() {
            return Err(ResolveError::IsDirectory(origin_path));
        }
        if !meta.is_file() {
            return Err(ResolveError::NotRegular(origin_path));
        }

        let was_cached = cached_path.is_some();
        let pending = FileNode::new(origin_path, cached_path, addr, 0);
        let content = self
            .read_all(&pending)
            .await
            .map_err(|source| ResolveError::Read {
                parent: parent.to_path_buf(),
                name: name.to_os_string(),
                source,
            })?;
        let file = pending.with_size(content.len() as u64);

        if !was_cached {
            self.spawn_populate(cache_path, content);
        }

        Ok(file)
    }

    /// Reads the full content of `file`, preferring the cache tier.
    ///
    /// A failed cache-tier read falls back to the origin tier. Origin-tier reads are delayed by the
    /// configured cold-read policy.
    ///
    /// # Errors
    ///
    /// Returns the origin-tier failure when the origin read fails.
    pub async fn read_all(&self, file: &FileNode) -> Result<Bytes, ReadError> {
        if let Some(cached) = file.cached_path() {
            match tokio::fs::read(cached).await {
                Ok(data) => {
                    debug!(path = ?cached, "read from cache tier");
                    return Ok(Bytes::from(data));
                }
                Err(e) => {
                    error!(path = ?cached, error = %e, "error reading from cache tier");
                }
            }
        }

        let penalty = self.cold_read_penalty();
        if !penalty.is_zero() {
            trace!(?penalty, "delaying origin-tier read");
            tokio::time::sleep(penalty).await;
        }

        debug!(path = ?file.path(), "read from origin tier");
        tokio::fs::read(file.path())
            .await
            .map(Bytes::from)
            .map_err(|source| ReadError {
                path: file.path().to_path_buf(),
                source,
            })
    }

    /// Copies `content` into the cache tier at `cache_path` without blocking the caller.
    ///
    /// Failures are logged and dropped; a later resolution simply finds the cache tier empty.
    fn spawn_populate(&self, cache_path: PathBuf, content: Bytes) {
        let staging_path = self.tiers().staging_path(self.next_staging_seq());
        tokio::spawn(async move {
            match write_then_rename(&staging_path, &cache_path, &content).await {
                Ok(()) => {
                    debug!(path = ?cache_path, bytes = content.len(), "populated cache tier");
                }
                Err(e) => {
                    error!(path = ?cache_path, error = %e, "error writing file to cache");
                    if let Err(e) = tokio::fs::remove_file(&staging_path).await
                        && e.kind() != std::io::ErrorKind::NotFound
                    {
                        error!(path = ?staging_path, error = %e, "error removing staged cache file");
                    }
                }
            }
        });
    }
}

/// Writes `content` to `staging` and renames it over `dest`, so readers of `dest` only ever see a
/// complete file.
async fn write_then_rename(staging: &Path, dest: &Path, content: &[u8]) -> std::io::Result<()> {
    let mut file = tokio::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .mode(CACHE_FILE_MODE)
        .open(staging)
        .await?;
    file.write_all(content).await?;
    file.flush().await?;
    drop(file);
    tokio::fs::rename(staging, dest).await
}
