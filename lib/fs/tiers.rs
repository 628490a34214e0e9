use std::ffi::OsStr;
use std::path::{Path, PathBuf};

/// Where the two storage tiers live.
///
/// The cache tier is flat: a file is cached under its leaf name only, so two origin files with the
/// same name in different directories share one cache entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tiers {
    origin_root: PathBuf,
    cache_root: PathBuf,
}

impl Tiers {
    /// Binds the origin tree root and the cache directory.
    pub fn new(origin_root: impl Into<PathBuf>, cache_root: impl Into<PathBuf>) -> Self {
        Self {
            origin_root: origin_root.into(),
            cache_root: cache_root.into(),
        }
    }

    /// Root of the authoritative tree.
    #[must_use]
    pub fn origin_root(&self) -> &Path {
        &self.origin_root
    }

    /// Root of the flat cache directory.
    #[must_use]
    pub fn cache_root(&self) -> &Path {
        &self.cache_root
    }

    /// Origin-tier path of `name` inside the origin directory `parent`.
    #[must_use]
    pub fn origin_path(parent: &Path, name: &OsStr) -> PathBuf {
        parent.join(name)
    }

    /// Cache-tier path for a file called `name`, wherever it lives in the origin tree.
    #[must_use]
    pub fn cache_path(&self, name: &OsStr) -> PathBuf {
        self.cache_root.join(name)
    }

    /// Hidden scratch path in the cache root used while cache entry number `seq` is written.
    ///
    /// Never embeds the leaf name, so the staging name stays short whatever is being cached.
    #[must_use]
    pub fn staging_path(&self, seq: u64) -> PathBuf {
        self.cache_root.join(format!(".tier-fs.{seq}.partial"))
    }
}
