use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::fs::DirNode;

/// Known child directories of every directory that has been listed.
///
/// Each listing replaces a directory's whole child set in one upsert, so a concurrent reader sees
/// either the previous set or the new one. Entries are never pruned: a directory that is never
/// listed again keeps whatever children it had the last time it was.
#[derive(Debug, Default)]
pub struct ChildDirIndex {
    dirs: scc::HashMap<PathBuf, Arc<[DirNode]>>,
}

impl ChildDirIndex {
    /// Creates an empty index.
    #[must_use]
    pub fn new() -> Self {
        Self {
            dirs: scc::HashMap::new(),
        }
    }

    /// Finds the child directory called `name` under `parent`, as of the last listing.
    #[must_use]
    pub fn find(&self, parent: &Path, name: &OsStr) -> Option<DirNode> {
        let children = self.dirs.read_sync(parent, |_, v| Arc::clone(v))?;
        children.iter().find(|d| d.name() == name).cloned()
    }

    /// All known child directories of `parent`, in the order the listing produced them.
    #[must_use]
    pub fn children(&self, parent: &Path) -> Option<Arc<[DirNode]>> {
        self.dirs.read_sync(parent, |_, v| Arc::clone(v))
    }

    /// Discards whatever was recorded for `parent` and records `children` instead.
    pub fn replace(&self, parent: PathBuf, children: Vec<DirNode>) {
        self.dirs.upsert_sync(parent, Arc::from(children));
    }

    /// Number of directories with a recorded child set.
    #[must_use]
    pub fn len(&self) -> usize {
        self.dirs.len()
    }

    /// Whether no directory has been listed yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.dirs.is_empty()
    }
}
