#![allow(dead_code, missing_docs, clippy::unwrap_used)]

use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use tempfile::TempDir;
use tier_fs::fs::latency::ColdReadPolicy;
use tier_fs::fs::shadow::LookupError;
use tier_fs::fs::tiers::Tiers;
use tier_fs::fs::{DirNode, FileNode, Node, ShadowFs};

/// A cold-read policy that records every origin-tier read it is consulted for.
#[derive(Clone, Default)]
pub struct CountingPenalty {
    calls: Arc<AtomicUsize>,
    delay: Duration,
}

impl CountingPenalty {
    pub fn with_delay(delay: Duration) -> Self {
        Self {
            calls: Arc::default(),
            delay,
        }
    }

    /// Number of origin-tier reads so far.
    pub fn origin_reads(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl ColdReadPolicy for CountingPenalty {
    fn penalty(&self) -> Duration {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.delay
    }
}

/// An origin tree and an empty cache tier in temporary directories.
pub struct Fixture {
    pub origin: TempDir,
    pub cache: TempDir,
    pub penalty: CountingPenalty,
    pub fs: ShadowFs,
}

impl Fixture {
    pub fn new() -> Self {
        Self::with_penalty(CountingPenalty::default())
    }

    pub fn with_penalty(penalty: CountingPenalty) -> Self {
        let origin = tempfile::tempdir().unwrap();
        let cache = tempfile::tempdir().unwrap();
        let fs = ShadowFs::with_policy(Tiers::new(origin.path(), cache.path()), penalty.clone());
        Self {
            origin,
            cache,
            penalty,
            fs,
        }
    }

    /// Writes `content` at `rel` inside the origin tree, creating parent directories.
    pub fn write_origin(&self, rel: &str, content: &[u8]) -> PathBuf {
        let path = self.origin.path().join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, content).unwrap();
        path
    }

    /// Creates the directory `rel` inside the origin tree.
    pub fn mkdir_origin(&self, rel: &str) -> PathBuf {
        let path = self.origin.path().join(rel);
        std::fs::create_dir_all(&path).unwrap();
        path
    }

    pub fn cache_file(&self, name: &str) -> PathBuf {
        self.cache.path().join(name)
    }

    /// Walks `components` from a fresh root, expecting directories on the way.
    pub async fn lookup_path(&self, components: &[&str]) -> Result<Node, LookupError> {
        let mut node = Node::Dir(self.fs.root());
        for component in components {
            let dir = node.as_dir().unwrap().clone();
            node = self.fs.lookup(&dir, OsStr::new(component)).await?;
        }
        Ok(node)
    }

    pub async fn lookup_dir(&self, components: &[&str]) -> DirNode {
        match self.lookup_path(components).await.unwrap() {
            Node::Dir(dir) => dir,
            Node::File(file) => panic!("expected a directory, got {file:?}"),
        }
    }

    pub async fn lookup_file(&self, components: &[&str]) -> FileNode {
        match self.lookup_path(components).await.unwrap() {
            Node::File(file) => file,
            Node::Dir(dir) => panic!("expected a file, got {dir:?}"),
        }
    }
}

/// Polls the cache tier until `path` holds exactly `expected`, or panics after two seconds.
pub async fn wait_for_cached(path: &Path, expected: &[u8]) {
    for _ in 0..400 {
        if let Ok(content) = tokio::fs::read(path).await
            && content == expected
        {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!(
        "cache population of {} did not land within 2 seconds",
        path.display()
    );
}

/// Names in a directory listing, sorted.
pub fn sorted_names(entries: &[tier_fs::fs::DirEntry]) -> Vec<String> {
    let mut names: Vec<String> = entries
        .iter()
        .map(|e| e.name.to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}
