#![allow(clippy::unwrap_used, clippy::expect_used, missing_docs)]

mod common;

use std::ffi::OsStr;

use tier_fs::fs::resolve::ResolveError;
use tier_fs::fs::shadow::LookupError;
use tier_fs::fs::{INodeType, Node};

use common::{Fixture, wait_for_cached};

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn cold_then_warm_read_of_nested_file() {
    let fx = Fixture::new();
    fx.write_origin("a/b.txt", b"hello");

    let a = fx.lookup_dir(&["a"]).await;
    assert_eq!(a.name(), "a");
    assert_eq!(a.path(), fx.origin.path().join("a"));

    let file = match fx.fs.lookup(&a, OsStr::new("b.txt")).await.unwrap() {
        Node::File(file) => file,
        Node::Dir(dir) => panic!("expected a file, got {dir:?}"),
    };
    assert_eq!(file.size(), 5, "size should be known as soon as the node exists");
    assert!(!file.is_cached(), "nothing was cached yet");
    assert_eq!(fx.penalty.origin_reads(), 1, "resolution reads the origin once");

    assert_eq!(&fx.fs.read_all(&file).await.unwrap()[..], b"hello");

    wait_for_cached(&fx.cache_file("b.txt"), b"hello").await;

    let warm = fx.lookup_file(&["a", "b.txt"]).await;
    assert!(warm.is_cached(), "second resolution should find the cache tier");
    assert_eq!(warm.cached_path(), Some(fx.cache_file("b.txt").as_path()));
    assert_ne!(warm.addr(), file.addr(), "each lookup mints a new identity");

    let reads_before = fx.penalty.origin_reads();
    assert_eq!(&fx.fs.read_all(&warm).await.unwrap()[..], b"hello");
    assert_eq!(
        fx.penalty.origin_reads(),
        reads_before,
        "a warm read should not touch the origin tier"
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn already_returned_node_keeps_reading_origin() {
    let fx = Fixture::new();
    fx.write_origin("f.txt", b"data");

    let file = fx.lookup_file(&["f.txt"]).await;
    wait_for_cached(&fx.cache_file("f.txt"), b"data").await;

    let reads_before = fx.penalty.origin_reads();
    assert_eq!(&fx.fs.read_all(&file).await.unwrap()[..], b"data");
    assert_eq!(
        fx.penalty.origin_reads(),
        reads_before + 1,
        "population must not patch nodes that were already handed out"
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn attr_of_resolved_file_is_read_only_with_size() {
    let fx = Fixture::new();
    fx.write_origin("f.bin", &[0u8; 1234]);

    let file = fx.lookup_file(&["f.bin"]).await;
    let attr = file.attr();
    assert_eq!(attr.addr, file.addr());
    assert_eq!(attr.itype, INodeType::File);
    assert_eq!(attr.size, 1234);
    assert_eq!(attr.perms.bits(), 0o444);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn missing_name_is_not_found() {
    let fx = Fixture::new();
    fx.mkdir_origin("a");

    let err = fx.lookup_path(&["a", "nope.txt"]).await.unwrap_err();
    assert!(
        matches!(err, LookupError::NotFound(_)),
        "expected NotFound, got {err:?}"
    );
    assert_eq!(i32::from(err), libc::ENOENT);
    assert_eq!(fx.penalty.origin_reads(), 0, "nothing should have been read");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn resolve_signals_directories() {
    let fx = Fixture::new();
    fx.mkdir_origin("sub");

    let err = fx
        .fs
        .resolve_file(fx.origin.path(), OsStr::new("sub"))
        .await
        .unwrap_err();
    assert!(matches!(err, ResolveError::IsDirectory(p) if p == fx.origin.path().join("sub")));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn resolve_signals_missing_names() {
    let fx = Fixture::new();

    let err = fx
        .fs
        .resolve_file(fx.origin.path(), OsStr::new("ghost"))
        .await
        .unwrap_err();
    assert!(matches!(err, ResolveError::NotFound(_)), "got {err:?}");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn lookup_of_directory_builds_directory_node() {
    let fx = Fixture::new();
    fx.mkdir_origin("a/b");

    let b = fx.lookup_dir(&["a", "b"]).await;
    assert_eq!(b.name(), "b");
    assert_eq!(b.path(), fx.origin.path().join("a").join("b"));
    assert_eq!(b.attr().itype, INodeType::Directory);
    assert_eq!(b.attr().perms.bits(), 0o555);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn vanished_cache_file_falls_back_to_origin() {
    let fx = Fixture::new();
    fx.write_origin("f.txt", b"origin");

    fx.lookup_file(&["f.txt"]).await;
    wait_for_cached(&fx.cache_file("f.txt"), b"origin").await;

    let warm = fx.lookup_file(&["f.txt"]).await;
    assert!(warm.is_cached());
    std::fs::remove_file(fx.cache_file("f.txt")).unwrap();

    let reads_before = fx.penalty.origin_reads();
    assert_eq!(&fx.fs.read_all(&warm).await.unwrap()[..], b"origin");
    assert_eq!(fx.penalty.origin_reads(), reads_before + 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn unreadable_file_is_reported_missing() {
    let fx = Fixture::new();
    let path = fx.write_origin("f.txt", b"data");

    let file = fx.lookup_file(&["f.txt"]).await;
    std::fs::remove_file(&path).unwrap();

    let err = fx.fs.read_all(&file).await.unwrap_err();
    assert_eq!(err.path, path);
    assert_eq!(i32::from(err), libc::ENOENT);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn failed_population_does_not_fail_the_read() {
    let fx = Fixture::new();
    fx.write_origin("f.txt", b"still fine");
    // Nothing can be written into a cache root that does not exist.
    std::fs::remove_dir(fx.cache.path()).unwrap();

    let file = fx.lookup_file(&["f.txt"]).await;
    assert_eq!(file.size(), 10);
    assert_eq!(&fx.fs.read_all(&file).await.unwrap()[..], b"still fine");

    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    let again = fx.lookup_file(&["f.txt"]).await;
    assert!(!again.is_cached(), "population should have failed quietly");
    std::fs::create_dir(fx.cache.path()).unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn population_leaves_no_staging_files() {
    let fx = Fixture::new();
    fx.write_origin("a.txt", b"a");
    fx.write_origin("b.txt", b"b");

    fx.lookup_file(&["a.txt"]).await;
    fx.lookup_file(&["b.txt"]).await;
    wait_for_cached(&fx.cache_file("a.txt"), b"a").await;
    wait_for_cached(&fx.cache_file("b.txt"), b"b").await;

    let mut names: Vec<_> = std::fs::read_dir(fx.cache.path())
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    assert_eq!(names, ["a.txt", "b.txt"]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn name_at_the_length_limit_still_populates() {
    let fx = Fixture::new();
    let name = "n".repeat(250);
    fx.write_origin(&name, b"long");

    let cold = fx.lookup_file(&[name.as_str()]).await;
    assert!(!cold.is_cached());
    wait_for_cached(&fx.cache_file(&name), b"long").await;

    let warm = fx.lookup_file(&[name.as_str()]).await;
    assert!(warm.is_cached(), "a legal 250-byte name should reach the cache tier");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn unusable_cache_tier_falls_back_to_origin() {
    let fx = Fixture::new();
    fx.write_origin("f.txt", b"origin");
    // Stats below a regular file fail with ENOTDIR rather than ENOENT.
    std::fs::remove_dir(fx.cache.path()).unwrap();
    std::fs::write(fx.cache.path(), b"not a directory").unwrap();

    let file = fx.lookup_file(&["f.txt"]).await;
    assert!(!file.is_cached());
    assert_eq!(file.size(), 6);
    assert_eq!(fx.penalty.origin_reads(), 1, "content should come from the origin tier");
    assert_eq!(&fx.fs.read_all(&file).await.unwrap()[..], b"origin");

    std::fs::remove_file(fx.cache.path()).unwrap();
    std::fs::create_dir(fx.cache.path()).unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn cached_directory_over_origin_file_is_not_a_directory() {
    let fx = Fixture::new();
    fx.write_origin("clash", b"file in origin");
    std::fs::create_dir(fx.cache_file("clash")).unwrap();

    let err = fx.lookup_path(&["clash"]).await.unwrap_err();
    assert!(
        matches!(err, LookupError::NotADirectory(ref p) if *p == fx.origin.path().join("clash")),
        "got {err:?}"
    );
    assert_eq!(i32::from(err), libc::EIO);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn cached_directory_missing_from_origin_fails_its_stat() {
    let fx = Fixture::new();
    std::fs::create_dir(fx.cache_file("ghost")).unwrap();

    let err = fx.lookup_path(&["ghost"]).await.unwrap_err();
    assert!(matches!(err, LookupError::Stat { .. }), "got {err:?}");
    assert_eq!(i32::from(err), libc::ENOENT);
}
