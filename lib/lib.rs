//! tier-fs shared library.
//!
//! A read-only shadow of an origin directory tree which copies file contents into a flat cache
//! directory the first time they are read, and serves later reads from there.

/// Shadow filesystem nodes, resolution and the FUSE adapter.
pub mod fs;
pub mod io;
