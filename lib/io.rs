//! Filesystem helpers used while bringing the mount up.

use std::path::Path;

/// Make sure `path` exists as an empty directory.
///
/// Anything already inside it is removed. Symlinks are removed themselves, never followed. A
/// missing directory is created along with its parents. A path which exists but is not a
/// directory is an error.
pub async fn reset_dir(path: &Path) -> std::io::Result<()> {
    let mut entries = match tokio::fs::read_dir(path).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return tokio::fs::create_dir_all(path).await;
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotADirectory => {
            return Err(std::io::Error::new(
                std::io::ErrorKind::AlreadyExists,
                format!("'{}' exists and is not a directory", path.display()),
            ));
        }
        Err(e) => return Err(e),
    };

    while let Some(entry) = entries.next_entry().await? {
        if entry.file_type().await?.is_dir() {
            tokio::fs::remove_dir_all(entry.path()).await?;
        } else {
            tokio::fs::remove_file(entry.path()).await?;
        }
    }
    Ok(())
}
