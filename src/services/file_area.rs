//! Staging and durable filesystem roots.
//!
//! The capture front end writes into staging during recording; finalization
//! promotes data into the durable root. Blocking directory walks run on the
//! blocking pool so they never stall the async scheduler.

use std::{
    fs as std_fs,
    io::{self, ErrorKind},
    path::{Path, PathBuf},
};
use tokio::fs;
use tracing::debug;

#[derive(Clone, Debug)]
pub struct FileArea {
    staging_root: PathBuf,
    durable_root: PathBuf,
}

impl FileArea {
    pub fn new(staging_root: impl Into<PathBuf>, durable_root: impl Into<PathBuf>) -> Self {
        Self {
            staging_root: staging_root.into(),
            durable_root: durable_root.into(),
        }
    }

    pub fn staging_root(&self) -> &Path {
        &self.staging_root
    }

    pub fn durable_root(&self) -> &Path {
        &self.durable_root
    }

    /// Absolute staging path for a relative capture path.
    pub fn staging(&self, relative: &str) -> PathBuf {
        self.staging_root.join(relative)
    }

    /// Absolute durable path for a relative capture path.
    pub fn durable(&self, relative: &str) -> PathBuf {
        self.durable_root.join(relative)
    }

    /// Create both roots if they do not exist yet.
    pub async fn ensure_roots(&self) -> io::Result<()> {
        fs::create_dir_all(&self.staging_root).await?;
        fs::create_dir_all(&self.durable_root).await?;
        Ok(())
    }

    /// Move the contents of `src` into `dst`, merging with whatever is
    /// already there. Directories present on both sides are merged, files
    /// are replaced. A missing `src` means the move already happened.
    pub async fn move_directory(&self, src: &Path, dst: &Path) -> io::Result<()> {
        let src = src.to_path_buf();
        let dst = dst.to_path_buf();
        run_blocking(move || move_directory_sync(&src, &dst)).await
    }

    /// Recursively delete `path`. Deleting a missing path succeeds.
    pub async fn delete_recursive(&self, path: &Path) -> io::Result<()> {
        match fs::remove_dir_all(path).await {
            Ok(()) => {
                debug!("removed directory {}", path.display());
                Ok(())
            }
            Err(err) if err.kind() == ErrorKind::NotFound => {
                debug!("directory {} already missing", path.display());
                Ok(())
            }
            Err(err) => Err(err),
        }
    }

    /// Direct children of `path`; a missing directory has none.
    pub async fn list_children(&self, path: &Path) -> io::Result<Vec<PathBuf>> {
        let mut entries = match fs::read_dir(path).await {
            Ok(entries) => entries,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err),
        };

        let mut children = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            children.push(entry.path());
        }
        children.sort();
        Ok(children)
    }

    /// Remove `dir` if it is empty. Returns whether it was removed.
    pub async fn remove_if_empty(&self, dir: &Path) -> io::Result<bool> {
        if !self.list_children(dir).await?.is_empty() {
            return Ok(false);
        }
        match fs::remove_dir(dir).await {
            Ok(()) => Ok(true),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(false),
            Err(err) if err.kind() == ErrorKind::DirectoryNotEmpty => Ok(false),
            Err(err) => Err(err),
        }
    }
}

/// Run blocking filesystem work on the blocking pool.
async fn run_blocking<T, F>(work: F) -> io::Result<T>
where
    F: FnOnce() -> io::Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| io::Error::other(format!("spawn_blocking failed: {e}")))?
}

fn move_directory_sync(src: &Path, dst: &Path) -> io::Result<()> {
    let entries = match std_fs::read_dir(src) {
        Ok(entries) => entries,
        Err(err) if err.kind() == ErrorKind::NotFound => {
            debug!("move source {} missing, nothing to do", src.display());
            return Ok(());
        }
        Err(err) => return Err(err),
    };
    std_fs::create_dir_all(dst)?;

    for entry in entries {
        let entry = entry?;
        let from = entry.path();
        let to = dst.join(entry.file_name());
        let is_dir = entry.file_type()?.is_dir();

        match std_fs::symlink_metadata(&to) {
            Ok(existing) if is_dir && existing.is_dir() => {
                move_directory_sync(&from, &to)?;
                continue;
            }
            Ok(existing) if existing.is_dir() => std_fs::remove_dir_all(&to)?,
            Ok(_) => std_fs::remove_file(&to)?,
            Err(err) if err.kind() == ErrorKind::NotFound => {}
            Err(err) => return Err(err),
        }
        std_fs::rename(&from, &to)?;
    }

    std_fs::remove_dir(src)?;
    debug!("moved {} into {}", src.display(), dst.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn area(tmp: &TempDir) -> FileArea {
        FileArea::new(tmp.path().join("staging"), tmp.path().join("durable"))
    }

    #[tokio::test]
    async fn move_merges_into_existing_destination() {
        let tmp = TempDir::new().unwrap();
        let area = area(&tmp);
        area.ensure_roots().await.unwrap();

        let src = area.staging("p-1/cap-1");
        let dst = area.durable("p-1/cap-1");
        std_fs::create_dir_all(src.join("CAMERA")).unwrap();
        std_fs::write(src.join("CAMERA/new.jpg"), b"new").unwrap();
        std_fs::write(src.join("notes.txt"), b"fresh").unwrap();
        std_fs::create_dir_all(dst.join("CAMERA")).unwrap();
        std_fs::write(dst.join("CAMERA/old.jpg"), b"old").unwrap();
        std_fs::write(dst.join("notes.txt"), b"stale").unwrap();

        area.move_directory(&src, &dst).await.unwrap();

        assert!(!src.exists());
        assert_eq!(std_fs::read(dst.join("CAMERA/new.jpg")).unwrap(), b"new");
        assert_eq!(std_fs::read(dst.join("CAMERA/old.jpg")).unwrap(), b"old");
        assert_eq!(std_fs::read(dst.join("notes.txt")).unwrap(), b"fresh");
    }

    #[tokio::test]
    async fn move_of_missing_source_is_a_no_op() {
        let tmp = TempDir::new().unwrap();
        let area = area(&tmp);

        area.move_directory(&area.staging("gone"), &area.durable("gone"))
            .await
            .unwrap();
        assert!(!area.durable("gone").exists());
    }

    #[tokio::test]
    async fn delete_and_list_tolerate_missing_paths() {
        let tmp = TempDir::new().unwrap();
        let area = area(&tmp);

        area.delete_recursive(&area.durable("missing")).await.unwrap();
        assert!(area.list_children(&area.durable("missing")).await.unwrap().is_empty());

        let dir = area.durable("p-1");
        std_fs::create_dir_all(dir.join("cap-1")).unwrap();
        assert!(!area.remove_if_empty(&dir).await.unwrap());
        area.delete_recursive(&dir.join("cap-1")).await.unwrap();
        assert!(area.remove_if_empty(&dir).await.unwrap());
        assert!(!dir.exists());
    }
}
