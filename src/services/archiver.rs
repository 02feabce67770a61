//! Packs a sensor output folder into a single zip archive.
//!
//! The walk is top-down and sorted by file name so repeated runs over the
//! same tree produce entries in the same order. Directories are written as
//! `name/` markers with no content; the root itself gets no entry. Symbolic
//! links are not followed and not archived.

use std::{
    fs::{self, File},
    io::{self, BufWriter},
    path::{Path, PathBuf},
};
use thiserror::Error;
use tracing::debug;
use walkdir::WalkDir;
use zip::{CompressionMethod, ZipWriter, write::SimpleFileOptions};

#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("archive source `{0}` is not a directory")]
    NotADirectory(PathBuf),
    #[error(transparent)]
    Walk(#[from] walkdir::Error),
    #[error(transparent)]
    Zip(#[from] zip::result::ZipError),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error("archive task did not complete: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Archive `source` into `destination` off the async scheduler. Returns the
/// archive's size in bytes.
pub async fn archive_folder(source: &Path, destination: &Path) -> Result<u64, ArchiveError> {
    let source = source.to_path_buf();
    let destination = destination.to_path_buf();
    run_archive(move || archive_folder_sync(&source, &destination)).await
}

async fn run_archive<F>(work: F) -> Result<u64, ArchiveError>
where
    F: FnOnce() -> Result<u64, ArchiveError> + Send + 'static,
{
    tokio::task::spawn_blocking(work).await?
}

fn archive_folder_sync(source: &Path, destination: &Path) -> Result<u64, ArchiveError> {
    if !fs::metadata(source)?.is_dir() {
        return Err(ArchiveError::NotADirectory(source.to_path_buf()));
    }
    if let Some(parent) = destination.parent() {
        fs::create_dir_all(parent)?;
    }

    let mut zip = ZipWriter::new(BufWriter::new(File::create(destination)?));
    let options = SimpleFileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .unix_permissions(0o644);

    let mut entries = 0usize;
    for entry in WalkDir::new(source).sort_by_file_name() {
        let entry = entry?;
        let name = entry_name(source, entry.path());
        if name.is_empty() {
            continue;
        }

        if entry.path_is_symlink() {
            debug!("skipping symlink {}", entry.path().display());
            continue;
        }
        if entry.file_type().is_dir() {
            zip.add_directory(format!("{name}/"), options)?;
        } else {
            zip.start_file(name, options)?;
            let mut file = File::open(entry.path())?;
            io::copy(&mut file, &mut zip)?;
        }
        entries += 1;
    }

    let mut writer = zip.finish()?;
    io::Write::flush(&mut writer)?;
    writer.get_ref().sync_all()?;
    drop(writer);

    let size = fs::metadata(destination)?.len();
    debug!(
        "archived {} entries from {} into {} ({} bytes)",
        entries,
        source.display(),
        destination.display(),
        size
    );
    Ok(size)
}

/// Path of `path` relative to `root`, always `/`-separated.
fn entry_name(root: &Path, path: &Path) -> String {
    path.strip_prefix(root)
        .unwrap_or(path)
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}
