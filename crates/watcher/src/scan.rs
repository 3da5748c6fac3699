//! Filesystem sampling for the poll loop
//!
//! Takes size/mtime samples of individual files and enumerates the entries
//! of watched directories.

use crate::filter::WatchFilter;
use crate::streaming::Sample;
use std::io;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Sample one path
///
/// A path that exists but is no longer a regular file (for example a file
/// replaced by a directory) samples as `Missing`.
pub fn sample(path: &Path) -> io::Result<Sample> {
    match std::fs::metadata(path) {
        Ok(meta) if meta.is_file() => Ok(Sample::present(meta.len(), meta.modified().ok())),
        Ok(_) => Ok(Sample::Missing),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(Sample::Missing),
        Err(e) => Err(e),
    }
}

/// List the files of a watched directory that pass `filter`
///
/// Unreadable subdirectories are skipped; only a failure to read the
/// directory itself is reported.
pub fn list_directory(dir: &Path, recursive: bool, filter: &WatchFilter) -> io::Result<Vec<PathBuf>> {
    let mut walker = WalkDir::new(dir).min_depth(1).follow_links(false);
    if !recursive {
        walker = walker.max_depth(1);
    }

    let mut files = Vec::new();
    for entry in walker
        .into_iter()
        .filter_entry(|e| !e.file_type().is_dir() || filter.accepts_dir(e.path()))
    {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) if e.depth() == 0 => {
                return Err(e
                    .into_io_error()
                    .unwrap_or_else(|| io::Error::new(io::ErrorKind::Other, "directory walk failed")));
            }
            Err(e) => {
                tracing::debug!("Skipping unreadable entry: {}", e);
                continue;
            }
        };

        if entry.file_type().is_file() && filter.accepts(entry.path()) {
            files.push(entry.into_path());
        }
    }

    files.sort();
    Ok(files)
}
