//! What a watch session observes

use std::path::{Path, PathBuf};

/// A single file, an explicit set of files, or the entries of a directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchTarget {
    File(PathBuf),
    Files(Vec<PathBuf>),
    Directory {
        path: PathBuf,
        /// Only entries whose name ends with this suffix
        suffix: Option<String>,
        /// Include entries of subdirectories
        recursive: bool,
    },
}

impl WatchTarget {
    pub fn file(path: impl Into<PathBuf>) -> Self {
        WatchTarget::File(path.into())
    }

    pub fn files<I, P>(paths: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        WatchTarget::Files(paths.into_iter().map(Into::into).collect())
    }

    pub fn directory(path: impl Into<PathBuf>) -> Self {
        WatchTarget::Directory {
            path: path.into(),
            suffix: None,
            recursive: false,
        }
    }

    /// Restrict a directory target to one suffix; no-op for file targets
    pub fn with_suffix(self, suffix: impl Into<String>) -> Self {
        match self {
            WatchTarget::Directory { path, recursive, .. } => WatchTarget::Directory {
                path,
                suffix: Some(suffix.into()),
                recursive,
            },
            other => other,
        }
    }

    /// Make a directory target recursive; no-op for file targets
    pub fn recursive(self) -> Self {
        match self {
            WatchTarget::Directory { path, suffix, .. } => WatchTarget::Directory {
                path,
                suffix,
                recursive: true,
            },
            other => other,
        }
    }

    /// Paths named by the target, as given
    pub fn paths(&self) -> Vec<&Path> {
        match self {
            WatchTarget::File(path) => vec![path.as_path()],
            WatchTarget::Files(paths) => paths.iter().map(PathBuf::as_path).collect(),
            WatchTarget::Directory { path, .. } => vec![path.as_path()],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_directory_builders() {
        let target = WatchTarget::directory("/etc/app").with_suffix(".yaml").recursive();
        assert_eq!(
            target,
            WatchTarget::Directory {
                path: PathBuf::from("/etc/app"),
                suffix: Some(".yaml".to_string()),
                recursive: true,
            }
        );
    }

    #[test]
    fn test_file_targets_ignore_directory_options() {
        let target = WatchTarget::file("/etc/app.toml").with_suffix(".yaml").recursive();
        assert_eq!(target, WatchTarget::File(PathBuf::from("/etc/app.toml")));

        let set = WatchTarget::files(["/a", "/b"]);
        assert_eq!(set.paths(), vec![Path::new("/a"), Path::new("/b")]);
    }
}
