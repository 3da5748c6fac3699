//! Entry filtering for directory watches
//!
//! An entry is watched when all of these hold:
//! 1. It lives under the watched directory
//! 2. Its name ends with the suffix filter (if any)
//! 3. It is not an editor/atomic-writer temp file or OS junk file
//!    (when `ignore_temp_files` is on)
//! 4. It does not match a configured ignore pattern (gitignore syntax)

use crate::config::{ConfigError, DetectorConfig};
use ignore::gitignore::{Gitignore, GitignoreBuilder};
use settle_core::is_temp_file;
use std::path::{Path, PathBuf};

/// Filter for the entries of one watched directory
#[derive(Debug, Clone)]
pub struct WatchFilter {
    /// Watched directory
    root: PathBuf,

    /// Required name suffix, always starting with '.'
    suffix: Option<String>,

    ignore_temp_files: bool,

    /// Compiled ignore patterns (optional)
    patterns: Option<Gitignore>,
}

impl WatchFilter {
    /// Build a filter for `root`
    ///
    /// `suffix` may be given with or without the leading dot (`"yaml"` and
    /// `".yaml"` are equivalent).
    pub fn new(
        root: &Path,
        suffix: Option<&str>,
        config: &DetectorConfig,
    ) -> Result<Self, ConfigError> {
        let suffix = suffix.filter(|s| !s.is_empty()).map(|s| {
            if s.starts_with('.') {
                s.to_string()
            } else {
                format!(".{s}")
            }
        });

        let patterns = if config.ignore_patterns.is_empty() {
            None
        } else {
            let mut builder = GitignoreBuilder::new(root);
            for pattern in &config.ignore_patterns {
                builder.add_line(None, pattern)?;
            }
            Some(builder.build()?)
        };

        Ok(Self {
            root: root.to_path_buf(),
            suffix,
            ignore_temp_files: config.ignore_temp_files,
            patterns,
        })
    }

    /// Check if a file path should be watched
    pub fn accepts(&self, path: &Path) -> bool {
        let Ok(relative) = path.strip_prefix(&self.root) else {
            return false;
        };
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            return false;
        };

        if let Some(ref suffix) = self.suffix {
            if !name.ends_with(suffix.as_str()) {
                return false;
            }
        }

        if self.ignore_temp_files && (is_temp_file(path) || is_os_junk(name)) {
            return false;
        }

        !self.is_ignored(relative, false)
    }

    /// Check if a subdirectory should be descended into
    pub fn accepts_dir(&self, path: &Path) -> bool {
        match path.strip_prefix(&self.root) {
            Ok(relative) if relative.as_os_str().is_empty() => true,
            Ok(relative) => !self.is_ignored(relative, true),
            Err(_) => false,
        }
    }

    fn is_ignored(&self, relative: &Path, is_dir: bool) -> bool {
        match self.patterns {
            Some(ref patterns) => patterns
                .matched_path_or_any_parents(relative, is_dir)
                .is_ignore(),
            None => false,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn suffix(&self) -> Option<&str> {
        self.suffix.as_deref()
    }
}

/// MacOS and Windows metadata files
fn is_os_junk(name: &str) -> bool {
    name == ".DS_Store" || name.starts_with("._") || name == "Thumbs.db" || name == "desktop.ini"
}
