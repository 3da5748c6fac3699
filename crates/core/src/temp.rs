//! Temporary file recognition
//!
//! Editors and atomic writers create short-lived sibling files while saving.
//! Watchers use these helpers to hide that churn and to map a temp file back
//! to the real file it will replace.
//!
//! Recognised patterns:
//! - VSCode: `.name.ext.tmp.XXXX`
//! - vim: `.name.ext.swp` / `.swo` / `.swx`, and the `4913` write-permission check file
//! - emacs: `.#name` lock files and `#name#` autosaves
//! - backups: `name~`
//! - generic: `*.tmp`, including this crate's own `.name.XXXXXX.tmp`

use std::path::Path;

/// Suffix of temporary files created by [`crate::AtomicWriter`]
pub(crate) const TEMP_SUFFIX: &str = ".tmp";

/// Length of the random token in atomic-writer temp names
pub(crate) const TEMP_RANDOM_LEN: usize = 6;

const VIM_SWAP_SUFFIXES: [&str; 3] = [".swp", ".swo", ".swx"];

/// Check if a path names a temporary file
pub fn is_temp_file(path: &Path) -> bool {
    let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
        return false;
    };

    if name.ends_with(TEMP_SUFFIX) || name.ends_with('~') || name == "4913" {
        return true;
    }

    if name.starts_with('.') {
        if name.contains(".tmp.") || name.starts_with(".#") {
            return true;
        }
        if VIM_SWAP_SUFFIXES.iter().any(|ext| name.ends_with(ext)) {
            return true;
        }
    }

    is_emacs_autosave(name)
}

/// Recover the real file name a temporary file stands in for
///
/// Returns `None` when the name is not a temp file or the pattern does not
/// encode the original name (e.g. plain `file.tmp`).
pub fn extract_base_name(path: &Path) -> Option<String> {
    let name = path.file_name()?.to_str()?;

    if let Some(inner) = name.strip_prefix('.') {
        if let Some(rest) = inner.strip_prefix('#') {
            return non_empty(rest);
        }

        if let Some(idx) = inner.rfind(".tmp.") {
            return non_empty(&inner[..idx]);
        }

        for ext in VIM_SWAP_SUFFIXES {
            if let Some(base) = inner.strip_suffix(ext) {
                return non_empty(base);
            }
        }

        // .name.XXXXXX.tmp
        if let Some(stem) = inner.strip_suffix(TEMP_SUFFIX) {
            if let Some((base, token)) = stem.rsplit_once('.') {
                if token.len() == TEMP_RANDOM_LEN
                    && token.chars().all(|c| c.is_ascii_alphanumeric())
                {
                    return non_empty(base);
                }
            }
        }

        return None;
    }

    if let Some(base) = name.strip_suffix('~') {
        return non_empty(base);
    }

    if is_emacs_autosave(name) {
        return non_empty(&name[1..name.len() - 1]);
    }

    None
}

fn is_emacs_autosave(name: &str) -> bool {
    name.len() > 2 && name.starts_with('#') && name.ends_with('#')
}

fn non_empty(s: &str) -> Option<String> {
    if s.is_empty() {
        None
    } else {
        Some(s.to_string())
    }
}
