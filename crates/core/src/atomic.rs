//! Crash-safe atomic file replacement
//!
//! Content is written to a temporary sibling of the target, fsynced, then
//! renamed over the target. Readers observe either the previous complete
//! content or the new complete content, never a partial write.
//!
//! Temporary files are named `.<file name>.<6 random chars>.tmp` so that
//! watchers can recognise and skip them (see [`crate::temp`]).

use crate::error::FileOperationError;
use crate::temp::{TEMP_RANDOM_LEN, TEMP_SUFFIX};
use crate::Result;
use std::ffi::OsString;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tempfile::{NamedTempFile, PersistError};
use tracing::{debug, warn};

/// Default mode for new files before umask, matching `File::create`
#[cfg(unix)]
const DEFAULT_FILE_MODE: u32 = 0o666;

/// Atomic writer configuration
///
/// ```no_run
/// use settle_core::AtomicWriter;
///
/// AtomicWriter::new()
///     .create_parents(true)
///     .permissions(0o600)
///     .write("/etc/app/secrets.toml", "token = \"...\"\n")?;
/// # Ok::<(), settle_core::FileOperationError>(())
/// ```
#[derive(Debug, Clone)]
pub struct AtomicWriter {
    create_parents: bool,
    permissions: Option<u32>,
    preserve_permissions: bool,
    backup: bool,
}

impl Default for AtomicWriter {
    fn default() -> Self {
        Self {
            create_parents: false,
            permissions: None,
            preserve_permissions: true,
            backup: false,
        }
    }
}

impl AtomicWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create missing ancestor directories before writing
    pub fn create_parents(mut self, create_parents: bool) -> Self {
        self.create_parents = create_parents;
        self
    }

    /// Explicit mode bits, applied to the temp file before the rename
    ///
    /// Only honoured on Unix.
    pub fn permissions(mut self, mode: u32) -> Self {
        self.permissions = Some(mode);
        self
    }

    /// Keep the existing target's mode when no explicit mode is set
    pub fn preserve_permissions(mut self, preserve: bool) -> Self {
        self.preserve_permissions = preserve;
        self
    }

    /// Copy the existing target to `<name>.bak` before replacing it
    pub fn backup(mut self, backup: bool) -> Self {
        self.backup = backup;
        self
    }

    /// Atomically replace `path` with `content`
    pub fn write(&self, path: impl AsRef<Path>, content: impl AsRef<[u8]>) -> Result<()> {
        self.stage(path, content)?.commit()
    }

    /// Like [`write`](Self::write), but the target must already exist
    pub fn replace(&self, path: impl AsRef<Path>, content: impl AsRef<[u8]>) -> Result<()> {
        let path = path.as_ref();
        fs::metadata(path)
            .map_err(|e| FileOperationError::new("target does not exist", path, e))?;
        self.write(path, content)
    }

    /// Write `content` to a durable temporary file without touching the target
    ///
    /// The returned [`StagedWrite`] replaces the target on `commit()`; dropping
    /// it instead removes the temporary file.
    pub fn stage(&self, path: impl AsRef<Path>, content: impl AsRef<[u8]>) -> Result<StagedWrite> {
        let path = path.as_ref();
        let (parent, file_name) = split_target(path)?;

        if self.create_parents {
            fs::create_dir_all(&parent).map_err(|e| {
                FileOperationError::new("failed to create parent directories", &parent, e)
            })?;
        }

        let mode = self
            .resolve_mode(path)
            .map_err(|e| FileOperationError::new("failed to read existing permissions", path, e))?;

        let mut temp = create_temp(&parent, &file_name)
            .map_err(|e| FileOperationError::new("failed to create temporary file", path, e))?;

        if let Err(e) = fill_temp(&mut temp, content.as_ref(), mode) {
            discard(temp);
            return Err(FileOperationError::new("failed to write temporary file", path, e));
        }

        Ok(StagedWrite {
            target: path.to_path_buf(),
            temp: Some(temp),
            backup: self.backup,
        })
    }

    /// Mode to stamp on the temp file, if any
    fn resolve_mode(&self, target: &Path) -> io::Result<Option<u32>> {
        if self.permissions.is_some() {
            return Ok(self.permissions);
        }
        if !self.preserve_permissions {
            return Ok(None);
        }
        match fs::metadata(target) {
            Ok(meta) => Ok(existing_mode(&meta)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }
}

/// Atomically write `content` to `path` with default options
pub fn atomic_write(path: impl AsRef<Path>, content: impl AsRef<[u8]>) -> Result<()> {
    AtomicWriter::new().write(path, content)
}

/// A fully written, fsynced temporary file waiting to replace its target
#[derive(Debug)]
pub struct StagedWrite {
    target: PathBuf,
    temp: Option<NamedTempFile>,
    backup: bool,
}

impl StagedWrite {
    /// Final destination
    pub fn target(&self) -> &Path {
        &self.target
    }

    /// Location of the staged content
    pub fn temp_path(&self) -> Option<&Path> {
        self.temp.as_ref().map(|t| t.path())
    }

    /// Rename the staged content over the target
    pub fn commit(mut self) -> Result<()> {
        let Some(temp) = self.temp.take() else {
            return Ok(());
        };

        if self.backup {
            if let Err(e) = backup_existing(&self.target) {
                discard(temp);
                return Err(FileOperationError::new(
                    "failed to back up existing file",
                    &self.target,
                    e,
                ));
            }
        }

        if let Err(PersistError { error, file }) = temp.persist(&self.target) {
            discard(file);
            return Err(FileOperationError::new(
                "failed to rename temporary file over target",
                &self.target,
                error,
            ));
        }

        sync_parent(&self.target);
        debug!(path = %self.target.display(), "atomic write committed");
        Ok(())
    }

    /// Drop the staged content, leaving the target untouched
    pub fn abort(mut self) {
        if let Some(temp) = self.temp.take() {
            discard(temp);
        }
    }
}

impl Drop for StagedWrite {
    fn drop(&mut self) {
        if let Some(temp) = self.temp.take() {
            discard(temp);
        }
    }
}

fn split_target(path: &Path) -> Result<(PathBuf, OsString)> {
    let file_name = path.file_name().ok_or_else(|| {
        FileOperationError::new(
            "target has no file name",
            path,
            io::Error::new(io::ErrorKind::InvalidInput, "path does not name a file"),
        )
    })?;

    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };

    Ok((parent, file_name.to_os_string()))
}

fn create_temp(parent: &Path, file_name: &OsString) -> io::Result<NamedTempFile> {
    let mut prefix = OsString::from(".");
    prefix.push(file_name);
    prefix.push(".");

    let mut builder = tempfile::Builder::new();
    builder
        .prefix(&prefix)
        .suffix(TEMP_SUFFIX)
        .rand_bytes(TEMP_RANDOM_LEN);

    // tempfile defaults to 0o600; new targets should get the umask default
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        builder.permissions(fs::Permissions::from_mode(DEFAULT_FILE_MODE));
    }

    builder.tempfile_in(parent)
}

fn fill_temp(temp: &mut NamedTempFile, content: &[u8], mode: Option<u32>) -> io::Result<()> {
    temp.write_all(content)?;
    temp.flush()?;
    temp.as_file().sync_all()?;

    if let Some(mode) = mode {
        apply_mode(temp.as_file(), mode)?;
    }
    Ok(())
}

#[cfg(unix)]
fn existing_mode(meta: &fs::Metadata) -> Option<u32> {
    use std::os::unix::fs::PermissionsExt;
    Some(meta.permissions().mode() & 0o7777)
}

#[cfg(not(unix))]
fn existing_mode(_meta: &fs::Metadata) -> Option<u32> {
    None
}

#[cfg(unix)]
fn apply_mode(file: &fs::File, mode: u32) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    file.set_permissions(fs::Permissions::from_mode(mode))
}

#[cfg(not(unix))]
fn apply_mode(_file: &fs::File, _mode: u32) -> io::Result<()> {
    Ok(())
}

fn backup_path(target: &Path) -> PathBuf {
    let mut name = target
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".bak");
    target.with_file_name(name)
}

fn backup_existing(target: &Path) -> io::Result<()> {
    match fs::copy(target, backup_path(target)) {
        Ok(_) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

/// Make the rename itself durable
#[cfg(unix)]
fn sync_parent(target: &Path) {
    let parent = match target.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    if let Err(e) = fs::File::open(parent).and_then(|dir| dir.sync_all()) {
        warn!(path = %parent.display(), error = %e, "failed to fsync parent directory");
    }
}

#[cfg(not(unix))]
fn sync_parent(_target: &Path) {}

/// Best-effort temp removal; failure never masks the original error
fn discard(temp: NamedTempFile) {
    let path = temp.path().to_path_buf();
    if let Err(e) = temp.close() {
        warn!(path = %path.display(), error = %e, "failed to remove temporary file");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::temp::is_temp_file;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;
    use tempfile::TempDir;

    fn entries(dir: &Path) -> Vec<String> {
        let mut names: Vec<String> = fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    #[test]
    fn test_write_creates_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("config.toml");

        atomic_write(&path, b"key = 1\n").unwrap();

        assert_eq!(fs::read(&path).unwrap(), b"key = 1\n");
        assert_eq!(entries(temp_dir.path()), vec!["config.toml"]);
    }

    #[test]
    fn test_write_overwrites_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("config.toml");
        fs::write(&path, "old").unwrap();

        AtomicWriter::new().write(&path, "new content").unwrap();

        assert_eq!(fs::read_to_string(&path).unwrap(), "new content");
        assert_eq!(entries(temp_dir.path()), vec!["config.toml"]);
    }

    #[test]
    fn test_missing_parent_requires_create_parents() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("a/b/config.toml");

        let err = AtomicWriter::new().write(&path, "x").unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
        assert!(!temp_dir.path().join("a").exists());

        AtomicWriter::new().create_parents(true).write(&path, "x").unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "x");
    }

    #[test]
    fn test_replace_requires_existing_target() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("missing.txt");

        let err = AtomicWriter::new().replace(&path, "data").unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
        assert!(!path.exists());

        fs::write(&path, "before").unwrap();
        AtomicWriter::new().replace(&path, "after").unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "after");
    }

    #[test]
    fn test_directory_target_fails_and_cleans_up() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("actually_a_dir");
        fs::create_dir(&path).unwrap();

        assert!(atomic_write(&path, b"data").is_err());

        assert!(path.is_dir());
        assert!(entries(temp_dir.path()).iter().all(|n| !n.ends_with(".tmp")));
    }

    #[test]
    fn test_backup_keeps_previous_content() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("test.txt");
        fs::write(&path, "original").unwrap();

        AtomicWriter::new().backup(true).write(&path, "replacement").unwrap();

        let backup = temp_dir.path().join("test.txt.bak");
        assert_eq!(fs::read_to_string(&backup).unwrap(), "original");
        assert_eq!(fs::read_to_string(&path).unwrap(), "replacement");
    }

    #[test]
    fn test_backup_skipped_for_new_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("fresh.txt");

        AtomicWriter::new().backup(true).write(&path, "x").unwrap();

        assert_eq!(entries(temp_dir.path()), vec!["fresh.txt"]);
    }

    #[cfg(unix)]
    mod permissions {
        use super::*;
        use std::os::unix::fs::PermissionsExt;

        fn mode(path: &Path) -> u32 {
            fs::metadata(path).unwrap().permissions().mode() & 0o777
        }

        #[test]
        fn test_explicit_mode() {
            let temp_dir = TempDir::new().unwrap();
            let path = temp_dir.path().join("secret.txt");

            AtomicWriter::new().permissions(0o600).write(&path, "s3cret").unwrap();
            assert_eq!(mode(&path), 0o600);

            AtomicWriter::new().permissions(0o640).write(&path, "s3cret").unwrap();
            assert_eq!(mode(&path), 0o640);
        }

        #[test]
        fn test_preserves_existing_mode_by_default() {
            let temp_dir = TempDir::new().unwrap();
            let path = temp_dir.path().join("test.txt");
            fs::write(&path, "original").unwrap();
            fs::set_permissions(&path, fs::Permissions::from_mode(0o600)).unwrap();

            atomic_write(&path, "new").unwrap();

            assert_eq!(mode(&path), 0o600);
        }

        #[test]
        fn test_without_preserve_uses_umask_default() {
            let temp_dir = TempDir::new().unwrap();
            let reference = temp_dir.path().join("reference.txt");
            fs::write(&reference, "r").unwrap();

            let path = temp_dir.path().join("test.txt");
            fs::write(&path, "original").unwrap();
            fs::set_permissions(&path, fs::Permissions::from_mode(0o600)).unwrap();

            AtomicWriter::new()
                .preserve_permissions(false)
                .write(&path, "new")
                .unwrap();

            assert_eq!(mode(&path), mode(&reference));
        }

        #[test]
        fn test_new_file_not_restricted_to_temp_mode() {
            let temp_dir = TempDir::new().unwrap();
            let reference = temp_dir.path().join("reference.txt");
            fs::write(&reference, "r").unwrap();

            let path = temp_dir.path().join("new.txt");
            atomic_write(&path, "data").unwrap();

            assert_eq!(mode(&path), mode(&reference));
        }
    }

    #[test]
    fn test_staged_write_leaves_target_until_commit() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("app.yaml");
        fs::write(&path, "version: 1\n").unwrap();

        let staged = AtomicWriter::new().stage(&path, "version: 2\n").unwrap();
        let temp_path = staged.temp_path().unwrap().to_path_buf();

        assert!(temp_path.exists());
        assert!(is_temp_file(&temp_path));
        assert_eq!(temp_path.parent(), path.parent());
        assert_eq!(fs::read_to_string(&path).unwrap(), "version: 1\n");

        staged.commit().unwrap();

        assert!(!temp_path.exists());
        assert_eq!(fs::read_to_string(&path).unwrap(), "version: 2\n");
    }

    #[test]
    fn test_abandoned_stage_removes_temp() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("app.yaml");
        fs::write(&path, "version: 1\n").unwrap();

        let staged = AtomicWriter::new().stage(&path, "version: 2\n").unwrap();
        let temp_path = staged.temp_path().unwrap().to_path_buf();
        drop(staged);

        assert!(!temp_path.exists());
        assert_eq!(fs::read_to_string(&path).unwrap(), "version: 1\n");

        let staged = AtomicWriter::new().stage(&path, "version: 3\n").unwrap();
        staged.abort();
        assert_eq!(entries(temp_dir.path()), vec!["app.yaml"]);
    }

    #[test]
    fn test_interrupted_before_rename_keeps_original() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("state.json");
        fs::write(&path, "{\"v\":1}").unwrap();

        // Simulate a crash: the process never reaches commit or cleanup
        let staged = AtomicWriter::new().stage(&path, "{\"v\":2}").unwrap();
        let temp_path = staged.temp_path().unwrap().to_path_buf();
        std::mem::forget(staged);

        assert_eq!(fs::read_to_string(&path).unwrap(), "{\"v\":1}");
        assert_eq!(fs::read_to_string(&temp_path).unwrap(), "{\"v\":2}");
    }

    #[test]
    fn test_concurrent_reader_never_sees_partial_content() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("data.bin");
        let old = vec![b'a'; 256 * 1024];
        let new = vec![b'b'; 256 * 1024];
        fs::write(&path, &old).unwrap();

        let done = Arc::new(AtomicBool::new(false));
        let reader = {
            let done = Arc::clone(&done);
            let path = path.clone();
            let (old, new) = (old.clone(), new.clone());
            thread::spawn(move || {
                let mut reads = 0usize;
                while !done.load(Ordering::SeqCst) {
                    let content = fs::read(&path).unwrap();
                    assert!(content == old || content == new, "observed partial content");
                    reads += 1;
                }
                reads
            })
        };

        let staged = AtomicWriter::new().stage(&path, &new).unwrap();
        thread::sleep(Duration::from_millis(50));
        staged.commit().unwrap();
        thread::sleep(Duration::from_millis(50));
        done.store(true, Ordering::SeqCst);

        assert!(reader.join().unwrap() > 0);
        assert_eq!(fs::read(&path).unwrap(), new);
    }

    #[test]
    fn test_concurrent_writers_do_not_corrupt() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("shared.txt");

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let path = path.clone();
                thread::spawn(move || {
                    let content = format!("writer-{i}-").repeat(1000);
                    atomic_write(&path, &content).unwrap();
                    content
                })
            })
            .collect();
        let written: Vec<String> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        let final_content = fs::read_to_string(&path).unwrap();
        assert!(written.contains(&final_content));
        assert_eq!(entries(temp_dir.path()), vec!["shared.txt"]);
    }
}
