//! Temporary files owned by one conversion.

use std::io::Write;
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;

/// Prefix of every scoped temp file, used when sweeping the temp directory.
pub const TEMP_PREFIX: &str = "nexus-";

/// The set of temp files materialized for one call.
///
/// Dropping the scope deletes every file, whether the call succeeded, failed
/// or its future was dropped on timeout. With `retain` set the files are
/// persisted instead and left for an operator to inspect.
#[derive(Debug)]
pub struct TempScope {
    dir: PathBuf,
    retain: bool,
    files: Vec<NamedTempFile>,
}

impl TempScope {
    pub fn new(dir: impl Into<PathBuf>, retain: bool) -> Self {
        Self {
            dir: dir.into(),
            retain,
            files: Vec::new(),
        }
    }

    /// Write `bytes` into a fresh temp file and return its path.
    pub fn materialize(&mut self, bytes: &[u8], extension: Option<&str>) -> std::io::Result<PathBuf> {
        std::fs::create_dir_all(&self.dir)?;
        let suffix = extension.map(|e| format!(".{}", e)).unwrap_or_default();
        let mut file = tempfile::Builder::new()
            .prefix(TEMP_PREFIX)
            .suffix(&suffix)
            .tempfile_in(&self.dir)?;
        file.write_all(bytes)?;
        file.flush()?;
        let path = file.path().to_path_buf();
        self.files.push(file);
        Ok(path)
    }

    /// Paths currently owned by this scope.
    pub fn paths(&self) -> Vec<&Path> {
        self.files.iter().map(|f| f.path()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

impl Drop for TempScope {
    fn drop(&mut self) {
        if !self.retain {
            return;
        }
        for file in self.files.drain(..) {
            if let Err(e) = file.keep() {
                log::warn!("Failed to retain temp file: {}", e);
            }
        }
    }
}

/// Remove every scoped temp file left in `dir` by an earlier process.
///
/// Returns the number of files removed.
pub fn clear_temp_dir(dir: &Path) -> std::io::Result<usize> {
    if !dir.exists() {
        return Ok(0);
    }
    let mut removed = 0;
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name();
        if !name.to_string_lossy().starts_with(TEMP_PREFIX) {
            continue;
        }
        if entry.file_type()?.is_file() {
            std::fs::remove_file(entry.path())?;
            removed += 1;
        }
    }
    Ok(removed)
}
