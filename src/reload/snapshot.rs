//! Cheap change detection for bundle directories.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

/// Modification time and length of every file under the bundle paths.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BundleSnapshot {
    files: BTreeMap<PathBuf, (Option<SystemTime>, u64)>,
}

impl BundleSnapshot {
    /// Walk `paths` recursively. Unreadable entries are skipped.
    pub fn capture(paths: &[PathBuf]) -> Self {
        let mut files = BTreeMap::new();
        for path in paths {
            collect(path, &mut files);
        }
        Self { files }
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Paths added, removed or modified between `self` and `other`.
    pub fn changes(&self, other: &BundleSnapshot) -> Vec<PathBuf> {
        let mut changed: Vec<PathBuf> = self
            .files
            .iter()
            .filter(|(path, meta)| other.files.get(*path) != Some(meta))
            .map(|(path, _)| path.clone())
            .collect();
        changed.extend(
            other
                .files
                .keys()
                .filter(|path| !self.files.contains_key(*path))
                .cloned(),
        );
        changed.sort();
        changed
    }
}

fn collect(path: &Path, files: &mut BTreeMap<PathBuf, (Option<SystemTime>, u64)>) {
    let Ok(meta) = std::fs::metadata(path) else {
        return;
    };
    if meta.is_file() {
        files.insert(path.to_path_buf(), (meta.modified().ok(), meta.len()));
        return;
    }
    if !meta.is_dir() {
        return;
    }
    let Ok(entries) = std::fs::read_dir(path) else {
        log::debug!("Cannot read {:?} while scanning bundles", path);
        return;
    };
    for entry in entries.flatten() {
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if name.starts_with('.') || name == "__pycache__" {
            continue;
        }
        collect(&entry.path(), files);
    }
}
