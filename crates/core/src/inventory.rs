//! Local inventory: the eligible files directly inside one directory.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::{Error, Result};

pub const DEFAULT_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "gif", "tif", "tiff"];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalFile {
    pub path: PathBuf,
    /// File name within the scanned directory; the dedup identity.
    pub display_name: String,
    pub size_bytes: u64,
}

/// Which directory entries count as uploadable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanFilter {
    pub include_hidden: bool,
    /// Lowercase extensions without the dot. Empty accepts every regular file.
    pub extensions: Vec<String>,
}

impl Default for ScanFilter {
    fn default() -> Self {
        Self {
            include_hidden: false,
            extensions: DEFAULT_EXTENSIONS.iter().map(|e| e.to_string()).collect(),
        }
    }
}

impl ScanFilter {
    pub fn accepts(&self, file_name: &str) -> bool {
        if !self.include_hidden && file_name.starts_with('.') {
            return false;
        }
        if self.extensions.is_empty() {
            return true;
        }
        let Some((_, ext)) = file_name.rsplit_once('.') else {
            return false;
        };
        let ext = ext.to_ascii_lowercase();
        self.extensions.iter().any(|e| *e == ext)
    }
}

#[derive(Debug, Clone)]
pub struct LocalInventory {
    dir: PathBuf,
    files: Vec<LocalFile>,
}

impl LocalInventory {
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Files in file-name order. Can be iterated any number of times.
    pub fn iter(&self) -> impl Iterator<Item = &LocalFile> + '_ {
        self.files.iter()
    }

    pub fn total_bytes(&self) -> u64 {
        self.files.iter().map(|f| f.size_bytes).sum()
    }
}

impl<'a> IntoIterator for &'a LocalInventory {
    type Item = &'a LocalFile;
    type IntoIter = std::slice::Iter<'a, LocalFile>;

    fn into_iter(self) -> Self::IntoIter {
        self.files.iter()
    }
}

/// Lists eligible regular files directly inside `dir` (no recursion).
///
/// Fails before any network activity when `dir` is not a directory or holds
/// no eligible file.
pub fn scan_directory(dir: &Path, filter: &ScanFilter) -> Result<LocalInventory> {
    if !dir.is_dir() {
        return Err(Error::NotADirectory {
            path: dir.to_path_buf(),
        });
    }

    let mut files = Vec::new();
    let walker = WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .follow_links(true)
        .sort_by_file_name();

    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            // Dangling symlinks and similar per-entry errors; a failure to
            // read the directory itself still aborts.
            Err(e) if e.depth() > 0 => {
                warn!(event = "scan.skip_unreadable", error = %e, "scan.skip_unreadable");
                continue;
            }
            Err(e) => return Err(e.into()),
        };
        if !entry.file_type().is_file() {
            continue;
        }

        let Some(name) = entry.file_name().to_str() else {
            warn!(
                event = "scan.skip_non_utf8",
                path = %entry.path().display(),
                "scan.skip_non_utf8"
            );
            continue;
        };
        if !filter.accepts(name) {
            debug!(event = "scan.ignored", file = name, "scan.ignored");
            continue;
        }

        let metadata = entry.metadata()?;
        files.push(LocalFile {
            path: entry.path().to_path_buf(),
            display_name: name.to_string(),
            size_bytes: metadata.len(),
        });
    }

    if files.is_empty() {
        return Err(Error::EmptyDirectory {
            path: dir.to_path_buf(),
        });
    }

    Ok(LocalInventory {
        dir: dir.to_path_buf(),
        files,
    })
}
