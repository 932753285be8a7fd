//! Directory extraction trees.
//!
//! A tree is a named snapshot of a directory: every entry is either a file
//! with its bytes or a directory with ordered children. The emulator side
//! produces one when persisting guest state and consumes one at startup to
//! repopulate it.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::PersistError;

/// A single node below the root of a snapshot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExtractionEntry {
    File { name: String, contents: Vec<u8> },
    Directory { name: String, contents: Vec<ExtractionEntry> },
}

/// Root of a persisted directory snapshot
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DirectoryExtraction {
    pub name: String,
    pub contents: Vec<ExtractionEntry>,
}

impl ExtractionEntry {
    pub fn name(&self) -> &str {
        match self {
            ExtractionEntry::File { name, .. } | ExtractionEntry::Directory { name, .. } => name,
        }
    }

    fn file_count(&self) -> usize {
        match self {
            ExtractionEntry::File { .. } => 1,
            ExtractionEntry::Directory { contents, .. } => {
                contents.iter().map(ExtractionEntry::file_count).sum()
            }
        }
    }

    fn total_bytes(&self) -> u64 {
        match self {
            ExtractionEntry::File { contents, .. } => contents.len() as u64,
            ExtractionEntry::Directory { contents, .. } => {
                contents.iter().map(ExtractionEntry::total_bytes).sum()
            }
        }
    }

    fn collect_files<'a>(&'a self, parent: &Path, out: &mut Vec<(PathBuf, &'a [u8])>) {
        let path = parent.join(self.name());
        match self {
            ExtractionEntry::File { contents, .. } => out.push((path, contents)),
            ExtractionEntry::Directory { contents, .. } => {
                for child in contents {
                    child.collect_files(&path, out);
                }
            }
        }
    }

    fn capture(path: &Path) -> Result<Option<Self>, PersistError> {
        let name = entry_name(path)?;
        let metadata = std::fs::symlink_metadata(path).map_err(|e| io_error(path, e))?;

        if metadata.is_file() {
            let contents = std::fs::read(path).map_err(|e| io_error(path, e))?;
            Ok(Some(ExtractionEntry::File { name, contents }))
        } else if metadata.is_dir() {
            Ok(Some(ExtractionEntry::Directory {
                name,
                contents: capture_children(path)?,
            }))
        } else {
            warn!("Skipping {:?}: not a regular file or directory", path);
            Ok(None)
        }
    }

    fn restore(&self, parent: &Path) -> Result<(), PersistError> {
        check_name(self.name())?;
        let path = parent.join(self.name());
        match self {
            ExtractionEntry::File { contents, .. } => {
                std::fs::write(&path, contents).map_err(|e| io_error(&path, e))
            }
            ExtractionEntry::Directory { contents, .. } => {
                std::fs::create_dir_all(&path).map_err(|e| io_error(&path, e))?;
                for child in contents {
                    child.restore(&path)?;
                }
                Ok(())
            }
        }
    }
}

impl DirectoryExtraction {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            contents: Vec::new(),
        }
    }

    /// Snapshot a real directory. Children are sorted by name.
    pub fn from_dir(path: &Path) -> Result<Self, PersistError> {
        let extraction = Self {
            name: entry_name(path)?,
            contents: capture_children(path)?,
        };
        debug!(
            "Captured {:?}: {} files, {} bytes",
            path,
            extraction.file_count(),
            extraction.total_bytes()
        );
        Ok(extraction)
    }

    /// Write the snapshot's entries below `dest`, creating it if needed.
    pub fn restore_into(&self, dest: &Path) -> Result<(), PersistError> {
        std::fs::create_dir_all(dest).map_err(|e| io_error(dest, e))?;
        for entry in &self.contents {
            entry.restore(dest)?;
        }
        debug!("Restored {} files into {:?}", self.file_count(), dest);
        Ok(())
    }

    pub fn file_count(&self) -> usize {
        self.contents.iter().map(ExtractionEntry::file_count).sum()
    }

    pub fn total_bytes(&self) -> u64 {
        self.contents.iter().map(ExtractionEntry::total_bytes).sum()
    }

    /// Every file in depth-first order with its path relative to the root
    pub fn files(&self) -> Vec<(PathBuf, &[u8])> {
        let mut out = Vec::new();
        for entry in &self.contents {
            entry.collect_files(Path::new(""), &mut out);
        }
        out
    }

    pub fn to_msgpack(&self) -> Result<Vec<u8>, PersistError> {
        Ok(rmp_serde::to_vec_named(self)?)
    }

    pub fn from_msgpack(bytes: &[u8]) -> Result<Self, PersistError> {
        Ok(rmp_serde::from_slice(bytes)?)
    }
}

fn capture_children(dir: &Path) -> Result<Vec<ExtractionEntry>, PersistError> {
    let mut paths = Vec::new();
    for entry in std::fs::read_dir(dir).map_err(|e| io_error(dir, e))? {
        let entry = entry.map_err(|e| io_error(dir, e))?;
        paths.push(entry.path());
    }
    paths.sort();

    let mut children = Vec::with_capacity(paths.len());
    for path in paths {
        if let Some(child) = ExtractionEntry::capture(&path)? {
            children.push(child);
        }
    }
    Ok(children)
}

fn entry_name(path: &Path) -> Result<String, PersistError> {
    let name = path
        .file_name()
        .and_then(|name| name.to_str())
        .ok_or_else(|| PersistError::InvalidName(path.display().to_string()))?;
    Ok(name.to_string())
}

fn check_name(name: &str) -> Result<(), PersistError> {
    if name.is_empty() || name == "." || name == ".." || name.contains(['/', '\\']) {
        return Err(PersistError::InvalidName(name.to_string()));
    }
    Ok(())
}

fn io_error(path: &Path, source: std::io::Error) -> PersistError {
    PersistError::Io {
        path: path.display().to_string(),
        source,
    }
}
