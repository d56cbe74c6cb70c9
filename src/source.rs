//! Filesystem capability consumed by the resolver and the executor
//!
//! Reading schema files goes through [`SchemaSource`] so the engine can be
//! driven from the local disk ([`LocalFs`]) or from memory in tests.

use std::fs;
use std::io;
use std::path::Path;

/// A directory entry as seen by the resolver
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    pub name: String,
    pub is_dir: bool,
}

impl DirEntry {
    pub fn file(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            is_dir: false,
        }
    }

    pub fn dir(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            is_dir: true,
        }
    }
}

/// Read access to a tree of schema files
pub trait SchemaSource {
    /// Read a whole file as UTF-8 text
    ///
    /// # Errors
    ///
    /// Returns the underlying I/O error if the file is missing or unreadable.
    fn read_to_string(&self, path: &Path) -> io::Result<String>;

    /// List the entries of a directory, sorted by name
    ///
    /// A symbolic link is reported with `is_dir == false` even when it points
    /// at a directory.
    ///
    /// # Errors
    ///
    /// Returns the underlying I/O error if the directory is missing or
    /// unreadable.
    fn list_dir(&self, path: &Path) -> io::Result<Vec<DirEntry>>;
}

/// [`SchemaSource`] backed by `std::fs`
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalFs;

impl SchemaSource for LocalFs {
    fn read_to_string(&self, path: &Path) -> io::Result<String> {
        fs::read_to_string(path)
    }

    fn list_dir(&self, path: &Path) -> io::Result<Vec<DirEntry>> {
        let mut entries = Vec::new();
        for entry in fs::read_dir(path)? {
            let entry = entry?;
            let name = entry.file_name().into_string().map_err(|raw| {
                io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("non UTF-8 file name {raw:?} in {}", path.display()),
                )
            })?;
            // Symlinks are never reported as directories, so the walk cannot loop
            let is_dir = entry.file_type()?.is_dir();
            entries.push(DirEntry { name, is_dir });
        }
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }
}
