//! Descriptor snapshots returned by stat, open and listing calls.

use chrono::{DateTime, Utc};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileMode {
    Regular,
    Directory,
}

/// Transient snapshot of one file or directory.
///
/// Directory entries carry a name relative to the listed directory; every
/// other snapshot carries the path it was requested with.
#[derive(Debug, Clone)]
pub struct ObjectInfo<T> {
    path: String,
    mode: FileMode,
    size: u64,
    modified: Option<DateTime<Utc>>,
    attributes: Option<T>,
}

/// A relativized [`ObjectInfo`] produced while listing a directory.
pub type DirEntry<T> = ObjectInfo<T>;

impl<T> ObjectInfo<T> {
    pub(crate) fn file(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            mode: FileMode::Regular,
            size: 0,
            modified: None,
            attributes: None,
        }
    }

    pub(crate) fn directory(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            mode: FileMode::Directory,
            size: 0,
            modified: None,
            attributes: None,
        }
    }

    /// Entry for a listed key; names ending in `/` are directory placeholders.
    pub(crate) fn entry(name: impl Into<String>, size: u64, modified: Option<DateTime<Utc>>) -> Self {
        let name = name.into();
        if name.ends_with('/') {
            return Self::directory(name);
        }
        Self {
            path: name,
            mode: FileMode::Regular,
            size,
            modified,
            attributes: None,
        }
    }

    pub(crate) fn set_stat(&mut self, size: u64, modified: Option<DateTime<Utc>>) {
        self.size = size;
        self.modified = modified;
    }

    pub(crate) fn set_attributes(&mut self, attributes: T) {
        self.attributes = Some(attributes);
    }

    pub(crate) fn attributes_mut(&mut self) -> Option<&mut T> {
        self.attributes.as_mut()
    }

    /// Path as requested, or the relative name for directory entries.
    pub fn name(&self) -> &str {
        &self.path
    }

    pub fn mode(&self) -> FileMode {
        self.mode
    }

    pub fn is_dir(&self) -> bool {
        self.mode == FileMode::Directory
    }

    /// Byte length; always 0 for directories.
    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn modified(&self) -> Option<DateTime<Utc>> {
        self.modified
    }

    /// Decoded typed attributes, present for regular files after a head or get.
    pub fn attributes(&self) -> Option<&T> {
        self.attributes.as_ref()
    }

    pub fn into_attributes(self) -> Option<T> {
        self.attributes
    }
}
