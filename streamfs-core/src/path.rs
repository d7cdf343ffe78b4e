//! Path classification.
//!
//! The file system emulates directories over a flat key space: a directory is
//! any valid path ending with `/`, a file is any valid path that does not.
//! Paths are accepted with or without a leading `/`; both are relative to the
//! mounted bucket. Every public operation runs these checks before any I/O.

use crate::error::FsError;

/// True if every `/`-separated segment is non-empty and neither `.` nor `..`.
fn is_clean(rel: &str) -> bool {
    !rel.is_empty()
        && rel
            .split('/')
            .all(|segment| !segment.is_empty() && segment != "." && segment != "..")
}

fn strip_leading(path: &str) -> &str {
    path.strip_prefix('/').unwrap_or(path)
}

/// A file path must not end with `/`.
pub fn is_valid_file(path: &str) -> bool {
    if path.is_empty() || path.ends_with('/') {
        return false;
    }
    is_clean(strip_leading(path))
}

/// A directory path is `/` or any clean path ending with `/`.
pub fn is_valid_dir(path: &str) -> bool {
    if path == "/" {
        return true;
    }
    match path.strip_suffix('/') {
        Some(interior) => is_clean(strip_leading(interior)),
        None => false,
    }
}

/// Either a valid file or a valid directory.
pub fn is_valid_path(path: &str) -> bool {
    is_valid_dir(path) || is_valid_file(path)
}

pub fn require_valid_file(op: &'static str, path: &str) -> Result<(), FsError> {
    if is_valid_file(path) {
        Ok(())
    } else {
        Err(FsError::invalid(op, path))
    }
}

pub fn require_valid_dir(op: &'static str, path: &str) -> Result<(), FsError> {
    if is_valid_dir(path) {
        Ok(())
    } else {
        Err(FsError::invalid(op, path))
    }
}

pub fn require_valid_path(op: &'static str, path: &str) -> Result<(), FsError> {
    if is_valid_path(path) {
        Ok(())
    } else {
        Err(FsError::invalid(op, path))
    }
}

/// Storage key of a path: the path without its leading `/`.
pub fn object_key(path: &str) -> &str {
    strip_leading(path)
}
