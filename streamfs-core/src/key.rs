//! Two-part object identities.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Joins the hash and sort parts of a composite key.
pub const SEPARATOR: &str = "/_/";

/// Composite key: a hash key, optionally refined by a sort key.
///
/// A key without a sort part is stored as the hash key alone; otherwise the
/// parts are joined with [`SEPARATOR`]. The hash part must not itself contain
/// the separator, which keeps the encoding reversible.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectKey {
    pub hash_key: String,
    pub sort_key: String,
}

impl ObjectKey {
    pub fn new(hash_key: impl Into<String>, sort_key: impl Into<String>) -> Self {
        Self {
            hash_key: hash_key.into(),
            sort_key: sort_key.into(),
        }
    }

    pub fn hash(hash_key: impl Into<String>) -> Self {
        Self::new(hash_key, "")
    }

    /// Split a storage key at the first separator.
    ///
    /// A key whose separator has nothing after it stays whole in the hash
    /// part, so `parse(k).to_key() == k` for every storage key.
    pub fn parse(key: &str) -> Self {
        match key.split_once(SEPARATOR) {
            Some((hash, sort)) if !sort.is_empty() => Self::new(hash, sort),
            _ => Self::hash(key),
        }
    }

    /// Storage key, without a leading `/`.
    pub fn to_key(&self) -> String {
        if self.sort_key.is_empty() {
            self.hash_key.clone()
        } else {
            format!("{}{}{}", self.hash_key, SEPARATOR, self.sort_key)
        }
    }

    /// File system path addressing this key.
    pub fn to_path(&self) -> String {
        format!("/{}", self.to_key())
    }

    pub fn is_empty(&self) -> bool {
        self.hash_key.is_empty() && self.sort_key.is_empty()
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_key())
    }
}
