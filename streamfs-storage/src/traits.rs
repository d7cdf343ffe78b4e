//! Object Store Trait Definitions
//!
//! Defines the capability contracts a storage backend provides to the
//! streaming file system: point reads, listing, deletes and copies
//! (`ObjectStore`), chunked uploads (`Uploader`) and pre-signed URLs
//! (`UrlSigner`).

use crate::context::IoContext;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::io::Read;
use std::time::Duration;
use thiserror::Error;

/// Errors that can occur during object store operations.
#[derive(Debug, Error)]
pub enum ObjectStoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Object not found: {0}")]
    NotFound(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Provider error: {0}")]
    Provider(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Invalid path: {0}")]
    InvalidPath(String),

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("Canceled: {0}")]
    Canceled(String),
}

impl ObjectStoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, ObjectStoreError::NotFound(_))
    }
}

/// Well-known attributes plus user metadata, in the shape the wire expects.
///
/// Absent attributes are `None`; they are never sent as empty strings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectAttributes {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_control: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_encoding: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_language: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub etag: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_modified: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_class: Option<String>,
    /// User metadata; keys are lower-case.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, String>,
}

impl ObjectAttributes {
    pub fn is_empty(&self) -> bool {
        *self == ObjectAttributes::default()
    }
}

/// Result of a metadata-only lookup.
#[derive(Debug, Clone)]
pub struct HeadObjectOutput {
    pub size: u64,
    pub last_modified: Option<DateTime<Utc>>,
    pub attributes: ObjectAttributes,
}

/// Result of opening an object for reading.
pub struct GetObjectOutput {
    /// Blocking byte source; dropping it releases the connection.
    pub body: Box<dyn Read + Send>,
    pub size: u64,
    pub last_modified: Option<DateTime<Utc>>,
    pub attributes: ObjectAttributes,
}

impl fmt::Debug for GetObjectOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GetObjectOutput")
            .field("body", &"Read")
            .field("size", &self.size)
            .field("last_modified", &self.last_modified)
            .field("attributes", &self.attributes)
            .finish()
    }
}

/// One key returned by a listing call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectSummary {
    pub key: String,
    pub size: u64,
    pub last_modified: Option<DateTime<Utc>>,
}

/// One page of a prefix listing.
#[derive(Debug, Clone, Default)]
pub struct ListPage {
    /// Keys in lexicographic order.
    pub objects: Vec<ObjectSummary>,
    /// Continuation marker; `None` once the listing is exhausted.
    pub next_marker: Option<String>,
}

impl ListPage {
    pub fn key_count(&self) -> usize {
        self.objects.len()
    }

    pub fn last_key(&self) -> Option<&str> {
        self.objects.last().map(|o| o.key.as_str())
    }
}

/// Handle of an in-flight multipart upload.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct UploadId(pub String);

impl UploadId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UploadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Point reads, listing, deletes and copies against one bucket.
///
/// Keys never carry a leading `/`. Every call is bounded by the deadline of
/// the supplied [`IoContext`] and observes its cancellation flag.
pub trait ObjectStore: Send + Sync {
    /// Name of the bucket this store is bound to.
    fn bucket(&self) -> &str;

    /// Fetch size, timestamps and attributes of an object.
    fn head_object(&self, ctx: &IoContext, key: &str) -> Result<HeadObjectOutput, ObjectStoreError>;

    /// Open an object for streaming reads.
    fn get_object(&self, ctx: &IoContext, key: &str) -> Result<GetObjectOutput, ObjectStoreError>;

    /// List at most `max_keys` keys beginning with `prefix`, strictly after `start_after`.
    fn list_objects(
        &self,
        ctx: &IoContext,
        prefix: &str,
        max_keys: usize,
        start_after: Option<&str>,
    ) -> Result<ListPage, ObjectStoreError>;

    /// Delete an object. Deleting an absent key is not an error.
    fn delete_object(&self, ctx: &IoContext, key: &str) -> Result<(), ObjectStoreError>;

    /// Copy an object of this bucket to `target_bucket/target_key`.
    fn copy_object(
        &self,
        ctx: &IoContext,
        source_key: &str,
        target_bucket: &str,
        target_key: &str,
    ) -> Result<(), ObjectStoreError>;

    /// Poll until the key exists or `timeout` elapses.
    fn wait_until_exists(&self, key: &str, timeout: Duration) -> Result<(), ObjectStoreError> {
        crate::wait::poll_until_exists(self, key, timeout, &crate::wait::PollConfig::default())
    }

    /// Get the name/type of this object store for logging.
    fn store_type(&self) -> &'static str;
}

/// Chunked (multipart) uploads.
pub trait Uploader: Send + Sync {
    /// Open an upload session for `key`, carrying the attributes to store.
    fn begin_upload(
        &self,
        ctx: &IoContext,
        key: &str,
        attributes: &ObjectAttributes,
    ) -> Result<UploadId, ObjectStoreError>;

    /// Stream `body` to end-of-input into the session and complete it.
    ///
    /// The object becomes visible only when this returns `Ok`. If `ctx` is
    /// cancelled the session must not be completed.
    fn upload_parts(
        &self,
        ctx: &IoContext,
        key: &str,
        upload_id: &UploadId,
        body: &mut dyn Read,
    ) -> Result<(), ObjectStoreError>;

    /// Discard an upload session and any parts already sent.
    fn abort_upload(
        &self,
        ctx: &IoContext,
        key: &str,
        upload_id: &UploadId,
    ) -> Result<(), ObjectStoreError>;
}

/// Time-limited URLs granting one read or write without credentials.
pub trait UrlSigner: Send + Sync {
    fn presign_get(&self, ctx: &IoContext, key: &str, ttl: Duration) -> Result<String, ObjectStoreError>;

    fn presign_put(
        &self,
        ctx: &IoContext,
        key: &str,
        attributes: &ObjectAttributes,
        ttl: Duration,
    ) -> Result<String, ObjectStoreError>;
}
