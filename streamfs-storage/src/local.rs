//! Local Filesystem Object Store
//!
//! Implements the storage contracts on top of a directory tree. Object keys
//! map to files below the root; attributes live in a JSON sidecar tree and
//! uploads are staged before being renamed into place, so a key only ever
//! shows complete content.

use crate::context::IoContext;
use crate::traits::{
    GetObjectOutput, HeadObjectOutput, ListPage, ObjectAttributes, ObjectStore, ObjectStoreError,
    ObjectSummary, UploadId, Uploader,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::{Component, Path, PathBuf};
use tracing::debug;
use walkdir::WalkDir;

/// Directory below the root reserved for bookkeeping; never listed.
const INTERNAL_DIR: &str = ".streamfs";
const COPY_CHUNK: usize = 256 * 1024;

#[derive(Debug, Serialize, Deserialize)]
struct UploadSession {
    key: String,
    attributes: ObjectAttributes,
}

/// Local filesystem-based object store.
///
/// Useful for development, testing and single-node deployments.
#[derive(Debug, Clone)]
pub struct LocalObjectStore {
    root: PathBuf,
    bucket: String,
}

impl LocalObjectStore {
    /// Create a new LocalObjectStore with the given root directory.
    ///
    /// The bucket name defaults to the root directory's file name.
    pub fn new(root: impl AsRef<Path>) -> Result<Self, ObjectStoreError> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(root.join(INTERNAL_DIR).join("meta"))?;
        fs::create_dir_all(root.join(INTERNAL_DIR).join("uploads"))?;
        let bucket = root
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "local".to_string());
        Ok(Self { root, bucket })
    }

    /// Override the bucket name reported to callers.
    pub fn with_bucket(mut self, bucket: impl Into<String>) -> Self {
        self.bucket = bucket.into();
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn object_path(&self, key: &str) -> Result<PathBuf, ObjectStoreError> {
        validate_key(key)?;
        Ok(self.root.join(key))
    }

    fn sidecar_path(&self, key: &str) -> PathBuf {
        self.root
            .join(INTERNAL_DIR)
            .join("meta")
            .join(format!("{}.json", key))
    }

    fn upload_paths(&self, upload_id: &UploadId) -> (PathBuf, PathBuf) {
        let dir = self.root.join(INTERNAL_DIR).join("uploads");
        (
            dir.join(format!("{}.part", upload_id)),
            dir.join(format!("{}.json", upload_id)),
        )
    }

    fn read_attributes(&self, key: &str) -> Result<ObjectAttributes, ObjectStoreError> {
        match fs::read(self.sidecar_path(key)) {
            Ok(bytes) => serde_json::from_slice(&bytes)
                .map_err(|e| ObjectStoreError::Serialization(e.to_string())),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(ObjectAttributes::default()),
            Err(e) => Err(e.into()),
        }
    }

    fn write_attributes(&self, key: &str, attributes: &ObjectAttributes) -> Result<(), ObjectStoreError> {
        let path = self.sidecar_path(key);
        if attributes.is_empty() {
            return remove_if_exists(&path);
        }
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_vec_pretty(attributes)
            .map_err(|e| ObjectStoreError::Serialization(e.to_string()))?;
        fs::write(path, json)?;
        Ok(())
    }

    /// Deepest directory that can contain keys starting with `prefix`.
    fn walk_root(&self, prefix: &str) -> PathBuf {
        match prefix.rfind('/') {
            Some(idx) => self.root.join(&prefix[..idx]),
            None => self.root.clone(),
        }
    }

    fn key_of(&self, path: &Path) -> Result<String, ObjectStoreError> {
        let relative = path
            .strip_prefix(&self.root)
            .map_err(|e| ObjectStoreError::InvalidPath(e.to_string()))?;
        Ok(relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/"))
    }
}

/// Keys must be relative, non-empty and free of `.`/`..` segments.
fn validate_key(key: &str) -> Result<(), ObjectStoreError> {
    let clean = !key.is_empty()
        && !key.ends_with('/')
        && Path::new(key)
            .components()
            .all(|c| matches!(c, Component::Normal(_)))
        && !key.split('/').any(|s| s.is_empty() || s == INTERNAL_DIR);
    if clean {
        Ok(())
    } else {
        Err(ObjectStoreError::InvalidPath(key.to_string()))
    }
}

fn remove_if_exists(path: &Path) -> Result<(), ObjectStoreError> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

fn map_io(key: &str, err: io::Error) -> ObjectStoreError {
    match err.kind() {
        io::ErrorKind::NotFound => ObjectStoreError::NotFound(key.to_string()),
        io::ErrorKind::PermissionDenied => ObjectStoreError::PermissionDenied(key.to_string()),
        _ => ObjectStoreError::Io(err),
    }
}

fn modified_time(metadata: &fs::Metadata) -> Option<DateTime<Utc>> {
    metadata.modified().ok().map(DateTime::<Utc>::from)
}

impl ObjectStore for LocalObjectStore {
    fn bucket(&self) -> &str {
        &self.bucket
    }

    fn head_object(&self, ctx: &IoContext, key: &str) -> Result<HeadObjectOutput, ObjectStoreError> {
        ctx.check("head object")?;
        let path = self.object_path(key)?;
        let metadata = fs::metadata(&path).map_err(|e| map_io(key, e))?;
        if !metadata.is_file() {
            return Err(ObjectStoreError::NotFound(key.to_string()));
        }
        Ok(HeadObjectOutput {
            size: metadata.len(),
            last_modified: modified_time(&metadata),
            attributes: self.read_attributes(key)?,
        })
    }

    fn get_object(&self, ctx: &IoContext, key: &str) -> Result<GetObjectOutput, ObjectStoreError> {
        ctx.check("get object")?;
        let path = self.object_path(key)?;
        let file = File::open(&path).map_err(|e| map_io(key, e))?;
        let metadata = file.metadata()?;
        if !metadata.is_file() {
            return Err(ObjectStoreError::NotFound(key.to_string()));
        }
        Ok(GetObjectOutput {
            size: metadata.len(),
            last_modified: modified_time(&metadata),
            attributes: self.read_attributes(key)?,
            body: Box::new(file),
        })
    }

    fn list_objects(
        &self,
        ctx: &IoContext,
        prefix: &str,
        max_keys: usize,
        start_after: Option<&str>,
    ) -> Result<ListPage, ObjectStoreError> {
        ctx.check("list objects")?;
        let walk_root = self.walk_root(prefix);
        if max_keys == 0 || !walk_root.is_dir() {
            return Ok(ListPage::default());
        }

        let internal = self.root.join(INTERNAL_DIR);
        let mut keys = Vec::new();
        for entry in WalkDir::new(&walk_root)
            .min_depth(1)
            .into_iter()
            .filter_entry(|e| e.path() != internal.as_path())
        {
            let entry = entry.map_err(|e| ObjectStoreError::Io(e.into()))?;
            if !entry.file_type().is_file() {
                continue;
            }
            let key = self.key_of(entry.path())?;
            let after_cursor = start_after.map_or(true, |s| key.as_str() > s);
            if key.starts_with(prefix) && after_cursor {
                keys.push((key, entry.path().to_path_buf()));
            }
        }
        // S3 lists in byte order of the full key, not per path component
        keys.sort_by(|a, b| a.0.cmp(&b.0));

        let more = keys.len() > max_keys;
        keys.truncate(max_keys);

        let mut objects = Vec::with_capacity(keys.len());
        for (key, path) in keys {
            let metadata = fs::metadata(&path)?;
            objects.push(ObjectSummary {
                key,
                size: metadata.len(),
                last_modified: modified_time(&metadata),
            });
        }
        let next_marker = if more {
            objects.last().map(|o| o.key.clone())
        } else {
            None
        };
        Ok(ListPage {
            objects,
            next_marker,
        })
    }

    fn delete_object(&self, ctx: &IoContext, key: &str) -> Result<(), ObjectStoreError> {
        ctx.check("delete object")?;
        let path = self.object_path(key)?;
        remove_if_exists(&path)?;
        remove_if_exists(&self.sidecar_path(key))
    }

    fn copy_object(
        &self,
        ctx: &IoContext,
        source_key: &str,
        target_bucket: &str,
        target_key: &str,
    ) -> Result<(), ObjectStoreError> {
        ctx.check("copy object")?;
        if target_bucket != self.bucket {
            return Err(ObjectStoreError::Configuration(format!(
                "cross-bucket copy to {} is not supported by the local store",
                target_bucket
            )));
        }
        let src = self.object_path(source_key)?;
        let dst = self.object_path(target_key)?;
        if let Some(parent) = dst.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::copy(&src, &dst).map_err(|e| map_io(source_key, e))?;
        let attributes = self.read_attributes(source_key)?;
        self.write_attributes(target_key, &attributes)
    }

    fn store_type(&self) -> &'static str {
        "local"
    }
}

impl Uploader for LocalObjectStore {
    fn begin_upload(
        &self,
        ctx: &IoContext,
        key: &str,
        attributes: &ObjectAttributes,
    ) -> Result<UploadId, ObjectStoreError> {
        ctx.check("create multipart upload")?;
        validate_key(key)?;
        let upload_id = UploadId::new(uuid::Uuid::new_v4().to_string());
        let (_, session_path) = self.upload_paths(&upload_id);
        let session = UploadSession {
            key: key.to_string(),
            attributes: attributes.clone(),
        };
        let json = serde_json::to_vec(&session)
            .map_err(|e| ObjectStoreError::Serialization(e.to_string()))?;
        fs::write(session_path, json)?;
        debug!(key, %upload_id, "local upload session opened");
        Ok(upload_id)
    }

    fn upload_parts(
        &self,
        ctx: &IoContext,
        key: &str,
        upload_id: &UploadId,
        body: &mut dyn Read,
    ) -> Result<(), ObjectStoreError> {
        let (part_path, session_path) = self.upload_paths(upload_id);
        let session: UploadSession = match fs::read(&session_path) {
            Ok(bytes) => serde_json::from_slice(&bytes)
                .map_err(|e| ObjectStoreError::Serialization(e.to_string()))?,
            Err(e) => return Err(map_io(&format!("upload {}", upload_id), e)),
        };
        if session.key != key {
            return Err(ObjectStoreError::InvalidPath(format!(
                "upload {} belongs to {}, not {}",
                upload_id, session.key, key
            )));
        }

        let mut staged = File::create(&part_path)?;
        let mut chunk = vec![0u8; COPY_CHUNK];
        loop {
            ctx.check("upload part")?;
            let n = body.read(&mut chunk)?;
            if n == 0 {
                break;
            }
            staged.write_all(&chunk[..n])?;
        }
        staged.sync_all()?;
        drop(staged);
        ctx.check("complete multipart upload")?;

        let dst = self.object_path(key)?;
        if let Some(parent) = dst.parent() {
            fs::create_dir_all(parent)?;
        }
        self.write_attributes(key, &session.attributes)?;
        fs::rename(&part_path, &dst)?;
        remove_if_exists(&session_path)?;
        Ok(())
    }

    fn abort_upload(
        &self,
        _ctx: &IoContext,
        _key: &str,
        upload_id: &UploadId,
    ) -> Result<(), ObjectStoreError> {
        let (part_path, session_path) = self.upload_paths(upload_id);
        if !session_path.exists() {
            return Err(ObjectStoreError::NotFound(format!("upload {}", upload_id)));
        }
        remove_if_exists(&part_path)?;
        remove_if_exists(&session_path)
    }
}
