//! In-Memory Object Store
//!
//! A complete, process-local implementation of all three storage contracts.
//! Multipart sessions are buffered until completion, so an aborted or
//! cancelled upload never becomes visible.

use crate::context::IoContext;
use crate::traits::{
    GetObjectOutput, HeadObjectOutput, ListPage, ObjectAttributes, ObjectStore, ObjectStoreError,
    ObjectSummary, UploadId, Uploader, UrlSigner,
};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use std::io::{Cursor, Read};
use std::ops::Bound;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

const DEFAULT_PART_SIZE: usize = 64 * 1024;

#[derive(Debug, Clone)]
struct StoredObject {
    data: Bytes,
    attributes: ObjectAttributes,
    last_modified: DateTime<Utc>,
}

#[derive(Debug, Clone)]
struct PendingUpload {
    key: String,
    attributes: ObjectAttributes,
}

/// Object store that keeps everything in process memory.
#[derive(Debug)]
pub struct MemoryObjectStore {
    bucket: String,
    objects: RwLock<BTreeMap<String, StoredObject>>,
    uploads: Mutex<HashMap<UploadId, PendingUpload>>,
    next_upload: AtomicU64,
    part_size: usize,
}

impl MemoryObjectStore {
    pub fn new(bucket: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            objects: RwLock::new(BTreeMap::new()),
            uploads: Mutex::new(HashMap::new()),
            next_upload: AtomicU64::new(1),
            part_size: DEFAULT_PART_SIZE,
        }
    }

    /// Size of the chunks `upload_parts` reads between cancellation checks.
    pub fn with_part_size(mut self, part_size: usize) -> Self {
        self.part_size = part_size.max(1);
        self
    }

    /// Store an object directly, bypassing the upload protocol.
    pub fn insert(&self, key: impl Into<String>, data: impl Into<Bytes>, attributes: ObjectAttributes) {
        self.write_objects().insert(
            key.into(),
            StoredObject {
                data: data.into(),
                attributes,
                last_modified: Utc::now(),
            },
        );
    }

    /// Bytes stored under `key`, if any.
    pub fn contents(&self, key: &str) -> Option<Bytes> {
        self.read_objects().get(key).map(|o| o.data.clone())
    }

    /// Attributes stored under `key`, if any.
    pub fn attributes(&self, key: &str) -> Option<ObjectAttributes> {
        self.read_objects().get(key).map(|o| o.attributes.clone())
    }

    pub fn len(&self) -> usize {
        self.read_objects().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read_objects().is_empty()
    }

    /// Number of upload sessions neither completed nor aborted.
    pub fn pending_uploads(&self) -> usize {
        self.lock_uploads().len()
    }

    // A panic while holding a guard leaves the maps structurally intact, so
    // poisoning is recovered from rather than propagated.
    fn read_objects(&self) -> RwLockReadGuard<'_, BTreeMap<String, StoredObject>> {
        self.objects.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write_objects(&self) -> RwLockWriteGuard<'_, BTreeMap<String, StoredObject>> {
        self.objects.write().unwrap_or_else(|e| e.into_inner())
    }

    fn lock_uploads(&self) -> MutexGuard<'_, HashMap<UploadId, PendingUpload>> {
        self.uploads.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn lookup(&self, key: &str) -> Result<StoredObject, ObjectStoreError> {
        self.read_objects()
            .get(key)
            .cloned()
            .ok_or_else(|| ObjectStoreError::NotFound(key.to_string()))
    }
}

impl ObjectStore for MemoryObjectStore {
    fn bucket(&self) -> &str {
        &self.bucket
    }

    fn head_object(&self, ctx: &IoContext, key: &str) -> Result<HeadObjectOutput, ObjectStoreError> {
        ctx.check("head object")?;
        let object = self.lookup(key)?;
        Ok(HeadObjectOutput {
            size: object.data.len() as u64,
            last_modified: Some(object.last_modified),
            attributes: object.attributes,
        })
    }

    fn get_object(&self, ctx: &IoContext, key: &str) -> Result<GetObjectOutput, ObjectStoreError> {
        ctx.check("get object")?;
        let object = self.lookup(key)?;
        Ok(GetObjectOutput {
            size: object.data.len() as u64,
            last_modified: Some(object.last_modified),
            attributes: object.attributes,
            body: Box::new(Cursor::new(object.data)),
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
        if max_keys == 0 {
            return Ok(ListPage::default());
        }

        let objects = self.read_objects();
        let lower = match start_after {
            Some(key) if key >= prefix => Bound::Excluded(key.to_string()),
            _ => Bound::Included(prefix.to_string()),
        };

        let mut page: Vec<ObjectSummary> = objects
            .range((lower, Bound::Unbounded))
            .take_while(|(key, _)| key.starts_with(prefix))
            .take(max_keys + 1)
            .map(|(key, object)| ObjectSummary {
                key: key.clone(),
                size: object.data.len() as u64,
                last_modified: Some(object.last_modified),
            })
            .collect();

        let next_marker = if page.len() > max_keys {
            page.truncate(max_keys);
            page.last().map(|o| o.key.clone())
        } else {
            None
        };

        Ok(ListPage {
            objects: page,
            next_marker,
        })
    }

    fn delete_object(&self, ctx: &IoContext, key: &str) -> Result<(), ObjectStoreError> {
        ctx.check("delete object")?;
        self.write_objects().remove(key);
        Ok(())
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
                "cross-bucket copy to {} is not supported by the memory store",
                target_bucket
            )));
        }
        let mut object = self.lookup(source_key)?;
        object.last_modified = Utc::now();
        self.write_objects().insert(target_key.to_string(), object);
        Ok(())
    }

    fn store_type(&self) -> &'static str {
        "memory"
    }
}

impl Uploader for MemoryObjectStore {
    fn begin_upload(
        &self,
        ctx: &IoContext,
        key: &str,
        attributes: &ObjectAttributes,
    ) -> Result<UploadId, ObjectStoreError> {
        ctx.check("create multipart upload")?;
        let id = UploadId(format!(
            "upload-{}",
            self.next_upload.fetch_add(1, Ordering::Relaxed)
        ));
        self.lock_uploads().insert(
            id.clone(),
            PendingUpload {
                key: key.to_string(),
                attributes: attributes.clone(),
            },
        );
        Ok(id)
    }

    fn upload_parts(
        &self,
        ctx: &IoContext,
        key: &str,
        upload_id: &UploadId,
        body: &mut dyn Read,
    ) -> Result<(), ObjectStoreError> {
        let mut data = Vec::new();
        let mut part = vec![0u8; self.part_size];

        loop {
            ctx.check("upload part")?;
            let n = body.read(&mut part)?;
            if n == 0 {
                break;
            }
            data.extend_from_slice(&part[..n]);
        }
        ctx.check("complete multipart upload")?;

        let pending = self
            .lock_uploads()
            .remove(upload_id)
            .ok_or_else(|| ObjectStoreError::NotFound(format!("upload {}", upload_id)))?;
        if pending.key != key {
            return Err(ObjectStoreError::InvalidPath(format!(
                "upload {} belongs to {}, not {}",
                upload_id, pending.key, key
            )));
        }

        self.insert(key, data, pending.attributes);
        Ok(())
    }

    fn abort_upload(
        &self,
        _ctx: &IoContext,
        _key: &str,
        upload_id: &UploadId,
    ) -> Result<(), ObjectStoreError> {
        self.lock_uploads()
            .remove(upload_id)
            .map(|_| ())
            .ok_or_else(|| ObjectStoreError::NotFound(format!("upload {}", upload_id)))
    }
}

impl UrlSigner for MemoryObjectStore {
    fn presign_get(&self, ctx: &IoContext, key: &str, ttl: Duration) -> Result<String, ObjectStoreError> {
        ctx.check("presign get")?;
        Ok(format!(
            "memory://{}/{}?method=GET&expires={}",
            self.bucket,
            key,
            ttl.as_secs()
        ))
    }

    fn presign_put(
        &self,
        ctx: &IoContext,
        key: &str,
        attributes: &ObjectAttributes,
        ttl: Duration,
    ) -> Result<String, ObjectStoreError> {
        ctx.check("presign put")?;
        let mut url = format!(
            "memory://{}/{}?method=PUT&expires={}",
            self.bucket,
            key,
            ttl.as_secs()
        );
        if let Some(content_type) = &attributes.content_type {
            url.push_str("&content-type=");
            url.push_str(content_type);
        }
        Ok(url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> IoContext {
        IoContext::new(Duration::from_secs(5))
    }

    #[test]
    fn test_upload_becomes_visible_on_completion() {
        let store = MemoryObjectStore::new("bucket").with_part_size(3);
        let attrs = ObjectAttributes {
            content_type: Some("text/plain".into()),
            ..Default::default()
        };

        let id = store.begin_upload(&ctx(), "a/b.txt", &attrs).unwrap();
        assert!(store.contents("a/b.txt").is_none());

        let mut body: &[u8] = b"hello world";
        store.upload_parts(&ctx(), "a/b.txt", &id, &mut body).unwrap();

        assert_eq!(store.contents("a/b.txt").unwrap().as_ref(), b"hello world");
        assert_eq!(store.attributes("a/b.txt").unwrap(), attrs);
        assert_eq!(store.pending_uploads(), 0);
    }

    #[test]
    fn test_cancelled_upload_is_not_completed() {
        let store = MemoryObjectStore::new("bucket");
        let ctx = ctx();
        let id = store
            .begin_upload(&ctx, "x", &ObjectAttributes::default())
            .unwrap();

        ctx.cancel();
        let mut body: &[u8] = b"data";
        let err = store.upload_parts(&ctx, "x", &id, &mut body).unwrap_err();
        assert!(matches!(err, ObjectStoreError::Canceled(_)));
        assert!(store.contents("x").is_none());

        store.abort_upload(&IoContext::new(Duration::from_secs(1)), "x", &id).unwrap();
        assert_eq!(store.pending_uploads(), 0);
    }

    #[test]
    fn test_list_pages_and_marker() {
        let store = MemoryObjectStore::new("bucket");
        for key in ["a/1", "a/2", "a/3", "b/1"] {
            store.insert(key, Bytes::from_static(b"x"), ObjectAttributes::default());
        }

        let first = store.list_objects(&ctx(), "a/", 2, None).unwrap();
        let keys: Vec<_> = first.objects.iter().map(|o| o.key.as_str()).collect();
        assert_eq!(keys, vec!["a/1", "a/2"]);
        assert_eq!(first.next_marker.as_deref(), Some("a/2"));

        let second = store.list_objects(&ctx(), "a/", 2, first.last_key()).unwrap();
        let keys: Vec<_> = second.objects.iter().map(|o| o.key.as_str()).collect();
        assert_eq!(keys, vec!["a/3"]);
        assert!(second.next_marker.is_none());
    }

    #[test]
    fn test_head_missing_object() {
        let store = MemoryObjectStore::new("bucket");
        let err = store.head_object(&ctx(), "missing").unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn test_copy_within_bucket() {
        let store = MemoryObjectStore::new("bucket");
        store.insert("src", Bytes::from_static(b"payload"), ObjectAttributes::default());

        store.copy_object(&ctx(), "src", "bucket", "dst").unwrap();
        assert_eq!(store.contents("dst").unwrap().as_ref(), b"payload");

        let err = store.copy_object(&ctx(), "src", "other", "dst").unwrap_err();
        assert!(matches!(err, ObjectStoreError::Configuration(_)));
    }
}
