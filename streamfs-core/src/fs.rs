//! File System Facade
//!
//! [`FileSystem`] mounts one bucket and exposes open, create, stat, readdir,
//! glob, remove, copy and wait over it. Descriptors share one set of storage
//! collaborators, one codec and one configuration.

use crate::codec::{Attributes, Codec};
use crate::config::FileSystemConfig;
use crate::dir;
use crate::error::FsError;
use crate::info::ObjectInfo;
use crate::path::{
    is_valid_dir, object_key, require_valid_dir, require_valid_file, require_valid_path,
};
use crate::reader::{DirStream, OpenFile, ReadStream};
use crate::seq::Seq;
use crate::writer::WriteStream;
use regex::Regex;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;
use streamfs_storage::{IoContext, ObjectAttributes, ObjectStore, ObjectStoreError, Uploader, UrlSigner};
use tracing::{debug, instrument, warn};

/// Separates the directory from the name filter in a glob pattern.
pub const GLOB_DELIMITER: char = '|';

/// State shared by a file system and all of its descriptors.
pub(crate) struct Shared<T> {
    pub(crate) store: Arc<dyn ObjectStore>,
    pub(crate) uploader: Arc<dyn Uploader>,
    pub(crate) signer: Option<Arc<dyn UrlSigner>>,
    pub(crate) codec: Codec<T>,
    pub(crate) config: FileSystemConfig,
}

impl<T: Attributes> Shared<T> {
    pub(crate) fn io_context(&self) -> IoContext {
        IoContext::new(self.config.io_timeout())
    }

    /// Pre-signed URLs are produced only when both a signer and a URL field exist.
    pub(crate) fn signs_urls(&self) -> bool {
        self.signer.is_some() && self.codec.has_presigned_url()
    }

    fn signer(&self, path: &str) -> Result<&Arc<dyn UrlSigner>, FsError> {
        self.signer.as_ref().ok_or_else(|| {
            FsError::Configuration(format!("presign {}: no url signer configured", path))
        })
    }

    pub(crate) fn presign_get(&self, path: &str, ttl: Duration) -> Result<String, FsError> {
        self.signer(path)?
            .presign_get(&self.io_context(), object_key(path), ttl)
            .map_err(|e| FsError::from_store("presign", path, e))
    }

    pub(crate) fn presign_put(&self, path: &str, attributes: &ObjectAttributes) -> Result<String, FsError> {
        self.signer(path)?
            .presign_put(
                &self.io_context(),
                object_key(path),
                attributes,
                self.config.presign_ttl(),
            )
            .map_err(|e| FsError::from_store("presign", path, e))
    }

    /// Record a GET URL in `attributes`; failures are logged and skipped.
    pub(crate) fn attach_get_url(&self, path: &str, attributes: &mut T) {
        match self.presign_get(path, self.config.presign_ttl()) {
            Ok(url) => self.codec.set_presigned_url(attributes, url),
            Err(err) => warn!(path, error = %err, "presign get failed"),
        }
    }
}

/// Streaming file system over one object storage bucket.
///
/// `T` is the typed metadata attached to objects; `()` carries none.
pub struct FileSystem<T: Attributes = ()> {
    shared: Arc<Shared<T>>,
}

impl<T: Attributes> Clone for FileSystem<T> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

impl<T: Attributes> fmt::Debug for FileSystem<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileSystem")
            .field("bucket", &self.shared.store.bucket())
            .field("store", &self.shared.store.store_type())
            .field("signer", &self.shared.signer.is_some())
            .field("config", &self.shared.config)
            .finish()
    }
}

impl<T: Attributes> FileSystem<T> {
    /// Mount a backend that provides both reads and uploads, with default configuration.
    pub fn new<B>(backend: B) -> Self
    where
        B: ObjectStore + Uploader + 'static,
    {
        let backend = Arc::new(backend);
        Self::from_shared(Shared {
            store: backend.clone(),
            uploader: backend,
            signer: None,
            codec: Codec::new(),
            config: FileSystemConfig::default(),
        })
    }

    pub fn builder() -> FileSystemBuilder<T> {
        FileSystemBuilder::new()
    }

    fn from_shared(shared: Shared<T>) -> Self {
        Self {
            shared: Arc::new(shared),
        }
    }

    pub fn bucket(&self) -> &str {
        self.shared.store.bucket()
    }

    pub fn config(&self) -> &FileSystemConfig {
        &self.shared.config
    }

    /// Open a file for reading, or a directory for listing.
    ///
    /// No network call is made; a missing file is reported on first read or stat.
    #[instrument(skip(self))]
    pub fn open(&self, path: &str) -> Result<OpenFile<T>, FsError> {
        require_valid_path("open", path)?;
        if is_valid_dir(path) {
            return Ok(OpenFile::Dir(DirStream::new(self.shared.clone(), path)));
        }
        Ok(OpenFile::File(ReadStream::new(self.shared.clone(), path)))
    }

    /// Start writing a file. Nothing is stored until the stream is closed.
    #[instrument(skip(self, attributes))]
    pub fn create(&self, path: &str, attributes: T) -> Result<WriteStream<T>, FsError> {
        require_valid_file("create", path)?;
        Ok(WriteStream::new(self.shared.clone(), path, attributes))
    }

    /// Metadata of a file, or a directory descriptor for directory paths.
    #[instrument(skip(self))]
    pub fn stat(&self, path: &str) -> Result<ObjectInfo<T>, FsError> {
        require_valid_path("stat", path)?;
        if is_valid_dir(path) {
            return Ok(ObjectInfo::directory(path));
        }

        let head = self
            .shared
            .store
            .head_object(&self.shared.io_context(), object_key(path))
            .map_err(|e| FsError::from_store("stat", path, e))?;

        let mut attributes = self.shared.codec.decode_head(&head);
        if self.shared.signs_urls() {
            self.shared.attach_get_url(path, &mut attributes);
        }
        let mut info = ObjectInfo::file(path);
        info.set_stat(head.size, head.last_modified);
        info.set_attributes(attributes);
        Ok(info)
    }

    /// Typed attributes of a stat result.
    pub fn attributes<'a>(&self, info: &'a ObjectInfo<T>) -> Option<&'a T> {
        info.attributes()
    }

    /// Every entry below a directory, named relative to it.
    #[instrument(skip(self))]
    pub fn read_dir(&self, path: &str) -> Result<Vec<ObjectInfo<T>>, FsError> {
        require_valid_dir("readdir", path)?;
        dir::read_all(&self.shared, path)
    }

    /// Names of entries in a directory, optionally filtered by a regular expression.
    ///
    /// The pattern is `<dir>` or `<dir>|<regex>`, e.g. `/logs/|\.json$`.
    #[instrument(skip(self))]
    pub fn glob(&self, pattern: &str) -> Result<Vec<String>, FsError> {
        let (dir_path, filter) = match pattern.split_once(GLOB_DELIMITER) {
            Some((dir_path, expr)) => {
                let regex = Regex::new(expr).map_err(|source| FsError::InvalidPattern {
                    pattern: pattern.to_string(),
                    source,
                })?;
                (dir_path, Some(regex))
            }
            None => (pattern, None),
        };

        Ok(self
            .read_dir(dir_path)?
            .into_iter()
            .map(|entry| entry.name().to_string())
            .filter(|name| filter.as_ref().map_or(true, |re| re.is_match(name)))
            .collect())
    }

    #[instrument(skip(self))]
    pub fn remove(&self, path: &str) -> Result<(), FsError> {
        require_valid_file("remove", path)?;
        self.shared
            .store
            .delete_object(&self.shared.io_context(), object_key(path))
            .map_err(|e| FsError::from_store("remove", path, e))
    }

    /// Copy a file to an absolute `s3://bucket/key` location.
    #[instrument(skip(self))]
    pub fn copy(&self, source: &str, target: &str) -> Result<(), FsError> {
        require_valid_file("copy", source)?;
        let (bucket, key) = parse_target(target)?;
        debug!(bucket, key, "copying object");
        self.shared
            .store
            .copy_object(&self.shared.io_context(), object_key(source), bucket, key)
            .map_err(|e| FsError::from_store("copy", source, e))
    }

    /// Block until the file exists, or fail with `Timeout` after `timeout`.
    #[instrument(skip(self))]
    pub fn wait(&self, path: &str, timeout: Duration) -> Result<(), FsError> {
        require_valid_file("wait", path)?;
        match self.shared.store.wait_until_exists(object_key(path), timeout) {
            Ok(()) => Ok(()),
            Err(ObjectStoreError::Timeout(_)) => Err(FsError::Timeout {
                path: path.to_string(),
                timeout,
            }),
            Err(err) => Err(FsError::from_store("wait", path, err)),
        }
    }

    /// Lazy cursor over the keys that start with `prefix`.
    ///
    /// The prefix is a path or a partial path; `/` matches every key.
    #[instrument(skip(self))]
    pub fn matching(&self, prefix: &str) -> Result<Seq, FsError> {
        if prefix != "/" && !prefix.is_empty() {
            let base = prefix.trim_end_matches('/');
            require_valid_path("match", base)?;
        }
        Ok(Seq::new(
            self.shared.store.clone(),
            self.shared.config.io_timeout(),
            object_key(prefix),
            self.shared.config.list_limit,
        ))
    }

    /// Pre-signed GET URL for a file.
    #[instrument(skip(self))]
    pub fn get_url(&self, path: &str, ttl: Duration) -> Result<String, FsError> {
        require_valid_file("geturl", path)?;
        self.shared.presign_get(path, ttl)
    }

    /// Pre-signed PUT URL for a file, bound to the given attributes.
    #[instrument(skip(self, attributes))]
    pub fn put_url(&self, path: &str, attributes: &T, ttl: Duration) -> Result<String, FsError> {
        require_valid_file("puturl", path)?;
        let wire = self.shared.codec.encode(attributes);
        self.shared
            .signer(path)?
            .presign_put(&self.shared.io_context(), object_key(path), &wire, ttl)
            .map_err(|e| FsError::from_store("puturl", path, e))
    }
}

#[cfg(feature = "s3")]
impl<T: Attributes> FileSystem<T> {
    /// Mount an S3 bucket with credentials from the environment.
    pub fn mount_s3(bucket: impl Into<String>) -> Result<Self, FsError> {
        let store = streamfs_storage::S3ObjectStore::new(bucket)
            .map_err(|e| FsError::Configuration(e.to_string()))?;
        Self::builder()
            .with_backend(Arc::new(store.clone()))
            .with_signer(Arc::new(store))
            .with_config(FileSystemConfig::from_env_or_default()?)
            .build()
    }
}

/// Split `s3://bucket/key` into its bucket and key.
fn parse_target(target: &str) -> Result<(&str, &str), FsError> {
    let rest = target
        .strip_prefix("s3://")
        .ok_or_else(|| FsError::invalid("copy", target))?;
    match rest.split_once('/') {
        Some((bucket, key)) if !bucket.is_empty() && !key.is_empty() && !key.ends_with('/') => {
            Ok((bucket, key))
        }
        _ => Err(FsError::invalid("copy", target)),
    }
}

/// Assembles a [`FileSystem`] from storage collaborators and configuration.
pub struct FileSystemBuilder<T: Attributes> {
    store: Option<Arc<dyn ObjectStore>>,
    uploader: Option<Arc<dyn Uploader>>,
    signer: Option<Arc<dyn UrlSigner>>,
    config: FileSystemConfig,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Attributes> Default for FileSystemBuilder<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Attributes> FileSystemBuilder<T> {
    pub fn new() -> Self {
        Self {
            store: None,
            uploader: None,
            signer: None,
            config: FileSystemConfig::default(),
            _marker: PhantomData,
        }
    }

    /// Use one backend for both reads and uploads.
    pub fn with_backend<B>(self, backend: Arc<B>) -> Self
    where
        B: ObjectStore + Uploader + 'static,
    {
        self.with_store(backend.clone()).with_uploader(backend)
    }

    pub fn with_store<S: ObjectStore + 'static>(mut self, store: Arc<S>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_uploader<U: Uploader + 'static>(mut self, uploader: Arc<U>) -> Self {
        self.uploader = Some(uploader);
        self
    }

    pub fn with_signer<S: UrlSigner + 'static>(mut self, signer: Arc<S>) -> Self {
        self.signer = Some(signer);
        self
    }

    pub fn with_config(mut self, config: FileSystemConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_io_timeout(mut self, timeout: Duration) -> Self {
        self.config.io_timeout_secs = timeout.as_secs().max(1);
        self
    }

    pub fn with_presign_ttl(mut self, ttl: Duration) -> Self {
        self.config.presign_ttl_secs = ttl.as_secs();
        self
    }

    pub fn with_list_limit(mut self, limit: usize) -> Self {
        self.config.list_limit = limit;
        self
    }

    pub fn build(self) -> Result<FileSystem<T>, FsError> {
        self.config.validate()?;
        let store = self
            .store
            .ok_or_else(|| FsError::Configuration("no object store configured".into()))?;
        let uploader = self
            .uploader
            .ok_or_else(|| FsError::Configuration("no uploader configured".into()))?;
        let codec = Codec::new();
        if codec.has_presigned_url() && self.signer.is_none() {
            debug!("attribute type takes pre-signed urls but no signer is configured");
        }
        Ok(FileSystem::from_shared(Shared {
            store,
            uploader,
            signer: self.signer,
            codec,
            config: self.config,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::PreSignedUrl;
    use streamfs_storage::MemoryObjectStore;

    #[test]
    fn test_parse_target() {
        assert_eq!(parse_target("s3://bucket/a/b.txt").unwrap(), ("bucket", "a/b.txt"));
        for bad in ["bucket/a", "s3://bucket", "s3://bucket/", "s3:///a", "s3://b/dir/"] {
            assert!(parse_target(bad).unwrap_err().is_invalid_argument(), "{bad}");
        }
    }

    #[test]
    fn test_builder_requires_store() {
        let err = FileSystem::<()>::builder().build().unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::Configuration);

        let err = FileSystem::<()>::builder()
            .with_backend(Arc::new(MemoryObjectStore::new("b")))
            .with_list_limit(0)
            .build()
            .unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::Configuration);
    }

    #[test]
    fn test_builder_is_typed_by_attributes() {
        let fs: FileSystem<crate::SystemMetadata> = FileSystemBuilder::default()
            .with_backend(Arc::new(MemoryObjectStore::new("typed")))
            .build()
            .unwrap();
        assert_eq!(fs.bucket(), "typed");
    }

    #[test]
    fn test_new_uses_defaults() {
        let fs: FileSystem = FileSystem::new(MemoryObjectStore::new("bucket"));
        assert_eq!(fs.bucket(), "bucket");
        assert_eq!(fs.config().list_limit, 1000);
    }

    #[test]
    fn test_urls_need_a_signer() {
        let fs: FileSystem<PreSignedUrl> = FileSystem::new(MemoryObjectStore::new("bucket"));
        let err = fs.get_url("/a.txt", Duration::from_secs(60)).unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::Configuration);
    }

    #[test]
    fn test_stat_directory_skips_network() {
        let store = Arc::new(MemoryObjectStore::new("bucket"));
        let fs = FileSystem::<()>::builder()
            .with_backend(store)
            .build()
            .unwrap();
        let info = fs.stat("/nothing/here/").unwrap();
        assert!(info.is_dir());
        assert_eq!(info.name(), "/nothing/here/");
    }
}
