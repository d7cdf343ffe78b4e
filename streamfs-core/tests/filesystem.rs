use chrono::{TimeZone, Utc};
use std::io::{self, Read, Write};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use streamfs_core::{
    Attributes, ErrorKind, FileSystem, FsError, ObjectKey, PreSignedUrl, SchemaBuilder,
    SystemAttr, SystemMetadata,
};
use streamfs_storage::{
    GetObjectOutput, HeadObjectOutput, IoContext, ListPage, LocalObjectStore, MemoryObjectStore,
    ObjectAttributes, ObjectStore, ObjectStoreError, UploadId, Uploader,
};
use tempfile::TempDir;

fn memory_fs(list_limit: usize) -> (Arc<MemoryObjectStore>, FileSystem) {
    let store = Arc::new(MemoryObjectStore::new("bucket"));
    let fs = FileSystem::builder()
        .with_backend(store.clone())
        .with_list_limit(list_limit)
        .build()
        .unwrap();
    (store, fs)
}

fn put(store: &MemoryObjectStore, key: &str, data: &str) {
    store.insert(key, data.as_bytes().to_vec(), ObjectAttributes::default());
}

fn read_all(fs: &FileSystem, path: &str) -> io::Result<String> {
    let mut out = String::new();
    fs.open(path).unwrap().read_to_string(&mut out)?;
    Ok(out)
}

/// Memory store that can fail uploads and counts listing and download calls.
struct FlakyStore {
    inner: MemoryObjectStore,
    fail_uploads: AtomicBool,
    list_calls: AtomicUsize,
    get_calls: AtomicUsize,
}

impl FlakyStore {
    fn new() -> Self {
        Self {
            inner: MemoryObjectStore::new("bucket"),
            fail_uploads: AtomicBool::new(false),
            list_calls: AtomicUsize::new(0),
            get_calls: AtomicUsize::new(0),
        }
    }
}

impl ObjectStore for FlakyStore {
    fn bucket(&self) -> &str {
        self.inner.bucket()
    }

    fn head_object(&self, ctx: &IoContext, key: &str) -> Result<HeadObjectOutput, ObjectStoreError> {
        self.inner.head_object(ctx, key)
    }

    fn get_object(&self, ctx: &IoContext, key: &str) -> Result<GetObjectOutput, ObjectStoreError> {
        self.get_calls.fetch_add(1, Ordering::SeqCst);
        self.inner.get_object(ctx, key)
    }

    fn list_objects(
        &self,
        ctx: &IoContext,
        prefix: &str,
        max_keys: usize,
        start_after: Option<&str>,
    ) -> Result<ListPage, ObjectStoreError> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        self.inner.list_objects(ctx, prefix, max_keys, start_after)
    }

    fn delete_object(&self, ctx: &IoContext, key: &str) -> Result<(), ObjectStoreError> {
        self.inner.delete_object(ctx, key)
    }

    fn copy_object(
        &self,
        ctx: &IoContext,
        source_key: &str,
        target_bucket: &str,
        target_key: &str,
    ) -> Result<(), ObjectStoreError> {
        self.inner.copy_object(ctx, source_key, target_bucket, target_key)
    }

    fn store_type(&self) -> &'static str {
        "flaky"
    }
}

impl Uploader for FlakyStore {
    fn begin_upload(
        &self,
        ctx: &IoContext,
        key: &str,
        attributes: &ObjectAttributes,
    ) -> Result<UploadId, ObjectStoreError> {
        self.inner.begin_upload(ctx, key, attributes)
    }

    fn upload_parts(
        &self,
        ctx: &IoContext,
        key: &str,
        upload_id: &UploadId,
        body: &mut dyn Read,
    ) -> Result<(), ObjectStoreError> {
        if self.fail_uploads.load(Ordering::SeqCst) {
            return Err(ObjectStoreError::Network("connection reset".into()));
        }
        self.inner.upload_parts(ctx, key, upload_id, body)
    }

    fn abort_upload(
        &self,
        ctx: &IoContext,
        key: &str,
        upload_id: &UploadId,
    ) -> Result<(), ObjectStoreError> {
        self.inner.abort_upload(ctx, key, upload_id)
    }
}

#[test]
fn test_scenario_write_then_read() {
    let (_, fs) = memory_fs(1000);

    let mut file = fs.create("/a/b.txt", ()).unwrap();
    file.write_all(b"hello").unwrap();
    file.close().unwrap();

    assert_eq!(read_all(&fs, "/a/b.txt").unwrap(), "hello");
    assert_eq!(fs.stat("/a/b.txt").unwrap().size(), 5);
}

#[test]
fn test_scenario_read_dir_names_are_relative() {
    let (store, fs) = memory_fs(1000);
    for key in ["a/1", "a/2", "a/3"] {
        put(&store, key, "x");
    }

    let entries = fs.read_dir("/a/").unwrap();
    let names: Vec<&str> = entries.iter().map(|e| e.name()).collect();
    assert_eq!(names, vec!["1", "2", "3"]);
    assert!(entries.iter().all(|e| !e.is_dir()));
}

#[test]
fn test_scenario_missing_file_fails_on_read() {
    let (_, fs) = memory_fs(1000);
    let mut file = fs.open("/missing.txt").unwrap();

    let mut out = Vec::new();
    let err = file.read_to_end(&mut out).unwrap_err();
    assert_eq!(err.kind(), io::ErrorKind::NotFound);
    assert!(FsError::from_io(&err).unwrap().is_not_exist());
    assert!(fs.stat("/missing.txt").unwrap_err().is_not_exist());
}

#[test]
fn test_scenario_glob_filters_names() {
    let (store, fs) = memory_fs(1000);
    for key in ["a/1", "a/2", "a/3"] {
        put(&store, key, "x");
    }

    assert_eq!(fs.glob("/a/|2").unwrap(), vec!["2"]);
    assert_eq!(fs.glob("/a/").unwrap().len(), 3);

    let err = fs.glob("/a/|(").unwrap_err();
    assert!(matches!(err, FsError::InvalidPattern { .. }));
    assert_eq!(err.kind(), ErrorKind::InvalidArgument);
}

#[test]
fn test_write_read_idempotence_across_parts() {
    let store = Arc::new(MemoryObjectStore::new("bucket").with_part_size(7));
    let fs: FileSystem = FileSystem::builder()
        .with_backend(store.clone())
        .build()
        .unwrap();

    let payload: Vec<u8> = (0..10_000u32).map(|i| (i % 251) as u8).collect();
    let mut file = fs.create("/blob.bin", ()).unwrap();
    for chunk in payload.chunks(333) {
        file.write_all(chunk).unwrap();
    }
    file.close().unwrap();

    let mut back = Vec::new();
    fs.open("/blob.bin").unwrap().read_to_end(&mut back).unwrap();
    assert_eq!(back, payload);
    assert_eq!(fs.stat("/blob.bin").unwrap().size(), payload.len() as u64);
}

#[test]
fn test_cancel_leaves_no_object() {
    let (store, fs) = memory_fs(1000);
    let mut file = fs.create("/canceled.txt", ()).unwrap();
    file.write_all(b"never stored").unwrap();
    file.cancel().unwrap();

    assert!(fs.stat("/canceled.txt").unwrap_err().is_not_exist());
    assert_eq!(store.pending_uploads(), 0);
}

#[test]
fn test_pagination_is_exhaustive_at_any_page_size() {
    for page_size in [1, 2, 3, 50] {
        let (store, fs) = memory_fs(page_size);
        for i in 0..7 {
            put(&store, &format!("dir/{}", i), "x");
        }
        put(&store, "dirt", "x");

        let names: Vec<String> = fs
            .read_dir("/dir/")
            .unwrap()
            .into_iter()
            .map(|e| e.name().to_string())
            .collect();
        assert_eq!(names, vec!["0", "1", "2", "3", "4", "5", "6"], "page size {page_size}");
    }
}

#[test]
fn test_read_dir_marks_placeholders_and_nested_keys() {
    let (store, fs) = memory_fs(1000);
    put(&store, "root/", "");
    put(&store, "root/sub/", "");
    put(&store, "root/sub/deep.txt", "x");
    put(&store, "root/top.txt", "x");

    let entries = fs.read_dir("/root/").unwrap();
    let summary: Vec<(&str, bool)> = entries.iter().map(|e| (e.name(), e.is_dir())).collect();
    assert_eq!(
        summary,
        vec![("sub/", true), ("sub/deep.txt", false), ("top.txt", false)]
    );

    assert!(fs.read_dir("/root").unwrap_err().is_invalid_argument());
}

#[test]
fn test_bounded_cursor_resumes_without_overlap() {
    let store = Arc::new(FlakyStore::new());
    for i in 0..10 {
        store
            .inner
            .insert(format!("logs/{:02}", i), b"x".to_vec(), ObjectAttributes::default());
    }
    let fs: FileSystem = FileSystem::builder()
        .with_backend(store.clone())
        .with_list_limit(3)
        .build()
        .unwrap();

    let mut first = fs.matching("/logs/").unwrap().limit(4);
    let mut seen = Vec::new();
    while first.tail() {
        seen.push(first.head().unwrap().to_key());
    }
    assert_eq!(seen.len(), 4);
    assert_eq!(store.list_calls.load(Ordering::SeqCst), 1);

    let cursor = first.cursor();
    assert!(!cursor.is_empty());
    assert!(!first.tail());
    assert_eq!(store.list_calls.load(Ordering::SeqCst), 1);

    let rest: Vec<String> = fs
        .matching("/logs/")
        .unwrap()
        .continue_from(&cursor)
        .map(|k| k.unwrap().to_key())
        .collect();
    assert_eq!(rest.len(), 6);

    seen.extend(rest);
    let expected: Vec<String> = (0..10).map(|i| format!("logs/{:02}", i)).collect();
    assert_eq!(seen, expected);
}

#[test]
fn test_resume_after_trailing_separator_key() {
    let (store, fs) = memory_fs(1000);
    for key in ["k/00", "k/01/_/", "k/01/x", "k/02"] {
        put(&store, key, "x");
    }

    let mut first = fs.matching("/k/").unwrap().limit(2);
    let mut seen = Vec::new();
    while first.tail() {
        seen.push(first.head().unwrap().to_key());
    }
    assert_eq!(seen, vec!["k/00", "k/01/_/"]);

    let cursor = first.cursor();
    assert_eq!(cursor.to_key(), "k/01/_/");
    let rest: Vec<String> = fs
        .matching("/k/")
        .unwrap()
        .continue_from(&cursor)
        .map(|k| k.unwrap().to_key())
        .collect();
    assert_eq!(rest, vec!["k/01/x", "k/02"]);

    seen.extend(rest);
    assert_eq!(seen, vec!["k/00", "k/01/_/", "k/01/x", "k/02"]);
}

#[test]
fn test_open_does_not_download_until_read() {
    let store = Arc::new(FlakyStore::new());
    store
        .inner
        .insert("d/file.txt", b"abc".to_vec(), ObjectAttributes::default());
    let fs: FileSystem = FileSystem::builder()
        .with_backend(store.clone())
        .build()
        .unwrap();

    let mut dir = fs.open("/d/").unwrap();
    assert!(dir.stat().unwrap().is_dir());
    dir.close().unwrap();
    drop(dir);

    let mut file = fs.open("/d/file.txt").unwrap();
    file.close().unwrap();
    drop(file);
    assert_eq!(store.get_calls.load(Ordering::SeqCst), 0);
    assert_eq!(store.list_calls.load(Ordering::SeqCst), 0);

    let mut text = String::new();
    fs.open("/d/file.txt")
        .unwrap()
        .read_to_string(&mut text)
        .unwrap();
    assert_eq!(text, "abc");
    assert_eq!(store.get_calls.load(Ordering::SeqCst), 1);
}

#[test]
fn test_matching_decodes_composite_keys() {
    let (store, fs) = memory_fs(1000);
    let key = ObjectKey::new("user/ada", "2024/01");
    put(&store, &key.to_key(), "x");

    let found: Vec<ObjectKey> = fs.matching("/user/").unwrap().map(Result::unwrap).collect();
    assert_eq!(found, vec![key.clone()]);
    assert_eq!(read_all(&fs, &key.to_path()).unwrap(), "x");
}

#[test]
fn test_failed_upload_surfaces_on_close_and_sticks() {
    let store = Arc::new(FlakyStore::new());
    store.fail_uploads.store(true, Ordering::SeqCst);
    let fs: FileSystem = FileSystem::builder()
        .with_backend(store.clone())
        .build()
        .unwrap();

    let mut file = fs.create("/fail.txt", ()).unwrap();
    // the upload thread may or may not have failed by the time this returns
    let _ = file.write(b"doomed");
    let err = file.close().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Io);

    assert_eq!(file.close().unwrap_err().kind(), ErrorKind::Io);
    assert_eq!(file.write(b"again").unwrap_err().kind(), io::ErrorKind::Other);
    assert!(store.inner.head_object(&IoContext::new(Duration::from_secs(1)), "fail.txt").is_err());
    assert_eq!(store.inner.pending_uploads(), 0);
}

#[derive(Debug, Default, Clone, PartialEq)]
struct Note {
    system: SystemMetadata,
    author: String,
    url: String,
}

impl Attributes for Note {
    fn schema(schema: &mut SchemaBuilder<Self>) {
        schema
            .embed(|n| &n.system, |n| &mut n.system)
            .user("Author", |n| &n.author, |n| &mut n.author)
            .presigned_url(|n| &mut n.url);
    }
}

#[test]
fn test_typed_attributes_round_trip() {
    let store = Arc::new(MemoryObjectStore::new("bucket"));
    let fs = FileSystem::<Note>::builder()
        .with_backend(store.clone())
        .with_signer(store.clone())
        .build()
        .unwrap();

    let expires = Utc.with_ymd_and_hms(2031, 3, 4, 5, 6, 7).unwrap();
    let note = Note {
        system: SystemMetadata {
            content_type: "text/markdown".into(),
            cache_control: "max-age=60".into(),
            expires: Some(expires),
            ..Default::default()
        },
        author: "grace".into(),
        url: String::new(),
    };

    let mut file = fs.create("/notes/n1.md", note.clone()).unwrap();
    file.write_all(b"# hi").unwrap();
    file.close().unwrap();

    let stored = store.attributes("notes/n1.md").unwrap();
    assert_eq!(stored.metadata.get("author").map(String::as_str), Some("grace"));
    assert_eq!(stored.content_type.as_deref(), Some("text/markdown"));
    assert!(stored.metadata.values().all(|v| !v.starts_with("memory://")));

    let info = fs.stat("/notes/n1.md").unwrap();
    let decoded = fs.attributes(&info).unwrap();
    assert_eq!(decoded.author, "grace");
    assert_eq!(decoded.system.content_type, "text/markdown");
    assert_eq!(decoded.system.cache_control, "max-age=60");
    assert_eq!(decoded.system.expires, Some(expires));
    assert!(decoded.system.last_modified.is_some());
    assert!(decoded.url.starts_with("memory://bucket/notes/n1.md?method=GET"));

    let mut reader = fs.open("/notes/n1.md").unwrap();
    let via_open = reader.stat().unwrap();
    assert_eq!(via_open.attributes().unwrap().author, "grace");
    assert!(!via_open.attributes().unwrap().url.is_empty());
}

#[test]
fn test_on_demand_urls() {
    let store = Arc::new(MemoryObjectStore::new("bucket"));
    let fs = FileSystem::<SystemMetadata>::builder()
        .with_backend(store.clone())
        .with_signer(store.clone())
        .build()
        .unwrap();

    let get = fs.get_url("/a.txt", Duration::from_secs(30)).unwrap();
    assert_eq!(get, "memory://bucket/a.txt?method=GET&expires=30");

    let attrs = SystemMetadata {
        content_type: "image/png".into(),
        ..Default::default()
    };
    let put = fs.put_url("/a.png", &attrs, Duration::from_secs(30)).unwrap();
    assert!(put.ends_with("content-type=image/png"));

    // no url field in SystemMetadata: stat stays unsigned
    put_attrs(&store, "plain.txt");
    assert!(fs.stat("/plain.txt").is_ok());
    assert!(fs.get_url("/dir/", Duration::from_secs(30)).unwrap_err().is_invalid_argument());
}

fn put_attrs(store: &MemoryObjectStore, key: &str) {
    store.insert(
        key,
        b"x".to_vec(),
        ObjectAttributes {
            content_type: Some("text/plain".into()),
            ..Default::default()
        },
    );
}

#[test]
fn test_presign_only_url_type() {
    let store = Arc::new(MemoryObjectStore::new("bucket"));
    put(&store, "doc.txt", "x");
    let fs = FileSystem::<PreSignedUrl>::builder()
        .with_backend(store.clone())
        .with_signer(store.clone())
        .build()
        .unwrap();

    let info = fs.stat("/doc.txt").unwrap();
    assert!(info.attributes().unwrap().url.contains("method=GET"));
}

#[test]
fn test_remove_and_copy() {
    let (store, fs) = memory_fs(1000);
    put(&store, "src.txt", "payload");

    fs.copy("/src.txt", "s3://bucket/dst.txt").unwrap();
    assert_eq!(read_all(&fs, "/dst.txt").unwrap(), "payload");

    assert!(fs.copy("/src.txt", "/dst2.txt").unwrap_err().is_invalid_argument());
    assert_eq!(
        fs.copy("/src.txt", "s3://elsewhere/x").unwrap_err().kind(),
        ErrorKind::Io
    );

    fs.remove("/src.txt").unwrap();
    assert!(fs.stat("/src.txt").unwrap_err().is_not_exist());
    assert!(fs.remove("/dir/").unwrap_err().is_invalid_argument());
}

#[test]
fn test_wait_sees_late_object_and_times_out() {
    let (store, fs) = memory_fs(1000);
    let writer = store.clone();
    let handle = thread::spawn(move || {
        thread::sleep(Duration::from_millis(50));
        put(&writer, "late.txt", "x");
    });
    fs.wait("/late.txt", Duration::from_secs(10)).unwrap();
    handle.join().unwrap();

    let err = fs.wait("/never.txt", Duration::from_millis(150)).unwrap_err();
    assert!(err.is_timeout());
    assert!(matches!(err, FsError::Timeout { .. }));
}

#[test]
fn test_invalid_paths_never_reach_the_store() {
    let store = Arc::new(FlakyStore::new());
    let fs: FileSystem = FileSystem::builder()
        .with_backend(store.clone())
        .build()
        .unwrap();

    assert!(fs.open("/a/../b").unwrap_err().is_invalid_argument());
    assert!(fs.create("/a/", ()).unwrap_err().is_invalid_argument());
    assert!(fs.create("", ()).unwrap_err().is_invalid_argument());
    assert!(fs.stat("//").unwrap_err().is_invalid_argument());
    assert!(fs.read_dir("/a").unwrap_err().is_invalid_argument());
    assert_eq!(store.list_calls.load(Ordering::SeqCst), 0);
}

#[test]
fn test_local_backend_end_to_end() {
    let temp = TempDir::new().unwrap();
    let store = LocalObjectStore::new(temp.path().join("bucket")).unwrap();
    let fs: FileSystem<SystemMetadata> = FileSystem::new(store);

    let attrs = SystemMetadata {
        content_type: "text/plain".into(),
        ..Default::default()
    };
    let mut file = fs.create("/docs/readme.txt", attrs).unwrap();
    file.write_all(b"local bytes").unwrap();
    file.close().unwrap();

    let info = fs.stat("/docs/readme.txt").unwrap();
    assert_eq!(info.size(), 11);
    assert_eq!(info.attributes().unwrap().content_type, "text/plain");
    assert_eq!(fs.glob("/docs/|readme").unwrap(), vec!["readme.txt"]);

    let mut text = String::new();
    fs.open("/docs/readme.txt")
        .unwrap()
        .read_to_string(&mut text)
        .unwrap();
    assert_eq!(text, "local bytes");

    let system = info.attributes().unwrap();
    assert_eq!(SystemAttr::ContentType.name(), "ContentType");
    assert!(system.last_modified.is_some());
}
