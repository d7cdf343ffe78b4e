//! Read-side descriptors.
//!
//! A [`ReadStream`] does not touch the network until its first read or stat.
//! Opening a directory path yields a [`DirStream`] instead, which lists keys
//! on demand and refuses byte reads.

use crate::codec::Attributes;
use crate::dir;
use crate::error::FsError;
use crate::fs::Shared;
use crate::info::ObjectInfo;
use crate::path::object_key;
use metrics::counter;
use std::fmt;
use std::io::{self, Read};
use std::sync::Arc;
use streamfs_storage::{IoContext, ObjectStoreError};
use tracing::debug;

enum ReadState {
    Unopened,
    Streaming {
        body: Box<dyn Read + Send>,
        ctx: IoContext,
    },
    Failed(FsError),
    /// `opened` records whether a download was ever started, so stat can
    /// still report what it fetched.
    Closed { opened: bool },
}

impl fmt::Debug for ReadState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReadState::Unopened => f.write_str("Unopened"),
            ReadState::Streaming { .. } => f.write_str("Streaming"),
            ReadState::Failed(err) => f.debug_tuple("Failed").field(err).finish(),
            ReadState::Closed { opened } => {
                f.debug_struct("Closed").field("opened", opened).finish()
            }
        }
    }
}

/// Lazily opened download of one object.
pub struct ReadStream<T: Attributes> {
    info: ObjectInfo<T>,
    shared: Arc<Shared<T>>,
    state: ReadState,
}

impl<T: Attributes> fmt::Debug for ReadStream<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReadStream")
            .field("path", &self.info.name())
            .field("state", &self.state)
            .finish()
    }
}

impl<T: Attributes> ReadStream<T> {
    pub(crate) fn new(shared: Arc<Shared<T>>, path: &str) -> Self {
        Self {
            info: ObjectInfo::file(path),
            shared,
            state: ReadState::Unopened,
        }
    }

    pub fn path(&self) -> &str {
        self.info.name()
    }

    fn open(&mut self) -> Result<(), FsError> {
        let path = self.info.name().to_string();
        let ctx = self.shared.io_context();
        debug!(path = %path, "opening object");

        let out = match self.shared.store.get_object(&ctx, object_key(&path)) {
            Ok(out) => out,
            Err(err) => {
                let err = FsError::from_store("open", path, err);
                self.state = ReadState::Failed(err.clone());
                return Err(err);
            }
        };

        let mut attributes = self.shared.codec.decode_get(&out);
        if self.shared.signs_urls() {
            self.shared.attach_get_url(&path, &mut attributes);
        }
        self.info.set_stat(out.size, out.last_modified);
        self.info.set_attributes(attributes);
        self.state = ReadState::Streaming {
            body: out.body,
            ctx,
        };
        Ok(())
    }

    /// Size, timestamps and attributes; opens the object if needed.
    pub fn stat(&mut self) -> Result<ObjectInfo<T>, FsError> {
        if let ReadState::Unopened = self.state {
            self.open()?;
        }
        match &self.state {
            ReadState::Failed(err) => return Err(err.clone()),
            ReadState::Closed { opened: false } => {
                return Err(FsError::Closed {
                    op: "stat",
                    path: self.info.name().to_string(),
                })
            }
            _ => {}
        }
        Ok(self.info.clone())
    }

    fn pull(&mut self, buf: &mut [u8]) -> Result<usize, FsError> {
        if let ReadState::Unopened = self.state {
            self.open()?;
        }
        match &mut self.state {
            ReadState::Streaming { body, ctx } => match body.read(buf) {
                Ok(n) => {
                    counter!("streamfs_bytes_read_total").increment(n as u64);
                    Ok(n)
                }
                Err(e) if ctx.is_cancelled() => {
                    debug!(error = %e, "read after cancellation");
                    Err(FsError::Closed {
                        op: "read",
                        path: self.info.name().to_string(),
                    })
                }
                Err(e) => Err(FsError::io("read", self.info.name(), ObjectStoreError::Io(e))),
            },
            ReadState::Failed(err) => Err(err.clone()),
            ReadState::Closed { .. } => Err(FsError::Closed {
                op: "read",
                path: self.info.name().to_string(),
            }),
            ReadState::Unopened => Ok(0),
        }
    }

    /// Release the download. Safe to call repeatedly and on a never opened stream.
    pub fn close(&mut self) -> Result<(), FsError> {
        let opened = match &self.state {
            ReadState::Streaming { ctx, .. } => {
                ctx.cancel();
                debug!(path = %self.info.name(), "closed object");
                true
            }
            ReadState::Closed { opened } => *opened,
            ReadState::Unopened | ReadState::Failed(_) => false,
        };
        // dropping the body releases the connection
        self.state = ReadState::Closed { opened };
        Ok(())
    }
}

impl<T: Attributes> Read for ReadStream<T> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.pull(buf).map_err(io::Error::from)
    }
}

impl<T: Attributes> Drop for ReadStream<T> {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

/// Directory pseudo-file.
pub struct DirStream<T: Attributes> {
    info: ObjectInfo<T>,
    shared: Arc<Shared<T>>,
}

impl<T: Attributes> fmt::Debug for DirStream<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DirStream")
            .field("path", &self.info.name())
            .finish()
    }
}

impl<T: Attributes> DirStream<T> {
    pub(crate) fn new(shared: Arc<Shared<T>>, path: &str) -> Self {
        Self {
            info: ObjectInfo::directory(path),
            shared,
        }
    }

    pub fn path(&self) -> &str {
        self.info.name()
    }

    pub fn stat(&self) -> ObjectInfo<T> {
        self.info.clone()
    }

    /// All entries below this directory, named relative to it.
    pub fn read_dir(&self) -> Result<Vec<ObjectInfo<T>>, FsError> {
        dir::read_all(&self.shared, self.info.name())
    }
}

impl<T: Attributes> Read for DirStream<T> {
    fn read(&mut self, _: &mut [u8]) -> io::Result<usize> {
        Err(FsError::IsDirectory {
            op: "read",
            path: self.info.name().to_string(),
        }
        .into())
    }
}

/// Result of [`FileSystem::open`](crate::FileSystem::open).
#[derive(Debug)]
pub enum OpenFile<T: Attributes> {
    File(ReadStream<T>),
    Dir(DirStream<T>),
}

impl<T: Attributes> OpenFile<T> {
    pub fn is_dir(&self) -> bool {
        matches!(self, OpenFile::Dir(_))
    }

    pub fn stat(&mut self) -> Result<ObjectInfo<T>, FsError> {
        match self {
            OpenFile::File(file) => file.stat(),
            OpenFile::Dir(dir) => Ok(dir.stat()),
        }
    }

    pub fn read_dir(&self) -> Result<Vec<ObjectInfo<T>>, FsError> {
        match self {
            OpenFile::File(file) => Err(FsError::NotDirectory {
                op: "readdir",
                path: file.path().to_string(),
            }),
            OpenFile::Dir(dir) => dir.read_dir(),
        }
    }

    pub fn close(&mut self) -> Result<(), FsError> {
        match self {
            OpenFile::File(file) => file.close(),
            OpenFile::Dir(_) => Ok(()),
        }
    }

    pub fn into_file(self) -> Option<ReadStream<T>> {
        match self {
            OpenFile::File(file) => Some(file),
            OpenFile::Dir(_) => None,
        }
    }
}

impl<T: Attributes> Read for OpenFile<T> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            OpenFile::File(file) => file.read(buf),
            OpenFile::Dir(dir) => dir.read(buf),
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::{FileSystem, FsError};
    use std::io::Read;
    use std::sync::Arc;
    use streamfs_storage::{MemoryObjectStore, ObjectAttributes};

    fn fixture() -> (Arc<MemoryObjectStore>, FileSystem) {
        let store = Arc::new(MemoryObjectStore::new("test"));
        let fs = FileSystem::builder()
            .with_backend(store.clone())
            .build()
            .unwrap();
        (store, fs)
    }

    #[test]
    fn test_open_is_lazy() {
        let (store, fs) = fixture();
        let mut file = fs.open("/late.txt").unwrap();

        // written after open, still visible on first read
        store.insert("late.txt", b"data".to_vec(), ObjectAttributes::default());
        let mut out = String::new();
        file.read_to_string(&mut out).unwrap();
        assert_eq!(out, "data");
    }

    #[test]
    fn test_stat_opens_and_reports_size() {
        let (store, fs) = fixture();
        store.insert("a.txt", b"12345".to_vec(), ObjectAttributes::default());

        let mut file = fs.open("/a.txt").unwrap();
        let info = file.stat().unwrap();
        assert_eq!(info.size(), 5);
        assert!(info.modified().is_some());
        assert!(!info.is_dir());
    }

    #[test]
    fn test_close_is_idempotent() {
        let (store, fs) = fixture();
        store.insert("a.txt", b"abc".to_vec(), ObjectAttributes::default());

        let mut never_opened = fs.open("/a.txt").unwrap();
        never_opened.close().unwrap();
        never_opened.close().unwrap();

        let mut file = fs.open("/a.txt").unwrap();
        let mut buf = [0u8; 1];
        file.read_exact(&mut buf).unwrap();
        file.close().unwrap();
        file.close().unwrap();

        let err = file.read(&mut buf).unwrap_err();
        assert!(matches!(FsError::from_io(&err), Some(FsError::Closed { .. })));
    }

    #[test]
    fn test_stat_after_close_depends_on_open() {
        let (store, fs) = fixture();
        store.insert("a.txt", b"abc".to_vec(), ObjectAttributes::default());

        let mut file = fs.open("/a.txt").unwrap();
        assert_eq!(file.stat().unwrap().size(), 3);
        file.close().unwrap();
        file.close().unwrap();
        assert_eq!(file.stat().unwrap().size(), 3);

        let mut never_opened = fs.open("/a.txt").unwrap();
        never_opened.close().unwrap();
        let err = never_opened.stat().unwrap_err();
        assert!(matches!(err, FsError::Closed { op: "stat", .. }));
    }

    #[test]
    fn test_missing_object_fails_on_first_access() {
        let (_, fs) = fixture();
        let mut file = fs.open("/missing.txt").unwrap();
        let err = file.stat().unwrap_err();
        assert!(err.is_not_exist());
        // the failure is remembered
        assert!(file.stat().unwrap_err().is_not_exist());
    }

    #[test]
    fn test_directory_refuses_reads() {
        let (store, fs) = fixture();
        store.insert("d/x", b"1".to_vec(), ObjectAttributes::default());

        let mut dir = fs.open("/d/").unwrap();
        assert!(dir.is_dir());
        assert!(dir.stat().unwrap().is_dir());

        let mut buf = [0u8; 4];
        let err = dir.read(&mut buf).unwrap_err();
        assert!(matches!(FsError::from_io(&err), Some(FsError::IsDirectory { .. })));
        assert_eq!(dir.read_dir().unwrap().len(), 1);
    }
}
