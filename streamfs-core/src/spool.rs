//! File-at-a-time processing between two file systems.
//!
//! A [`Spool`] walks the files of a reader file system, hands each one to a
//! callback together with a fresh write stream on the writer file system, and
//! optionally removes the source once its output has been committed. It is a
//! small work queue: producers drop files into the reader side with
//! [`Spool::write`], a consumer drains them with [`Spool::for_each`].
//!
//! ```
//! use std::io;
//! use streamfs_core::{FileSystem, Mutability, Spool};
//! use streamfs_storage::MemoryObjectStore;
//!
//! let inbox: FileSystem = FileSystem::new(MemoryObjectStore::new("inbox"));
//! let outbox: FileSystem = FileSystem::new(MemoryObjectStore::new("outbox"));
//! let spool = Spool::new(inbox, outbox).with_mutability(Mutability::Mutable);
//!
//! spool.write_file("/jobs/1.txt", b"one").unwrap();
//! spool
//!     .for_each("/jobs/", |_path, r, w| io::copy(r, w).map(|_| ()))
//!     .unwrap();
//! ```

use crate::codec::Attributes;
use crate::error::FsError;
use crate::fs::FileSystem;
use metrics::counter;
use regex::Regex;
use std::io::{self, Read, Write};
use streamfs_storage::ObjectStoreError;
use tracing::{debug, warn};

/// What happens to a source file once it has been processed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Mutability {
    /// Processed files stay in the reader file system.
    #[default]
    Immutable,
    /// Processed files are removed from the reader file system.
    Mutable,
}

/// How per-file failures are treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OnError {
    /// The first failure stops the walk and is returned.
    #[default]
    Strict,
    /// Failures are logged and the walk moves on to the next file.
    Skip,
}

/// Applies a function to every file of one file system, writing the results
/// to another.
pub struct Spool<R: Attributes = (), W: Attributes = ()> {
    reader: FileSystem<R>,
    writer: FileSystem<W>,
    mutability: Mutability,
    on_error: OnError,
    pattern: Option<Regex>,
    ext: Option<String>,
}

impl<R: Attributes, W: Attributes> std::fmt::Debug for Spool<R, W> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Spool")
            .field("reader", &self.reader.bucket())
            .field("writer", &self.writer.bucket())
            .field("mutability", &self.mutability)
            .field("on_error", &self.on_error)
            .field("pattern", &self.pattern.as_ref().map(Regex::as_str))
            .field("ext", &self.ext)
            .finish()
    }
}

impl<R: Attributes, W: Attributes> Spool<R, W> {
    pub fn new(reader: FileSystem<R>, writer: FileSystem<W>) -> Self {
        Self {
            reader,
            writer,
            mutability: Mutability::default(),
            on_error: OnError::default(),
            pattern: None,
            ext: None,
        }
    }

    pub fn with_mutability(mut self, mutability: Mutability) -> Self {
        self.mutability = mutability;
        self
    }

    pub fn with_on_error(mut self, on_error: OnError) -> Self {
        self.on_error = on_error;
        self
    }

    /// Only process files whose full path matches `pattern`.
    pub fn with_pattern(mut self, pattern: &str) -> Result<Self, FsError> {
        let regex = Regex::new(pattern).map_err(|source| FsError::InvalidPattern {
            pattern: pattern.to_string(),
            source,
        })?;
        self.pattern = Some(regex);
        Ok(self)
    }

    /// Replace the extension of every output path, e.g. `".json"`.
    pub fn with_file_ext(mut self, ext: impl Into<String>) -> Self {
        self.ext = Some(ext.into());
        self
    }

    pub fn reader(&self) -> &FileSystem<R> {
        &self.reader
    }

    pub fn writer(&self) -> &FileSystem<W> {
        &self.writer
    }

    /// Add a file to the reader side.
    pub fn write(&self, path: &str, body: &mut dyn Read) -> Result<(), FsError> {
        write_to(&self.reader, path, body)
    }

    pub fn write_file(&self, path: &str, data: &[u8]) -> Result<(), FsError> {
        let mut body = data;
        self.write(path, &mut body)
    }

    /// Run `f` over every file below `dir`, in key order.
    ///
    /// `f` receives the source path, the source bytes and a write stream for
    /// the output. The output is committed only when `f` succeeds.
    pub fn for_each<F>(&self, dir: &str, mut f: F) -> Result<(), FsError>
    where
        F: FnMut(&str, &mut dyn Read, &mut dyn Write) -> io::Result<()>,
    {
        for path in self.files(dir)? {
            self.apply(&path, &mut f)?;
        }
        Ok(())
    }

    /// Like [`Spool::for_each`], over an explicit list of paths.
    pub fn for_each_path<I, S, F>(&self, paths: I, mut f: F) -> Result<(), FsError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
        F: FnMut(&str, &mut dyn Read, &mut dyn Write) -> io::Result<()>,
    {
        for path in paths {
            let path = path.as_ref();
            if self.selects(path) {
                self.apply(path, &mut f)?;
            }
        }
        Ok(())
    }

    /// Copy every file below `dir` into the shard directory `f` picks for it.
    ///
    /// A file lands at `/<shard><path>` on the writer side. An empty shard
    /// leaves the file where it is.
    pub fn partition<F>(&self, dir: &str, mut f: F) -> Result<(), FsError>
    where
        F: FnMut(&str, &mut dyn Read) -> io::Result<String>,
    {
        for path in self.files(dir)? {
            let shard = {
                let mut source = self.reader.open(&path)?;
                match f(&path, &mut source) {
                    Ok(shard) => shard,
                    Err(err) => {
                        self.tolerate(from_io("partition", &path, err))?;
                        continue;
                    }
                }
            };
            let shard = shard.trim_matches('/');
            if shard.is_empty() {
                continue;
            }

            let target = format!("/{}{}", shard, path);
            let copied = self
                .reader
                .open(&path)
                .and_then(|mut source| write_to(&self.writer, &target, &mut source));
            if let Err(err) = copied {
                self.tolerate(err)?;
                continue;
            }
            debug!(source = %path, target = %target, "partitioned");
            self.consume(&path)?;
        }
        Ok(())
    }

    fn files(&self, dir: &str) -> Result<Vec<String>, FsError> {
        Ok(self
            .reader
            .read_dir(dir)?
            .into_iter()
            .filter(|entry| !entry.is_dir())
            .map(|entry| format!("{}{}", dir, entry.name()))
            .filter(|path| self.selects(path))
            .collect())
    }

    fn selects(&self, path: &str) -> bool {
        self.pattern.as_ref().map_or(true, |re| re.is_match(path))
    }

    fn target(&self, path: &str) -> String {
        match &self.ext {
            Some(ext) => replace_ext(path, ext),
            None => path.to_string(),
        }
    }

    fn apply<F>(&self, path: &str, f: &mut F) -> Result<(), FsError>
    where
        F: FnMut(&str, &mut dyn Read, &mut dyn Write) -> io::Result<()>,
    {
        let mut source = match self.reader.open(path) {
            Ok(source) => source,
            Err(err) => return self.tolerate(err),
        };
        let target = self.target(path);
        let mut output = self.writer.create(&target, W::default())?;

        if let Err(err) = f(path, &mut source, &mut output) {
            if let Err(cancel) = output.cancel() {
                warn!(path = %target, error = %cancel, "cancel after failed spool step");
            }
            counter!("streamfs_spool_files_total", "outcome" => "failed").increment(1);
            return self.tolerate(from_io("spool", path, err));
        }
        output.close()?;
        source.close()?;

        counter!("streamfs_spool_files_total", "outcome" => "done").increment(1);
        debug!(source = %path, target = %target, "spooled");
        self.consume(path)
    }

    fn consume(&self, path: &str) -> Result<(), FsError> {
        if self.mutability == Mutability::Mutable {
            if let Err(err) = self.reader.remove(path) {
                return self.tolerate(err);
            }
        }
        Ok(())
    }

    fn tolerate(&self, err: FsError) -> Result<(), FsError> {
        match self.on_error {
            OnError::Strict => Err(err),
            OnError::Skip => {
                counter!("streamfs_spool_files_total", "outcome" => "skipped").increment(1);
                warn!(error = %err, "skipping file");
                Ok(())
            }
        }
    }
}

fn write_to<T: Attributes>(
    fs: &FileSystem<T>,
    path: &str,
    body: &mut dyn Read,
) -> Result<(), FsError> {
    let mut stream = fs.create(path, T::default())?;
    if let Err(err) = io::copy(body, &mut stream) {
        if let Err(cancel) = stream.cancel() {
            warn!(path, error = %cancel, "cancel after failed copy");
        }
        return Err(from_io("write", path, err));
    }
    stream.close()
}

fn from_io(op: &'static str, path: &str, err: io::Error) -> FsError {
    FsError::from_io(&err).unwrap_or_else(|| FsError::io(op, path, ObjectStoreError::Io(err)))
}

/// Swap the extension of the last path segment; a segment without one gets `ext` appended.
fn replace_ext(path: &str, ext: &str) -> String {
    let name_at = path.rfind('/').map_or(0, |i| i + 1);
    let stem = match path[name_at..].rfind('.') {
        Some(dot) => &path[..name_at + dot],
        None => path,
    };
    format!("{}{}", stem, ext)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use streamfs_storage::{MemoryObjectStore, ObjectAttributes};

    const PATHS: [&str; 6] = ["/a", "/b", "/c", "/d", "/e", "/f"];

    fn fixture() -> (Arc<MemoryObjectStore>, Arc<MemoryObjectStore>, Spool) {
        let inbox = Arc::new(MemoryObjectStore::new("in"));
        let outbox = Arc::new(MemoryObjectStore::new("to"));
        let reader = FileSystem::builder().with_backend(inbox.clone()).build().unwrap();
        let writer = FileSystem::builder().with_backend(outbox.clone()).build().unwrap();
        (inbox, outbox, Spool::new(reader, writer))
    }

    fn seed(spool: &Spool) {
        for path in PATHS {
            spool.write_file(path, path.as_bytes()).unwrap();
        }
    }

    fn copy(_: &str, r: &mut dyn Read, w: &mut dyn Write) -> io::Result<()> {
        io::copy(r, w).map(|_| ())
    }

    fn read(fs: &FileSystem, path: &str) -> String {
        let mut out = String::new();
        fs.open(path).unwrap().read_to_string(&mut out).unwrap();
        out
    }

    #[test]
    fn test_for_each_visits_files_in_order() {
        let (_, _, spool) = fixture();
        seed(&spool);

        let mut seen = Vec::new();
        spool
            .for_each("/", |path, r, w| {
                seen.push(path.to_string());
                copy(path, r, w)
            })
            .unwrap();

        assert_eq!(seen, PATHS);
        assert_eq!(read(spool.writer(), "/c"), "/c");
        // immutable by default
        assert_eq!(spool.reader().read_dir("/").unwrap().len(), 6);
    }

    #[test]
    fn test_for_each_path_follows_given_order() {
        let (_, _, spool) = fixture();
        seed(&spool);

        let mut seen = Vec::new();
        spool
            .for_each_path(PATHS.iter().rev(), |path, r, w| {
                seen.push(path.to_string());
                copy(path, r, w)
            })
            .unwrap();

        let expected: Vec<&str> = PATHS.iter().rev().copied().collect();
        assert_eq!(seen, expected);
    }

    #[test]
    fn test_partition_shards_files() {
        let (_, outbox, spool) = fixture();
        seed(&spool);

        let mut seen = Vec::new();
        spool
            .partition("/", |path, _| {
                seen.push(path.to_string());
                Ok(if path < "/d" { "low".into() } else { String::new() })
            })
            .unwrap();

        assert_eq!(seen, PATHS);
        assert_eq!(outbox.len(), 3);
        assert_eq!(read(spool.writer(), "/low/b"), "/b");
    }

    #[test]
    fn test_mutable_spool_drains_reader() {
        let (inbox, _, spool) = fixture();
        let spool = spool.with_mutability(Mutability::Mutable);
        seed(&spool);
        inbox.insert("keep/x", b"x".to_vec(), ObjectAttributes::default());

        spool.for_each("/", copy).unwrap();
        assert!(inbox.is_empty());
        assert_eq!(read(spool.writer(), "/keep/x"), "x");
    }

    #[test]
    fn test_pattern_and_extension() {
        let (_, outbox, spool) = fixture();
        let spool = spool
            .with_pattern(r"\.csv$")
            .unwrap()
            .with_file_ext(".json");
        spool.write_file("/in/a.csv", b"1,2").unwrap();
        spool.write_file("/in/b.txt", b"skip").unwrap();

        spool.for_each("/in/", copy).unwrap();
        assert_eq!(outbox.len(), 1);
        assert_eq!(read(spool.writer(), "/in/a.json"), "1,2");

        let (_, _, spool) = fixture();
        assert!(spool.with_pattern("(").unwrap_err().is_invalid_argument());
    }

    #[test]
    fn test_failed_step_commits_nothing() {
        let (inbox, outbox, spool) = fixture();
        let spool = spool.with_mutability(Mutability::Mutable);
        seed(&spool);

        let failing = |path: &str, r: &mut dyn Read, w: &mut dyn Write| -> io::Result<()> {
            if path == "/c" {
                w.write_all(b"partial")?;
                return Err(io::Error::new(io::ErrorKind::InvalidData, "bad record"));
            }
            copy(path, r, w)
        };

        let err = spool.for_each("/", failing).unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::Io);
        assert_eq!(outbox.len(), 2);
        assert_eq!(inbox.len(), 4);
        assert_eq!(outbox.pending_uploads(), 0);
    }

    #[test]
    fn test_skip_errors_continues() {
        let (inbox, outbox, spool) = fixture();
        let spool = spool
            .with_mutability(Mutability::Mutable)
            .with_on_error(OnError::Skip);
        seed(&spool);

        spool
            .for_each("/", |path, r, w| {
                if path == "/c" {
                    return Err(io::Error::new(io::ErrorKind::InvalidData, "bad record"));
                }
                copy(path, r, w)
            })
            .unwrap();

        assert_eq!(outbox.len(), 5);
        // the failed file stays queued
        let left: Vec<String> = spool
            .reader()
            .read_dir("/")
            .unwrap()
            .into_iter()
            .map(|e| e.name().to_string())
            .collect();
        assert_eq!(left, vec!["c"]);
        assert_eq!(inbox.len(), 1);
    }

    #[test]
    fn test_missing_path_fails_strict() {
        let (_, outbox, spool) = fixture();
        let err = spool.for_each_path(["/missing"], copy).unwrap_err();
        assert!(err.is_not_exist());
        assert!(outbox.is_empty());
    }

    #[test]
    fn test_replace_ext() {
        assert_eq!(replace_ext("/a/b.csv", ".json"), "/a/b.json");
        assert_eq!(replace_ext("/a/b", ".json"), "/a/b.json");
        assert_eq!(replace_ext("/a.d/b", ".json"), "/a.d/b.json");
        assert_eq!(replace_ext("/a/b.tar.gz", ".zip"), "/a/b.tar.zip");
    }
}
