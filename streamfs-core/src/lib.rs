//! Streaming file system over object storage.
//!
//! Files are read and written as blocking streams: a [`ReadStream`] opens its
//! download on first access, a [`WriteStream`] pipes bytes into a background
//! multipart upload that commits on close. Directories are emulated over the
//! flat key space, with paths ending in `/` naming directories.
//!
//! ```
//! use std::io::{Read, Write};
//! use streamfs_core::FileSystem;
//! use streamfs_storage::MemoryObjectStore;
//!
//! let fs: FileSystem = FileSystem::new(MemoryObjectStore::new("demo"));
//!
//! let mut file = fs.create("/a/b.txt", ()).unwrap();
//! file.write_all(b"hello").unwrap();
//! file.close().unwrap();
//!
//! let mut text = String::new();
//! fs.open("/a/b.txt").unwrap().read_to_string(&mut text).unwrap();
//! assert_eq!(text, "hello");
//! ```

mod codec;
mod config;
mod dir;
mod error;
mod fs;
mod info;
mod key;
pub mod path;
mod pipe;
mod reader;
mod seq;
mod spool;
mod writer;

pub use codec::{Attributes, Codec, PreSignedUrl, SchemaBuilder, SystemAttr, SystemMetadata};
pub use config::{EmptyWrite, FileSystemConfig, CONFIG_ENV};
pub use error::{ErrorKind, FsError};
pub use fs::{FileSystem, FileSystemBuilder, GLOB_DELIMITER};
pub use info::{DirEntry, FileMode, ObjectInfo};
pub use key::{ObjectKey, SEPARATOR};
pub use reader::{DirStream, OpenFile, ReadStream};
pub use seq::Seq;
pub use spool::{Mutability, OnError, Spool};
pub use writer::WriteStream;
