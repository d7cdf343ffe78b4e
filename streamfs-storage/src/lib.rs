//! Object Storage Layer
//!
//! Blocking storage contracts consumed by the streaming file system,
//! plus an in-memory store, a local filesystem store and, behind the
//! `s3` feature, an AWS S3 store.

mod context;
mod local;
mod memory;
mod traits;
mod wait;

#[cfg(feature = "s3")]
mod s3;

// Re-exports
pub use context::IoContext;
pub use tokio_util::sync::CancellationToken;
pub use local::LocalObjectStore;
pub use memory::MemoryObjectStore;
pub use traits::{
    GetObjectOutput, HeadObjectOutput, ListPage, ObjectAttributes, ObjectStore, ObjectStoreError,
    ObjectSummary, UploadId, Uploader, UrlSigner,
};
pub use wait::{poll_until_exists, PollConfig};

#[cfg(feature = "s3")]
pub use s3::{S3ObjectStore, DEFAULT_PART_SIZE};
