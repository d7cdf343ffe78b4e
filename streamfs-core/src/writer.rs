//! Write-side descriptor.
//!
//! Bytes written to a [`WriteStream`] flow through a bounded pipe into one
//! background thread that runs a multipart upload. The object becomes
//! visible only when [`WriteStream::close`] returns `Ok`; [`WriteStream::cancel`]
//! or dropping an unfinished stream aborts the upload instead.

use crate::codec::Attributes;
use crate::config::EmptyWrite;
use crate::error::FsError;
use crate::fs::Shared;
use crate::info::ObjectInfo;
use crate::path::object_key;
use crate::pipe::{pipe, PipeWriter};
use metrics::counter;
use std::fmt;
use std::io::{self, Write};
use std::sync::{Arc, OnceLock};
use std::thread::{self, JoinHandle};
use streamfs_storage::{IoContext, ObjectStoreError, UploadId};
use tracing::{debug, warn};

struct Upload {
    conduit: Option<PipeWriter>,
    task: Option<JoinHandle<Result<(), FsError>>>,
    upload_id: Arc<OnceLock<UploadId>>,
    ctx: IoContext,
}

enum WriteState {
    Idle,
    Uploading(Upload),
    Closed,
    Canceled,
}

impl fmt::Debug for WriteState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            WriteState::Idle => "Idle",
            WriteState::Uploading(_) => "Uploading",
            WriteState::Closed => "Closed",
            WriteState::Canceled => "Canceled",
        };
        f.write_str(name)
    }
}

/// Streaming upload of one object.
pub struct WriteStream<T: Attributes> {
    info: ObjectInfo<T>,
    shared: Arc<Shared<T>>,
    attributes: T,
    state: WriteState,
    written: u64,
    last_error: Option<FsError>,
}

impl<T: Attributes> fmt::Debug for WriteStream<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WriteStream")
            .field("path", &self.info.name())
            .field("state", &self.state)
            .field("written", &self.written)
            .field("last_error", &self.last_error)
            .finish()
    }
}

impl<T: Attributes> WriteStream<T> {
    pub(crate) fn new(shared: Arc<Shared<T>>, path: &str, attributes: T) -> Self {
        let mut info = ObjectInfo::file(path);
        info.set_attributes(attributes.clone());
        Self {
            info,
            shared,
            attributes,
            state: WriteState::Idle,
            written: 0,
            last_error: None,
        }
    }

    pub fn path(&self) -> &str {
        self.info.name()
    }

    fn key(&self) -> &str {
        object_key(self.info.name())
    }

    fn start(&mut self) -> Result<(), FsError> {
        let path = self.info.name().to_string();
        let key = self.key().to_string();
        let attributes = self.shared.codec.encode(&self.attributes);
        let uploader = self.shared.uploader.clone();
        let ctx = self.shared.io_context();
        let upload_id = Arc::new(OnceLock::new());
        let (conduit, mut body) = pipe(self.shared.config.pipe_capacity);

        let task_ctx = ctx.clone();
        let task_id = upload_id.clone();
        let task = thread::Builder::new()
            .name("streamfs-upload".into())
            .spawn(move || -> Result<(), FsError> {
                let id = uploader
                    .begin_upload(&task_ctx, &key, &attributes)
                    .map_err(|e| FsError::from_store("write", path.as_str(), e))?;
                let _ = task_id.set(id.clone());
                debug!(key = %key, upload_id = %id, "upload started");

                match uploader.upload_parts(&task_ctx, &key, &id, &mut body) {
                    Ok(()) => {
                        counter!("streamfs_uploads_total", "outcome" => "completed").increment(1);
                        debug!(key = %key, upload_id = %id, "upload completed");
                        Ok(())
                    }
                    Err(err) if task_ctx.is_cancelled() => {
                        debug!(key = %key, error = %err, "upload interrupted by cancel");
                        Err(FsError::Canceled { path })
                    }
                    Err(err) => {
                        counter!("streamfs_uploads_total", "outcome" => "failed").increment(1);
                        // leave no dangling session behind a failed close
                        let abort_ctx = IoContext::new(task_ctx.timeout());
                        if let Err(abort) = uploader.abort_upload(&abort_ctx, &key, &id) {
                            warn!(key = %key, upload_id = %id, error = %abort, "abort after failed upload");
                        }
                        Err(FsError::from_store("write", path, err))
                    }
                }
            })
            .map_err(|e| FsError::io("write", self.info.name(), ObjectStoreError::Io(e)))?;

        self.state = WriteState::Uploading(Upload {
            conduit: Some(conduit),
            task: Some(task),
            upload_id,
            ctx,
        });
        Ok(())
    }

    /// Wait for the upload thread and return its outcome.
    fn join(&mut self) -> Result<(), FsError> {
        let path = self.info.name().to_string();
        let WriteState::Uploading(upload) = &mut self.state else {
            return Ok(());
        };
        upload.conduit = None;
        match upload.task.take() {
            Some(task) => task.join().unwrap_or_else(|_| {
                Err(FsError::io(
                    "write",
                    path,
                    ObjectStoreError::Provider("upload thread panicked".into()),
                ))
            }),
            None => Ok(()),
        }
    }

    fn fail(&mut self, err: FsError) -> FsError {
        self.last_error = Some(err.clone());
        err
    }

    fn push(&mut self, buf: &[u8]) -> Result<usize, FsError> {
        if let Some(err) = &self.last_error {
            return Err(err.clone());
        }
        match self.state {
            WriteState::Idle => self.start()?,
            WriteState::Closed => {
                return Err(FsError::Closed {
                    op: "write",
                    path: self.info.name().to_string(),
                })
            }
            WriteState::Canceled => {
                return Err(FsError::Canceled {
                    path: self.info.name().to_string(),
                })
            }
            WriteState::Uploading(_) => {}
        }

        let sent = match &mut self.state {
            WriteState::Uploading(Upload {
                conduit: Some(conduit),
                task: Some(task),
                ..
            }) if !task.is_finished() => conduit.write_all(buf),
            _ => Err(io::Error::new(io::ErrorKind::BrokenPipe, "upload ended")),
        };

        match sent {
            Ok(()) => {
                self.written += buf.len() as u64;
                counter!("streamfs_bytes_written_total").increment(buf.len() as u64);
                Ok(buf.len())
            }
            Err(e) => {
                // the upload thread stopped reading; its error explains why
                let err = match self.join() {
                    Err(err) => err,
                    Ok(()) => FsError::io("write", self.info.name(), ObjectStoreError::Io(e)),
                };
                self.state = WriteState::Closed;
                Err(self.fail(err))
            }
        }
    }

    /// Finish the upload and wait until the object is stored.
    ///
    /// Closing a stream that never received a write stores nothing unless
    /// the file system is configured with [`EmptyWrite::Create`].
    pub fn close(&mut self) -> Result<(), FsError> {
        if let Some(err) = &self.last_error {
            return Err(err.clone());
        }
        match self.state {
            WriteState::Idle => {
                if self.shared.config.empty_write == EmptyWrite::Create {
                    self.store_empty().map_err(|err| self.fail(err))?;
                }
                self.state = WriteState::Closed;
                Ok(())
            }
            WriteState::Uploading(_) => {
                let result = self.join();
                self.state = WriteState::Closed;
                result.map_err(|err| self.fail(err))
            }
            WriteState::Closed => Ok(()),
            WriteState::Canceled => Err(FsError::Canceled {
                path: self.info.name().to_string(),
            }),
        }
    }

    fn store_empty(&self) -> Result<(), FsError> {
        let ctx = self.shared.io_context();
        let path = self.info.name();
        let attributes = self.shared.codec.encode(&self.attributes);
        let uploader = &self.shared.uploader;
        let id = uploader
            .begin_upload(&ctx, self.key(), &attributes)
            .map_err(|e| FsError::from_store("write", path, e))?;
        uploader
            .upload_parts(&ctx, self.key(), &id, &mut io::empty())
            .map_err(|e| FsError::from_store("write", path, e))?;
        counter!("streamfs_uploads_total", "outcome" => "completed").increment(1);
        Ok(())
    }

    /// Abort the upload. The object will not be created.
    ///
    /// An error from the remote abort is returned, but the stream stays
    /// canceled either way.
    pub fn cancel(&mut self) -> Result<(), FsError> {
        let path = self.info.name().to_string();
        let in_flight = match &self.state {
            WriteState::Idle => None,
            WriteState::Uploading(upload) => {
                upload.ctx.cancel();
                Some((upload.upload_id.clone(), upload.ctx.timeout()))
            }
            // a failed upload was already aborted by its thread
            WriteState::Closed if self.last_error.is_some() => return Ok(()),
            WriteState::Closed => {
                return Err(FsError::Closed {
                    op: "cancel",
                    path,
                })
            }
            WriteState::Canceled => return Ok(()),
        };

        let result = match in_flight {
            None => Ok(()),
            Some((upload_id, timeout)) => {
                let _ = self.join();
                counter!("streamfs_uploads_total", "outcome" => "canceled").increment(1);
                match upload_id.get() {
                    Some(id) => {
                        debug!(path = %path, upload_id = %id, "aborting upload");
                        self.shared
                            .uploader
                            .abort_upload(&IoContext::new(timeout), object_key(&path), id)
                            .map_err(|e| FsError::from_store("cancel", path.as_str(), e))
                    }
                    None => Ok(()),
                }
            }
        };
        self.state = WriteState::Canceled;
        self.last_error = Some(FsError::Canceled { path });
        result
    }

    /// Descriptor of the object being written.
    ///
    /// Reports the bytes accepted so far. When the attribute type has a
    /// pre-signed URL field and a signer is configured, that field receives
    /// a PUT URL for the same key and attributes.
    pub fn stat(&mut self) -> Result<ObjectInfo<T>, FsError> {
        self.info.set_stat(self.written, None);
        if self.shared.signs_urls() {
            let attributes = self.shared.codec.encode(&self.attributes);
            match self.shared.presign_put(self.info.name(), &attributes) {
                Ok(url) => {
                    if let Some(attrs) = self.info.attributes_mut() {
                        self.shared.codec.set_presigned_url(attrs, url);
                    }
                }
                Err(err) => warn!(path = %self.info.name(), error = %err, "presign put failed"),
            }
        }
        Ok(self.info.clone())
    }
}

impl<T: Attributes> Write for WriteStream<T> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        self.push(buf).map_err(io::Error::from)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<T: Attributes> Drop for WriteStream<T> {
    fn drop(&mut self) {
        if let WriteState::Uploading(_) = self.state {
            warn!(path = %self.info.name(), "write stream dropped before close, aborting upload");
            if let Err(err) = self.cancel() {
                warn!(path = %self.info.name(), error = %err, "abort on drop failed");
            }
        }
    }
}
