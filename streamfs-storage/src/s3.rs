//! AWS S3 Object Store Implementation
//!
//! The SDK is async; the store owns a Tokio runtime and blocks on it so the
//! rest of the crate stays synchronous. Every call races its future against
//! the context deadline and cancellation token.

use crate::context::IoContext;
use crate::traits::{
    GetObjectOutput, HeadObjectOutput, ListPage, ObjectAttributes, ObjectStore, ObjectStoreError,
    ObjectSummary, UploadId, Uploader, UrlSigner,
};
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::presigning::PresigningConfig;
use aws_sdk_s3::primitives::{ByteStream, DateTime as AwsDateTime};
use aws_sdk_s3::types::{CompletedMultipartUpload, CompletedPart, StorageClass};
use aws_sdk_s3::Client;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::future::Future;
use std::io::{self, Read};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Runtime;
use tracing::{debug, instrument};

/// Minimum part size S3 accepts for every part but the last.
pub const DEFAULT_PART_SIZE: usize = 5 * 1024 * 1024;

/// AWS S3 object store implementation.
#[derive(Clone)]
pub struct S3ObjectStore {
    client: Client,
    bucket: String,
    part_size: usize,
    runtime: Arc<Runtime>,
}

impl std::fmt::Debug for S3ObjectStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("S3ObjectStore")
            .field("bucket", &self.bucket)
            .field("part_size", &self.part_size)
            .finish()
    }
}

impl S3ObjectStore {
    /// Connect using credentials and region from the environment.
    pub fn new(bucket: impl Into<String>) -> Result<Self, ObjectStoreError> {
        let runtime = Runtime::new().map_err(|e| ObjectStoreError::Configuration(e.to_string()))?;
        let client = runtime.block_on(async {
            let config = aws_config::load_from_env().await;
            Client::new(&config)
        });
        Ok(Self::from_parts(client, bucket, runtime))
    }

    /// Connect to an S3-compatible endpoint (MinIO, LocalStack).
    pub fn with_endpoint(
        bucket: impl Into<String>,
        endpoint_url: impl Into<String>,
        region: impl Into<String>,
    ) -> Result<Self, ObjectStoreError> {
        let runtime = Runtime::new().map_err(|e| ObjectStoreError::Configuration(e.to_string()))?;
        let endpoint = endpoint_url.into();
        let region_str = region.into();

        let client = runtime.block_on(async {
            let config = aws_config::from_env()
                .endpoint_url(&endpoint)
                .region(aws_sdk_s3::config::Region::new(region_str))
                .load()
                .await;
            let s3_config = aws_sdk_s3::config::Builder::from(&config)
                .force_path_style(true)
                .build();
            Client::from_conf(s3_config)
        });
        Ok(Self::from_parts(client, bucket, runtime))
    }

    /// Use an already configured client.
    pub fn with_client(client: Client, bucket: impl Into<String>) -> Result<Self, ObjectStoreError> {
        let runtime = Runtime::new().map_err(|e| ObjectStoreError::Configuration(e.to_string()))?;
        Ok(Self::from_parts(client, bucket, runtime))
    }

    fn from_parts(client: Client, bucket: impl Into<String>, runtime: Runtime) -> Self {
        Self {
            client,
            bucket: bucket.into(),
            part_size: DEFAULT_PART_SIZE,
            runtime: Arc::new(runtime),
        }
    }

    pub fn with_part_size(mut self, part_size: usize) -> Self {
        self.part_size = part_size.max(DEFAULT_PART_SIZE);
        self
    }

    fn run_async<F, T>(&self, ctx: &IoContext, what: &str, fut: F) -> Result<T, ObjectStoreError>
    where
        F: Future<Output = Result<T, ObjectStoreError>>,
    {
        block_on_with(&self.runtime, ctx, what, fut)
    }
}

/// Drive `fut` to completion unless the deadline passes or the token fires first.
fn block_on_with<F, T>(runtime: &Runtime, ctx: &IoContext, what: &str, fut: F) -> Result<T, ObjectStoreError>
where
    F: Future<Output = Result<T, ObjectStoreError>>,
{
    ctx.check(what)?;
    let remaining = ctx.remaining();
    let token = ctx.token();
    runtime.block_on(async {
        tokio::select! {
            biased;
            _ = token.cancelled() => Err(ObjectStoreError::Canceled(what.to_string())),
            res = tokio::time::timeout(remaining, fut) => match res {
                Ok(inner) => inner,
                Err(_) => Err(ObjectStoreError::Timeout(format!("{} exceeded {:?}", what, remaining))),
            },
        }
    })
}

fn provider<E: std::error::Error>(err: E) -> ObjectStoreError {
    ObjectStoreError::Provider(DisplayErrorContext(err).to_string())
}

fn to_chrono(t: &AwsDateTime) -> Option<DateTime<Utc>> {
    DateTime::<Utc>::from_timestamp(t.secs(), t.subsec_nanos())
}

fn to_aws(t: &DateTime<Utc>) -> AwsDateTime {
    AwsDateTime::from_secs(t.timestamp())
}

fn parse_http_date(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc2822(value)
        .ok()
        .map(|t| t.with_timezone(&Utc))
}

/// Blocking adapter over a streaming response body.
struct S3Body {
    stream: ByteStream,
    pending: Bytes,
    runtime: Arc<Runtime>,
    ctx: IoContext,
}

impl Read for S3Body {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        while self.pending.is_empty() {
            let stream = &mut self.stream;
            let next = block_on_with(&self.runtime, &self.ctx, "read body", async move {
                match stream.next().await {
                    Some(Ok(chunk)) => Ok(Some(chunk)),
                    Some(Err(e)) => Err(ObjectStoreError::Network(e.to_string())),
                    None => Ok(None),
                }
            });
            match next {
                Ok(Some(chunk)) => self.pending = chunk,
                Ok(None) => return Ok(0),
                Err(ObjectStoreError::Canceled(what)) => {
                    return Err(io::Error::new(io::ErrorKind::ConnectionAborted, what))
                }
                Err(ObjectStoreError::Timeout(what)) => {
                    return Err(io::Error::new(io::ErrorKind::TimedOut, what))
                }
                Err(e) => return Err(io::Error::other(e.to_string())),
            }
        }
        let n = buf.len().min(self.pending.len());
        buf[..n].copy_from_slice(&self.pending.split_to(n));
        Ok(n)
    }
}

/// Fill `buf` from `body`, stopping early only at end of input.
fn fill_part(body: &mut dyn Read, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match body.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

impl ObjectStore for S3ObjectStore {
    fn bucket(&self) -> &str {
        &self.bucket
    }

    #[instrument(skip(self, ctx))]
    fn head_object(&self, ctx: &IoContext, key: &str) -> Result<HeadObjectOutput, ObjectStoreError> {
        self.run_async(ctx, "head object", async {
            let resp = match self
                .client
                .head_object()
                .bucket(&self.bucket)
                .key(key)
                .send()
                .await
            {
                Ok(resp) => resp,
                Err(e) => {
                    let service_err = e.into_service_error();
                    if service_err.is_not_found() {
                        return Err(ObjectStoreError::NotFound(key.to_string()));
                    }
                    return Err(provider(service_err));
                }
            };

            let last_modified = resp.last_modified().and_then(to_chrono);
            Ok(HeadObjectOutput {
                size: resp.content_length().unwrap_or(0).max(0) as u64,
                last_modified,
                attributes: ObjectAttributes {
                    cache_control: resp.cache_control().map(str::to_string),
                    content_encoding: resp.content_encoding().map(str::to_string),
                    content_language: resp.content_language().map(str::to_string),
                    content_type: resp.content_type().map(str::to_string),
                    expires: resp.expires_string().and_then(parse_http_date),
                    etag: resp.e_tag().map(str::to_string),
                    last_modified,
                    storage_class: resp.storage_class().map(|s| s.as_str().to_string()),
                    metadata: resp.metadata().cloned().unwrap_or_default(),
                },
            })
        })
    }

    #[instrument(skip(self, ctx))]
    fn get_object(&self, ctx: &IoContext, key: &str) -> Result<GetObjectOutput, ObjectStoreError> {
        let resp = self.run_async(ctx, "get object", async {
            self.client
                .get_object()
                .bucket(&self.bucket)
                .key(key)
                .send()
                .await
                .map_err(|e| {
                    let service_err = e.into_service_error();
                    if service_err.is_no_such_key() {
                        ObjectStoreError::NotFound(key.to_string())
                    } else {
                        provider(service_err)
                    }
                })
        })?;

        let last_modified = resp.last_modified().and_then(to_chrono);
        let attributes = ObjectAttributes {
            cache_control: resp.cache_control().map(str::to_string),
            content_encoding: resp.content_encoding().map(str::to_string),
            content_language: resp.content_language().map(str::to_string),
            content_type: resp.content_type().map(str::to_string),
            expires: resp.expires_string().and_then(parse_http_date),
            etag: resp.e_tag().map(str::to_string),
            last_modified,
            storage_class: resp.storage_class().map(|s| s.as_str().to_string()),
            metadata: resp.metadata().cloned().unwrap_or_default(),
        };
        Ok(GetObjectOutput {
            size: resp.content_length().unwrap_or(0).max(0) as u64,
            last_modified,
            attributes,
            body: Box::new(S3Body {
                stream: resp.body,
                pending: Bytes::new(),
                runtime: self.runtime.clone(),
                ctx: ctx.clone(),
            }),
        })
    }

    #[instrument(skip(self, ctx))]
    fn list_objects(
        &self,
        ctx: &IoContext,
        prefix: &str,
        max_keys: usize,
        start_after: Option<&str>,
    ) -> Result<ListPage, ObjectStoreError> {
        self.run_async(ctx, "list objects", async {
            let mut req = self
                .client
                .list_objects_v2()
                .bucket(&self.bucket)
                .prefix(prefix)
                .max_keys(max_keys.min(i32::MAX as usize) as i32);
            if let Some(after) = start_after {
                req = req.start_after(after);
            }
            let resp = req.send().await.map_err(provider)?;

            let objects: Vec<ObjectSummary> = resp
                .contents()
                .iter()
                .filter_map(|object| {
                    object.key().map(|key| ObjectSummary {
                        key: key.to_string(),
                        size: object.size().unwrap_or(0).max(0) as u64,
                        last_modified: object.last_modified().and_then(to_chrono),
                    })
                })
                .collect();

            let truncated = resp.is_truncated().unwrap_or(false)
                || resp.next_continuation_token().is_some();
            let next_marker = if truncated {
                objects.last().map(|o| o.key.clone())
            } else {
                None
            };
            debug!(prefix, count = objects.len(), truncated, "listed page");
            Ok(ListPage {
                objects,
                next_marker,
            })
        })
    }

    #[instrument(skip(self, ctx))]
    fn delete_object(&self, ctx: &IoContext, key: &str) -> Result<(), ObjectStoreError> {
        self.run_async(ctx, "delete object", async {
            self.client
                .delete_object()
                .bucket(&self.bucket)
                .key(key)
                .send()
                .await
                .map_err(provider)?;
            Ok(())
        })
    }

    #[instrument(skip(self, ctx))]
    fn copy_object(
        &self,
        ctx: &IoContext,
        source_key: &str,
        target_bucket: &str,
        target_key: &str,
    ) -> Result<(), ObjectStoreError> {
        let copy_source = format!("{}/{}", self.bucket, source_key);
        self.run_async(ctx, "copy object", async {
            self.client
                .copy_object()
                .bucket(target_bucket)
                .copy_source(copy_source)
                .key(target_key)
                .send()
                .await
                .map_err(provider)?;
            Ok(())
        })
    }

    fn store_type(&self) -> &'static str {
        "s3"
    }
}

impl Uploader for S3ObjectStore {
    #[instrument(skip(self, ctx, attributes))]
    fn begin_upload(
        &self,
        ctx: &IoContext,
        key: &str,
        attributes: &ObjectAttributes,
    ) -> Result<UploadId, ObjectStoreError> {
        self.run_async(ctx, "create multipart upload", async {
            let metadata = if attributes.metadata.is_empty() {
                None
            } else {
                Some(attributes.metadata.clone())
            };
            let resp = self
                .client
                .create_multipart_upload()
                .bucket(&self.bucket)
                .key(key)
                .set_cache_control(attributes.cache_control.clone())
                .set_content_encoding(attributes.content_encoding.clone())
                .set_content_language(attributes.content_language.clone())
                .set_content_type(attributes.content_type.clone())
                .set_expires(attributes.expires.as_ref().map(to_aws))
                .set_storage_class(attributes.storage_class.as_deref().map(StorageClass::from))
                .set_metadata(metadata)
                .send()
                .await
                .map_err(provider)?;
            resp.upload_id()
                .map(UploadId::new)
                .ok_or_else(|| ObjectStoreError::Provider("upload id missing from response".into()))
        })
    }

    #[instrument(skip(self, ctx, body))]
    fn upload_parts(
        &self,
        ctx: &IoContext,
        key: &str,
        upload_id: &UploadId,
        body: &mut dyn Read,
    ) -> Result<(), ObjectStoreError> {
        let mut parts = Vec::new();
        let mut buf = vec![0u8; self.part_size];
        let mut part_number = 1i32;

        loop {
            let filled = fill_part(body, &mut buf)?;
            // S3 needs at least one part, even for an empty object
            if filled == 0 && !parts.is_empty() {
                break;
            }
            let chunk = buf[..filled].to_vec();
            let etag = self.run_async(ctx, "upload part", async {
                let resp = self
                    .client
                    .upload_part()
                    .bucket(&self.bucket)
                    .key(key)
                    .upload_id(upload_id.as_str())
                    .part_number(part_number)
                    .body(ByteStream::from(chunk))
                    .send()
                    .await
                    .map_err(provider)?;
                Ok(resp.e_tag().map(str::to_string))
            })?;
            debug!(key, part_number, size = filled, "uploaded part");
            parts.push(
                CompletedPart::builder()
                    .set_e_tag(etag)
                    .part_number(part_number)
                    .build(),
            );
            if filled < buf.len() {
                break;
            }
            part_number += 1;
        }

        self.run_async(ctx, "complete multipart upload", async {
            self.client
                .complete_multipart_upload()
                .bucket(&self.bucket)
                .key(key)
                .upload_id(upload_id.as_str())
                .multipart_upload(
                    CompletedMultipartUpload::builder()
                        .set_parts(Some(parts))
                        .build(),
                )
                .send()
                .await
                .map_err(provider)?;
            Ok(())
        })
    }

    #[instrument(skip(self, ctx))]
    fn abort_upload(
        &self,
        ctx: &IoContext,
        key: &str,
        upload_id: &UploadId,
    ) -> Result<(), ObjectStoreError> {
        self.run_async(ctx, "abort multipart upload", async {
            self.client
                .abort_multipart_upload()
                .bucket(&self.bucket)
                .key(key)
                .upload_id(upload_id.as_str())
                .send()
                .await
                .map_err(|e| {
                    let service_err = e.into_service_error();
                    if service_err.is_no_such_upload() {
                        ObjectStoreError::NotFound(format!("upload {}", upload_id))
                    } else {
                        provider(service_err)
                    }
                })?;
            Ok(())
        })
    }
}

impl UrlSigner for S3ObjectStore {
    fn presign_get(&self, ctx: &IoContext, key: &str, ttl: Duration) -> Result<String, ObjectStoreError> {
        let config = PresigningConfig::expires_in(ttl)
            .map_err(|e| ObjectStoreError::Configuration(e.to_string()))?;
        self.run_async(ctx, "presign get", async {
            let req = self
                .client
                .get_object()
                .bucket(&self.bucket)
                .key(key)
                .presigned(config)
                .await
                .map_err(provider)?;
            Ok(req.uri().to_string())
        })
    }

    fn presign_put(
        &self,
        ctx: &IoContext,
        key: &str,
        attributes: &ObjectAttributes,
        ttl: Duration,
    ) -> Result<String, ObjectStoreError> {
        let config = PresigningConfig::expires_in(ttl)
            .map_err(|e| ObjectStoreError::Configuration(e.to_string()))?;
        self.run_async(ctx, "presign put", async {
            let metadata = if attributes.metadata.is_empty() {
                None
            } else {
                Some(attributes.metadata.clone())
            };
            let req = self
                .client
                .put_object()
                .bucket(&self.bucket)
                .key(key)
                .set_cache_control(attributes.cache_control.clone())
                .set_content_encoding(attributes.content_encoding.clone())
                .set_content_language(attributes.content_language.clone())
                .set_content_type(attributes.content_type.clone())
                .set_expires(attributes.expires.as_ref().map(to_aws))
                .set_storage_class(attributes.storage_class.as_deref().map(StorageClass::from))
                .set_metadata(metadata)
                .presigned(config)
                .await
                .map_err(provider)?;
            Ok(req.uri().to_string())
        })
    }
}
