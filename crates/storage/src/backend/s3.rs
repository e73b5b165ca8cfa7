//! S3-compatible object store backend.
//!
//! This module provides an [`ObjectStore`] implementation for AWS S3 and
//! S3-compatible services.
//!
//! # Credentials
//!
//! The backend never resolves credentials itself. Callers hand it an
//! [`aws_sdk_s3::config::Builder`] that already carries a region and a
//! credentials provider (typically built from the shared AWS configuration
//! loaded by the binary), and the backend layers its retry policy and
//! optional endpoint override on top.
//!
//! # Uploads
//!
//! Bodies are read one part at a time. A body that ends before the first
//! part fills is sent with a single `PutObject`; anything larger becomes a
//! multipart upload holding at most one part in memory. A multipart upload
//! that fails part-way is aborted so no orphaned parts are left billed. If
//! the upload future is dropped instead (the caller was cancelled), the abort
//! is sent from a background task that [`ObjectStore::settle`] waits for.

use crate::{
    ObjectInfo, ObjectStore, Page,
    body::Body,
    error::{ErrorKind, Result},
    validate_key,
};
use async_trait::async_trait;
use aws_sdk_s3::{
    Client,
    config::{Builder as ConfigBuilder, retry::RetryConfig},
    error::{DisplayErrorContext, SdkError},
    primitives::{ByteStream, DateTime},
    types::{CompletedMultipartUpload, CompletedPart, Object},
};
use bytes::{Bytes, BytesMut};
use exn::{OptionExt, ResultExt};
use std::error::Error as StdError;
use std::fmt::Debug;
use std::sync::Arc;
use time::OffsetDateTime;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::runtime::Handle;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_util::task::TaskTracker;

/// Generous default for concurrent S3 requests.
///
/// TODO: Adaptive rate limiting based on 429/throttling responses?
const DEFAULT_CONCURRENT_REQUESTS: usize = 100;
/// Keys per listing page; also the maximum S3 will return.
pub const DEFAULT_PAGE_SIZE: i32 = 1000;
/// Part size for multipart uploads (the S3 minimum for every part but the last).
pub const DEFAULT_PART_SIZE: usize = 5 * 1024 * 1024;
/// S3 refuses multipart uploads with more parts than this.
const MAX_PARTS: i32 = 10_000;

/// S3-compatible object store backend.
///
/// Reads and writes objects in a single bucket. Keys are used verbatim.
///
/// # Examples
///
/// ```no_run
/// use ferry_storage::backend::S3Store;
///
/// # fn example(shared: aws_sdk_s3::config::Builder) {
/// let store = S3Store::new("s3-storage-dev", shared, None);
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct S3Store {
    client: Client,
    bucket: String,
    page_size: i32,
    part_size: usize,
    /// Rate limiter for concurrent S3 requests.
    rate_limiter: Arc<Semaphore>,
    /// Aborts of multipart uploads whose writer was dropped.
    cleanup: TaskTracker,
}

impl S3Store {
    /// Create a new S3 object store backend.
    ///
    /// # Arguments
    /// * `bucket` - S3 bucket name
    /// * `config` - SDK configuration carrying region and credentials
    /// * `endpoint` - Custom endpoint URL for S3-compatible services
    pub fn new(bucket: impl Into<String>, config: ConfigBuilder, endpoint: Option<String>) -> Self {
        let mut config = config
            // Configure retry policy with exponential backoff (1 initial + 3 retries)
            .retry_config(RetryConfig::standard().with_max_attempts(4));
        if let Some(endpoint_url) = endpoint {
            // Use path-style addressing for better compatibility with
            // S3-compatible services (MinIO, LocalStack, etc.)
            config = config.endpoint_url(endpoint_url).force_path_style(true);
        }
        Self::from_client(bucket, Client::from_conf(config.build()))
    }

    /// Wrap an already-configured client.
    pub fn from_client(bucket: impl Into<String>, client: Client) -> Self {
        Self {
            client,
            bucket: bucket.into(),
            page_size: DEFAULT_PAGE_SIZE,
            part_size: DEFAULT_PART_SIZE,
            rate_limiter: Arc::new(Semaphore::new(DEFAULT_CONCURRENT_REQUESTS)),
            cleanup: TaskTracker::new(),
        }
    }

    /// Override the listing page size (clamped to `1..=1000`).
    pub fn with_page_size(mut self, page_size: i32) -> Self {
        self.page_size = page_size.clamp(1, DEFAULT_PAGE_SIZE);
        self
    }

    /// Override the multipart part size.
    ///
    /// S3 rejects parts smaller than [`DEFAULT_PART_SIZE`] (except the
    /// last), so smaller values only make sense against test doubles.
    pub fn with_part_size(mut self, part_size: usize) -> Self {
        self.part_size = part_size.max(1);
        self
    }

    /// Acquire a rate limiter permit before making an S3 API call.
    async fn acquire_permit(&self) -> OwnedSemaphorePermit {
        acquire(&self.rate_limiter).await
    }

    fn location(&self, key: &str) -> String {
        format!("s3://{}/{}", self.bucket, key)
    }

    /// Convert AWS DateTime to OffsetDateTime.
    fn parse_datetime(dt: &DateTime) -> Result<OffsetDateTime> {
        OffsetDateTime::from_unix_timestamp_nanos(dt.as_nanos())
            .or_raise(|| ErrorKind::BackendError("S3 datetime out of range".to_string()))
    }

    fn object_info(object: &Object) -> Result<Option<ObjectInfo>> {
        let Some(key) = object.key() else {
            return Ok(None);
        };
        let size = u64::try_from(object.size().unwrap_or(0)).unwrap_or(0);
        let info = ObjectInfo::new(key, size);
        Ok(Some(match object.last_modified() {
            Some(modified) => info.with_modified(Self::parse_datetime(modified)?),
            None => info,
        }))
    }

    async fn put_single(&self, key: &str, part: Bytes) -> Result<String> {
        let _permit = self.acquire_permit().await;
        let length = i64::try_from(part.len()).or_raise(|| ErrorKind::BackendError("body too large".to_string()))?;
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .content_length(length)
            .body(ByteStream::from(part))
            .send()
            .await
            .map_err(|e| network(&e))?;
        Ok(self.location(key))
    }

    async fn put_multipart<R: AsyncRead + Unpin + Send>(&self, key: &str, first: Bytes, rest: &mut R) -> Result<String> {
        let created = {
            let _permit = self.acquire_permit().await;
            self.client.create_multipart_upload().bucket(&self.bucket).key(key).send().await.map_err(|e| network(&e))?
        };
        let upload_id = created
            .upload_id()
            .ok_or_raise(|| ErrorKind::BackendError("multipart upload created without an upload id".to_string()))?;
        let pending = PendingUpload {
            client: self.client.clone(),
            bucket: self.bucket.clone(),
            key: key.to_string(),
            upload_id: upload_id.to_string(),
            rate_limiter: Arc::clone(&self.rate_limiter),
            cleanup: self.cleanup.clone(),
            armed: true,
        };

        let parts = match self.upload_parts(key, &pending.upload_id, first, rest).await {
            Ok(parts) => parts,
            Err(e) => {
                pending.abort().await;
                return Err(e);
            },
        };

        let completed = {
            let _permit = self.acquire_permit().await;
            self.client
                .complete_multipart_upload()
                .bucket(&self.bucket)
                .key(key)
                .upload_id(&pending.upload_id)
                .multipart_upload(CompletedMultipartUpload::builder().set_parts(Some(parts)).build())
                .send()
                .await
        };
        match completed {
            Ok(output) => {
                pending.disarm();
                Ok(output.location().map(str::to_string).unwrap_or_else(|| self.location(key)))
            },
            Err(e) => {
                pending.abort().await;
                Err(network(&e).into())
            },
        }
    }

    async fn upload_parts<R: AsyncRead + Unpin + Send>(
        &self,
        key: &str,
        upload_id: &str,
        first: Bytes,
        rest: &mut R,
    ) -> Result<Vec<CompletedPart>> {
        let mut parts = Vec::new();
        let mut part = first;
        let mut number = 1;
        while !part.is_empty() {
            if number > MAX_PARTS {
                exn::bail!(ErrorKind::BackendError(format!("body exceeds {MAX_PARTS} parts")));
            }
            let length =
                i64::try_from(part.len()).or_raise(|| ErrorKind::BackendError("part too large".to_string()))?;
            let uploaded = {
                let _permit = self.acquire_permit().await;
                self.client
                    .upload_part()
                    .bucket(&self.bucket)
                    .key(key)
                    .upload_id(upload_id)
                    .part_number(number)
                    .content_length(length)
                    .body(ByteStream::from(part))
                    .send()
                    .await
                    .map_err(|e| network(&e))?
            };
            tracing::debug!(bucket = %self.bucket, key, part = number, bytes = length, "Uploaded part");
            parts.push(
                CompletedPart::builder().part_number(number).set_e_tag(uploaded.e_tag().map(str::to_string)).build(),
            );
            number += 1;
            part = read_part(rest, self.part_size).await.map_err(ErrorKind::Io)?;
        }
        Ok(parts)
    }
}

/// An open multipart upload, aborted unless it completes.
///
/// Dropping it while still armed hands the abort to the store's cleanup
/// tracker, so a cancelled writer does not leave its parts behind.
struct PendingUpload {
    client: Client,
    bucket: String,
    key: String,
    upload_id: String,
    rate_limiter: Arc<Semaphore>,
    cleanup: TaskTracker,
    armed: bool,
}

impl PendingUpload {
    fn disarm(mut self) {
        self.armed = false;
    }

    async fn abort(mut self) {
        // Stays armed until the request is done, so dropping this future still aborts.
        abort_upload(&self.client, &self.rate_limiter, &self.bucket, &self.key, &self.upload_id).await;
        self.armed = false;
    }
}

impl Drop for PendingUpload {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let Ok(handle) = Handle::try_current() else {
            tracing::warn!(bucket = %self.bucket, key = %self.key, upload_id = %self.upload_id, "No runtime left to abort multipart upload");
            return;
        };
        tracing::debug!(bucket = %self.bucket, key = %self.key, upload_id = %self.upload_id, "Aborting dropped multipart upload");
        let client = self.client.clone();
        let rate_limiter = Arc::clone(&self.rate_limiter);
        let (bucket, key, upload_id) = (self.bucket.clone(), self.key.clone(), self.upload_id.clone());
        self.cleanup.spawn_on(
            async move { abort_upload(&client, &rate_limiter, &bucket, &key, &upload_id).await },
            &handle,
        );
    }
}

async fn acquire(rate_limiter: &Arc<Semaphore>) -> OwnedSemaphorePermit {
    // unwrap is safe: semaphore is never closed
    Arc::clone(rate_limiter).acquire_owned().await.unwrap()
}

async fn abort_upload(client: &Client, rate_limiter: &Arc<Semaphore>, bucket: &str, key: &str, upload_id: &str) {
    let _permit = acquire(rate_limiter).await;
    let aborted = client.abort_multipart_upload().bucket(bucket).key(key).upload_id(upload_id).send().await;
    if let Err(e) = aborted {
        tracing::warn!(bucket, key, upload_id, error = %DisplayErrorContext(&e), "Failed to abort multipart upload");
    }
}

/// Fill a buffer with up to `size` bytes, stopping early only at end of stream.
async fn read_part<R: AsyncRead + Unpin>(reader: &mut R, size: usize) -> std::io::Result<Bytes> {
    let mut buffer = BytesMut::with_capacity(size);
    while buffer.len() < size {
        let remaining = (size - buffer.len()) as u64;
        if (&mut *reader).take(remaining).read_buf(&mut buffer).await? == 0 {
            break;
        }
    }
    Ok(buffer.freeze())
}

fn network<E, R>(err: &SdkError<E, R>) -> ErrorKind
where
    E: StdError + 'static,
    R: Debug,
{
    ErrorKind::Network(DisplayErrorContext(err).to_string())
}

#[async_trait]
impl ObjectStore for S3Store {
    fn name(&self) -> &str {
        &self.bucket
    }

    async fn list_page(&self, prefix: &str, token: Option<String>) -> Result<Page> {
        let output = {
            let _permit = self.acquire_permit().await;
            self.client
                .list_objects_v2()
                .bucket(&self.bucket)
                .prefix(prefix)
                .max_keys(self.page_size)
                .set_continuation_token(token)
                .send()
                .await
                .map_err(|e| network(&e))?
        };
        let mut items = Vec::with_capacity(output.contents().len());
        for object in output.contents() {
            if let Some(info) = Self::object_info(object)? {
                items.push(info);
            }
        }
        let next = match output.is_truncated() {
            Some(true) => output.next_continuation_token().map(str::to_string),
            _ => None,
        };
        Ok(Page { items, next })
    }

    async fn get(&self, key: &str) -> Result<Bytes> {
        let key = validate_key(key)?;
        let _permit = self.acquire_permit().await;
        let output = self.client.get_object().bucket(&self.bucket).key(key).send().await.map_err(|e| {
            match e.as_service_error() {
                Some(service) if service.is_no_such_key() => ErrorKind::NotFound(key.to_string()),
                _ => network(&e),
            }
        })?;
        let data = output.body.collect().await.map_err(|e| ErrorKind::Network(e.to_string()))?;
        Ok(data.into_bytes())
    }

    async fn put(&self, key: &str, body: Body) -> Result<String> {
        let key = validate_key(key)?;
        let mut body = body;
        let first = read_part(&mut body, self.part_size).await.map_err(ErrorKind::Io)?;
        if first.len() < self.part_size {
            return self.put_single(key, first).await;
        }
        self.put_multipart(key, first, &mut body).await
    }

    async fn settle(&self) {
        self.cleanup.close();
        self.cleanup.wait().await;
        self.cleanup.reopen();
    }
}
