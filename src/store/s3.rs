//! S3 object store
//!
//! Talks to Amazon S3 or an S3-compatible service (MinIO, LocalStack, ...)
//! through `aws-sdk-s3`. Retries and credentials are the SDK's business.

use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3::config::Region;
use aws_sdk_s3::error::{DisplayErrorContext, ProvideErrorMetadata};
use aws_sdk_s3::primitives::{ByteStream, DateTime};
use aws_sdk_s3::types::{CompletedMultipartUpload, CompletedPart, Delete, ObjectIdentifier};
use aws_sdk_s3::Client;
use bytes::Bytes;
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use tokio::io::AsyncReadExt;
use tracing::{debug, trace, warn};

use crate::config::S3StoreConfig;
use crate::error::{DriverError, Result};
use crate::store::{ListQuery, ListingPage, ObjectMeta, ObjectReader, ObjectStore};

/// DeleteObjects accepts at most this many keys per request
const DELETE_BATCH_LIMIT: usize = 1000;

/// How many refused keys to name in a `PartialFailure`
const FAILURE_DETAIL_KEYS: usize = 5;

/// Characters left bare in an `x-amz-copy-source` value
const COPY_SOURCE: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'/')
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

/// Object store backed by an S3 bucket
pub struct S3Store {
    client: Client,
    bucket: String,
    part_size: usize,
}

impl S3Store {
    /// Create a new S3 store from configuration
    pub async fn new(config: &S3StoreConfig, part_size: usize) -> Result<Self> {
        let mut sdk_config_builder = aws_config::defaults(BehaviorVersion::latest());

        if let Some(region) = &config.region {
            sdk_config_builder = sdk_config_builder.region(Region::new(region.clone()));
        }

        let sdk_config = sdk_config_builder.load().await;

        let mut s3_config_builder = aws_sdk_s3::config::Builder::from(&sdk_config);

        if let Some(endpoint) = &config.endpoint {
            s3_config_builder = s3_config_builder.endpoint_url(endpoint);
        }

        if config.force_path_style {
            s3_config_builder = s3_config_builder.force_path_style(true);
        }

        let client = Client::from_conf(s3_config_builder.build());

        Ok(Self::from_client(client, config.bucket.clone(), part_size))
    }

    /// Wrap an already configured client
    pub fn from_client(client: Client, bucket: String, part_size: usize) -> Self {
        Self {
            client,
            bucket,
            part_size,
        }
    }

    /// Read up to one part from the body; shorter only at end of stream
    async fn read_part(body: &mut ObjectReader, part_size: usize) -> Result<Bytes> {
        let mut buf = vec![0u8; part_size];
        let mut filled = 0;

        while filled < part_size {
            let n = body.read(&mut buf[filled..]).await?;
            if n == 0 {
                break;
            }
            filled += n;
        }

        buf.truncate(filled);
        Ok(Bytes::from(buf))
    }

    async fn upload_parts(
        &self,
        key: &str,
        upload_id: &str,
        first: Bytes,
        body: &mut ObjectReader,
    ) -> Result<u64> {
        let mut parts = Vec::new();
        let mut total = 0u64;
        let mut chunk = first;
        let mut part_number = 1i32;

        loop {
            let len = chunk.len();
            trace!("upload_part: key={} part={} size={}", key, part_number, len);

            let output = self
                .client
                .upload_part()
                .bucket(&self.bucket)
                .key(key)
                .upload_id(upload_id)
                .part_number(part_number)
                .body(ByteStream::from(chunk))
                .send()
                .await
                .map_err(|e| upstream("UploadPart", e))?;

            parts.push(
                CompletedPart::builder()
                    .set_e_tag(output.e_tag().map(str::to_string))
                    .part_number(part_number)
                    .build(),
            );
            total += len as u64;

            if len < self.part_size {
                break;
            }

            chunk = Self::read_part(body, self.part_size).await?;
            if chunk.is_empty() {
                break;
            }
            part_number += 1;
        }

        let completed = CompletedMultipartUpload::builder()
            .set_parts(Some(parts))
            .build();

        self.client
            .complete_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .upload_id(upload_id)
            .multipart_upload(completed)
            .send()
            .await
            .map_err(|e| upstream("CompleteMultipartUpload", e))?;

        Ok(total)
    }

    async fn delete_batch(&self, keys: &[String]) -> Result<Vec<String>> {
        let identifiers = keys
            .iter()
            .map(|k| {
                ObjectIdentifier::builder()
                    .key(k)
                    .build()
                    .map_err(|e| DriverError::Upstream(format!("Invalid delete key {}: {}", k, e)))
            })
            .collect::<Result<Vec<_>>>()?;

        let delete = Delete::builder()
            .set_objects(Some(identifiers))
            .quiet(true)
            .build()
            .map_err(|e| DriverError::Upstream(format!("Failed to build delete: {}", e)))?;

        let output = self
            .client
            .delete_objects()
            .bucket(&self.bucket)
            .delete(delete)
            .send()
            .await
            .map_err(|e| upstream("DeleteObjects", e))?;

        Ok(output
            .errors()
            .iter()
            .map(|err| {
                format!(
                    "{}: {}",
                    err.key().unwrap_or("?"),
                    err.code().unwrap_or("unknown error")
                )
            })
            .collect())
    }
}

/// Aborts an in-flight multipart upload unless disarmed.
///
/// Dropping an armed guard (for example when the upload task is cancelled
/// mid-part) spawns the abort on the current runtime.
struct MultipartGuard {
    client: Client,
    bucket: String,
    key: String,
    upload_id: String,
    armed: bool,
}

impl MultipartGuard {
    fn new(client: Client, bucket: &str, key: &str, upload_id: &str) -> Self {
        Self {
            client,
            bucket: bucket.to_string(),
            key: key.to_string(),
            upload_id: upload_id.to_string(),
            armed: true,
        }
    }

    fn disarm(mut self) {
        self.armed = false;
    }

    /// Abort now and wait for the request
    async fn abort(mut self) {
        self.armed = false;
        abort_multipart(
            self.client.clone(),
            self.bucket.clone(),
            self.key.clone(),
            self.upload_id.clone(),
        )
        .await;
    }
}

impl Drop for MultipartGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }

        let cleanup = abort_multipart(
            self.client.clone(),
            std::mem::take(&mut self.bucket),
            std::mem::take(&mut self.key),
            std::mem::take(&mut self.upload_id),
        );

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                debug!("Upload cancelled, aborting multipart upload in background");
                handle.spawn(cleanup);
            }
            Err(_) => warn!("No runtime to abort an abandoned multipart upload"),
        }
    }
}

async fn abort_multipart(client: Client, bucket: String, key: String, upload_id: String) {
    if let Err(e) = client
        .abort_multipart_upload()
        .bucket(&bucket)
        .key(&key)
        .upload_id(&upload_id)
        .send()
        .await
    {
        warn!(
            "Failed to abort multipart upload {} for {}: {}",
            upload_id,
            key,
            DisplayErrorContext(e)
        );
    } else {
        debug!("Aborted multipart upload {} for {}", upload_id, key);
    }
}

/// `bucket/key` with the key percent-encoded for the CopySource header
fn copy_source(bucket: &str, key: &str) -> String {
    format!("{}/{}", bucket, utf8_percent_encode(key, COPY_SOURCE))
}

/// Map an SDK failure to `Upstream`, naming the operation
fn upstream<E: std::error::Error>(operation: &str, err: E) -> DriverError {
    DriverError::Upstream(format!("S3 {} error: {}", operation, DisplayErrorContext(err)))
}

fn to_system_time(dt: Option<&DateTime>) -> Option<SystemTime> {
    dt.and_then(|dt| {
        SystemTime::UNIX_EPOCH.checked_add(Duration::from_secs(dt.secs().max(0) as u64))
    })
}

#[async_trait]
impl ObjectStore for S3Store {
    async fn list_objects(&self, query: &ListQuery) -> Result<ListingPage> {
        trace!(
            "list_objects: prefix={:?} delimiter={:?}",
            query.prefix,
            query.delimiter
        );

        let mut request = self
            .client
            .list_objects_v2()
            .bucket(&self.bucket)
            .prefix(&query.prefix);

        if let Some(delimiter) = &query.delimiter {
            request = request.delimiter(delimiter);
        }
        if let Some(token) = &query.continuation {
            request = request.continuation_token(token);
        }
        if let Some(max_keys) = query.max_keys {
            request = request.max_keys(max_keys.min(i32::MAX as usize) as i32);
        }

        let output = request.send().await.map_err(|e| {
            let service_error = e.into_service_error();
            DriverError::Upstream(format!(
                "S3 ListObjectsV2 error for prefix '{}': {}",
                query.prefix,
                DisplayErrorContext(service_error)
            ))
        })?;

        let contents = output
            .contents()
            .iter()
            .filter_map(|obj| {
                obj.key().map(|key| ObjectMeta {
                    key: key.to_string(),
                    size: obj.size().unwrap_or(0).max(0) as u64,
                    last_modified: to_system_time(obj.last_modified()),
                })
            })
            .collect();

        let common_prefixes = output
            .common_prefixes()
            .iter()
            .filter_map(|p| p.prefix().map(str::to_string))
            .collect();

        let next_token = if output.is_truncated().unwrap_or(false) {
            output.next_continuation_token().map(str::to_string)
        } else {
            None
        };

        Ok(ListingPage {
            common_prefixes,
            contents,
            next_token,
        })
    }

    async fn head_object(&self, key: &str) -> Result<ObjectMeta> {
        trace!("head_object: key={}", key);

        let output = self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| {
                let service_error = e.into_service_error();
                if service_error.is_not_found() {
                    DriverError::NotFound(format!("No such key: {}", key))
                } else {
                    DriverError::Upstream(format!(
                        "S3 HeadObject error: {}",
                        DisplayErrorContext(service_error)
                    ))
                }
            })?;

        Ok(ObjectMeta {
            key: key.to_string(),
            size: output.content_length().unwrap_or(0).max(0) as u64,
            last_modified: to_system_time(output.last_modified()),
        })
    }

    async fn get_object(&self, key: &str) -> Result<(ObjectMeta, ObjectReader)> {
        trace!("get_object: key={}", key);

        let output = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| {
                let service_error = e.into_service_error();
                if service_error.is_no_such_key() {
                    DriverError::NotFound(format!("No such key: {}", key))
                } else {
                    DriverError::Upstream(format!(
                        "S3 GetObject error: {}",
                        DisplayErrorContext(service_error)
                    ))
                }
            })?;

        let meta = ObjectMeta {
            key: key.to_string(),
            size: output.content_length().unwrap_or(0).max(0) as u64,
            last_modified: to_system_time(output.last_modified()),
        };

        let reader: ObjectReader = Box::pin(output.body.into_async_read());
        Ok((meta, reader))
    }

    async fn put_object(&self, key: &str, body: Bytes) -> Result<()> {
        debug!("put_object: key={} size={}", key, body.len());

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(ByteStream::from(body))
            .send()
            .await
            .map_err(|e| upstream("PutObject", e))?;

        Ok(())
    }

    async fn upload(&self, key: &str, mut body: ObjectReader) -> Result<u64> {
        let first = Self::read_part(&mut body, self.part_size).await?;

        // Small objects never leave the first part
        if first.len() < self.part_size {
            let size = first.len() as u64;
            self.put_object(key, first).await?;
            return Ok(size);
        }

        debug!("upload: key={} switching to multipart", key);

        let created = self
            .client
            .create_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| upstream("CreateMultipartUpload", e))?;

        let upload_id = created.upload_id().map(str::to_string).ok_or_else(|| {
            DriverError::Upstream("S3 CreateMultipartUpload returned no upload id".to_string())
        })?;

        // Armed until the upload completes, so a cancelled task still aborts
        let guard = MultipartGuard::new(self.client.clone(), &self.bucket, key, &upload_id);

        match self.upload_parts(key, &upload_id, first, &mut body).await {
            Ok(total) => {
                guard.disarm();
                Ok(total)
            }
            Err(e) => {
                guard.abort().await;
                Err(e)
            }
        }
    }

    async fn copy_object(&self, src: &str, dst: &str) -> Result<()> {
        debug!("copy_object: {} -> {}", src, dst);

        self.client
            .copy_object()
            .bucket(&self.bucket)
            .key(dst)
            .copy_source(copy_source(&self.bucket, src))
            .send()
            .await
            .map_err(|e| {
                let service_error = e.into_service_error();
                if service_error.code() == Some("NoSuchKey") {
                    DriverError::NotFound(format!("No such key: {}", src))
                } else {
                    DriverError::Upstream(format!(
                        "S3 CopyObject error: {}",
                        DisplayErrorContext(service_error)
                    ))
                }
            })?;

        Ok(())
    }

    async fn delete_objects(&self, keys: &[String]) -> Result<()> {
        debug!("delete_objects: {} key(s)", keys.len());

        let mut refused = Vec::new();
        for batch in keys.chunks(DELETE_BATCH_LIMIT) {
            refused.extend(self.delete_batch(batch).await?);
        }

        if refused.is_empty() {
            return Ok(());
        }

        let shown: Vec<&str> = refused
            .iter()
            .take(FAILURE_DETAIL_KEYS)
            .map(String::as_str)
            .collect();

        Err(DriverError::PartialFailure {
            failed: refused.len(),
            total: keys.len(),
            detail: shown.join(", "),
        })
    }
}
