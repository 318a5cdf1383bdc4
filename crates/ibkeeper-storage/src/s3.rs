//! S3 object store: single `PutObject` for small artifacts, multipart upload
//! with per-part retries above the configured threshold.

use std::path::Path;

use async_trait::async_trait;
use aws_sdk_s3::Client;
use aws_sdk_s3::config::http::HttpResponse;
use aws_sdk_s3::error::{DisplayErrorContext, SdkError};
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{CompletedMultipartUpload, CompletedPart};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use ibkeeper_command::{RetryBudget, run_with_retry};
use ibkeeper_config::UploadSettings;
use tokio::fs::File;
use tokio::io::AsyncReadExt;
use tracing::{debug, info, warn};

use crate::error::StorageError;
use crate::store::{ObjectInfo, ObjectStore};

/// S3 (or S3-compatible) bucket.
pub struct S3Store {
  client: Client,
  bucket: String,
  multipart_threshold: u64,
  part_size: u64,
  part_retry: RetryBudget,
}

impl S3Store {
  /// Build a client from the ambient AWS configuration, overridden by the
  /// region and endpoint in `settings`. A custom endpoint switches to
  /// path-style addressing.
  pub async fn from_settings(settings: &UploadSettings) -> Self {
    let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest());
    if let Some(region) = &settings.region {
      loader = loader.region(aws_sdk_s3::config::Region::new(region.clone()));
    }
    if let Some(endpoint) = &settings.endpoint {
      loader = loader.endpoint_url(endpoint);
    }
    let shared = loader.load().await;
    let config = aws_sdk_s3::config::Builder::from(&shared)
      .force_path_style(settings.endpoint.is_some())
      .build();

    Self::new(
      Client::from_conf(config),
      settings.bucket.clone(),
      settings.multipart_threshold_bytes(),
      settings.part_size_bytes(),
      RetryBudget::new(settings.retries, settings.retry_delay()),
    )
  }

  pub fn new(
    client: Client,
    bucket: impl Into<String>,
    multipart_threshold: u64,
    part_size: u64,
    part_retry: RetryBudget,
  ) -> Self {
    Self {
      client,
      bucket: bucket.into(),
      multipart_threshold,
      part_size: part_size.max(1),
      part_retry,
    }
  }

  async fn put_whole(&self, local: &Path, key: &str, size: u64) -> Result<u64, StorageError> {
    let body = ByteStream::from_path(local)
      .await
      .map_err(|e| StorageError::io(local, std::io::Error::other(e)))?;
    self
      .client
      .put_object()
      .bucket(&self.bucket)
      .key(key)
      .body(body)
      .send()
      .await
      .map_err(|e| backend_error("put object", e))?;
    Ok(size)
  }

  async fn put_multipart(&self, local: &Path, key: &str) -> Result<u64, StorageError> {
    let create = self
      .client
      .create_multipart_upload()
      .bucket(&self.bucket)
      .key(key)
      .send()
      .await
      .map_err(|e| backend_error("create multipart upload", e))?;
    let upload_id = create
      .upload_id()
      .ok_or_else(|| StorageError::Backend {
        operation: "create multipart upload".to_string(),
        message: "no upload id returned".to_string(),
        transient: false,
      })?
      .to_string();

    match self.upload_parts(local, key, &upload_id).await {
      Ok((parts, uploaded)) => {
        self
          .client
          .complete_multipart_upload()
          .bucket(&self.bucket)
          .key(key)
          .upload_id(&upload_id)
          .multipart_upload(
            CompletedMultipartUpload::builder()
              .set_parts(Some(parts))
              .build(),
          )
          .send()
          .await
          .map_err(|e| backend_error("complete multipart upload", e))?;
        Ok(uploaded)
      }
      Err(e) => {
        let abort = self
          .client
          .abort_multipart_upload()
          .bucket(&self.bucket)
          .key(key)
          .upload_id(&upload_id)
          .send()
          .await;
        match abort {
          Ok(_) => debug!(key, "multipart upload aborted"),
          Err(abort_err) => warn!(
            key,
            error = %DisplayErrorContext(&abort_err),
            "failed to abort multipart upload, parts may remain"
          ),
        }
        Err(e)
      }
    }
  }

  async fn upload_parts(
    &self,
    local: &Path,
    key: &str,
    upload_id: &str,
  ) -> Result<(Vec<CompletedPart>, u64), StorageError> {
    let mut file = File::open(local)
      .await
      .map_err(|e| StorageError::io(local, e))?;
    let mut parts = Vec::new();
    let mut uploaded = 0u64;
    let mut part_number = 1i32;

    loop {
      let chunk = read_chunk(&mut file, self.part_size)
        .await
        .map_err(|e| StorageError::io(local, e))?;
      if chunk.is_empty() {
        break;
      }
      let len = chunk.len() as u64;

      let response = run_with_retry("upload part", self.part_retry, |_| {
        let request = self
          .client
          .upload_part()
          .bucket(&self.bucket)
          .key(key)
          .upload_id(upload_id)
          .part_number(part_number)
          .body(ByteStream::from(chunk.clone()));
        async move {
          request
            .send()
            .await
            .map_err(|e| backend_error("upload part", e))
        }
      })
      .await?;

      parts.push(
        CompletedPart::builder()
          .part_number(part_number)
          .set_e_tag(response.e_tag().map(str::to_string))
          .build(),
      );
      uploaded += len;
      debug!(key, part_number, uploaded, "part uploaded");
      part_number += 1;
    }

    Ok((parts, uploaded))
  }
}

#[async_trait]
impl ObjectStore for S3Store {
  async fn upload(&self, local: &Path, key: &str) -> Result<u64, StorageError> {
    let size = tokio::fs::metadata(local)
      .await
      .map_err(|e| StorageError::io(local, e))?
      .len();

    let uploaded = if size > self.multipart_threshold {
      self.put_multipart(local, key).await?
    } else {
      self.put_whole(local, key, size).await?
    };
    info!(bucket = %self.bucket, key, bytes = uploaded, "object uploaded");
    Ok(uploaded)
  }

  async fn list(&self, prefix: &str) -> Result<Vec<ObjectInfo>, StorageError> {
    let mut pages = self
      .client
      .list_objects_v2()
      .bucket(&self.bucket)
      .prefix(prefix)
      .into_paginator()
      .send();

    let mut objects = Vec::new();
    while let Some(page) = pages.next().await {
      let page = page.map_err(|e| backend_error("list objects", e))?;
      for object in page.contents() {
        let Some(key) = object.key() else {
          continue;
        };
        let last_modified = object
          .last_modified()
          .and_then(|t| DateTime::<Utc>::from_timestamp(t.secs(), t.subsec_nanos()))
          .unwrap_or_default();
        objects.push(ObjectInfo {
          key: key.to_string(),
          size: object.size().unwrap_or_default().max(0) as u64,
          last_modified,
        });
      }
    }
    Ok(objects)
  }

  async fn delete(&self, key: &str) -> Result<(), StorageError> {
    self
      .client
      .delete_object()
      .bucket(&self.bucket)
      .key(key)
      .send()
      .await
      .map_err(|e| backend_error("delete object", e))?;
    Ok(())
  }
}

/// Read up to `limit` bytes, fewer only at end of file.
async fn read_chunk<R: tokio::io::AsyncRead + Unpin>(reader: &mut R, limit: u64) -> std::io::Result<Bytes> {
  let mut buf = Vec::with_capacity(limit.min(64 * 1024 * 1024) as usize);
  AsyncReadExt::take(&mut *reader, limit)
    .read_to_end(&mut buf)
    .await?;
  Ok(Bytes::from(buf))
}

fn backend_error<E>(operation: &str, err: SdkError<E, HttpResponse>) -> StorageError
where
  E: std::error::Error + Send + Sync + 'static,
{
  let transient = match &err {
    SdkError::TimeoutError(_) | SdkError::DispatchFailure(_) | SdkError::ResponseError(_) => true,
    SdkError::ServiceError(service) => service.raw().status().as_u16() >= 500,
    _ => false,
  };
  StorageError::Backend {
    operation: operation.to_string(),
    message: DisplayErrorContext(&err).to_string(),
    transient,
  }
}
