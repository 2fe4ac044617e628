use super::checkpoint::{self, DownloadCheckpoint, UploadCheckpoint};
use super::ObjectStore;
use crate::common::error::{InvocationError, InvocationResult};
use crate::config::settings::{Credentials, ObsConfig, TransferConfig};
use async_trait::async_trait;
use aws_sdk_s3::config::http::HttpResponse;
use aws_sdk_s3::config::{BehaviorVersion, Builder, Credentials as StaticCredentials, Region};
use aws_sdk_s3::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use aws_sdk_s3::primitives::{ByteStream, Length};
use aws_sdk_s3::types::{CompletedMultipartUpload, CompletedPart};
use aws_sdk_s3::Client;
use futures_util::{stream, StreamExt};
use std::collections::BTreeSet;
use std::io::SeekFrom;
use std::path::Path;
use tokio::fs::{self, File, OpenOptions};
use tokio::io::{AsyncSeekExt, AsyncWriteExt};
use tracing::{info, warn};

/// Attempts per part-based transfer when checkpointing is on.
const RESUME_ATTEMPTS: usize = 3;

/// Object storage gateway over the S3-compatible OBS API.
#[derive(Clone)]
pub struct StorageService {
    client: Client,
    transfer: TransferConfig,
}

impl StorageService {
    pub fn new(obs: &ObsConfig, credentials: &Credentials, transfer: TransferConfig) -> Self {
        let credentials = StaticCredentials::new(
            credentials.access_key.clone(),
            credentials.secret_key.clone(),
            credentials.security_token.clone(),
            None,
            "invocation",
        );

        let config = Builder::new()
            .behavior_version(BehaviorVersion::latest())
            .region(Region::new(obs.region.clone()))
            .endpoint_url(&obs.endpoint)
            .credentials_provider(credentials)
            .force_path_style(obs.path_style)
            .build();

        Self {
            client: Client::from_conf(config),
            transfer,
        }
    }

    fn resume_attempts(&self) -> usize {
        if self.transfer.enable_checkpoint {
            RESUME_ATTEMPTS
        } else {
            1
        }
    }

    async fn download_whole(&self, bucket: &str, key: &str, dest: &Path) -> InvocationResult<()> {
        let output = self
            .client
            .get_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| sdk_error(e, format!("failed to download {} from {}", key, bucket)))?;

        let body = output.body.into_async_read();
        tokio::pin!(body);
        let mut file = File::create(dest).await.map_err(|e| local_error(dest, e))?;
        tokio::io::copy(&mut body, &mut file)
            .await
            .map_err(|e| InvocationError::storage("StreamError", format!("failed to read {} from {}: {}", key, bucket, e)))?;
        file.flush().await.map_err(|e| local_error(dest, e))?;
        Ok(())
    }

    async fn download_parts(
        &self,
        bucket: &str,
        key: &str,
        dest: &Path,
        size: u64,
        etag: Option<String>,
    ) -> InvocationResult<()> {
        let part_size = self.transfer.part_size;
        let sidecar = checkpoint::sidecar_path(dest);

        let resumed = if self.transfer.enable_checkpoint && dest.is_file() {
            checkpoint::load::<DownloadCheckpoint>(&sidecar)
                .await
                .filter(|cp| cp.matches(bucket, key, etag.as_deref(), size, part_size))
        } else {
            None
        };

        let mut state = match resumed {
            Some(state) => {
                info!("Resuming download of {} ({} parts done)", key, state.completed.len());
                state
            }
            None => {
                let file = File::create(dest).await.map_err(|e| local_error(dest, e))?;
                file.set_len(size).await.map_err(|e| local_error(dest, e))?;
                DownloadCheckpoint {
                    bucket: bucket.to_string(),
                    key: key.to_string(),
                    etag,
                    object_size: size,
                    part_size,
                    completed: BTreeSet::new(),
                }
            }
        };

        let pending: Vec<_> = checkpoint::plan_parts(size, part_size)
            .into_iter()
            .filter(|(number, _, _)| !state.completed.contains(number))
            .collect();

        let mut fetches = stream::iter(pending)
            .map(|(number, offset, len)| self.fetch_range(bucket, key, dest, number, offset, len))
            .buffer_unordered(self.transfer.task_num.max(1));

        while let Some(done) = fetches.next().await {
            state.completed.insert(done?);
            if self.transfer.enable_checkpoint {
                if let Err(e) = checkpoint::save(&sidecar, &state).await {
                    warn!("Failed to persist download checkpoint {}: {}", sidecar.display(), e);
                }
            }
        }

        checkpoint::remove(&sidecar).await;
        Ok(())
    }

    async fn fetch_range(
        &self,
        bucket: &str,
        key: &str,
        dest: &Path,
        number: u64,
        offset: u64,
        len: u64,
    ) -> InvocationResult<u64> {
        let output = self
            .client
            .get_object()
            .bucket(bucket)
            .key(key)
            .range(format!("bytes={}-{}", offset, offset + len - 1))
            .send()
            .await
            .map_err(|e| sdk_error(e, format!("failed to download part {} of {} from {}", number, key, bucket)))?;

        let bytes = output
            .body
            .collect()
            .await
            .map_err(|e| InvocationError::storage("StreamError", format!("failed to read part {} of {}: {}", number, key, e)))?
            .into_bytes();

        let mut file = OpenOptions::new()
            .write(true)
            .open(dest)
            .await
            .map_err(|e| local_error(dest, e))?;
        file.seek(SeekFrom::Start(offset))
            .await
            .map_err(|e| local_error(dest, e))?;
        file.write_all(&bytes).await.map_err(|e| local_error(dest, e))?;
        file.flush().await.map_err(|e| local_error(dest, e))?;

        Ok(number)
    }

    async fn upload_whole(&self, bucket: &str, key: &str, src: &Path, content_type: &str) -> InvocationResult<()> {
        let body = ByteStream::from_path(src)
            .await
            .map_err(|e| InvocationError::Filesystem(format!("failed to read {}: {}", src.display(), e)))?;

        self.client
            .put_object()
            .bucket(bucket)
            .key(key)
            .content_type(content_type)
            .body(body)
            .send()
            .await
            .map_err(|e| sdk_error(e, format!("failed to upload {} to {}", key, bucket)))?;

        Ok(())
    }

    async fn upload_parts(
        &self,
        bucket: &str,
        key: &str,
        src: &Path,
        size: u64,
        content_type: &str,
    ) -> InvocationResult<()> {
        let part_size = self.transfer.part_size;
        let sidecar = checkpoint::sidecar_path(src);

        let resumed = if self.transfer.enable_checkpoint {
            checkpoint::load::<UploadCheckpoint>(&sidecar)
                .await
                .filter(|cp| cp.matches(bucket, key, size, part_size))
        } else {
            None
        };

        let mut state = match resumed {
            Some(state) => {
                info!("Resuming upload of {} ({} parts done)", key, state.parts.len());
                state
            }
            None => {
                let created = self
                    .client
                    .create_multipart_upload()
                    .bucket(bucket)
                    .key(key)
                    .content_type(content_type)
                    .send()
                    .await
                    .map_err(|e| sdk_error(e, format!("failed to start upload of {} to {}", key, bucket)))?;
                let upload_id = created
                    .upload_id()
                    .ok_or_else(|| InvocationError::storage("MissingUploadId", format!("no upload id returned for {}", key)))?
                    .to_string();
                UploadCheckpoint {
                    bucket: bucket.to_string(),
                    key: key.to_string(),
                    upload_id,
                    file_size: size,
                    part_size,
                    parts: Default::default(),
                }
            }
        };

        let upload_id = state.upload_id.clone();
        let result = self
            .send_parts(bucket, key, src, &upload_id, &sidecar, &mut state)
            .await;

        match result {
            Ok(()) => {
                checkpoint::remove(&sidecar).await;
                Ok(())
            }
            Err(e) => {
                // With checkpointing on the upload id stays in the sidecar
                // for the next attempt.
                if !self.transfer.enable_checkpoint {
                    self.abort_upload(bucket, key, &upload_id).await;
                }
                Err(e)
            }
        }
    }

    async fn send_parts(
        &self,
        bucket: &str,
        key: &str,
        src: &Path,
        upload_id: &str,
        sidecar: &Path,
        state: &mut UploadCheckpoint,
    ) -> InvocationResult<()> {
        let pending: Vec<_> = checkpoint::plan_parts(state.file_size, state.part_size)
            .into_iter()
            .filter(|(number, _, _)| !state.parts.contains_key(&(*number as i32)))
            .collect();

        let mut sends = stream::iter(pending)
            .map(|(number, offset, len)| self.send_part(bucket, key, src, upload_id, number as i32, offset, len))
            .buffer_unordered(self.transfer.task_num.max(1));

        while let Some(sent) = sends.next().await {
            let (number, etag) = sent?;
            state.parts.insert(number, etag);
            if self.transfer.enable_checkpoint {
                if let Err(e) = checkpoint::save(sidecar, &*state).await {
                    warn!("Failed to persist upload checkpoint {}: {}", sidecar.display(), e);
                }
            }
        }

        let parts = state
            .parts
            .iter()
            .map(|(number, etag)| CompletedPart::builder().part_number(*number).e_tag(etag).build())
            .collect();

        self.client
            .complete_multipart_upload()
            .bucket(bucket)
            .key(key)
            .upload_id(upload_id)
            .multipart_upload(CompletedMultipartUpload::builder().set_parts(Some(parts)).build())
            .send()
            .await
            .map_err(|e| sdk_error(e, format!("failed to complete upload of {} to {}", key, bucket)))?;

        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    async fn send_part(
        &self,
        bucket: &str,
        key: &str,
        src: &Path,
        upload_id: &str,
        number: i32,
        offset: u64,
        len: u64,
    ) -> InvocationResult<(i32, String)> {
        let body = ByteStream::read_from()
            .path(src)
            .offset(offset)
            .length(Length::Exact(len))
            .build()
            .await
            .map_err(|e| InvocationError::Filesystem(format!("failed to read part {} of {}: {}", number, src.display(), e)))?;

        let output = self
            .client
            .upload_part()
            .bucket(bucket)
            .key(key)
            .upload_id(upload_id)
            .part_number(number)
            .body(body)
            .send()
            .await
            .map_err(|e| sdk_error(e, format!("failed to upload part {} of {} to {}", number, key, bucket)))?;

        let etag = output
            .e_tag()
            .ok_or_else(|| InvocationError::storage("MissingETag", format!("no etag returned for part {} of {}", number, key)))?
            .to_string();

        Ok((number, etag))
    }

    /// Aborts the multipart upload recorded in the sidecar once no attempt
    /// is left to resume it.
    async fn abandon_upload(&self, src: &Path) {
        let sidecar = checkpoint::sidecar_path(src);
        if let Some(state) = checkpoint::load::<UploadCheckpoint>(&sidecar).await {
            self.abort_upload(&state.bucket, &state.key, &state.upload_id).await;
        }
        checkpoint::remove(&sidecar).await;
    }

    async fn abort_upload(&self, bucket: &str, key: &str, upload_id: &str) {
        if let Err(e) = self
            .client
            .abort_multipart_upload()
            .bucket(bucket)
            .key(key)
            .upload_id(upload_id)
            .send()
            .await
        {
            warn!("Failed to abort upload of {}: {}", key, DisplayErrorContext(&e));
        }
    }
}

#[async_trait]
impl ObjectStore for StorageService {
    async fn download(&self, bucket: &str, key: &str, dest: &Path) -> InvocationResult<()> {
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent).await.map_err(|e| local_error(parent, e))?;
        }

        let head = self
            .client
            .head_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| sdk_error(e, format!("failed to download {} from {}", key, bucket)))?;

        let size = head.content_length().unwrap_or(0).max(0) as u64;
        info!("⬇️ Downloading {}/{} ({} bytes)", bucket, key, size);

        if size <= self.transfer.part_size {
            return self.download_whole(bucket, key, dest).await;
        }

        let etag = head.e_tag().map(str::to_string);
        let label = format!("download of {}/{}", bucket, key);
        checkpoint::resume_transfer(self.resume_attempts(), &label, move || {
            self.download_parts(bucket, key, dest, size, etag.clone())
        })
        .await
    }

    async fn upload(&self, bucket: &str, key: &str, src: &Path) -> InvocationResult<()> {
        let size = fs::metadata(src)
            .await
            .map_err(|e| local_error(src, e))?
            .len();
        let content_type = mime_guess::from_path(src)
            .first_or_octet_stream()
            .to_string();
        info!("⬆️ Uploading {} to {}/{} ({} bytes)", src.display(), bucket, key, size);

        if size <= self.transfer.part_size {
            return self.upload_whole(bucket, key, src, &content_type).await;
        }

        let content_type = content_type.as_str();
        let label = format!("upload of {} to {}/{}", src.display(), bucket, key);
        let result = checkpoint::resume_transfer(self.resume_attempts(), &label, move || {
            self.upload_parts(bucket, key, src, size, content_type)
        })
        .await;
        if result.is_err() && self.transfer.enable_checkpoint {
            self.abandon_upload(src).await;
        }
        result
    }
}

fn sdk_error<E>(err: SdkError<E, HttpResponse>, context: String) -> InvocationError
where
    E: ProvideErrorMetadata + std::error::Error + 'static,
{
    let status = err.raw_response().map(|r| r.status().as_u16());
    classify(
        status,
        err.code(),
        err.message(),
        DisplayErrorContext(&err).to_string(),
        context,
    )
}

/// Folds an SDK failure into `StorageError { code, message }`.
pub(crate) fn classify(
    status: Option<u16>,
    code: Option<&str>,
    message: Option<&str>,
    detail: String,
    context: String,
) -> InvocationError {
    let code = match (code, status) {
        (Some(code), _) => code.to_string(),
        (None, Some(status)) => status.to_string(),
        (None, None) => "RequestFailed".to_string(),
    };
    let message = match (message, status) {
        (Some(message), Some(status)) => format!("{} (HTTP {}): {}", context, status, message),
        (Some(message), None) => format!("{}: {}", context, message),
        (None, Some(status)) => format!("{} (HTTP {})", context, status),
        (None, None) => format!("{}: {}", context, detail),
    };
    InvocationError::Storage { code, message }
}

fn local_error(path: &Path, err: std::io::Error) -> InvocationError {
    InvocationError::Filesystem(format!("{}: {}", path.display(), err))
}
