//! Resumable transfer state, persisted next to the local file.
//!
//! Sidecars live in the invocation workspace and disappear with it, so a
//! checkpoint is only picked up by a retry of the same transfer within one
//! invocation (see [`resume_transfer`]).

use crate::common::error::{InvocationError, InvocationResult};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::ffi::OsString;
use std::future::Future;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::warn;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadCheckpoint {
    pub bucket: String,
    pub key: String,
    pub etag: Option<String>,
    pub object_size: u64,
    pub part_size: u64,
    pub completed: BTreeSet<u64>,
}

impl DownloadCheckpoint {
    pub fn matches(&self, bucket: &str, key: &str, etag: Option<&str>, size: u64, part_size: u64) -> bool {
        self.bucket == bucket
            && self.key == key
            && self.etag.as_deref() == etag
            && self.object_size == size
            && self.part_size == part_size
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadCheckpoint {
    pub bucket: String,
    pub key: String,
    pub upload_id: String,
    pub file_size: u64,
    pub part_size: u64,
    /// Part number to ETag.
    pub parts: BTreeMap<i32, String>,
}

impl UploadCheckpoint {
    pub fn matches(&self, bucket: &str, key: &str, size: u64, part_size: u64) -> bool {
        self.bucket == bucket
            && self.key == key
            && self.file_size == size
            && self.part_size == part_size
    }
}

pub fn sidecar_path(local: &Path) -> PathBuf {
    let mut name = local
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_else(|| OsString::from("transfer"));
    name.push(".checkpoint");
    local.with_file_name(name)
}

/// A corrupt or unreadable sidecar counts as no checkpoint.
pub async fn load<T: DeserializeOwned>(path: &Path) -> Option<T> {
    let raw = fs::read(path).await.ok()?;
    match serde_json::from_slice(&raw) {
        Ok(state) => Some(state),
        Err(e) => {
            warn!("Ignoring unreadable checkpoint {}: {}", path.display(), e);
            None
        }
    }
}

pub async fn save<T: Serialize>(path: &Path, state: &T) -> std::io::Result<()> {
    let raw = serde_json::to_vec(state)?;
    fs::write(path, raw).await
}

pub async fn remove(path: &Path) {
    if let Err(e) = fs::remove_file(path).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!("Failed to remove checkpoint {}: {}", path.display(), e);
        }
    }
}

/// Retries a part-based transfer after a storage failure. Each attempt loads
/// the sidecar written by the previous one and only sends the parts still
/// missing. Local filesystem errors are not retried.
pub async fn resume_transfer<F, Fut>(attempts: usize, label: &str, mut transfer: F) -> InvocationResult<()>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = InvocationResult<()>>,
{
    let mut attempt = 1;
    loop {
        match transfer().await {
            Err(e @ InvocationError::Storage { .. }) if attempt < attempts => {
                warn!("{} failed on attempt {}, resuming: {}", label, attempt, e);
                attempt += 1;
            }
            result => return result,
        }
    }
}

/// Byte ranges `(part_number, offset, len)` covering `size` bytes. Part
/// numbers start at 1, as multipart uploads require.
pub fn plan_parts(size: u64, part_size: u64) -> Vec<(u64, u64, u64)> {
    let part_size = part_size.max(1);
    let mut parts = Vec::new();
    let mut offset = 0;
    let mut number = 1;
    while offset < size {
        let len = part_size.min(size - offset);
        parts.push((number, offset, len));
        offset += len;
        number += 1;
    }
    parts
}
