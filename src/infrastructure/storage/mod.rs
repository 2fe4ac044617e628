pub mod checkpoint;
pub mod s3;

use crate::common::error::InvocationResult;
use async_trait::async_trait;
use std::path::Path;

pub use s3::StorageService;

/// Blocking-per-call object transfers. Part-level parallelism stays behind
/// this boundary.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn download(&self, bucket: &str, key: &str, dest: &Path) -> InvocationResult<()>;

    async fn upload(&self, bucket: &str, key: &str, src: &Path) -> InvocationResult<()>;
}
