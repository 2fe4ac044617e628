use crate::config::env::{self, EnvKey, EnvSource, MissingVar, ProcessEnv};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use url::Url;

const DEFAULT_PART_SIZE: u64 = 20 * 1024 * 1024;
const DEFAULT_TASK_NUM: usize = 5;
/// Smallest part S3 accepts for any multipart part but the last.
pub const MIN_PART_SIZE: u64 = 5 * 1024 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error(transparent)]
    Missing(#[from] MissingVar),

    #[error("invalid object storage endpoint '{0}': {1}")]
    InvalidEndpoint(String, url::ParseError),
}

#[derive(Clone, Debug, Deserialize)]
pub struct AppConfig {
    pub server_port: u16,
    pub mount_root: PathBuf,
    pub tools: ToolPaths,
    pub obs: ObsConfig,
    pub invocation: InvocationConfig,
    pub transfer: TransferConfig,
}

#[derive(Clone, Debug, Deserialize)]
pub struct ObsConfig {
    pub endpoint: String,
    pub region: String,
    pub path_style: bool,
}

/// Destination settings shared by every invocation.
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct InvocationConfig {
    pub transcode_bucket: String,
    pub dst_format: String,
    pub dst_height: String,
    pub dst_width: String,
}

/// Knobs handed to the storage gateway for every transfer.
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct TransferConfig {
    pub part_size: u64,
    pub task_num: usize,
    pub enable_checkpoint: bool,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            part_size: DEFAULT_PART_SIZE,
            task_num: DEFAULT_TASK_NUM,
            enable_checkpoint: true,
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct ToolPaths {
    pub ffmpeg: PathBuf,
    pub ffprobe: PathBuf,
}

impl ToolPaths {
    /// Prefers binaries bundled under `code_root`, otherwise relies on `PATH`.
    pub fn resolve(code_root: &Path) -> Self {
        Self {
            ffmpeg: Self::locate(code_root, "ffmpeg"),
            ffprobe: Self::locate(code_root, "ffprobe"),
        }
    }

    fn locate(code_root: &Path, tool: &str) -> PathBuf {
        let bundled = code_root.join(tool);
        if bundled.is_file() {
            bundled
        } else {
            PathBuf::from(tool)
        }
    }
}

/// Access credentials for the object store, supplied per invocation.
#[derive(Clone)]
pub struct Credentials {
    pub access_key: String,
    pub secret_key: String,
    pub security_token: Option<String>,
}

impl Credentials {
    pub fn from_env(source: &impl EnvSource) -> Self {
        Self {
            access_key: env::get_or(source, EnvKey::AccessKey, ""),
            secret_key: env::get_or(source, EnvKey::SecretKey, ""),
            security_token: None,
        }
    }

    pub fn is_complete(&self) -> bool {
        !self.access_key.is_empty() && !self.secret_key.is_empty()
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("access_key", &self.access_key)
            .field("secret_key", &"<redacted>")
            .finish()
    }
}

impl AppConfig {
    pub fn new() -> Result<Self, SettingsError> {
        Self::from_source(&ProcessEnv)
    }

    pub fn from_source(source: &impl EnvSource) -> Result<Self, SettingsError> {
        let code_root = env::get_or(source, EnvKey::CodeRoot, "/opt/function/code");

        Ok(Self {
            server_port: env::get_parsed(source, EnvKey::ServerPort, 8000),
            mount_root: PathBuf::from(env::get_or(source, EnvKey::MountRoot, "/tmp")),
            tools: ToolPaths::resolve(Path::new(&code_root)),
            obs: ObsConfig {
                endpoint: normalize_endpoint(&env::get(source, EnvKey::ObsEndpoint)?)?,
                region: env::get_or(source, EnvKey::ObsRegion, "us-east-1"),
                path_style: env::get_parsed(source, EnvKey::ObsPathStyle, true),
            },
            invocation: InvocationConfig {
                transcode_bucket: env::get(source, EnvKey::TranscodeBucket)?,
                dst_format: env::get(source, EnvKey::DstFormat)?,
                dst_height: env::get(source, EnvKey::DstHeight)?,
                dst_width: env::get(source, EnvKey::DstWidth)?,
            },
            transfer: TransferConfig {
                part_size: env::get_parsed(source, EnvKey::PartSize, DEFAULT_PART_SIZE).max(MIN_PART_SIZE),
                task_num: env::get_parsed(source, EnvKey::TaskNum, DEFAULT_TASK_NUM).max(1),
                enable_checkpoint: env::get_parsed(source, EnvKey::EnableCheckpoint, true),
            },
        })
    }
}

/// OBS endpoints are often configured as a bare host name.
fn normalize_endpoint(raw: &str) -> Result<String, SettingsError> {
    let trimmed = raw.trim().trim_end_matches('/');
    let candidate = if trimmed.contains("://") {
        trimmed.to_string()
    } else {
        format!("https://{}", trimmed)
    };

    Url::parse(&candidate).map_err(|e| SettingsError::InvalidEndpoint(raw.to_string(), e))?;
    Ok(candidate)
}
