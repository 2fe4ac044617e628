use std::collections::HashMap;
use std::env;
use std::str::FromStr;

pub enum EnvKey {
    ServerPort,
    MountRoot,
    CodeRoot,
    ObsEndpoint,
    ObsRegion,
    ObsPathStyle,
    TranscodeBucket,
    DstFormat,
    DstHeight,
    DstWidth,
    AccessKey,
    SecretKey,
    PartSize,
    TaskNum,
    EnableCheckpoint,
}

impl EnvKey {
    pub fn as_str(&self) -> &'static str {
        match self {
            EnvKey::ServerPort => "APP_PORT",
            EnvKey::MountRoot => "LOCAL_MOUNT_PATH",
            EnvKey::CodeRoot => "RUNTIME_CODE_ROOT",
            EnvKey::ObsEndpoint => "obs_endpoint",
            EnvKey::ObsRegion => "obs_region",
            EnvKey::ObsPathStyle => "obs_path_style",
            EnvKey::TranscodeBucket => "transcode_bucket_name",
            EnvKey::DstFormat => "dst_format",
            EnvKey::DstHeight => "dst_height",
            EnvKey::DstWidth => "dst_width",
            EnvKey::AccessKey => "AWS_ACCESS_KEY_ID",
            EnvKey::SecretKey => "AWS_SECRET_ACCESS_KEY",
            EnvKey::PartSize => "TRANSFER_PART_SIZE",
            EnvKey::TaskNum => "TRANSFER_TASK_NUM",
            EnvKey::EnableCheckpoint => "TRANSFER_CHECKPOINT",
        }
    }
}

/// Where configuration values are looked up. The process environment in
/// production, a plain map in tests.
pub trait EnvSource {
    fn var(&self, key: &str) -> Option<String>;
}

pub struct ProcessEnv;

impl EnvSource for ProcessEnv {
    fn var(&self, key: &str) -> Option<String> {
        env::var(key).ok()
    }
}

impl EnvSource for HashMap<String, String> {
    fn var(&self, key: &str) -> Option<String> {
        self.get(key).cloned()
    }
}

#[derive(Debug, thiserror::Error)]
#[error("missing environment variable {0}")]
pub struct MissingVar(pub &'static str);

pub fn get(source: &impl EnvSource, key: EnvKey) -> Result<String, MissingVar> {
    source.var(key.as_str()).ok_or(MissingVar(key.as_str()))
}

pub fn get_or(source: &impl EnvSource, key: EnvKey, default: &str) -> String {
    source
        .var(key.as_str())
        .unwrap_or_else(|| default.to_string())
}

pub fn get_parsed<T: FromStr>(source: &impl EnvSource, key: EnvKey, default: T) -> T {
    match source.var(key.as_str()) {
        Some(val) => val.trim().parse::<T>().unwrap_or(default),
        None => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parsed_value_falls_back_on_garbage() {
        let mut vars = HashMap::new();
        vars.insert("TRANSFER_TASK_NUM".to_string(), "lots".to_string());
        vars.insert("APP_PORT".to_string(), " 9000 ".to_string());

        assert_eq!(get_parsed(&vars, EnvKey::TaskNum, 5usize), 5);
        assert_eq!(get_parsed(&vars, EnvKey::ServerPort, 8000u16), 9000);
    }

    #[test]
    fn missing_required_var_names_the_key() {
        let vars: HashMap<String, String> = HashMap::new();
        let err = get(&vars, EnvKey::DstFormat).unwrap_err();
        assert_eq!(err.to_string(), "missing environment variable dst_format");
    }
}
