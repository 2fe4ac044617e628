use super::{run_tool, stderr_tail, MediaProbe};
use crate::common::error::{InvocationError, InvocationResult};
use crate::modules::transcode::model::VideoMetadata;
use async_trait::async_trait;
use serde::Deserialize;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use tracing::debug;

#[derive(Debug, Deserialize)]
struct ProbeOutput {
    #[serde(default)]
    streams: Vec<ProbeStream>,
    format: Option<ProbeFormat>,
}

#[derive(Debug, Deserialize)]
struct ProbeStream {
    height: Option<u64>,
    width: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct ProbeFormat {
    format_name: Option<String>,
}

#[derive(Debug, Clone)]
pub struct FfprobeAdapter {
    binary: PathBuf,
}

impl FfprobeAdapter {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }
}

#[async_trait]
impl MediaProbe for FfprobeAdapter {
    async fn probe(&self, path: &Path) -> InvocationResult<VideoMetadata> {
        let output = run_tool(&self.binary, &probe_args(path)).await.map_err(|e| {
            InvocationError::Probe(format!(
                "failed to run {}: {}",
                self.binary.display(),
                e
            ))
        })?;

        if !output.status.success() {
            return Err(InvocationError::Probe(format!(
                "ffprobe exited with {} for {}: {}",
                output.status,
                path.display(),
                stderr_tail(&output)
            )));
        }

        let metadata = parse_probe_output(&output.stdout)?;
        debug!(?metadata, "Probed {}", path.display());
        Ok(metadata)
    }
}

pub fn probe_args(path: &Path) -> Vec<OsString> {
    let mut args: Vec<OsString> = [
        "-v",
        "quiet",
        "-show_streams",
        "-show_format",
        "-print_format",
        "json",
        "-i",
    ]
    .into_iter()
    .map(OsString::from)
    .collect();
    args.push(path.as_os_str().to_owned());
    args
}

/// Height and width come from the first stream, whatever its type.
pub fn parse_probe_output(stdout: &[u8]) -> InvocationResult<VideoMetadata> {
    let parsed: ProbeOutput = serde_json::from_slice(stdout)
        .map_err(|e| InvocationError::Probe(format!("unparsable ffprobe output: {}", e)))?;

    let first = parsed
        .streams
        .first()
        .ok_or_else(|| InvocationError::Probe("ffprobe reported no streams".to_string()))?;

    let (height, width) = match (first.height, first.width) {
        (Some(h), Some(w)) => (h, w),
        _ => {
            return Err(InvocationError::Probe(
                "first stream has no height/width".to_string(),
            ));
        }
    };

    let format_name = parsed
        .format
        .and_then(|f| f.format_name)
        .ok_or_else(|| InvocationError::Probe("ffprobe reported no format_name".to_string()))?;

    Ok(VideoMetadata {
        height,
        width,
        format_name,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const MP4_PROBE: &str = r#"{
        "streams": [
            {"index": 0, "codec_type": "video", "codec_name": "h264", "width": 1280, "height": 720},
            {"index": 1, "codec_type": "audio", "codec_name": "aac", "sample_rate": "48000"}
        ],
        "format": {"filename": "clip.mp4", "format_name": "mov,mp4,m4a,3gp,3g2,mj2", "duration": "12.5"}
    }"#;

    #[test]
    fn extracts_first_stream_dimensions_and_format() {
        let meta = parse_probe_output(MP4_PROBE.as_bytes()).unwrap();
        assert_eq!(
            meta,
            VideoMetadata {
                height: 720,
                width: 1280,
                format_name: "mov,mp4,m4a,3gp,3g2,mj2".to_string(),
            }
        );
    }

    #[test]
    fn audio_first_stream_is_rejected() {
        let json = r#"{
            "streams": [{"codec_type": "audio"}, {"codec_type": "video", "width": 640, "height": 360}],
            "format": {"format_name": "matroska,webm"}
        }"#;
        let err = parse_probe_output(json.as_bytes()).unwrap_err();
        assert!(matches!(err, InvocationError::Probe(_)));
    }

    #[test]
    fn missing_format_is_rejected() {
        let json = r#"{"streams": [{"width": 640, "height": 360}]}"#;
        assert!(matches!(
            parse_probe_output(json.as_bytes()),
            Err(InvocationError::Probe(_))
        ));
    }

    #[test]
    fn empty_output_is_rejected() {
        assert!(matches!(parse_probe_output(b""), Err(InvocationError::Probe(_))));
        assert!(matches!(parse_probe_output(b"{}"), Err(InvocationError::Probe(_))));
    }

    #[test]
    fn args_end_with_input_path() {
        let args = probe_args(Path::new("/tmp/ws/source/clip.mp4"));
        assert_eq!(args[args.len() - 2], "-i");
        assert_eq!(args[args.len() - 1], "/tmp/ws/source/clip.mp4");
        assert!(args.iter().any(|a| a == "json"));
    }

    #[tokio::test]
    async fn missing_binary_is_a_probe_error() {
        let adapter = FfprobeAdapter::new("/nonexistent/ffprobe");
        let err = adapter.probe(Path::new("clip.mp4")).await.unwrap_err();
        assert!(matches!(err, InvocationError::Probe(_)));
    }
}
