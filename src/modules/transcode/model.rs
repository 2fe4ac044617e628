use serde::Serialize;
use std::path::PathBuf;
use utoipa::ToSchema;

pub const SEGMENTED_FORMAT: &str = "m3u8";
pub const SEGMENT_SECONDS: u32 = 10;

/// What the probe reports about a source file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoMetadata {
    pub height: u64,
    pub width: u64,
    pub format_name: String,
}

/// Target frame size, kept as the configured strings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dimensions {
    pub width: String,
    pub height: String,
}

impl Dimensions {
    /// Value for ffmpeg's `-s` flag.
    pub fn as_arg(&self) -> String {
        format!("{}x{}", self.width, self.height)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum TranscodeMode {
    Direct,
    Segmented,
}

impl TranscodeMode {
    pub fn for_format(dst_format: &str) -> Self {
        if dst_format == SEGMENTED_FORMAT {
            Self::Segmented
        } else {
            Self::Direct
        }
    }
}

/// Files left behind by a segmented transcode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentedOutput {
    pub segment_dir: PathBuf,
    pub playlist: PathBuf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum OutcomeKind {
    Skipped,
    Transcoded,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct InvocationOutcome {
    pub outcome: OutcomeKind,
    pub mode: Option<TranscodeMode>,
    pub uploaded_keys: Vec<String>,
}

impl InvocationOutcome {
    pub fn skipped() -> Self {
        Self {
            outcome: OutcomeKind::Skipped,
            mode: None,
            uploaded_keys: Vec::new(),
        }
    }

    pub fn transcoded(mode: TranscodeMode, uploaded_keys: Vec<String>) -> Self {
        Self {
            outcome: OutcomeKind::Transcoded,
            mode: Some(mode),
            uploaded_keys,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_literal_m3u8_selects_segmented_mode() {
        assert_eq!(TranscodeMode::for_format("m3u8"), TranscodeMode::Segmented);
        assert_eq!(TranscodeMode::for_format("mp4"), TranscodeMode::Direct);
        assert_eq!(TranscodeMode::for_format("M3U8"), TranscodeMode::Direct);
        assert_eq!(TranscodeMode::for_format("ts"), TranscodeMode::Direct);
    }

    #[test]
    fn dimensions_render_width_first() {
        let dims = Dimensions {
            width: "640".into(),
            height: "360".into(),
        };
        assert_eq!(dims.as_arg(), "640x360");
    }

    #[test]
    fn outcome_serializes_lowercase() {
        let json = serde_json::to_value(InvocationOutcome::transcoded(
            TranscodeMode::Direct,
            vec!["mp4/clip.mp4".into()],
        ))
        .unwrap();
        assert_eq!(json["outcome"], "transcoded");
        assert_eq!(json["mode"], "direct");
        assert_eq!(json["uploaded_keys"][0], "mp4/clip.mp4");
    }
}
