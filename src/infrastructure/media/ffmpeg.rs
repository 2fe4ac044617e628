use super::{run_tool, stderr_tail, Transcoder};
use crate::common::error::{InvocationError, InvocationResult};
use crate::modules::transcode::model::{Dimensions, SegmentedOutput};
use async_trait::async_trait;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::info;

pub const SEGMENT_DIR: &str = "m3u8";

#[derive(Debug, Clone)]
pub struct FfmpegExecutor {
    binary: PathBuf,
}

impl FfmpegExecutor {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    async fn run_step(&self, step: &str, src: &Path, args: Vec<OsString>) -> InvocationResult<()> {
        let output = run_tool(&self.binary, &args).await.map_err(|e| {
            InvocationError::Transcode(format!(
                "failed to run {} ({}): {}",
                self.binary.display(),
                step,
                e
            ))
        })?;

        if !output.status.success() {
            return Err(InvocationError::Transcode(format!(
                "{} of {} exited with {}: {}",
                step,
                src.display(),
                output.status,
                stderr_tail(&output)
            )));
        }

        Ok(())
    }
}

#[async_trait]
impl Transcoder for FfmpegExecutor {
    async fn transcode_direct(
        &self,
        src: &Path,
        dst: &Path,
        dimensions: &Dimensions,
    ) -> InvocationResult<()> {
        info!("🎥 Transcoding {} -> {} at {}", src.display(), dst.display(), dimensions.as_arg());
        self.run_step("re-encode", src, direct_args(src, dst, dimensions))
            .await
    }

    async fn transcode_segmented(
        &self,
        src: &Path,
        work_dir: &Path,
        short_name: &str,
        dimensions: &Dimensions,
        segment_seconds: u32,
    ) -> InvocationResult<SegmentedOutput> {
        let segment_dir = work_dir.join(SEGMENT_DIR);
        fs::create_dir_all(&segment_dir).await.map_err(|e| {
            InvocationError::Filesystem(format!(
                "failed to create {}: {}",
                segment_dir.display(),
                e
            ))
        })?;

        let intermediate = work_dir.join(format!("{}.ts", short_name));
        let playlist = segment_dir.join(format!("{}.m3u8", short_name));
        let pattern = segment_dir.join(format!("{}_%03d.ts", short_name));

        info!("🎥 Transcoding {} -> {} at {}", src.display(), intermediate.display(), dimensions.as_arg());
        self.run_step("re-encode", src, direct_args(src, &intermediate, dimensions))
            .await?;

        info!("✂️ Segmenting {} every {}s", intermediate.display(), segment_seconds);
        self.run_step(
            "segmentation",
            src,
            segment_args(&intermediate, &playlist, &pattern, segment_seconds),
        )
        .await?;

        Ok(SegmentedOutput {
            segment_dir,
            playlist,
        })
    }
}

pub fn direct_args(src: &Path, dst: &Path, dimensions: &Dimensions) -> Vec<OsString> {
    vec![
        "-y".into(),
        "-i".into(),
        src.as_os_str().to_owned(),
        "-s".into(),
        dimensions.as_arg().into(),
        dst.as_os_str().to_owned(),
    ]
}

pub fn segment_args(
    intermediate: &Path,
    playlist: &Path,
    pattern: &Path,
    segment_seconds: u32,
) -> Vec<OsString> {
    vec![
        "-y".into(),
        "-i".into(),
        intermediate.as_os_str().to_owned(),
        "-c".into(),
        "copy".into(),
        "-map".into(),
        "0".into(),
        "-f".into(),
        "segment".into(),
        "-segment_list".into(),
        playlist.as_os_str().to_owned(),
        "-segment_time".into(),
        segment_seconds.to_string().into(),
        pattern.as_os_str().to_owned(),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dims() -> Dimensions {
        Dimensions {
            width: "640".into(),
            height: "360".into(),
        }
    }

    #[test]
    fn direct_args_match_ffmpeg_cli() {
        let args = direct_args(Path::new("/ws/source/clip.mp4"), Path::new("/ws/clip.mp4"), &dims());
        let rendered: Vec<String> = args.iter().map(|a| a.to_string_lossy().into_owned()).collect();
        assert_eq!(
            rendered,
            ["-y", "-i", "/ws/source/clip.mp4", "-s", "640x360", "/ws/clip.mp4"]
        );
    }

    #[test]
    fn segment_args_use_numbered_pattern_and_playlist() {
        let args = segment_args(
            Path::new("/ws/clip.ts"),
            Path::new("/ws/m3u8/clip.m3u8"),
            Path::new("/ws/m3u8/clip_%03d.ts"),
            10,
        );
        let rendered: Vec<String> = args.iter().map(|a| a.to_string_lossy().into_owned()).collect();
        assert_eq!(
            rendered,
            [
                "-y", "-i", "/ws/clip.ts", "-c", "copy", "-map", "0", "-f", "segment",
                "-segment_list", "/ws/m3u8/clip.m3u8", "-segment_time", "10",
                "/ws/m3u8/clip_%03d.ts",
            ]
        );
    }

    #[tokio::test]
    async fn segmented_reports_playlist_inside_segment_dir() {
        let work = tempfile::tempdir().unwrap();
        let executor = FfmpegExecutor::new("/bin/true");

        let out = executor
            .transcode_segmented(Path::new("/ws/source/clip.mp4"), work.path(), "clip", &dims(), 10)
            .await
            .unwrap();

        assert_eq!(out.segment_dir, work.path().join("m3u8"));
        assert_eq!(out.playlist, work.path().join("m3u8/clip.m3u8"));
        assert!(out.segment_dir.is_dir());
    }

    #[tokio::test]
    async fn failed_reencode_stops_before_segmentation() {
        let work = tempfile::tempdir().unwrap();
        let executor = FfmpegExecutor::new("/bin/false");

        let err = executor
            .transcode_segmented(Path::new("/ws/source/clip.mp4"), work.path(), "clip", &dims(), 10)
            .await
            .unwrap_err();

        match err {
            InvocationError::Transcode(msg) => assert!(msg.starts_with("re-encode of")),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn direct_nonzero_exit_is_transcode_error() {
        let executor = FfmpegExecutor::new("/bin/false");
        let err = executor
            .transcode_direct(Path::new("a.mp4"), Path::new("b.mp4"), &dims())
            .await
            .unwrap_err();
        assert!(matches!(err, InvocationError::Transcode(_)));
    }
}
