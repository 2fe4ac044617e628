//! External media tools: `ffprobe` for inspection, `ffmpeg` for re-encoding.

pub mod ffmpeg;
pub mod probe;

use crate::common::error::InvocationResult;
use crate::modules::transcode::model::{Dimensions, SegmentedOutput, VideoMetadata};
use async_trait::async_trait;
use std::ffi::OsString;
use std::path::Path;
use std::process::{Output, Stdio};
use tokio::process::Command;

pub use ffmpeg::FfmpegExecutor;
pub use probe::FfprobeAdapter;

const STDERR_TAIL_LINES: usize = 20;

#[async_trait]
pub trait MediaProbe: Send + Sync {
    async fn probe(&self, path: &Path) -> InvocationResult<VideoMetadata>;
}

#[async_trait]
pub trait Transcoder: Send + Sync {
    async fn transcode_direct(
        &self,
        src: &Path,
        dst: &Path,
        dimensions: &Dimensions,
    ) -> InvocationResult<()>;

    async fn transcode_segmented(
        &self,
        src: &Path,
        work_dir: &Path,
        short_name: &str,
        dimensions: &Dimensions,
        segment_seconds: u32,
    ) -> InvocationResult<SegmentedOutput>;
}

/// Runs a tool to completion with captured output.
pub(crate) async fn run_tool(binary: &Path, args: &[OsString]) -> std::io::Result<Output> {
    Command::new(binary)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .output()
        .await
}

/// Last lines of a tool's stderr, enough to explain a failure in a log line.
pub(crate) fn stderr_tail(output: &Output) -> String {
    let stderr = String::from_utf8_lossy(&output.stderr);
    let lines: Vec<&str> = stderr.trim_end().lines().collect();
    let start = lines.len().saturating_sub(STDERR_TAIL_LINES);
    lines[start..].join("\n")
}
