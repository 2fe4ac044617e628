use crate::common::error::{InvocationError, InvocationResult};
use crate::config::settings::InvocationConfig;
use crate::infrastructure::media::{MediaProbe, Transcoder};
use crate::infrastructure::storage::ObjectStore;
use crate::infrastructure::workspace::Workspace;
use crate::modules::transcode::events::EventRecord;
use crate::modules::transcode::model::{
    Dimensions, InvocationOutcome, SEGMENT_SECONDS, SEGMENTED_FORMAT, TranscodeMode,
    VideoMetadata,
};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{error, info, warn};

/// Pipeline position, reported when an invocation fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Start,
    Downloaded,
    Probed,
    Skipped,
    DirectDone,
    SegmentedDone,
    Uploaded,
}

/// Runs one event record through download, probe, transcode and upload.
pub struct TranscodeWorker<S, P, T> {
    storage: S,
    probe: P,
    transcoder: T,
    config: InvocationConfig,
    mount_root: PathBuf,
}

impl<S, P, T> TranscodeWorker<S, P, T>
where
    S: ObjectStore,
    P: MediaProbe,
    T: Transcoder,
{
    pub fn new(
        storage: S,
        probe: P,
        transcoder: T,
        config: InvocationConfig,
        mount_root: PathBuf,
    ) -> Self {
        Self {
            storage,
            probe,
            transcoder,
            config,
            mount_root,
        }
    }

    /// The workspace is released exactly once, whatever `process` returns.
    pub async fn run(&self, record: &EventRecord) -> InvocationResult<InvocationOutcome> {
        let workspace = Workspace::allocate(&self.mount_root).await?;

        let mut stage = Stage::Start;
        let result = self.process(&workspace, record, &mut stage).await;
        if let Err(e) = &result {
            error!(?stage, "❌ video transcode run error: {}", e);
        }

        workspace.release().await;
        result
    }

    async fn process(
        &self,
        workspace: &Workspace,
        record: &EventRecord,
        stage: &mut Stage,
    ) -> InvocationResult<InvocationOutcome> {
        let source = record.source_object()?;
        info!("src bucket name: {}", source.bucket);
        info!("src object key: {}", source.key);

        let src_path = workspace.source_path(&source.key)?;
        self.storage
            .download(&source.bucket, &source.key, &src_path)
            .await?;
        *stage = Stage::Downloaded;

        let metadata = self.probe.probe(&src_path).await?;
        *stage = Stage::Probed;

        if should_skip(&self.config, &metadata) {
            *stage = Stage::Skipped;
            warn!("file {} no need to transcode", source.key);
            return Ok(InvocationOutcome::skipped());
        }

        let short_name = short_name(&src_path)?;
        let dimensions = Dimensions {
            width: self.config.dst_width.clone(),
            height: self.config.dst_height.clone(),
        };

        let mode = TranscodeMode::for_format(&self.config.dst_format);
        let uploaded_keys = match mode {
            TranscodeMode::Direct => {
                self.run_direct(workspace, &src_path, &short_name, &dimensions, stage)
                    .await?
            }
            TranscodeMode::Segmented => {
                self.run_segmented(workspace, &src_path, &short_name, &dimensions, stage)
                    .await?
            }
        };
        *stage = Stage::Uploaded;

        info!(
            "✅ succeeded to transcode file {} to dst format {} width {} height {}",
            source.key, self.config.dst_format, self.config.dst_width, self.config.dst_height
        );
        Ok(InvocationOutcome::transcoded(mode, uploaded_keys))
    }

    async fn run_direct(
        &self,
        workspace: &Workspace,
        src_path: &Path,
        short_name: &str,
        dimensions: &Dimensions,
        stage: &mut Stage,
    ) -> InvocationResult<Vec<String>> {
        let format = &self.config.dst_format;
        let dst_path = workspace
            .path()
            .join(format!("{}.{}", short_name, format));

        self.transcoder
            .transcode_direct(src_path, &dst_path, dimensions)
            .await?;
        *stage = Stage::DirectDone;

        let key = direct_key(format, short_name);
        self.storage
            .upload(&self.config.transcode_bucket, &key, &dst_path)
            .await?;
        Ok(vec![key])
    }

    async fn run_segmented(
        &self,
        workspace: &Workspace,
        src_path: &Path,
        short_name: &str,
        dimensions: &Dimensions,
        stage: &mut Stage,
    ) -> InvocationResult<Vec<String>> {
        let output = self
            .transcoder
            .transcode_segmented(src_path, workspace.path(), short_name, dimensions, SEGMENT_SECONDS)
            .await?;
        *stage = Stage::SegmentedDone;
        info!("Playlist written to {}", output.playlist.display());

        let mut uploaded = Vec::new();
        for (file_name, path) in list_files(&output.segment_dir).await? {
            let key = segment_key(short_name, &file_name);
            self.storage
                .upload(&self.config.transcode_bucket, &key, &path)
                .await?;
            uploaded.push(key);
        }
        Ok(uploaded)
    }
}

/// An already-converted file re-triggering the function is left alone.
pub fn should_skip(config: &InvocationConfig, metadata: &VideoMetadata) -> bool {
    metadata.format_name.contains(config.dst_format.as_str())
        && config.dst_height == metadata.height.to_string()
        && config.dst_width == metadata.width.to_string()
}

pub fn direct_key(format: &str, short_name: &str) -> String {
    format!("{}/{}.{}", format, short_name, format)
}

pub fn segment_key(short_name: &str, file_name: &str) -> String {
    format!("{}/{}/{}", SEGMENTED_FORMAT, short_name, file_name)
}

fn short_name(src_path: &Path) -> InvocationResult<String> {
    src_path
        .file_stem()
        .and_then(|s| s.to_str())
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .ok_or_else(|| {
            InvocationError::InvalidEvent(format!(
                "cannot derive an output name from {}",
                src_path.display()
            ))
        })
}

/// Regular files in `dir`, sorted by name.
async fn list_files(dir: &Path) -> InvocationResult<Vec<(String, PathBuf)>> {
    let read_err = |e: std::io::Error| {
        InvocationError::Filesystem(format!("failed to list {}: {}", dir.display(), e))
    };

    let mut entries = fs::read_dir(dir).await.map_err(read_err)?;
    let mut files = Vec::new();
    while let Some(entry) = entries.next_entry().await.map_err(read_err)? {
        if !entry.file_type().await.map_err(read_err)?.is_file() {
            continue;
        }
        files.push((entry.file_name().to_string_lossy().into_owned(), entry.path()));
    }
    files.sort();
    Ok(files)
}
