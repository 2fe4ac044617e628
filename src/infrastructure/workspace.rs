use crate::common::error::{InvocationError, InvocationResult};
use rand::Rng;
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};
use tokio::fs;
use tracing::{error, info, warn};

const NAME_LEN: usize = 16;
const LETTERS: &[u8] = b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ";
const ALLOCATE_ATTEMPTS: usize = 3;

/// Scratch directory owned by a single invocation.
///
/// `release` consumes the workspace, so it can run at most once. A workspace
/// dropped without `release` (the invocation future was cancelled) is removed
/// synchronously in `Drop`.
#[derive(Debug)]
pub struct Workspace {
    root: PathBuf,
    released: bool,
}

impl Workspace {
    pub async fn allocate(mount_root: &Path) -> InvocationResult<Self> {
        fs::create_dir_all(mount_root).await.map_err(|e| {
            InvocationError::Filesystem(format!(
                "failed to prepare mount root {}: {}",
                mount_root.display(),
                e
            ))
        })?;

        let mut last_err = None;
        for _ in 0..ALLOCATE_ATTEMPTS {
            let root = mount_root.join(random_name());
            match fs::create_dir(&root).await {
                Ok(()) => {
                    info!("Allocated workspace {}", root.display());
                    return Ok(Self {
                        root,
                        released: false,
                    });
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => last_err = Some(e),
                Err(e) => {
                    return Err(InvocationError::Filesystem(format!(
                        "failed to create workspace {}: {}",
                        root.display(),
                        e
                    )));
                }
            }
        }

        Err(InvocationError::Filesystem(format!(
            "failed to allocate a unique workspace under {}: {}",
            mount_root.display(),
            last_err.map(|e| e.to_string()).unwrap_or_default()
        )))
    }

    pub fn path(&self) -> &Path {
        &self.root
    }

    /// Local path for a downloaded object. Keys may contain `/` but must stay
    /// inside the workspace.
    pub fn source_path(&self, key: &str) -> InvocationResult<PathBuf> {
        let relative = Path::new(key);
        let escapes = relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
        if key.is_empty() || escapes || relative.file_name().is_none() {
            return Err(InvocationError::InvalidEvent(format!(
                "object key '{}' cannot be stored locally",
                key
            )));
        }

        Ok(self.root.join("source").join(relative))
    }

    pub async fn release(mut self) {
        self.released = true;
        match fs::remove_dir_all(&self.root).await {
            Ok(()) => info!("Released workspace {}", self.root.display()),
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => error!(
                "failed to clean local files {}: {}",
                self.root.display(),
                e
            ),
        }
    }
}

impl Drop for Workspace {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        match std::fs::remove_dir_all(&self.root) {
            Ok(()) => warn!("Removed abandoned workspace {}", self.root.display()),
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => error!(
                "failed to clean abandoned workspace {}: {}",
                self.root.display(),
                e
            ),
        }
    }
}

fn random_name() -> String {
    let mut rng = rand::rng();
    (0..NAME_LEN)
        .map(|_| LETTERS[rng.random_range(0..LETTERS.len())] as char)
        .collect()
}
