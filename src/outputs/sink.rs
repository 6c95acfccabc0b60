//! Destinations for finished artifacts.
//!
//! A sink stores a byte blob under a `/`-separated key and reports where it
//! went. Publishing is all-or-nothing: a reader never sees a partial file.

use crate::error::WriteError;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, info, instrument};

pub trait ArtifactSink {
    /// Store `bytes` under `key`, returning the final location.
    async fn publish(&self, key: &str, bytes: Vec<u8>) -> Result<String, WriteError>;
}

impl<T: ArtifactSink> ArtifactSink for &T {
    async fn publish(&self, key: &str, bytes: Vec<u8>) -> Result<String, WriteError> {
        (**self).publish(key, bytes).await
    }
}

fn io_err(path: &Path, source: std::io::Error) -> WriteError {
    WriteError::Io {
        path: path.display().to_string(),
        source,
    }
}

/// Treats the bucket as a directory root.
///
/// Each artifact is written to a hidden temp file next to its destination and
/// renamed into place once complete.
#[derive(Debug, Clone)]
pub struct LocalDirSink {
    root: PathBuf,
}

impl LocalDirSink {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl ArtifactSink for LocalDirSink {
    #[instrument(level = "info", skip(self, bytes), fields(size = bytes.len()))]
    async fn publish(&self, key: &str, bytes: Vec<u8>) -> Result<String, WriteError> {
        let path = key
            .split('/')
            .filter(|part| !part.is_empty())
            .fold(self.root.clone(), |path, part| path.join(part));
        let (Some(parent), Some(file_name)) = (path.parent(), path.file_name()) else {
            return Err(io_err(
                &path,
                std::io::Error::new(std::io::ErrorKind::InvalidInput, "empty artifact key"),
            ));
        };

        fs::create_dir_all(parent)
            .await
            .map_err(|e| io_err(parent, e))?;

        let tmp = parent.join(format!(".{}.tmp", file_name.to_string_lossy()));
        debug!(tmp = %tmp.display(), "Writing temp artifact");
        if let Err(e) = fs::write(&tmp, &bytes).await {
            let _ = fs::remove_file(&tmp).await;
            return Err(io_err(&tmp, e));
        }
        if let Err(e) = fs::rename(&tmp, &path).await {
            let _ = fs::remove_file(&tmp).await;
            return Err(io_err(&path, e));
        }

        info!(path = %path.display(), "Published artifact");
        Ok(path.display().to_string())
    }
}
