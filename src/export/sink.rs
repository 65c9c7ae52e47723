//! Destinations for produced artifacts.

use std::path::PathBuf;

use async_trait::async_trait;

use super::Artifact;
use crate::error::Result;

/// Accepts a finished artifact. How the user receives it is up to the implementation.
#[async_trait]
pub trait ArtifactSink: Send + Sync {
    /// Store the artifact and return where it went.
    async fn save(&self, artifact: &Artifact) -> Result<PathBuf>;
}

/// Writes artifacts into a directory, replacing files of the same name.
#[derive(Debug, Clone)]
pub struct DirectorySink {
    dir: PathBuf,
}

impl DirectorySink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

#[async_trait]
impl ArtifactSink for DirectorySink {
    async fn save(&self, artifact: &Artifact) -> Result<PathBuf> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let path = self.dir.join(&artifact.filename);
        tokio::fs::write(&path, &artifact.bytes).await?;
        tracing::info!(
            path = %path.display(),
            mime = %artifact.mime,
            bytes = artifact.bytes.len(),
            "Saved export artifact"
        );
        Ok(path)
    }
}
