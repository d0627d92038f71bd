//! Transient artifact files
//!
//! Each work item owns one file holding its clip audio. Files live under one
//! folder per tier below the store root and are deleted by whichever stage
//! consumes them last.

use crate::error::Result;
use genreml_common::WorkTier;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Artifact folders below the store root
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    root: PathBuf,
}

impl ArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Folder holding artifacts of one tier
    pub fn tier_dir(&self, tier: WorkTier) -> PathBuf {
        let folder = match tier {
            WorkTier::Prediction => "prediction_store",
            WorkTier::Spectrogram => "spectrogram_store",
            WorkTier::Clip => "clip_store",
        };
        self.root.join(folder)
    }

    /// Path an artifact of `uid` gets in `tier`
    pub fn path_for(&self, tier: WorkTier, uid: &str, ext: &str) -> PathBuf {
        self.tier_dir(tier).join(format!("{}.{}", uid, ext))
    }

    /// Create every tier folder
    pub async fn ensure_dirs(&self) -> Result<()> {
        for tier in WorkTier::ALL {
            tokio::fs::create_dir_all(self.tier_dir(tier)).await?;
        }
        Ok(())
    }

    /// Write an artifact, returning its path
    pub async fn write(&self, tier: WorkTier, uid: &str, ext: &str, bytes: &[u8]) -> Result<PathBuf> {
        let path = self.path_for(tier, uid, ext);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, bytes).await?;
        Ok(path)
    }

    pub async fn read(&self, path: &Path) -> Result<Vec<u8>> {
        Ok(tokio::fs::read(path).await?)
    }

    /// Delete an artifact; a missing file counts as deleted
    ///
    /// Failures are logged and swallowed.
    pub async fn remove_best_effort(&self, path: &Path) {
        match tokio::fs::remove_file(path).await {
            Ok(()) => debug!(path = %path.display(), "Artifact removed"),
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => warn!(path = %path.display(), error = %e, "Failed to remove artifact"),
        }
    }

    /// Delete an artifact on a background task
    ///
    /// The caller does not wait, so a dropped request cannot stop between
    /// handing an item out and cleaning up after it.
    pub fn remove_detached(&self, path: PathBuf) -> JoinHandle<()> {
        let store = self.clone();
        tokio::spawn(async move { store.remove_best_effort(&path).await })
    }

    pub async fn remove_all_best_effort(&self, paths: &[PathBuf]) {
        for path in paths {
            self.remove_best_effort(path).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_write_read_remove() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path());
        store.ensure_dirs().await.unwrap();

        let path = store.write(WorkTier::Spectrogram, "abc", "wav", b"RIFF").await.unwrap();
        assert_eq!(path, dir.path().join("spectrogram_store").join("abc.wav"));
        assert_eq!(store.read(&path).await.unwrap(), b"RIFF");

        store.remove_best_effort(&path).await;
        assert!(!path.exists());
        // Second delete of the same file is a no-op
        store.remove_best_effort(&path).await;
    }

    #[tokio::test]
    async fn test_read_missing_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path());
        let missing = store.path_for(WorkTier::Clip, "nope", "wav");
        assert!(store.read(&missing).await.is_err());
    }

    #[tokio::test]
    async fn test_remove_detached() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path());
        let path = store.write(WorkTier::Clip, "c1", "wav", b"RIFF").await.unwrap();

        store.remove_detached(path.clone()).await.unwrap();
        assert!(!path.exists());
    }
}
