//! Hand-off of finished recordings to persistent storage

use crate::error::VisionError;
use chrono::Utc;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

/// Persistent media store that finished recordings are imported into
pub trait MediaLibrary: Send + Sync {
    /// Import the artifact, returning where the library keeps it
    fn import(&self, artifact: &Path) -> Result<PathBuf, VisionError>;
}

/// Library backed by a plain folder; each import is a timestamped copy
#[derive(Debug, Clone)]
pub struct DirectoryLibrary {
    root: PathBuf,
}

impl DirectoryLibrary {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn target_for(&self, artifact: &Path) -> PathBuf {
        let stamp = Utc::now().format("%Y%m%d_%H%M%S%.3f").to_string();
        let extension = artifact
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| format!(".{}", ext))
            .unwrap_or_default();

        let mut candidate = self.root.join(format!("recording_{}{}", stamp, extension));
        let mut suffix = 1;
        while candidate.exists() {
            candidate = self.root.join(format!("recording_{}_{}{}", stamp, suffix, extension));
            suffix += 1;
        }
        candidate
    }
}

impl MediaLibrary for DirectoryLibrary {
    fn import(&self, artifact: &Path) -> Result<PathBuf, VisionError> {
        if !artifact.is_file() {
            return Err(VisionError::MediaLibrary(format!("{:?} is not a finished recording", artifact)));
        }

        fs::create_dir_all(&self.root).map_err(|e| {
            VisionError::MediaLibrary(format!("cannot create library folder {:?}: {}", self.root, e))
        })?;

        let target = self.target_for(artifact);
        fs::copy(artifact, &target)
            .map_err(|e| VisionError::MediaLibrary(format!("import of {:?} failed: {}", artifact, e)))?;

        info!("Imported {:?} into library as {:?}", artifact, target);
        Ok(target)
    }
}
