//! Opaque object classifier and its loader

use crate::error::VisionError;
use sharkspot_core::{BoxOrigin, DetectedObject, Frame, Size};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

/// A loaded model that turns one frame into labeled boxes.
///
/// Boxes are normalized against [`Classifier::input_size`] and measured
/// from [`Classifier::coordinate_origin`].
#[cfg_attr(test, mockall::automock)]
pub trait Classifier: Send + Sync {
    fn input_size(&self) -> Size;

    fn coordinate_origin(&self) -> BoxOrigin;

    /// Blocking inference on one frame
    fn classify(&self, frame: &Frame) -> Result<Vec<DetectedObject>, VisionError>;
}

/// Turns a model artifact on disk into a ready classifier
pub trait ClassifierBackend: Send + Sync {
    fn load(&self, model_path: &Path) -> Result<Arc<dyn Classifier>, VisionError>;
}

/// Check that the configured model artifact exists and is a file
pub fn resolve_model_path(model_path: &Path) -> Result<PathBuf, VisionError> {
    if model_path.as_os_str().is_empty() {
        return Err(VisionError::Model("Model path is empty".to_string()));
    }

    let metadata = std::fs::metadata(model_path).map_err(|e| {
        VisionError::Model(format!("Model not found at {:?}: {}", model_path, e))
    })?;

    if !metadata.is_file() {
        return Err(VisionError::Model(format!("Model path {:?} is not a file", model_path)));
    }

    info!("Using model at {:?} ({} bytes)", model_path, metadata.len());
    Ok(model_path.to_path_buf())
}
