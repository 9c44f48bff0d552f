//! Shared fakes for integration tests

#![allow(dead_code)]

use sharkspot_core::{BoxOrigin, DetectedObject, Frame, PixelFormat, Rect, Size, SpotterConfig};
use sharkspot_eye::metrics::CpuTicks;
use sharkspot_eye::{Classifier, ClassifierBackend, SystemProbe, VisionError};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Labels every frame whose first byte is non-zero as a shark, else a fish
pub struct FirstByteClassifier;

impl Classifier for FirstByteClassifier {
    fn input_size(&self) -> Size {
        Size::new(640.0, 640.0)
    }

    fn coordinate_origin(&self) -> BoxOrigin {
        BoxOrigin::BottomLeft
    }

    fn classify(&self, frame: &Frame) -> Result<Vec<DetectedObject>, VisionError> {
        let label = if frame.data.first().copied().unwrap_or(0) != 0 { "shark" } else { "fish" };
        Ok(vec![DetectedObject::new(label, 0.87, Rect::new(0.2, 0.3, 0.4, 0.2))])
    }
}

pub struct FirstByteBackend;

impl ClassifierBackend for FirstByteBackend {
    fn load(&self, _model_path: &Path) -> Result<Arc<dyn Classifier>, VisionError> {
        Ok(Arc::new(FirstByteClassifier))
    }
}

pub struct FailingBackend;

impl ClassifierBackend for FailingBackend {
    fn load(&self, model_path: &Path) -> Result<Arc<dyn Classifier>, VisionError> {
        Err(VisionError::Model(format!("{:?} is not a model", model_path)))
    }
}

/// Host that stays 50% busy: every reading adds 25/25/50 ticks
#[derive(Default)]
pub struct FixedProbe {
    readings: AtomicU64,
}

impl SystemProbe for FixedProbe {
    fn cpu_ticks(&self) -> Result<CpuTicks, VisionError> {
        let n = self.readings.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(CpuTicks {
            user: 25 * n,
            system: 25 * n,
            idle: 50 * n,
        })
    }

    fn resident_memory(&self) -> Result<u64, VisionError> {
        Ok(64 * 1024 * 1024)
    }
}

/// 4x4 BGRA frame; `target` controls what the classifier sees
pub fn frame(sequence: u64, target: bool) -> Frame {
    let fill = if target { 255u8 } else { 0u8 };
    Frame::new(
        sequence,
        4,
        4,
        PixelFormat::Bgra8,
        Duration::from_millis(sequence * 33),
        vec![fill; 64],
    )
}

/// Configuration rooted in `dir`, with a model file present
pub fn config_in(dir: &Path) -> SpotterConfig {
    let model_path: PathBuf = dir.join("models").join("shark.model");
    std::fs::create_dir_all(model_path.parent().unwrap()).unwrap();
    std::fs::write(&model_path, b"weights").unwrap();

    let mut config = SpotterConfig::default();
    config.detection.model_path = model_path;
    config.recording.output_path = dir.join("out").join("recording.ssrv");
    config.recording.library_dir = dir.join("library");
    config.metrics.predictions_root = dir.join("predictions");
    config
}
