//! Object detection engine

use crate::error::VisionError;
use crate::models::{resolve_model_path, Classifier, ClassifierBackend};
use sharkspot_core::{BoxOrigin, CoordinateMapper, DetectionBatch, DetectionConfig, Frame, Size};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Owns the classifier and tags each batch with target presence
pub struct DetectionEngine {
    classifier: Arc<dyn Classifier>,
    target_label: String,
    model_input: Size,
    model_origin: BoxOrigin,
    target_in_view: AtomicBool,
    frames_inferred: AtomicU64,
    frames_skipped: AtomicU64,
}

impl DetectionEngine {
    /// Create an engine around an already loaded classifier. Box
    /// geometry comes from `config`.
    pub fn new(classifier: Arc<dyn Classifier>, config: &DetectionConfig) -> Self {
        Self {
            classifier,
            target_label: config.target_label.clone(),
            model_input: config.model_input(),
            model_origin: config.model_origin,
            target_in_view: AtomicBool::new(false),
            frames_inferred: AtomicU64::new(0),
            frames_skipped: AtomicU64::new(0),
        }
    }

    /// Resolve the configured model and load it through `backend`.
    ///
    /// Any failure here is fatal to pipeline construction.
    pub fn load(config: &DetectionConfig, backend: &dyn ClassifierBackend) -> Result<Self, VisionError> {
        let model_path = resolve_model_path(&config.model_path)?;
        let classifier = backend.load(&model_path).map_err(|e| match e {
            VisionError::Model(_) => e,
            other => VisionError::Model(format!("Failed to load classifier: {}", other)),
        })?;

        // The configuration is authoritative for box geometry
        let reported = classifier.input_size();
        if reported != config.model_input() {
            warn!(
                "Classifier reports input {}x{}, using configured {}x{}",
                reported.width, reported.height, config.model_input_size.0, config.model_input_size.1
            );
        }
        let reported_origin = classifier.coordinate_origin();
        if reported_origin != config.model_origin {
            warn!(
                "Classifier reports {:?} box origin, using configured {:?}",
                reported_origin, config.model_origin
            );
        }

        info!("Classifier loaded from {:?}, target label '{}'", model_path, config.target_label);
        Ok(Self::new(classifier, config))
    }

    /// Mapper from the configured model space into a viewport
    pub fn mapper_for(&self, viewport: Size) -> Result<CoordinateMapper, VisionError> {
        Ok(CoordinateMapper::new(self.model_input, viewport, self.model_origin)?)
    }

    pub fn model_input(&self) -> Size {
        self.model_input
    }

    pub fn model_origin(&self) -> BoxOrigin {
        self.model_origin
    }

    /// Validate the frame and run inference on it
    pub fn infer(&self, frame: &Frame) -> Result<DetectionBatch, VisionError> {
        frame.validate()?;
        let objects = self.classifier.classify(frame)?;
        let batch = DetectionBatch::new(frame.sequence, frame.timestamp, objects, &self.target_label);

        self.target_in_view.store(batch.contains_target(), Ordering::Release);
        self.frames_inferred.fetch_add(1, Ordering::Relaxed);
        debug!(
            "Frame {}: {} objects, target {}",
            frame.sequence,
            batch.len(),
            if batch.contains_target() { "present" } else { "absent" }
        );
        Ok(batch)
    }

    /// Streaming entry point: failures are logged and the frame skipped
    pub fn process(&self, frame: &Frame) -> Option<DetectionBatch> {
        match self.infer(frame) {
            Ok(batch) => Some(batch),
            Err(e) => {
                self.frames_skipped.fetch_add(1, Ordering::Relaxed);
                warn!("Skipping frame {}: {}", frame.sequence, e);
                None
            }
        }
    }

    pub fn target_label(&self) -> &str {
        &self.target_label
    }

    /// Whether the most recent successful batch contained the target
    pub fn target_in_view(&self) -> bool {
        self.target_in_view.load(Ordering::Acquire)
    }

    pub fn frames_inferred(&self) -> u64 {
        self.frames_inferred.load(Ordering::Relaxed)
    }

    pub fn frames_skipped(&self) -> u64 {
        self.frames_skipped.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::MockClassifier;
    use sharkspot_core::{BoxOrigin, DetectedObject, PixelFormat, Rect};
    use std::path::Path;
    use std::time::Duration;

    fn frame(sequence: u64) -> Frame {
        Frame::new(sequence, 4, 4, PixelFormat::Bgra8, Duration::from_millis(sequence * 33), vec![0u8; 64])
    }

    fn classifier_returning(labels: &'static [&'static str]) -> Arc<dyn Classifier> {
        let mut mock = MockClassifier::new();
        mock.expect_input_size().return_const(Size::new(640.0, 640.0));
        mock.expect_coordinate_origin().return_const(BoxOrigin::BottomLeft);
        mock.expect_classify().returning(move |_| {
            Ok(labels
                .iter()
                .map(|label| DetectedObject::new(*label, 0.8, Rect::new(0.25, 0.25, 0.5, 0.5)))
                .collect())
        });
        Arc::new(mock)
    }

    struct FixedBackend(Arc<dyn Classifier>);

    impl ClassifierBackend for FixedBackend {
        fn load(&self, _model_path: &Path) -> Result<Arc<dyn Classifier>, VisionError> {
            Ok(self.0.clone())
        }
    }

    struct BrokenBackend;

    impl ClassifierBackend for BrokenBackend {
        fn load(&self, _model_path: &Path) -> Result<Arc<dyn Classifier>, VisionError> {
            Err(VisionError::Io(std::io::Error::new(std::io::ErrorKind::InvalidData, "corrupt")))
        }
    }

    #[test]
    fn test_infer_flags_target() {
        let engine = DetectionEngine::new(classifier_returning(&["fish", "shark"]), &DetectionConfig::default());
        let batch = engine.infer(&frame(3)).unwrap();
        assert!(batch.contains_target());
        assert_eq!(batch.frame_sequence, 3);
        assert!(engine.target_in_view());
        assert_eq!(engine.frames_inferred(), 1);
    }

    #[test]
    fn test_infer_without_target() {
        let engine = DetectionEngine::new(classifier_returning(&["fish"]), &DetectionConfig::default());
        let batch = engine.infer(&frame(1)).unwrap();
        assert!(!batch.contains_target());
        assert!(!engine.target_in_view());
    }

    #[test]
    fn test_malformed_frame_is_skipped() {
        let mut mock = MockClassifier::new();
        mock.expect_classify().never();
        let engine = DetectionEngine::new(Arc::new(mock), &DetectionConfig::default());

        let short = Frame::new(1, 4, 4, PixelFormat::Bgra8, Duration::ZERO, vec![0u8; 10]);
        assert!(engine.process(&short).is_none());
        assert_eq!(engine.frames_skipped(), 1);
        assert_eq!(engine.frames_inferred(), 0);
    }

    #[test]
    fn test_classifier_failure_is_skipped() {
        let mut mock = MockClassifier::new();
        mock.expect_classify()
            .times(1)
            .returning(|_| Err(VisionError::Processing("tensor shape".to_string())));
        let engine = DetectionEngine::new(Arc::new(mock), &DetectionConfig::default());

        assert!(engine.process(&frame(1)).is_none());
        assert_eq!(engine.frames_skipped(), 1);
    }

    #[test]
    fn test_load_requires_model_file() {
        let dir = tempfile::tempdir().unwrap();
        let config = DetectionConfig {
            model_path: dir.path().join("missing.model"),
            ..DetectionConfig::default()
        };
        let result = DetectionEngine::load(&config, &FixedBackend(classifier_returning(&[])));
        assert!(matches!(result, Err(VisionError::Model(_))));
    }

    #[test]
    fn test_load_failure_is_model_error() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let config = DetectionConfig {
            model_path: file.path().to_path_buf(),
            ..DetectionConfig::default()
        };
        let result = DetectionEngine::load(&config, &BrokenBackend);
        assert!(matches!(result, Err(VisionError::Model(_))));
    }

    #[test]
    fn test_load_and_map() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let config = DetectionConfig {
            model_path: file.path().to_path_buf(),
            ..DetectionConfig::default()
        };
        let engine = DetectionEngine::load(&config, &FixedBackend(classifier_returning(&["shark"]))).unwrap();
        assert_eq!(engine.target_label(), "shark");

        let mapper = engine.mapper_for(Size::new(390.0, 844.0)).unwrap();
        assert_eq!(mapper.origin(), BoxOrigin::BottomLeft);
        assert!(engine.mapper_for(Size::new(0.0, 844.0)).is_err());
    }

    #[test]
    fn test_configured_geometry_drives_mapper() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let config = DetectionConfig {
            model_path: file.path().to_path_buf(),
            model_input_size: (320, 240),
            model_origin: BoxOrigin::TopLeft,
            ..DetectionConfig::default()
        };
        // Classifier disagrees with the configuration: 640x640, bottom-left
        let engine = DetectionEngine::load(&config, &FixedBackend(classifier_returning(&["shark"]))).unwrap();
        assert_eq!(engine.model_input(), Size::new(320.0, 240.0));
        assert_eq!(engine.model_origin(), BoxOrigin::TopLeft);

        let mapper = engine.mapper_for(Size::new(320.0, 240.0)).unwrap();
        assert_eq!(mapper.image_size(), Size::new(320.0, 240.0));
        assert_eq!(mapper.origin(), BoxOrigin::TopLeft);

        // Top-left origin: no flip, so a box at the top stays at the top
        let mapped = mapper.map(Rect::new(0.0, 0.0, 0.5, 0.25));
        assert!(mapped.y().abs() < 1e-9);
        assert!((mapped.height() - 60.0).abs() < 1e-9);
    }
}
