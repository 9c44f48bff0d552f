//! Error types for sharkspot-eye

use sharkspot_core::Error as CoreError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum VisionError {
    #[error("Camera error: {0}")]
    Camera(String),

    #[error("Model error: {0}")]
    Model(String),

    #[error("Processing error: {0}")]
    Processing(String),

    #[error("Invalid transition: cannot {action} while {phase}")]
    InvalidTransition { action: &'static str, phase: &'static str },

    #[error("Recording error: {0}")]
    Recording(String),

    #[error("Media library error: {0}")]
    MediaLibrary(String),

    #[error("Prediction store error: {0}")]
    Predictions(String),

    #[error("Metrics error: {0}")]
    Metrics(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("OpenCV error: {0}")]
    OpenCv(String),

    #[error("Core error: {0}")]
    Core(#[from] CoreError),
}

impl From<VisionError> for CoreError {
    fn from(err: VisionError) -> Self {
        CoreError::Pipeline(format!("Vision error: {}", err))
    }
}

#[cfg(feature = "opencv")]
impl From<opencv::Error> for VisionError {
    fn from(err: opencv::Error) -> Self {
        VisionError::OpenCv(err.message)
    }
}

impl From<sharkspot_core::ConfigError> for VisionError {
    fn from(err: sharkspot_core::ConfigError) -> Self {
        VisionError::Config(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vision_error_display() {
        let err = VisionError::Camera("Test error".to_string());
        assert!(err.to_string().contains("Camera error"));
        assert!(err.to_string().contains("Test error"));
    }

    #[test]
    fn test_invalid_transition_display() {
        let err = VisionError::InvalidTransition { action: "start", phase: "recording" };
        assert_eq!(err.to_string(), "Invalid transition: cannot start while recording");
    }

    #[test]
    fn test_vision_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "File not found");
        let vision_err: VisionError = io_err.into();
        assert!(matches!(vision_err, VisionError::Io(_)));
    }

    #[test]
    fn test_vision_error_to_core_error() {
        let vision_err = VisionError::Recording("sink closed".to_string());
        let core_err: CoreError = vision_err.into();
        match core_err {
            CoreError::Pipeline(msg) => {
                assert!(msg.contains("Vision error"));
                assert!(msg.contains("sink closed"));
            }
            _ => panic!("Expected Pipeline error"),
        }
    }

    #[test]
    fn test_core_error_wraps() {
        let err: VisionError = CoreError::InvalidGeometry("zero".to_string()).into();
        assert!(matches!(err, VisionError::Core(CoreError::InvalidGeometry(_))));
    }
}
