//! sharkspot-core: shared model for the sharkspot detection pipeline
//!
//! Geometry for placing model-space boxes on an aspect-filled preview,
//! the frame and detection data model, and layered configuration.

pub mod error;
pub mod geometry;
pub mod types;
pub mod config;

pub use error::{Error, Result};
pub use geometry::{aspect_fill_rect, BoxOrigin, CoordinateMapper, Point, Rect, Size};
pub use types::{
    DetectedObject, DetectionBatch, DisplayBox, Frame, MetricsSnapshot, PixelFormat,
    PredictionRecord,
};
pub use config::{
    AdmissionPolicy, ConfigError, DetectionConfig, LoggingConfig, MetricsConfig, RecordingConfig,
    SpotterConfig,
};
