//! sharkspot-eye: live detection overlay and conditional recording
//!
//! Runs each camera frame through an opaque classifier, places the
//! resulting boxes on an aspect-filled preview, and while a recording is
//! active writes qualifying frames to a video sink. A fixed-interval
//! sampler tracks frame rate, CPU load and memory, and flushes buffered
//! predictions to per-session JSON files.

pub mod camera;
pub mod error;
pub mod metrics;
pub mod models;
pub mod overlay;
pub mod pipeline;
pub mod predictions;
pub mod processing;
pub mod recording;
pub mod telemetry;

pub use camera::{CaptureSource, FrameFeed, ReplaySource};
pub use error::VisionError;
pub use metrics::{HostProbe, MetricsSampler, SystemProbe};
pub use models::{Classifier, ClassifierBackend};
pub use overlay::{OverlayRenderer, OverlayScene, OverlaySurface, RasterSurface};
pub use pipeline::{PipelineStatus, SpotterPipeline};
pub use predictions::PredictionStore;
pub use processing::DetectionEngine;
pub use recording::{
    DirectoryLibrary, MediaLibrary, RawVideoSinkFactory, RecordingSession, RecordingSummary, SessionInfo,
};
#[cfg(feature = "opencv")]
pub use recording::OpenCvSinkFactory;
pub use telemetry::init_tracing;
