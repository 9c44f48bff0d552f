use crate::error::{Error, Result};
use crate::geometry::{CoordinateMapper, Rect};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Pixel layout of a captured frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PixelFormat {
    #[default]
    Bgra8,
    Rgba8,
    Rgb8,
    Gray8,
}

impl PixelFormat {
    pub fn bytes_per_pixel(&self) -> usize {
        match self {
            PixelFormat::Bgra8 | PixelFormat::Rgba8 => 4,
            PixelFormat::Rgb8 => 3,
            PixelFormat::Gray8 => 1,
        }
    }

    /// Stable tag used by on-disk formats
    pub fn code(&self) -> u8 {
        match self {
            PixelFormat::Bgra8 => 0,
            PixelFormat::Rgba8 => 1,
            PixelFormat::Rgb8 => 2,
            PixelFormat::Gray8 => 3,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(PixelFormat::Bgra8),
            1 => Some(PixelFormat::Rgba8),
            2 => Some(PixelFormat::Rgb8),
            3 => Some(PixelFormat::Gray8),
            _ => None,
        }
    }
}

impl fmt::Display for PixelFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PixelFormat::Bgra8 => write!(f, "bgra8"),
            PixelFormat::Rgba8 => write!(f, "rgba8"),
            PixelFormat::Rgb8 => write!(f, "rgb8"),
            PixelFormat::Gray8 => write!(f, "gray8"),
        }
    }
}

/// One captured camera frame.
///
/// The payload is reference counted so the recorder can keep a copy
/// without duplicating pixels.
#[derive(Debug, Clone)]
pub struct Frame {
    /// Capture order, strictly increasing per camera session
    pub sequence: u64,
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    /// Capture time relative to the start of the camera session
    pub timestamp: Duration,
    pub data: Bytes,
}

impl Frame {
    pub fn new(
        sequence: u64,
        width: u32,
        height: u32,
        format: PixelFormat,
        timestamp: Duration,
        data: impl Into<Bytes>,
    ) -> Self {
        Self {
            sequence,
            width,
            height,
            format,
            timestamp,
            data: data.into(),
        }
    }

    /// Byte length a well-formed buffer of these dimensions must have
    pub fn expected_len(&self) -> Option<usize> {
        (self.width as usize)
            .checked_mul(self.height as usize)
            .and_then(|pixels| pixels.checked_mul(self.format.bytes_per_pixel()))
    }

    /// Reject buffers that cannot be handed to a classifier
    pub fn validate(&self) -> Result<()> {
        if self.width == 0 || self.height == 0 {
            return Err(Error::InvalidFrame(format!(
                "frame {} has zero dimensions {}x{}",
                self.sequence, self.width, self.height
            )));
        }
        let expected = self.expected_len().ok_or_else(|| {
            Error::InvalidFrame(format!("frame {} dimensions overflow", self.sequence))
        })?;
        if self.data.len() < expected {
            return Err(Error::InvalidFrame(format!(
                "frame {} buffer holds {} bytes, {}x{} {} needs {}",
                self.sequence,
                self.data.len(),
                self.width,
                self.height,
                self.format,
                expected
            )));
        }
        Ok(())
    }
}

/// A labeled box produced by the classifier, in normalized model space
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectedObject {
    pub label: String,
    /// Confidence of the top label, in `[0, 1]`
    pub confidence: f32,
    pub bounding_box: Rect,
}

impl DetectedObject {
    pub fn new(label: impl Into<String>, confidence: f32, bounding_box: Rect) -> Self {
        Self {
            label: label.into(),
            confidence: confidence.clamp(0.0, 1.0),
            bounding_box,
        }
    }
}

/// All detections for one frame
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionBatch {
    pub frame_sequence: u64,
    pub frame_timestamp: Duration,
    pub objects: Vec<DetectedObject>,
    contains_target: bool,
}

impl DetectionBatch {
    /// Build a batch and decide whether the target label is present.
    ///
    /// Any object whose label equals `target_label` counts; confidence is
    /// not consulted.
    pub fn new(
        frame_sequence: u64,
        frame_timestamp: Duration,
        objects: Vec<DetectedObject>,
        target_label: &str,
    ) -> Self {
        let contains_target = objects.iter().any(|object| object.label == target_label);
        Self {
            frame_sequence,
            frame_timestamp,
            objects,
            contains_target,
        }
    }

    pub fn contains_target(&self) -> bool {
        self.contains_target
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// Persisted form: label and confidence only
    pub fn to_records(&self) -> Vec<PredictionRecord> {
        self.objects
            .iter()
            .map(|object| PredictionRecord {
                identifier: object.label.clone(),
                confidence: object.confidence,
            })
            .collect()
    }
}

/// One persisted prediction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionRecord {
    pub identifier: String,
    pub confidence: f32,
}

/// A detection placed in viewport pixels.
///
/// Only constructible from a `DetectedObject` and a mapper, so the rect
/// always reflects its source detection.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DisplayBox {
    rect: Rect,
    label: String,
    confidence: f32,
}

impl DisplayBox {
    pub fn from_detection(object: &DetectedObject, mapper: &CoordinateMapper) -> Self {
        Self {
            rect: mapper.map(object.bounding_box),
            label: object.label.clone(),
            confidence: object.confidence,
        }
    }

    pub fn rect(&self) -> Rect {
        self.rect
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn confidence(&self) -> f32 {
        self.confidence
    }
}

/// Latest aggregate hardware and throughput sample
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub frames_per_second: f64,
    /// Mean of per-tick CPU utilization since the session started, `[0, 1]`
    pub cpu_utilization: f64,
    pub resident_memory_bytes: u64,
    pub sampled_at: DateTime<Utc>,
}

impl Default for MetricsSnapshot {
    fn default() -> Self {
        Self {
            frames_per_second: 0.0,
            cpu_utilization: 0.0,
            resident_memory_bytes: 0,
            sampled_at: DateTime::<Utc>::UNIX_EPOCH,
        }
    }
}
