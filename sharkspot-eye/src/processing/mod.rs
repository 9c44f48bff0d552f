//! Per-frame processing

pub mod detection;

pub use detection::DetectionEngine;
