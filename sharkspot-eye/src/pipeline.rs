//! Pipeline coordinator
//!
//! Composes the detection engine, recording session and metrics sampler.
//! Frames flow capture -> inference -> recording admission -> prediction
//! buffer, and each batch is broadcast for the UI to draw.

use crate::camera::{CaptureSource, FrameFeed};
use crate::error::VisionError;
use crate::metrics::{MetricsSampler, SystemProbe};
use crate::models::ClassifierBackend;
use crate::predictions::PredictionStore;
use crate::processing::DetectionEngine;
use crate::recording::{MediaLibrary, RecordingSession, RecordingSummary, SessionInfo, SinkFactory};
use parking_lot::Mutex;
use serde::Serialize;
use sharkspot_core::{CoordinateMapper, DetectionBatch, Frame, MetricsSnapshot, Size, SpotterConfig};
use std::sync::Arc;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::info;

const DETECTION_CHANNEL_CAPACITY: usize = 16;

/// Point-in-time view of the pipeline for the UI
#[derive(Debug, Clone, Serialize)]
pub struct PipelineStatus {
    pub recording: bool,
    pub target_in_view: bool,
    pub frames_inferred: u64,
    pub frames_skipped: u64,
    pub metrics: MetricsSnapshot,
}

#[derive(Clone)]
pub struct SpotterPipeline {
    config: Arc<SpotterConfig>,
    engine: Arc<DetectionEngine>,
    session: Arc<RecordingSession>,
    sampler: Arc<MetricsSampler>,
    detections: broadcast::Sender<DetectionBatch>,
}

impl SpotterPipeline {
    /// Validate the configuration and load the classifier.
    ///
    /// A classifier that fails to load is fatal.
    pub fn new(
        config: SpotterConfig,
        backend: &dyn ClassifierBackend,
        sink_factory: Arc<dyn SinkFactory>,
        library: Arc<dyn MediaLibrary>,
        probe: Arc<dyn SystemProbe>,
    ) -> Result<Self, VisionError> {
        config.validate()?;

        let engine = Arc::new(DetectionEngine::load(&config.detection, backend)?);

        let store = Arc::new(Mutex::new(PredictionStore::new(
            config.metrics.predictions_root.clone(),
            config.metrics.predictions_prefix.clone(),
        )));
        let sampler = Arc::new(MetricsSampler::new(
            config.metrics.sampling_interval(),
            probe,
            store,
            Arc::new(Mutex::new(Vec::new())),
        ));
        let session = Arc::new(RecordingSession::new(
            config.recording.clone(),
            sink_factory,
            library,
            sampler.clone(),
        ));
        let (detections, _) = broadcast::channel(DETECTION_CHANNEL_CAPACITY);

        info!(
            "Pipeline ready: target '{}', admission {:?}",
            config.detection.target_label, config.recording.admission
        );
        Ok(Self {
            config: Arc::new(config),
            engine,
            session,
            sampler,
            detections,
        })
    }

    pub fn config(&self) -> &SpotterConfig {
        &self.config
    }

    pub fn engine(&self) -> &DetectionEngine {
        &self.engine
    }

    /// Mapper for drawing this pipeline's detections into a viewport
    pub fn mapper_for(&self, viewport: Size) -> Result<CoordinateMapper, VisionError> {
        self.engine.mapper_for(viewport)
    }

    /// Run one frame through the pipeline. Blocking; call from a worker.
    pub fn process_frame(&self, frame: &Frame) -> Option<DetectionBatch> {
        let batch = self.engine.process(frame)?;

        self.sampler.record_frame();
        self.session.on_frame(frame, &batch);
        self.session.on_detection_batch(&batch);

        // No subscribers is fine
        let _ = self.detections.send(batch.clone());
        Some(batch)
    }

    /// Start `source` and consume its frames in capture order on a
    /// dedicated blocking worker. The worker ends when the source drops
    /// its feed.
    pub fn attach(&self, source: &mut dyn CaptureSource) -> Result<JoinHandle<()>, VisionError> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| VisionError::Processing(format!("pipeline needs a tokio runtime: {}", e)))?;

        let (feed, mut frames) = FrameFeed::channel();
        source.start(feed)?;

        let pipeline = self.clone();
        let handle = runtime.spawn_blocking(move || {
            while let Some(frame) = frames.blocking_recv() {
                pipeline.process_frame(&frame);
            }
            info!("Frame source closed, detection worker exiting");
        });
        Ok(handle)
    }

    pub fn subscribe_detections(&self) -> broadcast::Receiver<DetectionBatch> {
        self.detections.subscribe()
    }

    pub fn subscribe_metrics(&self) -> watch::Receiver<MetricsSnapshot> {
        self.sampler.subscribe()
    }

    pub fn start_recording(&self) -> Result<SessionInfo, VisionError> {
        self.session.start()
    }

    pub async fn stop_recording(&self) -> Result<RecordingSummary, VisionError> {
        self.session.stop().await
    }

    pub fn is_recording(&self) -> bool {
        self.session.is_recording()
    }

    pub fn status(&self) -> PipelineStatus {
        PipelineStatus {
            recording: self.session.is_recording(),
            target_in_view: self.engine.target_in_view(),
            frames_inferred: self.engine.frames_inferred(),
            frames_skipped: self.engine.frames_skipped(),
            metrics: self.sampler.snapshot(),
        }
    }
}
