//! Recording session state machine
//!
//! `Idle -> Recording -> Stopping -> Idle`. All state sits behind one
//! mutex, so a `stop` issued while a frame is being appended waits for
//! the append to finish before the sink is taken away. The session only
//! returns to `Idle` once finalization and import are over, so a new
//! `start` cannot reuse the output path while the old sink still owns it.

use crate::error::VisionError;
use crate::metrics::{MetricsSampler, PredictionBuffer};
use crate::predictions::PredictionStore;
use crate::recording::library::MediaLibrary;
use crate::recording::sink::{FrameSink, SinkFactory};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use sharkspot_core::{AdmissionPolicy, DetectionBatch, Frame, RecordingConfig};
use std::io::ErrorKind;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Returned by a successful `start`
#[derive(Debug, Clone, PartialEq)]
pub struct SessionInfo {
    pub started_at: DateTime<Utc>,
    pub output_path: PathBuf,
    pub predictions_dir: PathBuf,
}

/// Returned by a successful `stop`
#[derive(Debug, Clone, PartialEq)]
pub struct RecordingSummary {
    pub started_at: DateTime<Utc>,
    pub frames_admitted: u64,
    pub frames_dropped: u64,
    /// Presentation time the next frame would have received
    pub duration: Duration,
    pub library_item: PathBuf,
    pub predictions_dir: PathBuf,
    pub prediction_files: u64,
}

/// What happened to a frame offered to the session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// No session is recording
    Idle,
    /// The admission policy rejected the frame
    Filtered,
    /// The sink was not ready or failed to take the frame
    Dropped,
    /// Written at this presentation time
    Admitted(Duration),
}

struct ActiveSession {
    info: SessionInfo,
    sink: Box<dyn FrameSink>,
    next_presentation_time: Duration,
    frames_admitted: u64,
    frames_dropped: u64,
}

enum SessionState {
    Idle,
    Recording(ActiveSession),
    Stopping,
}

impl SessionState {
    fn phase(&self) -> &'static str {
        match self {
            SessionState::Idle => "idle",
            SessionState::Recording(_) => "recording",
            SessionState::Stopping => "stopping",
        }
    }
}

/// Puts the session back to `Idle` when a stop completes or is dropped
struct IdleOnDrop<'a>(&'a Mutex<SessionState>);

impl Drop for IdleOnDrop<'_> {
    fn drop(&mut self) {
        *self.0.lock() = SessionState::Idle;
    }
}

pub struct RecordingSession {
    config: RecordingConfig,
    sink_factory: Arc<dyn SinkFactory>,
    library: Arc<dyn MediaLibrary>,
    sampler: Arc<MetricsSampler>,
    store: Arc<Mutex<PredictionStore>>,
    buffer: PredictionBuffer,
    state: Mutex<SessionState>,
}

impl RecordingSession {
    /// The session shares the sampler's prediction store and buffer
    pub fn new(
        config: RecordingConfig,
        sink_factory: Arc<dyn SinkFactory>,
        library: Arc<dyn MediaLibrary>,
        sampler: Arc<MetricsSampler>,
    ) -> Self {
        let store = sampler.store().clone();
        let buffer = sampler.buffer().clone();
        Self {
            config,
            sink_factory,
            library,
            sampler,
            store,
            buffer,
            state: Mutex::new(SessionState::Idle),
        }
    }

    pub fn is_recording(&self) -> bool {
        matches!(*self.state.lock(), SessionState::Recording(_))
    }

    /// A stop is finalizing the previous recording
    pub fn is_stopping(&self) -> bool {
        matches!(*self.state.lock(), SessionState::Stopping)
    }

    pub fn admission_policy(&self) -> AdmissionPolicy {
        self.config.admission
    }

    /// Presentation time the next admitted frame will get, `None` when idle
    pub fn next_presentation_time(&self) -> Option<Duration> {
        match &*self.state.lock() {
            SessionState::Recording(active) => Some(active.next_presentation_time),
            SessionState::Idle | SessionState::Stopping => None,
        }
    }

    /// Open a fresh sink and start sampling. Requires a tokio runtime.
    pub fn start(&self) -> Result<SessionInfo, VisionError> {
        let mut state = self.state.lock();
        if !matches!(*state, SessionState::Idle) {
            return Err(VisionError::InvalidTransition {
                action: "start",
                phase: state.phase(),
            });
        }

        let output_path = self.config.output_path.clone();
        match std::fs::remove_file(&output_path) {
            Ok(()) => info!("Removed previous recording at {:?}", output_path),
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => {
                return Err(VisionError::Recording(format!(
                    "cannot replace {:?}: {}",
                    output_path, e
                )))
            }
        }

        let sink = self.sink_factory.open(&output_path).map_err(|e| match e {
            VisionError::Recording(_) => e,
            other => VisionError::Recording(format!("cannot open sink at {:?}: {}", output_path, other)),
        })?;

        let predictions_dir = self.store.lock().begin_session();
        self.buffer.lock().clear();
        self.sampler.start()?;

        let info = SessionInfo {
            started_at: Utc::now(),
            output_path,
            predictions_dir,
        };
        *state = SessionState::Recording(ActiveSession {
            info: info.clone(),
            sink,
            next_presentation_time: Duration::ZERO,
            frames_admitted: 0,
            frames_dropped: 0,
        });

        info!("Recording started: {:?}", info.output_path);
        Ok(info)
    }

    /// Offer a processed frame to the sink
    pub fn on_frame(&self, frame: &Frame, batch: &DetectionBatch) -> Admission {
        let mut state = self.state.lock();
        let SessionState::Recording(active) = &mut *state else {
            return Admission::Idle;
        };

        if !self.config.admission.admits(batch.contains_target()) {
            return Admission::Filtered;
        }

        if !active.sink.is_ready_for_more_data() {
            active.frames_dropped += 1;
            debug!("Sink busy, dropping frame {}", frame.sequence);
            return Admission::Dropped;
        }

        let presentation_time = active.next_presentation_time;
        if let Err(e) = active.sink.append(frame, presentation_time) {
            active.frames_dropped += 1;
            warn!("Dropping frame {}: {}", frame.sequence, e);
            return Admission::Dropped;
        }

        active.frames_admitted += 1;
        active.next_presentation_time = presentation_at(self.config.frame_duration(), active.frames_admitted);
        Admission::Admitted(presentation_time)
    }

    /// Buffer a batch for the next prediction flush. Returns whether it
    /// was buffered.
    pub fn on_detection_batch(&self, batch: &DetectionBatch) -> bool {
        let state = self.state.lock();
        if !matches!(*state, SessionState::Recording(_)) {
            return false;
        }
        if !self.config.admission.admits(batch.contains_target()) {
            return false;
        }
        self.buffer.lock().push(batch.clone());
        true
    }

    /// Stop sampling, flush what is buffered, finalize the sink and
    /// import the artifact. The session stays `Stopping` until all of
    /// that is done and is idle afterwards even if a step fails.
    pub async fn stop(&self) -> Result<RecordingSummary, VisionError> {
        let active = {
            let mut state = self.state.lock();
            match std::mem::replace(&mut *state, SessionState::Stopping) {
                SessionState::Recording(active) => active,
                other => {
                    let phase = other.phase();
                    *state = other;
                    return Err(VisionError::InvalidTransition { action: "stop", phase });
                }
            }
        };
        let _idle = IdleOnDrop(&self.state);

        self.sampler.stop().await;

        let pending = std::mem::take(&mut *self.buffer.lock());
        let prediction_files = {
            let mut store = self.store.lock();
            if let Err(e) = store.flush(&pending) {
                error!("Final prediction flush lost {} frames: {}", pending.len(), e);
            }
            store.end_session();
            store.session_files()
        };

        let ActiveSession {
            info,
            sink,
            next_presentation_time,
            frames_admitted,
            frames_dropped,
        } = active;

        let artifact = sink.finalize().await.map_err(|e| match e {
            VisionError::Recording(_) => e,
            other => VisionError::Recording(other.to_string()),
        })?;

        let library_item = self.library.import(&artifact).map_err(|e| match e {
            VisionError::MediaLibrary(_) => e,
            other => VisionError::MediaLibrary(other.to_string()),
        })?;

        info!(
            "Recording stopped: {} frames admitted, {} dropped, {:?}",
            frames_admitted, frames_dropped, next_presentation_time
        );
        Ok(RecordingSummary {
            started_at: info.started_at,
            frames_admitted,
            frames_dropped,
            duration: next_presentation_time,
            library_item,
            predictions_dir: info.predictions_dir,
            prediction_files,
        })
    }
}

/// Presentation time after `frames` admitted frames, computed from the
/// count rather than accumulated so it cannot drift.
fn presentation_at(frame_duration: Duration, frames: u64) -> Duration {
    let nanos = u64::try_from(frame_duration.as_nanos()).unwrap_or(u64::MAX);
    Duration::from_nanos(nanos.saturating_mul(frames))
}
