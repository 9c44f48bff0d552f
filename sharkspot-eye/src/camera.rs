//! Capture-source seam and the frame hand-off to the detector
//!
//! The device itself lives outside this crate. A source implements
//! [`CaptureSource`] and pushes frames through the [`FrameFeed`] it is
//! given; the feed holds at most one pending frame and drops anything
//! that arrives while the detector is still busy.

use crate::error::VisionError;
use parking_lot::RwLock;
use sharkspot_core::Frame;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Push end of the single-slot frame channel
#[derive(Clone)]
pub struct FrameFeed {
    sender: mpsc::Sender<Frame>,
    dropped: Arc<AtomicU64>,
}

impl FrameFeed {
    /// Create a feed and the receiver the detection worker drains
    pub fn channel() -> (Self, mpsc::Receiver<Frame>) {
        let (sender, receiver) = mpsc::channel(1);
        (
            Self {
                sender,
                dropped: Arc::new(AtomicU64::new(0)),
            },
            receiver,
        )
    }

    /// Offer a frame without blocking.
    ///
    /// Returns `false` once the consumer is gone so the source can stop.
    pub fn push(&self, frame: Frame) -> bool {
        match self.sender.try_send(frame) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(frame)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                debug!("Detector busy, dropping frame {}", frame.sequence);
                true
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }

    /// Frames discarded because the detector had not taken the previous one
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}

/// A camera or other producer of frames
pub trait CaptureSource: Send {
    /// Begin delivering frames into `feed`. Calling while already
    /// capturing is a no-op.
    fn start(&mut self, feed: FrameFeed) -> Result<(), VisionError>;

    /// Stop delivering frames. Calling while idle is a no-op.
    fn stop(&mut self);

    fn is_capturing(&self) -> bool;
}

/// Replays a fixed list of frames at a steady rate.
///
/// Stands in for a device when driving the pipeline from recorded data.
pub struct ReplaySource {
    frames: Arc<Vec<Frame>>,
    frame_interval: Duration,
    is_running: Arc<RwLock<bool>>,
    handle: Option<tokio::task::JoinHandle<()>>,
}

impl ReplaySource {
    pub fn new(frames: Vec<Frame>, frame_interval: Duration) -> Self {
        Self {
            frames: Arc::new(frames),
            frame_interval,
            is_running: Arc::new(RwLock::new(false)),
            handle: None,
        }
    }

    /// Wait until every frame has been offered or the source is stopped
    pub async fn finished(&mut self) {
        if let Some(handle) = self.handle.take() {
            if let Err(e) = handle.await {
                warn!("Replay task ended abnormally: {}", e);
            }
        }
    }
}

impl CaptureSource for ReplaySource {
    fn start(&mut self, feed: FrameFeed) -> Result<(), VisionError> {
        if *self.is_running.read() {
            return Ok(());
        }

        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| VisionError::Camera(format!("Replay needs a tokio runtime: {}", e)))?;

        // A stopped run keeps its own flag, so it can never resume
        if let Some(previous) = self.handle.take() {
            previous.abort();
        }
        self.is_running = Arc::new(RwLock::new(true));

        let frames = self.frames.clone();
        let frame_interval = self.frame_interval;
        let is_running = self.is_running.clone();

        self.handle = Some(runtime.spawn(async move {
            for frame in frames.iter() {
                if !*is_running.read() {
                    break;
                }
                if !feed.push(frame.clone()) {
                    warn!("Frame consumer dropped, stopping replay");
                    break;
                }
                tokio::time::sleep(frame_interval).await;
            }

            *is_running.write() = false;
            info!("Replay finished, {} frames dropped", feed.dropped());
        }));

        info!("Replay started with {} frames", self.frames.len());
        Ok(())
    }

    fn stop(&mut self) {
        let was_running = std::mem::replace(&mut *self.is_running.write(), false);
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
        if was_running {
            info!("Replay stopped");
        }
    }

    fn is_capturing(&self) -> bool {
        *self.is_running.read()
    }
}
