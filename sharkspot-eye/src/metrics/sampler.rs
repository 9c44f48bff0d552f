//! Fixed-interval metrics and prediction flushing

use crate::error::VisionError;
use crate::metrics::probe::{CpuTicks, SystemProbe};
use crate::predictions::PredictionStore;
use chrono::Utc;
use parking_lot::Mutex;
use sharkspot_core::{DetectionBatch, MetricsSnapshot};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

/// Batches waiting for the next flush
pub type PredictionBuffer = Arc<Mutex<Vec<DetectionBatch>>>;

/// Running mean of per-tick CPU utilization since a baseline
#[derive(Debug, Default)]
struct CpuAccumulator {
    last: Option<CpuTicks>,
    sum: f64,
    samples: u64,
}

impl CpuAccumulator {
    /// A reading without a baseline only becomes the baseline
    fn observe(&mut self, ticks: CpuTicks) {
        if let Some(utilization) = self.last.and_then(|last| ticks.since(&last).utilization()) {
            self.sum += utilization;
            self.samples += 1;
        }
        self.last = Some(ticks);
    }

    fn mean(&self) -> Option<f64> {
        if self.samples == 0 {
            None
        } else {
            Some(self.sum / self.samples as f64)
        }
    }

    fn reset(&mut self, baseline: Option<CpuTicks>) {
        *self = Self {
            last: baseline,
            ..Self::default()
        };
    }
}

struct SamplerInner {
    interval: Duration,
    frames: AtomicU64,
    probe: Arc<dyn SystemProbe>,
    cpu: Mutex<CpuAccumulator>,
    snapshot: watch::Sender<MetricsSnapshot>,
    store: Arc<Mutex<PredictionStore>>,
    buffer: PredictionBuffer,
}

impl SamplerInner {
    fn tick(&self) -> MetricsSnapshot {
        let frames = self.frames.swap(0, Ordering::AcqRel);
        let previous = self.snapshot.borrow().clone();

        let frames_per_second = frames as f64 / self.interval.as_secs_f64();

        let cpu_utilization = match self.probe.cpu_ticks() {
            Ok(ticks) => {
                let mut cpu = self.cpu.lock();
                cpu.observe(ticks);
                cpu.mean().unwrap_or(previous.cpu_utilization)
            }
            Err(e) => {
                warn!("CPU sample failed, keeping last value: {}", e);
                previous.cpu_utilization
            }
        };

        let resident_memory_bytes = match self.probe.resident_memory() {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!("Memory sample failed, keeping last value: {}", e);
                previous.resident_memory_bytes
            }
        };

        let snapshot = MetricsSnapshot {
            frames_per_second,
            cpu_utilization,
            resident_memory_bytes,
            sampled_at: Utc::now(),
        };
        self.snapshot.send_replace(snapshot.clone());

        let drained = std::mem::take(&mut *self.buffer.lock());
        if !drained.is_empty() {
            if let Err(e) = self.store.lock().flush(&drained) {
                error!("Dropping {} buffered prediction frames: {}", drained.len(), e);
            }
        }

        debug!(
            "Metrics: {:.1} fps, cpu {:.1}%, rss {} bytes",
            snapshot.frames_per_second,
            snapshot.cpu_utilization * 100.0,
            snapshot.resident_memory_bytes
        );
        snapshot
    }
}

struct SamplerTask {
    shutdown: oneshot::Sender<()>,
    handle: JoinHandle<()>,
}

/// Computes throughput and host load once per interval and drains the
/// prediction buffer into the store.
pub struct MetricsSampler {
    inner: Arc<SamplerInner>,
    task: Mutex<Option<SamplerTask>>,
}

impl MetricsSampler {
    pub fn new(
        interval: Duration,
        probe: Arc<dyn SystemProbe>,
        store: Arc<Mutex<PredictionStore>>,
        buffer: PredictionBuffer,
    ) -> Self {
        let (snapshot, _) = watch::channel(MetricsSnapshot::default());
        Self {
            inner: Arc::new(SamplerInner {
                interval,
                frames: AtomicU64::new(0),
                probe,
                cpu: Mutex::new(CpuAccumulator::default()),
                snapshot,
                store,
                buffer,
            }),
            task: Mutex::new(None),
        }
    }

    pub fn interval(&self) -> Duration {
        self.inner.interval
    }

    /// Count one processed frame toward the current interval
    pub fn record_frame(&self) {
        self.inner.frames.fetch_add(1, Ordering::AcqRel);
    }

    /// Frames counted since the last tick
    pub fn pending_frames(&self) -> u64 {
        self.inner.frames.load(Ordering::Acquire)
    }

    pub fn store(&self) -> &Arc<Mutex<PredictionStore>> {
        &self.inner.store
    }

    pub fn buffer(&self) -> &PredictionBuffer {
        &self.inner.buffer
    }

    /// Run one sampling step now
    pub fn tick(&self) -> MetricsSnapshot {
        self.inner.tick()
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        self.inner.snapshot.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<MetricsSnapshot> {
        self.inner.snapshot.subscribe()
    }

    pub fn is_running(&self) -> bool {
        self.task.lock().is_some()
    }

    /// Arm the interval timer. Counters and the CPU mean start fresh
    /// from a baseline taken now.
    pub fn start(&self) -> Result<(), VisionError> {
        let mut task = self.task.lock();
        if task.is_some() {
            return Ok(());
        }

        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| VisionError::Metrics(format!("sampler needs a tokio runtime: {}", e)))?;

        self.inner.frames.store(0, Ordering::Release);
        let baseline = match self.inner.probe.cpu_ticks() {
            Ok(ticks) => Some(ticks),
            Err(e) => {
                warn!("CPU baseline failed, first tick will set it: {}", e);
                None
            }
        };
        self.inner.cpu.lock().reset(baseline);

        let (shutdown, mut shutdown_rx) = oneshot::channel();
        let inner = self.inner.clone();
        let handle = runtime.spawn(async move {
            let period = inner.interval;
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        inner.tick();
                    }
                    _ = &mut shutdown_rx => break,
                }
            }
        });

        *task = Some(SamplerTask { shutdown, handle });
        info!("Metrics sampler started, interval {:?}", self.inner.interval);
        Ok(())
    }

    /// Disarm the timer and wait for an in-flight tick to finish
    pub async fn stop(&self) {
        let task = self.task.lock().take();
        if let Some(task) = task {
            let _ = task.shutdown.send(());
            if let Err(e) = task.handle.await {
                warn!("Metrics task ended abnormally: {}", e);
            }
            info!("Metrics sampler stopped");
        }
    }
}
