//! OpenCV-backed encoding sink
//!
//! The container is picked by OpenCV from the output extension (`.mp4`,
//! `.avi`, ...) and the codec from `RecordingConfig::codec`. The writer
//! opens lazily on the first frame because the frame size is not known
//! before then.

use crate::error::VisionError;
use crate::recording::sink::{FrameSink, SinkFactory};
use async_trait::async_trait;
use opencv::{
    core::{self, Mat, Scalar},
    imgproc,
    prelude::*,
    videoio::VideoWriter,
};
use sharkspot_core::{Frame, PixelFormat, RecordingConfig};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

/// Convert a frame into the BGR `Mat` the writer expects
pub fn frame_to_bgr_mat(frame: &Frame) -> Result<Mat, VisionError> {
    frame.validate()?;

    let (typ, code) = match frame.format {
        PixelFormat::Bgra8 => (core::CV_8UC4, imgproc::COLOR_BGRA2BGR),
        PixelFormat::Rgba8 => (core::CV_8UC4, imgproc::COLOR_RGBA2BGR),
        PixelFormat::Rgb8 => (core::CV_8UC3, imgproc::COLOR_RGB2BGR),
        PixelFormat::Gray8 => (core::CV_8UC1, imgproc::COLOR_GRAY2BGR),
    };

    let mut packed =
        Mat::new_rows_cols_with_default(frame.height as i32, frame.width as i32, typ, Scalar::all(0.0))?;
    // Buffers may carry trailing padding past the last row
    let bytes = packed.data_bytes_mut()?;
    let len = bytes.len();
    bytes.copy_from_slice(&frame.data[..len]);

    let mut bgr = Mat::default();
    imgproc::cvt_color(&packed, &mut bgr, code, 0)?;
    Ok(bgr)
}

pub struct OpenCvSink {
    path: PathBuf,
    fourcc: i32,
    fps: f64,
    writer: Option<VideoWriter>,
    frame_size: Option<(u32, u32)>,
    frames_written: u64,
    failed: bool,
}

impl OpenCvSink {
    pub fn new(path: &Path, fourcc: i32, fps: f64) -> Result<Self, VisionError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        Ok(Self {
            path: path.to_path_buf(),
            fourcc,
            fps,
            writer: None,
            frame_size: None,
            frames_written: 0,
            failed: false,
        })
    }

    pub fn frames_written(&self) -> u64 {
        self.frames_written
    }

    fn open_writer(&mut self, width: u32, height: u32) -> Result<(), VisionError> {
        let path = self
            .path
            .to_str()
            .ok_or_else(|| VisionError::Recording(format!("{:?} is not valid UTF-8", self.path)))?;

        let writer = VideoWriter::new(
            path,
            self.fourcc,
            self.fps,
            core::Size::new(width as i32, height as i32),
            true,
        )?;
        if !writer.is_opened()? {
            return Err(VisionError::Recording(format!(
                "no encoder available for {:?}",
                self.path
            )));
        }

        info!("Opened video writer at {:?} ({}x{} @ {} fps)", self.path, width, height, self.fps);
        self.writer = Some(writer);
        self.frame_size = Some((width, height));
        Ok(())
    }

    fn write_frame(&mut self, frame: &Frame) -> Result<(), VisionError> {
        match self.frame_size {
            None => self.open_writer(frame.width, frame.height)?,
            Some(size) if size != (frame.width, frame.height) => {
                return Err(VisionError::Recording(format!(
                    "frame {} is {}x{}, writer expects {}x{}",
                    frame.sequence, frame.width, frame.height, size.0, size.1
                )));
            }
            Some(_) => {}
        }

        let mat = frame_to_bgr_mat(frame)?;
        let writer = self
            .writer
            .as_mut()
            .ok_or_else(|| VisionError::Recording("writer is closed".to_string()))?;
        writer.write(&mat)?;
        Ok(())
    }
}

#[async_trait]
impl FrameSink for OpenCvSink {
    fn is_ready_for_more_data(&self) -> bool {
        !self.failed
    }

    /// Frames are written in arrival order at the configured rate, so
    /// the presentation time is implied by the frame index.
    fn append(&mut self, frame: &Frame, presentation_time: Duration) -> Result<(), VisionError> {
        if self.failed {
            return Err(VisionError::Recording(format!("sink {:?} failed earlier", self.path)));
        }
        match self.write_frame(frame) {
            Ok(()) => {
                self.frames_written += 1;
                debug!("Encoded frame {} at {:?}", frame.sequence, presentation_time);
                Ok(())
            }
            Err(e @ VisionError::Recording(_)) if self.writer.is_some() => Err(e),
            Err(e) => {
                self.failed = true;
                Err(VisionError::Recording(format!(
                    "failed to encode frame {} to {:?}: {}",
                    frame.sequence, self.path, e
                )))
            }
        }
    }

    async fn finalize(self: Box<Self>) -> Result<PathBuf, VisionError> {
        let OpenCvSink {
            path,
            writer,
            frames_written,
            ..
        } = *self;

        let mut writer = writer
            .ok_or_else(|| VisionError::Recording(format!("no frames were recorded to {:?}", path)))?;

        tokio::task::spawn_blocking(move || writer.release())
            .await
            .map_err(|e| VisionError::Recording(format!("finalize task failed: {}", e)))?
            .map_err(|e| VisionError::Recording(format!("failed to finalize {:?}: {}", path, e.message)))?;

        info!("Finalized {:?} with {} frames", path, frames_written);
        Ok(path)
    }
}

/// Opens an [`OpenCvSink`] per recording
#[derive(Debug, Clone)]
pub struct OpenCvSinkFactory {
    fourcc: i32,
    fps: f64,
}

impl OpenCvSinkFactory {
    pub fn from_config(config: &RecordingConfig) -> Result<Self, VisionError> {
        let mut code = config.codec.chars();
        let (Some(a), Some(b), Some(c), Some(d), None) =
            (code.next(), code.next(), code.next(), code.next(), code.next())
        else {
            return Err(VisionError::Config(format!(
                "recording.codec '{}' must be a four character code",
                config.codec
            )));
        };

        Ok(Self {
            fourcc: VideoWriter::fourcc(a, b, c, d)?,
            fps: config.frame_rate.max(1) as f64,
        })
    }
}

impl SinkFactory for OpenCvSinkFactory {
    fn open(&self, path: &Path) -> Result<Box<dyn FrameSink>, VisionError> {
        Ok(Box::new(OpenCvSink::new(path, self.fourcc, self.fps)?))
    }
}
