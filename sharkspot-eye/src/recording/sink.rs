//! Sequential frame sinks
//!
//! `RawVideoSink` writes an uncompressed container:
//!
//! ```text
//! "SSRV" | version: u16
//! per frame: pts_nanos: u64 | sequence: u64 | width: u32 | height: u32
//!            | format: u8 | payload_len: u32 | payload
//! ```
//!
//! All integers are little-endian.

use crate::error::VisionError;
use async_trait::async_trait;
use sharkspot_core::{Frame, PixelFormat};
use std::fs::File;
use std::io::{BufReader, BufWriter, ErrorKind, Read, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

const MAGIC: &[u8; 4] = b"SSRV";
const VERSION: u16 = 1;
const FRAME_HEADER_LEN: usize = 8 + 8 + 4 + 4 + 1 + 4;

/// Media encoder accepting frames in presentation-time order
#[async_trait]
pub trait FrameSink: Send {
    /// `false` means the caller should drop the frame instead of waiting
    fn is_ready_for_more_data(&self) -> bool;

    fn append(&mut self, frame: &Frame, presentation_time: Duration) -> Result<(), VisionError>;

    /// Flush and close, yielding the finished artifact
    async fn finalize(self: Box<Self>) -> Result<PathBuf, VisionError>;
}

/// Opens a fresh sink at a path
pub trait SinkFactory: Send + Sync {
    fn open(&self, path: &Path) -> Result<Box<dyn FrameSink>, VisionError>;
}

pub struct RawVideoSink {
    path: PathBuf,
    writer: BufWriter<File>,
    frames_written: u64,
    failed: bool,
}

impl RawVideoSink {
    pub fn create(path: &Path) -> Result<Self, VisionError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let mut writer = BufWriter::new(File::create(path)?);
        writer.write_all(MAGIC)?;
        writer.write_all(&VERSION.to_le_bytes())?;

        info!("Opened raw video sink at {:?}", path);
        Ok(Self {
            path: path.to_path_buf(),
            writer,
            frames_written: 0,
            failed: false,
        })
    }

    pub fn frames_written(&self) -> u64 {
        self.frames_written
    }

    fn write_frame(&mut self, frame: &Frame, presentation_time: Duration) -> std::io::Result<()> {
        let payload_len = u32::try_from(frame.data.len())
            .map_err(|_| std::io::Error::new(ErrorKind::InvalidInput, "frame payload exceeds 4 GiB"))?;
        let pts = u64::try_from(presentation_time.as_nanos()).unwrap_or(u64::MAX);

        self.writer.write_all(&pts.to_le_bytes())?;
        self.writer.write_all(&frame.sequence.to_le_bytes())?;
        self.writer.write_all(&frame.width.to_le_bytes())?;
        self.writer.write_all(&frame.height.to_le_bytes())?;
        self.writer.write_all(&[frame.format.code()])?;
        self.writer.write_all(&payload_len.to_le_bytes())?;
        self.writer.write_all(&frame.data)
    }
}

#[async_trait]
impl FrameSink for RawVideoSink {
    fn is_ready_for_more_data(&self) -> bool {
        !self.failed
    }

    fn append(&mut self, frame: &Frame, presentation_time: Duration) -> Result<(), VisionError> {
        if self.failed {
            return Err(VisionError::Recording(format!("sink {:?} failed earlier", self.path)));
        }
        if let Err(e) = self.write_frame(frame, presentation_time) {
            self.failed = true;
            return Err(VisionError::Recording(format!(
                "failed to write frame {} to {:?}: {}",
                frame.sequence, self.path, e
            )));
        }
        self.frames_written += 1;
        Ok(())
    }

    async fn finalize(self: Box<Self>) -> Result<PathBuf, VisionError> {
        let RawVideoSink { path, writer, frames_written, .. } = *self;

        let synced = tokio::task::spawn_blocking(move || -> std::io::Result<()> {
            let file = writer.into_inner().map_err(|e| e.into_error())?;
            file.sync_all()
        })
        .await
        .map_err(|e| VisionError::Recording(format!("finalize task failed: {}", e)))?;

        synced.map_err(|e| VisionError::Recording(format!("failed to finalize {:?}: {}", path, e)))?;
        info!("Finalized {:?} with {} frames", path, frames_written);
        Ok(path)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RawVideoSinkFactory;

impl SinkFactory for RawVideoSinkFactory {
    fn open(&self, path: &Path) -> Result<Box<dyn FrameSink>, VisionError> {
        Ok(Box::new(RawVideoSink::create(path)?))
    }
}

/// Header of one frame stored in a raw video file
#[derive(Debug, Clone, PartialEq)]
pub struct RawFrameHeader {
    pub presentation_time: Duration,
    pub sequence: u64,
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    pub payload_len: u32,
}

/// Read back the frame headers of a raw video file, skipping payloads
pub fn read_raw_video_index(path: &Path) -> Result<Vec<RawFrameHeader>, VisionError> {
    let mut reader = BufReader::new(File::open(path)?);

    let mut preamble = [0u8; 6];
    reader
        .read_exact(&mut preamble)
        .map_err(|e| VisionError::Recording(format!("{:?} has no header: {}", path, e)))?;
    if &preamble[..4] != MAGIC {
        return Err(VisionError::Recording(format!("{:?} is not a raw video file", path)));
    }
    let version = u16::from_le_bytes([preamble[4], preamble[5]]);
    if version != VERSION {
        return Err(VisionError::Recording(format!("{:?} has unsupported version {}", path, version)));
    }

    let mut headers = Vec::new();
    let mut buf = [0u8; FRAME_HEADER_LEN];
    loop {
        match reader.read_exact(&mut buf) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => break,
            Err(e) => return Err(e.into()),
        }

        let u64_at = |at: usize| {
            let mut bytes = [0u8; 8];
            bytes.copy_from_slice(&buf[at..at + 8]);
            u64::from_le_bytes(bytes)
        };
        let u32_at = |at: usize| {
            let mut bytes = [0u8; 4];
            bytes.copy_from_slice(&buf[at..at + 4]);
            u32::from_le_bytes(bytes)
        };

        let format = PixelFormat::from_code(buf[24]).ok_or_else(|| {
            VisionError::Recording(format!("unknown pixel format code {} in {:?}", buf[24], path))
        })?;
        let header = RawFrameHeader {
            presentation_time: Duration::from_nanos(u64_at(0)),
            sequence: u64_at(8),
            width: u32_at(16),
            height: u32_at(20),
            format,
            payload_len: u32_at(25),
        };

        let skipped = std::io::copy(
            &mut (&mut reader).take(header.payload_len as u64),
            &mut std::io::sink(),
        )?;
        if skipped != header.payload_len as u64 {
            return Err(VisionError::Recording(format!(
                "frame {} in {:?} is truncated",
                header.sequence, path
            )));
        }
        headers.push(header);
    }

    debug!("Indexed {} frames in {:?}", headers.len(), path);
    Ok(headers)
}
