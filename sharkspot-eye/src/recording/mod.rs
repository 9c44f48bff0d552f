//! Conditional recording of the live feed

pub mod library;
pub mod session;
pub mod sink;
#[cfg(feature = "opencv")]
pub mod video;

pub use library::{DirectoryLibrary, MediaLibrary};
pub use session::{Admission, RecordingSession, RecordingSummary, SessionInfo};
pub use sink::{read_raw_video_index, FrameSink, RawFrameHeader, RawVideoSink, RawVideoSinkFactory, SinkFactory};
#[cfg(feature = "opencv")]
pub use video::{frame_to_bgr_mat, OpenCvSink, OpenCvSinkFactory};
