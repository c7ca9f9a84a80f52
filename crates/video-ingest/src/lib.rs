//! OpenCV-backed video sources polled by the counting pipeline.

mod source;
mod types;

pub use source::{FrameSource, SourceKind, VideoSource};
pub use types::{CaptureError, Frame, FrameFormat};
