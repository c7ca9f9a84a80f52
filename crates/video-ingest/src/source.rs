//! OpenCV capture wrapper.
//!
//! The pipeline owns its source and pulls one frame per loop iteration, so
//! unlike a free-running camera reader this type does no buffering of its
//! own: `read` maps directly onto one `VideoCapture::read`, resized to the
//! pipeline's fixed resolution.

use chrono::Utc;
use opencv::{
    core::{self, MatTraitConstManual},
    prelude::*,
    videoio::{self, VideoCapture, VideoCaptureTrait},
};
use tracing::warn;

use crate::types::{CaptureError, Frame, FrameFormat};

/// How a source behaves when a read comes back empty.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SourceKind {
    /// Live device: an empty read is transient and the next poll may succeed.
    Device,
    /// File-backed: an empty read is the end of the stream.
    File,
}

/// Seam the pipeline reads frames through. `VideoSource` is the real
/// implementation; tests script their own.
pub trait FrameSource {
    fn kind(&self) -> SourceKind;

    /// Pull the next frame, `Ok(None)` when the source has nothing to give.
    fn read(&mut self) -> Result<Option<Frame>, CaptureError>;

    /// Seek a file-backed source back to its first frame.
    fn rewind(&mut self) -> Result<(), CaptureError>;
}

pub struct VideoSource {
    cap: VideoCapture,
    kind: SourceKind,
    target_size: (i32, i32),
    frame: Mat,
    scratch: Mat,
}

impl VideoSource {
    /// Open a device (numeric index or `/dev/videoN` path) or a video file,
    /// fixing the output resolution to `target_size` (width, height).
    pub fn open(uri: &str, target_size: (i32, i32)) -> Result<Self, CaptureError> {
        let kind = if parse_device_index(uri).is_some() {
            SourceKind::Device
        } else {
            SourceKind::File
        };
        let mut cap = open_video_capture(uri)?;
        if kind == SourceKind::Device {
            configure_camera(&mut cap, target_size, 30.0);
        }
        Ok(Self {
            cap,
            kind,
            target_size,
            frame: Mat::default(),
            scratch: Mat::default(),
        })
    }
}

impl FrameSource for VideoSource {
    fn kind(&self) -> SourceKind {
        self.kind
    }

    fn read(&mut self) -> Result<Option<Frame>, CaptureError> {
        let grabbed = self
            .cap
            .read(&mut self.frame)
            .map_err(|e| CaptureError::Other(e.into()))?;
        if !grabbed {
            return Ok(None);
        }

        let size = self
            .frame
            .size()
            .map_err(|e| CaptureError::Other(e.into()))?;
        if size.width <= 0 {
            return Ok(None);
        }

        let (target_w, target_h) = self.target_size;
        let working = if size.width != target_w || size.height != target_h {
            opencv::imgproc::resize(
                &self.frame,
                &mut self.scratch,
                core::Size {
                    width: target_w,
                    height: target_h,
                },
                0.0,
                0.0,
                opencv::imgproc::INTER_LINEAR,
            )
            .map_err(|e| CaptureError::Other(e.into()))?;
            &self.scratch
        } else {
            &self.frame
        };

        let data = working
            .data_bytes()
            .map_err(|e| CaptureError::Other(e.into()))?
            .to_vec();

        Ok(Some(Frame {
            data,
            width: target_w,
            height: target_h,
            timestamp_ms: Utc::now().timestamp_millis(),
            format: FrameFormat::Bgr8,
        }))
    }

    fn rewind(&mut self) -> Result<(), CaptureError> {
        match self.cap.set(videoio::CAP_PROP_POS_FRAMES, 0.0) {
            Ok(true) => Ok(()),
            Ok(false) => Err(CaptureError::Other(anyhow::anyhow!(
                "source does not support seeking"
            ))),
            Err(e) => Err(CaptureError::Other(e.into())),
        }
    }
}

/// Parse a numeric or `/dev/videoX` style URI into a device index.
fn parse_device_index(uri: &str) -> Option<i32> {
    if let Ok(index) = uri.parse::<i32>() {
        return Some(index);
    }
    if let Some(stripped) = uri.strip_prefix("/dev/video") {
        if stripped.chars().all(|c| c.is_ascii_digit()) {
            if let Ok(index) = stripped.parse::<i32>() {
                return Some(index);
            }
        }
    }
    None
}

/// Attempt to open a video input either by index or URI.
fn open_video_capture(uri: &str) -> Result<VideoCapture, CaptureError> {
    if let Some(index) = parse_device_index(uri) {
        for backend in [videoio::CAP_V4L, videoio::CAP_ANY] {
            match VideoCapture::new(index, backend) {
                Ok(cap) => {
                    if cap.is_opened().map_err(|e| CaptureError::Other(e.into()))? {
                        return Ok(cap);
                    }
                }
                Err(err) => {
                    warn!("failed to open device #{index} with backend {backend}: {err}");
                }
            }
        }
    }

    for backend in [videoio::CAP_V4L, videoio::CAP_ANY] {
        match VideoCapture::from_file(uri, backend) {
            Ok(cap) => {
                if cap.is_opened().map_err(|e| CaptureError::Other(e.into()))? {
                    return Ok(cap);
                }
            }
            Err(err) => {
                warn!("failed to open {uri} with backend {backend}: {err}");
            }
        }
    }

    Err(CaptureError::Open {
        uri: uri.to_string(),
    })
}

/// Apply common capture settings (pixel format, resolution, fps hint).
fn configure_camera(cap: &mut VideoCapture, target_size: (i32, i32), fps: f64) {
    if let Ok(mjpg) = videoio::VideoWriter::fourcc('M', 'J', 'P', 'G') {
        let _ = cap.set(videoio::CAP_PROP_FOURCC, mjpg as f64);
    }
    let _ = cap.set(videoio::CAP_PROP_FRAME_WIDTH, target_size.0 as f64);
    let _ = cap.set(videoio::CAP_PROP_FRAME_HEIGHT, target_size.1 as f64);
    let _ = cap.set(videoio::CAP_PROP_FPS, fps);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numeric_uris_are_device_indices() {
        assert_eq!(parse_device_index("0"), Some(0));
        assert_eq!(parse_device_index("3"), Some(3));
    }

    #[test]
    fn dev_video_paths_are_device_indices() {
        assert_eq!(parse_device_index("/dev/video0"), Some(0));
        assert_eq!(parse_device_index("/dev/video12"), Some(12));
        assert_eq!(parse_device_index("/dev/videoX"), None);
    }

    #[test]
    fn file_paths_are_not_device_indices() {
        assert_eq!(parse_device_index("data/video2.avi"), None);
        assert_eq!(parse_device_index("rtsp://camera/stream"), None);
    }
}
