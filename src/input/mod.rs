//! Video input/output system.
//!
//! The pipeline drives decode and encode through the [`FrameSource`] and
//! [`FrameSink`] seams; the file-backed implementations here wrap OpenCV
//! `videoio` handles. End of stream is a normal condition (`Ok(None)`),
//! never an error.

use anyhow::{bail, Context, Result};
use opencv::core::{Mat, Size};
use opencv::prelude::*;
use opencv::videoio::{self, VideoCapture, VideoWriter};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Stream properties read from the decode side and reused verbatim for the
/// encode side, so input and output geometry always match.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VideoGeometry {
    pub width: i32,
    pub height: i32,
    pub fps: f64,
    /// Reported frame count; informational only, some containers lie.
    pub frame_count: i64,
}

/// Sequential decode capability.
pub trait FrameSource {
    fn geometry(&self) -> VideoGeometry;

    /// Next frame in decode order, or `Ok(None)` once the stream ends.
    fn read_frame(&mut self) -> Result<Option<Mat>>;

    /// Release the decode handle. Idempotent; also happens on drop.
    fn release(&mut self) -> Result<()>;
}

/// Sequential encode capability.
pub trait FrameSink {
    fn write_frame(&mut self, frame: &Mat) -> Result<()>;

    /// Release the encode handle. Idempotent; also happens on drop.
    fn release(&mut self) -> Result<()>;
}

/// File-backed decoder.
pub struct VideoFileSource {
    capture: VideoCapture,
    geometry: VideoGeometry,
    path: PathBuf,
}

impl VideoFileSource {
    /// Open `path` for sequential decode, failing before any processing if
    /// the file cannot be read.
    pub fn open(path: &Path) -> Result<Self> {
        let capture = VideoCapture::from_file(
            path.to_str()
                .with_context(|| format!("video path {} is not valid UTF-8", path.display()))?,
            videoio::CAP_ANY,
        )
        .with_context(|| format!("failed to open video file {}", path.display()))?;
        if !capture.is_opened()? {
            bail!("could not open video file {}", path.display());
        }

        let geometry = VideoGeometry {
            width: capture.get(videoio::CAP_PROP_FRAME_WIDTH)? as i32,
            height: capture.get(videoio::CAP_PROP_FRAME_HEIGHT)? as i32,
            fps: capture.get(videoio::CAP_PROP_FPS)?,
            frame_count: capture.get(videoio::CAP_PROP_FRAME_COUNT)? as i64,
        };
        debug!(
            path = %path.display(),
            width = geometry.width,
            height = geometry.height,
            fps = geometry.fps,
            frames = geometry.frame_count,
            "opened video source"
        );

        Ok(Self {
            capture,
            geometry,
            path: path.to_path_buf(),
        })
    }
}

impl FrameSource for VideoFileSource {
    fn geometry(&self) -> VideoGeometry {
        self.geometry
    }

    fn read_frame(&mut self) -> Result<Option<Mat>> {
        let mut frame = Mat::default();
        let read = self
            .capture
            .read(&mut frame)
            .with_context(|| format!("failed to decode from {}", self.path.display()))?;
        if !read || frame.empty() {
            return Ok(None);
        }
        Ok(Some(frame))
    }

    fn release(&mut self) -> Result<()> {
        self.capture
            .release()
            .with_context(|| format!("failed to release decoder for {}", self.path.display()))
    }
}

/// File-backed encoder producing an mp4v stream at the source geometry.
pub struct VideoFileSink {
    writer: VideoWriter,
    path: PathBuf,
}

impl VideoFileSink {
    pub fn create(path: &Path, geometry: &VideoGeometry) -> Result<Self> {
        let fourcc = VideoWriter::fourcc('m', 'p', '4', 'v')?;
        let writer = VideoWriter::new(
            path.to_str()
                .with_context(|| format!("output path {} is not valid UTF-8", path.display()))?,
            fourcc,
            geometry.fps,
            Size::new(geometry.width, geometry.height),
            true,
        )
        .with_context(|| format!("failed to create video writer for {}", path.display()))?;
        if !writer.is_opened()? {
            bail!("could not open {} for encoding", path.display());
        }

        Ok(Self {
            writer,
            path: path.to_path_buf(),
        })
    }
}

impl FrameSink for VideoFileSink {
    fn write_frame(&mut self, frame: &Mat) -> Result<()> {
        self.writer
            .write(frame)
            .with_context(|| format!("failed to encode frame into {}", self.path.display()))
    }

    fn release(&mut self) -> Result<()> {
        self.writer
            .release()
            .with_context(|| format!("failed to release encoder for {}", self.path.display()))
    }
}
