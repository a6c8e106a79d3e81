//! Detection interface consumed by the frame pipeline.
pub mod types;

pub use types::{BBox, Detections};

use anyhow::Result;
use opencv::core::Mat;

/// A person detector the pipeline can drive one frame at a time.
///
/// Implementations receive a decoded BGR frame and return the accepted
/// detections: person category only, confidence above the implementation's
/// configured threshold, boxes in pixel coordinates of the input frame.
/// The frame itself is never mutated.
///
/// An `Err` means "this frame could not be analyzed". The pipeline treats
/// it as zero detections and keeps going, so implementations should reserve
/// errors for per-frame failures and surface unusable-model conditions at
/// construction time instead.
pub trait Detector {
    fn detect(&mut self, frame: &Mat) -> Result<Detections>;

    /// Human-readable name for logging.
    fn name(&self) -> &'static str {
        "detector"
    }
}
