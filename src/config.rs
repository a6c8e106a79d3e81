//! Command-line arguments.

use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "crowdwatch",
    about = "People detection and alerting over video files"
)]
pub struct Args {
    /// Input video to analyze
    #[arg(long = "video_path", value_name = "PATH")]
    pub video_path: PathBuf,

    /// Person count at which a frame raises an alert
    #[arg(long, value_name = "COUNT", value_parser = clap::value_parser!(u64).range(1..))]
    pub threshold: u64,

    /// ONNX detection model; the default weights are fetched on first use
    /// when omitted
    #[arg(long, value_name = "PATH")]
    pub model: Option<PathBuf>,

    /// Confidence a detection must exceed to be accepted
    #[arg(long, default_value_t = 0.5)]
    pub conf: f32,

    /// IoU threshold for non-maximum suppression
    #[arg(long, default_value_t = 0.45)]
    pub iou: f32,

    /// Directory receiving the annotated video and the JSON reports
    #[arg(long, default_value = "output_results", value_name = "DIR")]
    pub output_dir: PathBuf,

    /// Run inference on the CUDA execution provider
    #[arg(long)]
    pub cuda: bool,

    /// CUDA device id
    #[arg(long, default_value_t = 0)]
    pub device_id: i32,
}
