// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
//! People detection and alerting over video files.
//!
//! The crate decodes a video sequentially, runs a pluggable person detector
//! on every frame, draws the detections and the running count onto the
//! frame, re-encodes the result, and keeps a per-frame history plus an
//! alert log for frames whose count reaches a configured threshold.
pub mod config; // CLI参数
pub mod detection; // 检测接口与数据结构
pub mod input; // 视频输入/输出系统
pub mod models; // 模型实现
pub mod pipeline; // 逐帧处理流水线
pub mod report; // JSON报告输出

pub use crate::config::Args;
pub use crate::detection::{BBox, Detections, Detector};
pub use crate::models::{YoloConfig, YoloDetector};
pub use crate::pipeline::{
    AlertRecord, CancelFlag, FrameRecord, Pipeline, PipelineOutcome,
};

/// Greedy non-maximum suppression over `(box, confidence)` pairs.
///
/// Keeps the highest-confidence box of every overlapping cluster and drops
/// the rest; `xs` is sorted and truncated in place.
pub fn non_max_suppression(xs: &mut Vec<(BBox, f32)>, iou_threshold: f32) {
    xs.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));

    let mut current_index = 0;
    for index in 0..xs.len() {
        let mut drop = false;
        for prev_index in 0..current_index {
            let iou = xs[prev_index].0.iou(&xs[index].0);
            if iou > iou_threshold {
                drop = true;
                break;
            }
        }
        if !drop {
            xs.swap(current_index, index);
            current_index += 1;
        }
    }
    xs.truncate(current_index);
}
