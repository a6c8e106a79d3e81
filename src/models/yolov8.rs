// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
//
// YOLOv8 person detector
// 包含: 模型加载、预处理、推理、后处理

use anyhow::{ensure, Context, Result};
use image::{DynamicImage, GenericImageView};
use ndarray::{Array4, ArrayView2};
use opencv::core::Mat;
use opencv::imgproc;
use opencv::prelude::*;
use ort::{CUDAExecutionProvider, GraphOptimizationLevel, Session, Value};
use std::path::PathBuf;
use tracing::info;

use crate::detection::{BBox, Detections, Detector};
use crate::non_max_suppression;

/// Square input size of the standard YOLOv8 detection export.
const INPUT_SIZE: u32 = 640;

/// Model output rows 0..4 are cx, cy, w, h; class scores follow.
const CXYWH_OFFSET: usize = 4;

/// "person" is class 0 in the COCO ordering the model was trained on.
const PERSON_CLASS_ID: usize = 0;

pub struct YoloConfig {
    pub model_path: PathBuf,
    /// Detections at or below this confidence are rejected.
    pub conf: f32,
    /// IoU threshold for non-maximum suppression.
    pub iou: f32,
    pub cuda: bool,
    pub device_id: i32,
}

/// YOLOv8 detection model running on an ONNX Runtime session.
pub struct YoloDetector {
    session: Session,
    conf: f32,
    iou: f32,
}

impl YoloDetector {
    pub fn new(config: YoloConfig) -> Result<Self> {
        ensure!(
            (0.0..=1.0).contains(&config.conf),
            "confidence threshold must be within 0.0..=1.0, got {}",
            config.conf
        );

        let mut builder = Session::builder()?
            .with_optimization_level(GraphOptimizationLevel::Level3)?;
        if config.cuda {
            builder = builder.with_execution_providers([CUDAExecutionProvider::default()
                .with_device_id(config.device_id)
                .build()])?;
        }
        let session = builder
            .commit_from_file(&config.model_path)
            .with_context(|| {
                format!("failed to load model {}", config.model_path.display())
            })?;

        info!(
            model = %config.model_path.display(),
            conf = config.conf,
            iou = config.iou,
            cuda = config.cuda,
            "YOLOv8 person detector ready"
        );

        Ok(Self {
            session,
            conf: config.conf,
            iou: config.iou,
        })
    }

    /// Letterbox the frame onto the square model input and return the CHW
    /// tensor data plus the resize ratio used.
    fn preprocess(&self, img: &DynamicImage) -> (Vec<f32>, f32) {
        let (w0, h0) = img.dimensions();
        let ratio =
            (INPUT_SIZE as f32 / w0 as f32).min(INPUT_SIZE as f32 / h0 as f32);
        let w_new = (w0 as f32 * ratio).round() as u32;
        let h_new = (h0 as f32 * ratio).round() as u32;
        let resized =
            img.resize_exact(w_new, h_new, image::imageops::FilterType::Triangle);

        let size = INPUT_SIZE as usize;
        let mut xs = Array4::<f32>::from_elem((1, 3, size, size), 144.0 / 255.0);
        for (x, y, pixel) in resized.pixels() {
            let [r, g, b, _] = pixel.0;
            xs[[0, 0, y as usize, x as usize]] = r as f32 / 255.0;
            xs[[0, 1, y as usize, x as usize]] = g as f32 / 255.0;
            xs[[0, 2, y as usize, x as usize]] = b as f32 / 255.0;
        }

        let (data, _) = xs.into_raw_vec_and_offset();
        (data, ratio)
    }

    fn forward(&mut self, input: Vec<f32>) -> Result<(Vec<i64>, Vec<f32>)> {
        let value = Value::from_array((
            [1_i64, 3, INPUT_SIZE as i64, INPUT_SIZE as i64],
            input,
        ))?;
        let outputs = self.session.run(ort::inputs!["images" => value]?)?;
        let (shape, preds) = outputs["output0"].try_extract_raw_tensor::<f32>()?;
        Ok((shape.to_vec(), preds.to_vec()))
    }
}

impl Detector for YoloDetector {
    fn detect(&mut self, frame: &Mat) -> Result<Detections> {
        let (img, w0, h0) = mat_to_rgb(frame)?;
        let (input, ratio) = self.preprocess(&img);
        let (shape, preds) = self.forward(input)?;
        decode_predictions(
            &shape,
            &preds,
            self.conf,
            self.iou,
            ratio,
            w0 as f32,
            h0 as f32,
        )
    }

    fn name(&self) -> &'static str {
        "yolov8"
    }
}

/// Convert a decoded BGR frame into an RGB image for preprocessing.
fn mat_to_rgb(frame: &Mat) -> Result<(DynamicImage, u32, u32)> {
    let mut rgb = Mat::default();
    imgproc::cvt_color(frame, &mut rgb, imgproc::COLOR_BGR2RGB, 0)?;

    let width = rgb.cols() as u32;
    let height = rgb.rows() as u32;
    let data = rgb.data_bytes()?.to_vec();
    let buffer = image::RgbImage::from_raw(width, height, data)
        .context("frame buffer does not match its reported geometry")?;
    Ok((DynamicImage::ImageRgb8(buffer), width, height))
}

/// Turn the raw `[1, attrs, anchors]` model output into accepted person
/// detections in original-frame pixel coordinates.
fn decode_predictions(
    shape: &[i64],
    preds: &[f32],
    conf: f32,
    iou: f32,
    ratio: f32,
    w0: f32,
    h0: f32,
) -> Result<Detections> {
    ensure!(
        shape.len() == 3 && shape[0] == 1,
        "unexpected model output shape {shape:?}"
    );
    let attrs = shape[1] as usize;
    let anchors = shape[2] as usize;
    ensure!(
        attrs > CXYWH_OFFSET + PERSON_CLASS_ID,
        "model output carries no class scores (attrs = {attrs})"
    );
    let preds = ArrayView2::from_shape((attrs, anchors), preds)?;

    let mut data: Vec<(BBox, f32)> = Vec::new();
    for anchor in 0..anchors {
        let score = preds[[CXYWH_OFFSET + PERSON_CLASS_ID, anchor]];
        if score <= conf {
            continue;
        }

        let cx = preds[[0, anchor]];
        let cy = preds[[1, anchor]];
        let w = preds[[2, anchor]];
        let h = preds[[3, anchor]];
        let bbox = BBox::new(
            ((cx - w / 2.0) / ratio).clamp(0.0, w0),
            ((cy - h / 2.0) / ratio).clamp(0.0, h0),
            ((cx + w / 2.0) / ratio).clamp(0.0, w0),
            ((cy + h / 2.0) / ratio).clamp(0.0, h0),
        );
        if !bbox.is_valid() {
            continue;
        }
        data.push((bbox, score));
    }

    non_max_suppression(&mut data, iou);

    let (boxes, scores) = data.into_iter().unzip();
    Ok(Detections { boxes, scores })
}
