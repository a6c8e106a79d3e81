// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
//! Concrete detector implementations.
//!
//! Currently a single model family: YOLOv8 detection exported to ONNX,
//! executed through `ort`. The pipeline only sees the [`crate::Detector`]
//! trait, so alternative models slot in without touching the loop.
mod yolov8;

pub use yolov8::{YoloConfig, YoloDetector};

use anyhow::{ensure, Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

/// Default detection model file name, looked up next to the binary and in
/// the user cache.
pub const DEFAULT_MODEL_FILE: &str = "yolov8n.onnx";

const DEFAULT_MODEL_URL: &str =
    "https://github.com/ultralytics/assets/releases/download/v8.2.0/yolov8n.onnx";

/// Resolve the ONNX model to run.
///
/// An explicit path must exist. Otherwise `models/yolov8n.onnx` is used when
/// present, falling back to the user cache dir; the default weights are
/// downloaded there once on first use.
pub fn ensure_model(explicit: Option<PathBuf>) -> Result<PathBuf> {
    if let Some(path) = explicit {
        ensure!(
            path.is_file(),
            "model file {} was not found",
            path.display()
        );
        return Ok(path);
    }

    let local = Path::new("models").join(DEFAULT_MODEL_FILE);
    if local.is_file() {
        return Ok(local);
    }

    let cache_dir = dirs::cache_dir()
        .context("no user cache directory available; pass --model explicitly")?
        .join("crowdwatch");
    let cached = cache_dir.join(DEFAULT_MODEL_FILE);
    if cached.is_file() {
        return Ok(cached);
    }

    fs::create_dir_all(&cache_dir)
        .with_context(|| format!("failed to create {}", cache_dir.display()))?;
    info!(
        "downloading default model {} to {}",
        DEFAULT_MODEL_URL,
        cached.display()
    );
    let response = ureq::get(DEFAULT_MODEL_URL)
        .call()
        .with_context(|| format!("failed to download {DEFAULT_MODEL_URL}"))?;

    // Download to a scratch name first so an interrupted fetch never leaves
    // a truncated model behind.
    let partial = cache_dir.join(format!("{DEFAULT_MODEL_FILE}.part"));
    let mut reader = response.into_reader();
    let mut file = fs::File::create(&partial)
        .with_context(|| format!("failed to create {}", partial.display()))?;
    std::io::copy(&mut reader, &mut file)
        .with_context(|| format!("failed to write {}", partial.display()))?;
    fs::rename(&partial, &cached)
        .with_context(|| format!("failed to move model into {}", cached.display()))?;

    Ok(cached)
}
