//! CLI entry point: argument handling, interrupt wiring, report output.

use anyhow::{ensure, Context, Result};
use clap::Parser;
use std::fs;
use tracing::info;
use tracing_subscriber::EnvFilter;

use crowdwatch_rs::models::{self, YoloConfig, YoloDetector};
use crowdwatch_rs::{report, Args, CancelFlag, Pipeline};

const OUTPUT_VIDEO_FILE: &str = "output_video.mp4";

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let args = Args::parse();
    ensure!(
        args.video_path.is_file(),
        "video file {} was not found",
        args.video_path.display()
    );
    fs::create_dir_all(&args.output_dir).with_context(|| {
        format!("failed to create output directory {}", args.output_dir.display())
    })?;

    let model_path = models::ensure_model(args.model.clone())?;
    let detector = YoloDetector::new(YoloConfig {
        model_path,
        conf: args.conf,
        iou: args.iou,
        cuda: args.cuda,
        device_id: args.device_id,
    })?;

    // Ctrl-C asks the pipeline to stop before its next frame; the flag is
    // handed to the running pass explicitly rather than kept in a global.
    let cancel = CancelFlag::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("interrupt received, finishing the frame in flight");
                cancel.request();
            }
        });
    }

    let video_path = args.video_path.clone();
    let output_path = args.output_dir.join(OUTPUT_VIDEO_FILE);
    let threshold = args.threshold;
    let outcome = tokio::task::spawn_blocking(move || {
        let mut pipeline =
            Pipeline::new(detector, threshold)?.with_cancel_flag(cancel);
        pipeline.process_video(&video_path, &output_path)
    })
    .await
    .context("video processing task panicked")??;

    report::write_reports(&args.output_dir, &outcome.history, &outcome.alerts)?;

    info!(
        frames = outcome.history.len(),
        alerts = outcome.alerts.len(),
        "finished: annotated video at {}",
        outcome.output_path.display()
    );
    Ok(())
}
