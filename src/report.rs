//! JSON report output.
//!
//! Writes the per-frame history and the alert log as pretty-printed JSON
//! arrays, ordered by id, for downstream consumers (viewers, dashboards).

use anyhow::{Context, Result};
use serde::Serialize;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::info;

use crate::pipeline::{AlertRecord, FrameRecord};

pub const HISTORY_FILE: &str = "history.json";
pub const ALERTS_FILE: &str = "alerts.json";

/// Write `history.json` and `alerts.json` into `dir`, creating it first.
pub fn write_reports(
    dir: &Path,
    history: &[FrameRecord],
    alerts: &[AlertRecord],
) -> Result<(PathBuf, PathBuf)> {
    fs::create_dir_all(dir)
        .with_context(|| format!("failed to create output directory {}", dir.display()))?;

    let history_path = dir.join(HISTORY_FILE);
    write_json(&history_path, &history)?;
    let alerts_path = dir.join(ALERTS_FILE);
    write_json(&alerts_path, &alerts)?;

    info!(
        history = %history_path.display(),
        alerts = %alerts_path.display(),
        "reports written"
    );
    Ok((history_path, alerts_path))
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let file = File::create(path)
        .with_context(|| format!("failed to create {}", path.display()))?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer_pretty(&mut writer, value)
        .with_context(|| format!("failed to serialize {}", path.display()))?;
    writer.flush()?;
    Ok(())
}
