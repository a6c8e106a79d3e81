//! Frame processing pipeline.
//!
//! Drives one sequential pass over a video: decode a frame, run the
//! detector, fold the count into the history/alert aggregator, draw the
//! overlays, encode the frame, repeat until the stream ends. Frames are
//! processed strictly one at a time and written in the order they were
//! read.
pub mod aggregator;

pub use aggregator::{Aggregator, AlertRecord, FrameRecord};

use anyhow::{ensure, Result};
use opencv::core::{Mat, Point, Rect, Scalar};
use opencv::imgproc;
use opencv::prelude::*;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::detection::{BBox, Detections, Detector};
use crate::input::{FrameSink, FrameSource, VideoFileSink, VideoFileSource};

/// Cooperative cancellation handle, passed explicitly to the pipeline.
///
/// Requesting cancellation stops the pass before the next frame is decoded;
/// the frame in flight is always finished and resources are released as on
/// any other exit path.
#[derive(Clone, Debug, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_requested(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Everything a finished pass produces.
#[derive(Debug)]
pub struct PipelineOutcome {
    pub output_path: PathBuf,
    pub history: Vec<FrameRecord>,
    pub alerts: Vec<AlertRecord>,
}

/// Sequential decode → detect → annotate → encode loop.
pub struct Pipeline<D: Detector> {
    detector: D,
    alert_threshold: u64,
    cancel: CancelFlag,
}

impl<D: Detector> Pipeline<D> {
    pub fn new(detector: D, alert_threshold: u64) -> Result<Self> {
        ensure!(alert_threshold >= 1, "alert threshold must be positive");
        Ok(Self {
            detector,
            alert_threshold,
            cancel: CancelFlag::new(),
        })
    }

    pub fn with_cancel_flag(mut self, cancel: CancelFlag) -> Self {
        self.cancel = cancel;
        self
    }

    /// Process `video_path` end to end, writing the annotated stream to
    /// `output_path` with the input's own geometry.
    ///
    /// Fails before any output exists when the input cannot be opened.
    pub fn process_video(
        &mut self,
        video_path: &Path,
        output_path: &Path,
    ) -> Result<PipelineOutcome> {
        let source = VideoFileSource::open(video_path)?;
        let sink = VideoFileSink::create(output_path, &source.geometry())?;
        let (history, alerts) = self.run(source, sink)?;

        Ok(PipelineOutcome {
            output_path: output_path.to_path_buf(),
            history,
            alerts,
        })
    }

    /// Drive the loop over an already-opened source/sink pair.
    ///
    /// Both handles are owned for the duration of the call and released on
    /// every exit path: normal completion, early stream end, cancellation,
    /// or a mid-pass error. Each release is guarded independently so one
    /// failing release never blocks the other, and a release error never
    /// masks the error that ended the loop.
    pub fn run<S: FrameSource, K: FrameSink>(
        &mut self,
        mut source: S,
        mut sink: K,
    ) -> Result<(Vec<FrameRecord>, Vec<AlertRecord>)> {
        let mut aggregator = Aggregator::new(self.alert_threshold);
        let outcome = self.drive(&mut source, &mut sink, &mut aggregator);

        let source_released = source.release();
        if let Err(err) = &source_released {
            warn!("decode handle release failed: {err:#}");
        }
        let sink_released = sink.release();
        if let Err(err) = &sink_released {
            warn!("encode handle release failed: {err:#}");
        }

        outcome?;
        source_released?;
        sink_released?;

        info!(
            frames = aggregator.history().len(),
            alerts = aggregator.alerts().len(),
            "video pass complete"
        );
        Ok(aggregator.into_parts())
    }

    fn drive<S: FrameSource, K: FrameSink>(
        &mut self,
        source: &mut S,
        sink: &mut K,
        aggregator: &mut Aggregator,
    ) -> Result<()> {
        let total = source.geometry().frame_count;
        let mut frame_id: u64 = 0;

        loop {
            if self.cancel.is_requested() {
                info!(frame_id, "cancellation requested, stopping before next frame");
                break;
            }
            let Some(mut frame) = source.read_frame()? else {
                break;
            };

            let detections = match self.detector.detect(&frame) {
                Ok(detections) => detections,
                Err(err) => {
                    warn!(
                        frame_id,
                        detector = self.detector.name(),
                        "detection failed, treating frame as empty: {err:#}"
                    );
                    Detections::default()
                }
            };
            let count = detections.count() as u64;

            if let Some(alert) = aggregator.record(count) {
                info!(
                    frame_id,
                    count,
                    alert_id = alert.id,
                    "person count reached alert threshold"
                );
            }

            annotate(&mut frame, &detections.boxes, count)?;
            sink.write_frame(&frame)?;

            frame_id += 1;
            debug!(frame_id, total, count, "frame processed");
        }
        Ok(())
    }
}

/// Draw the accepted boxes and the running count onto the frame.
fn annotate(frame: &mut Mat, boxes: &[BBox], count: u64) -> Result<()> {
    let green = Scalar::new(0.0, 255.0, 0.0, 0.0);
    let red = Scalar::new(0.0, 0.0, 255.0, 0.0);

    let (cols, rows) = (frame.cols(), frame.rows());
    for bbox in boxes {
        // Degenerate or out-of-frame boxes are counted but not drawn.
        let Some(rect) = clamped_rect(bbox, cols, rows) else {
            continue;
        };
        imgproc::rectangle(frame, rect, green, 2, imgproc::LINE_8, 0)?;
    }

    imgproc::put_text(
        frame,
        &format!("People: {count}"),
        Point::new(10, 30),
        imgproc::FONT_HERSHEY_SIMPLEX,
        1.0,
        red,
        2,
        imgproc::LINE_8,
        false,
    )?;
    Ok(())
}

fn clamped_rect(bbox: &BBox, cols: i32, rows: i32) -> Option<Rect> {
    if !bbox.is_valid() {
        return None;
    }
    let x1 = bbox.x1.clamp(0.0, cols as f32) as i32;
    let y1 = bbox.y1.clamp(0.0, rows as f32) as i32;
    let x2 = bbox.x2.clamp(0.0, cols as f32) as i32;
    let y2 = bbox.y2.clamp(0.0, rows as f32) as i32;
    if x2 <= x1 || y2 <= y1 {
        return None;
    }
    Some(Rect::new(x1, y1, x2 - x1, y2 - y1))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::input::VideoGeometry;
    use anyhow::bail;
    use opencv::core::CV_8UC3;
    use std::sync::atomic::AtomicUsize;

    #[derive(Clone, Copy)]
    enum Step {
        People(u64),
        Fail,
    }

    /// Detector double returning a scripted count per frame; optionally
    /// requests cancellation after a given number of calls.
    struct ScriptedDetector {
        steps: Vec<Step>,
        calls: usize,
        cancel_after: Option<(CancelFlag, usize)>,
    }

    impl ScriptedDetector {
        fn new(steps: Vec<Step>) -> Self {
            Self {
                steps,
                calls: 0,
                cancel_after: None,
            }
        }

        fn counts(counts: &[u64]) -> Self {
            Self::new(counts.iter().map(|&c| Step::People(c)).collect())
        }
    }

    impl Detector for ScriptedDetector {
        fn detect(&mut self, _frame: &Mat) -> Result<Detections> {
            let step = self
                .steps
                .get(self.calls)
                .copied()
                .unwrap_or(Step::People(0));
            self.calls += 1;
            if let Some((flag, after)) = &self.cancel_after {
                if self.calls >= *after {
                    flag.request();
                }
            }
            match step {
                Step::Fail => bail!("synthetic detector failure"),
                Step::People(n) => {
                    let boxes = (0..n)
                        .map(|i| {
                            let x = 2.0 + 12.0 * i as f32;
                            BBox::new(x, 4.0, x + 8.0, 28.0)
                        })
                        .collect();
                    Ok(Detections {
                        boxes,
                        scores: vec![0.9; n as usize],
                    })
                }
            }
        }
    }

    struct MemorySource {
        frames_left: usize,
        released: Arc<AtomicBool>,
    }

    impl MemorySource {
        fn new(frames: usize) -> (Self, Arc<AtomicBool>) {
            let released = Arc::new(AtomicBool::new(false));
            (
                Self {
                    frames_left: frames,
                    released: released.clone(),
                },
                released,
            )
        }
    }

    impl FrameSource for MemorySource {
        fn geometry(&self) -> VideoGeometry {
            VideoGeometry {
                width: 64,
                height: 48,
                fps: 30.0,
                frame_count: self.frames_left as i64,
            }
        }

        fn read_frame(&mut self) -> Result<Option<Mat>> {
            if self.frames_left == 0 {
                return Ok(None);
            }
            self.frames_left -= 1;
            let frame =
                Mat::new_rows_cols_with_default(48, 64, CV_8UC3, Scalar::all(0.0))?;
            Ok(Some(frame))
        }

        fn release(&mut self) -> Result<()> {
            self.released.store(true, Ordering::SeqCst);
            Ok(())
        }
    }

    struct MemorySink {
        written: Arc<AtomicUsize>,
        released: Arc<AtomicBool>,
        fail_on_write: Option<usize>,
    }

    impl MemorySink {
        fn new() -> (Self, Arc<AtomicUsize>, Arc<AtomicBool>) {
            let written = Arc::new(AtomicUsize::new(0));
            let released = Arc::new(AtomicBool::new(false));
            (
                Self {
                    written: written.clone(),
                    released: released.clone(),
                    fail_on_write: None,
                },
                written,
                released,
            )
        }
    }

    impl FrameSink for MemorySink {
        fn write_frame(&mut self, _frame: &Mat) -> Result<()> {
            let index = self.written.load(Ordering::SeqCst);
            if self.fail_on_write == Some(index) {
                bail!("synthetic encode failure");
            }
            self.written.store(index + 1, Ordering::SeqCst);
            Ok(())
        }

        fn release(&mut self) -> Result<()> {
            self.released.store(true, Ordering::SeqCst);
            Ok(())
        }
    }

    fn pipeline(detector: ScriptedDetector, threshold: u64) -> Pipeline<ScriptedDetector> {
        Pipeline::new(detector, threshold).unwrap()
    }

    #[test]
    fn history_covers_every_decoded_frame() {
        let (source, _) = MemorySource::new(5);
        let (sink, written, _) = MemorySink::new();
        let mut pipeline = pipeline(ScriptedDetector::counts(&[2, 0, 1, 0, 3]), 10);

        let (history, alerts) = pipeline.run(source, sink).unwrap();

        assert_eq!(history.len(), 5);
        for (i, record) in history.iter().enumerate() {
            assert_eq!(record.id, i as u64);
        }
        assert_eq!(written.load(Ordering::SeqCst), 5);
        assert!(alerts.is_empty());
    }

    #[test]
    fn end_to_end_three_frames_with_threshold_two() {
        let (source, _) = MemorySource::new(3);
        let (sink, _, _) = MemorySink::new();
        let mut pipeline = pipeline(ScriptedDetector::counts(&[1, 2, 3]), 2);

        let (history, alerts) = pipeline.run(source, sink).unwrap();

        let counts: Vec<(u64, u64)> = history.iter().map(|r| (r.id, r.count)).collect();
        assert_eq!(counts, vec![(0, 1), (1, 2), (2, 3)]);

        assert_eq!(alerts.len(), 2);
        assert_eq!((alerts[0].id, alerts[0].frame_id, alerts[0].count), (0, 1, 2));
        assert_eq!((alerts[1].id, alerts[1].frame_id, alerts[1].count), (1, 2, 3));
        for alert in &alerts {
            assert!(chrono::DateTime::parse_from_rfc3339(&alert.timestamp).is_ok());
        }
    }

    #[test]
    fn no_alert_references_a_below_threshold_frame() {
        let (source, _) = MemorySource::new(4);
        let (sink, _, _) = MemorySink::new();
        let mut pipeline = pipeline(ScriptedDetector::counts(&[0, 2, 1, 5]), 2);

        let (history, alerts) = pipeline.run(source, sink).unwrap();

        for record in &history {
            let referenced = alerts.iter().any(|a| a.frame_id == record.id);
            assert_eq!(referenced, record.count >= 2, "frame {}", record.id);
        }
    }

    #[test]
    fn consecutive_qualifying_frames_are_not_debounced() {
        let (source, _) = MemorySource::new(3);
        let (sink, _, _) = MemorySink::new();
        let mut pipeline = pipeline(ScriptedDetector::counts(&[1, 1, 1]), 1);

        let (_, alerts) = pipeline.run(source, sink).unwrap();

        assert_eq!(alerts.len(), 3);
        assert_eq!(alerts.iter().map(|a| a.id).collect::<Vec<_>>(), vec![0, 1, 2]);
    }

    #[test]
    fn detector_failure_counts_as_zero_and_the_pass_continues() {
        let (source, _) = MemorySource::new(3);
        let (sink, written, _) = MemorySink::new();
        let detector = ScriptedDetector::new(vec![
            Step::People(1),
            Step::Fail,
            Step::People(2),
        ]);
        let mut pipeline = pipeline(detector, 10);

        let (history, _) = pipeline.run(source, sink).unwrap();

        let counts: Vec<u64> = history.iter().map(|r| r.count).collect();
        assert_eq!(counts, vec![1, 0, 2]);
        assert_eq!(written.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn handles_are_released_when_the_loop_fails_mid_pass() {
        let (source, source_released) = MemorySource::new(3);
        let (mut sink, _, sink_released) = MemorySink::new();
        sink.fail_on_write = Some(1);
        let mut pipeline = pipeline(ScriptedDetector::counts(&[1, 1, 1]), 10);

        let result = pipeline.run(source, sink);

        assert!(result.is_err());
        assert!(source_released.load(Ordering::SeqCst));
        assert!(sink_released.load(Ordering::SeqCst));
    }

    #[test]
    fn handles_are_released_after_a_clean_pass() {
        let (source, source_released) = MemorySource::new(2);
        let (sink, _, sink_released) = MemorySink::new();
        let mut pipeline = pipeline(ScriptedDetector::counts(&[0, 0]), 1);

        pipeline.run(source, sink).unwrap();

        assert!(source_released.load(Ordering::SeqCst));
        assert!(sink_released.load(Ordering::SeqCst));
    }

    #[test]
    fn cancellation_stops_before_the_next_frame() {
        let cancel = CancelFlag::new();
        let (source, source_released) = MemorySource::new(5);
        let (sink, written, _) = MemorySink::new();
        let mut detector = ScriptedDetector::counts(&[1, 1, 1, 1, 1]);
        detector.cancel_after = Some((cancel.clone(), 2));
        let mut pipeline = pipeline(detector, 10).with_cancel_flag(cancel);

        let (history, _) = pipeline.run(source, sink).unwrap();

        // The second frame was in flight when cancellation was requested;
        // it completes, nothing after it starts.
        assert_eq!(history.len(), 2);
        assert_eq!(written.load(Ordering::SeqCst), 2);
        assert!(source_released.load(Ordering::SeqCst));
    }

    #[test]
    fn zero_threshold_is_rejected() {
        assert!(Pipeline::new(ScriptedDetector::counts(&[]), 0).is_err());
    }

    #[test]
    fn annotate_tolerates_degenerate_and_out_of_frame_boxes() {
        let mut frame =
            Mat::new_rows_cols_with_default(48, 64, CV_8UC3, Scalar::all(0.0)).unwrap();
        let boxes = vec![
            BBox::new(10.0, 10.0, 30.0, 40.0),
            BBox::new(20.0, 20.0, 20.0, 45.0),   // zero width
            BBox::new(50.0, 30.0, 40.0, 20.0),   // inverted corners
            BBox::new(-15.0, -15.0, 200.0, 200.0), // clamped to the frame
            BBox::new(f32::NAN, 0.0, 5.0, 5.0),
        ];

        annotate(&mut frame, &boxes, boxes.len() as u64).unwrap();
    }
}
