//! Per-pass history and alert bookkeeping.

use serde::Serialize;

/// Person count observed on one decoded frame. `id` is dense, zero-based
/// and assigned in decode order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FrameRecord {
    pub id: u64,
    pub count: u64,
}

/// Event emitted when a frame's count reaches the alert threshold.
///
/// `id` is an independent counter starting at 0 per pass; `count` is a
/// snapshot of the triggering frame so the record stands alone; `timestamp`
/// is the wall-clock processing time in RFC 3339.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AlertRecord {
    pub id: u64,
    pub frame_id: u64,
    pub count: u64,
    pub timestamp: String,
}

/// Append-only history and alert log for a single processing pass.
///
/// Every frame at or above the threshold yields a new alert; there is no
/// deduplication, smoothing, or cool-down between consecutive alerts.
#[derive(Debug)]
pub struct Aggregator {
    alert_threshold: u64,
    history: Vec<FrameRecord>,
    alerts: Vec<AlertRecord>,
    next_alert_id: u64,
}

impl Aggregator {
    pub fn new(alert_threshold: u64) -> Self {
        Self {
            alert_threshold,
            history: Vec::new(),
            alerts: Vec::new(),
            next_alert_id: 0,
        }
    }

    /// Record the count for the next frame, returning the alert it raised,
    /// if any. Frame ids are assigned here, which keeps the history dense
    /// by construction.
    pub fn record(&mut self, count: u64) -> Option<&AlertRecord> {
        let frame_id = self.history.len() as u64;
        self.history.push(FrameRecord {
            id: frame_id,
            count,
        });

        if count >= self.alert_threshold {
            let alert = AlertRecord {
                id: self.next_alert_id,
                frame_id,
                count,
                timestamp: chrono::Utc::now().to_rfc3339(),
            };
            self.next_alert_id += 1;
            self.alerts.push(alert);
            return self.alerts.last();
        }
        None
    }

    pub fn history(&self) -> &[FrameRecord] {
        &self.history
    }

    pub fn alerts(&self) -> &[AlertRecord] {
        &self.alerts
    }

    pub fn into_parts(self) -> (Vec<FrameRecord>, Vec<AlertRecord>) {
        (self.history, self.alerts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_ids_are_dense_and_zero_based() {
        let mut agg = Aggregator::new(10);
        for count in [3, 0, 7, 7] {
            agg.record(count);
        }

        let ids: Vec<u64> = agg.history().iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![0, 1, 2, 3]);
        assert!(agg.alerts().is_empty());
    }

    #[test]
    fn count_equal_to_threshold_raises_an_alert() {
        let mut agg = Aggregator::new(2);
        assert!(agg.record(1).is_none());
        let alert = agg.record(2).expect("threshold hit");
        assert_eq!(alert.id, 0);
        assert_eq!(alert.frame_id, 1);
        assert_eq!(alert.count, 2);
    }

    #[test]
    fn every_qualifying_frame_raises_its_own_alert() {
        let mut agg = Aggregator::new(1);
        for _ in 0..3 {
            agg.record(1);
        }

        let ids: Vec<u64> = agg.alerts().iter().map(|a| a.id).collect();
        assert_eq!(ids, vec![0, 1, 2]);
    }

    #[test]
    fn alert_ids_stay_gapless_across_quiet_stretches() {
        let mut agg = Aggregator::new(5);
        for count in [6, 0, 0, 9, 0, 5] {
            agg.record(count);
        }

        let alerts = agg.alerts();
        assert_eq!(alerts.len(), 3);
        assert_eq!(
            alerts.iter().map(|a| a.id).collect::<Vec<_>>(),
            vec![0, 1, 2]
        );
        assert_eq!(
            alerts.iter().map(|a| a.frame_id).collect::<Vec<_>>(),
            vec![0, 3, 5]
        );
    }

    #[test]
    fn alerts_reference_frames_already_in_history() {
        let mut agg = Aggregator::new(1);
        for count in [2, 0, 4] {
            agg.record(count);
        }

        for alert in agg.alerts() {
            let frame = &agg.history()[alert.frame_id as usize];
            assert_eq!(frame.id, alert.frame_id);
            assert_eq!(frame.count, alert.count);
        }
    }

    #[test]
    fn alert_timestamps_are_rfc3339() {
        let mut agg = Aggregator::new(1);
        let alert = agg.record(3).expect("alert");
        assert!(chrono::DateTime::parse_from_rfc3339(&alert.timestamp).is_ok());
    }
}
