pub mod features;
pub mod linear;

pub use linear::LinearClassifier;

use serde::{Deserialize, Serialize};

use crate::error::ClassifierError;
use crate::types::{ImuVector, MotionLabel, MotionMode};

/// One classification unit: a fixed-duration slice of inertial samples.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MotionWindow {
    pub start_ts: f64,
    pub end_ts: f64,
    pub accel: Vec<ImuVector>,
    pub gyro: Vec<ImuVector>,
}

/// Capability interface for the movement-mode model, so the concrete
/// inference runtime is swappable without touching the aggregator.
pub trait MotionClassifier: Send {
    fn classify(&self, window: &MotionWindow) -> Result<MotionLabel, ClassifierError>;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ImuKind {
    Accel,
    Gyro,
}

/// Outcome of feeding one inertial sample into the window builder.
#[derive(Clone, Debug, PartialEq)]
pub enum WindowPush {
    Buffered,
    /// The window closed but held too few samples to classify.
    Skipped { samples: usize },
    Completed(MotionWindow),
}

/// Assembles overlapping motion windows from the inertial stream.
///
/// Window boundaries advance on sample timestamps. Consecutive windows share
/// `overlap` of their duration; more overlap lowers label latency at the cost
/// of more inference calls.
pub struct WindowBuilder {
    window_secs: f64,
    overlap: f64,
    min_samples: usize,
    accel: Vec<ImuVector>,
    gyro: Vec<ImuVector>,
    window_start: Option<f64>,
    skipped_count: u64,
}

impl WindowBuilder {
    pub fn new(window_secs: f64, overlap: f64, min_samples: usize) -> Self {
        Self {
            window_secs,
            overlap: overlap.clamp(0.0, 0.95),
            min_samples,
            accel: Vec::new(),
            gyro: Vec::new(),
            window_start: None,
            skipped_count: 0,
        }
    }

    pub fn push(&mut self, kind: ImuKind, sample: ImuVector) -> WindowPush {
        let ts = sample.timestamp;
        let start = *self.window_start.get_or_insert(ts);

        // A long silence makes every intermediate window empty; restart the
        // timeline at the new sample instead of replaying the gap.
        if ts - start >= 2.0 * self.window_secs {
            let dropped = self.accel.len() + self.gyro.len();
            self.accel.clear();
            self.gyro.clear();
            self.window_start = Some(ts);
            self.buffer(kind, sample);
            self.skipped_count += 1;
            return WindowPush::Skipped { samples: dropped };
        }

        let completed = ts - start >= self.window_secs;
        if !completed {
            self.buffer(kind, sample);
            return WindowPush::Buffered;
        }

        let end = start + self.window_secs;
        let window = MotionWindow {
            start_ts: start,
            end_ts: end,
            accel: self.accel.clone(),
            gyro: self.gyro.clone(),
        };

        let next_start = start + self.window_secs * (1.0 - self.overlap);
        self.accel.retain(|s| s.timestamp >= next_start);
        self.gyro.retain(|s| s.timestamp >= next_start);
        self.window_start = Some(next_start);
        self.buffer(kind, sample);

        if window.accel.len() < self.min_samples {
            self.skipped_count += 1;
            return WindowPush::Skipped {
                samples: window.accel.len(),
            };
        }
        WindowPush::Completed(window)
    }

    fn buffer(&mut self, kind: ImuKind, sample: ImuVector) {
        match kind {
            ImuKind::Accel => self.accel.push(sample),
            ImuKind::Gyro => self.gyro.push(sample),
        }
    }

    pub fn skipped_count(&self) -> u64 {
        self.skipped_count
    }

    pub fn reset(&mut self) {
        self.accel.clear();
        self.gyro.clear();
        self.window_start = None;
    }
}

/// Holds the most recent label and ages it out.
///
/// Skipped or missing windows keep the previous label alive for up to the
/// hold duration; after that the mode reverts to `Unknown` rather than
/// letting a stale label correct distances indefinitely.
pub struct ModeTracker {
    max_hold_secs: f64,
    current: Option<MotionLabel>,
}

impl ModeTracker {
    pub fn new(max_hold_secs: f64) -> Self {
        Self {
            max_hold_secs,
            current: None,
        }
    }

    pub fn apply(&mut self, label: MotionLabel) {
        self.current = Some(label);
    }

    /// Label in force at `ts`.
    pub fn label_at(&self, ts: f64) -> MotionLabel {
        match &self.current {
            Some(label) if ts - label.end_ts <= self.max_hold_secs => label.clone(),
            Some(label) => MotionLabel::unknown(label.end_ts, ts),
            None => MotionLabel::unknown(ts, ts),
        }
    }

    pub fn current_mode(&self) -> MotionMode {
        self.current
            .as_ref()
            .map(|l| l.mode)
            .unwrap_or(MotionMode::Unknown)
    }

    pub fn reset(&mut self) {
        self.current = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn accel_at(ts: f64) -> ImuVector {
        ImuVector::new(ts, 0.0, 0.0, 9.81)
    }

    #[test]
    fn test_window_completes_after_duration() {
        let mut builder = WindowBuilder::new(2.5, 0.5, 25);
        let mut completed = None;
        for i in 0..200 {
            let ts = i as f64 * 0.02;
            if let WindowPush::Completed(w) = builder.push(ImuKind::Accel, accel_at(ts)) {
                completed = Some(w);
                break;
            }
        }
        let w = completed.expect("window should complete within 4 s of samples");
        assert_eq!(w.start_ts, 0.0);
        assert_eq!(w.end_ts, 2.5);
        assert!(w.accel.len() >= 100);
    }

    #[test]
    fn test_overlap_retains_tail_samples() {
        let mut builder = WindowBuilder::new(2.0, 0.5, 10);
        let mut windows = Vec::new();
        for i in 0..500 {
            let ts = i as f64 * 0.02;
            if let WindowPush::Completed(w) = builder.push(ImuKind::Accel, accel_at(ts)) {
                windows.push(w);
            }
        }
        assert!(windows.len() >= 3);
        // with 50% overlap consecutive windows start one half-duration apart
        let step = windows[1].start_ts - windows[0].start_ts;
        assert!((step - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_sparse_window_is_skipped() {
        let mut builder = WindowBuilder::new(2.0, 0.0, 25);
        // 5 samples spread over the window, then one past the boundary
        for i in 0..5 {
            builder.push(ImuKind::Accel, accel_at(i as f64 * 0.4));
        }
        let out = builder.push(ImuKind::Accel, accel_at(2.1));
        assert_eq!(out, WindowPush::Skipped { samples: 5 });
        assert_eq!(builder.skipped_count(), 1);
    }

    #[test]
    fn test_long_gap_restarts_timeline() {
        let mut builder = WindowBuilder::new(2.0, 0.0, 25);
        builder.push(ImuKind::Accel, accel_at(0.0));
        let out = builder.push(ImuKind::Accel, accel_at(60.0));
        assert!(matches!(out, WindowPush::Skipped { .. }));
    }

    #[test]
    fn test_label_hold_then_unknown() {
        let mut tracker = ModeTracker::new(5.0);
        tracker.apply(MotionLabel {
            mode: MotionMode::Walking,
            confidence: 0.9,
            start_ts: 0.0,
            end_ts: 2.5,
        });

        assert_eq!(tracker.label_at(4.0).mode, MotionMode::Walking);
        assert_eq!(tracker.label_at(7.4).mode, MotionMode::Walking);
        // past the hold horizon the label has gone stale
        let stale = tracker.label_at(8.0);
        assert_eq!(stale.mode, MotionMode::Unknown);
        assert_eq!(stale.confidence, 0.0);
    }

    #[test]
    fn test_no_label_yet_is_unknown() {
        let tracker = ModeTracker::new(5.0);
        assert_eq!(tracker.label_at(1.0).mode, MotionMode::Unknown);
    }
}
