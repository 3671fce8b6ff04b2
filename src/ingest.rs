use std::cmp::Ordering;
use std::collections::BinaryHeap;

use log::debug;

use crate::error::{EngineError, EngineResult};
use crate::types::{Sample, SampleKind};

/// Samples released by one `push` call, in timestamp order.
#[derive(Debug, Default)]
pub struct IngestPush {
    pub released: Vec<Sample>,
    pub dropped_late: Vec<(SampleKind, f64)>,
}

// BinaryHeap is a max-heap; invert the comparison for oldest-first release.
struct Pending(Sample);

impl PartialEq for Pending {
    fn eq(&self, other: &Self) -> bool {
        self.0.timestamp() == other.0.timestamp()
    }
}
impl Eq for Pending {}
impl PartialOrd for Pending {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for Pending {
    fn cmp(&self, other: &Self) -> Ordering {
        other.0.timestamp().total_cmp(&self.0.timestamp())
    }
}

/// Best-effort timestamp reorderer.
///
/// Raw samples arrive in device order, which jitters around timestamp order
/// due to sensor batching. A sample is held until the newest timestamp seen
/// is at least `reorder_window_secs` ahead of it, then released. Samples
/// older than the last released timestamp can no longer be emitted in order
/// and are dropped as late.
pub struct SampleIngestor {
    reorder_window_secs: f64,
    heap: BinaryHeap<Pending>,
    newest_seen: f64,
    watermark: Option<f64>,
    late_count: u64,
    malformed_count: u64,
}

impl SampleIngestor {
    pub fn new(reorder_window_secs: f64) -> Self {
        Self {
            reorder_window_secs,
            heap: BinaryHeap::new(),
            newest_seen: f64::NEG_INFINITY,
            watermark: None,
            late_count: 0,
            malformed_count: 0,
        }
    }

    pub fn push(&mut self, sample: Sample) -> EngineResult<IngestPush> {
        if let Err(e) = validate(&sample) {
            self.malformed_count += 1;
            return Err(e);
        }

        let mut out = IngestPush::default();
        let ts = sample.timestamp();

        if let Some(watermark) = self.watermark {
            if ts < watermark {
                self.late_count += 1;
                debug!(
                    "late {:?} sample dropped: ts={:.6} watermark={:.6}",
                    sample.kind(),
                    ts,
                    watermark
                );
                out.dropped_late.push((sample.kind(), ts));
                return Ok(out);
            }
        }

        if ts > self.newest_seen {
            self.newest_seen = ts;
        }
        self.heap.push(Pending(sample));

        loop {
            let ready = self
                .heap
                .peek()
                .map_or(false, |p| self.newest_seen - p.0.timestamp() >= self.reorder_window_secs);
            if !ready {
                break;
            }
            if let Some(pending) = self.heap.pop() {
                self.watermark = Some(pending.0.timestamp());
                out.released.push(pending.0);
            }
        }

        Ok(out)
    }

    /// Drain everything still buffered, in timestamp order. Used when a
    /// session stops: buffered samples arrived before the stop signal and
    /// still belong to it.
    pub fn flush(&mut self) -> Vec<Sample> {
        let mut out = Vec::with_capacity(self.heap.len());
        while let Some(pending) = self.heap.pop() {
            self.watermark = Some(pending.0.timestamp());
            out.push(pending.0);
        }
        out
    }

    pub fn clear(&mut self) {
        self.heap.clear();
        self.newest_seen = f64::NEG_INFINITY;
        self.watermark = None;
    }

    pub fn late_count(&self) -> u64 {
        self.late_count
    }

    pub fn malformed_count(&self) -> u64 {
        self.malformed_count
    }
}

fn validate(sample: &Sample) -> EngineResult<()> {
    if !sample.timestamp().is_finite() {
        return Err(EngineError::MalformedSample("non-finite timestamp".into()));
    }
    match sample {
        Sample::Position(fix) => {
            if !fix.latitude.is_finite() || !fix.longitude.is_finite() || !fix.altitude.is_finite()
            {
                return Err(EngineError::MalformedSample(
                    "non-finite coordinates".into(),
                ));
            }
            if fix.latitude.abs() > 90.0 || fix.longitude.abs() > 180.0 {
                return Err(EngineError::MalformedSample(format!(
                    "coordinates out of range: ({}, {})",
                    fix.latitude, fix.longitude
                )));
            }
            if !fix.accuracy.is_finite() || fix.accuracy <= 0.0 {
                return Err(EngineError::MalformedSample(format!(
                    "accuracy radius must be positive, got {}",
                    fix.accuracy
                )));
            }
        }
        Sample::Accel(v) | Sample::Gyro(v) => {
            if !v.x.is_finite() || !v.y.is_finite() || !v.z.is_finite() {
                return Err(EngineError::MalformedSample("non-finite axis value".into()));
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ImuVector, PositionFix};

    fn accel(ts: f64) -> Sample {
        Sample::Accel(ImuVector::new(ts, 0.0, 0.0, 9.81))
    }

    fn fix(ts: f64) -> Sample {
        Sample::Position(PositionFix {
            timestamp: ts,
            latitude: 37.0,
            longitude: -122.0,
            altitude: 10.0,
            accuracy: 5.0,
        })
    }

    #[test]
    fn test_out_of_order_within_window_is_sorted() {
        let mut ing = SampleIngestor::new(1.0);
        assert!(ing.push(accel(10.0)).unwrap().released.is_empty());
        assert!(ing.push(accel(10.3)).unwrap().released.is_empty());
        assert!(ing.push(accel(10.1)).unwrap().released.is_empty());

        // Advancing past the window releases the three oldest, sorted.
        let out = ing.push(accel(11.5)).unwrap();
        let ts: Vec<f64> = out.released.iter().map(|s| s.timestamp()).collect();
        assert_eq!(ts, vec![10.0, 10.1, 10.3]);
    }

    #[test]
    fn test_sample_older_than_watermark_is_dropped_late() {
        let mut ing = SampleIngestor::new(1.0);
        ing.push(accel(10.0)).unwrap();
        ing.push(accel(12.0)).unwrap(); // releases 10.0, watermark = 10.0

        let out = ing.push(accel(9.5)).unwrap();
        assert!(out.released.is_empty());
        assert_eq!(out.dropped_late.len(), 1);
        assert_eq!(ing.late_count(), 1);
    }

    #[test]
    fn test_malformed_samples_are_rejected() {
        let mut ing = SampleIngestor::new(1.0);

        let bad_fix = Sample::Position(PositionFix {
            timestamp: 1.0,
            latitude: f64::NAN,
            longitude: 0.0,
            altitude: 0.0,
            accuracy: 5.0,
        });
        assert!(matches!(
            ing.push(bad_fix),
            Err(EngineError::MalformedSample(_))
        ));

        let zero_accuracy = Sample::Position(PositionFix {
            timestamp: 1.0,
            latitude: 37.0,
            longitude: -122.0,
            altitude: 0.0,
            accuracy: 0.0,
        });
        assert!(matches!(
            ing.push(zero_accuracy),
            Err(EngineError::MalformedSample(_))
        ));
        assert_eq!(ing.malformed_count(), 2);
    }

    #[test]
    fn test_flush_drains_in_order() {
        let mut ing = SampleIngestor::new(5.0);
        ing.push(fix(3.0)).unwrap();
        ing.push(fix(1.0)).unwrap();
        ing.push(fix(2.0)).unwrap();

        let ts: Vec<f64> = ing.flush().iter().map(|s| s.timestamp()).collect();
        assert_eq!(ts, vec![1.0, 2.0, 3.0]);
    }
}
