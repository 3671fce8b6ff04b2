use chrono::Utc;
use log::{debug, info, warn};

use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult};
use crate::track::TrackStore;
use crate::types::{haversine_m, slant_m, FilteredPosition, MotionLabel, MotionMode, TrackSegment};

/// Session lifecycle. `Finalized` is terminal until an explicit reset.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Tracking,
    Finalized,
}

/// Result of appending one filtered position.
#[derive(Clone, Debug)]
pub struct SegmentOutcome {
    pub segment: TrackSegment,
    pub cumulative_m: f64,
}

/// Single writer to the track store.
///
/// Pairs each valid filtered position with the label active at that time,
/// corrects the raw geodesic delta by movement mode, and bounds the result
/// so classifier or filter errors can never produce runaway totals.
/// Corrections apply only to the segment being appended; the cumulative
/// total is never revised downward by later data.
pub struct DistanceAggregator {
    state: SessionState,
    correction: crate::config::CorrectionTable,
    confidence_threshold: f64,
    clamp_multiplier: f64,
    use_altitude: bool,
    last_position: Option<FilteredPosition>,
    clamp_count: u64,
}

impl DistanceAggregator {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            state: SessionState::Idle,
            correction: config.correction.clone(),
            confidence_threshold: config.confidence_threshold,
            clamp_multiplier: config.clamp_multiplier,
            use_altitude: config.use_altitude,
            last_position: None,
            clamp_count: 0,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Idle → Tracking. Creates the track and returns its session id.
    pub fn start(&mut self, store: &mut TrackStore) -> EngineResult<String> {
        match self.state {
            SessionState::Idle => {
                let session_id = format!("session_{}", Utc::now().timestamp_millis());
                let started_at = Utc::now().to_rfc3339();
                store.begin(session_id.clone(), started_at);
                self.state = SessionState::Tracking;
                self.last_position = None;
                info!("session {} started", session_id);
                Ok(session_id)
            }
            SessionState::Tracking => Err(EngineError::AlreadyTracking),
            SessionState::Finalized => Err(EngineError::InvalidState(
                "finalized session must be reset before starting".into(),
            )),
        }
    }

    /// Tracking → Finalized. No further mutation is accepted afterward.
    pub fn stop(&mut self, store: &mut TrackStore) -> EngineResult<()> {
        match self.state {
            SessionState::Tracking => {
                store.finalize()?;
                self.state = SessionState::Finalized;
                info!(
                    "session finalized: {:.1} m over {} segments",
                    store.cumulative_m(),
                    store.segment_count()
                );
                Ok(())
            }
            SessionState::Idle => Err(EngineError::NotTracking),
            SessionState::Finalized => Err(EngineError::SessionFinalized),
        }
    }

    /// Valid only from Idle or Finalized.
    pub fn reset(&mut self, store: &mut TrackStore) -> EngineResult<()> {
        match self.state {
            SessionState::Tracking => Err(EngineError::InvalidState(
                "cannot reset while tracking".into(),
            )),
            SessionState::Idle | SessionState::Finalized => {
                store.clear();
                self.state = SessionState::Idle;
                self.last_position = None;
                self.clamp_count = 0;
                Ok(())
            }
        }
    }

    /// Append the segment ending at `position`, labeled with `label`.
    ///
    /// Returns `Ok(None)` for the first position of a session (no segment
    /// yet). Invalid positions are ignored defensively; gating upstream is
    /// expected to have filtered them.
    pub fn append(
        &mut self,
        store: &mut TrackStore,
        position: &FilteredPosition,
        label: &MotionLabel,
    ) -> EngineResult<Option<SegmentOutcome>> {
        match self.state {
            SessionState::Tracking => {}
            SessionState::Idle => return Err(EngineError::NotTracking),
            SessionState::Finalized => return Err(EngineError::SessionFinalized),
        }
        if !position.valid {
            debug!("invalid position at ts={:.3} ignored", position.timestamp);
            return Ok(None);
        }

        let previous = match self.last_position.replace(position.clone()) {
            Some(previous) => previous,
            None => return Ok(None),
        };

        let horizontal = haversine_m(
            previous.latitude,
            previous.longitude,
            position.latitude,
            position.longitude,
        );
        let raw = if self.use_altitude {
            slant_m(horizontal, position.altitude - previous.altitude)
        } else {
            horizontal
        };

        let factor = self.correction.factor(label.mode);
        let mut corrected = (raw * factor).max(0.0);

        let bound = self.clamp_multiplier * raw;
        let clamped = corrected > bound;
        if clamped {
            warn!(
                "corrected distance {:.1} m exceeds sanity bound {:.1} m, clamping",
                corrected, bound
            );
            corrected = bound;
            self.clamp_count += 1;
        }

        let low_confidence =
            label.mode == MotionMode::Unknown || label.confidence < self.confidence_threshold;

        let segment = TrackSegment {
            start: previous,
            end: position.clone(),
            mode: label.mode,
            confidence: label.confidence,
            raw_m: raw,
            corrected_m: corrected,
            low_confidence,
            clamped,
        };

        let cumulative_m = store.append(segment.clone())?;
        debug!(
            "segment appended: raw={:.2} m corrected={:.2} m mode={:?} total={:.1} m",
            raw, corrected, label.mode, cumulative_m
        );
        Ok(Some(SegmentOutcome {
            segment,
            cumulative_m,
        }))
    }

    pub fn clamp_count(&self) -> u64 {
        self.clamp_count
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CorrectionTable, EngineConfig};
    use approx::assert_relative_eq;

    fn pos(ts: f64, lat: f64) -> FilteredPosition {
        FilteredPosition {
            timestamp: ts,
            latitude: lat,
            longitude: -122.4194,
            altitude: 0.0,
            uncertainty_m: 4.0,
            valid: true,
        }
    }

    fn label(mode: MotionMode, confidence: f64) -> MotionLabel {
        MotionLabel {
            mode,
            confidence,
            start_ts: 0.0,
            end_ts: 10.0,
        }
    }

    fn tracking() -> (DistanceAggregator, TrackStore) {
        let mut agg = DistanceAggregator::new(&EngineConfig::default());
        let mut store = TrackStore::new();
        agg.start(&mut store).unwrap();
        (agg, store)
    }

    #[test]
    fn test_walking_segment_keeps_geodesic_distance() {
        let (mut agg, mut store) = tracking();
        agg.append(&mut store, &pos(0.0, 37.7749), &label(MotionMode::Walking, 0.9))
            .unwrap();
        let out = agg
            .append(&mut store, &pos(5.0, 37.7759), &label(MotionMode::Walking, 0.9))
            .unwrap()
            .unwrap();

        assert_relative_eq!(out.segment.corrected_m, 111.2, max_relative = 0.01);
        assert!(!out.segment.low_confidence);
        assert_eq!(store.cumulative_m(), out.cumulative_m);
    }

    #[test]
    fn test_stationary_jitter_contributes_zero() {
        let (mut agg, mut store) = tracking();
        agg.append(&mut store, &pos(0.0, 37.7749), &label(MotionMode::Stationary, 0.95))
            .unwrap();
        // 11 m of GPS drift while standing still
        let out = agg
            .append(&mut store, &pos(5.0, 37.77500), &label(MotionMode::Stationary, 0.95))
            .unwrap()
            .unwrap();

        assert!(out.segment.raw_m > 5.0);
        assert_eq!(out.segment.corrected_m, 0.0);
        assert_eq!(store.cumulative_m(), 0.0);
    }

    #[test]
    fn test_low_confidence_still_counts() {
        let (mut agg, mut store) = tracking();
        agg.append(&mut store, &pos(0.0, 37.7749), &label(MotionMode::Walking, 0.3))
            .unwrap();
        let out = agg
            .append(&mut store, &pos(5.0, 37.7759), &label(MotionMode::Walking, 0.3))
            .unwrap()
            .unwrap();

        assert!(out.segment.low_confidence);
        assert!(out.cumulative_m > 100.0);
    }

    #[test]
    fn test_sanity_clamp_bounds_runaway_factor() {
        let mut config = EngineConfig::default();
        config.correction = CorrectionTable {
            walking: 10.0,
            running: 1.0,
            vehicular: 1.0,
            unknown: 1.0,
        };
        let mut agg = DistanceAggregator::new(&config);
        let mut store = TrackStore::new();
        agg.start(&mut store).unwrap();

        agg.append(&mut store, &pos(0.0, 37.7749), &label(MotionMode::Walking, 0.9))
            .unwrap();
        let out = agg
            .append(&mut store, &pos(5.0, 37.7759), &label(MotionMode::Walking, 0.9))
            .unwrap()
            .unwrap();

        assert!(out.segment.clamped);
        assert_relative_eq!(
            out.segment.corrected_m,
            3.0 * out.segment.raw_m,
            max_relative = 1e-9
        );
        assert_eq!(agg.clamp_count(), 1);
    }

    #[test]
    fn test_cumulative_is_monotone() {
        let (mut agg, mut store) = tracking();
        let modes = [
            MotionMode::Walking,
            MotionMode::Stationary,
            MotionMode::Unknown,
            MotionMode::Vehicular,
            MotionMode::Running,
        ];
        let mut last_total = 0.0;
        for (i, mode) in modes.iter().enumerate() {
            let p = pos(i as f64 * 5.0, 37.7749 + i as f64 * 0.0005);
            agg.append(&mut store, &p, &label(*mode, 0.8)).unwrap();
            let total = store.cumulative_m();
            assert!(total >= last_total);
            last_total = total;
        }
    }

    #[test]
    fn test_append_after_stop_is_rejected() {
        let (mut agg, mut store) = tracking();
        agg.append(&mut store, &pos(0.0, 37.7749), &label(MotionMode::Walking, 0.9))
            .unwrap();
        agg.append(&mut store, &pos(5.0, 37.7759), &label(MotionMode::Walking, 0.9))
            .unwrap();
        let total_before = store.cumulative_m();

        agg.stop(&mut store).unwrap();
        let err = agg
            .append(&mut store, &pos(10.0, 37.7769), &label(MotionMode::Walking, 0.9))
            .unwrap_err();
        assert_eq!(err, EngineError::SessionFinalized);
        assert_eq!(store.cumulative_m(), total_before);
    }

    #[test]
    fn test_lifecycle_transitions() {
        let mut agg = DistanceAggregator::new(&EngineConfig::default());
        let mut store = TrackStore::new();

        assert_eq!(agg.state(), SessionState::Idle);
        assert_eq!(agg.stop(&mut store).unwrap_err(), EngineError::NotTracking);

        agg.start(&mut store).unwrap();
        assert_eq!(
            agg.start(&mut store).unwrap_err(),
            EngineError::AlreadyTracking
        );
        assert!(matches!(
            agg.reset(&mut store).unwrap_err(),
            EngineError::InvalidState(_)
        ));

        agg.stop(&mut store).unwrap();
        assert_eq!(agg.state(), SessionState::Finalized);
        agg.reset(&mut store).unwrap();
        assert_eq!(agg.state(), SessionState::Idle);
        assert!(store.snapshot().is_none());
    }

    #[test]
    fn test_altitude_slant_correction() {
        let mut config = EngineConfig::default();
        config.use_altitude = true;
        let mut agg = DistanceAggregator::new(&config);
        let mut store = TrackStore::new();
        agg.start(&mut store).unwrap();

        let mut a = pos(0.0, 37.7749);
        a.altitude = 100.0;
        let mut b = pos(5.0, 37.7759);
        b.altitude = 150.0;

        agg.append(&mut store, &a, &label(MotionMode::Walking, 0.9))
            .unwrap();
        let out = agg
            .append(&mut store, &b, &label(MotionMode::Walking, 0.9))
            .unwrap()
            .unwrap();

        // sqrt(111.2^2 + 50^2) ~ 121.9
        assert_relative_eq!(out.segment.raw_m, 121.9, max_relative = 0.01);
    }
}
