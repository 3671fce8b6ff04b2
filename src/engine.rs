use log::{debug, warn};

use crate::aggregator::{DistanceAggregator, SessionState};
use crate::classifier::{
    ImuKind, LinearClassifier, ModeTracker, MotionClassifier, MotionWindow, WindowBuilder,
    WindowPush,
};
use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult};
use crate::filters::{GateReason, PositionKf};
use crate::ingest::SampleIngestor;
use crate::track::{Track, TrackStats, TrackStore};
use crate::types::{MotionLabel, MotionMode, Sample, SampleKind, Waypoint};

/// Notifications produced while processing samples. All of these are
/// recoverable conditions; structural misuse surfaces as `EngineError`.
#[derive(Clone, Debug)]
pub enum EngineEvent {
    SessionStarted {
        session_id: String,
    },
    SessionFinalized {
        cumulative_m: f64,
        segments: usize,
    },
    SegmentAppended {
        timestamp: f64,
        raw_m: f64,
        corrected_m: f64,
        cumulative_m: f64,
        mode: MotionMode,
        confidence: f64,
        low_confidence: bool,
        clamped: bool,
    },
    SanityClampApplied {
        raw_m: f64,
        bound_m: f64,
    },
    DegradedFix {
        timestamp: f64,
        reason: GateReason,
        accuracy: f64,
    },
    SampleLate {
        kind: SampleKind,
        timestamp: f64,
    },
    WindowSkipped {
        samples: usize,
    },
    ModeChanged {
        from: MotionMode,
        to: MotionMode,
        confidence: f64,
    },
    ClassifierFault {
        detail: String,
    },
}

enum ClassifierMode {
    /// Windows are classified synchronously as they complete.
    Inline(Box<dyn MotionClassifier>),
    /// Completed windows are parked for an external host (worker thread) to
    /// classify; labels come back through `set_motion_label`.
    Deferred,
}

/// The engine: a purely synchronous, callable state machine.
///
/// It owns one instance of every pipeline component and the track store, and
/// is driven by whatever concurrency model the host chooses. No call here
/// blocks on I/O; filter updates and inference are bounded CPU-only work.
pub struct Engine {
    config: EngineConfig,
    ingestor: SampleIngestor,
    filter: PositionKf,
    windows: WindowBuilder,
    mode: ModeTracker,
    classifier: ClassifierMode,
    aggregator: DistanceAggregator,
    store: TrackStore,
    pending_windows: Vec<MotionWindow>,
}

impl Engine {
    /// Engine with the built-in pretrained classifier.
    pub fn new(config: EngineConfig) -> Self {
        let classifier = Box::new(LinearClassifier::pretrained(config.confidence_threshold));
        Self::with_classifier(config, classifier)
    }

    /// Engine with a caller-supplied inference runtime.
    pub fn with_classifier(config: EngineConfig, classifier: Box<dyn MotionClassifier>) -> Self {
        Self::build(config, ClassifierMode::Inline(classifier))
    }

    /// Engine that parks completed windows for external classification.
    /// The host drains them with `take_pending_windows` and feeds labels
    /// back through `set_motion_label`.
    pub fn with_deferred_classification(config: EngineConfig) -> Self {
        Self::build(config, ClassifierMode::Deferred)
    }

    fn build(config: EngineConfig, classifier: ClassifierMode) -> Self {
        Self {
            ingestor: SampleIngestor::new(config.reorder_window_secs),
            filter: PositionKf::new(&config),
            windows: WindowBuilder::new(
                config.window_secs,
                config.window_overlap,
                config.min_window_samples,
            ),
            mode: ModeTracker::new(config.max_label_hold_secs),
            aggregator: DistanceAggregator::new(&config),
            store: TrackStore::new(),
            pending_windows: Vec::new(),
            classifier,
            config,
        }
    }

    // ── Lifecycle ────────────────────────────────────────────────────────

    pub fn start_session(&mut self) -> EngineResult<Vec<EngineEvent>> {
        let session_id = self.aggregator.start(&mut self.store)?;
        Ok(vec![EngineEvent::SessionStarted { session_id }])
    }

    /// Completes any in-flight aggregation (buffered samples arrived before
    /// the stop signal), then finalizes. Samples pushed afterwards are
    /// rejected with `SessionFinalized`.
    pub fn stop_session(&mut self) -> EngineResult<Vec<EngineEvent>> {
        match self.aggregator.state() {
            SessionState::Tracking => {}
            SessionState::Idle => return Err(EngineError::NotTracking),
            SessionState::Finalized => return Err(EngineError::SessionFinalized),
        }

        let mut events = Vec::new();
        for sample in self.ingestor.flush() {
            self.process(sample, &mut events)?;
        }
        self.aggregator.stop(&mut self.store)?;
        self.pending_windows.clear();
        events.push(EngineEvent::SessionFinalized {
            cumulative_m: self.store.cumulative_m(),
            segments: self.store.segment_count(),
        });
        Ok(events)
    }

    pub fn reset_session(&mut self) -> EngineResult<()> {
        self.aggregator.reset(&mut self.store)?;
        self.ingestor.clear();
        self.filter.reset();
        self.windows.reset();
        self.mode.reset();
        self.pending_windows.clear();
        Ok(())
    }

    pub fn session_state(&self) -> SessionState {
        self.aggregator.state()
    }

    // ── Sample input ─────────────────────────────────────────────────────

    /// Feed one raw sample. Samples are ignored while idle, accepted while
    /// tracking, and rejected once the session is finalized.
    pub fn push_sample(&mut self, sample: Sample) -> EngineResult<Vec<EngineEvent>> {
        match self.aggregator.state() {
            SessionState::Tracking => {}
            SessionState::Idle => {
                debug!("sample before session start ignored");
                return Ok(Vec::new());
            }
            SessionState::Finalized => return Err(EngineError::SessionFinalized),
        }

        let push = self.ingestor.push(sample)?;
        let mut events = Vec::new();
        for (kind, timestamp) in push.dropped_late {
            events.push(EngineEvent::SampleLate { kind, timestamp });
        }
        for released in push.released {
            self.process(released, &mut events)?;
        }
        Ok(events)
    }

    pub fn push_samples<I: IntoIterator<Item = Sample>>(
        &mut self,
        samples: I,
    ) -> EngineResult<Vec<EngineEvent>> {
        let mut events = Vec::new();
        for sample in samples {
            events.extend(self.push_sample(sample)?);
        }
        Ok(events)
    }

    fn process(&mut self, sample: Sample, events: &mut Vec<EngineEvent>) -> EngineResult<()> {
        match sample {
            Sample::Position(fix) => {
                let outcome = self.filter.process(&fix);
                if let Some(reason) = outcome.rejection {
                    warn!(
                        "fix at ts={:.3} rejected: {:?} (accuracy {:.1} m)",
                        fix.timestamp, reason, fix.accuracy
                    );
                    events.push(EngineEvent::DegradedFix {
                        timestamp: fix.timestamp,
                        reason,
                        accuracy: fix.accuracy,
                    });
                    return Ok(());
                }

                let label = self.mode.label_at(outcome.position.timestamp);
                if let Some(out) =
                    self.aggregator
                        .append(&mut self.store, &outcome.position, &label)?
                {
                    if out.segment.clamped {
                        events.push(EngineEvent::SanityClampApplied {
                            raw_m: out.segment.raw_m,
                            bound_m: out.segment.corrected_m,
                        });
                    }
                    events.push(EngineEvent::SegmentAppended {
                        timestamp: out.segment.end.timestamp,
                        raw_m: out.segment.raw_m,
                        corrected_m: out.segment.corrected_m,
                        cumulative_m: out.cumulative_m,
                        mode: out.segment.mode,
                        confidence: out.segment.confidence,
                        low_confidence: out.segment.low_confidence,
                        clamped: out.segment.clamped,
                    });
                }
            }
            Sample::Accel(v) => self.push_imu(ImuKind::Accel, v, events),
            Sample::Gyro(v) => self.push_imu(ImuKind::Gyro, v, events),
        }
        Ok(())
    }

    fn push_imu(&mut self, kind: ImuKind, v: crate::types::ImuVector, events: &mut Vec<EngineEvent>) {
        match self.windows.push(kind, v) {
            WindowPush::Buffered => {}
            WindowPush::Skipped { samples } => {
                events.push(EngineEvent::WindowSkipped { samples });
            }
            WindowPush::Completed(window) => {
                let label = match &self.classifier {
                    ClassifierMode::Inline(classifier) => match classifier.classify(&window) {
                        Ok(label) => Some(label),
                        Err(e) => {
                            warn!("classification failed: {}", e);
                            events.push(EngineEvent::ClassifierFault {
                                detail: e.to_string(),
                            });
                            Some(MotionLabel::unknown(window.start_ts, window.end_ts))
                        }
                    },
                    ClassifierMode::Deferred => None,
                };
                match label {
                    Some(label) => events.extend(self.apply_label(label)),
                    None => self.pending_windows.push(window),
                }
            }
        }
    }

    // ── External classification hosts ────────────────────────────────────

    pub fn take_pending_windows(&mut self) -> Vec<MotionWindow> {
        std::mem::take(&mut self.pending_windows)
    }

    /// Apply a label produced outside the engine.
    pub fn set_motion_label(&mut self, label: MotionLabel) -> Vec<EngineEvent> {
        self.apply_label(label)
    }

    fn apply_label(&mut self, label: MotionLabel) -> Vec<EngineEvent> {
        let mut events = Vec::new();
        let previous = self.mode.current_mode();
        if previous != label.mode {
            events.push(EngineEvent::ModeChanged {
                from: previous,
                to: label.mode,
                confidence: label.confidence,
            });
        }
        self.mode.apply(label);
        events
    }

    // ── Observation ──────────────────────────────────────────────────────

    /// Running total in meters.
    pub fn cumulative_distance(&self) -> f64 {
        self.store.cumulative_m()
    }

    /// Immutable copy of the waypoint path, ready for a map overlay.
    pub fn path_snapshot(&self) -> Vec<Waypoint> {
        self.store.waypoints()
    }

    /// Owned copy of the full track, if a session has started.
    pub fn track_snapshot(&self) -> Option<Track> {
        self.store.snapshot()
    }

    pub fn stats(&self) -> TrackStats {
        self.store.stats()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }
}
