use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam::channel::{unbounded, Receiver, Sender, TryRecvError};
use crossbeam::queue::ArrayQueue;
use log::{debug, warn};

use crate::classifier::{MotionClassifier, MotionWindow};
use crate::config::EngineConfig;
use crate::engine::{Engine, EngineEvent};
use crate::error::{ClassifierError, EngineError, EngineResult};
use crate::track::Track;
use crate::types::{MotionLabel, Sample};

const WINDOW_QUEUE_CAPACITY: usize = 8;
const WORKER_IDLE_SLEEP: Duration = Duration::from_millis(2);

enum Control {
    Sample(Sample),
    Stop,
}

/// Summary returned when the pipeline shuts down.
#[derive(Debug)]
pub struct PipelineResult {
    pub track: Option<Track>,
    pub malformed: u64,
    pub dropped_windows: u64,
}

/// Threaded host around the synchronous engine.
///
/// The consumer thread is the single writer to track state: it ingests
/// samples, runs the position path, and applies labels. Inference runs on a
/// separate worker fed through a bounded queue; when the worker falls
/// behind, the oldest unprocessed window is evicted rather than blocking
/// the position path, since a stale label only degrades corrections while a
/// stalled pipeline loses everything.
pub struct Pipeline {
    sample_tx: Sender<Control>,
    event_rx: Receiver<EngineEvent>,
    consumer: JoinHandle<PipelineResult>,
}

impl Pipeline {
    pub fn spawn(config: EngineConfig, classifier: Box<dyn MotionClassifier + Send>) -> Self {
        let (sample_tx, sample_rx) = unbounded::<Control>();
        let (event_tx, event_rx) = unbounded::<EngineEvent>();
        let (label_tx, label_rx) = unbounded::<Result<MotionLabel, ClassifierError>>();

        let window_queue = Arc::new(ArrayQueue::<MotionWindow>::new(WINDOW_QUEUE_CAPACITY));
        let stop_flag = Arc::new(AtomicBool::new(false));

        let worker = spawn_worker(
            classifier,
            Arc::clone(&window_queue),
            label_tx,
            Arc::clone(&stop_flag),
        );

        let consumer = thread::spawn(move || {
            consumer_loop(config, sample_rx, event_tx, label_rx, window_queue, stop_flag, worker)
        });

        Self {
            sample_tx,
            event_rx,
            consumer,
        }
    }

    pub fn push(&self, sample: Sample) -> EngineResult<()> {
        self.sample_tx
            .send(Control::Sample(sample))
            .map_err(|_| EngineError::Internal("pipeline consumer is gone".into()))
    }

    /// Events emitted so far, without blocking.
    pub fn try_events(&self) -> Vec<EngineEvent> {
        self.event_rx.try_iter().collect()
    }

    /// Signal stop and wait for the consumer to finalize. Samples queued
    /// behind the stop signal are discarded, not processed.
    pub fn stop(self) -> EngineResult<PipelineResult> {
        let _ = self.sample_tx.send(Control::Stop);
        self.consumer
            .join()
            .map_err(|_| EngineError::Internal("pipeline consumer panicked".into()))
    }
}

fn spawn_worker(
    classifier: Box<dyn MotionClassifier + Send>,
    queue: Arc<ArrayQueue<MotionWindow>>,
    label_tx: Sender<Result<MotionLabel, ClassifierError>>,
    stop_flag: Arc<AtomicBool>,
) -> JoinHandle<()> {
    thread::spawn(move || loop {
        match queue.pop() {
            Some(window) => {
                if label_tx.send(classifier.classify(&window)).is_err() {
                    break;
                }
            }
            None => {
                if stop_flag.load(Ordering::Acquire) {
                    break;
                }
                thread::sleep(WORKER_IDLE_SLEEP);
            }
        }
    })
}

#[allow(clippy::too_many_arguments)]
fn consumer_loop(
    config: EngineConfig,
    sample_rx: Receiver<Control>,
    event_tx: Sender<EngineEvent>,
    label_rx: Receiver<Result<MotionLabel, ClassifierError>>,
    window_queue: Arc<ArrayQueue<MotionWindow>>,
    stop_flag: Arc<AtomicBool>,
    worker: JoinHandle<()>,
) -> PipelineResult {
    let mut engine = Engine::with_deferred_classification(config);
    let mut malformed = 0u64;
    let mut dropped_windows = 0u64;

    if let Ok(events) = engine.start_session() {
        forward(&event_tx, events);
    }

    while let Ok(control) = sample_rx.recv() {
        let sample = match control {
            Control::Sample(sample) => sample,
            Control::Stop => break,
        };

        // Apply any labels the worker finished before touching track state.
        drain_labels(&mut engine, &label_rx, &event_tx);

        match engine.push_sample(sample) {
            Ok(events) => forward(&event_tx, events),
            Err(EngineError::MalformedSample(detail)) => {
                warn!("malformed sample dropped: {}", detail);
                malformed += 1;
            }
            Err(e) => {
                warn!("sample rejected: {}", e);
            }
        }

        for window in engine.take_pending_windows() {
            if let Some(evicted) = window_queue.force_push(window) {
                debug!("classifier behind, evicting oldest window");
                dropped_windows += 1;
                let _ = event_tx.send(EngineEvent::WindowSkipped {
                    samples: evicted.accel.len(),
                });
            }
        }
    }

    // Complete in-flight labels, then shut the worker down.
    drain_labels(&mut engine, &label_rx, &event_tx);
    stop_flag.store(true, Ordering::Release);
    let _ = worker.join();
    drain_labels(&mut engine, &label_rx, &event_tx);

    if let Ok(events) = engine.stop_session() {
        forward(&event_tx, events);
    }

    PipelineResult {
        track: engine.track_snapshot(),
        malformed,
        dropped_windows,
    }
}

fn drain_labels(
    engine: &mut Engine,
    label_rx: &Receiver<Result<MotionLabel, ClassifierError>>,
    event_tx: &Sender<EngineEvent>,
) {
    loop {
        match label_rx.try_recv() {
            Ok(Ok(label)) => forward(event_tx, engine.set_motion_label(label)),
            Ok(Err(e)) => {
                let _ = event_tx.send(EngineEvent::ClassifierFault {
                    detail: e.to_string(),
                });
            }
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
        }
    }
}

fn forward(event_tx: &Sender<EngineEvent>, events: Vec<EngineEvent>) {
    for event in events {
        let _ = event_tx.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::LinearClassifier;
    use crate::types::{ImuVector, PositionFix};

    const G: f64 = 9.80665;

    #[test]
    fn test_pipeline_tracks_a_walk() {
        let classifier = Box::new(LinearClassifier::pretrained(0.55));
        let pipeline = Pipeline::spawn(EngineConfig::default(), classifier);

        // 20 s of walking cadence with a fix every 5 s
        let mut fix_lat = 37.7749;
        for i in 0..1000 {
            let t = i as f64 * 0.02;
            let phase = 2.0 * std::f64::consts::PI * 2.0 * t;
            pipeline
                .push(Sample::Accel(ImuVector::new(t, 0.0, 0.0, G + 2.0 * phase.sin())))
                .unwrap();
            pipeline
                .push(Sample::Gyro(ImuVector::new(t, 0.0, 0.0, 0.5 * phase.sin())))
                .unwrap();
            if i % 250 == 0 {
                pipeline
                    .push(Sample::Position(PositionFix {
                        timestamp: t,
                        latitude: fix_lat,
                        longitude: -122.4194,
                        altitude: 0.0,
                        accuracy: 5.0,
                    }))
                    .unwrap();
                fix_lat += 0.0005;
            }
        }

        let result = pipeline.stop().unwrap();
        let track = result.track.expect("session should have a track");
        assert!(track.finalized);
        assert!(!track.segments.is_empty());
        // three ~55.6 m strides minus whatever the reorder window held back
        assert!(track.cumulative_m > 100.0);
        assert_eq!(result.malformed, 0);
    }

    #[test]
    fn test_pipeline_survives_malformed_samples() {
        let classifier = Box::new(LinearClassifier::pretrained(0.55));
        let pipeline = Pipeline::spawn(EngineConfig::default(), classifier);

        pipeline
            .push(Sample::Accel(ImuVector::new(0.0, f64::NAN, 0.0, 0.0)))
            .unwrap();
        pipeline
            .push(Sample::Position(PositionFix {
                timestamp: 1.0,
                latitude: 37.7749,
                longitude: -122.4194,
                altitude: 0.0,
                accuracy: 5.0,
            }))
            .unwrap();

        let result = pipeline.stop().unwrap();
        assert_eq!(result.malformed, 1);
        assert!(result.track.is_some());
    }

    #[test]
    fn test_stop_discards_samples_behind_the_signal() {
        let classifier = Box::new(LinearClassifier::pretrained(0.55));
        let pipeline = Pipeline::spawn(EngineConfig::default(), classifier);

        pipeline
            .push(Sample::Position(PositionFix {
                timestamp: 0.0,
                latitude: 37.7749,
                longitude: -122.4194,
                altitude: 0.0,
                accuracy: 5.0,
            }))
            .unwrap();

        let sample_tx = pipeline.sample_tx.clone();
        let result = pipeline.stop().unwrap();
        // sends after stop fail or are ignored; either way nothing mutates
        let _ = sample_tx.send(Control::Sample(Sample::Position(PositionFix {
            timestamp: 100.0,
            latitude: 38.0,
            longitude: -122.0,
            altitude: 0.0,
            accuracy: 5.0,
        })));

        let track = result.track.unwrap();
        assert!(track.finalized);
        assert!(track.cumulative_m < 1.0);
    }
}
