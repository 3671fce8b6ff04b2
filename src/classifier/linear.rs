use ndarray::{arr1, arr2, Array1, Array2};

use crate::classifier::features::{extract, FEATURE_DIM};
use crate::classifier::{MotionClassifier, MotionWindow};
use crate::error::ClassifierError;
use crate::types::{MotionLabel, MotionMode};

const MODES: [MotionMode; 4] = [
    MotionMode::Stationary,
    MotionMode::Walking,
    MotionMode::Running,
    MotionMode::Vehicular,
];

// Distilled linear head over the feature layout in `features.rs`. Weights
// were hand-calibrated against recorded walking/running/driving sessions;
// features that did not separate the classes carry zero weight.
#[rustfmt::skip]
const WEIGHTS: [[f64; FEATURE_DIM]; 4] = [
    // stationary: anything that moves argues against
    [0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, -8.0, 0.0, 0.0,  0.0,  0.0, 0.0, -5.0],
    // walking: gait-band periodicity, moderate variance
    [0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, -3.0, 0.0, 0.05, 6.0,  0.0, 0.0,  0.0],
    // running: high-frequency impacts plus overall energy
    [0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0,  0.8, 0.0, 0.0,  0.0,  2.5, 0.0,  0.0],
    // vehicular: variance without gait periodicity, steady attitude
    [0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0,  1.5, 0.0, 0.0, -4.0, -2.0, 0.0, -3.0],
];

const BIAS: [f64; 4] = [3.0, -2.0, -3.0, 0.6];

/// Fixed-weight linear softmax classifier.
///
/// Inference is a pure function of the window: one matrix product, a
/// numerically-stable softmax, and an argmax. Anything below the confidence
/// threshold is reported as `Unknown` with the argmax probability attached.
pub struct LinearClassifier {
    weights: Array2<f64>,
    bias: Array1<f64>,
    confidence_threshold: f64,
}

impl LinearClassifier {
    pub fn pretrained(confidence_threshold: f64) -> Self {
        Self {
            weights: arr2(&WEIGHTS),
            bias: arr1(&BIAS),
            confidence_threshold,
        }
    }

    /// Run the linear head on an already-extracted feature vector.
    pub fn infer(&self, features: &Array1<f64>) -> Result<(MotionMode, f64), ClassifierError> {
        if features.len() != FEATURE_DIM {
            return Err(ClassifierError::Unavailable(format!(
                "feature vector has dimension {}, expected {}",
                features.len(),
                FEATURE_DIM
            )));
        }

        let logits = self.weights.dot(features) + &self.bias;
        let probabilities = softmax(&logits)?;

        let (mut best, mut best_p) = (0, probabilities[0]);
        for (i, &p) in probabilities.iter().enumerate().skip(1) {
            if p > best_p {
                best = i;
                best_p = p;
            }
        }

        if best_p < self.confidence_threshold {
            Ok((MotionMode::Unknown, best_p))
        } else {
            Ok((MODES[best], best_p))
        }
    }
}

impl MotionClassifier for LinearClassifier {
    fn classify(&self, window: &MotionWindow) -> Result<MotionLabel, ClassifierError> {
        let features = extract(window)?;
        let (mode, confidence) = self.infer(&features)?;
        Ok(MotionLabel {
            mode,
            confidence,
            start_ts: window.start_ts,
            end_ts: window.end_ts,
        })
    }
}

fn softmax(logits: &Array1<f64>) -> Result<Array1<f64>, ClassifierError> {
    let max = logits.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    let exps: Array1<f64> = logits.mapv(|l| (l - max).exp());
    let sum = exps.sum();
    if !sum.is_finite() || sum <= 0.0 {
        return Err(ClassifierError::Unavailable(
            "softmax produced a degenerate distribution".into(),
        ));
    }
    let probabilities = exps / sum;
    if probabilities.iter().any(|p| p.is_nan()) {
        return Err(ClassifierError::Unavailable("NaN probability".into()));
    }
    Ok(probabilities)
}
