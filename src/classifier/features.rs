use nalgebra::Vector3;
use ndarray::Array1;

use crate::classifier::MotionWindow;
use crate::error::ClassifierError;

/// Fixed feature-vector layout consumed by the pretrained model.
///
/// Index map:
///  0..3   accel per-axis mean (x, y, z)
///  3..6   accel per-axis std
///  6      |mean accel magnitude - g|
///  7      accel magnitude std
///  8      accel magnitude range (max - min)
///  9      zero-crossing rate of the mean-removed magnitude, per second
/// 10      gait-band RMS amplitude (0.6 - 2.6 Hz)
/// 11      run-band RMS amplitude (2.6 - 8.0 Hz)
/// 12      gyro magnitude mean
/// 13      gyro magnitude std
pub const FEATURE_DIM: usize = 14;

const STANDARD_GRAVITY: f64 = 9.80665;
const GAIT_BAND_HZ: (f64, f64) = (0.6, 2.6);
const RUN_BAND_HZ: (f64, f64) = (2.6, 8.0);
const SMOOTHER_WIDTH: usize = 5;

pub fn extract(window: &MotionWindow) -> Result<Array1<f64>, ClassifierError> {
    let n = window.accel.len();
    if n < 4 {
        return Err(ClassifierError::Unavailable(format!(
            "window too sparse: {} accel samples",
            n
        )));
    }
    let span = window.accel[n - 1].timestamp - window.accel[0].timestamp;
    if span <= 0.0 {
        return Err(ClassifierError::Unavailable(
            "window has zero time span".into(),
        ));
    }
    let sample_rate_hz = (n as f64 - 1.0) / span;

    let mut features = Array1::<f64>::zeros(FEATURE_DIM);

    let xs: Vec<f64> = window.accel.iter().map(|s| s.x).collect();
    let ys: Vec<f64> = window.accel.iter().map(|s| s.y).collect();
    let zs: Vec<f64> = window.accel.iter().map(|s| s.z).collect();
    let mags: Vec<f64> = window
        .accel
        .iter()
        .map(|s| Vector3::new(s.x, s.y, s.z).norm())
        .collect();

    features[0] = mean(&xs);
    features[1] = mean(&ys);
    features[2] = mean(&zs);
    features[3] = std_dev(&xs);
    features[4] = std_dev(&ys);
    features[5] = std_dev(&zs);

    let mag_mean = mean(&mags);
    features[6] = (mag_mean - STANDARD_GRAVITY).abs();
    features[7] = std_dev(&mags);
    features[8] = mags.iter().cloned().fold(f64::MIN, f64::max)
        - mags.iter().cloned().fold(f64::MAX, f64::min);

    let centered: Vec<f64> = mags.iter().map(|m| m - mag_mean).collect();
    let smoothed = hann_smooth(&centered, SMOOTHER_WIDTH);
    features[9] = zero_crossing_rate(&smoothed, span);

    features[10] = band_rms(&centered, sample_rate_hz, GAIT_BAND_HZ.0, GAIT_BAND_HZ.1);
    features[11] = band_rms(&centered, sample_rate_hz, RUN_BAND_HZ.0, RUN_BAND_HZ.1);

    if window.gyro.is_empty() {
        features[12] = 0.0;
        features[13] = 0.0;
    } else {
        let gyro_mags: Vec<f64> = window
            .gyro
            .iter()
            .map(|s| Vector3::new(s.x, s.y, s.z).norm())
            .collect();
        features[12] = mean(&gyro_mags);
        features[13] = std_dev(&gyro_mags);
    }

    Ok(features)
}

fn mean(series: &[f64]) -> f64 {
    series.iter().sum::<f64>() / series.len() as f64
}

fn std_dev(series: &[f64]) -> f64 {
    let m = mean(series);
    let var = series.iter().map(|v| (v - m) * (v - m)).sum::<f64>() / series.len() as f64;
    var.sqrt()
}

/// Hann-weighted moving average. Short inputs pass through unchanged.
fn hann_smooth(series: &[f64], width: usize) -> Vec<f64> {
    if series.len() < width || width < 3 {
        return series.to_vec();
    }
    let mut weights = Vec::with_capacity(width);
    for i in 0..width {
        let angle = (2.0 * std::f64::consts::PI * i as f64) / (width as f64 - 1.0);
        weights.push(0.5 - 0.5 * angle.cos());
    }
    let norm: f64 = weights.iter().sum();

    let half = width / 2;
    let n = series.len();
    let mut out = Vec::with_capacity(n);
    for i in 0..n {
        let mut acc = 0.0;
        for (j, w) in weights.iter().enumerate() {
            let idx = (i + j).saturating_sub(half).min(n - 1);
            acc += series[idx] * w;
        }
        out.push(acc / norm);
    }
    out
}

fn zero_crossing_rate(series: &[f64], span_secs: f64) -> f64 {
    let mut crossings = 0u32;
    for pair in series.windows(2) {
        if (pair[0] >= 0.0) != (pair[1] >= 0.0) {
            crossings += 1;
        }
    }
    crossings as f64 / span_secs
}

/// RMS amplitude of the signal content between `f_lo` and `f_hi`, summed
/// over DFT bins evaluated with the Goertzel recurrence.
fn band_rms(series: &[f64], sample_rate_hz: f64, f_lo: f64, f_hi: f64) -> f64 {
    let n = series.len();
    let k_lo = ((f_lo * n as f64 / sample_rate_hz).ceil() as usize).max(1);
    let k_hi = ((f_hi * n as f64 / sample_rate_hz).floor() as usize).min(n / 2);
    if k_lo > k_hi {
        return 0.0;
    }
    let mut power = 0.0;
    for k in k_lo..=k_hi {
        let amp = goertzel_amplitude(series, k);
        power += amp * amp / 2.0;
    }
    power.sqrt()
}

/// Tone amplitude at DFT bin `k` (frequency k * fs / n).
fn goertzel_amplitude(series: &[f64], k: usize) -> f64 {
    let n = series.len() as f64;
    let w = 2.0 * std::f64::consts::PI * k as f64 / n;
    let coeff = 2.0 * w.cos();
    let mut s1 = 0.0;
    let mut s2 = 0.0;
    for &v in series {
        let s0 = v + coeff * s1 - s2;
        s2 = s1;
        s1 = s0;
    }
    let power = s1 * s1 + s2 * s2 - coeff * s1 * s2;
    2.0 * power.max(0.0).sqrt() / n
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::MotionWindow;
    use crate::types::ImuVector;
    use approx::assert_relative_eq;

    /// 125 samples at 50 Hz, accel magnitude = g + amp * sin(2 pi f t) on z.
    fn tone_window(amp: f64, freq_hz: f64) -> MotionWindow {
        let mut accel = Vec::new();
        for i in 0..125 {
            let t = i as f64 * 0.02;
            let z = STANDARD_GRAVITY + amp * (2.0 * std::f64::consts::PI * freq_hz * t).sin();
            accel.push(ImuVector::new(t, 0.0, 0.0, z));
        }
        MotionWindow {
            start_ts: 0.0,
            end_ts: 2.5,
            accel,
            gyro: Vec::new(),
        }
    }

    #[test]
    fn test_pure_tone_lands_in_gait_band() {
        // 2.0 Hz is bin 5 of a 125-sample window at 50 Hz: no leakage.
        let f = extract(&tone_window(2.0, 2.0)).unwrap();
        assert_relative_eq!(f[7], 2.0 / 2.0_f64.sqrt(), max_relative = 0.02); // mag std
        assert_relative_eq!(f[10], 2.0 / 2.0_f64.sqrt(), max_relative = 0.05); // gait band
        assert!(f[11] < 0.1); // run band stays quiet
    }

    #[test]
    fn test_fast_tone_lands_in_run_band() {
        // 3.6 Hz is bin 9: inside the run band, outside the gait band.
        let f = extract(&tone_window(5.0, 3.6)).unwrap();
        assert_relative_eq!(f[11], 5.0 / 2.0_f64.sqrt(), max_relative = 0.05);
        assert!(f[10] < 0.3);
    }

    #[test]
    fn test_still_window_is_flat() {
        let f = extract(&tone_window(0.0, 1.0)).unwrap();
        assert!(f[6] < 1e-9); // magnitude pinned at g
        assert!(f[7] < 1e-9);
        assert!(f[10] < 1e-9);
    }

    #[test]
    fn test_zero_crossing_rate_of_walking_cadence() {
        let f = extract(&tone_window(2.0, 2.0)).unwrap();
        // a 2 Hz tone crosses zero 4 times per second
        assert_relative_eq!(f[9], 4.0, max_relative = 0.15);
    }

    #[test]
    fn test_sparse_window_is_unavailable() {
        let w = MotionWindow {
            start_ts: 0.0,
            end_ts: 2.5,
            accel: vec![ImuVector::new(0.0, 0.0, 0.0, 9.81)],
            gyro: Vec::new(),
        };
        assert!(matches!(
            extract(&w),
            Err(ClassifierError::Unavailable(_))
        ));
    }
}
