use crate::types::MotionMode;

/// Per-mode multipliers applied to raw geodesic distance.
///
/// Stationary is not listed: stationary segments are forced to zero distance
/// regardless of raw GPS jitter.
#[derive(Clone, Debug)]
pub struct CorrectionTable {
    pub walking: f64,
    pub running: f64,
    /// Slightly above 1.0 to compensate for smoothing lag at vehicle speeds.
    pub vehicular: f64,
    pub unknown: f64,
}

impl CorrectionTable {
    pub fn factor(&self, mode: MotionMode) -> f64 {
        match mode {
            MotionMode::Stationary => 0.0,
            MotionMode::Walking => self.walking,
            MotionMode::Running => self.running,
            MotionMode::Vehicular => self.vehicular,
            MotionMode::Unknown => self.unknown,
        }
    }
}

impl Default for CorrectionTable {
    fn default() -> Self {
        Self {
            walking: 1.0,
            running: 1.0,
            vehicular: 1.05,
            unknown: 1.0,
        }
    }
}

#[derive(Clone, Debug)]
pub struct EngineConfig {
    // ── Ingestion ──
    /// Samples are released once the newest seen timestamp is this far ahead.
    pub reorder_window_secs: f64,

    // ── Position gating ──
    /// Fixes with a reported accuracy radius above this never reach the filter.
    pub accuracy_ceiling_m: f64,
    /// Implied speed from the previous accepted fix above this is rejected.
    pub max_speed_ms: f64,

    // ── Filter tuning ──
    /// White-noise acceleration driving the constant-velocity process model.
    pub accel_noise_std: f64,
    /// Prior velocity std before any motion has been observed. Large enough
    /// that the first few fixes are trusted close to raw.
    pub vel_prior_std: f64,

    // ── Motion windows ──
    pub window_secs: f64,
    /// Fraction of a window retained for the next one, in [0, 1).
    pub window_overlap: f64,
    /// Windows with fewer accel samples than this are skipped and the
    /// previous label held over.
    pub min_window_samples: usize,

    // ── Labeling ──
    /// Argmax probability below this yields `Unknown`.
    pub confidence_threshold: f64,
    /// Held-over labels revert to `Unknown` after this long without a fresh
    /// classification.
    pub max_label_hold_secs: f64,

    // ── Aggregation ──
    /// Corrected distance is bounded by this multiple of the raw distance.
    pub clamp_multiplier: f64,
    /// Incorporate the altitude delta as a slant correction.
    pub use_altitude: bool,
    pub correction: CorrectionTable,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            reorder_window_secs: 1.0,
            accuracy_ceiling_m: 50.0,
            max_speed_ms: 60.0,
            accel_noise_std: 0.5,
            vel_prior_std: 30.0,
            window_secs: 2.5,
            window_overlap: 0.5,
            min_window_samples: 25,
            confidence_threshold: 0.55,
            max_label_hold_secs: 5.0,
            clamp_multiplier: 3.0,
            use_altitude: false,
            correction: CorrectionTable::default(),
        }
    }
}
