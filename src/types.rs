use geo::{HaversineDistance, Point};
use serde::{Deserialize, Serialize};

/// A raw positioning fix as delivered by the acquisition layer.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PositionFix {
    pub timestamp: f64,
    pub latitude: f64,
    pub longitude: f64,
    pub altitude: f64,
    /// Reported 1-sigma horizontal accuracy radius in meters.
    pub accuracy: f64,
}

/// A raw 3-axis inertial reading (m/s² for acceleration, rad/s for angular rate).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ImuVector {
    pub timestamp: f64,
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl ImuVector {
    pub fn new(timestamp: f64, x: f64, y: f64, z: f64) -> Self {
        Self { timestamp, x, y, z }
    }

    pub fn magnitude(&self) -> f64 {
        (self.x * self.x + self.y * self.y + self.z * self.z).sqrt()
    }
}

/// One raw observation entering the engine. Immutable once created.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Sample {
    Position(PositionFix),
    Accel(ImuVector),
    Gyro(ImuVector),
}

impl Sample {
    pub fn timestamp(&self) -> f64 {
        match self {
            Sample::Position(fix) => fix.timestamp,
            Sample::Accel(v) | Sample::Gyro(v) => v.timestamp,
        }
    }

    pub fn kind(&self) -> SampleKind {
        match self {
            Sample::Position(_) => SampleKind::Position,
            Sample::Accel(_) => SampleKind::Accel,
            Sample::Gyro(_) => SampleKind::Gyro,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SampleKind {
    Position,
    Accel,
    Gyro,
}

/// Smoothed position emitted by the noise filter.
///
/// `valid = false` means the input fix was rejected by gating and the raw
/// coordinates are carried through for diagnostics only. Invalid positions
/// never update filter state and never form track segments.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FilteredPosition {
    pub timestamp: f64,
    pub latitude: f64,
    pub longitude: f64,
    pub altitude: f64,
    /// Filter's own 1-sigma uncertainty radius in meters.
    pub uncertainty_m: f64,
    pub valid: bool,
}

/// Movement mode enumeration. `Unknown` is never treated as a movement mode
/// for correction purposes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MotionMode {
    Stationary,
    Walking,
    Running,
    Vehicular,
    Unknown,
}

/// Classifier output covering one window of motion-sensor data.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MotionLabel {
    pub mode: MotionMode,
    /// Probability mass on the chosen mode, in [0, 1].
    pub confidence: f64,
    pub start_ts: f64,
    pub end_ts: f64,
}

impl MotionLabel {
    pub fn unknown(start_ts: f64, end_ts: f64) -> Self {
        Self {
            mode: MotionMode::Unknown,
            confidence: 0.0,
            start_ts,
            end_ts,
        }
    }
}

/// One consecutive pair of valid filtered positions plus the label that was
/// active at that time.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TrackSegment {
    pub start: FilteredPosition,
    pub end: FilteredPosition,
    pub mode: MotionMode,
    pub confidence: f64,
    /// Great-circle distance between the two positions, meters.
    pub raw_m: f64,
    /// Distance after mode correction and sanity clamping, meters.
    pub corrected_m: f64,
    pub low_confidence: bool,
    pub clamped: bool,
}

/// A single point of the rendered path.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Waypoint {
    pub latitude: f64,
    pub longitude: f64,
    pub timestamp: f64,
}

/// Great-circle distance in meters between two lat/lon pairs.
pub fn haversine_m(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let a = Point::new(lon1, lat1);
    let b = Point::new(lon2, lat2);
    a.haversine_distance(&b)
}

/// Slant distance: horizontal great-circle distance corrected for the
/// altitude delta between the endpoints.
pub fn slant_m(horizontal_m: f64, altitude_delta_m: f64) -> f64 {
    (horizontal_m * horizontal_m + altitude_delta_m * altitude_delta_m).sqrt()
}
