use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{EngineError, EngineResult};
use crate::types::{MotionMode, TrackSegment, Waypoint};

/// The ordered path and totals for one session.
///
/// JSON round-trips losslessly: exporting and re-importing reproduces an
/// identical segment sequence and total.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Track {
    pub session_id: String,
    pub started_at: String,
    pub finalized: bool,
    pub segments: Vec<TrackSegment>,
    pub cumulative_m: f64,
}

impl Track {
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Waypoints for a map overlay: the first segment's start plus every
    /// segment end.
    pub fn waypoints(&self) -> Vec<Waypoint> {
        let mut out = Vec::with_capacity(self.segments.len() + 1);
        if let Some(first) = self.segments.first() {
            out.push(Waypoint {
                latitude: first.start.latitude,
                longitude: first.start.longitude,
                timestamp: first.start.timestamp,
            });
        }
        for segment in &self.segments {
            out.push(Waypoint {
                latitude: segment.end.latitude,
                longitude: segment.end.longitude,
                timestamp: segment.end.timestamp,
            });
        }
        out
    }

    /// GPX 1.1 document for mapping applications. Sample timestamps are
    /// interpreted as unix seconds.
    pub fn to_gpx_xml(&self) -> String {
        let mut xml = String::new();
        xml.push_str("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n");
        xml.push_str("<gpx version=\"1.1\" creator=\"movedist\">\n");
        xml.push_str("  <metadata>\n");
        xml.push_str(&format!("    <name>Track {}</name>\n", self.session_id));
        xml.push_str(&format!("    <desc>Started {}</desc>\n", self.started_at));
        xml.push_str("  </metadata>\n");
        xml.push_str("  <trk>\n");
        xml.push_str(&format!("    <name>Track {}</name>\n", self.session_id));
        xml.push_str("    <trkseg>\n");

        for point in self.waypoints() {
            let time = DateTime::<Utc>::from(
                std::time::UNIX_EPOCH + std::time::Duration::from_secs_f64(point.timestamp.max(0.0)),
            )
            .to_rfc3339();
            xml.push_str(&format!(
                "      <trkpt lat=\"{}\" lon=\"{}\">\n",
                point.latitude, point.longitude
            ));
            xml.push_str(&format!("        <time>{}</time>\n", time));
            xml.push_str("      </trkpt>\n");
        }

        xml.push_str("    </trkseg>\n");
        xml.push_str("  </trk>\n");
        xml.push_str("</gpx>\n");
        xml
    }

    pub fn stats(&self) -> TrackStats {
        let mut stats = TrackStats {
            segment_count: self.segments.len(),
            distance_m: self.cumulative_m,
            ..TrackStats::default()
        };

        for segment in &self.segments {
            match segment.mode {
                MotionMode::Walking => stats.walking_m += segment.corrected_m,
                MotionMode::Running => stats.running_m += segment.corrected_m,
                MotionMode::Vehicular => stats.vehicular_m += segment.corrected_m,
                MotionMode::Unknown => stats.unknown_m += segment.corrected_m,
                MotionMode::Stationary => {}
            }
            let dt = segment.end.timestamp - segment.start.timestamp;
            if dt > 0.0 {
                stats.peak_speed_ms = stats.peak_speed_ms.max(segment.raw_m / dt);
            }
            if segment.low_confidence {
                stats.low_confidence_count += 1;
            }
        }

        if let (Some(first), Some(last)) = (self.segments.first(), self.segments.last()) {
            stats.duration_secs = last.end.timestamp - first.start.timestamp;
            if stats.duration_secs > 0.0 {
                stats.mean_speed_ms = self.cumulative_m / stats.duration_secs;
            }
        }
        stats
    }
}

/// Per-session statistics for display.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TrackStats {
    pub duration_secs: f64,
    pub segment_count: usize,
    pub distance_m: f64,
    pub walking_m: f64,
    pub running_m: f64,
    pub vehicular_m: f64,
    pub unknown_m: f64,
    pub peak_speed_ms: f64,
    pub mean_speed_ms: f64,
    pub low_confidence_count: usize,
}

/// Sole owner of the active track. Written only by the aggregator; readers
/// get owned copies so a concurrent reader can never observe a
/// partially-appended segment.
#[derive(Debug, Default)]
pub struct TrackStore {
    track: Option<Track>,
}

impl TrackStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn begin(&mut self, session_id: String, started_at: String) {
        self.track = Some(Track {
            session_id,
            started_at,
            finalized: false,
            segments: Vec::new(),
            cumulative_m: 0.0,
        });
    }

    pub fn append(&mut self, segment: TrackSegment) -> EngineResult<f64> {
        let track = self
            .track
            .as_mut()
            .ok_or(EngineError::NotTracking)?;
        if track.finalized {
            return Err(EngineError::SessionFinalized);
        }
        track.cumulative_m += segment.corrected_m;
        track.segments.push(segment);
        Ok(track.cumulative_m)
    }

    pub fn finalize(&mut self) -> EngineResult<()> {
        let track = self
            .track
            .as_mut()
            .ok_or(EngineError::NotTracking)?;
        track.finalized = true;
        Ok(())
    }

    pub fn clear(&mut self) {
        self.track = None;
    }

    pub fn cumulative_m(&self) -> f64 {
        self.track.as_ref().map(|t| t.cumulative_m).unwrap_or(0.0)
    }

    pub fn segment_count(&self) -> usize {
        self.track.as_ref().map(|t| t.segments.len()).unwrap_or(0)
    }

    /// Owned copy of the current track, if a session has started.
    pub fn snapshot(&self) -> Option<Track> {
        self.track.clone()
    }

    pub fn waypoints(&self) -> Vec<Waypoint> {
        self.track
            .as_ref()
            .map(|t| t.waypoints())
            .unwrap_or_default()
    }

    pub fn stats(&self) -> TrackStats {
        self.track
            .as_ref()
            .map(|t| t.stats())
            .unwrap_or_default()
    }
}
