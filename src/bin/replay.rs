use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::Parser;
use flate2::read::GzDecoder;
use serde::Deserialize;
use serde_json::json;

use movedist::{Engine, EngineConfig, EngineEvent, Sample};

/// Replay a recorded session log through the estimation engine.
#[derive(Parser, Debug)]
struct Args {
    /// Path to a session log (.json or .json.gz)
    #[arg(long)]
    log: PathBuf,

    /// Reported-accuracy ceiling in meters
    #[arg(long, default_value = "50.0")]
    accuracy_ceiling: f64,

    /// Implausible-speed bound in m/s
    #[arg(long, default_value = "60.0")]
    max_speed: f64,

    /// Argmax probability below this labels the window Unknown
    #[arg(long, default_value = "0.55")]
    confidence_threshold: f64,

    /// Corrected distance is bounded by this multiple of raw
    #[arg(long, default_value = "3.0")]
    clamp_multiplier: f64,

    /// Fold altitude deltas into segment distances
    #[arg(long, default_value_t = false)]
    use_altitude: bool,

    /// Write the finished track as GPX to this path
    #[arg(long)]
    gpx_out: Option<PathBuf>,
}

#[derive(Deserialize)]
struct LogFile {
    samples: Vec<Sample>,
}

fn load_log(path: &Path) -> anyhow::Result<LogFile> {
    let file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
    if path.extension().map(|e| e == "gz").unwrap_or(false) {
        let reader = BufReader::new(GzDecoder::new(file));
        Ok(serde_json::from_reader(reader)?)
    } else {
        let reader = BufReader::new(file);
        Ok(serde_json::from_reader(reader)?)
    }
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let args = Args::parse();

    let config = EngineConfig {
        accuracy_ceiling_m: args.accuracy_ceiling,
        max_speed_ms: args.max_speed,
        confidence_threshold: args.confidence_threshold,
        clamp_multiplier: args.clamp_multiplier,
        use_altitude: args.use_altitude,
        ..EngineConfig::default()
    };

    let log = load_log(&args.log)?;
    let mut engine = Engine::new(config);
    engine.start_session()?;

    let mut segments = 0u64;
    let mut degraded = 0u64;
    let mut late = 0u64;
    let mut clamped = 0u64;
    let mut faults = 0u64;
    let mut malformed = 0u64;

    for sample in log.samples {
        let events = match engine.push_sample(sample) {
            Ok(events) => events,
            Err(movedist::EngineError::MalformedSample(detail)) => {
                log::warn!("malformed sample skipped: {detail}");
                malformed += 1;
                continue;
            }
            Err(e) => return Err(e.into()),
        };
        for event in events {
            match event {
                EngineEvent::SegmentAppended { .. } => segments += 1,
                EngineEvent::DegradedFix { .. } => degraded += 1,
                EngineEvent::SampleLate { .. } => late += 1,
                EngineEvent::SanityClampApplied { .. } => clamped += 1,
                EngineEvent::ClassifierFault { .. } => faults += 1,
                _ => {}
            }
        }
    }

    engine.stop_session()?;
    let track = engine
        .track_snapshot()
        .context("session produced no track")?;
    let stats = track.stats();

    let summary = json!({
        "log": args.log.display().to_string(),
        "session_id": track.session_id,
        "distance_m": track.cumulative_m,
        "segments": segments,
        "duration_secs": stats.duration_secs,
        "peak_speed_ms": stats.peak_speed_ms,
        "mean_speed_ms": stats.mean_speed_ms,
        "by_mode_m": {
            "walking": stats.walking_m,
            "running": stats.running_m,
            "vehicular": stats.vehicular_m,
            "unknown": stats.unknown_m,
        },
        "low_confidence_segments": stats.low_confidence_count,
        "degraded_fixes": degraded,
        "late_samples": late,
        "clamped_segments": clamped,
        "classifier_faults": faults,
        "malformed_samples": malformed,
    });
    println!("{}", serde_json::to_string_pretty(&summary)?);

    if let Some(gpx_path) = args.gpx_out {
        std::fs::write(&gpx_path, track.to_gpx_xml())
            .with_context(|| format!("writing {}", gpx_path.display()))?;
        log::info!("wrote GPX track to {}", gpx_path.display());
    }

    Ok(())
}
