use std::collections::BTreeMap;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use clap::Parser;
use env_logger::Env;
use flate2::read::GzDecoder;
use log::info;
use serde_json::json;

use tag_tracker_rs::{
    AnomalyKind, FilterConfig, PositionFilter, RecordedSession, TrackingState, Vec3,
};

#[derive(Parser, Debug)]
struct Args {
    /// Path to session_*.json[.gz] log
    #[arg(long)]
    log: PathBuf,

    /// Query rate (Hz)
    #[arg(long, default_value = "90")]
    frame_rate: f64,

    /// Filter configuration (JSON, any subset of fields)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Query at arrival time + prediction_delay, like the live host
    #[arg(long, default_value_t = false)]
    predict: bool,
}

fn load_log(path: &Path) -> anyhow::Result<RecordedSession> {
    let file = File::open(path)?;
    if path.extension().map(|e| e == "gz").unwrap_or(false) {
        let gz = GzDecoder::new(file);
        let reader = BufReader::new(gz);
        Ok(serde_json::from_reader(reader)?)
    } else {
        let reader = BufReader::new(file);
        Ok(serde_json::from_reader(reader)?)
    }
}

fn anomaly_label(kind: AnomalyKind) -> &'static str {
    match kind {
        AnomalyKind::OrderingAnomaly => "ordering_anomaly",
        AnomalyKind::InsufficientHistory => "insufficient_history",
        AnomalyKind::StaleData => "stale_data",
        AnomalyKind::Diagnostic => "diagnostic",
    }
}

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();
    let args = Args::parse();
    if args.frame_rate <= 0.0 {
        bail!("frame rate must be positive");
    }

    let config = match &args.config {
        Some(path) => FilterConfig::from_json_file(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => FilterConfig::default(),
    };
    let mut session =
        load_log(&args.log).with_context(|| format!("loading {}", args.log.display()))?;
    if session.readings.is_empty() {
        bail!("{} holds no readings", args.log.display());
    }
    session
        .readings
        .sort_by(|a, b| a.timestamp.total_cmp(&b.timestamp));

    let lookahead = if args.predict {
        config.prediction_delay
    } else {
        0.0
    };
    let mut filter = PositionFilter::try_new(config)?;

    let start = session.readings[0].timestamp;
    let end = session.readings[session.readings.len() - 1].timestamp;
    let frame_dt = 1.0 / args.frame_rate;
    info!(
        "Replaying {} readings over {:.2}s",
        session.readings.len(),
        end - start
    );

    let mut by_event: BTreeMap<&'static str, u64> = BTreeMap::new();
    let mut by_kind: BTreeMap<&'static str, u64> = BTreeMap::new();
    let mut state_frames: BTreeMap<String, u64> = BTreeMap::new();
    let mut next = 0;
    let mut frames = 0u64;
    let mut max_step: f64 = 0.0;
    let mut previous: Option<Vec3> = None;
    let mut last: Option<(f64, Vec3)> = None;

    loop {
        let now = start + frames as f64 * frame_dt;
        if now > end {
            break;
        }
        while next < session.readings.len() && session.readings[next].timestamp <= now {
            for event in filter.submit_reading(&session.readings[next]) {
                *by_event.entry(event.name()).or_insert(0) += 1;
                *by_kind.entry(anomaly_label(event.kind())).or_insert(0) += 1;
            }
            next += 1;
        }

        let query_at = now + lookahead;
        let state: TrackingState = filter.tracking_state(query_at);
        let position = filter.query_position(query_at);
        *state_frames.entry(format!("{:?}", state)).or_insert(0) += 1;

        if let Some(prev) = previous {
            max_step = max_step.max((position - prev).norm());
        }
        previous = Some(position);
        last = Some((query_at, position));
        frames += 1;
    }

    let final_position = last.map(|(t, p)| json!({ "timestamp": t, "position": [p.x, p.y, p.z] }));
    let summary = json!({
        "log": args.log.display().to_string(),
        "readings": session.readings.len(),
        "frames": frames,
        "max_frame_step": max_step,
        "events": by_event,
        "anomalies": by_kind,
        "states": state_frames,
        "stats": filter.stats(),
        "final": final_position,
    });
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}
