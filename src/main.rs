use anyhow::{bail, Result};
use chrono::Utc;
use clap::Parser;
use env_logger::Env;
use flate2::write::GzEncoder;
use flate2::Compression;
use log::info;
use serde_json::json;
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tokio::sync::watch;
use tokio::time::{interval, Duration, MissedTickBehavior};

use tag_tracker_rs::health_monitor::{health_monitor_task, TagHealthMonitor};
use tag_tracker_rs::simulation::CircularTrajectory;
use tag_tracker_rs::{
    Clock, FilterConfig, FilterEvent, MonotonicClock, Orientation, RecordedSession, TagConfig,
    TagReading, TagRole, TagTracker, Vec3,
};

/// Frames before this point are left out of the error report
const WARMUP_SECS: f64 = 1.0;

#[derive(Parser, Debug)]
#[command(name = "tag_tracker")]
#[command(about = "Simulated tag driven through the latency-compensating position filter", long_about = None)]
struct Args {
    /// Duration in seconds
    #[arg(value_name = "SECONDS", default_value = "10")]
    duration: f64,

    /// Position fix rate (Hz)
    #[arg(long, default_value = "30")]
    position_rate: f64,

    /// Inertial sample rate (Hz)
    #[arg(long, default_value = "100")]
    inertial_rate: f64,

    /// Render rate (Hz)
    #[arg(long, default_value = "90")]
    frame_rate: f64,

    /// Radius of the simulated circle
    #[arg(long, default_value = "0.5")]
    radius: f64,

    /// Angular speed of the simulated tag (rad/s)
    #[arg(long, default_value = "1.0")]
    angular_speed: f64,

    /// Seconds after start at which position fixes stop arriving
    #[arg(long)]
    dropout_start: Option<f64>,

    /// Length of the position dropout (seconds)
    #[arg(long, default_value = "0.5")]
    dropout_length: f64,

    /// Filter configuration (JSON, any subset of fields)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Show raw positions instead of filtered ones
    #[arg(long)]
    raw: bool,

    /// Record the generated readings to a .json.gz session
    #[arg(long)]
    record: bool,

    /// Output directory for recorded sessions
    #[arg(long, default_value = "tag_tracker_sessions")]
    output_dir: String,
}

/// Everything an ingestion task needs, cheap to clone.
#[derive(Clone)]
struct Feed {
    tracker: Arc<TagTracker>,
    clock: Arc<dyn Clock>,
    trajectory: CircularTrajectory,
    latency: f64,
    dropout: Option<(f64, f64)>,
    health: Arc<TagHealthMonitor>,
    recorded: Option<Arc<Mutex<Vec<TagReading>>>>,
    events: Arc<Mutex<BTreeMap<&'static str, u64>>>,
}

impl Feed {
    fn record(&self, reading: TagReading) {
        if let Some(recorded) = &self.recorded {
            if let Ok(mut readings) = recorded.lock() {
                readings.push(reading);
            }
        }
    }

    fn count(&self, events: &[FilterEvent]) {
        if let Ok(mut counts) = self.events.lock() {
            for event in events {
                *counts.entry(event.name()).or_insert(0) += 1;
            }
        }
    }

    fn in_dropout(&self, now: f64) -> bool {
        self.dropout
            .map_or(false, |(start, end)| now >= start && now < end)
    }
}

fn ticker(rate_hz: f64) -> tokio::time::Interval {
    let mut ticker = interval(Duration::from_secs_f64(1.0 / rate_hz));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    ticker
}

async fn position_loop(feed: Feed, rate_hz: f64, mut shutdown: watch::Receiver<bool>) {
    let mut ticker = ticker(rate_hz);
    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = shutdown.changed() => break,
        }

        let now = feed.clock.now();
        if feed.in_dropout(now) {
            continue;
        }
        // Fix describes where the tag was one transport latency ago
        let position = feed.trajectory.position(now - feed.latency);
        let events = feed.tracker.on_position(position);
        feed.health.position.update();
        feed.count(&events);
        feed.record(TagReading::position(now, position));
    }
}

async fn inertial_loop(feed: Feed, rate_hz: f64, mut shutdown: watch::Receiver<bool>) {
    let mut ticker = ticker(rate_hz);
    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = shutdown.changed() => break,
        }

        let now = feed.clock.now();
        let world = feed.trajectory.acceleration(now);
        // Tag yaws with the circle, so the body-frame vector keeps changing
        let orientation =
            Orientation::from_axis_angle(&Vec3::y_axis(), feed.trajectory.angular_speed * now);
        let body = orientation.inverse() * world;
        let events = feed.tracker.on_inertial(orientation, body);
        feed.health.inertial.update();
        feed.count(&events);
        feed.record(TagReading::acceleration(now, world).with_orientation(orientation));
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    if args.position_rate <= 0.0 || args.inertial_rate <= 0.0 || args.frame_rate <= 0.0 {
        bail!("rates must be positive");
    }

    let filter = match &args.config {
        Some(path) => FilterConfig::from_json_file(path)?,
        None => FilterConfig::default(),
    };
    let latency = filter.position_latency;
    let health = Arc::new(TagHealthMonitor::new(
        "sim-tag",
        Duration::from_secs_f64(filter.acceleration_only_tracking_delay),
        Duration::from_secs_f64(filter.max_delay_since_last_measurement),
    ));

    let clock: Arc<dyn Clock> = Arc::new(MonotonicClock::new());
    let tracker = Arc::new(TagTracker::new(
        TagConfig {
            uid: "sim-tag".to_string(),
            role: TagRole::RightController,
            filtering_enabled: !args.raw,
            filter,
        },
        clock.clone(),
    )?);

    let trajectory = CircularTrajectory::new(Vec3::new(0.0, 1.5, 0.0), args.radius, args.angular_speed);
    let feed = Feed {
        tracker: tracker.clone(),
        clock: clock.clone(),
        trajectory,
        latency,
        dropout: args
            .dropout_start
            .map(|start| (start, start + args.dropout_length)),
        health: health.clone(),
        recorded: args.record.then(|| Arc::new(Mutex::new(Vec::new()))),
        events: Arc::new(Mutex::new(BTreeMap::new())),
    };

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let position_handle = tokio::spawn(position_loop(
        feed.clone(),
        args.position_rate,
        shutdown_rx.clone(),
    ));
    let inertial_handle = tokio::spawn(inertial_loop(
        feed.clone(),
        args.inertial_rate,
        shutdown_rx.clone(),
    ));
    let health_handle = tokio::spawn(health_monitor_task(health.clone(), shutdown_rx));

    println!("[{}] Tracking simulated tag for {:.1}s...", ts_now(), args.duration);

    let mut frames = ticker(args.frame_rate);
    let mut sq_error = 0.0;
    let mut scored_frames = 0u64;
    let mut max_error: f64 = 0.0;
    let mut max_step: f64 = 0.0;
    let mut previous: Option<Vec3> = None;
    let mut last_status = 0.0;
    let mut last_pose = tracker.frame();

    loop {
        frames.tick().await;
        let now = clock.now();
        if now >= args.duration {
            break;
        }

        let pose = tracker.frame();
        if now > WARMUP_SECS {
            let error = (pose.position - trajectory.position(pose.timestamp)).norm();
            sq_error += error * error;
            max_error = max_error.max(error);
            scored_frames += 1;
            if let Some(prev) = previous {
                max_step = max_step.max((pose.position - prev).norm());
            }
        }
        previous = Some(pose.position);

        if now - last_status >= 1.0 {
            info!(
                "t={:.1}s state={:?} pos=({:.3}, {:.3}, {:.3}) | {}",
                now,
                pose.state,
                pose.position.x,
                pose.position.y,
                pose.position.z,
                health.format_status()
            );
            last_status = now;
        }
        last_pose = pose;
    }

    let _ = shutdown_tx.send(true);
    position_handle.await?;
    inertial_handle.await?;
    let unhealthy_checks = health_handle.await?;

    let rmse = if scored_frames > 0 {
        (sq_error / scored_frames as f64).sqrt()
    } else {
        f64::NAN
    };
    let events = feed
        .events
        .lock()
        .map(|counts| counts.clone())
        .unwrap_or_default();

    let summary = json!({
        "tag": tracker.uid(),
        "filtering": tracker.filtering_enabled(),
        "frames_scored": scored_frames,
        "rmse": rmse,
        "max_error": max_error,
        "max_frame_step": max_step,
        "final_state": format!("{:?}", last_pose.state),
        "unhealthy_checks": unhealthy_checks,
        "events": events,
        "stats": tracker.filter().stats(),
    });
    println!("{}", serde_json::to_string_pretty(&summary)?);

    if let Some(recorded) = &feed.recorded {
        let readings = recorded
            .lock()
            .map(|readings| readings.clone())
            .unwrap_or_default();
        let path = save_session(Path::new(&args.output_dir), readings)?;
        println!("[{}] Session saved to {}", ts_now(), path.display());
    }

    Ok(())
}

fn save_session(dir: &Path, readings: Vec<TagReading>) -> Result<PathBuf> {
    fs::create_dir_all(dir)?;
    let path = dir.join(format!("session_{}.json.gz", ts_now_clean()));
    let json = serde_json::to_string(&RecordedSession { readings })?;

    let mut encoder = GzEncoder::new(File::create(&path)?, Compression::default());
    encoder.write_all(json.as_bytes())?;
    encoder.finish()?;
    Ok(path)
}

fn ts_now() -> String {
    Utc::now().format("%H:%M:%S").to_string()
}

fn ts_now_clean() -> String {
    Utc::now().format("%Y%m%d_%H%M%S").to_string()
}
