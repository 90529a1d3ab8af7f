//! Per-tag host: stamps incoming samples with a clock, keeps the raw
//! passthrough state and answers one pose per rendered frame.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;

use log::info;

use crate::config::{TagConfig, TagRole};
use crate::error::{TrackerError, TrackerResult};
use crate::position_filter::{FilterEvent, PositionFilter, TrackingState};
use crate::shared_filter::SharedPositionFilter;
use crate::types::{Orientation, Vec3};

/// Source of host timestamps in seconds. Must be monotonic.
pub trait Clock: Send + Sync {
    fn now(&self) -> f64;
}

/// Seconds elapsed since construction.
pub struct MonotonicClock {
    start: Instant,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    fn now(&self) -> f64 {
        self.start.elapsed().as_secs_f64()
    }
}

/// Clock driven by hand, for replays and tests.
pub struct ManualClock {
    now: Mutex<f64>,
}

impl ManualClock {
    pub fn new(start: f64) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    pub fn set(&self, timestamp: f64) {
        *self.now.lock().unwrap_or_else(PoisonError::into_inner) = timestamp;
    }

    pub fn advance(&self, seconds: f64) {
        *self.now.lock().unwrap_or_else(PoisonError::into_inner) += seconds;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> f64 {
        *self.now.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Pose handed to the renderer for one frame.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TagPose {
    pub timestamp: f64,
    pub position: Vec3,
    pub orientation: Option<Orientation>,
    pub state: TrackingState,
}

#[derive(Default)]
struct RawSample {
    position: Option<Vec3>,
    orientation: Option<Orientation>,
}

pub struct TagTracker {
    config: TagConfig,
    clock: Arc<dyn Clock>,
    filter: SharedPositionFilter,
    filtering: AtomicBool,
    raw: Mutex<RawSample>,
}

impl TagTracker {
    pub fn new(config: TagConfig, clock: Arc<dyn Clock>) -> TrackerResult<Self> {
        if config.uid.trim().is_empty() {
            return Err(TrackerError::MissingUid);
        }
        let filter = PositionFilter::try_new(config.filter.clone())?;
        info!(
            "Tag {} ({:?}) ready, filtering {}",
            config.uid,
            config.role,
            if config.filtering_enabled { "on" } else { "off" }
        );
        Ok(Self {
            filtering: AtomicBool::new(config.filtering_enabled),
            filter: SharedPositionFilter::from_filter(filter),
            raw: Mutex::new(RawSample::default()),
            clock,
            config,
        })
    }

    pub fn uid(&self) -> &str {
        &self.config.uid
    }

    pub fn role(&self) -> TagRole {
        self.config.role
    }

    pub fn filter(&self) -> &SharedPositionFilter {
        &self.filter
    }

    pub fn filtering_enabled(&self) -> bool {
        self.filtering.load(Ordering::Relaxed)
    }

    /// Toggle filtering. History collected before re-enabling is dropped,
    /// the filter restarts from the next fix.
    pub fn set_filtering(&self, enabled: bool) {
        let previous = self.filtering.swap(enabled, Ordering::Relaxed);
        if previous == enabled {
            return;
        }
        if enabled {
            self.filter.reset();
        }
        info!(
            "Tag {} filtering {}",
            self.config.uid,
            if enabled { "enabled" } else { "disabled" }
        );
    }

    fn raw(&self) -> std::sync::MutexGuard<'_, RawSample> {
        self.raw.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn on_position(&self, position: Vec3) -> Vec<FilterEvent> {
        let timestamp = self.clock.now();
        self.raw().position = Some(position);
        if !self.filtering_enabled() {
            return Vec::new();
        }
        self.filter.submit_position(timestamp, position)
    }

    /// `body_acceleration` is gravity-compensated and expressed in the tag
    /// frame; `orientation` rotates tag frame into world frame.
    pub fn on_inertial(&self, orientation: Orientation, body_acceleration: Vec3) -> Vec<FilterEvent> {
        let timestamp = self.clock.now();
        self.raw().orientation = Some(orientation);
        if !self.filtering_enabled() {
            return Vec::new();
        }
        let world = orientation * body_acceleration;
        self.filter
            .submit_acceleration_with_orientation(timestamp, world, orientation)
    }

    pub fn on_world_acceleration(&self, acceleration: Vec3) -> Vec<FilterEvent> {
        let timestamp = self.clock.now();
        if !self.filtering_enabled() {
            return Vec::new();
        }
        self.filter.submit_acceleration(timestamp, acceleration)
    }

    /// Pose for a frame rendered now, predicted `prediction_delay` ahead.
    pub fn frame(&self) -> TagPose {
        let now = self.clock.now();
        let raw_orientation = self.raw().orientation;

        if !self.filtering_enabled() {
            let position = self.raw().position.unwrap_or_else(Vec3::zeros);
            return TagPose {
                timestamp: now,
                position,
                orientation: raw_orientation,
                state: TrackingState::Tracking,
            };
        }

        let timestamp = now + self.config.filter.prediction_delay;
        self.filter.with(|filter| TagPose {
            timestamp,
            position: filter.query_position(timestamp),
            orientation: filter.latest_orientation().or(raw_orientation),
            state: filter.tracking_state(timestamp),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FilterConfig;
    use approx::assert_abs_diff_eq;
    use std::f64::consts::FRAC_PI_2;

    fn tracker(clock: Arc<ManualClock>) -> TagTracker {
        let config = TagConfig {
            uid: "tag-1".to_string(),
            role: TagRole::RightController,
            filtering_enabled: true,
            filter: FilterConfig {
                position_latency: 0.0,
                prediction_delay: 0.0,
                ..FilterConfig::default()
            },
        };
        TagTracker::new(config, clock).unwrap()
    }

    #[test]
    fn test_missing_uid_is_rejected() {
        let clock: Arc<dyn Clock> = Arc::new(ManualClock::new(0.0));
        let result = TagTracker::new(TagConfig::default(), clock);
        assert!(matches!(result, Err(TrackerError::MissingUid)));
    }

    #[test]
    fn test_invalid_filter_config_is_rejected() {
        let clock: Arc<dyn Clock> = Arc::new(ManualClock::new(0.0));
        let mut config = TagConfig {
            uid: "tag-2".to_string(),
            ..TagConfig::default()
        };
        config.filter.buffer_capacity = 0;
        assert!(matches!(
            TagTracker::new(config, clock),
            Err(TrackerError::Config(_))
        ));
    }

    #[test]
    fn test_samples_are_stamped_with_clock() {
        let clock = Arc::new(ManualClock::new(5.0));
        let tag = tracker(clock.clone());
        tag.on_position(Vec3::new(1.0, 1.0, 1.0));
        clock.advance(0.01);
        tag.on_world_acceleration(Vec3::zeros());

        let timestamps: Vec<f64> = tag
            .filter()
            .with(|f| f.buffer().iter().map(|m| m.timestamp).collect());
        assert_eq!(timestamps.len(), 2);
        assert_abs_diff_eq!(timestamps[0], 5.01, epsilon = 1e-12);
        assert_abs_diff_eq!(timestamps[1], 5.0, epsilon = 1e-12);
    }

    #[test]
    fn test_body_acceleration_is_rotated_to_world() {
        let clock = Arc::new(ManualClock::new(1.0));
        let tag = tracker(clock.clone());
        tag.on_position(Vec3::zeros());
        clock.advance(0.01);
        // Yaw 90°: body x maps to world y
        let q = Orientation::from_euler_angles(0.0, 0.0, FRAC_PI_2);
        tag.on_inertial(q, Vec3::new(1.0, 0.0, 0.0));

        let acc = tag.filter().with(|f| f.buffer()[0].acceleration()).unwrap();
        assert_abs_diff_eq!(acc, Vec3::new(0.0, 1.0, 0.0), epsilon = 1e-12);
        let pose = tag.frame();
        assert!(pose.orientation.unwrap().angle_to(&q) < 1e-12);
    }

    #[test]
    fn test_frame_queries_with_prediction_delay() {
        let clock = Arc::new(ManualClock::new(2.0));
        let mut config = TagConfig {
            uid: "tag-3".to_string(),
            ..TagConfig::default()
        };
        config.filter.prediction_delay = 0.02;
        let tag = TagTracker::new(config, clock.clone()).unwrap();
        tag.on_position(Vec3::new(0.0, 1.0, 0.0));
        let pose = tag.frame();
        assert_abs_diff_eq!(pose.timestamp, 2.02, epsilon = 1e-12);
        assert_abs_diff_eq!(pose.position, Vec3::new(0.0, 1.0, 0.0), epsilon = 1e-12);
        assert_eq!(pose.state, TrackingState::Tracking);
    }

    #[test]
    fn test_unfiltered_frame_is_raw() {
        let clock = Arc::new(ManualClock::new(1.0));
        let tag = tracker(clock.clone());
        tag.set_filtering(false);
        assert!(tag.on_position(Vec3::new(3.0, 0.0, 0.0)).is_empty());
        clock.advance(1.0);
        let pose = tag.frame();
        assert_eq!(pose.position, Vec3::new(3.0, 0.0, 0.0));
        assert_abs_diff_eq!(pose.timestamp, 2.0, epsilon = 1e-12);
        assert!(tag.filter().with(|f| f.buffer().is_empty()));

        tag.set_filtering(true);
        assert!(tag.filtering_enabled());
        assert_eq!(tag.frame().state, TrackingState::Uninitialized);
    }
}
