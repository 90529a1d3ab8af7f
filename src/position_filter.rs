// position_filter.rs: dead-reckoning fusion of position fixes and inertial samples
//
// Independent of any transport, clock or threading: callers hand in
// timestamped samples and ask for the position at arbitrary times.
// Samples go into a newest-first history; every position fix rewrites the
// inertial samples that were integrated on top of the old history, and the
// resulting snap is hidden behind a decaying correction offset.

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::buffer::MeasurementBuffer;
use crate::config::FilterConfig;
use crate::error::ConfigError;
use crate::offsets::{CorrectionOffset, OffsetSet};
use crate::smoothing::OneEuroFilter;
use crate::types::{
    fade_to_zero, lerp, unit_ratio, Measurement, MeasurementKind, Orientation, TagReading, Vec3,
};

// ─── Events ──────────────────────────────────────────────────────────────────

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SpeedSource {
    /// Secant over recent position fixes, advanced through inertial samples.
    PositionWindow,
    /// Previous inertial state integrated up to the fix.
    Acceleration,
    /// Previous position's speed reused as is.
    CarriedOver,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AnomalyKind {
    OrderingAnomaly,
    InsufficientHistory,
    StaleData,
    Diagnostic,
}

#[derive(Clone, Debug, PartialEq)]
pub enum FilterEvent {
    PositionRejected { timestamp: f64, newer_position_timestamp: f64 },
    InertialOutOfOrder { timestamp: f64, index: usize },
    InertialTooClose { timestamp: f64, interval: f64 },
    InsufficientHistory { timestamp: f64, buffered: usize },
    NoPreviousPosition { timestamp: f64 },
    NoPositionFix { timestamp: f64 },
    InertialGap { timestamp: f64, gap: f64 },
    PositionFixStale { timestamp: f64, age: f64 },
    JumpDetected { timestamp: f64, speed: f64, distance: f64 },
    SpeedEstimated { timestamp: f64, source: SpeedSource, speed: f64 },
    CorrectionOffsetCreated { timestamp: f64, magnitude: f64, decay_duration: f64 },
}

impl FilterEvent {
    pub fn kind(&self) -> AnomalyKind {
        match self {
            FilterEvent::PositionRejected { .. }
            | FilterEvent::InertialOutOfOrder { .. }
            | FilterEvent::InertialTooClose { .. } => AnomalyKind::OrderingAnomaly,
            FilterEvent::InsufficientHistory { .. }
            | FilterEvent::NoPreviousPosition { .. }
            | FilterEvent::NoPositionFix { .. } => AnomalyKind::InsufficientHistory,
            FilterEvent::InertialGap { .. } | FilterEvent::PositionFixStale { .. } => {
                AnomalyKind::StaleData
            }
            FilterEvent::JumpDetected { .. }
            | FilterEvent::SpeedEstimated { .. }
            | FilterEvent::CorrectionOffsetCreated { .. } => AnomalyKind::Diagnostic,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            FilterEvent::PositionRejected { .. } => "position_rejected",
            FilterEvent::InertialOutOfOrder { .. } => "inertial_out_of_order",
            FilterEvent::InertialTooClose { .. } => "inertial_too_close",
            FilterEvent::InsufficientHistory { .. } => "insufficient_history",
            FilterEvent::NoPreviousPosition { .. } => "no_previous_position",
            FilterEvent::NoPositionFix { .. } => "no_position_fix",
            FilterEvent::InertialGap { .. } => "inertial_gap",
            FilterEvent::PositionFixStale { .. } => "position_fix_stale",
            FilterEvent::JumpDetected { .. } => "jump_detected",
            FilterEvent::SpeedEstimated { .. } => "speed_estimated",
            FilterEvent::CorrectionOffsetCreated { .. } => "correction_offset_created",
        }
    }
}

// ─── State ───────────────────────────────────────────────────────────────────

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum TrackingState {
    /// No position fix accepted yet.
    Uninitialized,
    /// Fresh position fixes.
    Tracking,
    /// Fix aging, inertial samples still carrying the estimate.
    AccelerationOnly,
    /// Nothing usable: output is frozen.
    Stale,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct FilterStats {
    pub positions_received: u64,
    pub positions_rejected: u64,
    pub jumps_detected: u64,
    pub inertial_received: u64,
    pub inertial_discarded: u64,
    pub offsets_created: u64,
    pub queries: u64,
    pub stale_queries: u64,
}

/// Constant-acceleration step from `from` over `dt`.
fn integrate(from: &Measurement, acceleration: &Vec3, dt: f64) -> (Vec3, Vec3) {
    let speed = from.speed + acceleration * dt;
    let position = from.position + from.speed * dt + acceleration * (0.5 * dt * dt);
    (position, speed)
}

// ─── The filter ──────────────────────────────────────────────────────────────

pub struct PositionFilter {
    config: FilterConfig,
    buffer: MeasurementBuffer,
    offsets: OffsetSet,
    smoother: OneEuroFilter,

    last_output_position: Vec3,
    last_output_timestamp: f64,

    has_fix: bool,
    last_state: TrackingState,
    stats: FilterStats,
}

impl PositionFilter {
    pub fn new(config: FilterConfig) -> Self {
        Self {
            buffer: MeasurementBuffer::new(config.buffer_capacity),
            offsets: OffsetSet::new(),
            smoother: OneEuroFilter::new(&config.smoother),
            last_output_position: Vec3::zeros(),
            last_output_timestamp: 0.0,
            has_fix: false,
            last_state: TrackingState::Uninitialized,
            stats: FilterStats::default(),
            config,
        }
    }

    pub fn try_new(config: FilterConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self::new(config))
    }

    pub fn reset(&mut self) {
        self.buffer.clear();
        self.offsets.clear();
        self.smoother.reset();
        self.last_output_position = Vec3::zeros();
        self.last_output_timestamp = 0.0;
        self.has_fix = false;
        self.last_state = TrackingState::Uninitialized;
    }

    // ── Position fixes ───────────────────────────────────────────────────

    /// Ingest a position fix that arrived at `timestamp`.
    pub fn submit_position(&mut self, timestamp: f64, position: Vec3) -> Vec<FilterEvent> {
        let mut events = Vec::new();
        self.stats.positions_received += 1;

        let measured_at = timestamp - self.config.position_latency;
        let index = self.buffer.insert(Measurement::position(measured_at, position));

        // A newer fix is already buffered: cannot be reconciled, drop it.
        if let Some(newer) = self
            .buffer
            .newer_position_index(index)
            .map(|i| self.buffer[i].timestamp)
        {
            warn!(
                "Position at {:.3} is older than buffered position at {:.3}, discarding",
                measured_at, newer
            );
            self.buffer.remove(index);
            self.stats.positions_rejected += 1;
            events.push(FilterEvent::PositionRejected {
                timestamp: measured_at,
                newer_position_timestamp: newer,
            });
            return events;
        }

        self.has_fix = true;

        if self.buffer.len() < 2 {
            self.publish_front();
            events.push(FilterEvent::InsufficientHistory {
                timestamp: measured_at,
                buffered: self.buffer.len(),
            });
            return events;
        }

        let previous_index = match self.buffer.previous_position_index(index) {
            Some(i) => i,
            None => {
                // Nothing to correct against: anchor newer entries on this fix
                self.repropagate(index);
                self.publish_front();
                events.push(FilterEvent::NoPreviousPosition {
                    timestamp: measured_at,
                });
                return events;
            }
        };

        let current = self.buffer[index];
        let previous = self.buffer[previous_index];

        // Jump rejection: fast AND far from the previous fix
        let distance = (current.position - previous.position).norm();
        let dt = current.timestamp - previous.timestamp;
        let instantaneous_speed = if dt > 0.0 {
            distance / dt
        } else if distance > 0.0 {
            f64::INFINITY
        } else {
            0.0
        };

        let mut predict_from_acceleration = false;
        if instantaneous_speed > self.config.discard_speed
            && distance > self.config.discard_distance
        {
            self.buffer[index].mark_jump();
            self.stats.jumps_detected += 1;
            predict_from_acceleration = true;
            debug!(
                "Jump of {:.3} at {:.2}/s detected at {:.3}",
                distance, instantaneous_speed, measured_at
            );
            events.push(FilterEvent::JumpDetected {
                timestamp: measured_at,
                speed: instantaneous_speed,
                distance,
            });
        }

        if !predict_from_acceleration {
            match self.speed_from_positions(index) {
                Some(speed) => {
                    self.buffer[index].speed = speed;
                    events.push(FilterEvent::SpeedEstimated {
                        timestamp: measured_at,
                        source: SpeedSource::PositionWindow,
                        speed: speed.norm(),
                    });
                }
                None => predict_from_acceleration = true,
            }
        }

        if predict_from_acceleration {
            let predecessor = self.buffer[index + 1];
            let (speed, source) = match predecessor.kind {
                MeasurementKind::Inertial { acceleration, .. } => {
                    let dt = current.timestamp - predecessor.timestamp;
                    (predecessor.speed + acceleration * dt, SpeedSource::Acceleration)
                }
                // No acceleration between two fixes: keep the old speed
                MeasurementKind::Position { .. } => (predecessor.speed, SpeedSource::CarriedOver),
            };
            self.buffer[index].speed = speed;
            events.push(FilterEvent::SpeedEstimated {
                timestamp: measured_at,
                source,
                speed: speed.norm(),
            });
        }

        let newest_before = self.buffer[0].position;
        self.repropagate(index);
        let shift = self.buffer[0].position - newest_before;

        if shift.norm() > self.config.correction_threshold {
            let offset =
                CorrectionOffset::new(measured_at, -shift, self.config.correction_decay_per_unit);
            debug!(
                "Correction offset {:.3} over {:.3}s at {:.3}",
                offset.magnitude(),
                offset.decay_duration,
                measured_at
            );
            events.push(FilterEvent::CorrectionOffsetCreated {
                timestamp: measured_at,
                magnitude: offset.magnitude(),
                decay_duration: offset.decay_duration,
            });
            self.offsets.push(offset);
            self.stats.offsets_created += 1;
        }

        self.publish_front();
        events
    }

    /// Average speed over the recent fixes, carried forward to the fix at
    /// `index`. `None` when the window has fewer than two fixes or contains
    /// a jump.
    fn speed_from_positions(&self, index: usize) -> Option<Vec3> {
        let window = self
            .buffer
            .positions_within(index, self.config.speed_calculation_delay);
        if window.len() < 2 || window.iter().any(|&i| self.buffer[i].is_jump()) {
            return None;
        }

        let newest = self.buffer[window[0]];
        let oldest = self.buffer[window[window.len() - 1]];
        let span = newest.timestamp - oldest.timestamp;
        if span <= 0.0 {
            return None;
        }

        let mut speed = (newest.position - oldest.position) / span;
        let mut speed_timestamp = (newest.timestamp + oldest.timestamp) / 2.0;

        let accelerations = self.buffer.inertial_since(index, speed_timestamp);
        for &i in accelerations.iter().rev() {
            let sample = self.buffer[i];
            if let Some(acceleration) = sample.acceleration() {
                speed += acceleration * (sample.timestamp - speed_timestamp);
                speed_timestamp = sample.timestamp;
            }
        }
        if let Some(&latest) = accelerations.first() {
            let sample = self.buffer[latest];
            if let Some(acceleration) = sample.acceleration() {
                speed += acceleration * (self.buffer[index].timestamp - sample.timestamp);
            }
        }
        Some(speed)
    }

    /// Rewrite every entry newer than `index`, oldest first, from its older
    /// neighbour.
    fn repropagate(&mut self, index: usize) {
        for i in (0..index).rev() {
            let older = self.buffer[i + 1];
            let entry = &mut self.buffer[i];
            match entry.kind {
                MeasurementKind::Inertial { acceleration, .. } => {
                    let dt = entry.timestamp - older.timestamp;
                    let (position, speed) = integrate(&older, &acceleration, dt);
                    entry.position = position;
                    entry.speed = speed;
                }
                // Rejected on insert, never newer than the fix being applied
                MeasurementKind::Position { .. } => {}
            }
        }
    }

    // ── Inertial samples ─────────────────────────────────────────────────

    /// Ingest a world-frame, gravity-compensated acceleration.
    pub fn submit_acceleration(&mut self, timestamp: f64, acceleration: Vec3) -> Vec<FilterEvent> {
        self.ingest_inertial(timestamp, acceleration, None)
    }

    /// Same as [`submit_acceleration`](Self::submit_acceleration), keeping
    /// the tag orientation alongside for pass-through.
    pub fn submit_acceleration_with_orientation(
        &mut self,
        timestamp: f64,
        acceleration: Vec3,
        orientation: Orientation,
    ) -> Vec<FilterEvent> {
        self.ingest_inertial(timestamp, acceleration, Some(orientation))
    }

    fn ingest_inertial(
        &mut self,
        timestamp: f64,
        acceleration: Vec3,
        orientation: Option<Orientation>,
    ) -> Vec<FilterEvent> {
        let mut events = Vec::new();
        self.stats.inertial_received += 1;

        let index = self
            .buffer
            .insert(Measurement::inertial(timestamp, acceleration, orientation));
        if index != 0 {
            warn!(
                "Acceleration at {:.3} was not inserted at the front (index {})",
                timestamp, index
            );
            events.push(FilterEvent::InertialOutOfOrder { timestamp, index });
        }

        if self.buffer.len() < 2 || index + 1 >= self.buffer.len() {
            self.stats.inertial_discarded += 1;
            events.push(FilterEvent::InsufficientHistory {
                timestamp,
                buffered: self.buffer.len(),
            });
            return events;
        }

        let predecessor = self.buffer[index + 1];
        let delay = timestamp - predecessor.timestamp;
        if delay > self.config.max_delay_since_last_measurement {
            warn!(
                "Too long delay since last update: {:.3}s at {:.3}",
                delay, timestamp
            );
            self.hold(index, &predecessor, false);
            events.push(FilterEvent::InertialGap {
                timestamp,
                gap: delay,
            });
            return events;
        }

        let last_fix = match self.buffer.last_position_timestamp() {
            Some(ts) => ts,
            None => {
                self.hold(index, &predecessor, false);
                events.push(FilterEvent::NoPositionFix { timestamp });
                return events;
            }
        };
        let since_fix = timestamp - last_fix;
        if since_fix > self.config.acceleration_only_tracking_delay {
            debug!(
                "Last position fix {:.3}s old at {:.3}, not integrating",
                since_fix, timestamp
            );
            self.hold(index, &predecessor, false);
            events.push(FilterEvent::PositionFixStale {
                timestamp,
                age: since_fix,
            });
            return events;
        }

        let horizon = self.config.acceleration_only_tracking_delay;
        let speed = predecessor.speed + acceleration * delay;
        let displacement = predecessor.speed * delay + acceleration * (0.5 * delay * delay);

        let (speed, displacement) = match predecessor.kind {
            MeasurementKind::Inertial { .. } => {
                if delay < self.config.min_inertial_interval {
                    self.hold(index, &predecessor, true);
                    events.push(FilterEvent::InertialTooClose {
                        timestamp,
                        interval: delay,
                    });
                    return events;
                }
                if since_fix < self.config.inertial_kinematic_window {
                    (speed, displacement)
                } else {
                    let fade = unit_ratio(since_fix, horizon);
                    (fade_to_zero(&speed, fade), fade_to_zero(&displacement, fade))
                }
            }
            MeasurementKind::Position { .. } => {
                if delay < self.config.position_kinematic_window {
                    (speed, displacement)
                } else {
                    (
                        fade_to_zero(&speed, unit_ratio(delay, horizon)),
                        fade_to_zero(&displacement, unit_ratio(since_fix, horizon)),
                    )
                }
            }
        };

        let entry = &mut self.buffer[index];
        entry.speed = speed;
        entry.position = predecessor.position + displacement;

        self.publish_front();
        events
    }

    /// Give a non-integrated inertial entry a usable state so later
    /// samples do not integrate from the origin.
    fn hold(&mut self, index: usize, predecessor: &Measurement, keep_speed: bool) {
        self.stats.inertial_discarded += 1;
        let entry = &mut self.buffer[index];
        entry.position = predecessor.position;
        entry.speed = if keep_speed {
            predecessor.speed
        } else {
            Vec3::zeros()
        };
    }

    fn publish_front(&mut self) {
        if let Some(front) = self.buffer.front() {
            self.last_output_position = front.position;
            self.last_output_timestamp = front.timestamp;
        }
    }

    // ── Queries ──────────────────────────────────────────────────────────

    /// Estimated position at `timestamp`, usually later than any sample.
    pub fn query_position(&mut self, timestamp: f64) -> Vec3 {
        self.stats.queries += 1;
        let state = self.tracking_state(timestamp);
        if state != self.last_state {
            info!(
                "Tracking state {:?} -> {:?} at {:.3}",
                self.last_state, state, timestamp
            );
            self.last_state = state;
        }

        let (last_fix_index, newest) = match (self.buffer.last_position_index(), self.buffer.front())
        {
            (Some(i), Some(front)) => (i, *front),
            _ => {
                self.stats.stale_queries += 1;
                return self.last_output_position;
            }
        };
        if timestamp - newest.timestamp > self.config.max_prediction_delay_since_last_measurement {
            self.stats.stale_queries += 1;
            return self.last_output_position;
        }

        let since_fix = timestamp - self.buffer[last_fix_index].timestamp;
        let (acceleration, since_acceleration) = match self.buffer.last_inertial_index() {
            Some(i) => {
                let sample = self.buffer[i];
                (
                    sample.acceleration().unwrap_or_else(Vec3::zeros),
                    timestamp - sample.timestamp,
                )
            }
            None => (Vec3::zeros(), self.config.max_acceleration_viability_delay),
        };

        // Confidence in stale speed / acceleration fades out
        let speed = fade_to_zero(
            &newest.speed,
            unit_ratio(since_fix, self.config.max_speed_viability_delay),
        );
        let acceleration = fade_to_zero(
            &acceleration,
            unit_ratio(since_acceleration, self.config.max_acceleration_viability_delay),
        );

        let dt = (timestamp - self.last_output_timestamp).max(0.0);
        let extrapolated = self.last_output_position + speed * dt + acceleration * (0.5 * dt * dt);
        self.last_output_position = lerp(
            &extrapolated,
            &self.last_output_position,
            unit_ratio(since_fix, self.config.acceleration_only_tracking_delay),
        );
        self.last_output_timestamp = timestamp;

        let offset = self.offsets.total_at(timestamp);
        self.smoother
            .filter(self.last_output_position + offset, timestamp)
    }

    /// State machine view of the same delay checks [`query_position`]
    /// uses.
    ///
    /// [`query_position`]: Self::query_position
    pub fn tracking_state(&self, timestamp: f64) -> TrackingState {
        if !self.has_fix {
            return TrackingState::Uninitialized;
        }
        let (last_fix, newest) = match (
            self.buffer.last_position_timestamp(),
            self.buffer.front(),
        ) {
            (Some(fix), Some(front)) => (fix, front.timestamp),
            _ => return TrackingState::Stale,
        };
        if timestamp - newest > self.config.max_prediction_delay_since_last_measurement {
            return TrackingState::Stale;
        }

        let since_fix = timestamp - last_fix;
        if since_fix > self.config.acceleration_only_tracking_delay {
            return TrackingState::Stale;
        }
        if since_fix <= self.config.position_latency + self.config.max_delay_since_last_measurement {
            return TrackingState::Tracking;
        }

        let inertial_fresh = self.buffer.last_inertial_timestamp().map_or(false, |ts| {
            ts > last_fix && timestamp - ts <= self.config.max_delay_since_last_measurement
        });
        if inertial_fresh {
            TrackingState::AccelerationOnly
        } else {
            TrackingState::Stale
        }
    }

    // ── Readings ─────────────────────────────────────────────────────────

    /// Dispatch a decoded transport reading to the matching entry point.
    pub fn submit_reading(&mut self, reading: &TagReading) -> Vec<FilterEvent> {
        let mut events = Vec::new();
        if let Some(position) = reading.position_vec() {
            events.extend(self.submit_position(reading.timestamp, position));
        }
        if let Some(acceleration) = reading.acceleration_vec() {
            let batch = match reading.orientation_quat() {
                Some(orientation) => self.submit_acceleration_with_orientation(
                    reading.timestamp,
                    acceleration,
                    orientation,
                ),
                None => self.submit_acceleration(reading.timestamp, acceleration),
            };
            events.extend(batch);
        }
        events
    }

    // ── Accessors ────────────────────────────────────────────────────────

    pub fn config(&self) -> &FilterConfig {
        &self.config
    }

    pub fn buffer(&self) -> &MeasurementBuffer {
        &self.buffer
    }

    pub fn offsets(&self) -> &OffsetSet {
        &self.offsets
    }

    pub fn stats(&self) -> &FilterStats {
        &self.stats
    }

    /// Last published position and its timestamp, before offsets and
    /// smoothing.
    pub fn last_output(&self) -> (Vec3, f64) {
        (self.last_output_position, self.last_output_timestamp)
    }

    /// Newest orientation carried by an inertial sample.
    pub fn latest_orientation(&self) -> Option<Orientation> {
        self.buffer.iter().find_map(|m| m.orientation())
    }
}
