//! Latency-compensating position filter for wireless tracking tags.
//!
//! A tag reports absolute positions at a low rate with a known transport
//! latency and world-frame accelerations at a higher rate. The
//! [`PositionFilter`] fuses both into a smooth, low-latency position that
//! can be queried at render rate.

pub mod buffer;
pub mod config;
pub mod error;
pub mod health_monitor;
pub mod offsets;
pub mod position_filter;
pub mod shared_filter;
pub mod simulation;
pub mod smoothing;
pub mod tag;
pub mod types;

pub use config::{FilterConfig, SmootherConfig, TagConfig, TagRole};
pub use error::{ConfigError, TrackerError, TrackerResult};
pub use position_filter::{
    AnomalyKind, FilterEvent, FilterStats, PositionFilter, SpeedSource, TrackingState,
};
pub use shared_filter::SharedPositionFilter;
pub use tag::{Clock, ManualClock, MonotonicClock, TagPose, TagTracker};
pub use types::{Orientation, RecordedSession, TagReading, Vec3};
