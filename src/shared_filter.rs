use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::config::FilterConfig;
use crate::position_filter::{FilterEvent, FilterStats, PositionFilter, TrackingState};
use crate::types::{Orientation, Vec3};

/// Position filter shared between producer tasks (position and inertial
/// transports) and the frame loop. Every call takes the lock for the whole
/// operation, so ingestion and queries never interleave.
#[derive(Clone)]
pub struct SharedPositionFilter {
    inner: Arc<Mutex<PositionFilter>>,
}

impl SharedPositionFilter {
    pub fn new(config: FilterConfig) -> Self {
        Self::from_filter(PositionFilter::new(config))
    }

    pub fn from_filter(filter: PositionFilter) -> Self {
        Self {
            inner: Arc::new(Mutex::new(filter)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, PositionFilter> {
        // A panicking writer leaves a consistent buffer behind: keep going
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run `f` with exclusive access to the filter.
    pub fn with<R>(&self, f: impl FnOnce(&mut PositionFilter) -> R) -> R {
        f(&mut self.lock())
    }

    pub fn submit_position(&self, timestamp: f64, position: Vec3) -> Vec<FilterEvent> {
        self.lock().submit_position(timestamp, position)
    }

    pub fn submit_acceleration(&self, timestamp: f64, acceleration: Vec3) -> Vec<FilterEvent> {
        self.lock().submit_acceleration(timestamp, acceleration)
    }

    pub fn submit_acceleration_with_orientation(
        &self,
        timestamp: f64,
        acceleration: Vec3,
        orientation: Orientation,
    ) -> Vec<FilterEvent> {
        self.lock()
            .submit_acceleration_with_orientation(timestamp, acceleration, orientation)
    }

    pub fn query_position(&self, timestamp: f64) -> Vec3 {
        self.lock().query_position(timestamp)
    }

    pub fn tracking_state(&self, timestamp: f64) -> TrackingState {
        self.lock().tracking_state(timestamp)
    }

    pub fn latest_orientation(&self) -> Option<Orientation> {
        self.lock().latest_orientation()
    }

    pub fn stats(&self) -> FilterStats {
        self.lock().stats().clone()
    }

    pub fn reset(&self) {
        self.lock().reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_concurrent_producers_and_reader() {
        let shared = SharedPositionFilter::new(FilterConfig {
            position_latency: 0.0,
            ..FilterConfig::default()
        });
        shared.submit_position(0.0, Vec3::zeros());

        let positions = {
            let shared = shared.clone();
            thread::spawn(move || {
                for i in 1..=30 {
                    shared.submit_position(i as f64 * 0.033, Vec3::zeros());
                }
            })
        };
        let inertial = {
            let shared = shared.clone();
            thread::spawn(move || {
                for i in 1..=100 {
                    shared.submit_acceleration(i as f64 * 0.01, Vec3::zeros());
                }
            })
        };
        let reader = {
            let shared = shared.clone();
            thread::spawn(move || {
                (0..90)
                    .map(|i| shared.query_position(i as f64 / 90.0))
                    .all(|p| p.iter().all(|c| c.is_finite()))
            })
        };

        positions.join().unwrap();
        inertial.join().unwrap();
        assert!(reader.join().unwrap());

        let stats = shared.stats();
        assert_eq!(stats.positions_received, 31);
        assert_eq!(stats.inertial_received, 100);
        assert_eq!(stats.queries, 90);
        let len = shared.with(|f| f.buffer().len());
        assert!(len > 0 && len <= 100);
    }

    #[test]
    fn test_clones_share_state() {
        let a = SharedPositionFilter::new(FilterConfig::default());
        let b = a.clone();
        a.submit_position(1.0, Vec3::new(1.0, 0.0, 0.0));
        assert_eq!(b.with(|f| f.last_output().0), Vec3::new(1.0, 0.0, 0.0));
        b.reset();
        assert_eq!(a.tracking_state(1.0), TrackingState::Uninitialized);
    }
}
