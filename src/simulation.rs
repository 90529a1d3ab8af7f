//! Deterministic synthetic tag used by the demo binary, replay fixtures
//! and tests.

use crate::types::{TagReading, Vec3};

/// Horizontal circle (xz plane) at constant angular speed.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CircularTrajectory {
    pub center: Vec3,
    pub radius: f64,
    /// rad/s
    pub angular_speed: f64,
}

impl CircularTrajectory {
    pub fn new(center: Vec3, radius: f64, angular_speed: f64) -> Self {
        Self {
            center,
            radius,
            angular_speed,
        }
    }

    pub fn position(&self, t: f64) -> Vec3 {
        let phase = self.angular_speed * t;
        self.center + Vec3::new(phase.cos(), 0.0, phase.sin()) * self.radius
    }

    pub fn velocity(&self, t: f64) -> Vec3 {
        let phase = self.angular_speed * t;
        Vec3::new(-phase.sin(), 0.0, phase.cos()) * (self.radius * self.angular_speed)
    }

    pub fn acceleration(&self, t: f64) -> Vec3 {
        let phase = self.angular_speed * t;
        Vec3::new(phase.cos(), 0.0, phase.sin())
            * (-self.radius * self.angular_speed * self.angular_speed)
    }

    pub fn max_speed(&self) -> f64 {
        (self.radius * self.angular_speed).abs()
    }
}

/// Tag riding a trajectory: position fixes are measured `position_latency`
/// before they arrive, inertial samples arrive immediately.
#[derive(Clone, Debug)]
pub struct SimulatedTag {
    pub trajectory: CircularTrajectory,
    pub position_rate: f64,
    pub inertial_rate: f64,
    pub position_latency: f64,
    /// Arrival window `[start, end)` during which no position fix arrives.
    pub position_dropout: Option<(f64, f64)>,
}

impl SimulatedTag {
    pub fn new(
        trajectory: CircularTrajectory,
        position_rate: f64,
        inertial_rate: f64,
        position_latency: f64,
    ) -> Self {
        Self {
            trajectory,
            position_rate,
            inertial_rate,
            position_latency,
            position_dropout: None,
        }
    }

    pub fn with_position_dropout(mut self, start: f64, end: f64) -> Self {
        self.position_dropout = Some((start, end));
        self
    }

    fn in_dropout(&self, arrival: f64) -> bool {
        self.position_dropout
            .map_or(false, |(start, end)| arrival >= start && arrival < end)
    }

    pub fn position_reading(&self, arrival: f64) -> TagReading {
        TagReading::position(
            arrival,
            self.trajectory.position(arrival - self.position_latency),
        )
    }

    pub fn inertial_reading(&self, arrival: f64) -> TagReading {
        TagReading::acceleration(arrival, self.trajectory.acceleration(arrival))
    }

    /// Every reading arriving in `[start, end)`, in arrival order. A
    /// position and an inertial sample sharing an arrival time keep
    /// position first.
    pub fn readings(&self, start: f64, end: f64) -> Vec<TagReading> {
        let mut readings = Vec::new();

        if self.position_rate > 0.0 {
            let mut k = 0u64;
            loop {
                let arrival = start + k as f64 / self.position_rate;
                if arrival >= end {
                    break;
                }
                if !self.in_dropout(arrival) {
                    readings.push(self.position_reading(arrival));
                }
                k += 1;
            }
        }

        if self.inertial_rate > 0.0 {
            let mut k = 0u64;
            loop {
                let arrival = start + k as f64 / self.inertial_rate;
                if arrival >= end {
                    break;
                }
                readings.push(self.inertial_reading(arrival));
                k += 1;
            }
        }

        // Stable: equal arrivals keep position before inertial
        readings.sort_by(|a, b| a.timestamp.total_cmp(&b.timestamp));
        readings
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_trajectory_derivatives() {
        let circle = CircularTrajectory::new(Vec3::new(0.0, 1.5, 0.0), 0.5, 2.0);
        let t = 0.7;
        let h = 1e-5;
        let numeric_v = (circle.position(t + h) - circle.position(t - h)) / (2.0 * h);
        let numeric_a = (circle.velocity(t + h) - circle.velocity(t - h)) / (2.0 * h);
        assert_abs_diff_eq!(circle.velocity(t), numeric_v, epsilon = 1e-6);
        assert_abs_diff_eq!(circle.acceleration(t), numeric_a, epsilon = 1e-6);
        assert_abs_diff_eq!(circle.velocity(t).norm(), circle.max_speed(), epsilon = 1e-12);
        assert_abs_diff_eq!(circle.position(t).y, 1.5, epsilon = 1e-12);
    }

    #[test]
    fn test_readings_are_arrival_ordered() {
        let circle = CircularTrajectory::new(Vec3::zeros(), 0.5, 1.0);
        let tag = SimulatedTag::new(circle, 30.0, 100.0, 0.065);
        let readings = tag.readings(0.0, 1.0);

        assert!(readings
            .windows(2)
            .all(|w| w[0].timestamp <= w[1].timestamp));
        let positions = readings.iter().filter(|r| r.position.is_some()).count();
        let inertial = readings.iter().filter(|r| r.acceleration.is_some()).count();
        assert_eq!(positions, 30);
        assert_eq!(inertial, 100);

        // Fix carries where the tag was one latency earlier
        let first = &readings[0];
        assert!(first.position.is_some());
        assert_abs_diff_eq!(
            first.position_vec().unwrap(),
            circle.position(-0.065),
            epsilon = 1e-12
        );
    }

    #[test]
    fn test_position_dropout() {
        let circle = CircularTrajectory::new(Vec3::zeros(), 0.5, 1.0);
        let tag = SimulatedTag::new(circle, 30.0, 100.0, 0.0).with_position_dropout(0.5, 1.0);
        let readings = tag.readings(0.0, 2.0);
        assert!(!readings
            .iter()
            .any(|r| r.position.is_some() && r.timestamp >= 0.5 && r.timestamp < 1.0));
        assert!(readings
            .iter()
            .any(|r| r.acceleration.is_some() && r.timestamp >= 0.5 && r.timestamp < 1.0));
    }
}
