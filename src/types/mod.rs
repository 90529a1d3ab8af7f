pub mod linalg;

pub use linalg::*;

use nalgebra::Quaternion;
use serde::{Deserialize, Serialize};

/// Variant-specific payload of a buffered measurement.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum MeasurementKind {
    /// Absolute position fix. `jump` is set when the sample could not be
    /// explained by recent motion.
    Position { jump: bool },
    /// World-frame, gravity-compensated acceleration.
    Inertial {
        acceleration: Vec3,
        orientation: Option<Orientation>,
    },
}

/// One entry of the measurement buffer.
///
/// `timestamp` is fixed at construction; `position` and `speed` are the
/// derived state and get rewritten by re-propagation.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Measurement {
    pub timestamp: f64,
    pub position: Vec3,
    pub speed: Vec3,
    pub kind: MeasurementKind,
}

impl Measurement {
    pub fn position(timestamp: f64, position: Vec3) -> Self {
        Self {
            timestamp,
            position,
            speed: Vec3::zeros(),
            kind: MeasurementKind::Position { jump: false },
        }
    }

    pub fn inertial(timestamp: f64, acceleration: Vec3, orientation: Option<Orientation>) -> Self {
        Self {
            timestamp,
            position: Vec3::zeros(),
            speed: Vec3::zeros(),
            kind: MeasurementKind::Inertial {
                acceleration,
                orientation,
            },
        }
    }

    pub fn is_position(&self) -> bool {
        matches!(self.kind, MeasurementKind::Position { .. })
    }

    pub fn is_inertial(&self) -> bool {
        matches!(self.kind, MeasurementKind::Inertial { .. })
    }

    pub fn is_jump(&self) -> bool {
        matches!(self.kind, MeasurementKind::Position { jump: true })
    }

    pub fn acceleration(&self) -> Option<Vec3> {
        match self.kind {
            MeasurementKind::Inertial { acceleration, .. } => Some(acceleration),
            MeasurementKind::Position { .. } => None,
        }
    }

    pub fn orientation(&self) -> Option<Orientation> {
        match self.kind {
            MeasurementKind::Inertial { orientation, .. } => orientation,
            MeasurementKind::Position { .. } => None,
        }
    }

    pub fn mark_jump(&mut self) {
        if let MeasurementKind::Position { ref mut jump } = self.kind {
            *jump = true;
        }
    }
}

/// Decoded sample as handed over by the transport layer, also the record
/// format of recorded sessions.
///
/// `timestamp` is the arrival time on the host clock. Exactly one of
/// `position` / `acceleration` is expected; `orientation` is `[w, x, y, z]`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TagReading {
    pub timestamp: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<[f64; 3]>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub acceleration: Option<[f64; 3]>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub orientation: Option<[f64; 4]>,
}

impl TagReading {
    pub fn position(timestamp: f64, position: Vec3) -> Self {
        Self {
            timestamp,
            position: Some([position.x, position.y, position.z]),
            acceleration: None,
            orientation: None,
        }
    }

    pub fn acceleration(timestamp: f64, acceleration: Vec3) -> Self {
        Self {
            timestamp,
            position: None,
            acceleration: Some([acceleration.x, acceleration.y, acceleration.z]),
            orientation: None,
        }
    }

    pub fn with_orientation(mut self, orientation: Orientation) -> Self {
        let q = orientation.quaternion();
        self.orientation = Some([q.w, q.i, q.j, q.k]);
        self
    }

    pub fn position_vec(&self) -> Option<Vec3> {
        self.position.map(|[x, y, z]| Vec3::new(x, y, z))
    }

    pub fn acceleration_vec(&self) -> Option<Vec3> {
        self.acceleration.map(|[x, y, z]| Vec3::new(x, y, z))
    }

    /// Recorded orientation, `None` when absent, degenerate (zero norm) or
    /// not finite.
    pub fn orientation_quat(&self) -> Option<Orientation> {
        self.orientation
            .filter(|q| q.iter().all(|c| c.is_finite()))
            .and_then(|[w, x, y, z]| Orientation::try_new(Quaternion::new(w, x, y, z), f64::EPSILON))
    }
}

/// On-disk layout of a recorded session (`.json` or `.json.gz`).
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct RecordedSession {
    pub readings: Vec<TagReading>,
}
