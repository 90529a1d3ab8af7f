use crate::types::{fade_to_zero, unit_ratio, Vec3};

/// Spatial discontinuity left by a retroactive correction, faded out
/// linearly instead of being shown as a snap.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CorrectionOffset {
    pub start_timestamp: f64,
    pub offset: Vec3,
    pub decay_duration: f64,
}

impl CorrectionOffset {
    /// `decay_per_unit` seconds of fade per unit of offset magnitude.
    pub fn new(start_timestamp: f64, offset: Vec3, decay_per_unit: f64) -> Self {
        Self {
            start_timestamp,
            offset,
            decay_duration: decay_per_unit * offset.norm(),
        }
    }

    pub fn magnitude(&self) -> f64 {
        self.offset.norm()
    }

    /// Remaining offset at `timestamp`: full before the start, zero after
    /// the decay window.
    pub fn value_at(&self, timestamp: f64) -> Vec3 {
        let elapsed = timestamp - self.start_timestamp;
        fade_to_zero(&self.offset, unit_ratio(elapsed, self.decay_duration))
    }

    pub fn is_expired(&self, timestamp: f64) -> bool {
        timestamp - self.start_timestamp > self.decay_duration
    }
}

#[derive(Clone, Debug, Default)]
pub struct OffsetSet {
    offsets: Vec<CorrectionOffset>,
}

impl OffsetSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, offset: CorrectionOffset) {
        self.offsets.push(offset);
    }

    pub fn len(&self) -> usize {
        self.offsets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.offsets.is_empty()
    }

    pub fn clear(&mut self) {
        self.offsets.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = &CorrectionOffset> {
        self.offsets.iter()
    }

    /// Sum of every active offset at `timestamp`, then drop the ones whose
    /// window is over.
    pub fn total_at(&mut self, timestamp: f64) -> Vec3 {
        let total = self
            .offsets
            .iter()
            .fold(Vec3::zeros(), |acc, off| acc + off.value_at(timestamp));
        self.offsets.retain(|off| !off.is_expired(timestamp));
        total
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_decay_duration_scales_with_magnitude() {
        let off = CorrectionOffset::new(2.0, Vec3::new(0.0, 0.1, 0.0), 1.5);
        assert!((off.decay_duration - 0.15).abs() < 1e-12);
        assert!((off.magnitude() - 0.1).abs() < 1e-12);
    }

    #[test]
    fn test_offset_reaches_zero_at_end_of_window() {
        let off = CorrectionOffset::new(1.0, Vec3::new(0.3, -0.4, 0.0), 1.5);
        assert_abs_diff_eq!(off.value_at(1.0), off.offset, epsilon = 1e-12);
        assert_abs_diff_eq!(
            off.value_at(1.0 + off.decay_duration / 2.0),
            off.offset * 0.5,
            epsilon = 1e-9
        );
        assert!(off.value_at(1.0 + off.decay_duration).norm() < 1e-9);
        assert!(!off.is_expired(1.0 + off.decay_duration));
        assert!(off.is_expired(1.0 + off.decay_duration + 1e-6));
    }

    #[test]
    fn test_offset_magnitude_never_grows() {
        let off = CorrectionOffset::new(0.0, Vec3::new(0.05, 0.0, 0.02), 1.5);
        let mut previous = f64::INFINITY;
        for i in 0..200 {
            let m = off.value_at(i as f64 * 0.001).norm();
            assert!(m <= previous + 1e-15);
            previous = m;
        }
        assert!(previous < 1e-12);
    }

    #[test]
    fn test_zero_offset_is_inert() {
        let off = CorrectionOffset::new(0.0, Vec3::zeros(), 1.5);
        assert_eq!(off.decay_duration, 0.0);
        assert_abs_diff_eq!(off.value_at(0.0), Vec3::zeros(), epsilon = 1e-12);
    }

    #[test]
    fn test_set_sums_and_prunes() {
        let mut set = OffsetSet::new();
        set.push(CorrectionOffset::new(0.0, Vec3::new(0.1, 0.0, 0.0), 1.5));
        set.push(CorrectionOffset::new(0.0, Vec3::new(0.0, 1.0, 0.0), 1.5));

        let total = set.total_at(0.0);
        assert_abs_diff_eq!(total, Vec3::new(0.1, 1.0, 0.0), epsilon = 1e-12);
        assert_eq!(set.len(), 2);

        // First window (0.15 s) is over, second (1.5 s) still running
        let total = set.total_at(0.75);
        assert_abs_diff_eq!(total, Vec3::new(0.0, 0.5, 0.0), epsilon = 1e-9);
        assert_eq!(set.len(), 1);

        set.total_at(2.0);
        assert!(set.is_empty());
    }
}
