//! Fixed-capacity measurement history, newest entry first.
//!
//! Logical index 0 is the newest sample. Storage is a boxed slot array
//! with a moving head, so pushing at the front is O(1) and evicts the
//! oldest entry once the ring is full. Out-of-order arrivals are fixed up
//! by bubbling the new entry backward, which stays cheap because network
//! disorder is local.

use crate::types::Measurement;

pub struct MeasurementBuffer {
    slots: Box<[Option<Measurement>]>,
    head: usize,
    len: usize,
}

impl MeasurementBuffer {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            slots: vec![None; capacity].into_boxed_slice(),
            head: 0,
            len: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn is_full(&self) -> bool {
        self.len == self.capacity()
    }

    pub fn clear(&mut self) {
        self.slots.iter_mut().for_each(|slot| *slot = None);
        self.head = 0;
        self.len = 0;
    }

    fn physical(&self, index: usize) -> usize {
        (self.head + index) % self.capacity()
    }

    pub fn get(&self, index: usize) -> Option<&Measurement> {
        if index >= self.len {
            return None;
        }
        self.slots[self.physical(index)].as_ref()
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut Measurement> {
        if index >= self.len {
            return None;
        }
        let slot = self.physical(index);
        self.slots[slot].as_mut()
    }

    /// Newest entry.
    pub fn front(&self) -> Option<&Measurement> {
        self.get(0)
    }

    /// Iterate newest to oldest.
    pub fn iter(&self) -> impl Iterator<Item = &Measurement> + '_ {
        (0..self.len).filter_map(move |i| self.get(i))
    }

    fn swap(&mut self, a: usize, b: usize) {
        let (pa, pb) = (self.physical(a), self.physical(b));
        self.slots.swap(pa, pb);
    }

    fn push_front(&mut self, measurement: Measurement) {
        let capacity = self.capacity();
        self.head = (self.head + capacity - 1) % capacity;
        // When full the new head slot is the oldest entry: overwrite evicts it.
        self.slots[self.head] = Some(measurement);
        if self.len < capacity {
            self.len += 1;
        }
    }

    /// Insert keeping newest-first order and return the resulting index.
    ///
    /// The entry starts at the front and moves backward while the entry
    /// behind it is strictly newer. Equal timestamps stop the walk, so the
    /// later arrival sits in front of an earlier one with the same stamp.
    pub fn insert(&mut self, measurement: Measurement) -> usize {
        self.push_front(measurement);
        let mut index = 0;
        while index + 1 < self.len {
            let current = self.slots[self.physical(index)].map(|m| m.timestamp);
            let behind = self.slots[self.physical(index + 1)].map(|m| m.timestamp);
            match (current, behind) {
                (Some(current), Some(behind)) if current < behind => {
                    self.swap(index, index + 1);
                    index += 1;
                }
                _ => break,
            }
        }
        index
    }

    /// Remove the entry at `index`, shifting older entries forward.
    pub fn remove(&mut self, index: usize) -> Option<Measurement> {
        if index >= self.len {
            return None;
        }
        let slot = self.physical(index);
        let removed = self.slots[slot].take();
        for i in index..self.len - 1 {
            let (to, from) = (self.physical(i), self.physical(i + 1));
            self.slots[to] = self.slots[from].take();
        }
        self.len -= 1;
        removed
    }

    // ── Scans (newest first, bounded by capacity) ────────────────────────

    pub fn last_position_index(&self) -> Option<usize> {
        self.iter().position(|m| m.is_position())
    }

    pub fn last_position_timestamp(&self) -> Option<f64> {
        self.last_position_index()
            .and_then(|i| self.get(i))
            .map(|m| m.timestamp)
    }

    pub fn last_inertial_index(&self) -> Option<usize> {
        self.iter().position(|m| m.is_inertial())
    }

    pub fn last_inertial_timestamp(&self) -> Option<f64> {
        self.last_inertial_index()
            .and_then(|i| self.get(i))
            .map(|m| m.timestamp)
    }

    /// First Position entry strictly older than `index`.
    pub fn previous_position_index(&self, index: usize) -> Option<usize> {
        (index + 1..self.len).find(|&i| self.get(i).map_or(false, |m| m.is_position()))
    }

    /// Newest Position entry strictly newer than `index`.
    pub fn newer_position_index(&self, index: usize) -> Option<usize> {
        (0..index.min(self.len)).find(|&i| self.get(i).map_or(false, |m| m.is_position()))
    }

    /// Inertial entries older than `index` but strictly newer than
    /// `timestamp`, newest first.
    pub fn inertial_since(&self, index: usize, timestamp: f64) -> Vec<usize> {
        (index + 1..self.len)
            .take_while(|&i| self.get(i).map_or(false, |m| m.timestamp > timestamp))
            .filter(|&i| self.get(i).map_or(false, |m| m.is_inertial()))
            .collect()
    }

    /// Position entries from `index` (included) back to `window` seconds
    /// before it, newest first.
    pub fn positions_within(&self, index: usize, window: f64) -> Vec<usize> {
        let start = match self.get(index) {
            Some(m) => m.timestamp,
            None => return Vec::new(),
        };
        (index..self.len)
            .take_while(|&i| self.get(i).map_or(false, |m| start - m.timestamp < window))
            .filter(|&i| self.get(i).map_or(false, |m| m.is_position()))
            .collect()
    }
}

impl std::ops::Index<usize> for MeasurementBuffer {
    type Output = Measurement;

    fn index(&self, index: usize) -> &Measurement {
        match self.get(index) {
            Some(m) => m,
            None => panic!("buffer index {} out of range (len {})", index, self.len),
        }
    }
}

impl std::ops::IndexMut<usize> for MeasurementBuffer {
    fn index_mut(&mut self, index: usize) -> &mut Measurement {
        let len = self.len;
        match self.get_mut(index) {
            Some(m) => m,
            None => panic!("buffer index {} out of range (len {})", index, len),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Vec3;

    fn pos(ts: f64) -> Measurement {
        Measurement::position(ts, Vec3::zeros())
    }

    fn imu(ts: f64) -> Measurement {
        Measurement::inertial(ts, Vec3::zeros(), None)
    }

    fn timestamps(buffer: &MeasurementBuffer) -> Vec<f64> {
        buffer.iter().map(|m| m.timestamp).collect()
    }

    #[test]
    fn test_in_order_inserts_land_at_front() {
        let mut buffer = MeasurementBuffer::new(10);
        assert_eq!(buffer.insert(imu(1.0)), 0);
        assert_eq!(buffer.insert(imu(1.01)), 0);
        assert_eq!(buffer.insert(imu(1.02)), 0);
        assert_eq!(timestamps(&buffer), vec![1.02, 1.01, 1.0]);
    }

    #[test]
    fn test_late_sample_bubbles_back() {
        let mut buffer = MeasurementBuffer::new(10);
        buffer.insert(imu(1.0));
        buffer.insert(imu(1.012));
        buffer.insert(imu(1.02));
        // Latency-corrected position lands behind newer inertial samples
        assert_eq!(buffer.insert(pos(1.005)), 2);
        assert_eq!(timestamps(&buffer), vec![1.02, 1.012, 1.005, 1.0]);
        // Older than everything: goes to the back
        assert_eq!(buffer.insert(pos(0.9)), 4);
        assert_eq!(timestamps(&buffer), vec![1.02, 1.012, 1.005, 1.0, 0.9]);
    }

    #[test]
    fn test_equal_timestamps_keep_both() {
        let mut buffer = MeasurementBuffer::new(10);
        buffer.insert(imu(1.0));
        assert_eq!(buffer.insert(pos(1.0)), 0);
        assert_eq!(buffer.len(), 2);
        assert!(buffer[0].is_position());
        assert!(buffer[1].is_inertial());
    }

    #[test]
    fn test_eviction_when_full() {
        let mut buffer = MeasurementBuffer::new(3);
        for i in 0..5 {
            buffer.insert(imu(i as f64));
        }
        assert!(buffer.is_full());
        assert_eq!(timestamps(&buffer), vec![4.0, 3.0, 2.0]);
    }

    #[test]
    fn test_remove_shifts_older_entries() {
        let mut buffer = MeasurementBuffer::new(4);
        for i in 0..6 {
            buffer.insert(imu(i as f64));
        }
        let removed = buffer.remove(1).unwrap();
        assert_eq!(removed.timestamp, 4.0);
        assert_eq!(timestamps(&buffer), vec![5.0, 3.0, 2.0]);
        buffer.insert(imu(6.0));
        assert_eq!(timestamps(&buffer), vec![6.0, 5.0, 3.0, 2.0]);
        assert!(buffer.remove(7).is_none());
    }

    #[test]
    fn test_scans() {
        let mut buffer = MeasurementBuffer::new(16);
        buffer.insert(pos(1.00));
        buffer.insert(imu(1.02));
        buffer.insert(pos(1.05));
        buffer.insert(imu(1.06));
        buffer.insert(imu(1.08));
        // [1.08 I, 1.06 I, 1.05 P, 1.02 I, 1.00 P]
        assert_eq!(buffer.last_position_index(), Some(2));
        assert_eq!(buffer.last_position_timestamp(), Some(1.05));
        assert_eq!(buffer.last_inertial_index(), Some(0));
        assert_eq!(buffer.last_inertial_timestamp(), Some(1.08));
        assert_eq!(buffer.previous_position_index(2), Some(4));
        assert_eq!(buffer.previous_position_index(4), None);
        assert_eq!(buffer.newer_position_index(3), Some(2));
        assert_eq!(buffer.newer_position_index(2), None);
        assert_eq!(buffer.inertial_since(2, 1.01), vec![3]);
        assert_eq!(buffer.inertial_since(2, 1.03), Vec::<usize>::new());
        assert_eq!(buffer.positions_within(2, 0.1), vec![2, 4]);
        assert_eq!(buffer.positions_within(2, 0.04), vec![2]);
    }

    #[test]
    fn test_empty_buffer_has_no_data() {
        let buffer = MeasurementBuffer::new(8);
        assert!(buffer.is_empty());
        assert!(buffer.front().is_none());
        assert_eq!(buffer.last_position_index(), None);
        assert_eq!(buffer.last_inertial_timestamp(), None);
        assert!(buffer.positions_within(0, 1.0).is_empty());
    }
}
