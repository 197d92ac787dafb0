/// Trial window around an alignment point, all in ticks of one timescale.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TimeFrame {
    pub start: i64,
    pub align: i64,
    pub end: i64,
    pub before: i64,
    pub after: i64,
}
impl TimeFrame {
    pub fn lower_bound(&self) -> i64 {
        self.start - self.before
    }
    pub fn upper_bound(&self) -> i64 {
        self.end + self.after
    }
}
/// Fixed-capacity ring of spike timestamps for one sorted unit.
#[derive(Clone, Debug)]
pub struct SpikeCircularBuffer {
    timestamps: Vec<i64>,
    ptr: usize,
    num_stored: usize,
}
impl SpikeCircularBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            timestamps: vec![0; capacity.max(1)],
            ptr: 0,
            num_stored: 0,
        }
    }
    pub fn add(&mut self, timestamp: i64) {
        let cap = self.capacity();
        self.timestamps[self.ptr] = timestamp;
        self.ptr = (self.ptr + 1) % cap;
        self.num_stored = (self.num_stored + 1).min(cap);
    }
    pub fn capacity(&self) -> usize {
        self.timestamps.len()
    }
    pub fn len(&self) -> usize {
        self.num_stored
    }
    pub fn is_empty(&self) -> bool {
        self.num_stored == 0
    }
    /// Slot the next spike will be written to.
    pub fn pointer(&self) -> usize {
        self.ptr
    }
    /// Stored timestamps, oldest first.
    pub fn iter(&self) -> impl Iterator<Item = i64> + '_ {
        let cap = self.capacity();
        let first = (self.ptr + cap - self.num_stored) % cap;
        (0..self.num_stored).map(move |k| self.timestamps[(first + k) % cap])
    }
    /// Spike times within `[start - before, end + after]`, relative to `align`, sorted.
    ///
    /// `saved_ptr` is the write cursor captured when the trial started. Slots before it
    /// are scanned backwards and slots after it forwards, each walk stopping as soon as it
    /// leaves the window, so no slot is counted twice and the cost stays proportional to
    /// the spikes near the trial.
    pub fn aligned_spikes_in_time_frame(&self, saved_ptr: usize, frame: &TimeFrame) -> Vec<i64> {
        let cap = self.capacity();
        let (lo, hi) = (frame.lower_bound(), frame.upper_bound());
        let saved = saved_ptr % cap;
        let newer = ((self.ptr + cap - saved) % cap).min(self.num_stored);
        let older = self.num_stored - newer;
        let mut out = Vec::new();
        for back in 1..=older {
            let ts = self.timestamps[(saved + cap - back) % cap];
            if ts < lo || ts > hi {
                break;
            }
            out.push(ts - frame.align);
        }
        for fwd in 0..newer {
            let ts = self.timestamps[(saved + fwd) % cap];
            if ts > hi {
                break;
            }
            if ts >= lo {
                out.push(ts - frame.align);
            }
        }
        out.sort_unstable();
        out
    }
}
#[cfg(test)]
mod tests {
    use super::*;
    fn frame(align: i64, before: i64, after: i64) -> TimeFrame {
        TimeFrame {
            start: align,
            align,
            end: align,
            before,
            after,
        }
    }
    #[test]
    fn overwrites_oldest_when_full() {
        let mut buf = SpikeCircularBuffer::new(4);
        for ts in 1..=6 {
            buf.add(ts);
        }
        assert_eq!(buf.len(), 4);
        assert_eq!(buf.pointer(), 2);
        assert_eq!(buf.iter().collect::<Vec<_>>(), vec![3, 4, 5, 6]);
    }
    #[test]
    fn collects_before_and_after_cursor() {
        let mut buf = SpikeCircularBuffer::new(16);
        for ts in [10, 90, 95] {
            buf.add(ts);
        }
        let cursor = buf.pointer();
        for ts in [101, 150, 400] {
            buf.add(ts);
        }
        let spikes = buf.aligned_spikes_in_time_frame(cursor, &frame(100, 20, 100));
        assert_eq!(spikes, vec![-10, -5, 1, 50]);
    }
    #[test]
    fn backward_walk_stops_at_first_out_of_window_spike() {
        let mut buf = SpikeCircularBuffer::new(16);
        // 50 is inside the window but lies behind 20, which is not
        for ts in [50, 20, 95] {
            buf.add(ts);
        }
        let cursor = buf.pointer();
        let spikes = buf.aligned_spikes_in_time_frame(cursor, &frame(100, 60, 10));
        assert_eq!(spikes, vec![-5]);
    }
    #[test]
    fn wrapped_buffer_never_double_counts() {
        let mut buf = SpikeCircularBuffer::new(4);
        buf.add(1);
        let cursor = buf.pointer();
        for ts in 2..=9 {
            buf.add(ts);
        }
        // stale cursor after two wraps; each stored spike still shows up once
        let spikes = buf.aligned_spikes_in_time_frame(cursor, &frame(0, 0, 100));
        let mut expected: Vec<i64> = buf.iter().collect();
        expected.sort_unstable();
        assert_eq!(spikes, expected);
    }
    #[test]
    fn window_spans_from_trial_start_to_trial_end() {
        let mut buf = SpikeCircularBuffer::new(16);
        let cursor = buf.pointer();
        for ts in [120, 150, 250, 340, 400] {
            buf.add(ts);
        }
        let frame = TimeFrame { start: 100, align: 100, end: 300, before: 20, after: 50 };
        assert_eq!(buf.aligned_spikes_in_time_frame(cursor, &frame), vec![20, 50, 150, 240]);
    }
    #[test]
    fn offsets_are_relative_to_alignment_inside_the_trial() {
        let mut buf = SpikeCircularBuffer::new(16);
        for ts in [60, 85] {
            buf.add(ts);
        }
        let cursor = buf.pointer();
        for ts in [130, 200, 290, 330] {
            buf.add(ts);
        }
        // align falls between start and end
        let frame = TimeFrame { start: 100, align: 180, end: 280, before: 20, after: 10 };
        assert_eq!(buf.aligned_spikes_in_time_frame(cursor, &frame), vec![-95, -50, 20, 110]);
    }
    #[test]
    fn empty_window_when_no_spikes() {
        let buf = SpikeCircularBuffer::new(8);
        assert!(buf.aligned_spikes_in_time_frame(0, &frame(100, 10, 10)).is_empty());
    }
}
