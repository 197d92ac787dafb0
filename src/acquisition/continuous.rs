use ndarray::{Array2, ArrayView2};
use serde::Serialize;
use crate::acquisition::{CoreError, SampleBlock};
use crate::clock::samples_to_ticks;
use crate::types::Timescale;
/// Subsampled multi-channel history with both timestamps stored per slot.
///
/// Only every `subsampling`-th sample is kept; the phase carries over between blocks so
/// the kept samples are evenly spaced across block boundaries. Full buffers overwrite
/// their oldest slot.
pub struct ContinuousCircularBuffer {
    num_channels: usize,
    sample_rate_hz: f32,
    software_ticks_per_second: f64,
    subsampling: usize,
    data: Array2<f32>, // channels x capacity
    hardware_ts: Vec<i64>,
    software_ts: Vec<i64>,
    ptr: usize,
    num_valid: usize,
    leftover: usize,
}
/// Samples of one window, relative to the alignment point.
#[derive(Clone, Debug, Default, Serialize)]
pub struct ContinuousWindow {
    pub time_sec: Vec<f64>,
    pub data: Vec<Vec<f32>>, // channels x samples
}
impl ContinuousWindow {
    pub fn is_empty(&self) -> bool {
        self.time_sec.is_empty()
    }
}
impl ContinuousCircularBuffer {
    pub fn new(
        num_channels: usize,
        sample_rate_hz: f32,
        subsampling: usize,
        buffer_seconds: f64,
        software_ticks_per_second: f64,
    ) -> Result<Self, CoreError> {
        if sample_rate_hz <= 0.0 {
            return Err(CoreError::InvalidSampleRate);
        }
        if subsampling == 0 || buffer_seconds <= 0.0 {
            return Err(CoreError::InvalidConfig(
                "continuous buffer needs a positive subsampling factor and duration".into(),
            ));
        }
        let capacity = ((sample_rate_hz as f64 * buffer_seconds) / subsampling as f64).ceil().max(1.0) as usize;
        Ok(Self {
            num_channels,
            sample_rate_hz,
            software_ticks_per_second,
            subsampling,
            data: Array2::zeros((num_channels, capacity)),
            hardware_ts: vec![0; capacity],
            software_ts: vec![0; capacity],
            ptr: 0,
            num_valid: 0,
            leftover: 0,
        })
    }
    pub fn update(&mut self, block: &SampleBlock) -> Result<(), CoreError> {
        block.validate()?;
        if (block.sample_rate_hz - self.sample_rate_hz).abs() > f32::EPSILON {
            return Err(CoreError::SampleRateMismatch {
                expected: self.sample_rate_hz,
                actual: block.sample_rate_hz,
            });
        }
        self.update_raw(block.samples.view(), block.hardware_timestamp, block.software_timestamp)
    }
    /// Appends `samples` (channels x n). `hardware_base`/`software_base` stamp the first column.
    pub fn update_raw(&mut self, samples: ArrayView2<f32>, hardware_base: i64, software_base: i64) -> Result<(), CoreError> {
        if samples.nrows() != self.num_channels {
            return Err(CoreError::ChannelMismatch {
                expected: self.num_channels,
                actual: samples.nrows(),
            });
        }
        let n = samples.ncols();
        let capacity = self.capacity();
        let mut k = self.leftover;
        while k < n {
            for ch in 0..self.num_channels {
                self.data[[ch, self.ptr]] = samples[[ch, k]];
            }
            self.hardware_ts[self.ptr] = hardware_base + k as i64;
            self.software_ts[self.ptr] =
                software_base + samples_to_ticks(k as i64, self.sample_rate_hz, self.software_ticks_per_second);
            self.ptr = (self.ptr + 1) % capacity;
            self.num_valid = (self.num_valid + 1).min(capacity);
            k += self.subsampling;
        }
        self.leftover = k - n;
        Ok(())
    }
    pub fn num_channels(&self) -> usize {
        self.num_channels
    }
    pub fn capacity(&self) -> usize {
        self.hardware_ts.len()
    }
    pub fn len(&self) -> usize {
        self.num_valid
    }
    pub fn is_empty(&self) -> bool {
        self.num_valid == 0
    }
    /// Next slot to be written.
    pub fn pointer(&self) -> usize {
        self.ptr
    }
    pub fn latest_hardware_timestamp(&self) -> Option<i64> {
        self.slot_index(0).map(|i| self.hardware_ts[i])
    }
    /// `(hardware, software, values)` of the slot `age` writes ago; 0 is the newest.
    pub fn sample(&self, age: usize) -> Option<(i64, i64, Vec<f32>)> {
        let i = self.slot_index(age)?;
        Some((self.hardware_ts[i], self.software_ts[i], self.data.column(i).to_vec()))
    }
    fn slot_index(&self, age: usize) -> Option<usize> {
        if age >= self.num_valid {
            return None;
        }
        let cap = self.capacity();
        Some((self.ptr + cap - 1 - age) % cap)
    }
    fn ticks_per_second(&self, timescale: Timescale) -> f64 {
        match timescale {
            Timescale::Software => self.software_ticks_per_second,
            Timescale::Hardware => self.sample_rate_hz as f64,
        }
    }
    /// Samples with timestamps in `[lo, hi]` around the cursor `saved_ptr`, with times
    /// expressed in seconds relative to `align`.
    ///
    /// Slots written before the cursor are walked backwards until they fall before `lo`,
    /// slots written after it forwards until they pass `hi`. The two walks never visit
    /// the same slot.
    pub fn window(&self, saved_ptr: usize, timescale: Timescale, lo: i64, hi: i64, align: i64) -> ContinuousWindow {
        let cap = self.capacity();
        let stamps = match timescale {
            Timescale::Software => &self.software_ts,
            Timescale::Hardware => &self.hardware_ts,
        };
        let saved = saved_ptr % cap;
        let newer = ((self.ptr + cap - saved) % cap).min(self.num_valid);
        let older = self.num_valid - newer;
        let mut slots = Vec::new();
        for back in 1..=older {
            let i = (saved + cap - back) % cap;
            if stamps[i] < lo {
                break;
            }
            if stamps[i] <= hi {
                slots.push(i);
            }
        }
        slots.reverse();
        for fwd in 0..newer {
            let i = (saved + fwd) % cap;
            if stamps[i] > hi {
                break;
            }
            if stamps[i] >= lo {
                slots.push(i);
            }
        }
        let tps = self.ticks_per_second(timescale);
        ContinuousWindow {
            time_sec: slots.iter().map(|&i| (stamps[i] - align) as f64 / tps).collect(),
            data: (0..self.num_channels)
                .map(|ch| slots.iter().map(|&i| self.data[[ch, i]]).collect())
                .collect(),
        }
    }
}
#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array2;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    fn ramp_block(start: i64, n: usize) -> SampleBlock {
        let samples = Array2::from_shape_fn((2, n), |(ch, k)| (start + k as i64) as f32 * if ch == 0 { 1.0 } else { -1.0 });
        SampleBlock::new(start, start * 10, 1000.0, samples)
    }
    #[test]
    fn subsampling_phase_carries_across_blocks() {
        let mut buf = ContinuousCircularBuffer::new(2, 1000.0, 3, 1.0, 10_000.0).unwrap();
        buf.update(&ramp_block(0, 7)).unwrap();
        buf.update(&ramp_block(7, 7)).unwrap();
        // kept samples: 0 3 6 9 12
        assert_eq!(buf.len(), 5);
        let kept: Vec<i64> = (0..5).rev().map(|age| buf.sample(age).unwrap().0).collect();
        assert_eq!(kept, vec![0, 3, 6, 9, 12]);
        let (hw, sw, values) = buf.sample(0).unwrap();
        assert_eq!(hw, 12);
        assert_eq!(sw, 120);
        assert_eq!(values, vec![12.0, -12.0]);
    }
    fn retained(buf: &ContinuousCircularBuffer) -> Vec<(i64, i64, Vec<f32>)> {
        (0..buf.len()).rev().filter_map(|age| buf.sample(age)).collect()
    }
    #[test]
    fn chunking_does_not_change_retained_samples() {
        let total = 500;
        let mut rng = StdRng::seed_from_u64(7);
        for subsampling in [1, 3, 8] {
            let mut single = ContinuousCircularBuffer::new(2, 1000.0, subsampling, 1.0, 10_000.0).unwrap();
            for start in 0..total {
                single.update(&ramp_block(start, 1)).unwrap();
            }
            let mut chunked = ContinuousCircularBuffer::new(2, 1000.0, subsampling, 1.0, 10_000.0).unwrap();
            let mut start = 0;
            while start < total {
                let n = rng.gen_range(1..=23).min((total - start) as usize);
                chunked.update(&ramp_block(start, n)).unwrap();
                start += n as i64;
            }
            let expected = retained(&single);
            assert_eq!(expected.len(), (total as usize + subsampling - 1) / subsampling);
            assert_eq!(retained(&chunked), expected);
            assert_eq!(chunked.pointer(), single.pointer());
        }
    }
    #[test]
    fn wraps_and_keeps_newest() {
        let mut buf = ContinuousCircularBuffer::new(2, 1000.0, 1, 0.005, 10_000.0).unwrap();
        assert_eq!(buf.capacity(), 5);
        buf.update(&ramp_block(0, 8)).unwrap();
        assert_eq!(buf.len(), 5);
        assert_eq!(buf.pointer(), 3);
        assert_eq!(buf.latest_hardware_timestamp(), Some(7));
        assert_eq!(buf.sample(4).unwrap().0, 3);
        assert!(buf.sample(5).is_none());
    }
    #[test]
    fn window_collects_both_sides_of_cursor() {
        let mut buf = ContinuousCircularBuffer::new(2, 1000.0, 1, 1.0, 10_000.0).unwrap();
        buf.update(&ramp_block(0, 10)).unwrap();
        let cursor = buf.pointer();
        buf.update(&ramp_block(10, 10)).unwrap();
        let w = buf.window(cursor, Timescale::Hardware, 7, 12, 10);
        assert_eq!(w.time_sec, vec![-0.003, -0.002, -0.001, 0.0, 0.001, 0.002]);
        assert_eq!(w.data[0], vec![7.0, 8.0, 9.0, 10.0, 11.0, 12.0]);
        assert_eq!(w.data[1][0], -7.0);
    }
    #[test]
    fn rejects_wrong_channel_count() {
        let mut buf = ContinuousCircularBuffer::new(3, 1000.0, 1, 1.0, 10_000.0).unwrap();
        assert!(matches!(
            buf.update(&ramp_block(0, 4)),
            Err(CoreError::ChannelMismatch { expected: 3, actual: 2 })
        ));
    }
}
