use std::collections::VecDeque;
use std::time::Duration;
use ndarray::Array2;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use crate::acquisition::CoreError;
use crate::clock::samples_to_ticks;
use crate::types::StampedMessage;
/// Single block of multi-channel samples handed over by the acquisition callback.
#[derive(Clone, Debug)]
pub struct SampleBlock {
    /// Sample counter of the first sample.
    pub hardware_timestamp: i64,
    /// Software ticks at the first sample.
    pub software_timestamp: i64,
    pub sample_rate_hz: f32,
    pub samples: Array2<f32>, // channels x samples, microvolts
}
impl SampleBlock {
    pub fn new(hardware_timestamp: i64, software_timestamp: i64, sample_rate_hz: f32, samples: Array2<f32>) -> Self {
        Self {
            hardware_timestamp,
            software_timestamp,
            sample_rate_hz,
            samples,
        }
    }
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.sample_rate_hz <= 0.0 {
            return Err(CoreError::InvalidSampleRate);
        }
        Ok(())
    }
    pub fn num_channels(&self) -> usize {
        self.samples.nrows()
    }
    pub fn num_samples(&self) -> usize {
        self.samples.ncols()
    }
    pub fn duration(&self) -> Duration {
        Duration::from_secs_f64(self.num_samples() as f64 / self.sample_rate_hz as f64)
    }
    pub fn software_timestamp_at(&self, offset: usize, ticks_per_second: f64) -> i64 {
        self.software_timestamp + samples_to_ticks(offset as i64, self.sample_rate_hz, ticks_per_second)
    }
}
/// Anything that yields sample blocks on demand.
pub trait SignalSource {
    fn next_block(&mut self) -> Result<Option<SampleBlock>, CoreError>;
}
/// In-memory source useful for tests and deterministic playback.
pub struct ManualSource {
    queue: VecDeque<SampleBlock>,
}
impl ManualSource {
    pub fn new(blocks: impl IntoIterator<Item = SampleBlock>) -> Self {
        Self {
            queue: blocks.into_iter().collect(),
        }
    }
    pub fn push(&mut self, block: SampleBlock) {
        self.queue.push_back(block);
    }
}
impl SignalSource for ManualSource {
    fn next_block(&mut self) -> Result<Option<SampleBlock>, CoreError> {
        Ok(self.queue.pop_front())
    }
}
#[derive(Clone, Debug)]
pub struct SimulationParams {
    pub sample_rate_hz: f32,
    pub num_channels: usize,
    pub block_size: usize,
    pub software_ticks_per_second: u64,
    pub noise_uv: f32,
    pub spike_amplitude_uv: f32,
    /// Channel that carries the injected unit.
    pub spike_channel: usize,
    pub baseline_rate_hz: f64,
    /// Firing rate during the first half of trials of type 1.
    pub evoked_rate_hz: f64,
    pub trial_period_sec: f64,
    pub trial_length_sec: f64,
    pub ttl_period_sec: f64,
    pub seed: u64,
}
impl Default for SimulationParams {
    fn default() -> Self {
        Self {
            sample_rate_hz: 30_000.0,
            num_channels: 16,
            block_size: 1024,
            software_ticks_per_second: 1_000_000,
            noise_uv: 8.0,
            spike_amplitude_uv: 120.0,
            spike_channel: 0,
            baseline_rate_hz: 5.0,
            evoked_rate_hz: 80.0,
            trial_period_sec: 1.0,
            trial_length_sec: 0.5,
            ttl_period_sec: 2.0,
            seed: 7,
        }
    }
}
// 单个尖峰的波形（负相主峰 + 正相复极）
const SPIKE_SHAPE: [f32; 12] = [-0.1, -0.35, -0.8, -1.0, -0.7, -0.3, 0.1, 0.3, 0.35, 0.25, 0.12, 0.05];
/// Synthetic recording: gaussian-ish noise, one injected unit whose rate rises in
/// type-1 trials, and the trial/TTL messages a behavioural controller would send.
pub struct SimulatedSource {
    params: SimulationParams,
    rng: StdRng,
    samples_emitted: i64,
    next_trial_sample: i64,
    trial_index: u64,
    next_ttl_sample: i64,
    evoked_until: i64,
    tail: Vec<f32>,
    messages: Vec<StampedMessage>,
}
impl SimulatedSource {
    pub fn new(params: SimulationParams) -> Self {
        let rng = StdRng::seed_from_u64(params.seed);
        let next_trial_sample = (params.trial_period_sec * 0.5 * params.sample_rate_hz as f64) as i64;
        let next_ttl_sample = (params.ttl_period_sec * params.sample_rate_hz as f64) as i64;
        Self {
            params,
            rng,
            samples_emitted: 0,
            next_trial_sample,
            trial_index: 0,
            next_ttl_sample,
            evoked_until: -1,
            tail: Vec::new(),
            messages: Vec::new(),
        }
    }
    pub fn params(&self) -> &SimulationParams {
        &self.params
    }
    /// Messages emitted alongside the blocks produced so far, in timestamp order.
    pub fn drain_messages(&mut self) -> Vec<StampedMessage> {
        std::mem::take(&mut self.messages)
    }
    fn ticks_at(&self, sample: i64) -> i64 {
        samples_to_ticks(sample, self.params.sample_rate_hz, self.params.software_ticks_per_second as f64)
    }
    fn schedule_events(&mut self, block_end: i64) {
        let sr = self.params.sample_rate_hz as f64;
        while self.next_trial_sample < block_end {
            let start = self.next_trial_sample;
            let end = start + (self.params.trial_length_sec * sr) as i64;
            let trial_type = 1 + (self.trial_index % 2) as i32;
            if trial_type == 1 {
                self.evoked_until = start + (self.params.trial_length_sec * 0.5 * sr) as i64;
            }
            let (start_ts, end_ts) = (self.ticks_at(start), self.ticks_at(end));
            self.messages.push(StampedMessage::new("trialstart", start_ts));
            self.messages.push(StampedMessage::new(format!("trialtype {trial_type}"), start_ts));
            self.messages.push(StampedMessage::new("trialoutcome 1", end_ts));
            self.messages.push(StampedMessage::new("trialend", end_ts));
            self.trial_index += 1;
            self.next_trial_sample += (self.params.trial_period_sec * sr) as i64;
        }
        while self.params.ttl_period_sec > 0.0 && self.next_ttl_sample < block_end {
            let ts = self.ticks_at(self.next_ttl_sample);
            self.messages.push(StampedMessage::new("ttl 0 1", ts));
            self.next_ttl_sample += (self.params.ttl_period_sec * sr) as i64;
        }
        self.messages.sort_by_key(|m| m.timestamp);
    }
}
impl SignalSource for SimulatedSource {
    fn next_block(&mut self) -> Result<Option<SampleBlock>, CoreError> {
        let p = &self.params;
        if p.sample_rate_hz <= 0.0 {
            return Err(CoreError::InvalidSampleRate);
        }
        if p.spike_channel >= p.num_channels {
            return Err(CoreError::ChannelOutOfRange {
                channel: p.spike_channel,
                available: p.num_channels,
            });
        }
        let (n, channels) = (p.block_size, p.num_channels);
        let start = self.samples_emitted;
        self.schedule_events(start + n as i64);
        let p = &self.params;
        let mut samples = Array2::<f32>::zeros((channels, n));
        for v in samples.iter_mut() {
            // sum of uniforms, close enough to gaussian for a demo
            let u: f32 = (0..4).map(|_| self.rng.gen_range(-1.0f32..1.0)).sum();
            *v = u * p.noise_uv * 0.5;
        }
        let spike_ch = p.spike_channel;
        for (k, v) in std::mem::take(&mut self.tail).into_iter().enumerate().take(n) {
            samples[[spike_ch, k]] += v;
        }
        let dt = 1.0 / p.sample_rate_hz as f64;
        let mut k = 0;
        while k < n {
            let sample = start + k as i64;
            let rate = if sample < self.evoked_until { p.evoked_rate_hz } else { p.baseline_rate_hz };
            if self.rng.gen_bool((rate * dt).clamp(0.0, 1.0)) {
                for (j, shape) in SPIKE_SHAPE.iter().enumerate() {
                    let v = shape * p.spike_amplitude_uv;
                    if k + j < n {
                        samples[[spike_ch, k + j]] += v;
                    } else {
                        self.tail.push(v);
                    }
                }
                k += SPIKE_SHAPE.len();
            } else {
                k += 1;
            }
        }
        let block = SampleBlock::new(start, self.ticks_at(start), p.sample_rate_hz, samples);
        self.samples_emitted += n as i64;
        Ok(Some(block))
    }
}
