// src/condition.rs
use serde::{Deserialize, Serialize};

use crate::command::ConditionSpec;
use crate::types::Rgb;

/// Trial types at and above this value come from TTL lines (`base + channel`).
pub const TTL_TRIAL_TYPE_BASE: i32 = 30_000;

/// Set of trial types and outcomes whose trials are averaged together.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    pub id: u32,
    pub name: String,
    pub color: Rgb,
    pub trial_types: Vec<i32>,
    /// Empty matches every outcome.
    pub outcomes: Vec<i32>,
    pub visible: bool,
    pub pre_sec: f64,
    pub post_sec: f64,
}

impl Condition {
    pub fn from_spec(id: u32, spec: ConditionSpec, default_pre_sec: f64, default_post_sec: f64) -> Self {
        Self {
            id,
            name: spec.name,
            color: spec.color.unwrap_or_default(),
            trial_types: spec.trial_types,
            outcomes: spec.outcomes,
            visible: spec.visible,
            pre_sec: spec.pre_sec.unwrap_or(default_pre_sec),
            post_sec: spec.post_sec.unwrap_or(default_post_sec),
        }
    }

    pub fn ttl(id: u32, channel: usize, pre_sec: f64, post_sec: f64) -> Self {
        Self {
            id,
            name: format!("TTL {channel}"),
            color: Rgb::WHITE,
            trial_types: vec![TTL_TRIAL_TYPE_BASE + channel as i32],
            outcomes: Vec::new(),
            visible: true,
            pre_sec,
            post_sec,
        }
    }

    pub fn matches(&self, trial_type: i32, outcome: i32) -> bool {
        self.trial_types.contains(&trial_type) && (self.outcomes.is_empty() || self.outcomes.contains(&outcome))
    }
}

/// Running per-bin average of one response (spike presence or a continuous channel)
/// over the trials of a condition.
#[derive(Clone, Debug)]
pub struct ConditionPsth {
    pre_sec: f64,
    post_sec: f64,
    bin_ms: f64,
    mean: Vec<f64>,
    counts: Vec<u32>,
    num_trials: u32,
}

impl ConditionPsth {
    pub fn new(pre_sec: f64, post_sec: f64, bin_ms: f64) -> Self {
        let num_bins = ((pre_sec + post_sec) * 1000.0 / bin_ms).round().max(1.0) as usize;
        Self {
            pre_sec,
            post_sec,
            bin_ms,
            mean: vec![0.0; num_bins],
            counts: vec![0; num_bins],
            num_trials: 0,
        }
    }

    pub fn num_bins(&self) -> usize {
        self.mean.len()
    }

    pub fn num_trials(&self) -> u32 {
        self.num_trials
    }

    fn span(&self) -> f64 {
        self.pre_sec + self.post_sec
    }

    fn bin_position(&self, t_sec: f64) -> f64 {
        ((t_sec + self.pre_sec) / self.span() * self.num_bins() as f64).floor()
    }

    /// Bin holding `t_sec` (relative to alignment), if inside `[-pre, post)`.
    pub fn bin_index(&self, t_sec: f64) -> Option<usize> {
        let pos = self.bin_position(t_sec);
        (pos >= 0.0 && pos < self.num_bins() as f64).then_some(pos as usize)
    }

    /// Left edge of every bin, in seconds relative to alignment.
    pub fn bin_times(&self) -> Vec<f64> {
        let width = self.span() / self.num_bins() as f64;
        (0..self.num_bins()).map(|k| k as f64 * width - self.pre_sec).collect()
    }

    fn accumulate(&mut self, bin: usize, value: f64) {
        self.counts[bin] += 1;
        self.mean[bin] += (value - self.mean[bin]) / self.counts[bin] as f64;
    }

    /// Adds one trial of spike times. Only bins before `observed_until_sec` count the
    /// trial, so short trials do not dilute bins they never covered.
    pub fn update_spikes(&mut self, offsets_sec: &[f64], observed_until_sec: f64) {
        let mut present = vec![false; self.num_bins()];
        for &t in offsets_sec {
            if let Some(bin) = self.bin_index(t) {
                present[bin] = true;
            }
        }
        let last_bin = self.bin_position(observed_until_sec).clamp(0.0, self.num_bins() as f64) as usize;
        for (bin, &hit) in present.iter().enumerate().take(last_bin) {
            self.accumulate(bin, if hit { 1.0 } else { 0.0 });
        }
        self.num_trials += 1;
    }

    /// Adds one trial of a continuous signal sampled at `bin_times()`; masked bins are skipped.
    /// A trial with no valid bin is not counted.
    pub fn update_continuous(&mut self, values: &[f32], valid: &[bool]) {
        let n = self.num_bins().min(values.len()).min(valid.len());
        let mut used = false;
        for bin in 0..n {
            if valid[bin] {
                self.accumulate(bin, values[bin] as f64);
                used = true;
            }
        }
        if used {
            self.num_trials += 1;
        }
    }

    /// Zeroes the statistics, keeping the bin layout.
    pub fn clear(&mut self) {
        self.mean.iter_mut().for_each(|m| *m = 0.0);
        self.counts.iter_mut().for_each(|c| *c = 0);
        self.num_trials = 0;
    }

    pub fn snapshot(&self) -> PsthSnapshot {
        PsthSnapshot {
            bin_ms: self.bin_ms,
            time_sec: self.bin_times(),
            mean: self.mean.clone(),
            counts: self.counts.clone(),
            num_trials: self.num_trials,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct PsthSnapshot {
    pub bin_ms: f64,
    pub time_sec: Vec<f64>,
    pub mean: Vec<f64>,
    pub counts: Vec<u32>,
    pub num_trials: u32,
}

impl PsthSnapshot {
    /// Spike probability per bin expressed as a rate.
    pub fn firing_rate_hz(&self) -> Vec<f64> {
        self.mean.iter().map(|m| m * 1000.0 / self.bin_ms).collect()
    }

    pub fn smoothed(&self, sigma_ms: f64) -> Vec<f64> {
        smooth(&self.mean, sigma_ms / self.bin_ms)
    }
}

/// Normalized Gaussian of radius `ceil(3 sigma)` bins.
pub fn gaussian_kernel(sigma_bins: f64) -> Vec<f64> {
    if sigma_bins <= 0.0 {
        return vec![1.0];
    }
    let radius = (sigma_bins * 3.0).ceil() as i64;
    let scale = -0.5 / (sigma_bins * sigma_bins);
    let kernel: Vec<f64> = (-radius..=radius).map(|x| ((x * x) as f64 * scale).exp()).collect();
    let sum: f64 = kernel.iter().sum();
    kernel.into_iter().map(|k| k / sum).collect()
}

/// Convolves with a Gaussian; near the edges the kernel is truncated and renormalized.
pub fn smooth(values: &[f64], sigma_bins: f64) -> Vec<f64> {
    let kernel = gaussian_kernel(sigma_bins);
    let radius = (kernel.len() / 2) as i64;
    let n = values.len() as i64;
    (0..n)
        .map(|i| {
            let (mut acc, mut weight) = (0.0, 0.0);
            for (k, w) in kernel.iter().enumerate() {
                let j = i + k as i64 - radius;
                if (0..n).contains(&j) {
                    acc += w * values[j as usize];
                    weight += w;
                }
            }
            if weight > 0.0 {
                acc / weight
            } else {
                0.0
            }
        })
        .collect()
}
