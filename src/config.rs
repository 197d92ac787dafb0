// src/config.rs
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::acquisition::CoreError;
use crate::types::Timescale;

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
#[serde(default)]
pub struct EngineConfig {
    pub acquisition: AcquisitionConfig,
    pub detector: DetectorConfig,
    pub trials: TrialConfig,
    pub lfp: LfpConfig,
    pub psth: PsthConfig,
    pub worker: WorkerConfig,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct AcquisitionConfig {
    pub sample_rate_hz: f32,
    pub num_channels: usize,
    /// Microvolts per ADC code, used when digitizing spike snippets.
    pub bit_volts: f32,
    pub software_ticks_per_second: u64,
}

impl Default for AcquisitionConfig {
    fn default() -> Self {
        Self {
            sample_rate_hz: 30_000.0,
            num_channels: 16,
            bit_volts: 0.195,
            software_ticks_per_second: 1_000_000,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct DetectorConfig {
    pub pre_peak_samples: usize,
    pub post_peak_samples: usize,
    /// Samples of the previous block kept so spikes straddling a block boundary are still captured.
    pub overflow_buffer_size: usize,
    /// Signed: negative thresholds trigger on down-going deflections.
    pub default_threshold: f32,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            pre_peak_samples: 8,
            post_peak_samples: 32,
            overflow_buffer_size: 100,
            default_threshold: -50.0,
        }
    }
}

impl DetectorConfig {
    /// History the detector must keep: a full peak search plus the pre-peak window.
    pub fn required_history(pre_peak_samples: usize, post_peak_samples: usize) -> usize {
        2 * post_peak_samples + pre_peak_samples
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct TrialConfig {
    pub pre_sec: f64,
    pub post_sec: f64,
    pub max_trial_time_sec: f64,
    pub max_trials_in_memory: usize,
    pub max_firing_rate_hz: f64,
    pub timescale: Timescale,
    pub ttl_trial_length_sec: f64,
    pub ttl_suppression_sec: f64,
    pub num_ttl_channels: usize,
    /// TTL lines allowed to synthesize trials; `None` means every line.
    pub ttl_trigger_channels: Option<Vec<usize>>,
    pub add_default_ttl_conditions: bool,
}

impl Default for TrialConfig {
    fn default() -> Self {
        Self {
            pre_sec: 0.5,
            post_sec: 0.5,
            max_trial_time_sec: 10.0,
            max_trials_in_memory: 200,
            max_firing_rate_hz: 300.0,
            timescale: Timescale::Software,
            ttl_trial_length_sec: 1.0,
            ttl_suppression_sec: 1.0,
            num_ttl_channels: 8,
            ttl_trigger_channels: None,
            add_default_ttl_conditions: false,
        }
    }
}

impl TrialConfig {
    pub fn spike_buffer_capacity(&self) -> usize {
        (self.max_firing_rate_hz * self.max_trial_time_sec * self.max_trials_in_memory as f64)
            .ceil()
            .max(1.0) as usize
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct LfpConfig {
    pub subsampling: usize,
    pub buffer_seconds: f64,
}

impl Default for LfpConfig {
    fn default() -> Self {
        Self {
            subsampling: 10,
            buffer_seconds: 20.0,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct PsthConfig {
    pub spike_bin_ms: f64,
    pub lfp_bin_ms: f64,
    pub smoothing_sigma_ms: f64,
}

impl Default for PsthConfig {
    fn default() -> Self {
        Self {
            spike_bin_ms: 1.0,
            lfp_bin_ms: 10.0,
            smoothing_sigma_ms: 5.0,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum DrainPolicy {
    /// Drop trials that have not been aggregated yet.
    #[default]
    Discard,
    /// Aggregate whatever is queued immediately, ignoring the post-trial delay.
    ForceFinalize,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct WorkerConfig {
    pub poll_interval_ms: u64,
    pub max_messages_per_poll: usize,
    pub drain_policy: DrainPolicy,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 5,
            max_messages_per_poll: 64,
            drain_policy: DrainPolicy::Discard,
        }
    }
}

impl EngineConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        let config: EngineConfig = serde_json::from_str(&text)
            .with_context(|| format!("failed to parse config file {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let json = serde_json::to_string_pretty(self).context("failed to serialize config")?;
        fs::write(path.as_ref(), json)
            .with_context(|| format!("failed to write config file {}", path.as_ref().display()))
    }

    /// Ticks per second of the timescale trials and spike buffers are kept in.
    pub fn trial_ticks_per_second(&self) -> f64 {
        match self.trials.timescale {
            Timescale::Software => self.acquisition.software_ticks_per_second as f64,
            Timescale::Hardware => self.acquisition.sample_rate_hz as f64,
        }
    }

    pub fn validate(&self) -> Result<(), CoreError> {
        let invalid = |msg: &str| Err(CoreError::InvalidConfig(msg.to_owned()));
        if self.acquisition.sample_rate_hz <= 0.0 {
            return Err(CoreError::InvalidSampleRate);
        }
        if self.acquisition.num_channels == 0 {
            return invalid("num_channels must be at least 1");
        }
        if self.acquisition.software_ticks_per_second == 0 {
            return invalid("software_ticks_per_second must be positive");
        }
        if self.acquisition.bit_volts <= 0.0 {
            return invalid("bit_volts must be positive");
        }
        let needed = DetectorConfig::required_history(
            self.detector.pre_peak_samples,
            self.detector.post_peak_samples,
        );
        if self.detector.post_peak_samples == 0 || needed > self.detector.overflow_buffer_size {
            return Err(CoreError::SpikeWindowTooLarge {
                pre: self.detector.pre_peak_samples,
                post: self.detector.post_peak_samples,
                overflow: self.detector.overflow_buffer_size,
            });
        }
        if self.trials.pre_sec < 0.0 || self.trials.post_sec < 0.0 {
            return invalid("pre_sec and post_sec must not be negative");
        }
        if self.trials.pre_sec + self.trials.post_sec <= 0.0 {
            return invalid("pre_sec + post_sec must be positive");
        }
        if self.trials.max_trial_time_sec <= 0.0 {
            return invalid("max_trial_time_sec must be positive");
        }
        if self.trials.max_trials_in_memory == 0 || self.trials.max_firing_rate_hz <= 0.0 {
            return invalid("spike buffer capacity must be positive");
        }
        if self.lfp.subsampling == 0 || self.lfp.buffer_seconds <= 0.0 {
            return invalid("lfp subsampling and buffer_seconds must be positive");
        }
        if self.psth.spike_bin_ms <= 0.0 || self.psth.lfp_bin_ms <= 0.0 {
            return invalid("psth bin widths must be positive");
        }
        if self.worker.max_messages_per_poll == 0 {
            return invalid("max_messages_per_poll must be at least 1");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = EngineConfig::default();
        config.validate().unwrap();
        assert_eq!(config.trials.spike_buffer_capacity(), 600_000);
        assert_eq!(config.trial_ticks_per_second(), 1_000_000.0);
    }

    #[test]
    fn partial_json_fills_defaults() {
        let json = r#"{ "detector": { "post_peak_samples": 16 }, "trials": { "timescale": "hardware" } }"#;
        let config: EngineConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.detector.post_peak_samples, 16);
        assert_eq!(config.detector.pre_peak_samples, 8);
        assert_eq!(config.trials.timescale, Timescale::Hardware);
        assert_eq!(config.trial_ticks_per_second(), 30_000.0);
        config.validate().unwrap();
    }

    #[test]
    fn spike_window_must_fit_overflow_buffer() {
        let mut config = EngineConfig::default();
        config.detector.post_peak_samples = 60;
        assert!(matches!(
            config.validate(),
            Err(CoreError::SpikeWindowTooLarge { post: 60, .. })
        ));
    }
}
