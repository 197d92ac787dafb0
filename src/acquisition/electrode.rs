use serde::Serialize;
use crate::types::UnitKey;
/// Public description of an electrode, handed to observers.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ElectrodeInfo {
    pub id: i32,
    pub name: String,
    pub channels: Vec<usize>,
}
/// Group of channels scanned together; the first channel to cross threshold wins.
#[derive(Clone, Debug, Serialize)]
pub struct Electrode {
    pub(crate) id: i32,
    pub(crate) name: String,
    pub(crate) channels: Vec<usize>,
    pub(crate) thresholds: Vec<f32>,
    pub(crate) active: Vec<bool>,
    pub(crate) pre_peak_samples: usize,
    pub(crate) post_peak_samples: usize,
    /// Where the next scan starts, relative to the next block; negative values reach into history.
    #[serde(skip)]
    pub(crate) resume_index: i64,
}
impl Electrode {
    pub fn new(id: i32, name: impl Into<String>, channels: Vec<usize>, threshold: f32, pre_peak_samples: usize, post_peak_samples: usize) -> Self {
        let n = channels.len();
        Self {
            id,
            name: name.into(),
            channels,
            thresholds: vec![threshold; n],
            active: vec![true; n],
            pre_peak_samples,
            post_peak_samples,
            resume_index: 0,
        }
    }
    pub fn id(&self) -> i32 {
        self.id
    }
    pub fn name(&self) -> &str {
        &self.name
    }
    pub fn channels(&self) -> &[usize] {
        &self.channels
    }
    pub fn num_channels(&self) -> usize {
        self.channels.len()
    }
    pub fn thresholds(&self) -> &[f32] {
        &self.thresholds
    }
    pub fn is_active(&self, slot: usize) -> bool {
        self.active.get(slot).copied().unwrap_or(false)
    }
    pub fn samples_per_spike(&self) -> usize {
        self.pre_peak_samples + self.post_peak_samples
    }
    pub fn info(&self) -> ElectrodeInfo {
        ElectrodeInfo {
            id: self.id,
            name: self.name.clone(),
            channels: self.channels.clone(),
        }
    }
    pub(crate) fn reset(&mut self) {
        self.resume_index = 0;
    }
}
/// One detected spike with its waveform snippet on every channel of the electrode.
#[derive(Clone, Debug, Serialize)]
pub struct SpikeObject {
    pub electrode_id: i32,
    /// Hardware sample index of the peak.
    pub timestamp: i64,
    pub software_timestamp: i64,
    /// 0 while unsorted.
    pub sorted_id: i32,
    pub num_channels: usize,
    pub samples_per_channel: usize,
    pub waveform: Vec<f32>, // channel-major, microvolts
    pub gains: Vec<f32>,
    pub thresholds: Vec<f32>,
    /// Channel slot that crossed threshold.
    pub trigger_slot: usize,
}
impl SpikeObject {
    pub fn channel_waveform(&self, slot: usize) -> Option<&[f32]> {
        if slot >= self.num_channels {
            return None;
        }
        let n = self.samples_per_channel;
        self.waveform.get(slot * n..(slot + 1) * n)
    }
    /// Value at the peak sample on `slot`, i.e. the first sample after the pre-peak window.
    pub fn peak_amplitude(&self, slot: usize, pre_peak_samples: usize) -> Option<f32> {
        self.channel_waveform(slot)?.get(pre_peak_samples).copied()
    }
    /// Waveform as unsigned ADC codes centred on 32768.
    pub fn digitized(&self, bit_volts: f32) -> Vec<u16> {
        self.waveform
            .iter()
            .map(|v| (v / bit_volts + 32768.0).round().clamp(0.0, u16::MAX as f32) as u16)
            .collect()
    }
    pub fn unit_key(&self) -> Option<UnitKey> {
        (self.sorted_id > 0).then(|| UnitKey::new(self.electrode_id, self.sorted_id))
    }
}
