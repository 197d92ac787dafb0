use std::collections::HashMap;
use std::sync::Arc;
use log::{debug, info, trace};
use ndarray::{s, Array2, ArrayView2};
use crate::acquisition::{CoreError, Electrode, ElectrodeInfo, SampleBlock, SpikeObject, UnitClassifier};
use crate::clock::samples_to_ticks;
use crate::config::{AcquisitionConfig, DetectorConfig};
use crate::types::{Rgb, UnitKey};
/// Receives electrode and unit lifecycle changes from the detector.
pub trait ElectrodeObserver: Send + Sync {
    fn electrode_added(&self, electrode: &ElectrodeInfo);
    fn electrode_removed(&self, electrode_id: i32);
    fn channel_changed(&self, _electrode: &ElectrodeInfo) {}
    fn unit_added(&self, key: UnitKey, color: Rgb);
    fn unit_removed(&self, key: UnitKey);
}
fn electrode_kind(num_channels: usize) -> &'static str {
    match num_channels {
        1 => "Single electrode",
        2 => "Stereotrode",
        4 => "Tetrode",
        _ => "Electrode",
    }
}
// 阈值为负时检测向下的偏转，为正时检测向上的偏转，0 表示关闭
/// The sign of `threshold` picks the polarity: a positive value detects rising
/// deflections (`value > threshold`), not falling ones past `-threshold`. Thresholds
/// written for detectors that always look for negative peaks must be negated.
fn crosses(value: f32, threshold: f32) -> bool {
    if threshold < 0.0 {
        -value > -threshold
    } else if threshold > 0.0 {
        value > threshold
    } else {
        false
    }
}
/// Block samples addressed by index; negative indices read the tail of the previous blocks.
struct Samples<'a> {
    block: ArrayView2<'a, f32>,
    history: &'a Array2<f32>,
}
impl Samples<'_> {
    fn get(&self, channel: usize, index: i64) -> f32 {
        if index >= 0 {
            return self.block.get((channel, index as usize)).copied().unwrap_or(0.0);
        }
        let h = self.history.ncols() as i64 + index;
        if h < 0 {
            return 0.0;
        }
        self.history[[channel, h as usize]]
    }
}
fn find_peak(samples: &Samples, channel: usize, crossing: i64, threshold: f32, max_steps: usize) -> i64 {
    let sign = if threshold < 0.0 { -1.0 } else { 1.0 };
    let mut peak = crossing;
    while peak < crossing + max_steps as i64 && sign * samples.get(channel, peak + 1) > sign * samples.get(channel, peak) {
        peak += 1;
    }
    peak
}
/// First active channel of `electrode` crossing threshold at `index`, with its peak.
fn trigger(samples: &Samples, electrode: &Electrode, index: i64) -> Option<(usize, i64)> {
    electrode.channels.iter().enumerate().find_map(|(slot, &channel)| {
        if !electrode.active[slot] {
            return None;
        }
        let threshold = electrode.thresholds[slot];
        crosses(samples.get(channel, index), threshold)
            .then(|| (slot, find_peak(samples, channel, index, threshold, electrode.post_peak_samples)))
    })
}
struct BlockTiming {
    hardware_timestamp: i64,
    software_timestamp: i64,
    sample_rate_hz: f32,
    software_ticks_per_second: f64,
    gain: f32,
}
fn snippet(samples: &Samples, electrode: &Electrode, trigger_slot: usize, peak: i64, timing: &BlockTiming) -> SpikeObject {
    let len = electrode.samples_per_spike();
    let num_channels = electrode.num_channels();
    let first = peak - electrode.pre_peak_samples as i64;
    let mut waveform = vec![0.0; num_channels * len];
    for (slot, &channel) in electrode.channels.iter().enumerate() {
        if !electrode.active[slot] {
            continue;
        }
        for (t, v) in waveform[slot * len..(slot + 1) * len].iter_mut().enumerate() {
            *v = samples.get(channel, first + t as i64);
        }
    }
    SpikeObject {
        electrode_id: electrode.id,
        timestamp: timing.hardware_timestamp + peak,
        software_timestamp: timing.software_timestamp
            + samples_to_ticks(peak, timing.sample_rate_hz, timing.software_ticks_per_second),
        sorted_id: 0,
        num_channels,
        samples_per_channel: len,
        waveform,
        gains: vec![timing.gain; num_channels],
        thresholds: electrode.thresholds.clone(),
        trigger_slot,
    }
}
/// Threshold detector running on the acquisition thread.
///
/// Each electrode is scanned independently; after a spike the scan skips past the
/// post-peak window. Spikes too close to the end of a block are picked up on the next
/// block, reading the earlier samples from the overflow history.
pub struct SpikeDetector {
    num_inputs: usize,
    sample_rate_hz: f32,
    software_ticks_per_second: f64,
    bit_volts: f32,
    default_threshold: f32,
    pre_peak_samples: usize,
    post_peak_samples: usize,
    electrodes: Vec<Electrode>,
    units: HashMap<i32, Vec<(i32, Rgb)>>,
    next_electrode_id: i32,
    name_counters: HashMap<&'static str, u32>,
    history: Array2<f32>, // inputs x overflow_buffer_size
    observers: Vec<Arc<dyn ElectrodeObserver>>,
    classifier: Option<Box<dyn UnitClassifier>>,
    spikes_detected: u64,
}
impl SpikeDetector {
    pub fn new(acquisition: &AcquisitionConfig, detector: &DetectorConfig) -> Result<Self, CoreError> {
        if acquisition.sample_rate_hz <= 0.0 {
            return Err(CoreError::InvalidSampleRate);
        }
        if acquisition.bit_volts <= 0.0 {
            return Err(CoreError::InvalidConfig("bit_volts must be positive".into()));
        }
        Self::check_window(detector.pre_peak_samples, detector.post_peak_samples, detector.overflow_buffer_size)?;
        Ok(Self {
            num_inputs: acquisition.num_channels,
            sample_rate_hz: acquisition.sample_rate_hz,
            software_ticks_per_second: acquisition.software_ticks_per_second as f64,
            bit_volts: acquisition.bit_volts,
            default_threshold: detector.default_threshold,
            pre_peak_samples: detector.pre_peak_samples,
            post_peak_samples: detector.post_peak_samples,
            electrodes: Vec::new(),
            units: HashMap::new(),
            next_electrode_id: 1,
            name_counters: HashMap::new(),
            history: Array2::zeros((acquisition.num_channels, detector.overflow_buffer_size)),
            observers: Vec::new(),
            classifier: None,
            spikes_detected: 0,
        })
    }
    fn check_window(pre: usize, post: usize, overflow: usize) -> Result<(), CoreError> {
        if post == 0 || DetectorConfig::required_history(pre, post) > overflow {
            return Err(CoreError::SpikeWindowTooLarge { pre, post, overflow });
        }
        Ok(())
    }
    pub fn with_observer(mut self, observer: Arc<dyn ElectrodeObserver>) -> Self {
        self.add_observer(observer);
        self
    }
    /// Registers `observer` and replays the current electrodes and units to it.
    pub fn add_observer(&mut self, observer: Arc<dyn ElectrodeObserver>) {
        for electrode in &self.electrodes {
            observer.electrode_added(&electrode.info());
            for &(unit, color) in self.units.get(&electrode.id).into_iter().flatten() {
                observer.unit_added(UnitKey::new(electrode.id, unit), color);
            }
        }
        self.observers.push(observer);
    }
    pub fn set_classifier(&mut self, classifier: Box<dyn UnitClassifier>) {
        self.classifier = Some(classifier);
    }
    pub fn num_inputs(&self) -> usize {
        self.num_inputs
    }
    pub fn spikes_detected(&self) -> u64 {
        self.spikes_detected
    }
    pub fn spike_window(&self) -> (usize, usize) {
        (self.pre_peak_samples, self.post_peak_samples)
    }
    /// Adds an electrode of `num_channels` channels placed right after the previous one,
    /// wrapping to channel 0 when the inputs run out.
    pub fn add_electrode(&mut self, num_channels: usize) -> Result<i32, CoreError> {
        if num_channels == 0 {
            return Err(CoreError::EmptyElectrode);
        }
        if num_channels > self.num_inputs {
            return Err(CoreError::ChannelOutOfRange {
                channel: num_channels - 1,
                available: self.num_inputs,
            });
        }
        let mut first = self
            .electrodes
            .last()
            .and_then(|e| e.channels.last())
            .map_or(0, |c| c + 1);
        if first + num_channels > self.num_inputs {
            first = 0;
        }
        self.add_electrode_with_channels((first..first + num_channels).collect())
    }
    pub fn add_electrode_with_channels(&mut self, channels: Vec<usize>) -> Result<i32, CoreError> {
        if channels.is_empty() {
            return Err(CoreError::EmptyElectrode);
        }
        if let Some(&channel) = channels.iter().find(|&&c| c >= self.num_inputs) {
            return Err(CoreError::ChannelOutOfRange {
                channel,
                available: self.num_inputs,
            });
        }
        let kind = electrode_kind(channels.len());
        let counter = self.name_counters.entry(kind).or_insert(0);
        *counter += 1;
        let name = format!("{kind} {counter}");
        let id = self.next_electrode_id;
        self.next_electrode_id += 1;
        let electrode = Electrode::new(id, name, channels, self.default_threshold, self.pre_peak_samples, self.post_peak_samples);
        let info = electrode.info();
        self.electrodes.push(electrode);
        self.units.insert(id, Vec::new());
        info!("added {} (id {}) on channels {:?}", info.name, id, info.channels);
        for observer in &self.observers {
            observer.electrode_added(&info);
        }
        Ok(id)
    }
    /// Adds `num_electrodes` electrodes of `channels_per_electrode` channels each.
    pub fn add_probe(&mut self, num_electrodes: usize, channels_per_electrode: usize) -> Result<Vec<i32>, CoreError> {
        (0..num_electrodes).map(|_| self.add_electrode(channels_per_electrode)).collect()
    }
    pub fn remove_electrode(&mut self, electrode_id: i32) -> Result<(), CoreError> {
        let index = self.index_of(electrode_id)?;
        let removed = self.electrodes.remove(index);
        self.units.remove(&electrode_id);
        if let Some(classifier) = self.classifier.as_mut() {
            classifier.remove_electrode(electrode_id);
        }
        info!("removed {} (id {})", removed.name, electrode_id);
        for observer in &self.observers {
            observer.electrode_removed(electrode_id);
        }
        Ok(())
    }
    fn index_of(&self, electrode_id: i32) -> Result<usize, CoreError> {
        self.electrodes
            .iter()
            .position(|e| e.id == electrode_id)
            .ok_or(CoreError::UnknownElectrode(electrode_id))
    }
    fn electrode_mut(&mut self, electrode_id: i32) -> Result<&mut Electrode, CoreError> {
        let index = self.index_of(electrode_id)?;
        Ok(&mut self.electrodes[index])
    }
    fn slot_mut(&mut self, electrode_id: i32, slot: usize) -> Result<&mut Electrode, CoreError> {
        let electrode = self.electrode_mut(electrode_id)?;
        if slot >= electrode.num_channels() {
            return Err(CoreError::UnknownElectrodeChannel {
                electrode: electrode_id,
                index: slot,
            });
        }
        Ok(electrode)
    }
    pub fn electrode(&self, electrode_id: i32) -> Option<&Electrode> {
        self.electrodes.iter().find(|e| e.id == electrode_id)
    }
    pub fn electrodes(&self) -> &[Electrode] {
        &self.electrodes
    }
    pub fn num_electrodes(&self) -> usize {
        self.electrodes.len()
    }
    pub fn electrode_names(&self) -> Vec<String> {
        self.electrodes.iter().map(|e| e.name.clone()).collect()
    }
    pub fn set_electrode_name(&mut self, electrode_id: i32, name: impl Into<String>) -> Result<(), CoreError> {
        self.electrode_mut(electrode_id)?.name = name.into();
        Ok(())
    }
    /// Maps channel `slot` of the electrode onto input `channel`.
    pub fn set_channel(&mut self, electrode_id: i32, slot: usize, channel: usize) -> Result<(), CoreError> {
        if channel >= self.num_inputs {
            return Err(CoreError::ChannelOutOfRange {
                channel,
                available: self.num_inputs,
            });
        }
        let electrode = self.slot_mut(electrode_id, slot)?;
        electrode.channels[slot] = channel;
        electrode.reset();
        let info = electrode.info();
        for observer in &self.observers {
            observer.channel_changed(&info);
        }
        Ok(())
    }
    /// Negative thresholds detect falling spikes, positive ones rising spikes, 0 disables.
    pub fn set_channel_threshold(&mut self, electrode_id: i32, slot: usize, threshold: f32) -> Result<(), CoreError> {
        self.slot_mut(electrode_id, slot)?.thresholds[slot] = threshold;
        Ok(())
    }
    pub fn channel_threshold(&self, electrode_id: i32, slot: usize) -> Result<f32, CoreError> {
        let electrode = self.electrode(electrode_id).ok_or(CoreError::UnknownElectrode(electrode_id))?;
        electrode.thresholds.get(slot).copied().ok_or(CoreError::UnknownElectrodeChannel {
            electrode: electrode_id,
            index: slot,
        })
    }
    pub fn set_channel_active(&mut self, electrode_id: i32, slot: usize, active: bool) -> Result<(), CoreError> {
        self.slot_mut(electrode_id, slot)?.active[slot] = active;
        Ok(())
    }
    pub fn is_channel_active(&self, electrode_id: i32, slot: usize) -> Result<bool, CoreError> {
        let electrode = self.electrode(electrode_id).ok_or(CoreError::UnknownElectrode(electrode_id))?;
        electrode.active.get(slot).copied().ok_or(CoreError::UnknownElectrodeChannel {
            electrode: electrode_id,
            index: slot,
        })
    }
    /// Changes the snippet window of every electrode. Buffered history is dropped.
    pub fn set_spike_window(&mut self, pre_peak_samples: usize, post_peak_samples: usize) -> Result<(), CoreError> {
        Self::check_window(pre_peak_samples, post_peak_samples, self.history.ncols())?;
        self.pre_peak_samples = pre_peak_samples;
        self.post_peak_samples = post_peak_samples;
        for electrode in &mut self.electrodes {
            electrode.pre_peak_samples = pre_peak_samples;
            electrode.post_peak_samples = post_peak_samples;
        }
        self.reset();
        Ok(())
    }
    pub fn add_unit(&mut self, electrode_id: i32, unit_id: i32, color: Rgb) -> Result<(), CoreError> {
        let units = self.units.get_mut(&electrode_id).ok_or(CoreError::UnknownElectrode(electrode_id))?;
        if units.iter().any(|&(u, _)| u == unit_id) {
            return Ok(());
        }
        units.push((unit_id, color));
        let key = UnitKey::new(electrode_id, unit_id);
        debug!("unit {unit_id} added on electrode {electrode_id}");
        for observer in &self.observers {
            observer.unit_added(key, color);
        }
        Ok(())
    }
    pub fn remove_unit(&mut self, electrode_id: i32, unit_id: i32) -> Result<(), CoreError> {
        let units = self.units.get_mut(&electrode_id).ok_or(CoreError::UnknownElectrode(electrode_id))?;
        let Some(pos) = units.iter().position(|&(u, _)| u == unit_id) else {
            return Err(CoreError::UnknownUnit {
                electrode: electrode_id,
                unit: unit_id,
            });
        };
        units.remove(pos);
        if let Some(classifier) = self.classifier.as_mut() {
            classifier.remove_unit(electrode_id, unit_id);
        }
        let key = UnitKey::new(electrode_id, unit_id);
        for observer in &self.observers {
            observer.unit_removed(key);
        }
        Ok(())
    }
    pub fn units(&self, electrode_id: i32) -> Vec<i32> {
        self.units.get(&electrode_id).map(|u| u.iter().map(|&(id, _)| id).collect()).unwrap_or_default()
    }
    /// Forgets buffered samples and restarts every electrode's scan at the next block.
    pub fn reset(&mut self) {
        self.history.fill(0.0);
        for electrode in &mut self.electrodes {
            electrode.reset();
        }
    }
    /// Scans one block and returns the spikes found, classified when a classifier is set.
    pub fn process(&mut self, block: &SampleBlock) -> Result<Vec<SpikeObject>, CoreError> {
        block.validate()?;
        if (block.sample_rate_hz - self.sample_rate_hz).abs() > f32::EPSILON {
            return Err(CoreError::SampleRateMismatch {
                expected: self.sample_rate_hz,
                actual: block.sample_rate_hz,
            });
        }
        if block.num_channels() != self.num_inputs {
            return Err(CoreError::ChannelMismatch {
                expected: self.num_inputs,
                actual: block.num_channels(),
            });
        }
        let n = block.num_samples() as i64;
        let timing = BlockTiming {
            hardware_timestamp: block.hardware_timestamp,
            software_timestamp: block.software_timestamp,
            sample_rate_hz: block.sample_rate_hz,
            software_ticks_per_second: self.software_ticks_per_second,
            gain: 1000.0 / self.bit_volts,
        };
        let samples = Samples {
            block: block.samples.view(),
            history: &self.history,
        };
        let mut spikes = Vec::new();
        for electrode in self.electrodes.iter_mut() {
            let post = electrode.post_peak_samples as i64;
            let lookahead = 2 * post;
            let mut i = electrode.resume_index;
            while i < n - lookahead {
                match trigger(&samples, electrode, i) {
                    Some((slot, peak)) => {
                        let spike = snippet(&samples, electrode, slot, peak, &timing);
                        trace!("spike on electrode {} at {}", electrode.id, spike.timestamp);
                        spikes.push(spike);
                        i = peak + post;
                    }
                    None => i += 1,
                }
            }
            electrode.resume_index = i - n;
        }
        self.push_history(block);
        if let Some(classifier) = self.classifier.as_mut() {
            for spike in &mut spikes {
                spike.sorted_id = classifier.classify(spike).unwrap_or(0);
            }
        }
        self.spikes_detected += spikes.len() as u64;
        Ok(spikes)
    }
    fn push_history(&mut self, block: &SampleBlock) {
        let keep = self.history.ncols();
        let n = block.num_samples();
        if keep == 0 {
            return;
        }
        if n >= keep {
            self.history.assign(&block.samples.slice(s![.., n - keep..]));
        } else {
            let tail = self.history.slice(s![.., n..]).to_owned();
            self.history.slice_mut(s![.., ..keep - n]).assign(&tail);
            self.history.slice_mut(s![.., keep - n..]).assign(&block.samples);
        }
    }
}
#[cfg(test)]
mod tests {
    use super::*;
    use crate::acquisition::{AmplitudeBox, AmplitudeBoxClassifier};
    use parking_lot::Mutex;
    fn configs(num_channels: usize) -> (AcquisitionConfig, DetectorConfig) {
        let acquisition = AcquisitionConfig {
            sample_rate_hz: 30_000.0,
            num_channels,
            bit_volts: 0.195,
            software_ticks_per_second: 30_000,
        };
        (acquisition, DetectorConfig::default())
    }
    fn detector(num_channels: usize) -> SpikeDetector {
        let (a, d) = configs(num_channels);
        SpikeDetector::new(&a, &d).unwrap()
    }
    fn block(start: i64, samples: Array2<f32>) -> SampleBlock {
        SampleBlock::new(start, start, 30_000.0, samples)
    }
    #[test]
    fn detects_negative_spike_and_extracts_waveform() {
        let mut det = detector(1);
        let id = det.add_electrode(1).unwrap();
        let mut data = Array2::zeros((1, 300));
        data[[0, 150]] = -100.0;
        data[[0, 149]] = -60.0;
        let spikes = det.process(&block(1000, data)).unwrap();
        assert_eq!(spikes.len(), 1);
        let spike = &spikes[0];
        assert_eq!(spike.electrode_id, id);
        assert_eq!(spike.timestamp, 1150);
        assert_eq!(spike.software_timestamp, 1150);
        assert_eq!(spike.samples_per_channel, 40);
        assert_eq!(spike.peak_amplitude(0, 8), Some(-100.0));
        assert_eq!(spike.channel_waveform(0).unwrap()[7], -60.0);
        assert_eq!(det.spikes_detected(), 1);
    }
    #[test]
    fn positive_threshold_triggers_on_rising_signal() {
        let mut det = detector(1);
        let id = det.add_electrode(1).unwrap();
        det.set_channel_threshold(id, 0, 50.0).unwrap();
        let mut data = Array2::zeros((1, 300));
        data[[0, 100]] = -200.0;
        data[[0, 120]] = 70.0;
        data[[0, 121]] = 90.0;
        let spikes = det.process(&block(0, data)).unwrap();
        assert_eq!(spikes.len(), 1);
        assert_eq!(spikes[0].timestamp, 121);
    }
    #[test]
    fn threshold_just_below_peak_detects_just_above_does_not() {
        let mut data = Array2::zeros((1, 300));
        data[[0, 99]] = 40.0;
        data[[0, 100]] = 80.0;
        data[[0, 101]] = 40.0;
        for (threshold, expected) in [(79.9, 1), (80.1, 0)] {
            let mut det = detector(1);
            let id = det.add_electrode(1).unwrap();
            det.set_channel_threshold(id, 0, threshold).unwrap();
            let spikes = det.process(&block(0, data.clone())).unwrap();
            assert_eq!(spikes.len(), expected, "threshold {threshold}");
            if let Some(spike) = spikes.first() {
                assert_eq!(spike.timestamp, 100);
            }
        }
    }
    #[test]
    fn spike_near_block_end_is_found_in_next_block() {
        let mut det = detector(1);
        det.add_electrode(1).unwrap();
        let mut first = Array2::zeros((1, 300));
        for k in 280..300 {
            first[[0, k]] = (k - 270) as f32;
        }
        first[[0, 290]] = -120.0;
        assert!(det.process(&block(0, first)).unwrap().is_empty());
        let spikes = det.process(&block(300, Array2::zeros((1, 300)))).unwrap();
        assert_eq!(spikes.len(), 1);
        let wave = spikes[0].channel_waveform(0).unwrap();
        assert_eq!(spikes[0].timestamp, 290);
        assert_eq!(wave[8], -120.0);
        assert_eq!(wave[0], 12.0);
        assert_eq!(wave[9], 21.0);
        assert_eq!(wave[20], 0.0);
    }
    #[test]
    fn first_channel_to_cross_wins_and_inactive_channels_are_zeroed() {
        let mut det = detector(4);
        let id = det.add_electrode(4).unwrap();
        det.set_channel_active(id, 3, false).unwrap();
        let mut data = Array2::zeros((4, 300));
        data[[1, 100]] = -90.0;
        data[[2, 100]] = -150.0;
        data[[3, 99]] = -500.0;
        let spikes = det.process(&block(0, data)).unwrap();
        assert_eq!(spikes.len(), 1);
        assert_eq!(spikes[0].trigger_slot, 1);
        assert_eq!(spikes[0].peak_amplitude(2, 8), Some(-150.0));
        assert!(spikes[0].channel_waveform(3).unwrap().iter().all(|&v| v == 0.0));
    }
    #[test]
    fn no_second_trigger_inside_post_peak_window() {
        let mut det = detector(1);
        det.add_electrode(1).unwrap();
        let mut data = Array2::zeros((1, 400));
        data[[0, 100]] = -100.0;
        data[[0, 120]] = -100.0;
        data[[0, 200]] = -100.0;
        let stamps: Vec<i64> = det.process(&block(0, data)).unwrap().iter().map(|s| s.timestamp).collect();
        assert_eq!(stamps, vec![100, 200]);
    }
    #[test]
    fn electrodes_are_named_and_placed_sequentially() {
        let mut det = detector(16);
        let ids = det.add_probe(4, 4).unwrap();
        assert_eq!(ids.len(), 4);
        assert_eq!(det.electrode(ids[3]).unwrap().channels(), &[12, 13, 14, 15]);
        let wrapped = det.add_electrode(4).unwrap();
        assert_eq!(det.electrode(wrapped).unwrap().channels(), &[0, 1, 2, 3]);
        let single = det.add_electrode(1).unwrap();
        assert_eq!(det.electrode(single).unwrap().channels(), &[4]);
        assert_eq!(
            det.electrode_names(),
            vec!["Tetrode 1", "Tetrode 2", "Tetrode 3", "Tetrode 4", "Tetrode 5", "Single electrode 1"]
        );
        assert!(matches!(det.add_electrode(0), Err(CoreError::EmptyElectrode)));
        assert!(matches!(det.add_electrode(17), Err(CoreError::ChannelOutOfRange { .. })));
    }
    #[test]
    fn spike_window_changes_are_validated() {
        let mut det = detector(2);
        let id = det.add_electrode(2).unwrap();
        assert!(matches!(det.set_spike_window(10, 50), Err(CoreError::SpikeWindowTooLarge { .. })));
        det.set_spike_window(10, 20).unwrap();
        assert_eq!(det.electrode(id).unwrap().samples_per_spike(), 30);
        assert_eq!(det.spike_window(), (10, 20));
    }
    #[test]
    fn rejects_mismatched_blocks() {
        let mut det = detector(2);
        assert!(matches!(
            det.process(&block(0, Array2::zeros((3, 10)))),
            Err(CoreError::ChannelMismatch { expected: 2, actual: 3 })
        ));
        let wrong_rate = SampleBlock::new(0, 0, 20_000.0, Array2::zeros((2, 10)));
        assert!(matches!(det.process(&wrong_rate), Err(CoreError::SampleRateMismatch { .. })));
    }
    #[derive(Default)]
    struct Recorder(Mutex<Vec<String>>);
    impl ElectrodeObserver for Recorder {
        fn electrode_added(&self, electrode: &ElectrodeInfo) {
            self.0.lock().push(format!("add {}", electrode.name));
        }
        fn electrode_removed(&self, electrode_id: i32) {
            self.0.lock().push(format!("remove {electrode_id}"));
        }
        fn channel_changed(&self, electrode: &ElectrodeInfo) {
            self.0.lock().push(format!("channels {:?}", electrode.channels));
        }
        fn unit_added(&self, key: UnitKey, _color: Rgb) {
            self.0.lock().push(format!("unit+ {}/{}", key.electrode_id, key.unit_id));
        }
        fn unit_removed(&self, key: UnitKey) {
            self.0.lock().push(format!("unit- {}/{}", key.electrode_id, key.unit_id));
        }
    }
    #[test]
    fn observers_follow_the_lifecycle() {
        let recorder = Arc::new(Recorder::default());
        let mut det = detector(4);
        let early = det.add_electrode(2).unwrap();
        det.add_unit(early, 1, Rgb::WHITE).unwrap();
        det.add_observer(recorder.clone());
        let id = det.add_electrode(1).unwrap();
        det.add_unit(id, 3, Rgb::new(1, 2, 3)).unwrap();
        det.set_channel(id, 0, 0).unwrap();
        assert!(matches!(det.remove_unit(id, 9), Err(CoreError::UnknownUnit { .. })));
        det.remove_unit(id, 3).unwrap();
        det.remove_electrode(id).unwrap();
        assert_eq!(
            *recorder.0.lock(),
            vec![
                "add Stereotrode 1",
                "unit+ 1/1",
                "add Single electrode 1",
                "unit+ 2/3",
                "channels [0]",
                "unit- 2/3",
                "remove 2",
            ]
        );
    }
    #[test]
    fn classifier_labels_spikes() {
        let mut det = detector(1);
        let id = det.add_electrode(1).unwrap();
        let mut classifier = AmplitudeBoxClassifier::new(8);
        classifier.add_box(id, AmplitudeBox { unit_id: 1, channel_slot: 0, min_uv: -150.0, max_uv: -80.0 });
        det.set_classifier(Box::new(classifier));
        let mut data = Array2::zeros((1, 300));
        data[[0, 50]] = -100.0;
        data[[0, 150]] = -60.0;
        let spikes = det.process(&block(0, data)).unwrap();
        let sorted: Vec<i32> = spikes.iter().map(|s| s.sorted_id).collect();
        assert_eq!(sorted, vec![1, 0]);
    }
}
