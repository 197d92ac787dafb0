use std::collections::HashMap;
use serde::{Deserialize, Serialize};
use crate::acquisition::SpikeObject;
/// Assigns sorted unit ids to detected spikes.
pub trait UnitClassifier: Send {
    /// Unit id for `spike`, or `None` to leave it unsorted.
    fn classify(&mut self, spike: &SpikeObject) -> Option<i32>;
    fn remove_unit(&mut self, _electrode_id: i32, _unit_id: i32) {}
    fn remove_electrode(&mut self, _electrode_id: i32) {}
}
/// Amplitude window on one channel of an electrode.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AmplitudeBox {
    pub unit_id: i32,
    pub channel_slot: usize,
    pub min_uv: f32,
    pub max_uv: f32,
}
impl AmplitudeBox {
    pub fn contains(&self, amplitude: f32) -> bool {
        amplitude >= self.min_uv && amplitude <= self.max_uv
    }
}
/// Box sorting on the peak amplitude. The first box that contains the spike wins.
#[derive(Default)]
pub struct AmplitudeBoxClassifier {
    pre_peak_samples: usize,
    boxes: HashMap<i32, Vec<AmplitudeBox>>,
}
impl AmplitudeBoxClassifier {
    pub fn new(pre_peak_samples: usize) -> Self {
        Self {
            pre_peak_samples,
            boxes: HashMap::new(),
        }
    }
    pub fn add_box(&mut self, electrode_id: i32, amplitude_box: AmplitudeBox) {
        self.boxes.entry(electrode_id).or_default().push(amplitude_box);
    }
    pub fn boxes(&self, electrode_id: i32) -> &[AmplitudeBox] {
        self.boxes.get(&electrode_id).map(Vec::as_slice).unwrap_or(&[])
    }
    pub fn set_pre_peak_samples(&mut self, pre_peak_samples: usize) {
        self.pre_peak_samples = pre_peak_samples;
    }
}
impl UnitClassifier for AmplitudeBoxClassifier {
    fn classify(&mut self, spike: &SpikeObject) -> Option<i32> {
        self.boxes.get(&spike.electrode_id)?.iter().find_map(|b| {
            let amplitude = spike.peak_amplitude(b.channel_slot, self.pre_peak_samples)?;
            b.contains(amplitude).then_some(b.unit_id)
        })
    }
    fn remove_unit(&mut self, electrode_id: i32, unit_id: i32) {
        if let Some(boxes) = self.boxes.get_mut(&electrode_id) {
            boxes.retain(|b| b.unit_id != unit_id);
        }
    }
    fn remove_electrode(&mut self, electrode_id: i32) {
        self.boxes.remove(&electrode_id);
    }
}
#[cfg(test)]
mod tests {
    use super::*;
    fn spike(electrode_id: i32, peak: f32) -> SpikeObject {
        SpikeObject {
            electrode_id,
            timestamp: 0,
            software_timestamp: 0,
            sorted_id: 0,
            num_channels: 1,
            samples_per_channel: 4,
            waveform: vec![0.0, 0.0, peak, 0.0],
            gains: vec![1.0],
            thresholds: vec![-50.0],
            trigger_slot: 0,
        }
    }
    fn classifier() -> AmplitudeBoxClassifier {
        let mut c = AmplitudeBoxClassifier::new(2);
        c.add_box(1, AmplitudeBox { unit_id: 1, channel_slot: 0, min_uv: -100.0, max_uv: -50.0 });
        c.add_box(1, AmplitudeBox { unit_id: 2, channel_slot: 0, min_uv: -300.0, max_uv: -100.0 });
        c
    }
    #[test]
    fn assigns_unit_by_peak_amplitude() {
        let mut c = classifier();
        assert_eq!(c.classify(&spike(1, -70.0)), Some(1));
        assert_eq!(c.classify(&spike(1, -100.0)), Some(1));
        assert_eq!(c.classify(&spike(1, -200.0)), Some(2));
        assert_eq!(c.classify(&spike(1, -400.0)), None);
        assert_eq!(c.classify(&spike(2, -70.0)), None);
    }
    #[test]
    fn removed_units_stop_matching() {
        let mut c = classifier();
        c.remove_unit(1, 1);
        assert_eq!(c.classify(&spike(1, -70.0)), None);
        assert_eq!(c.boxes(1).len(), 1);
        c.remove_electrode(1);
        assert!(c.boxes(1).is_empty());
    }
}
