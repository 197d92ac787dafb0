use std::sync::Arc;
use log::trace;
use crate::acquisition::detector::SpikeDetector;
use crate::acquisition::error::CoreError;
use crate::acquisition::electrode::SpikeObject;
use crate::acquisition::source::{SampleBlock, SignalSource};
use crate::orchestrator::TrialCircularBuffer;
/// Acquisition side of the engine: pulls blocks from a source, feeds the continuous
/// buffer, runs detection and hands sorted spikes to the trial statistics.
pub struct AcquisitionPipeline<S: SignalSource> {
    source: S,
    detector: SpikeDetector,
    statistics: Arc<TrialCircularBuffer>,
}
impl<S: SignalSource> AcquisitionPipeline<S> {
    /// Registers the statistics as an observer so electrodes and units already on the
    /// detector show up there.
    pub fn new(source: S, mut detector: SpikeDetector, statistics: Arc<TrialCircularBuffer>) -> Self {
        detector.add_observer(statistics.clone());
        Self {
            source,
            detector,
            statistics,
        }
    }
    pub fn pump_once(&mut self) -> Result<Option<Vec<SpikeObject>>, CoreError> {
        let Some(block) = self.source.next_block()? else {
            return Ok(None);
        };
        let spikes = self.process_block(&block)?;
        Ok(Some(spikes))
    }
    pub fn process_block(&mut self, block: &SampleBlock) -> Result<Vec<SpikeObject>, CoreError> {
        block.validate()?;
        self.statistics.update_continuous(block)?;
        let spikes = self.detector.process(block)?;
        for spike in spikes.iter().filter(|s| s.sorted_id > 0) {
            self.statistics.add_spike(spike);
        }
        trace!(
            "block @{}: {} samples, {} spikes",
            block.hardware_timestamp,
            block.num_samples(),
            spikes.len()
        );
        Ok(spikes)
    }
    pub fn detector(&self) -> &SpikeDetector {
        &self.detector
    }
    pub fn detector_mut(&mut self) -> &mut SpikeDetector {
        &mut self.detector
    }
    pub fn source_mut(&mut self) -> &mut S {
        &mut self.source
    }
    pub fn statistics(&self) -> &Arc<TrialCircularBuffer> {
        &self.statistics
    }
}
#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array2;
    use crate::acquisition::sorting::{AmplitudeBox, AmplitudeBoxClassifier};
    use crate::acquisition::source::ManualSource;
    use crate::clock::ManualClock;
    use crate::config::EngineConfig;
    use crate::types::{Rgb, UnitKey};
    fn config() -> EngineConfig {
        let mut config = EngineConfig::default();
        config.acquisition.sample_rate_hz = 1000.0;
        config.acquisition.num_channels = 2;
        config.acquisition.software_ticks_per_second = 1000;
        config.lfp.subsampling = 1;
        config
    }
    fn block_with_spike(at: usize) -> SampleBlock {
        let mut samples = Array2::<f32>::zeros((2, 200));
        samples[[0, at]] = -60.0;
        samples[[0, at + 1]] = -90.0;
        samples[[0, at + 2]] = -40.0;
        SampleBlock::new(0, 0, 1000.0, samples)
    }
    #[test]
    fn detected_units_reach_the_statistics() {
        let config = config();
        let statistics = Arc::new(TrialCircularBuffer::new(&config, Arc::new(ManualClock::new(0))).unwrap());
        let mut detector = SpikeDetector::new(&config.acquisition, &config.detector).unwrap();
        let id = detector.add_electrode(1).unwrap();
        detector.add_unit(id, 1, Rgb::new(255, 0, 0)).unwrap();
        let mut classifier = AmplitudeBoxClassifier::new(config.detector.pre_peak_samples);
        classifier.add_box(id, AmplitudeBox { unit_id: 1, channel_slot: 0, min_uv: -120.0, max_uv: -70.0 });
        detector.set_classifier(Box::new(classifier));
        let source = ManualSource::new(vec![block_with_spike(50)]);
        let mut pipeline = AcquisitionPipeline::new(source, detector, statistics.clone());
        assert_eq!(statistics.electrodes().len(), 1);
        let spikes = pipeline.pump_once().unwrap().unwrap();
        assert_eq!(spikes.len(), 1);
        assert_eq!(spikes[0].timestamp, 51);
        assert_eq!(spikes[0].sorted_id, 1);
        assert_eq!(statistics.spike_count(UnitKey::new(id, 1)), Some(1));
        assert_eq!(statistics.lfp_pointer(), 200);
        assert!(pipeline.pump_once().unwrap().is_none());
    }
    #[test]
    fn mismatched_blocks_are_rejected() {
        let config = config();
        let statistics = Arc::new(TrialCircularBuffer::new(&config, Arc::new(ManualClock::new(0))).unwrap());
        let detector = SpikeDetector::new(&config.acquisition, &config.detector).unwrap();
        let mut pipeline = AcquisitionPipeline::new(ManualSource::new(vec![]), detector, statistics);
        let block = SampleBlock::new(0, 0, 500.0, Array2::zeros((2, 10)));
        assert!(matches!(pipeline.process_block(&block), Err(CoreError::SampleRateMismatch { .. })));
    }
}
