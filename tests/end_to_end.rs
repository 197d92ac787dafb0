use std::sync::Arc;

use ndarray::Array2;
use spikestat::acquisition::{AmplitudeBox, AmplitudeBoxClassifier, ManualSource, TimeFrame};
use spikestat::{
    AcquisitionPipeline, ConditionSpec, EngineConfig, EngineEvent, ManualClock, Rgb, SampleBlock, SpikeDetector,
    Timescale, TrialCircularBuffer, UnitKey,
};

// 硬件时间轴：1 tick = 1 个采样点
fn hardware_config() -> EngineConfig {
    let mut config = EngineConfig::default();
    config.acquisition.num_channels = 1;
    config.trials.timescale = Timescale::Hardware;
    config
}

fn spike_block() -> SampleBlock {
    let mut samples = Array2::<f32>::zeros((1, 300));
    samples[[0, 150]] = -100.0;
    SampleBlock::new(0, 0, 30_000.0, samples)
}

fn pipeline(config: &EngineConfig) -> (AcquisitionPipeline<ManualSource>, Arc<TrialCircularBuffer>, i32) {
    let statistics = Arc::new(TrialCircularBuffer::new(config, Arc::new(ManualClock::new(0))).unwrap());
    let mut detector = SpikeDetector::new(&config.acquisition, &config.detector).unwrap();
    let electrode = detector.add_electrode(1).unwrap();
    detector.add_unit(electrode, 1, Rgb::new(0, 255, 0)).unwrap();
    let mut classifier = AmplitudeBoxClassifier::new(config.detector.pre_peak_samples);
    classifier.add_box(electrode, AmplitudeBox { unit_id: 1, channel_slot: 0, min_uv: -150.0, max_uv: -80.0 });
    detector.set_classifier(Box::new(classifier));
    let pipeline = AcquisitionPipeline::new(ManualSource::new(vec![]), detector, statistics.clone());
    (pipeline, statistics, electrode)
}

#[test]
fn single_spike_is_detected_and_found_in_trial_window() {
    let config = hardware_config();
    let (mut pipeline, statistics, electrode) = pipeline(&config);
    assert_eq!(pipeline.detector().channel_threshold(electrode, 0).unwrap(), -50.0);
    let key = UnitKey::new(electrode, 1);
    let cursor = statistics.spike_pointer(key).unwrap();

    let spikes = pipeline.process_block(&spike_block()).unwrap();
    assert_eq!(spikes.len(), 1);
    let spike = &spikes[0];
    assert_eq!(spike.timestamp, 150);
    assert_eq!(spike.waveform.len(), 40);
    assert_eq!(spike.sorted_id, 1);

    // trial starting 10 samples before the spike and ending 60 after it
    let frame = TimeFrame { start: 140, align: 140, end: 210, before: 0, after: 0 };
    assert_eq!(statistics.aligned_spikes(key, cursor, &frame), Some(vec![10]));
    let late = TimeFrame { start: 100, align: 120, end: 149, before: 0, after: 0 };
    assert_eq!(statistics.aligned_spikes(key, cursor, &late), Some(vec![]));
    let late_with_post = TimeFrame { after: 1, ..late };
    assert_eq!(statistics.aligned_spikes(key, cursor, &late_with_post), Some(vec![30]));
}

#[test]
fn detected_spike_lands_in_the_condition_psth() {
    let config = hardware_config();
    let (mut pipeline, statistics, electrode) = pipeline(&config);
    let cond = statistics.add_condition(ConditionSpec {
        name: "Go".into(),
        trial_types: vec![1],
        visible: true,
        ..ConditionSpec::default()
    })
    .unwrap();
    pipeline.process_block(&spike_block()).unwrap();
    let key = UnitKey::new(electrode, 1);
    assert_eq!(statistics.spike_count(key), Some(1));

    statistics.handle_message("trialstart", 140);
    statistics.handle_message("trialtype 1", 140);
    statistics.handle_message("trialoutcome 1", 210);
    assert_eq!(statistics.handle_message("trialend", 210), Some(EngineEvent::TrialQueued { trial_id: 0 }));
    assert!(statistics.process_pending().is_empty());

    // post window (0.5 s = 15000 samples) must be recorded first
    let quiet = SampleBlock::new(300, 10_000, 30_000.0, Array2::zeros((1, 15_000)));
    assert!(pipeline.process_block(&quiet).unwrap().is_empty());
    assert_eq!(
        statistics.process_pending(),
        vec![EngineEvent::TrialAggregated { trial_id: 0, conditions: vec![cond] }]
    );

    let psth = statistics.unit_psth(cond, key).unwrap();
    assert_eq!(psth.num_trials, 1);
    assert_eq!(psth.mean[500], 1.0);
    assert_eq!(psth.mean.iter().sum::<f64>(), 1.0);
    assert_eq!(psth.firing_rate_hz()[500], 1000.0);
    assert_eq!(statistics.channel_psth(cond, 0).unwrap().num_trials, 1);
}
