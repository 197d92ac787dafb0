// src/main.rs
use std::collections::VecDeque;
use std::env;
use std::sync::Arc;

use anyhow::{Context, Result};
use log::{debug, info};
use serde::Serialize;

use spikestat::acquisition::{AmplitudeBox, AmplitudeBoxClassifier, SimulatedSource, SimulationParams};
use spikestat::clock::{samples_to_ticks, ManualClock};
use spikestat::{
    AcquisitionPipeline, AggregationEngine, EngineConfig, EngineEvent, Rgb, SpikeDetector, StampedMessage, Timescale,
    TrialCircularBuffer,
};

#[derive(Serialize)]
struct UnitSummary {
    condition: String,
    electrode: i32,
    unit: i32,
    trials: u32,
    mean_rate_hz: f64,
    peak_rate_hz: f64,
}

#[derive(Serialize)]
struct Summary {
    design: String,
    revision: u64,
    seconds: f64,
    spikes_detected: u64,
    trials_aggregated: u64,
    trials_dropped: u64,
    units: Vec<UnitSummary>,
}

fn summarize(statistics: &TrialCircularBuffer, config: &EngineConfig, seconds: f64, spikes_detected: u64) -> Summary {
    let snapshot = statistics.snapshot();
    let mut units = Vec::new();
    for condition in &snapshot.conditions {
        for unit in &condition.units {
            // 平滑后的尖峰概率换算成 Hz
            let scale = 1000.0 / unit.psth.bin_ms;
            let rate: Vec<f64> = unit
                .psth
                .smoothed(config.psth.smoothing_sigma_ms)
                .into_iter()
                .map(|p| p * scale)
                .collect();
            let mean = if rate.is_empty() { 0.0 } else { rate.iter().sum::<f64>() / rate.len() as f64 };
            units.push(UnitSummary {
                condition: condition.condition.name.clone(),
                electrode: unit.unit.electrode_id,
                unit: unit.unit.unit_id,
                trials: unit.psth.num_trials,
                mean_rate_hz: mean,
                peak_rate_hz: rate.iter().copied().fold(0.0, f64::max),
            });
        }
    }
    Summary {
        design: snapshot.name,
        revision: snapshot.revision,
        seconds,
        spikes_detected,
        trials_aggregated: statistics.aggregated_trials(),
        trials_dropped: statistics.dropped_trials(),
        units,
    }
}

// 入口：spikestat [config.json] [seconds]
fn main() -> Result<()> {
    env_logger::init();
    let mut args = env::args().skip(1);
    let config = match args.next() {
        Some(path) => EngineConfig::load(&path)?,
        None => EngineConfig::default(),
    };
    let seconds: f64 = match args.next() {
        Some(text) => text.parse().with_context(|| format!("invalid duration `{text}`"))?,
        None => 10.0,
    };
    let sample_rate = config.acquisition.sample_rate_hz;
    let software_tps = config.acquisition.software_ticks_per_second as f64;

    // 1. 统计核心 + 检测器
    let clock = Arc::new(ManualClock::new(0));
    let statistics = Arc::new(TrialCircularBuffer::new(&config, clock.clone())?);
    let mut detector = SpikeDetector::new(&config.acquisition, &config.detector)?;
    let electrode = detector.add_electrode(config.acquisition.num_channels.min(4))?;
    detector.add_unit(electrode, 1, Rgb::new(255, 80, 80))?;
    let mut classifier = AmplitudeBoxClassifier::new(config.detector.pre_peak_samples);
    classifier.add_box(electrode, AmplitudeBox { unit_id: 1, channel_slot: 0, min_uv: -160.0, max_uv: -80.0 });
    detector.set_classifier(Box::new(classifier));

    // 2. 模拟数据源
    let params = SimulationParams {
        sample_rate_hz: sample_rate,
        num_channels: config.acquisition.num_channels,
        software_ticks_per_second: config.acquisition.software_ticks_per_second,
        ..SimulationParams::default()
    };
    let block_size = params.block_size;
    let mut pipeline = AcquisitionPipeline::new(SimulatedSource::new(params), detector, statistics.clone());

    // 3. 聚合线程
    let mut engine = AggregationEngine::spawn(statistics.clone(), &config.worker)?;
    let sender = engine.sender().context("aggregation worker is not running")?;
    sender.send("newdesign demo", 0);
    sender.send("addcondition name Left trialtypes 1 color 255 0 0", 0);
    sender.send("addcondition name Right trialtypes 2 color 0 0 255", 0);

    // 模拟源的消息时间戳是软件时钟；硬件时间轴下换算成采样点
    let to_trial_ts = |ts: i64| match config.trials.timescale {
        Timescale::Software => ts,
        Timescale::Hardware => (ts as f64 * sample_rate as f64 / software_tps).round() as i64,
    };

    let total_blocks = (seconds * sample_rate as f64 / block_size as f64).ceil() as usize;
    let mut pending: VecDeque<StampedMessage> = VecDeque::new();
    let mut samples_done: i64 = 0;
    info!("simulating {seconds} s in {total_blocks} blocks");
    for _ in 0..total_blocks {
        if pipeline.pump_once()?.is_none() {
            break;
        }
        samples_done += block_size as i64;
        let block_end = samples_to_ticks(samples_done, sample_rate, software_tps);
        clock.set(block_end);
        pending.extend(pipeline.source_mut().drain_messages());
        while pending.front().map_or(false, |m| m.timestamp <= block_end) {
            if let Some(message) = pending.pop_front() {
                sender.send(message.text, to_trial_ts(message.timestamp));
            }
        }
    }

    engine.shutdown();
    for event in engine.try_events() {
        if let EngineEvent::Stopped { finalized, discarded } = event {
            info!("stopped: {finalized} finalized, {discarded} discarded");
        } else {
            debug!("{event:?}");
        }
    }

    let summary = summarize(&statistics, &config, seconds, pipeline.detector().spikes_detected());
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}
