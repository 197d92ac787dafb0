// src/orchestrator.rs
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::mem;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;

use log::{debug, info, warn};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;

use crate::acquisition::{
    ContinuousCircularBuffer, ContinuousWindow, CoreError, ElectrodeInfo, ElectrodeObserver, SampleBlock,
    SpikeCircularBuffer, SpikeObject, TimeFrame,
};
use crate::clock::Clock;
use crate::command::{Command, ConditionSpec};
use crate::condition::{Condition, ConditionPsth, PsthSnapshot, TTL_TRIAL_TYPE_BASE};
use crate::config::{DrainPolicy, EngineConfig, PsthConfig, TrialConfig};
use crate::interp::Interpolator;
use crate::trial::{BufferCursors, Trial, TrialState};
use crate::types::{DropReason, EngineEvent, Rgb, Timescale, UnitKey};

/// Outcome code carried by trials synthesized from TTL edges.
pub const TTL_TRIAL_OUTCOME: i32 = 0;

type SharedSpikes = Arc<Mutex<SpikeCircularBuffer>>;

struct UnitEntry {
    unit_id: i32,
    color: Rgb,
    spikes: SharedSpikes,
}

struct ElectrodeEntry {
    info: ElectrodeInfo,
    units: Vec<UnitEntry>,
}

#[derive(Default)]
struct Topology {
    electrodes: Vec<ElectrodeEntry>,
}

impl Topology {
    fn electrode_mut(&mut self, electrode_id: i32) -> Option<&mut ElectrodeEntry> {
        self.electrodes.iter_mut().find(|e| e.info.id == electrode_id)
    }

    fn unit_keys(&self) -> Vec<UnitKey> {
        self.electrodes
            .iter()
            .flat_map(|e| e.units.iter().map(move |u| UnitKey::new(e.info.id, u.unit_id)))
            .collect()
    }

    fn unit_buffers(&self) -> Vec<(UnitKey, SharedSpikes)> {
        self.electrodes
            .iter()
            .flat_map(|e| {
                e.units
                    .iter()
                    .map(move |u| (UnitKey::new(e.info.id, u.unit_id), Arc::clone(&u.spikes)))
            })
            .collect()
    }

    fn unit_buffer(&self, key: UnitKey) -> Option<SharedSpikes> {
        self.electrodes
            .iter()
            .find(|e| e.info.id == key.electrode_id)?
            .units
            .iter()
            .find(|u| u.unit_id == key.unit_id)
            .map(|u| Arc::clone(&u.spikes))
    }
}

struct ConditionEntry {
    condition: Condition,
    units: BTreeMap<UnitKey, ConditionPsth>,
    channels: Vec<ConditionPsth>,
}

#[derive(Default)]
struct Design {
    name: String,
    conditions: Vec<ConditionEntry>,
    next_condition_id: u32,
}

struct TrialTracker {
    current: Trial,
    next_trial_id: u64,
    hardware_alignment: bool,
    pending: VecDeque<Trial>,
    last_ttl: HashMap<usize, i64>,
    aggregated: u64,
    dropped: u64,
}

impl TrialTracker {
    fn new(hardware_alignment: bool) -> Self {
        Self {
            current: Trial::new(0, hardware_alignment),
            next_trial_id: 1,
            hardware_alignment,
            pending: VecDeque::new(),
            last_ttl: HashMap::new(),
            aggregated: 0,
            dropped: 0,
        }
    }

    fn next_id(&mut self) -> u64 {
        let id = self.next_trial_id;
        self.next_trial_id += 1;
        id
    }

    /// Replaces the current trial with a fresh one and returns the old one.
    fn renew(&mut self) -> Trial {
        let id = self.next_id();
        mem::replace(&mut self.current, Trial::new(id, self.hardware_alignment))
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct UnitPsth {
    pub unit: UnitKey,
    pub psth: PsthSnapshot,
}

#[derive(Clone, Debug, Serialize)]
pub struct ConditionSnapshot {
    pub condition: Condition,
    pub units: Vec<UnitPsth>,
    pub channels: Vec<PsthSnapshot>,
}

#[derive(Clone, Debug, Serialize)]
pub struct DesignSnapshot {
    pub name: String,
    pub revision: u64,
    pub conditions: Vec<ConditionSnapshot>,
}

/// Owns the spike and continuous ring buffers, the condition set and the trial queue,
/// and folds finished trials into the per-condition PSTHs.
///
/// Lock order is topology, then design. Buffer locks are taken one at a time and only
/// around the read or write of that buffer.
pub struct TrialCircularBuffer {
    trial_config: TrialConfig,
    psth_config: PsthConfig,
    timescale: Timescale,
    ticks_per_second: f64,
    num_channels: usize,
    clock: Arc<dyn Clock>,
    topology: RwLock<Topology>,
    lfp: Mutex<ContinuousCircularBuffer>,
    design: RwLock<Design>,
    trials: Mutex<TrialTracker>,
    latest_hardware_ts: AtomicI64,
    revision: AtomicU64,
}

impl TrialCircularBuffer {
    pub fn new(config: &EngineConfig, clock: Arc<dyn Clock>) -> Result<Self, CoreError> {
        config.validate()?;
        let lfp = ContinuousCircularBuffer::new(
            config.acquisition.num_channels,
            config.acquisition.sample_rate_hz,
            config.lfp.subsampling,
            config.lfp.buffer_seconds,
            config.acquisition.software_ticks_per_second as f64,
        )?;
        let timescale = config.trials.timescale;
        let buffer = Self {
            trial_config: config.trials.clone(),
            psth_config: config.psth.clone(),
            timescale,
            ticks_per_second: config.trial_ticks_per_second(),
            num_channels: config.acquisition.num_channels,
            clock,
            topology: RwLock::new(Topology::default()),
            lfp: Mutex::new(lfp),
            design: RwLock::new(Design::default()),
            trials: Mutex::new(TrialTracker::new(timescale == Timescale::Hardware)),
            latest_hardware_ts: AtomicI64::new(i64::MIN),
            revision: AtomicU64::new(0),
        };
        if buffer.trial_config.add_default_ttl_conditions {
            let topology = buffer.topology.read();
            let mut design = buffer.design.write();
            buffer.install_ttl_conditions(&mut design, &topology.unit_keys());
        }
        Ok(buffer)
    }

    pub fn timescale(&self) -> Timescale {
        self.timescale
    }

    pub fn ticks_per_second(&self) -> f64 {
        self.ticks_per_second
    }

    fn secs_to_ticks(&self, seconds: f64) -> i64 {
        (seconds * self.ticks_per_second).round() as i64
    }

    /// Current time in the trial timescale. Hardware time advances with the data.
    pub fn now_ticks(&self) -> i64 {
        match self.timescale {
            Timescale::Software => self.clock.now_ticks(),
            Timescale::Hardware => self.latest_hardware_ts.load(Ordering::Acquire),
        }
    }

    fn bump(&self) {
        self.revision.fetch_add(1, Ordering::AcqRel);
    }

    /// Increments whenever any PSTH or the condition set changes.
    pub fn revision(&self) -> u64 {
        self.revision.load(Ordering::Acquire)
    }

    // ---------------------------------------------------------------
    // 采集线程写入
    // ---------------------------------------------------------------

    pub fn update_continuous(&self, block: &SampleBlock) -> Result<(), CoreError> {
        self.lfp.lock().update(block)?;
        let newest = block.hardware_timestamp + block.num_samples() as i64 - 1;
        self.latest_hardware_ts.fetch_max(newest, Ordering::AcqRel);
        Ok(())
    }

    /// Stores a sorted spike. Unsorted spikes are ignored.
    pub fn add_spike(&self, spike: &SpikeObject) {
        let Some(key) = spike.unit_key() else {
            return;
        };
        let ts = match self.timescale {
            Timescale::Software => spike.software_timestamp,
            Timescale::Hardware => spike.timestamp,
        };
        let buffer = self.topology.read().unit_buffer(key);
        match buffer {
            Some(buffer) => buffer.lock().add(ts),
            None => warn!(
                "spike for unregistered unit {} on electrode {}",
                key.unit_id, key.electrode_id
            ),
        }
    }

    // ---------------------------------------------------------------
    // 消息处理
    // ---------------------------------------------------------------

    /// Parses and applies one protocol message. Malformed text is logged and dropped.
    pub fn handle_message(&self, text: &str, timestamp: i64) -> Option<EngineEvent> {
        match Command::parse(text) {
            Ok(command) => self.handle_command(command, timestamp),
            Err(err) => {
                debug!("ignoring message `{text}`: {err}");
                None
            }
        }
    }

    pub fn handle_command(&self, command: Command, timestamp: i64) -> Option<EngineEvent> {
        match command {
            Command::TrialStart => return self.start_trial(timestamp),
            Command::TrialEnd => return self.end_trial(timestamp),
            Command::TrialType(trial_type) => self.trials.lock().current.set_type(trial_type),
            Command::TrialOutcome(outcome) => self.trials.lock().current.set_outcome(outcome),
            Command::TrialAlign => {
                let mut trials = self.trials.lock();
                if trials.current.in_progress() {
                    trials.current.align(timestamp);
                } else {
                    debug!("trialalign outside of a trial");
                }
            }
            Command::AddCondition(spec) => {
                if let Err(err) = self.add_condition(spec) {
                    debug!("addcondition rejected: {err}");
                }
            }
            Command::ClearDesign => self.clear_design(),
            Command::NewDesign(name) => self.new_design(name),
            Command::Ttl { channel, value } => return self.handle_ttl(channel, value, timestamp),
            Command::NewElectrode { electrode_id, channels } => self.add_electrode(ElectrodeInfo {
                id: electrode_id,
                name: format!("Electrode {electrode_id}"),
                channels,
            }),
            Command::RemoveElectrode(electrode_id) => {
                if let Err(err) = self.remove_electrode(electrode_id) {
                    debug!("removeelectrode: {err}");
                }
            }
            Command::NewUnit { electrode_id, unit_id, color } => {
                if let Err(err) = self.add_unit(UnitKey::new(electrode_id, unit_id), color) {
                    warn!("newunit: {err}");
                }
            }
            Command::RemoveUnit { electrode_id, unit_id } => {
                if let Err(err) = self.remove_unit(UnitKey::new(electrode_id, unit_id)) {
                    debug!("removeunit: {err}");
                }
            }
            Command::ClearStats => self.clear_statistics(),
        }
        None
    }

    fn capture_cursors(&self) -> BufferCursors {
        let units = self.topology.read().unit_buffers();
        let spikes = units
            .into_iter()
            .map(|(key, buffer)| (key, buffer.lock().pointer()))
            .collect();
        let lfp = self.lfp.lock().pointer();
        BufferCursors { spikes, lfp }
    }

    fn enqueue(&self, trials: &mut TrialTracker, trial: Trial) -> EngineEvent {
        if trials.pending.len() >= self.trial_config.max_trials_in_memory {
            if let Some(oldest) = trials.pending.pop_front() {
                warn!("trial queue full, dropping trial {}", oldest.id);
                trials.dropped += 1;
            }
        }
        let trial_id = trial.id;
        trials.pending.push_back(trial);
        EngineEvent::TrialQueued { trial_id }
    }

    fn start_trial(&self, timestamp: i64) -> Option<EngineEvent> {
        let cursors = self.capture_cursors();
        let mut trials = self.trials.lock();
        let superseded = if trials.current.in_progress() {
            let mut old = trials.renew();
            old.discard();
            warn!("trial {} restarted before it ended, dropping it", old.id);
            trials.dropped += 1;
            Some(EngineEvent::TrialDropped {
                trial_id: old.id,
                reason: DropReason::Superseded,
            })
        } else {
            None
        };
        trials.current.start(timestamp, cursors);
        superseded
    }

    fn end_trial(&self, timestamp: i64) -> Option<EngineEvent> {
        let max_ticks = self.secs_to_ticks(self.trial_config.max_trial_time_sec);
        let mut trials = self.trials.lock();
        if !trials.current.in_progress() {
            debug!("trialend without a trial in progress");
            return None;
        }
        let result = trials.current.finish(timestamp, max_ticks);
        let finished = trials.renew();
        match result {
            Ok(()) => Some(self.enqueue(&mut trials, finished)),
            Err(reason) => {
                warn!("dropping trial {}: {:?}", finished.id, reason);
                trials.dropped += 1;
                Some(EngineEvent::TrialDropped {
                    trial_id: finished.id,
                    reason,
                })
            }
        }
    }

    fn handle_ttl(&self, channel: usize, value: i32, timestamp: i64) -> Option<EngineEvent> {
        if value <= 0 {
            return None;
        }
        if let Some(allowed) = &self.trial_config.ttl_trigger_channels {
            if !allowed.contains(&channel) {
                return None;
            }
        }
        let suppression = self.secs_to_ticks(self.trial_config.ttl_suppression_sec);
        let length = self.secs_to_ticks(self.trial_config.ttl_trial_length_sec);
        let cursors = self.capture_cursors();
        let mut trials = self.trials.lock();
        if let Some(&last) = trials.last_ttl.get(&channel) {
            if timestamp - last <= suppression {
                debug!("ttl {channel} suppressed ({} ticks after the last trigger)", timestamp - last);
                return None;
            }
        }
        trials.last_ttl.insert(channel, timestamp);
        let id = trials.next_id();
        let trial = Trial::synthesized(
            id,
            TTL_TRIAL_TYPE_BASE + channel as i32,
            TTL_TRIAL_OUTCOME,
            timestamp,
            timestamp + length,
            trials.hardware_alignment,
            cursors,
        );
        Some(self.enqueue(&mut trials, trial))
    }

    // ---------------------------------------------------------------
    // 聚合
    // ---------------------------------------------------------------

    fn max_post_sec(&self) -> f64 {
        self.design
            .read()
            .conditions
            .iter()
            .map(|c| c.condition.post_sec)
            .fold(self.trial_config.post_sec, f64::max)
    }

    /// Aggregates every queued trial whose post-trial window has fully elapsed.
    pub fn process_pending(&self) -> Vec<EngineEvent> {
        let now = self.now_ticks();
        let post = self.secs_to_ticks(self.max_post_sec());
        let mut events = Vec::new();
        loop {
            let next = {
                let mut trials = self.trials.lock();
                let ready = trials
                    .pending
                    .front()
                    .map_or(false, |t| now.saturating_sub(t.end_ts) > post);
                if ready {
                    trials.pending.pop_front()
                } else {
                    None
                }
            };
            let Some(trial) = next else {
                break;
            };
            events.push(self.aggregate(trial));
        }
        events
    }

    fn aggregate(&self, mut trial: Trial) -> EngineEvent {
        let (Some(trial_type), Some(outcome)) = (trial.trial_type, trial.outcome) else {
            trial.discard();
            return EngineEvent::TrialDropped {
                trial_id: trial.id,
                reason: DropReason::MissingType,
            };
        };
        let align = trial.align_timestamp();
        let windows: Vec<(u32, f64, f64)> = self
            .design
            .read()
            .conditions
            .iter()
            .filter(|c| c.condition.matches(trial_type, outcome))
            .map(|c| (c.condition.id, c.condition.pre_sec, c.condition.post_sec))
            .collect();
        if windows.is_empty() {
            trial.mark_aggregated();
            self.trials.lock().aggregated += 1;
            return EngineEvent::TrialAggregated {
                trial_id: trial.id,
                conditions: Vec::new(),
            };
        }

        let units = self.topology.read().unit_buffers();
        let mut spike_windows: Vec<(u32, UnitKey, Vec<f64>)> = Vec::new();
        for (key, buffer) in units {
            let buffer = buffer.lock();
            let cursor = trial
                .cursors
                .spikes
                .get(&key)
                .copied()
                .unwrap_or_else(|| buffer.pointer());
            for &(id, pre, post) in &windows {
                let frame = TimeFrame {
                    start: trial.start_ts,
                    align,
                    end: trial.end_ts,
                    before: self.secs_to_ticks(pre),
                    after: self.secs_to_ticks(post),
                };
                let offsets = buffer
                    .aligned_spikes_in_time_frame(cursor, &frame)
                    .into_iter()
                    .map(|t| t as f64 / self.ticks_per_second)
                    .collect();
                spike_windows.push((id, key, offsets));
            }
        }

        let lfp_windows: Vec<(u32, ContinuousWindow)> = {
            let lfp = self.lfp.lock();
            windows
                .iter()
                .map(|&(id, pre, post)| {
                    let lo = align - self.secs_to_ticks(pre);
                    let hi = align + self.secs_to_ticks(post);
                    (id, lfp.window(trial.cursors.lfp, self.timescale, lo, hi, align))
                })
                .collect()
        };

        let elapsed_sec = (trial.end_ts - align) as f64 / self.ticks_per_second;
        let mut updated = Vec::new();
        {
            let mut design = self.design.write();
            for entry in design.conditions.iter_mut() {
                let id = entry.condition.id;
                if !windows.iter().any(|w| w.0 == id) {
                    continue;
                }
                let observed_until = elapsed_sec + entry.condition.post_sec;
                for (_, key, offsets) in spike_windows.iter().filter(|w| w.0 == id) {
                    if let Some(psth) = entry.units.get_mut(key) {
                        psth.update_spikes(offsets, observed_until);
                    }
                }
                if let (Some((_, window)), Some(first)) =
                    (lfp_windows.iter().find(|w| w.0 == id), entry.channels.first())
                {
                    let interp = Interpolator::new(&window.time_sec, &first.bin_times());
                    for (channel, psth) in entry.channels.iter_mut().enumerate() {
                        let samples = window.data.get(channel).map(Vec::as_slice).unwrap_or(&[]);
                        let resampled = interp.apply(samples);
                        psth.update_continuous(&resampled.values, &resampled.valid);
                    }
                }
                updated.push(id);
            }
        }
        self.bump();
        trial.mark_aggregated();
        self.trials.lock().aggregated += 1;
        debug!("trial {} aggregated into conditions {:?}", trial.id, updated);
        EngineEvent::TrialAggregated {
            trial_id: trial.id,
            conditions: updated,
        }
    }

    /// Empties the trial queue on shutdown. The trial still in progress is always dropped.
    /// The last event is always `Stopped`.
    pub fn drain(&self, policy: DrainPolicy) -> Vec<EngineEvent> {
        let (pending, in_progress) = {
            let mut trials = self.trials.lock();
            let pending: Vec<Trial> = trials.pending.drain(..).collect();
            let current = trials.current.in_progress().then(|| trials.renew());
            (pending, current)
        };
        let mut events = Vec::new();
        let mut discarded = 0;
        let mut finalized = 0;
        let dropped = |mut trial: Trial| {
            trial.discard();
            EngineEvent::TrialDropped {
                trial_id: trial.id,
                reason: DropReason::Shutdown,
            }
        };
        if let Some(trial) = in_progress {
            events.push(dropped(trial));
            discarded += 1;
        }
        for trial in pending {
            match policy {
                DrainPolicy::Discard => {
                    events.push(dropped(trial));
                    discarded += 1;
                }
                DrainPolicy::ForceFinalize => {
                    events.push(self.aggregate(trial));
                    finalized += 1;
                }
            }
        }
        self.trials.lock().dropped += discarded as u64;
        info!("trial queue drained: {finalized} finalized, {discarded} discarded");
        events.push(EngineEvent::Stopped { finalized, discarded });
        events
    }

    pub fn pending_trials(&self) -> usize {
        self.trials.lock().pending.len()
    }

    pub fn current_trial_state(&self) -> TrialState {
        self.trials.lock().current.state()
    }

    pub fn aggregated_trials(&self) -> u64 {
        self.trials.lock().aggregated
    }

    pub fn dropped_trials(&self) -> u64 {
        self.trials.lock().dropped
    }

    // ---------------------------------------------------------------
    // 实验设计
    // ---------------------------------------------------------------

    fn new_entry(&self, condition: Condition, units: &[UnitKey]) -> ConditionEntry {
        let (pre, post) = (condition.pre_sec, condition.post_sec);
        ConditionEntry {
            units: units
                .iter()
                .map(|&key| (key, ConditionPsth::new(pre, post, self.psth_config.spike_bin_ms)))
                .collect(),
            channels: (0..self.num_channels)
                .map(|_| ConditionPsth::new(pre, post, self.psth_config.lfp_bin_ms))
                .collect(),
            condition,
        }
    }

    fn install_ttl_conditions(&self, design: &mut Design, units: &[UnitKey]) {
        let post = self.trial_config.post_sec + self.trial_config.ttl_trial_length_sec;
        for channel in 0..self.trial_config.num_ttl_channels {
            let id = design.next_condition_id;
            design.next_condition_id += 1;
            let condition = Condition::ttl(id, channel, self.trial_config.pre_sec, post);
            design.conditions.push(self.new_entry(condition, units));
        }
    }

    /// Longest `pre + post` a condition may ask for; bounds the PSTH allocation.
    fn max_condition_span_sec(&self) -> f64 {
        self.trial_config.max_trial_time_sec + self.trial_config.pre_sec + self.trial_config.post_sec
    }

    pub fn add_condition(&self, spec: ConditionSpec) -> Result<u32, CoreError> {
        let pre = spec.pre_sec.unwrap_or(self.trial_config.pre_sec);
        let post = spec.post_sec.unwrap_or(self.trial_config.post_sec);
        let limit = self.max_condition_span_sec();
        // NaN fails every comparison
        if !(pre >= 0.0 && post >= 0.0 && pre + post > 0.0 && pre + post <= limit) {
            return Err(CoreError::InvalidConditionWindow { pre, post, limit });
        }
        let topology = self.topology.read();
        let mut design = self.design.write();
        let id = design.next_condition_id;
        design.next_condition_id += 1;
        let condition = Condition::from_spec(id, spec, self.trial_config.pre_sec, self.trial_config.post_sec);
        info!("condition {id} `{}` added", condition.name);
        design.conditions.push(self.new_entry(condition, &topology.unit_keys()));
        drop(design);
        self.bump();
        Ok(id)
    }

    pub fn clear_design(&self) {
        let topology = self.topology.read();
        let mut design = self.design.write();
        design.conditions.clear();
        design.name.clear();
        if self.trial_config.add_default_ttl_conditions {
            self.install_ttl_conditions(&mut design, &topology.unit_keys());
        }
        drop(design);
        self.bump();
    }

    pub fn new_design(&self, name: String) {
        self.clear_design();
        info!("new design `{name}`");
        self.design.write().name = name;
    }

    pub fn design_name(&self) -> String {
        self.design.read().name.clone()
    }

    pub fn conditions(&self) -> Vec<Condition> {
        self.design.read().conditions.iter().map(|c| c.condition.clone()).collect()
    }

    pub fn set_condition_visible(&self, condition_id: u32, visible: bool) -> Result<(), CoreError> {
        let mut design = self.design.write();
        let entry = design
            .conditions
            .iter_mut()
            .find(|c| c.condition.id == condition_id)
            .ok_or(CoreError::UnknownCondition(condition_id))?;
        entry.condition.visible = visible;
        drop(design);
        self.bump();
        Ok(())
    }

    pub fn toggle_condition_visibility(&self, condition_id: u32) -> Result<bool, CoreError> {
        let visible = {
            let design = self.design.read();
            let entry = design
                .conditions
                .iter()
                .find(|c| c.condition.id == condition_id)
                .ok_or(CoreError::UnknownCondition(condition_id))?;
            !entry.condition.visible
        };
        self.set_condition_visible(condition_id, visible)?;
        Ok(visible)
    }

    /// Zeroes every PSTH without touching conditions or topology.
    pub fn clear_statistics(&self) {
        let mut design = self.design.write();
        for entry in design.conditions.iter_mut() {
            entry.units.values_mut().for_each(ConditionPsth::clear);
            entry.channels.iter_mut().for_each(ConditionPsth::clear);
        }
        drop(design);
        self.bump();
    }

    // ---------------------------------------------------------------
    // 电极与单元
    // ---------------------------------------------------------------

    pub fn add_electrode(&self, info: ElectrodeInfo) {
        let mut topology = self.topology.write();
        if topology.electrodes.iter().any(|e| e.info.id == info.id) {
            debug!("electrode {} already registered", info.id);
            return;
        }
        topology.electrodes.push(ElectrodeEntry {
            info,
            units: Vec::new(),
        });
    }

    pub fn remove_electrode(&self, electrode_id: i32) -> Result<(), CoreError> {
        let mut topology = self.topology.write();
        let index = topology
            .electrodes
            .iter()
            .position(|e| e.info.id == electrode_id)
            .ok_or(CoreError::UnknownElectrode(electrode_id))?;
        topology.electrodes.remove(index);
        let mut design = self.design.write();
        for entry in design.conditions.iter_mut() {
            entry.units.retain(|key, _| key.electrode_id != electrode_id);
        }
        drop(design);
        drop(topology);
        self.bump();
        Ok(())
    }

    pub fn update_electrode_channels(&self, info: &ElectrodeInfo) {
        if let Some(electrode) = self.topology.write().electrode_mut(info.id) {
            electrode.info.channels = info.channels.clone();
        }
    }

    pub fn add_unit(&self, key: UnitKey, color: Rgb) -> Result<(), CoreError> {
        let mut topology = self.topology.write();
        let electrode = topology
            .electrode_mut(key.electrode_id)
            .ok_or(CoreError::UnknownElectrode(key.electrode_id))?;
        if electrode.units.iter().any(|u| u.unit_id == key.unit_id) {
            return Ok(());
        }
        electrode.units.push(UnitEntry {
            unit_id: key.unit_id,
            color,
            spikes: Arc::new(Mutex::new(SpikeCircularBuffer::new(
                self.trial_config.spike_buffer_capacity(),
            ))),
        });
        let mut design = self.design.write();
        for entry in design.conditions.iter_mut() {
            let (pre, post) = (entry.condition.pre_sec, entry.condition.post_sec);
            entry
                .units
                .insert(key, ConditionPsth::new(pre, post, self.psth_config.spike_bin_ms));
        }
        drop(design);
        drop(topology);
        self.bump();
        Ok(())
    }

    pub fn remove_unit(&self, key: UnitKey) -> Result<(), CoreError> {
        let mut topology = self.topology.write();
        let electrode = topology
            .electrode_mut(key.electrode_id)
            .ok_or(CoreError::UnknownElectrode(key.electrode_id))?;
        let index = electrode
            .units
            .iter()
            .position(|u| u.unit_id == key.unit_id)
            .ok_or(CoreError::UnknownUnit {
                electrode: key.electrode_id,
                unit: key.unit_id,
            })?;
        electrode.units.remove(index);
        let mut design = self.design.write();
        for entry in design.conditions.iter_mut() {
            entry.units.remove(&key);
        }
        drop(design);
        drop(topology);
        self.bump();
        Ok(())
    }

    pub fn electrodes(&self) -> Vec<ElectrodeInfo> {
        self.topology.read().electrodes.iter().map(|e| e.info.clone()).collect()
    }

    pub fn units(&self) -> Vec<(UnitKey, Rgb)> {
        self.topology
            .read()
            .electrodes
            .iter()
            .flat_map(|e| e.units.iter().map(move |u| (UnitKey::new(e.info.id, u.unit_id), u.color)))
            .collect()
    }

    // ---------------------------------------------------------------
    // 渲染层读取
    // ---------------------------------------------------------------

    /// Write cursor of the continuous buffer.
    pub fn lfp_pointer(&self) -> usize {
        self.lfp.lock().pointer()
    }

    pub fn spike_pointer(&self, key: UnitKey) -> Option<usize> {
        let buffer = self.topology.read().unit_buffer(key)?;
        let pointer = buffer.lock().pointer();
        Some(pointer)
    }

    /// Spikes of one unit inside `frame`, scanned from a cursor taken with `spike_pointer`.
    pub fn aligned_spikes(&self, key: UnitKey, cursor: usize, frame: &TimeFrame) -> Option<Vec<i64>> {
        let buffer = self.topology.read().unit_buffer(key)?;
        let spikes = buffer.lock().aligned_spikes_in_time_frame(cursor, frame);
        Some(spikes)
    }

    pub fn spike_count(&self, key: UnitKey) -> Option<usize> {
        let buffer = self.topology.read().unit_buffer(key)?;
        let len = buffer.lock().len();
        Some(len)
    }

    pub fn unit_psth(&self, condition_id: u32, key: UnitKey) -> Option<PsthSnapshot> {
        let design = self.design.read();
        let entry = design.conditions.iter().find(|c| c.condition.id == condition_id)?;
        entry.units.get(&key).map(ConditionPsth::snapshot)
    }

    pub fn channel_psth(&self, condition_id: u32, channel: usize) -> Option<PsthSnapshot> {
        let design = self.design.read();
        let entry = design.conditions.iter().find(|c| c.condition.id == condition_id)?;
        entry.channels.get(channel).map(ConditionPsth::snapshot)
    }

    pub fn snapshot(&self) -> DesignSnapshot {
        let design = self.design.read();
        DesignSnapshot {
            name: design.name.clone(),
            revision: self.revision(),
            conditions: design
                .conditions
                .iter()
                .map(|entry| ConditionSnapshot {
                    condition: entry.condition.clone(),
                    units: entry
                        .units
                        .iter()
                        .map(|(&unit, psth)| UnitPsth {
                            unit,
                            psth: psth.snapshot(),
                        })
                        .collect(),
                    channels: entry.channels.iter().map(ConditionPsth::snapshot).collect(),
                })
                .collect(),
        }
    }
}

impl ElectrodeObserver for TrialCircularBuffer {
    fn electrode_added(&self, electrode: &ElectrodeInfo) {
        self.add_electrode(electrode.clone());
    }

    fn electrode_removed(&self, electrode_id: i32) {
        if let Err(err) = self.remove_electrode(electrode_id) {
            warn!("{err}");
        }
    }

    fn channel_changed(&self, electrode: &ElectrodeInfo) {
        self.update_electrode_channels(electrode);
    }

    fn unit_added(&self, key: UnitKey, color: Rgb) {
        if let Err(err) = self.add_unit(key, color) {
            warn!("{err}");
        }
    }

    fn unit_removed(&self, key: UnitKey) {
        if let Err(err) = self.remove_unit(key) {
            warn!("{err}");
        }
    }
}
