// src/types.rs
use serde::{Deserialize, Serialize};

// 时间基准
#[derive(PartialEq, Eq, Clone, Copy, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Timescale {
    /// Host clock ticks, stamped when a message or block reaches the process.
    #[default]
    Software,
    /// Acquisition sample counter.
    Hardware,
}

// 电极 + 分类后的单元
#[derive(PartialEq, Eq, PartialOrd, Ord, Hash, Clone, Copy, Debug, Serialize, Deserialize)]
pub struct UnitKey {
    pub electrode_id: i32,
    pub unit_id: i32,
}

impl UnitKey {
    pub fn new(electrode_id: i32, unit_id: i32) -> Self {
        Self {
            electrode_id,
            unit_id,
        }
    }
}

#[derive(PartialEq, Eq, Clone, Copy, Debug, Serialize, Deserialize)]
pub struct Rgb {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Rgb {
    pub const WHITE: Rgb = Rgb::new(255, 255, 255);

    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }
}

impl Default for Rgb {
    fn default() -> Self {
        Self::WHITE
    }
}

// 控制线程发给后台的文本消息
#[derive(Clone, Debug, PartialEq)]
pub struct StampedMessage {
    pub text: String,
    /// Ticks in the configured trial timescale.
    pub timestamp: i64,
}

impl StampedMessage {
    pub fn new(text: impl Into<String>, timestamp: i64) -> Self {
        Self {
            text: text.into(),
            timestamp,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum DropReason {
    MissingType,
    MissingOutcome,
    NegativeDuration,
    TooLong,
    /// A new trial started before this one ended.
    Superseded,
    /// The worker stopped before the trial could be aggregated.
    Shutdown,
}

// 后台发给观察者的事件
#[derive(Clone, Debug, PartialEq)]
pub enum EngineEvent {
    TrialQueued { trial_id: u64 },
    TrialDropped { trial_id: u64, reason: DropReason },
    TrialAggregated { trial_id: u64, conditions: Vec<u32> },
    Stopped { finalized: usize, discarded: usize },
}
