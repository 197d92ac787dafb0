// src/lib.rs
// 实时尖峰检测 + 试次对齐 PSTH 统计
pub mod acquisition;
pub mod clock;
pub mod command;
pub mod condition;
pub mod config;
pub mod engine;
pub mod interp;
pub mod orchestrator;
pub mod trial;
pub mod types;

pub use acquisition::{AcquisitionPipeline, CoreError, SampleBlock, SignalSource, SpikeDetector, SpikeObject};
pub use clock::{Clock, ManualClock, SystemClock};
pub use command::{Command, CommandError, ConditionSpec};
pub use condition::{Condition, ConditionPsth, PsthSnapshot};
pub use config::{DrainPolicy, EngineConfig};
pub use engine::{AggregationEngine, MessageSender};
pub use orchestrator::{DesignSnapshot, TrialCircularBuffer};
pub use trial::{Trial, TrialState};
pub use types::{DropReason, EngineEvent, Rgb, StampedMessage, Timescale, UnitKey};
