use thiserror::Error;
use crate::command::CommandError;
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("sample rate must be greater than zero")]
    InvalidSampleRate,
    #[error("sample rate mismatch: expected {expected}, got {actual}")]
    SampleRateMismatch { expected: f32, actual: f32 },
    #[error("channel count mismatch: expected {expected}, got {actual}")]
    ChannelMismatch { expected: usize, actual: usize },
    #[error("electrode {0} does not exist")]
    UnknownElectrode(i32),
    #[error("electrode {electrode} has no channel slot {index}")]
    UnknownElectrodeChannel { electrode: i32, index: usize },
    #[error("unit {unit} is not registered on electrode {electrode}")]
    UnknownUnit { electrode: i32, unit: i32 },
    #[error("condition {0} does not exist")]
    UnknownCondition(u32),
    #[error("electrode needs at least one channel")]
    EmptyElectrode,
    #[error("input channel {channel} out of range ({available} inputs)")]
    ChannelOutOfRange { channel: usize, available: usize },
    #[error("spike window {pre}+{post} samples does not fit the {overflow}-sample overflow buffer")]
    SpikeWindowTooLarge {
        pre: usize,
        post: usize,
        overflow: usize,
    },
    #[error("condition window pre {pre} s + post {post} s is empty or longer than {limit} s")]
    InvalidConditionWindow { pre: f64, post: f64, limit: f64 },
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("failed to start aggregation worker: {0}")]
    WorkerSpawn(#[source] std::io::Error),
    #[error(transparent)]
    Command(#[from] CommandError),
}
