// src/trial.rs
use std::collections::HashMap;

use serde::Serialize;

use crate::types::{DropReason, UnitKey};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum TrialState {
    NotStarted,
    InProgress,
    AwaitingAggregation,
    Aggregated,
    Discarded,
}

/// Write cursors of every ring buffer, captured when a trial starts.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct BufferCursors {
    pub spikes: HashMap<UnitKey, usize>,
    pub lfp: usize,
}

#[derive(Clone, Debug)]
pub struct Trial {
    pub id: u64,
    pub trial_type: Option<i32>,
    pub outcome: Option<i32>,
    pub start_ts: i64,
    pub align_ts: Option<i64>,
    pub end_ts: i64,
    /// Timestamps are hardware sample counts rather than software ticks.
    pub hardware_alignment: bool,
    pub cursors: BufferCursors,
    state: TrialState,
}

impl Trial {
    pub fn new(id: u64, hardware_alignment: bool) -> Self {
        Self {
            id,
            trial_type: None,
            outcome: None,
            start_ts: 0,
            align_ts: None,
            end_ts: 0,
            hardware_alignment,
            cursors: BufferCursors::default(),
            state: TrialState::NotStarted,
        }
    }

    /// Complete trial produced by a TTL edge, ready to be aggregated.
    pub fn synthesized(
        id: u64,
        trial_type: i32,
        outcome: i32,
        start_ts: i64,
        end_ts: i64,
        hardware_alignment: bool,
        cursors: BufferCursors,
    ) -> Self {
        Self {
            id,
            trial_type: Some(trial_type),
            outcome: Some(outcome),
            start_ts,
            align_ts: Some(start_ts),
            end_ts,
            hardware_alignment,
            cursors,
            state: TrialState::AwaitingAggregation,
        }
    }

    pub fn state(&self) -> TrialState {
        self.state
    }

    pub fn in_progress(&self) -> bool {
        self.state == TrialState::InProgress
    }

    // 开始前设置的类型/结果保留
    pub fn start(&mut self, timestamp: i64, cursors: BufferCursors) {
        self.start_ts = timestamp;
        self.cursors = cursors;
        self.state = TrialState::InProgress;
    }

    pub fn set_type(&mut self, trial_type: i32) {
        self.trial_type = Some(trial_type);
    }

    pub fn set_outcome(&mut self, outcome: i32) {
        self.outcome = Some(outcome);
    }

    pub fn align(&mut self, timestamp: i64) {
        self.align_ts = Some(timestamp);
    }

    /// Alignment point, defaulting to the start.
    pub fn align_timestamp(&self) -> i64 {
        self.align_ts.unwrap_or(self.start_ts)
    }

    pub fn duration_ticks(&self) -> i64 {
        self.end_ts - self.start_ts
    }

    /// Ends the trial and checks it can be aggregated; invalid trials become `Discarded`.
    pub fn finish(&mut self, timestamp: i64, max_duration_ticks: i64) -> Result<(), DropReason> {
        self.end_ts = timestamp;
        match self.validate(max_duration_ticks) {
            Ok(()) => {
                self.state = TrialState::AwaitingAggregation;
                Ok(())
            }
            Err(reason) => {
                self.state = TrialState::Discarded;
                Err(reason)
            }
        }
    }

    pub fn validate(&self, max_duration_ticks: i64) -> Result<(), DropReason> {
        if self.trial_type.is_none() {
            return Err(DropReason::MissingType);
        }
        if self.outcome.is_none() {
            return Err(DropReason::MissingOutcome);
        }
        let duration = self.duration_ticks();
        if duration < 0 {
            return Err(DropReason::NegativeDuration);
        }
        if duration >= max_duration_ticks {
            return Err(DropReason::TooLong);
        }
        Ok(())
    }

    pub fn mark_aggregated(&mut self) {
        self.state = TrialState::Aggregated;
    }

    pub fn discard(&mut self) {
        self.state = TrialState::Discarded;
    }
}
