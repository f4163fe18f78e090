//! Run stage tracking

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use topt_target::TargetKey;

use super::{next_seq, now};

/// Pipeline stage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Idle,
    SyncingSource,
    PreparingEnvironment,
    Building,
    PostProcessing,
    /// macOS only
    Fusing,
    Packaging,
    Summarizing,
    Done,
    Failed,
}

impl Stage {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Stage::Done | Stage::Failed)
    }

    /// Whether `self → target` is a legal step.
    ///
    /// Target stages may be left early for the later stages because a
    /// matrix can be empty or every target can fail.
    pub fn can_transition_to(&self, target: Stage) -> bool {
        use Stage::*;
        if target == Failed {
            return !self.is_terminal();
        }
        match (self, target) {
            (Idle, SyncingSource) => true,
            (SyncingSource, PreparingEnvironment) => true,
            (PreparingEnvironment, Building | Fusing | Packaging | Summarizing) => true,
            (Building, Building | PostProcessing | Fusing | Packaging | Summarizing) => true,
            (PostProcessing, Building | Fusing | Packaging | Summarizing) => true,
            (Fusing, Packaging | Summarizing) => true,
            (Packaging, Summarizing) => true,
            (Summarizing, Done) => true,
            _ => false,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Idle => "idle",
            Stage::SyncingSource => "syncing-source",
            Stage::PreparingEnvironment => "preparing-environment",
            Stage::Building => "building",
            Stage::PostProcessing => "post-processing",
            Stage::Fusing => "fusing",
            Stage::Packaging => "packaging",
            Stage::Summarizing => "summarizing",
            Stage::Done => "done",
            Stage::Failed => "failed",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StageError {
    #[error("invalid stage transition from {from} to {to}")]
    InvalidTransition { from: Stage, to: Stage },
}

/// Where a run is
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunStateData {
    pub run_id: String,
    pub stage: Stage,

    /// Target being built or post-processed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_target: Option<TargetKey>,

    /// Stage the run was in when it failed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed_stage: Option<Stage>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub seq: u64,
}

impl RunStateData {
    pub fn new(run_id: impl Into<String>) -> Self {
        let now = now();
        Self {
            run_id: run_id.into(),
            stage: Stage::Idle,
            current_target: None,
            failed_stage: None,
            created_at: now,
            updated_at: now,
            seq: next_seq(),
        }
    }

    pub fn transition(&mut self, stage: Stage) -> Result<(), StageError> {
        if !self.stage.can_transition_to(stage) {
            return Err(StageError::InvalidTransition {
                from: self.stage,
                to: stage,
            });
        }
        if stage == Stage::Failed {
            self.failed_stage = Some(self.stage);
        }
        if !matches!(stage, Stage::Building | Stage::PostProcessing) {
            self.current_target = None;
        }
        self.stage = stage;
        self.touch();
        Ok(())
    }

    /// Enter `stage` for one target
    pub fn enter_target(&mut self, stage: Stage, target: TargetKey) -> Result<(), StageError> {
        self.transition(stage)?;
        self.current_target = Some(target);
        Ok(())
    }

    pub fn fail(&mut self) -> Result<(), StageError> {
        self.transition(Stage::Failed)
    }

    fn touch(&mut self) {
        self.updated_at = now();
        self.seq = next_seq();
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}
